// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * The reconciliation core. Every inbound message lands in [`Store::ingest`],
 * which decides between exactly four fates:
 *
 *   - *duplicate*: its UUID was already seen — drop.
 *   - *old*: its LTime is at or below the floor recorded for its target —
 *     drop.
 *   - *current*: its preconditions hold — apply it, raise the floor, and
 *     cascade over the intent buffer.
 *   - *future*: a predecessor it needs (an agreement, a member, a record to
 *     remove) is not here yet — buffer it as an intent.
 *
 * A message whose effect already holds (adding a present record, removing an
 * absent one for the never-buffered kinds) is a terminal no-op: the floor
 * still rises, so a stale contrary message arriving later is suppressed the
 * same way it would be after a real apply. That floor discipline is what
 * keeps tombstones from being resurrected and keeps the per-target applied
 * LTime sequence strictly monotonic.
 *
 * At most one intent is held per target. A second message that would buffer
 * against the same target competes on `(LTime, UUID)` and the loser is
 * discarded; the UUID comparison is arbitrary but identical on every
 * replica, which is all convergence needs.
 */

use crate::clock::LamportClock;
use crate::error::Error;
use crate::message::{AgreementMsg, Msg, MsgType, PluginMsg, TaskMsg};
use crate::state::{Agreement, Floor, Member, MemberStatus, Store, TargetKey};
use log::{debug, trace};

/// What `ingest` did with a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Preconditions held and state changed.
    Applied,
    /// The message's effect already held; only the floor moved.
    NoOp,
    /// Buffered as an intent pending its predecessor state.
    Buffered,
    Dropped(DropReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DropReason {
    /// UUID already seen.
    Duplicate,
    /// LTime at or below the target's floor.
    Old,
    /// Lost the intent slot to a message with a higher `(LTime, UUID)`.
    Superseded,
    /// Semantically invalid against present state and not bufferable.
    Invalid,
}

/// Effect of a successful apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Effect {
    Changed,
    NoOp,
}

/// Why an apply did not happen.
pub(crate) enum Block {
    /// Required predecessor state is absent; the message may wait for it.
    Missing,
    /// Invalid against present state; never buffered.
    Reject(Error),
    /// Kind and payload shape disagree.
    Malformed,
}

impl Store {
    /// Run one remote message through the four-step decision. The caller
    /// holds the write lock for the whole call.
    pub(crate) fn ingest(&mut self, clock: &LamportClock, msg: &Msg) -> Disposition {
        clock.witness(msg.ltime());

        if self.seen.contains(&msg.uuid()) {
            trace!("dropping duplicate {}", msg);
            return Disposition::Dropped(DropReason::Duplicate);
        }
        self.seen.insert(msg.uuid());

        let target = TargetKey::of(msg);
        if let Some(floor) = self.floor(&target) {
            if floor.suppresses(msg) {
                debug!("dropping old {} (floor {})", msg, floor.ltime);
                return Disposition::Dropped(DropReason::Old);
            }
        }

        match self.try_apply(msg) {
            Ok(effect) => {
                self.raise_floor(target, Floor::of(msg));
                match effect {
                    Effect::Changed => {
                        debug!("applied {}", msg);
                        self.cascade();
                        Disposition::Applied
                    }
                    Effect::NoOp => {
                        trace!("no-op {}", msg);
                        Disposition::NoOp
                    }
                }
            }
            Err(Block::Missing) => self.buffer(msg, target),
            Err(Block::Reject(err)) => {
                debug!("dropping invalid {}: {}", msg, err);
                Disposition::Dropped(DropReason::Invalid)
            }
            Err(Block::Malformed) => {
                debug!("dropping malformed {}", msg);
                Disposition::Dropped(DropReason::Invalid)
            }
        }
    }

    /// Apply a locally originated, already validated command message. The
    /// caller validated preconditions under the same write lock, so the
    /// apply cannot find a predecessor missing.
    pub(crate) fn commit_local(&mut self, msg: &Msg) {
        self.seen.insert(msg.uuid());
        match self.try_apply(msg) {
            Ok(effect) => {
                self.raise_floor(TargetKey::of(msg), Floor::of(msg));
                if effect == Effect::Changed {
                    self.cascade();
                }
            }
            Err(_) => unreachable!("command was validated under the write lock it still holds"),
        }
    }

    /// Buffer a message whose predecessor state is missing, fighting any
    /// intent already held for the same target. At most one intent survives
    /// per target.
    ///
    /// A repeat of the same kind keeps only the highest `(LTime, UUID)`. A
    /// contradictory pair resolves to the higher `(LTime, UUID)` — the UUID
    /// comparison settles equal-LTime ties — and the loser is discarded.
    /// When the contradiction falls to a remove-kind, there is nothing left
    /// for it to remove: the defeated add was the only pending occurrence of
    /// the record, so the remove discharges into a floor instead of waiting
    /// for state that is never coming. The floor then suppresses any
    /// stragglers below it exactly as an applied remove would.
    fn buffer(&mut self, msg: &Msg, target: TargetKey) -> Disposition {
        if let Some(pos) = self
            .intents
            .iter()
            .position(|i| TargetKey::of(&i.msg) == target)
        {
            let held = self.intents[pos].msg.clone();
            let incoming_wins = (msg.ltime(), msg.uuid()) > (held.ltime(), held.uuid());
            if held.msg_type() == msg.msg_type() {
                if !incoming_wins {
                    debug!("dropping {}: superseded by buffered {}", msg, held);
                    return Disposition::Dropped(DropReason::Superseded);
                }
                debug!("buffered {} superseded by {}", held, msg);
                self.intents.remove(pos);
            } else if incoming_wins {
                debug!("buffered {} loses to contradictory {}", held, msg);
                self.intents.remove(pos);
                if is_remove_kind(msg.msg_type()) {
                    self.raise_floor(target, Floor::of(msg));
                    return Disposition::NoOp;
                }
            } else {
                if is_remove_kind(held.msg_type()) {
                    self.intents.remove(pos);
                    self.raise_floor(target, Floor::of(&held));
                }
                debug!("dropping {}: loses to buffered {}", msg, held);
                return Disposition::Dropped(DropReason::Superseded);
            }
        }
        debug!("buffering {}", msg);
        self.push_intent(msg.clone());
        Disposition::Buffered
    }

    /// Replay the intent buffer in creation order until a full pass applies
    /// nothing. One apply can unblock a chain — add-agreement releases a
    /// buffered join-agreement which releases a buffered add-plugin — so a
    /// single pass is not enough. Intents that have fallen at or below
    /// their target's floor, or turned invalid, are discarded on the way.
    pub(crate) fn cascade(&mut self) {
        loop {
            let mut progressed = false;
            let mut idx = 0;
            while idx < self.intents.len() {
                let msg = self.intents[idx].msg.clone();
                let target = TargetKey::of(&msg);

                if let Some(floor) = self.floor(&target) {
                    if floor.suppresses(&msg) {
                        debug!("sweeping stale intent {} (floor {})", msg, floor.ltime);
                        self.intents.remove(idx);
                        continue;
                    }
                }

                match self.try_apply(&msg) {
                    Ok(effect) => {
                        self.raise_floor(target, Floor::of(&msg));
                        self.intents.remove(idx);
                        debug!("applied buffered intent {}", msg);
                        if effect == Effect::Changed {
                            progressed = true;
                        }
                    }
                    Err(Block::Missing) => {
                        idx += 1;
                    }
                    Err(Block::Reject(err)) => {
                        debug!("discarding invalid intent {}: {}", msg, err);
                        self.intents.remove(idx);
                    }
                    Err(Block::Malformed) => {
                        self.intents.remove(idx);
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn try_apply(&mut self, msg: &Msg) -> Result<Effect, Block> {
        match msg {
            Msg::Agreement(m) => match m.msg_type {
                MsgType::AddAgreement => self.apply_add_agreement(m),
                MsgType::RemoveAgreement => self.apply_remove_agreement(m),
                MsgType::JoinAgreement => self.apply_join_agreement(m),
                MsgType::LeaveAgreement => self.apply_leave_agreement(m),
                _ => Err(Block::Malformed),
            },
            Msg::Plugin(m) => match m.msg_type {
                MsgType::AddPlugin => self.apply_add_plugin(m),
                MsgType::RemovePlugin => self.apply_remove_plugin(m),
                _ => Err(Block::Malformed),
            },
            Msg::Task(m) => match m.msg_type {
                MsgType::AddTask => self.apply_add_task(m),
                MsgType::RemoveTask => self.apply_remove_task(m),
                _ => Err(Block::Malformed),
            },
        }
    }

    fn apply_add_agreement(&mut self, m: &AgreementMsg) -> Result<Effect, Block> {
        if self.agreements.contains_key(&m.agreement_name) {
            return Ok(Effect::NoOp);
        }
        self.agreements.insert(
            m.agreement_name.clone(),
            Agreement::new(m.agreement_name.clone()),
        );
        Ok(Effect::Changed)
    }

    fn apply_remove_agreement(&mut self, m: &AgreementMsg) -> Result<Effect, Block> {
        match self.agreements.get(&m.agreement_name) {
            None => Ok(Effect::NoOp),
            Some(a) if !a.members.is_empty() => Err(Block::Reject(Error::AgreementNotEmpty(
                m.agreement_name.clone(),
            ))),
            Some(_) => {
                self.agreements.remove(&m.agreement_name);
                // Task-agreement entries survive leave-agreement; this is
                // where they finally die.
                for name in self.members.keys().cloned().collect::<Vec<_>>() {
                    if let Some(member) = self.members.get_mut(&name) {
                        member.task_agreements.remove(&m.agreement_name);
                    }
                }
                Ok(Effect::Changed)
            }
        }
    }

    fn apply_join_agreement(&mut self, m: &AgreementMsg) -> Result<Effect, Block> {
        let pointer = match self.members.get(&m.member_name) {
            Some(member) => member.plugin_agreement.clone(),
            None => return Err(Block::Missing),
        };
        match self.agreements.get(&m.agreement_name) {
            None => return Err(Block::Missing),
            Some(a) if a.members.contains(&m.member_name) => return Ok(Effect::NoOp),
            Some(_) => {}
        }
        // A pointer already at this agreement is a join completing (e.g. a
        // snapshot replay), not a conflict.
        if let Some(current) = &pointer {
            if current != &m.agreement_name {
                return Err(Block::Reject(Error::AlreadyMemberOfPluginAgreement(
                    m.member_name.clone(),
                )));
            }
        }
        if let Some(a) = self.agreements.get_mut(&m.agreement_name) {
            a.members.insert(m.member_name.clone());
        }
        if let Some(member) = self.members.get_mut(&m.member_name) {
            member.plugin_agreement = Some(m.agreement_name.clone());
            member.task_agreements.insert(m.agreement_name.clone());
        }
        Ok(Effect::Changed)
    }

    fn apply_leave_agreement(&mut self, m: &AgreementMsg) -> Result<Effect, Block> {
        let removed = match self.agreements.get_mut(&m.agreement_name) {
            None => return Ok(Effect::NoOp),
            Some(a) => a.members.remove(&m.member_name).is_some(),
        };
        if !removed {
            return Ok(Effect::NoOp);
        }
        if let Some(member) = self.members.get_mut(&m.member_name) {
            if member.plugin_agreement.as_deref() == Some(m.agreement_name.as_str()) {
                member.plugin_agreement = None;
            }
            // The task-agreement entry stays until remove-agreement.
        }
        Ok(Effect::Changed)
    }

    fn apply_add_plugin(&mut self, m: &PluginMsg) -> Result<Effect, Block> {
        match self.agreements.get_mut(&m.agreement_name) {
            None => Err(Block::Missing),
            Some(a) => {
                if a.plugin_agreement.insert(m.plugin.clone()) {
                    Ok(Effect::Changed)
                } else {
                    Ok(Effect::NoOp)
                }
            }
        }
    }

    fn apply_remove_plugin(&mut self, m: &PluginMsg) -> Result<Effect, Block> {
        match self.agreements.get_mut(&m.agreement_name) {
            None => Err(Block::Missing),
            Some(a) => {
                if a.plugin_agreement.remove(&m.plugin) {
                    Ok(Effect::Changed)
                } else {
                    Err(Block::Missing)
                }
            }
        }
    }

    fn apply_add_task(&mut self, m: &TaskMsg) -> Result<Effect, Block> {
        match self.agreements.get_mut(&m.agreement_name) {
            None => Err(Block::Missing),
            Some(a) => {
                if a.task_agreement.insert(m.task_id.clone()) {
                    Ok(Effect::Changed)
                } else {
                    Ok(Effect::NoOp)
                }
            }
        }
    }

    fn apply_remove_task(&mut self, m: &TaskMsg) -> Result<Effect, Block> {
        match self.agreements.get_mut(&m.agreement_name) {
            None => Err(Block::Missing),
            Some(a) => {
                if a.task_agreement.remove(&m.task_id) {
                    Ok(Effect::Changed)
                } else {
                    Err(Block::Missing)
                }
            }
        }
    }

    // Membership churn from the transport. Not Lamport-stamped: liveness is
    // the transport's truth, not part of the replicated history.

    pub(crate) fn member_joined(&mut self, name: &str) {
        match self.members.get_mut(name) {
            Some(member) => {
                member.status = MemberStatus::Alive;
            }
            None => {
                debug!("member '{}' joined", name);
                self.members.insert(name.to_string(), Member::new(name));
            }
        }
        // A buffered join-agreement naming this member may be waiting.
        self.cascade();
    }

    pub(crate) fn member_left(&mut self, name: &str) {
        if self.members.remove(name).is_none() {
            return;
        }
        debug!("member '{}' left", name);
        for key in self.agreements.keys().cloned().collect::<Vec<_>>() {
            if let Some(a) = self.agreements.get_mut(&key) {
                a.members.remove(name);
            }
        }
    }

    pub(crate) fn member_updated(&mut self, name: &str, status: MemberStatus) {
        if let Some(member) = self.members.get_mut(name) {
            member.status = status;
        }
    }
}

fn is_remove_kind(kind: MsgType) -> bool {
    matches!(
        kind,
        MsgType::RemoveAgreement
            | MsgType::LeaveAgreement
            | MsgType::RemovePlugin
            | MsgType::RemoveTask
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LTime;
    use crate::message::Plugin;
    use uuid::Uuid;

    fn agreement_msg(ltime: u64, uuid: u128, kind: MsgType, agreement: &str, member: &str) -> Msg {
        Msg::Agreement(AgreementMsg {
            ltime: LTime(ltime),
            uuid: Uuid::from_u128(uuid),
            agreement_name: agreement.into(),
            member_name: member.into(),
            msg_type: kind,
        })
    }

    fn plugin_msg(ltime: u64, uuid: u128, kind: MsgType, agreement: &str, plugin: Plugin) -> Msg {
        Msg::Plugin(PluginMsg {
            ltime: LTime(ltime),
            uuid: Uuid::from_u128(uuid),
            agreement_name: agreement.into(),
            plugin,
            msg_type: kind,
        })
    }

    fn task_msg(ltime: u64, uuid: u128, kind: MsgType, agreement: &str, task_id: &str) -> Msg {
        Msg::Task(TaskMsg {
            ltime: LTime(ltime),
            uuid: Uuid::from_u128(uuid),
            agreement_name: agreement.into(),
            task_id: task_id.into(),
            msg_type: kind,
        })
    }

    fn fresh() -> (Store, LamportClock) {
        (Store::new(512), LamportClock::new())
    }

    #[test]
    fn add_task_before_its_agreement_buffers_then_drains() {
        let (mut store, clock) = fresh();
        let add_task = task_msg(5, 1, MsgType::AddTask, "agreement1", "t1");
        assert_eq!(store.ingest(&clock, &add_task), Disposition::Buffered);
        assert_eq!(store.intents.len(), 1);
        assert!(clock.time() >= LTime(5));

        let add = agreement_msg(3, 2, MsgType::AddAgreement, "agreement1", "");
        assert_eq!(store.ingest(&clock, &add), Disposition::Applied);
        assert_eq!(store.intents.len(), 0);
        let a = store.agreements.get("agreement1").unwrap();
        assert!(a.task_agreement.contains("t1"));
    }

    #[test]
    fn cascade_drains_dependent_chains() {
        let (mut store, clock) = fresh();
        store.member_joined("member-0");

        let join = agreement_msg(4, 1, MsgType::JoinAgreement, "agreement1", "member-0");
        let add_plugin = plugin_msg(5, 2, MsgType::AddPlugin, "agreement1", Plugin::new("p1", 1));
        assert_eq!(store.ingest(&clock, &join), Disposition::Buffered);
        assert_eq!(store.ingest(&clock, &add_plugin), Disposition::Buffered);
        assert_eq!(store.intents.len(), 2);

        let add = agreement_msg(3, 3, MsgType::AddAgreement, "agreement1", "");
        assert_eq!(store.ingest(&clock, &add), Disposition::Applied);
        assert_eq!(store.intents.len(), 0);
        let a = store.agreements.get("agreement1").unwrap();
        assert!(a.members.contains("member-0"));
        assert!(a.plugin_agreement.contains(&Plugin::new("p1", 1)));
        let member = store.members.get("member-0").unwrap();
        assert_eq!(member.plugin_agreement.as_deref(), Some("agreement1"));
        assert!(member.task_agreements.contains("agreement1"));
    }

    #[test]
    fn duplicate_uuid_is_dropped_applied_or_buffered() {
        let (mut store, clock) = fresh();
        let add = agreement_msg(2, 1, MsgType::AddAgreement, "agreement1", "");
        assert_eq!(store.ingest(&clock, &add), Disposition::Applied);
        assert_eq!(
            store.ingest(&clock, &add),
            Disposition::Dropped(DropReason::Duplicate)
        );

        // A duplicate of a message sitting in the intent buffer is dropped
        // too, leaving a single intent.
        let task = task_msg(9, 2, MsgType::AddTask, "agreement2", "t1");
        assert_eq!(store.ingest(&clock, &task), Disposition::Buffered);
        assert_eq!(
            store.ingest(&clock, &task),
            Disposition::Dropped(DropReason::Duplicate)
        );
        assert_eq!(store.intents.len(), 1);
    }

    #[test]
    fn duplicate_add_plugin_leaves_plugin_set_unchanged() {
        let (mut store, clock) = fresh();
        let p = Plugin::new("pluginABC", 1);
        store.ingest(
            &clock,
            &agreement_msg(1, 1, MsgType::AddAgreement, "clan1", ""),
        );
        let add = plugin_msg(2, 2, MsgType::AddPlugin, "clan1", p.clone());
        assert_eq!(store.ingest(&clock, &add), Disposition::Applied);
        let before = store.agreements.get("clan1").unwrap().plugin_agreement.len();
        assert_eq!(
            store.ingest(&clock, &add),
            Disposition::Dropped(DropReason::Duplicate)
        );
        let after = store.agreements.get("clan1").unwrap().plugin_agreement.len();
        assert_eq!(before, after);
    }

    #[test]
    fn applied_remove_floors_stale_plugin_messages() {
        let (mut store, clock) = fresh();
        let p = Plugin::new("p1", 1);
        store.ingest(
            &clock,
            &agreement_msg(1, 1, MsgType::AddAgreement, "clan1", ""),
        );
        store.ingest(
            &clock,
            &plugin_msg(2, 2, MsgType::AddPlugin, "clan1", p.clone()),
        );

        let remove_new = plugin_msg(1025, 3, MsgType::RemovePlugin, "clan1", p.clone());
        assert_eq!(store.ingest(&clock, &remove_new), Disposition::Applied);

        let add_old = plugin_msg(513, 4, MsgType::AddPlugin, "clan1", p.clone());
        assert_eq!(
            store.ingest(&clock, &add_old),
            Disposition::Dropped(DropReason::Old)
        );
        let remove_old = plugin_msg(513, 5, MsgType::RemovePlugin, "clan1", p.clone());
        assert_eq!(
            store.ingest(&clock, &remove_old),
            Disposition::Dropped(DropReason::Old)
        );

        assert!(!store.agreements.get("clan1").unwrap().plugin_agreement.contains(&p));
        assert_eq!(store.intents.len(), 0);
    }

    #[test]
    fn out_of_order_remove_buffers_and_annihilates_the_late_add() {
        let (mut store, clock) = fresh();
        let p = Plugin::new("p1", 1);
        store.ingest(
            &clock,
            &agreement_msg(1, 1, MsgType::AddAgreement, "clan1", ""),
        );

        // The remove refers to a plugin this replica has never seen.
        let remove_new = plugin_msg(1025, 2, MsgType::RemovePlugin, "clan1", p.clone());
        assert_eq!(store.ingest(&clock, &remove_new), Disposition::Buffered);
        assert_eq!(store.intents.len(), 1);

        // The matching add arrives late: it applies, and the cascade
        // immediately applies the buffered remove on top of it.
        let add_old = plugin_msg(513, 3, MsgType::AddPlugin, "clan1", p.clone());
        assert_eq!(store.ingest(&clock, &add_old), Disposition::Applied);
        assert!(!store.agreements.get("clan1").unwrap().plugin_agreement.contains(&p));
        assert_eq!(store.intents.len(), 0);

        // Anything still below the floor is stale.
        let remove_old = plugin_msg(513, 4, MsgType::RemovePlugin, "clan1", p.clone());
        assert_eq!(
            store.ingest(&clock, &remove_old),
            Disposition::Dropped(DropReason::Old)
        );
    }

    #[test]
    fn newer_applied_add_sweeps_a_buffered_older_remove() {
        let (mut store, clock) = fresh();
        let p = Plugin::new("p1", 1);
        store.ingest(
            &clock,
            &agreement_msg(1, 1, MsgType::AddAgreement, "clan1", ""),
        );

        let remove = plugin_msg(10, 2, MsgType::RemovePlugin, "clan1", p.clone());
        assert_eq!(store.ingest(&clock, &remove), Disposition::Buffered);

        // An add at a higher instant is the newest truth for this target;
        // the stale buffered remove falls below the floor and is swept.
        let add = plugin_msg(11, 3, MsgType::AddPlugin, "clan1", p.clone());
        assert_eq!(store.ingest(&clock, &add), Disposition::Applied);
        assert!(store.agreements.get("clan1").unwrap().plugin_agreement.contains(&p));
        assert_eq!(store.intents.len(), 0);
    }

    fn convergence_fields(store: &Store) -> (Vec<Member>, Vec<Agreement>, Vec<Msg>) {
        (
            store.members.values().cloned().collect(),
            store.agreements.values().cloned().collect(),
            store.intents.iter().map(|i| i.msg.clone()).collect(),
        )
    }

    #[test]
    fn equal_ltime_contradiction_resolves_by_uuid_in_any_order() {
        let p = Plugin::new("p1", 1);
        // The remove carries the higher UUID, so it must win the tie on
        // every replica regardless of arrival order.
        let add = plugin_msg(7, 1, MsgType::AddPlugin, "clan1", p.clone());
        let remove = plugin_msg(7, 2, MsgType::RemovePlugin, "clan1", p.clone());

        let (mut first, clock_a) = fresh();
        first.ingest(&clock_a, &add);
        first.ingest(&clock_a, &remove);

        let (mut second, clock_b) = fresh();
        second.ingest(&clock_b, &remove);
        second.ingest(&clock_b, &add);

        assert_eq!(convergence_fields(&first), convergence_fields(&second));
        assert_eq!(first.intents.len(), 0);
        let floor = first
            .floor(&TargetKey::Plugin("clan1".into(), p.clone()))
            .unwrap();
        assert_eq!(floor.ltime, LTime(7));
        assert_eq!(floor.uuid, Uuid::from_u128(2));

        // Once the agreement exists the plugin must be absent on both.
        let create = agreement_msg(8, 3, MsgType::AddAgreement, "clan1", "");
        first.ingest(&clock_a, &create);
        second.ingest(&clock_b, &create);
        assert!(!first.agreements.get("clan1").unwrap().plugin_agreement.contains(&p));
        assert_eq!(convergence_fields(&first), convergence_fields(&second));
    }

    #[test]
    fn equal_ltime_tie_can_fall_to_the_add_as_well() {
        let p = Plugin::new("p1", 1);
        let add = plugin_msg(7, 2, MsgType::AddPlugin, "clan1", p.clone());
        let remove = plugin_msg(7, 1, MsgType::RemovePlugin, "clan1", p.clone());

        let (mut first, clock_a) = fresh();
        first.ingest(&clock_a, &add);
        first.ingest(&clock_a, &remove);

        let (mut second, clock_b) = fresh();
        second.ingest(&clock_b, &remove);
        second.ingest(&clock_b, &add);

        assert_eq!(convergence_fields(&first), convergence_fields(&second));
        assert_eq!(first.intents.len(), 1);

        let create = agreement_msg(8, 3, MsgType::AddAgreement, "clan1", "");
        first.ingest(&clock_a, &create);
        second.ingest(&clock_b, &create);
        assert!(first.agreements.get("clan1").unwrap().plugin_agreement.contains(&p));
        assert_eq!(convergence_fields(&first), convergence_fields(&second));
        assert_eq!(first.intents.len(), 0);
    }

    #[test]
    fn join_for_a_member_with_another_plugin_agreement_is_dropped() {
        let (mut store, clock) = fresh();
        store.member_joined("member-0");
        store.ingest(&clock, &agreement_msg(1, 1, MsgType::AddAgreement, "ag1", ""));
        store.ingest(&clock, &agreement_msg(2, 2, MsgType::AddAgreement, "ag2", ""));
        assert_eq!(
            store.ingest(
                &clock,
                &agreement_msg(3, 3, MsgType::JoinAgreement, "ag1", "member-0")
            ),
            Disposition::Applied
        );
        assert_eq!(
            store.ingest(
                &clock,
                &agreement_msg(4, 4, MsgType::JoinAgreement, "ag2", "member-0")
            ),
            Disposition::Dropped(DropReason::Invalid)
        );
        assert!(!store.agreements.get("ag2").unwrap().members.contains("member-0"));
    }

    #[test]
    fn leave_clears_pointer_but_keeps_task_entries() {
        let (mut store, clock) = fresh();
        store.member_joined("member-0");
        store.ingest(&clock, &agreement_msg(1, 1, MsgType::AddAgreement, "ag1", ""));
        store.ingest(&clock, &task_msg(2, 2, MsgType::AddTask, "ag1", "t1"));
        store.ingest(
            &clock,
            &agreement_msg(3, 3, MsgType::JoinAgreement, "ag1", "member-0"),
        );

        assert_eq!(
            store.ingest(
                &clock,
                &agreement_msg(4, 4, MsgType::LeaveAgreement, "ag1", "member-0")
            ),
            Disposition::Applied
        );
        let member = store.members.get("member-0").unwrap();
        assert_eq!(member.plugin_agreement, None);
        assert!(member.task_agreements.contains("ag1"));
        assert!(store.agreements.get("ag1").unwrap().members.is_empty());

        // A stale join below the leave's floor cannot resurrect membership.
        assert_eq!(
            store.ingest(
                &clock,
                &agreement_msg(3, 5, MsgType::JoinAgreement, "ag1", "member-0")
            ),
            Disposition::Dropped(DropReason::Old)
        );

        // The entries die with the agreement itself.
        assert_eq!(
            store.ingest(
                &clock,
                &agreement_msg(5, 6, MsgType::RemoveAgreement, "ag1", "")
            ),
            Disposition::Applied
        );
        assert!(store.members.get("member-0").unwrap().task_agreements.is_empty());
    }

    #[test]
    fn remove_agreement_with_members_is_dropped() {
        let (mut store, clock) = fresh();
        store.member_joined("member-0");
        store.ingest(&clock, &agreement_msg(1, 1, MsgType::AddAgreement, "ag1", ""));
        store.ingest(
            &clock,
            &agreement_msg(2, 2, MsgType::JoinAgreement, "ag1", "member-0"),
        );
        assert_eq!(
            store.ingest(
                &clock,
                &agreement_msg(3, 3, MsgType::RemoveAgreement, "ag1", "")
            ),
            Disposition::Dropped(DropReason::Invalid)
        );
        assert!(store.agreements.contains_key("ag1"));
    }

    #[test]
    fn member_leave_event_clears_participations() {
        let (mut store, clock) = fresh();
        store.member_joined("member-0");
        store.ingest(&clock, &agreement_msg(1, 1, MsgType::AddAgreement, "ag1", ""));
        store.ingest(
            &clock,
            &agreement_msg(2, 2, MsgType::JoinAgreement, "ag1", "member-0"),
        );
        store.member_left("member-0");
        assert!(!store.members.contains_key("member-0"));
        assert!(store.agreements.get("ag1").unwrap().members.is_empty());
    }

    #[test]
    fn member_join_event_unblocks_a_buffered_join() {
        let (mut store, clock) = fresh();
        store.ingest(&clock, &agreement_msg(1, 1, MsgType::AddAgreement, "ag1", ""));
        assert_eq!(
            store.ingest(
                &clock,
                &agreement_msg(2, 2, MsgType::JoinAgreement, "ag1", "member-9")
            ),
            Disposition::Buffered
        );
        store.member_joined("member-9");
        assert_eq!(store.intents.len(), 0);
        assert!(store.agreements.get("ag1").unwrap().members.contains("member-9"));
    }
}
