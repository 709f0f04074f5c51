// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * The replicated data model: the members map, the agreements map, and the
 * auxiliary intent buffer, plus the two bookkeeping structures convergence
 * rests on — per-target floors and the seen-UUID ring.
 *
 * Members and agreements cross-reference each other *by name only*. A
 * member's plugin-agreement pointer is the name of an agreement; an
 * agreement's member set is a set of member names. Back-references are
 * lookups in the owning map, never owned edges, so the cyclic shape of the
 * domain never turns into a cyclic ownership problem.
 */

use crate::clock::LTime;
use crate::message::{Msg, MsgType, Plugin};
use im::{OrdMap, OrdSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use uuid::Uuid;

/// Liveness as reported by the membership transport. A member that leaves is
/// deleted outright, so `Left` only shows up transiently in update events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    Alive,
    Suspected,
    Left,
}

/// One peer node as this replica sees it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    /// Name of the one agreement whose plugin set this member subscribes to,
    /// if any. Exclusive: joining a second agreement while this is set is an
    /// error at the origin and a drop over the wire.
    pub plugin_agreement: Option<String>,
    /// Names of agreements whose task sets this member participates in.
    /// Non-exclusive, and entries outlive leave-agreement (they are only
    /// dropped when the agreement itself is removed).
    pub task_agreements: OrdSet<String>,
    pub status: MemberStatus,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        Member {
            name: name.into(),
            plugin_agreement: None,
            task_agreements: OrdSet::new(),
            status: MemberStatus::Alive,
        }
    }
}

/// An order-stable plugin set. Order is insertion order; it carries no
/// meaning, but it is deterministic within a process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginSet {
    plugins: Vec<Plugin>,
}

impl PluginSet {
    pub fn position(&self, plugin: &Plugin) -> Option<usize> {
        self.plugins.iter().position(|p| p == plugin)
    }

    pub fn contains(&self, plugin: &Plugin) -> bool {
        self.position(plugin).is_some()
    }

    /// Insert if absent. Returns false on a duplicate.
    pub fn insert(&mut self, plugin: Plugin) -> bool {
        if self.contains(&plugin) {
            return false;
        }
        self.plugins.push(plugin);
        true
    }

    /// Remove if present. Returns false if the record was absent.
    pub fn remove(&mut self, plugin: &Plugin) -> bool {
        match self.position(plugin) {
            Some(idx) => {
                self.plugins.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plugin> {
        self.plugins.iter()
    }
}

/// An order-stable set of task ids, same regime as [`PluginSet`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskSet {
    tasks: Vec<String>,
}

impl TaskSet {
    pub fn position(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t == task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.position(task_id).is_some()
    }

    pub fn insert(&mut self, task_id: impl Into<String>) -> bool {
        let task_id = task_id.into();
        if self.contains(&task_id) {
            return false;
        }
        self.tasks.push(task_id);
        true
    }

    pub fn remove(&mut self, task_id: &str) -> bool {
        match self.position(task_id) {
            Some(idx) => {
                self.tasks.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.tasks.iter()
    }
}

/// A named agreement: the unit of replication. Groups a plugin set, a task
/// set, and the set of members participating in it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Agreement {
    pub name: String,
    pub plugin_agreement: PluginSet,
    pub task_agreement: TaskSet,
    pub members: OrdSet<String>,
}

impl Agreement {
    pub fn new(name: impl Into<String>) -> Self {
        Agreement {
            name: name.into(),
            plugin_agreement: PluginSet::default(),
            task_agreement: TaskSet::default(),
            members: OrdSet::new(),
        }
    }
}

/// Identity of the state a message targets, paired with its kind-family.
/// Add and remove of one record share a key; so do join and leave of one
/// `(agreement, member)` pair. Floors and intent slots are keyed on this.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub(crate) enum TargetKey {
    Agreement(String),
    Membership(String, String),
    Plugin(String, Plugin),
    Task(String, String),
}

impl TargetKey {
    pub(crate) fn of(msg: &Msg) -> TargetKey {
        match msg {
            Msg::Agreement(m) => match m.msg_type {
                MsgType::AddAgreement | MsgType::RemoveAgreement => {
                    TargetKey::Agreement(m.agreement_name.clone())
                }
                _ => TargetKey::Membership(m.agreement_name.clone(), m.member_name.clone()),
            },
            Msg::Plugin(m) => TargetKey::Plugin(m.agreement_name.clone(), m.plugin.clone()),
            Msg::Task(m) => TargetKey::Task(m.agreement_name.clone(), m.task_id.clone()),
        }
    }
}

/// A buffered message whose preconditions are not yet satisfied locally.
/// The buffer holds intents in creation order and the cascade replays them
/// in that order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Intent {
    pub msg: Msg,
}

/// The newest terminal decision recorded for one target. Ordering is
/// lexicographic over `(ltime, uuid)`: the UUID half only ever decides
/// between messages at the same logical instant, where it is the
/// arbitrary-but-deterministic tiebreak every replica shares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub(crate) struct Floor {
    pub ltime: LTime,
    pub uuid: Uuid,
}

impl Floor {
    pub(crate) fn of(msg: &Msg) -> Floor {
        Floor {
            ltime: msg.ltime(),
            uuid: msg.uuid(),
        }
    }

    /// True when `msg` falls at or below this floor.
    pub(crate) fn suppresses(&self, msg: &Msg) -> bool {
        (msg.ltime(), msg.uuid()) <= (self.ltime, self.uuid)
    }
}

/// Bounded ring of recently seen message UUIDs, mirrored in a set for
/// lookup. Duplicate delivery inside the window is dropped at the door.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SeenRing {
    ring: VecDeque<Uuid>,
    set: BTreeSet<Uuid>,
    capacity: usize,
}

impl SeenRing {
    pub(crate) fn new(capacity: usize) -> Self {
        SeenRing {
            ring: VecDeque::with_capacity(capacity),
            set: BTreeSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn contains(&self, uuid: &Uuid) -> bool {
        self.set.contains(uuid)
    }

    pub(crate) fn insert(&mut self, uuid: Uuid) {
        if !self.set.insert(uuid) {
            return;
        }
        self.ring.push_back(uuid);
        while self.ring.len() > self.capacity {
            if let Some(old) = self.ring.pop_front() {
                self.set.remove(&old);
            }
        }
    }
}

/// The whole replica. Everything in here is mutated only under the node's
/// write lock; floors, maps and the intent buffer must move together.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Store {
    pub members: OrdMap<String, Member>,
    pub agreements: OrdMap<String, Agreement>,
    pub intents: Vec<Intent>,
    pub floors: OrdMap<TargetKey, Floor>,
    pub seen: SeenRing,
}

impl Store {
    pub(crate) fn new(seen_capacity: usize) -> Self {
        Store {
            members: OrdMap::new(),
            agreements: OrdMap::new(),
            intents: Vec::new(),
            floors: OrdMap::new(),
            seen: SeenRing::new(seen_capacity),
        }
    }

    pub(crate) fn floor(&self, target: &TargetKey) -> Option<Floor> {
        self.floors.get(target).copied()
    }

    pub(crate) fn raise_floor(&mut self, target: TargetKey, floor: Floor) {
        match self.floors.get(&target) {
            Some(cur) if *cur >= floor => {}
            _ => {
                self.floors.insert(target, floor);
            }
        }
    }

    pub(crate) fn push_intent(&mut self, msg: Msg) {
        self.intents.push(Intent { msg });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_set_is_order_stable_and_deduped() {
        let mut set = PluginSet::default();
        assert!(set.insert(Plugin::new("b", 1)));
        assert!(set.insert(Plugin::new("a", 1)));
        assert!(set.insert(Plugin::new("a", 2)));
        assert!(!set.insert(Plugin::new("a", 1)));
        assert_eq!(set.len(), 3);
        assert_eq!(set.position(&Plugin::new("a", 1)), Some(1));
        assert!(set.remove(&Plugin::new("b", 1)));
        assert!(!set.remove(&Plugin::new("b", 1)));
        assert_eq!(set.position(&Plugin::new("a", 1)), Some(0));
    }

    #[test]
    fn task_set_tracks_ids_by_identity() {
        let mut set = TaskSet::default();
        assert!(set.insert("t1"));
        assert!(set.insert("t2"));
        assert!(!set.insert("t1"));
        assert_eq!(set.len(), 2);
        assert!(set.contains("t2"));
        assert!(set.remove("t1"));
        assert!(!set.contains("t1"));
    }

    #[test]
    fn seen_ring_expires_oldest_uuid() {
        let mut seen = SeenRing::new(2);
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);
        seen.insert(a);
        seen.insert(b);
        assert!(seen.contains(&a));
        seen.insert(c);
        assert!(!seen.contains(&a));
        assert!(seen.contains(&b));
        assert!(seen.contains(&c));
    }

    #[test]
    fn add_and_remove_share_a_target_key() {
        use crate::message::{AgreementMsg, PluginMsg};
        let add = Msg::Plugin(PluginMsg {
            ltime: LTime(1),
            uuid: Uuid::from_u128(1),
            agreement_name: "a1".into(),
            plugin: Plugin::new("p", 1),
            msg_type: MsgType::AddPlugin,
        });
        let remove = Msg::Plugin(PluginMsg {
            ltime: LTime(2),
            uuid: Uuid::from_u128(2),
            agreement_name: "a1".into(),
            plugin: Plugin::new("p", 1),
            msg_type: MsgType::RemovePlugin,
        });
        assert_eq!(TargetKey::of(&add), TargetKey::of(&remove));

        let join = Msg::Agreement(AgreementMsg {
            ltime: LTime(1),
            uuid: Uuid::from_u128(3),
            agreement_name: "a1".into(),
            member_name: "m1".into(),
            msg_type: MsgType::JoinAgreement,
        });
        let create = Msg::Agreement(AgreementMsg {
            ltime: LTime(1),
            uuid: Uuid::from_u128(4),
            agreement_name: "a1".into(),
            member_name: String::new(),
            msg_type: MsgType::AddAgreement,
        });
        assert_ne!(TargetKey::of(&join), TargetKey::of(&create));
    }
}
