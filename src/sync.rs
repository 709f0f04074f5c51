// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * Full-state sync for joining nodes. The established side exports its whole
 * replica in one atomic read; the joining side replays that snapshot
 * through the intent engine as pseudo-messages reconstructed from each
 * record's floor — the `(LTime, UUID)` of the decision that last touched
 * it. Going through the engine (rather than splicing maps) means floors,
 * duplicate suppression, cascades and the store invariants all hold after
 * a merge exactly as they do after ordinary gossip; reusing the original
 * UUIDs means a replayed record and its still-circulating original
 * broadcast deduplicate against each other.
 */

use crate::clock::LamportClock;
use crate::message::{AgreementMsg, Msg, MsgType, PluginMsg, TaskMsg};
use crate::state::{Agreement, Floor, Member, Store, TargetKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The complete replica of one node at one instant: both maps, the intent
/// buffer, and the floors that anchor every record's provenance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct FullState {
    pub ltime: crate::clock::LTime,
    pub members: Vec<Member>,
    pub agreements: Vec<Agreement>,
    pub floors: Vec<(TargetKey, Floor)>,
    pub intents: Vec<Msg>,
}

impl Store {
    /// Export the replica. Caller holds the read lock.
    pub(crate) fn snapshot(&self, clock: &LamportClock) -> FullState {
        FullState {
            ltime: clock.time(),
            members: self.members.values().cloned().collect(),
            agreements: self.agreements.values().cloned().collect(),
            floors: self
                .floors
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            intents: self.intents.iter().map(|i| i.msg.clone()).collect(),
        }
    }

    /// Absorb a peer's snapshot. Caller holds the write lock.
    pub(crate) fn merge(&mut self, clock: &LamportClock, remote: FullState) {
        clock.witness(remote.ltime);

        let floor_of = |target: &TargetKey| -> Floor {
            remote
                .floors
                .iter()
                .find(|(k, _)| k == target)
                .map(|(_, f)| *f)
                .unwrap_or(Floor {
                    ltime: crate::clock::LTime(0),
                    uuid: Uuid::nil(),
                })
        };

        // A member is usually already known here as a bare stub: the
        // membership transport announces peer names before any state
        // arrives. The remote record's task-agreement entries are unioned
        // in unconditionally — entries left over from join-then-leave
        // cycles exist nowhere else in the snapshot, since the replay
        // below only revisits agreements the member currently belongs to.
        // The rest of a member's participation state is rebuilt by that
        // replay.
        for member in &remote.members {
            match self.members.get_mut(&member.name) {
                Some(local) => {
                    for name in member.task_agreements.iter() {
                        local.task_agreements.insert(name.clone());
                    }
                }
                None => {
                    self.members.insert(member.name.clone(), member.clone());
                }
            }
        }

        // Replay the agreements as pseudo-messages: the agreement itself,
        // then its plugins, tasks and member joins, each stamped with the
        // floor of the decision that created it. Every one lands through
        // `ingest`, so a replica that already knows a newer truth keeps it.
        for agreement in &remote.agreements {
            let name = &agreement.name;
            let floor = floor_of(&TargetKey::Agreement(name.clone()));
            self.ingest(
                clock,
                &Msg::Agreement(AgreementMsg {
                    ltime: floor.ltime,
                    uuid: floor.uuid,
                    agreement_name: name.clone(),
                    member_name: String::new(),
                    msg_type: MsgType::AddAgreement,
                }),
            );
            for plugin in agreement.plugin_agreement.iter() {
                let floor = floor_of(&TargetKey::Plugin(name.clone(), plugin.clone()));
                self.ingest(
                    clock,
                    &Msg::Plugin(PluginMsg {
                        ltime: floor.ltime,
                        uuid: floor.uuid,
                        agreement_name: name.clone(),
                        plugin: plugin.clone(),
                        msg_type: MsgType::AddPlugin,
                    }),
                );
            }
            for task_id in agreement.task_agreement.iter() {
                let floor = floor_of(&TargetKey::Task(name.clone(), task_id.clone()));
                self.ingest(
                    clock,
                    &Msg::Task(TaskMsg {
                        ltime: floor.ltime,
                        uuid: floor.uuid,
                        agreement_name: name.clone(),
                        task_id: task_id.clone(),
                        msg_type: MsgType::AddTask,
                    }),
                );
            }
            for member_name in agreement.members.iter() {
                let floor = floor_of(&TargetKey::Membership(name.clone(), member_name.clone()));
                self.ingest(
                    clock,
                    &Msg::Agreement(AgreementMsg {
                        ltime: floor.ltime,
                        uuid: floor.uuid,
                        agreement_name: name.clone(),
                        member_name: member_name.clone(),
                        msg_type: MsgType::JoinAgreement,
                    }),
                );
            }
        }

        // The peer's unsatisfied intents are ours now too, unless we have
        // already seen them or already know better.
        for msg in &remote.intents {
            self.ingest(clock, msg);
        }

        // Adopt the peer's tombstone knowledge: floors only ever rise.
        for (target, floor) in remote.floors {
            self.raise_floor(target, floor);
        }
        self.cascade();
    }
}
