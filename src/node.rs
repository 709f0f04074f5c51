// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * The node: one replica of the coordination state plus the eight
 * local-origin commands, the inbound message path, and the sync-delegate
 * hooks. A `Node` is just a value — construct as many as you like in one
 * process, each bound to its own transport.
 *
 * Every command follows the same shape: take the write lock, validate
 * preconditions strictly, stamp a fresh `(LTime, UUID)`, apply locally,
 * release the lock, broadcast. Validation happens before the broadcast so a
 * node never gossips a command it could not satisfy itself; its own
 * commands are never buffered as intents. The broadcast runs outside the
 * lock and is best-effort — nothing about local state depends on whether
 * it went out.
 */

use crate::cfg::Config;
use crate::clock::LamportClock;
use crate::engine::Disposition;
use crate::error::Error;
use crate::message::{AgreementMsg, Msg, MsgType, Plugin, PluginMsg, TaskMsg};
use crate::state::{Agreement, Member, Store};
use crate::sync::FullState;
use crate::transport::{MemberEvent, SyncDelegate, Transport, TransportError};
use im::OrdMap;
use log::{debug, error, warn};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

pub struct Node {
    config: Config,
    clock: LamportClock,
    store: RwLock<Store>,
    transport: Arc<dyn Transport>,
}

impl Node {
    /// Build a node bound to `transport`. Seeds the members map from the
    /// transport's current view, and when `config.seed` names a peer, pulls
    /// that peer's full state within `config.sync_timeout`. On expiry the
    /// pull fails with [`Error::SyncTimeout`] and no state is retained.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Node, Error> {
        if config.name.is_empty() {
            return Err(Error::InvalidConfig("node name must not be empty".into()));
        }
        if config.bind_addr.is_empty() {
            return Err(Error::InvalidConfig("bind address must not be empty".into()));
        }

        let mut store = Store::new(config.seen_msg_capacity);
        store.member_joined(&config.name);
        for name in transport.members() {
            store.member_joined(&name);
        }

        let node = Node {
            config,
            clock: LamportClock::new(),
            store: RwLock::new(store),
            transport,
        };

        if let Some(seed) = node.config.seed.clone() {
            debug!("{}: pulling full state from seed '{}'", node.config.name, seed);
            let buf = node
                .transport
                .pull_state(&seed, node.config.sync_timeout)
                .map_err(|err| match err {
                    TransportError::Timeout => Error::SyncTimeout,
                    other => Error::Transport(other),
                })?;
            node.merge_remote_state(&buf);
        }
        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn read(&self) -> RwLockReadGuard<Store> {
        self.store.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<Store> {
        self.store.write().unwrap_or_else(|err| err.into_inner())
    }

    // ---- observers ----

    pub fn members(&self) -> OrdMap<String, Member> {
        self.read().members.clone()
    }

    pub fn member(&self, name: &str) -> Option<Member> {
        self.read().members.get(name).cloned()
    }

    pub fn agreements(&self) -> OrdMap<String, Agreement> {
        self.read().agreements.clone()
    }

    pub fn agreement(&self, name: &str) -> Option<Agreement> {
        self.read().agreements.get(name).cloned()
    }

    /// Number of buffered intents. Zero on a quiesced, converged replica.
    pub fn intent_count(&self) -> usize {
        self.read().intents.len()
    }

    #[cfg(test)]
    pub(crate) fn clock(&self) -> &LamportClock {
        &self.clock
    }

    // ---- commands ----

    pub fn add_agreement(&self, name: &str) -> Result<(), Error> {
        let msg = {
            let mut store = self.write();
            if store.agreements.contains_key(name) {
                return Err(Error::AgreementAlreadyExists(name.to_string()));
            }
            let msg = Msg::Agreement(AgreementMsg {
                ltime: self.clock.increment(),
                uuid: Uuid::new_v4(),
                agreement_name: name.to_string(),
                member_name: String::new(),
                msg_type: MsgType::AddAgreement,
            });
            store.commit_local(&msg);
            msg
        };
        self.broadcast(msg);
        Ok(())
    }

    pub fn remove_agreement(&self, name: &str) -> Result<(), Error> {
        let msg = {
            let mut store = self.write();
            match store.agreements.get(name) {
                None => return Err(Error::AgreementDoesNotExist(name.to_string())),
                Some(a) if !a.members.is_empty() => {
                    return Err(Error::AgreementNotEmpty(name.to_string()))
                }
                Some(_) => {}
            }
            let msg = Msg::Agreement(AgreementMsg {
                ltime: self.clock.increment(),
                uuid: Uuid::new_v4(),
                agreement_name: name.to_string(),
                member_name: String::new(),
                msg_type: MsgType::RemoveAgreement,
            });
            store.commit_local(&msg);
            msg
        };
        self.broadcast(msg);
        Ok(())
    }

    pub fn join_agreement(&self, agreement: &str, member: &str) -> Result<(), Error> {
        let msg = {
            let mut store = self.write();
            store.can_join_agreement(agreement, member)?;
            let msg = Msg::Agreement(AgreementMsg {
                ltime: self.clock.increment(),
                uuid: Uuid::new_v4(),
                agreement_name: agreement.to_string(),
                member_name: member.to_string(),
                msg_type: MsgType::JoinAgreement,
            });
            store.commit_local(&msg);
            msg
        };
        self.broadcast(msg);
        Ok(())
    }

    pub fn leave_agreement(&self, agreement: &str, member: &str) -> Result<(), Error> {
        let msg = {
            let mut store = self.write();
            match store.agreements.get(agreement) {
                None => return Err(Error::AgreementDoesNotExist(agreement.to_string())),
                Some(a) => {
                    if !store.members.contains_key(member) {
                        return Err(Error::UnknownMember(member.to_string()));
                    }
                    if !a.members.contains(member) {
                        return Err(Error::NotAMember {
                            agreement: agreement.to_string(),
                            member: member.to_string(),
                        });
                    }
                }
            }
            let msg = Msg::Agreement(AgreementMsg {
                ltime: self.clock.increment(),
                uuid: Uuid::new_v4(),
                agreement_name: agreement.to_string(),
                member_name: member.to_string(),
                msg_type: MsgType::LeaveAgreement,
            });
            store.commit_local(&msg);
            msg
        };
        self.broadcast(msg);
        Ok(())
    }

    pub fn add_plugin(&self, agreement: &str, name: &str, version: u32) -> Result<(), Error> {
        let plugin = Plugin::new(name, version);
        let msg = {
            let mut store = self.write();
            match store.agreements.get(agreement) {
                None => return Err(Error::AgreementDoesNotExist(agreement.to_string())),
                Some(a) if a.plugin_agreement.contains(&plugin) => {
                    return Err(Error::PluginAlreadyExists {
                        agreement: agreement.to_string(),
                        plugin: plugin.to_string(),
                    })
                }
                Some(_) => {}
            }
            let msg = Msg::Plugin(PluginMsg {
                ltime: self.clock.increment(),
                uuid: Uuid::new_v4(),
                agreement_name: agreement.to_string(),
                plugin,
                msg_type: MsgType::AddPlugin,
            });
            store.commit_local(&msg);
            msg
        };
        self.broadcast(msg);
        Ok(())
    }

    pub fn remove_plugin(&self, agreement: &str, name: &str, version: u32) -> Result<(), Error> {
        let plugin = Plugin::new(name, version);
        let msg = {
            let mut store = self.write();
            match store.agreements.get(agreement) {
                None => return Err(Error::AgreementDoesNotExist(agreement.to_string())),
                Some(a) if !a.plugin_agreement.contains(&plugin) => {
                    return Err(Error::PluginDoesNotExist {
                        agreement: agreement.to_string(),
                        plugin: plugin.to_string(),
                    })
                }
                Some(_) => {}
            }
            let msg = Msg::Plugin(PluginMsg {
                ltime: self.clock.increment(),
                uuid: Uuid::new_v4(),
                agreement_name: agreement.to_string(),
                plugin,
                msg_type: MsgType::RemovePlugin,
            });
            store.commit_local(&msg);
            msg
        };
        self.broadcast(msg);
        Ok(())
    }

    pub fn add_task(&self, agreement: &str, task_id: &str) -> Result<(), Error> {
        let msg = {
            let mut store = self.write();
            match store.agreements.get(agreement) {
                None => return Err(Error::AgreementDoesNotExist(agreement.to_string())),
                Some(a) if a.task_agreement.contains(task_id) => {
                    return Err(Error::TaskAlreadyExists {
                        agreement: agreement.to_string(),
                        task_id: task_id.to_string(),
                    })
                }
                Some(_) => {}
            }
            let msg = Msg::Task(TaskMsg {
                ltime: self.clock.increment(),
                uuid: Uuid::new_v4(),
                agreement_name: agreement.to_string(),
                task_id: task_id.to_string(),
                msg_type: MsgType::AddTask,
            });
            store.commit_local(&msg);
            msg
        };
        self.broadcast(msg);
        Ok(())
    }

    pub fn remove_task(&self, agreement: &str, task_id: &str) -> Result<(), Error> {
        let msg = {
            let mut store = self.write();
            match store.agreements.get(agreement) {
                None => return Err(Error::AgreementDoesNotExist(agreement.to_string())),
                Some(a) if !a.task_agreement.contains(task_id) => {
                    return Err(Error::TaskDoesNotExist {
                        agreement: agreement.to_string(),
                        task_id: task_id.to_string(),
                    })
                }
                Some(_) => {}
            }
            let msg = Msg::Task(TaskMsg {
                ltime: self.clock.increment(),
                uuid: Uuid::new_v4(),
                agreement_name: agreement.to_string(),
                task_id: task_id.to_string(),
                msg_type: MsgType::RemoveTask,
            });
            store.commit_local(&msg);
            msg
        };
        self.broadcast(msg);
        Ok(())
    }

    // ---- inbound ----

    /// Entry point for broadcast payloads handed up by the transport.
    /// Never errors: undecodable or invalid input is logged and dropped.
    pub fn handle_broadcast(&self, payload: &[u8]) {
        let msg: Msg = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("{}: dropping undecodable broadcast: {}", self.config.name, err);
                return;
            }
        };
        self.handle_msg(&msg);
    }

    pub(crate) fn handle_msg(&self, msg: &Msg) -> Disposition {
        let mut store = self.write();
        store.ingest(&self.clock, msg)
    }

    /// Peer churn notifications from the membership transport.
    pub fn handle_member_event(&self, event: MemberEvent) {
        let mut store = self.write();
        match event {
            MemberEvent::Join(name) => store.member_joined(&name),
            MemberEvent::Leave(name) => store.member_left(&name),
            MemberEvent::Update(name, status) => store.member_updated(&name, status),
        }
    }

    fn broadcast(&self, msg: Msg) {
        match serde_json::to_vec(&msg) {
            Ok(payload) => {
                if let Err(err) = self.transport.broadcast(payload) {
                    warn!("{}: broadcast of {} failed: {}", self.config.name, msg, err);
                }
            }
            Err(err) => {
                error!("{}: could not encode {}: {}", self.config.name, msg, err);
            }
        }
    }
}

impl Store {
    fn can_join_agreement(&self, agreement: &str, member: &str) -> Result<(), Error> {
        if !self.agreements.contains_key(agreement) {
            return Err(Error::AgreementDoesNotExist(agreement.to_string()));
        }
        match self.members.get(member) {
            None => Err(Error::UnknownMember(member.to_string())),
            Some(m) if m.plugin_agreement.is_some() => Err(
                Error::AlreadyMemberOfPluginAgreement(member.to_string()),
            ),
            Some(_) => Ok(()),
        }
    }
}

impl SyncDelegate for Node {
    fn local_state(&self) -> Vec<u8> {
        let snapshot = self.read().snapshot(&self.clock);
        serde_json::to_vec(&snapshot).unwrap_or_else(|err| {
            error!("{}: could not encode local state: {}", self.config.name, err);
            Vec::new()
        })
    }

    fn merge_remote_state(&self, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }
        let remote: FullState = match serde_json::from_slice(buf) {
            Ok(state) => state,
            Err(err) => {
                warn!("{}: dropping undecodable state sync: {}", self.config.name, err);
                return;
            }
        };
        let mut store = self.write();
        store.merge(&self.clock, remote);
    }
}
