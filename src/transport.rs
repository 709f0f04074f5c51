// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::state::MemberStatus;
use std::time::Duration;
use thiserror::Error;

/// What the coordination core requires from the SWIM-style gossip layer
/// underneath it. The transport owns liveness detection and delivery; the
/// core only consumes these five capabilities. Delivery may duplicate,
/// reorder, or drop messages — the intent engine is built for all three.
pub trait Transport: Send + Sync {
    /// Name of the local node as the membership layer knows it.
    fn local_name(&self) -> String;

    /// Snapshot of currently known member names, the local node included.
    fn members(&self) -> Vec<String>;

    /// Best-effort broadcast of an opaque payload to every peer. Completion
    /// means "handed to the transport", nothing stronger.
    fn broadcast(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Pull a full-state snapshot from `seed` (the sync-delegate payload of
    /// an established peer), waiting at most `deadline`.
    fn pull_state(&self, seed: &str, deadline: Duration) -> Result<Vec<u8>, TransportError>;
}

/// Async notifications the transport delivers about peer churn. Fed into
/// [`crate::Node::handle_member_event`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberEvent {
    Join(String),
    Leave(String),
    Update(String, MemberStatus),
}

/// The sync-delegate seam: the hooks the membership layer calls to push and
/// pull full local state around a join. [`crate::Node`] implements this.
pub trait SyncDelegate {
    /// Serialize the complete local replica, taken atomically.
    fn local_state(&self) -> Vec<u8>;

    /// Absorb a peer's full state into the local replica.
    fn merge_remote_state(&self, buf: &[u8]);
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport deadline expired")]
    Timeout,
    #[error("no route to peer '{0}'")]
    NoSuchPeer(String),
    #[error("transport is shut down")]
    Closed,
}
