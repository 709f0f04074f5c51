// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * This crate implements the coordination core of a gossip-based cluster:
 * a set of peer nodes converging on shared agreement state — named
 * "agreements", each grouping a plugin set, a task set and a member set —
 * with no leader, no quorum and no synchrony assumptions. It has some
 * properties worth wanting:
 *
 *   - It's small and message-driven. Eight mutation kinds, three wire
 *     record shapes, one decision procedure. Every replica holds the full
 *     state and applies the same rules, so there is nothing to elect and
 *     nothing to fail over.
 *
 *   - It tolerates the network you actually have: messages may arrive
 *     late, repeatedly, out of order, or not at all, and replicas still
 *     converge once gossip quiesces.
 *
 * The price is weak consistency: replicas agree *eventually*, and
 * concurrent semantically-opposed writes at the same logical time are
 * settled by an arbitrary (but deterministic) UUID tiebreak rather than
 * merged.
 *
 * Ordering is Lamport time. Every message carries the logical instant it
 * was issued at; every replica witnesses every timestamp it sees. A
 * message that arrives before the state it depends on — a join for an
 * agreement not yet created, a plugin for the same — parks in the *intent
 * buffer* until its predecessor shows up, then a cascade drains every
 * intent the new state unblocks. Per-target *floors* remember the newest
 * applied instant so stale messages and resurrected tombstones die at the
 * door.
 *
 * Responsibility for liveness detection, membership events, broadcast
 * delivery and the join-time state pull is left to a SWIM-style gossip
 * transport behind the [`Transport`] and [`SyncDelegate`] seams; the
 * in-tree tests wire nodes to an in-process loopback instead.
 *
 * ## Name
 *
 * Wiktionary:
 *
 * > accord: agreement or concurrence of opinion, will, or action
 *
 * The state this crate replicates is literally a set of agreements, so.
 */

mod cfg;
mod clock;
mod engine;
mod error;
mod message;
mod node;
mod state;
mod sync;
mod transport;

pub use cfg::Config;
pub use clock::{LTime, LamportClock};
pub use error::Error;
pub use message::{AgreementMsg, Msg, MsgType, Plugin, PluginMsg, TaskMsg};
pub use node::Node;
pub use state::{Agreement, Member, MemberStatus, PluginSet, TaskSet};
pub use transport::{MemberEvent, SyncDelegate, Transport, TransportError};
