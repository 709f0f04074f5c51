// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use std::time::Duration;

/// Node configuration. `name` is the identity the membership layer gossips;
/// `bind_addr`/`bind_port` are handed to the transport; `seed` names an
/// established peer to pull full state from on startup, and is `None` only
/// for the first node of a cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub name: String,
    pub bind_addr: String,
    pub bind_port: u16,
    pub seed: Option<String>,
    /// Deadline for the full-state pull when `seed` is set.
    pub sync_timeout: Duration,
    /// Size of the seen-message UUID window used for duplicate suppression.
    pub seen_msg_capacity: usize,
}

impl Config {
    pub fn new(
        name: impl Into<String>,
        bind_addr: impl Into<String>,
        bind_port: u16,
        seed: Option<String>,
    ) -> Self {
        Config {
            name: name.into(),
            bind_addr: bind_addr.into(),
            bind_port,
            seed,
            sync_timeout: Duration::from_secs(5),
            seen_msg_capacity: 512,
        }
    }
}
