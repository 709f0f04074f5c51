// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::transport::TransportError;
use thiserror::Error;

/// Everything a command can hand back. Commands return these as values and
/// never abort the process; message ingestion never surfaces them at all —
/// invalid remote input is logged and dropped.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("agreement '{0}' does not exist")]
    AgreementDoesNotExist(String),
    #[error("agreement '{0}' already exists")]
    AgreementAlreadyExists(String),
    #[error("task '{task_id}' already exists in agreement '{agreement}'")]
    TaskAlreadyExists { agreement: String, task_id: String },
    #[error("task '{task_id}' does not exist in agreement '{agreement}'")]
    TaskDoesNotExist { agreement: String, task_id: String },
    #[error("plugin '{plugin}' already exists in agreement '{agreement}'")]
    PluginAlreadyExists { agreement: String, plugin: String },
    #[error("plugin '{plugin}' does not exist in agreement '{agreement}'")]
    PluginDoesNotExist { agreement: String, plugin: String },
    #[error("unknown member '{0}'")]
    UnknownMember(String),
    #[error("member '{member}' is not a member of agreement '{agreement}'")]
    NotAMember { agreement: String, member: String },
    #[error("member '{0}' is already a member of a plugin agreement")]
    AlreadyMemberOfPluginAgreement(String),
    #[error("agreement '{0}' still has members")]
    AgreementNotEmpty(String),
    #[error("full-state sync did not complete within the deadline")]
    SyncTimeout,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
