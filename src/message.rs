// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::clock::LTime;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use uuid::Uuid;

/// The closed set of mutation kinds. The wire values are stable integers;
/// do not reorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MsgType {
    AddAgreement,
    RemoveAgreement,
    JoinAgreement,
    LeaveAgreement,
    AddPlugin,
    RemovePlugin,
    AddTask,
    RemoveTask,
}

impl From<MsgType> for u8 {
    fn from(t: MsgType) -> u8 {
        match t {
            MsgType::AddAgreement => 1,
            MsgType::RemoveAgreement => 2,
            MsgType::JoinAgreement => 3,
            MsgType::LeaveAgreement => 4,
            MsgType::AddPlugin => 5,
            MsgType::RemovePlugin => 6,
            MsgType::AddTask => 7,
            MsgType::RemoveTask => 8,
        }
    }
}

impl TryFrom<u8> for MsgType {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(MsgType::AddAgreement),
            2 => Ok(MsgType::RemoveAgreement),
            3 => Ok(MsgType::JoinAgreement),
            4 => Ok(MsgType::LeaveAgreement),
            5 => Ok(MsgType::AddPlugin),
            6 => Ok(MsgType::RemovePlugin),
            7 => Ok(MsgType::AddTask),
            8 => Ok(MsgType::RemoveTask),
            other => Err(format!("unknown message type {}", other)),
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MsgType::AddAgreement => "add-agreement",
            MsgType::RemoveAgreement => "remove-agreement",
            MsgType::JoinAgreement => "join-agreement",
            MsgType::LeaveAgreement => "leave-agreement",
            MsgType::AddPlugin => "add-plugin",
            MsgType::RemovePlugin => "remove-plugin",
            MsgType::AddTask => "add-task",
            MsgType::RemoveTask => "remove-task",
        };
        f.write_str(name)
    }
}

/// A versioned plugin record. Identity is the whole `(name, version)` pair:
/// two versions of one plugin are distinct records.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Plugin {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version")]
    pub version: u32,
}

impl Plugin {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Plugin {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:v{}", self.name, self.version)
    }
}

/// Agreement lifecycle and membership mutations.
/// `member_name` is empty for add/remove-agreement.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgreementMsg {
    #[serde(rename = "LTime")]
    pub ltime: LTime,
    #[serde(rename = "UUID")]
    pub uuid: Uuid,
    #[serde(rename = "AgreementName")]
    pub agreement_name: String,
    #[serde(rename = "MemberName")]
    pub member_name: String,
    #[serde(rename = "Type")]
    pub msg_type: MsgType,
}

/// Plugin-set mutations within one agreement.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginMsg {
    #[serde(rename = "LTime")]
    pub ltime: LTime,
    #[serde(rename = "UUID")]
    pub uuid: Uuid,
    #[serde(rename = "AgreementName")]
    pub agreement_name: String,
    #[serde(rename = "Plugin")]
    pub plugin: Plugin,
    #[serde(rename = "Type")]
    pub msg_type: MsgType,
}

/// Task-set mutations within one agreement.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskMsg {
    #[serde(rename = "LTime")]
    pub ltime: LTime,
    #[serde(rename = "UUID")]
    pub uuid: Uuid,
    #[serde(rename = "AgreementName")]
    pub agreement_name: String,
    #[serde(rename = "TaskID")]
    pub task_id: String,
    #[serde(rename = "Type")]
    pub msg_type: MsgType,
}

/// Every broadcast is one of the three record shapes. Dispatch is on
/// `msg_type`, not on the shape: the shape only determines the payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Msg {
    Agreement(AgreementMsg),
    Plugin(PluginMsg),
    Task(TaskMsg),
}

impl Msg {
    pub fn ltime(&self) -> LTime {
        match self {
            Msg::Agreement(m) => m.ltime,
            Msg::Plugin(m) => m.ltime,
            Msg::Task(m) => m.ltime,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Msg::Agreement(m) => m.uuid,
            Msg::Plugin(m) => m.uuid,
            Msg::Task(m) => m.uuid,
        }
    }

    pub fn msg_type(&self) -> MsgType {
        match self {
            Msg::Agreement(m) => m.msg_type,
            Msg::Plugin(m) => m.msg_type,
            Msg::Task(m) => m.msg_type,
        }
    }

    pub fn agreement_name(&self) -> &str {
        match self {
            Msg::Agreement(m) => &m.agreement_name,
            Msg::Plugin(m) => &m.agreement_name,
            Msg::Task(m) => &m.agreement_name,
        }
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} '{}' at {}",
            self.msg_type(),
            self.agreement_name(),
            self.ltime()
        )
    }
}
