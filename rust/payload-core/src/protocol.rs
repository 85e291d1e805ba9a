//! Protocol wrapper types.
//!
//! This module provides Rust-friendly wrapper types around the generated
//! protobuf messages, with conversion traits for ergonomic usage.

use std::fmt;

use crate::codec::{self, TypedValue};
use crate::error::{PayloadError, Result};
use crate::proto;

/// Version announced in every `PayloadReady` call.
pub const PROTOCOL_VERSION: proto::PolluxVersion = proto::PolluxVersion::Current;

/// Identifier of a payload within one computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub i32);

impl NodeId {
    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for NodeId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Lifecycle status of a payload, as answered by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    #[default]
    Unknown,
    Running,
    Done,
    Terminated,
    /// The peer itself reported a failure.
    Failure,
    /// The status query could not be completed. Never sent on the wire.
    InternalFailure,
}

impl From<proto::NodeStatus> for NodeStatus {
    fn from(status: proto::NodeStatus) -> Self {
        match status {
            proto::NodeStatus::Unknown => Self::Unknown,
            proto::NodeStatus::Running => Self::Running,
            proto::NodeStatus::Done => Self::Done,
            proto::NodeStatus::Terminated => Self::Terminated,
            proto::NodeStatus::Failure => Self::Failure,
        }
    }
}

impl From<i32> for NodeStatus {
    fn from(value: i32) -> Self {
        proto::NodeStatus::try_from(value)
            .unwrap_or(proto::NodeStatus::Unknown)
            .into()
    }
}

/// A peer message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub origin: NodeId,
    /// Empty means every other participant.
    pub destinations: Vec<NodeId>,
    pub key: String,
    pub value: TypedValue,
}

impl Message {
    pub fn is_broadcast(&self) -> bool {
        self.destinations.is_empty()
    }
}

impl TryFrom<proto::PolluxMessage> for Message {
    type Error = PayloadError;

    fn try_from(message: proto::PolluxMessage) -> Result<Self> {
        let value = message
            .value
            .ok_or_else(|| PayloadError::malformed("message carries no value"))?;
        Ok(Self {
            origin: NodeId(message.origin),
            destinations: message.destinations.into_iter().map(NodeId).collect(),
            key: message.key,
            value: codec::decode(value)?,
        })
    }
}

impl TryFrom<&Message> for proto::PolluxMessage {
    type Error = PayloadError;

    fn try_from(message: &Message) -> Result<Self> {
        Ok(Self {
            origin: message.origin.get(),
            destinations: message.destinations.iter().map(|d| d.get()).collect(),
            key: message.key.clone(),
            value: Some(codec::encode(&message.value)?),
        })
    }
}

/// Acknowledgment from the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    pub info: String,
}

impl From<proto::Ack> for Ack {
    fn from(ack: proto::Ack) -> Self {
        Self { info: ack.info }
    }
}

/// Outcome of a completed synchronized iteration, sent to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopReport {
    ReadyForNextIteration(u64),
    End(u64),
}

impl LoopReport {
    pub fn iteration(&self) -> u64 {
        match self {
            Self::ReadyForNextIteration(i) | Self::End(i) => *i,
        }
    }
}
