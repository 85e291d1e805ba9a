// rust/payload-core/src/lib.rs

//! Pollux Payload Runtime - Core Library
//!
//! This crate hosts a worker ("payload") that takes part in a
//! coordinator-driven distributed computation: it serves the directive
//! endpoint the coordinator calls (Start, Iterate, Terminate, Transmit),
//! runs the user's loop body under the lifecycle state machine and exchanges
//! typed values with its peers through the coordinator.

pub mod proto {
    tonic::include_proto!("pollux");
}

pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use config::PayloadConfig;
pub use error::{PayloadError, Result};

pub mod codec;
pub mod protocol;
pub use codec::TypedValue;
pub use protocol::{Ack, LoopReport, Message, NodeId, NodeStatus, PROTOCOL_VERSION};

pub mod control;
pub use control::{Control, UserOption, UserOptions};

pub mod channel;
pub mod link;
pub mod status;
pub use channel::PeerChannel;
pub use link::{CoordinatorLink, GrpcCoordinatorLink};
pub use status::query_status;

pub mod lifecycle;
pub mod payload;
pub mod runtime;
pub use lifecycle::LifecycleState;
pub use payload::{LoopContext, Payload};
pub use runtime::{PayloadRuntime, Shutdown, ShutdownReason};

pub mod host;
pub mod service;
pub use host::serve;
