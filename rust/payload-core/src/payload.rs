//! The user-supplied side of a payload.
//!
//! Implement [`Payload`] and hand it to [`crate::host::serve`]. The runtime
//! calls `on_control` once per Start, `on_loop` once per iteration and
//! `on_message` for every peer message, one at a time in arrival order.
//! `on_loop` and `on_message` may run concurrently, so state shared between
//! them needs interior synchronization.
//!
//! # Example
//!
//! ```no_run
//! use payload_core::{LoopContext, Payload, Result};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Payload for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn on_loop(&self, ctx: &LoopContext) -> Result<()> {
//!         ctx.broadcast("iteration", ctx.iteration()).await?;
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::channel::PeerChannel;
use crate::codec::TypedValue;
use crate::control::Control;
use crate::error::Result;
use crate::protocol::{Ack, Message, NodeId, NodeStatus};

#[async_trait]
pub trait Payload: Send + Sync + 'static {
    /// Short name, used in logs and log file names.
    fn name(&self) -> &str;

    /// Called after a Start directive has been applied, before the first
    /// loop body. An error rejects the Start.
    async fn on_control(&self, _control: &Control) -> Result<()> {
        Ok(())
    }

    /// One loop body.
    ///
    /// In synchronized mode this is one bounded unit of work; in
    /// unsynchronized mode it runs until its own stop condition or until
    /// cancelled. An error fails the payload.
    async fn on_loop(&self, ctx: &LoopContext) -> Result<()>;

    /// A message from a peer.
    async fn on_message(&self, message: Message) {
        tracing::info!(
            "Message from {}: {} = {}",
            message.origin,
            message.key,
            message.value
        );
    }
}

/// Everything a loop body can see and do.
pub struct LoopContext {
    channel: PeerChannel,
    iteration: u64,
    cancel: CancellationToken,
}

impl LoopContext {
    pub(crate) fn new(channel: PeerChannel, iteration: u64, cancel: CancellationToken) -> Self {
        Self {
            channel,
            iteration,
            cancel,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.channel.local_id()
    }

    /// Iteration this body is running.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn control(&self) -> &Control {
        self.channel.control()
    }

    pub fn others(&self) -> &[NodeId] {
        self.control().others()
    }

    pub fn is_synchronized(&self) -> bool {
        self.control().is_synchronized()
    }

    pub fn channel(&self) -> &PeerChannel {
        &self.channel
    }

    pub async fn transmit(
        &self,
        destinations: &[NodeId],
        key: &str,
        value: impl Into<TypedValue>,
    ) -> Result<Ack> {
        self.channel.transmit(destinations, key, value).await
    }

    pub async fn transmit_to(
        &self,
        destination: NodeId,
        key: &str,
        value: impl Into<TypedValue>,
    ) -> Result<Ack> {
        self.channel.transmit_to(destination, key, value).await
    }

    pub async fn broadcast(&self, key: &str, value: impl Into<TypedValue>) -> Result<Ack> {
        self.channel.broadcast(key, value).await
    }

    pub async fn report(&self, key: &str, value: &str) -> Result<Ack> {
        self.channel.report(key, value).await
    }

    pub async fn log(&self, key: &str, value: &str) -> Result<Ack> {
        self.channel.log(key, value).await
    }

    pub async fn node_status(&self, node: NodeId) -> NodeStatus {
        self.channel.node_status(node).await
    }

    /// True once Terminate has been received.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once Terminate has been received.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
