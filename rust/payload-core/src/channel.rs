//! Peer message channel.
//!
//! Outbound: [`PeerChannel`] stamps messages with the local origin, expands
//! broadcasts to the other participants and applies the transport failure
//! policy. Inbound: [`Inbox`] queues decoded messages for a single
//! dispatcher task, so the handler sees them one at a time in arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::TypedValue;
use crate::config::{FailureConfig, TransportPolicy};
use crate::control::Control;
use crate::error::{PayloadError, Result};
use crate::link::CoordinatorLink;
use crate::payload::Payload;
use crate::proto;
use crate::protocol::{Ack, Message, NodeId, NodeStatus};
use crate::status;

/// Apply the transport failure policy to an outbound-call result.
///
/// Under [`TransportPolicy::Exit`] a transport error terminates the process;
/// otherwise the result is returned unchanged.
pub fn escalate<T>(failure: &FailureConfig, operation: &str, result: Result<T>) -> Result<T> {
    match result {
        Err(e) if e.is_transport() && failure.transport_policy == TransportPolicy::Exit => {
            tracing::error!("Error while sending \"{}\": {}", operation, e);
            std::process::exit(failure.exit_code);
        }
        other => other,
    }
}

/// Outbound side of the peer protocol, bound to one Control.
#[derive(Clone)]
pub struct PeerChannel {
    link: Arc<dyn CoordinatorLink>,
    control: Arc<Control>,
    failure: FailureConfig,
}

impl PeerChannel {
    pub fn new(
        link: Arc<dyn CoordinatorLink>,
        control: Arc<Control>,
        failure: FailureConfig,
    ) -> Self {
        Self {
            link,
            control,
            failure,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.control.local_id()
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    /// Send `key = value` to `destinations`, or to every other participant
    /// if `destinations` is empty.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if a destination is outside the participant set in
    /// synchronized mode, `MalformedValue` if the value cannot be encoded,
    /// `Transport` under the `Propagate` policy.
    pub async fn transmit(
        &self,
        destinations: &[NodeId],
        key: &str,
        value: impl Into<TypedValue>,
    ) -> Result<Ack> {
        let destinations = self.resolve_destinations(destinations)?;
        let message = Message {
            origin: self.local_id(),
            destinations,
            key: key.to_string(),
            value: value.into(),
        };

        tracing::debug!(
            "Transmitting key={} ({}) to {:?}",
            message.key,
            message.value.kind_name(),
            message.destinations
        );
        let ack = escalate(&self.failure, "transmit", self.link.transmit(&message).await)?;
        tracing::debug!("Transmit::Response: {}", ack.info);
        Ok(ack)
    }

    /// Send to a single peer.
    pub async fn transmit_to(
        &self,
        destination: NodeId,
        key: &str,
        value: impl Into<TypedValue>,
    ) -> Result<Ack> {
        self.transmit(&[destination], key, value).await
    }

    /// Broadcast to every other participant.
    pub async fn broadcast(&self, key: &str, value: impl Into<TypedValue>) -> Result<Ack> {
        self.transmit(&[], key, value).await
    }

    /// Progress report to the coordinator.
    pub async fn report(&self, key: &str, value: &str) -> Result<Ack> {
        escalate(&self.failure, "report", self.link.report(key, value).await)
    }

    /// Diagnostic trace to the coordinator.
    pub async fn log(&self, key: &str, value: &str) -> Result<Ack> {
        escalate(&self.failure, "log", self.link.log(key, value).await)
    }

    /// Status of another payload; see [`status::query_status`].
    pub async fn node_status(&self, node: NodeId) -> NodeStatus {
        status::query_status(self.link.as_ref(), node).await
    }

    fn resolve_destinations(&self, destinations: &[NodeId]) -> Result<Vec<NodeId>> {
        if destinations.is_empty() {
            return Ok(self.control.others().to_vec());
        }
        if self.control.is_synchronized() {
            if let Some(outsider) = destinations
                .iter()
                .find(|d| !self.control.is_participant(**d))
            {
                return Err(PayloadError::protocol_violation(format!(
                    "node {} is not a participant of this computation",
                    outsider
                )));
            }
        }
        Ok(destinations.to_vec())
    }
}

/// Inbound queue feeding the payload's message handler.
///
/// Once `closed` is cancelled new messages are refused and the dispatcher
/// stops after the message it is handling, if any.
#[derive(Clone)]
pub struct Inbox {
    tx: mpsc::Sender<Message>,
    closed: CancellationToken,
}

impl Inbox {
    /// Spawn the dispatcher task for `payload`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<P: Payload>(
        payload: Arc<P>,
        capacity: usize,
        closed: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Message>(capacity);
        let stop = closed.clone();
        let handle = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    message = rx.recv() => message,
                };
                match message {
                    Some(message) => payload.on_message(message).await,
                    None => break,
                }
            }
            tracing::debug!("Inbox dispatcher stopped");
        });
        (Self { tx, closed }, handle)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Decode and enqueue one inbound message.
    ///
    /// Malformed messages are logged and dropped; the result tells the caller
    /// whether the message was accepted.
    pub async fn deliver(&self, wire: proto::PolluxMessage) -> Delivery {
        let origin = wire.origin;
        let key = wire.key.clone();
        if self.is_closed() {
            tracing::warn!("Inbox closed, dropping message from {} (key={})", origin, key);
            return Delivery::Dropped;
        }
        match Message::try_from(wire) {
            Ok(message) => {
                tracing::debug!("Message received: origin={} key={}", origin, key);
                if self.tx.send(message).await.is_err() {
                    tracing::warn!("Inbox closed, dropping message from {} (key={})", origin, key);
                    return Delivery::Dropped;
                }
                Delivery::Queued
            }
            Err(e) => {
                tracing::warn!("Dropping message from {} (key={}): {}", origin, key, e);
                Delivery::Malformed
            }
        }
    }
}

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Malformed,
    Dropped,
}
