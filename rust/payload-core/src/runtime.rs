//! Payload runtime.
//!
//! [`PayloadRuntime`] ties together the lifecycle state machine, the
//! coordinator link and the user [`Payload`]. It applies Start/Iterate/
//! Terminate directives, supervises the loop body task and sends the loop
//! status reports.

use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{escalate, Delivery, Inbox, PeerChannel};
use crate::config::PayloadConfig;
use crate::control::Control;
use crate::error::{PayloadError, Result};
use crate::lifecycle::{Completion, Lifecycle, LifecycleState};
use crate::link::CoordinatorLink;
use crate::payload::{LoopContext, Payload};
use crate::proto;
use crate::protocol::{LoopReport, NodeId};

/// Why the payload stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The coordinator sent Terminate.
    Terminated,
    /// The payload failed; the message is what was reported.
    Failure(String),
}

/// One-shot shutdown signal. The first reason wins.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the signal. Returns false if it was already resolved.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().cloned()
    }

    /// Token cancelled when the signal resolves.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn wait(&self) -> ShutdownReason {
        self.token.cancelled().await;
        self.reason().unwrap_or(ShutdownReason::Terminated)
    }
}

struct Inner {
    lifecycle: Lifecycle,
    control: Option<Arc<Control>>,
    body: Option<JoinHandle<()>>,
}

pub struct PayloadRuntime<P: Payload> {
    payload: Arc<P>,
    link: Arc<dyn CoordinatorLink>,
    config: PayloadConfig,
    local_id: NodeId,
    inner: Mutex<Inner>,
    inbox: Inbox,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: Shutdown,
}

impl<P: Payload> PayloadRuntime<P> {
    /// Create the runtime and spawn its inbound dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        payload: Arc<P>,
        link: Arc<dyn CoordinatorLink>,
        config: PayloadConfig,
    ) -> Arc<Self> {
        let shutdown = Shutdown::new();
        let (inbox, dispatcher) = Inbox::spawn(
            Arc::clone(&payload),
            config.lifecycle.inbox_capacity,
            shutdown.token(),
        );
        let local_id = link.local_id();
        Arc::new(Self {
            payload,
            link,
            local_id,
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::new(&config.lifecycle),
                control: None,
                body: None,
            }),
            config,
            inbox,
            dispatcher: Mutex::new(Some(dispatcher)),
            shutdown,
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.lock().await.lifecycle.state()
    }

    pub async fn iteration(&self) -> u64 {
        self.inner.lock().await.lifecycle.iteration()
    }

    pub async fn control(&self) -> Option<Arc<Control>> {
        self.inner.lock().await.control.clone()
    }

    /// Apply a Start directive and launch the first loop body.
    ///
    /// Returns once the body is launched, not when it finishes.
    pub async fn start(self: &Arc<Self>, directive: &proto::PolluxControl) -> Result<String> {
        let previous = self.inner.lock().await.lifecycle.begin_start()?;

        // Unlocked while on_control runs so Terminate stays deliverable.
        let prepared = self.prepare(directive).await;

        let mut inner = self.inner.lock().await;
        let (control, cap) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                inner.lifecycle.abort_start(previous);
                return Err(e);
            }
        };
        let iteration = inner.lifecycle.start(control.is_synchronized(), cap)?;
        tracing::info!(
            "Payload {} started: participants={:?} synchronized={} cap={}",
            self.local_id,
            control.participants(),
            control.is_synchronized(),
            cap
        );
        inner.control = Some(Arc::clone(&control));
        self.launch(&mut inner, control, iteration);

        Ok(format!("Payload {} started", self.local_id))
    }

    async fn prepare(&self, directive: &proto::PolluxControl) -> Result<(Arc<Control>, u64)> {
        let control = Arc::new(Control::apply(self.local_id, directive)?);
        let lifecycle_config = &self.config.lifecycle;
        let cap = control.count_or(
            &lifecycle_config.max_iterations_option,
            lifecycle_config.max_iterations,
        )?;

        let cancel = self.shutdown.token();
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PayloadError::protocol_violation(
                    "terminated while applying Start",
                ));
            }
            result = self.payload.on_control(&control) => result?,
        }
        Ok((control, cap))
    }

    /// Resume after a barrier. Control is not reapplied.
    pub async fn iterate(self: &Arc<Self>, requested: u64) -> Result<String> {
        let mut inner = self.inner.lock().await;
        let control = inner
            .control
            .clone()
            .ok_or_else(|| PayloadError::protocol_violation("Iterate received before Start"))?;
        let iteration = inner.lifecycle.iterate()?;
        if requested != iteration {
            tracing::warn!(
                "Iterate asked for iteration {}, running {}",
                requested,
                iteration
            );
        }
        tracing::info!("Payload {} iteration {}", self.local_id, iteration);
        self.launch(&mut inner, control, iteration);

        Ok(format!("Payload {} iterating", self.local_id))
    }

    /// Terminate the payload. Valid in every state.
    pub async fn terminate(&self, reason: &str) {
        let previous = self.inner.lock().await.lifecycle.terminate();
        tracing::info!(
            "Payload {} terminated (was {}): {}",
            self.local_id,
            previous,
            reason
        );
        self.shutdown.trigger(ShutdownReason::Terminated);
    }

    /// Hand an inbound peer message to the dispatcher.
    pub async fn deliver(&self, message: proto::PolluxMessage) -> Delivery {
        self.inbox.deliver(message).await
    }

    /// Wait for the current loop body, if any, to finish or be dropped.
    pub async fn join_body(&self) {
        let body = self.inner.lock().await.body.take();
        if let Some(handle) = body {
            if let Err(e) = handle.await {
                tracing::warn!("Loop body task ended abnormally: {}", e);
            }
        }
    }

    /// Wait for the inbound dispatcher to stop. It stops once the shutdown
    /// signal resolves.
    pub async fn join_dispatcher(&self) {
        let dispatcher = self.dispatcher.lock().await.take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                tracing::warn!("Inbox dispatcher ended abnormally: {}", e);
            }
        }
    }

    fn launch(self: &Arc<Self>, inner: &mut Inner, control: Arc<Control>, iteration: u64) {
        let cancel = self.shutdown.token().child_token();
        let channel = PeerChannel::new(
            Arc::clone(&self.link),
            control,
            self.config.failure.clone(),
        );
        let ctx = LoopContext::new(channel, iteration, cancel.clone());

        let runtime = Arc::clone(self);
        inner.body = Some(tokio::spawn(async move {
            runtime.run_body(ctx, cancel).await;
        }));
    }

    async fn run_body(&self, ctx: LoopContext, cancel: CancellationToken) {
        let iteration = ctx.iteration();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.payload.on_loop(&ctx) => Some(result),
        };

        match outcome {
            None => tracing::debug!("Loop body {} cancelled", iteration),
            Some(Ok(())) => self.complete().await,
            Some(Err(e)) => self.fail(e).await,
        }
    }

    async fn complete(&self) {
        let completion = self.inner.lock().await.lifecycle.finish_body();

        let sent = match completion {
            Completion::Report(LoopReport::ReadyForNextIteration(i)) => {
                tracing::info!("Loop {} ready for next iteration", i);
                self.link.loop_ready_for_next_iteration(i).await
            }
            Completion::Report(LoopReport::End(i)) => {
                tracing::info!("Loop ended at iteration {}", i);
                self.link.loop_end(i).await
            }
            Completion::Finished => {
                tracing::info!("Free-running loop finished");
                return;
            }
            Completion::Stale => return,
        };

        if let Err(e) = escalate(&self.config.failure, "loop status", sent) {
            self.fail(e).await;
        }
    }

    async fn fail(&self, error: PayloadError) {
        if !self.inner.lock().await.lifecycle.fail() {
            return;
        }
        let reason = error.to_string();
        tracing::error!("Payload {} failed: {}", self.local_id, reason);

        let reported = self.link.report("payload_failure", &reason).await;
        if let Err(e) = escalate(&self.config.failure, "report", reported) {
            tracing::error!("Could not report failure: {}", e);
        }
        self.shutdown.trigger(ShutdownReason::Failure(reason));
    }
}
