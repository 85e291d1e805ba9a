//! gRPC service implementation for the payload endpoint.
//!
//! Directive errors travel in the `error` field of [`proto::ControlResponse`];
//! the RPC itself always succeeds.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::channel::Delivery;
use crate::error::{PayloadError, Result};
use crate::payload::Payload;
use crate::proto;
use crate::proto::control_response::Outcome;
use crate::proto::pollux_payload_server::PolluxPayload;
use crate::runtime::PayloadRuntime;

pub struct PolluxPayloadService<P: Payload> {
    runtime: Arc<PayloadRuntime<P>>,
}

impl<P: Payload> PolluxPayloadService<P> {
    pub fn new(runtime: Arc<PayloadRuntime<P>>) -> Self {
        Self { runtime }
    }
}

fn control_response(result: Result<String>) -> proto::ControlResponse {
    let outcome = match result {
        Ok(info) => Outcome::Info(info),
        Err(e) => {
            tracing::warn!("Directive rejected: {}", e);
            Outcome::Error(e.to_string())
        }
    };
    proto::ControlResponse {
        outcome: Some(outcome),
    }
}

#[tonic::async_trait]
impl<P: Payload> PolluxPayload for PolluxPayloadService<P> {
    async fn terminate(
        &self,
        request: Request<proto::PayloadTerminateMessage>,
    ) -> std::result::Result<Response<proto::Ack>, Status> {
        let req = request.into_inner();
        self.runtime.terminate(&req.reason).await;

        Ok(Response::new(proto::Ack {
            info: format!("Payload {} terminating", self.runtime.local_id()),
        }))
    }

    async fn start(
        &self,
        request: Request<proto::PayloadStartMessage>,
    ) -> std::result::Result<Response<proto::ControlResponse>, Status> {
        let req = request.into_inner();
        let result = match req.control {
            Some(control) => self.runtime.start(&control).await,
            None => Err(PayloadError::protocol_violation(
                "Start carries no control directive",
            )),
        };

        Ok(Response::new(control_response(result)))
    }

    async fn iterate(
        &self,
        request: Request<proto::PayloadIterateMessage>,
    ) -> std::result::Result<Response<proto::ControlResponse>, Status> {
        let req = request.into_inner();
        let result = self.runtime.iterate(req.iteration).await;

        Ok(Response::new(control_response(result)))
    }

    async fn transmit(
        &self,
        request: Request<proto::PolluxMessage>,
    ) -> std::result::Result<Response<proto::Ack>, Status> {
        let info = match self.runtime.deliver(request.into_inner()).await {
            Delivery::Queued => "Message received",
            Delivery::Malformed => "Message dropped: malformed value",
            Delivery::Dropped => "Message dropped: payload stopped",
        };

        Ok(Response::new(proto::Ack {
            info: info.to_string(),
        }))
    }
}
