//! Payload host: connect, serve, announce, wait for shutdown.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::channel::escalate;
use crate::config::PayloadConfig;
use crate::error::{PayloadError, Result};
use crate::link::{CoordinatorLink, GrpcCoordinatorLink};
use crate::payload::Payload;
use crate::proto::pollux_payload_server::PolluxPayloadServer;
use crate::protocol::NodeId;
use crate::runtime::{PayloadRuntime, ShutdownReason};
use crate::service::PolluxPayloadService;

/// Run `payload` as node `local_id` until the coordinator terminates it or it
/// fails.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the coordinator cannot
/// be reached, or the endpoint cannot be bound.
pub async fn serve<P: Payload>(
    payload: P,
    config: PayloadConfig,
    local_id: NodeId,
) -> Result<ShutdownReason> {
    config.validate()?;

    let mut link = GrpcCoordinatorLink::new(config.coordinator.clone(), local_id);
    link.connect_with_retry().await?;
    tracing::info!("Connected to coordinator at {}", config.coordinator.address);

    serve_with_link(payload, Arc::new(link), config).await
}

/// Like [`serve`], over an already-established link.
pub async fn serve_with_link<P: Payload>(
    payload: P,
    link: Arc<dyn CoordinatorLink>,
    config: PayloadConfig,
) -> Result<ShutdownReason> {
    let addr = format!("{}:{}", config.server.bind_ip, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| PayloadError::io_with_source(&addr, "failed to bind payload endpoint", e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| PayloadError::io_with_source(&addr, "failed to read bound address", e))?;

    let name = payload.name().to_string();
    let runtime = PayloadRuntime::new(Arc::new(payload), Arc::clone(&link), config.clone());
    let shutdown = runtime.shutdown().clone();

    let service = PolluxPayloadServer::new(PolluxPayloadService::new(Arc::clone(&runtime)));
    let token = shutdown.token();
    let server = tokio::spawn(
        Server::builder()
            .add_service(service)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                token.cancelled().await;
            }),
    );
    tracing::info!("Payload {} ({}) listening on {}", runtime.local_id(), name, local_addr);

    let ready = escalate(
        &config.failure,
        "PayloadReady",
        link.payload_ready(local_addr.port()).await,
    );
    if let Err(e) = ready {
        shutdown.trigger(ShutdownReason::Failure(e.to_string()));
        return Err(e);
    }

    let reason = shutdown.wait().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(PayloadError::transport_with_source("serve", e)),
        Err(e) => {
            return Err(PayloadError::transport(
                "serve",
                format!("server task failed: {}", e),
            ))
        }
    }
    runtime.join_body().await;
    runtime.join_dispatcher().await;

    tracing::info!("Payload {} stopped: {:?}", runtime.local_id(), reason);
    Ok(reason)
}
