//! Coordinator link.
//!
//! This module provides the client side of the protocol: the calls a payload
//! makes to the coordinator ("Zebulon"). [`CoordinatorLink`] is the seam the
//! runtime depends on; [`GrpcCoordinatorLink`] is the tonic implementation.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::config::CoordinatorConfig;
use crate::error::{PayloadError, Result};
use crate::proto;
use crate::proto::zebulon_payload_client::ZebulonPayloadClient;
use crate::protocol::{Ack, Message, NodeId, NodeStatus, PROTOCOL_VERSION};

/// Calls a payload makes to the coordinator.
///
/// Every call is a blocking round trip from the caller's point of view; an
/// `Err` is always a `Transport` error.
#[async_trait]
pub trait CoordinatorLink: Send + Sync {
    /// Announce that this payload is serving on `port`.
    async fn payload_ready(&self, port: u16) -> Result<Ack>;

    /// A synchronized iteration finished; more iterations follow.
    async fn loop_ready_for_next_iteration(&self, iteration: u64) -> Result<Ack>;

    /// The last synchronized iteration finished.
    async fn loop_end(&self, iteration: u64) -> Result<Ack>;

    /// Hand a peer message to the coordinator for fan-out.
    async fn transmit(&self, message: &Message) -> Result<Ack>;

    /// Progress report, not delivered to peers.
    async fn report(&self, key: &str, value: &str) -> Result<Ack>;

    /// Diagnostic trace, not delivered to peers.
    async fn log(&self, key: &str, value: &str) -> Result<Ack>;

    /// Ask for the lifecycle status of another payload.
    async fn node_status(&self, node: NodeId) -> Result<NodeStatus>;

    /// The node this link speaks for.
    fn local_id(&self) -> NodeId;
}

/// gRPC-based coordinator link.
pub struct GrpcCoordinatorLink {
    config: CoordinatorConfig,
    local_id: NodeId,
    client: Option<ZebulonPayloadClient<Channel>>,
}

impl GrpcCoordinatorLink {
    /// Create a new, unconnected link.
    pub fn new(config: CoordinatorConfig, local_id: NodeId) -> Self {
        Self {
            config,
            local_id,
            client: None,
        }
    }

    /// Connect to the coordinator service.
    pub async fn connect(&mut self) -> Result<()> {
        let endpoint = Endpoint::from_shared(format!("http://{}", self.config.address))
            .map_err(|e| PayloadError::transport_with_source("connect", e))?
            .connect_timeout(Duration::from_millis(self.config.connect_timeout_ms))
            .timeout(Duration::from_millis(self.config.request_timeout_ms));

        let channel = endpoint.connect().await.map_err(|e| {
            PayloadError::transport_with_source(
                format!("connect to coordinator at {}", self.config.address),
                e,
            )
        })?;

        self.client = Some(ZebulonPayloadClient::new(channel));
        Ok(())
    }

    /// Connect with retry logic.
    pub async fn connect_with_retry(&mut self) -> Result<()> {
        let mut attempts = 0;
        let mut delay = Duration::from_millis(self.config.reconnect_delay_ms);

        loop {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.config.max_reconnect_attempts {
                        return Err(PayloadError::transport(
                            "connect",
                            format!("failed to connect after {} attempts: {}", attempts, e),
                        ));
                    }

                    tracing::warn!(
                        "Coordinator connection attempt {} failed: {}; retrying in {:?}",
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(
                        delay * 2,
                        Duration::from_millis(self.config.request_timeout_ms),
                    );
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn get_client(&self) -> Result<ZebulonPayloadClient<Channel>> {
        self.client
            .clone()
            .ok_or_else(|| PayloadError::transport("call", "not connected to coordinator"))
    }
}

#[async_trait]
impl CoordinatorLink for GrpcCoordinatorLink {
    async fn payload_ready(&self, port: u16) -> Result<Ack> {
        let mut client = self.get_client()?;

        let request = Request::new(proto::PayloadReadyMessage {
            info: format!("I'm alive from: {}", self.local_id),
            port: u32::from(port),
            version: PROTOCOL_VERSION as i32,
            origin: self.local_id.get(),
        });

        let response = client
            .payload_ready(request)
            .await
            .map_err(|e| PayloadError::transport_with_source("PayloadReady", e))?;

        Ok(response.into_inner().into())
    }

    async fn loop_ready_for_next_iteration(&self, iteration: u64) -> Result<Ack> {
        let mut client = self.get_client()?;

        let request = Request::new(proto::PayloadLoopMessage {
            origin: self.local_id.get(),
            iteration,
        });

        let response = client
            .payload_loop_ready_for_next_iteration(request)
            .await
            .map_err(|e| {
                PayloadError::transport_with_source("PayloadLoopReadyForNextIteration", e)
            })?;

        Ok(response.into_inner().into())
    }

    async fn loop_end(&self, iteration: u64) -> Result<Ack> {
        let mut client = self.get_client()?;

        let request = Request::new(proto::PayloadLoopMessage {
            origin: self.local_id.get(),
            iteration,
        });

        let response = client
            .payload_loop_end(request)
            .await
            .map_err(|e| PayloadError::transport_with_source("PayloadLoopEnd", e))?;

        Ok(response.into_inner().into())
    }

    async fn transmit(&self, message: &Message) -> Result<Ack> {
        let mut client = self.get_client()?;

        let request = Request::new(proto::PolluxMessage::try_from(message)?);

        let response = client
            .transmit(request)
            .await
            .map_err(|e| PayloadError::transport_with_source("Transmit", e))?;

        Ok(response.into_inner().into())
    }

    async fn report(&self, key: &str, value: &str) -> Result<Ack> {
        let mut client = self.get_client()?;

        let request = Request::new(proto::PolluxReportMessage {
            origin: self.local_id.get(),
            key: key.to_string(),
            value: value.to_string(),
        });

        let response = client
            .report(request)
            .await
            .map_err(|e| PayloadError::transport_with_source("Report", e))?;

        Ok(response.into_inner().into())
    }

    async fn log(&self, key: &str, value: &str) -> Result<Ack> {
        let mut client = self.get_client()?;

        let request = Request::new(proto::PolluxLogMessage {
            origin: self.local_id.get(),
            key: key.to_string(),
            value: value.to_string(),
        });

        let response = client
            .log(request)
            .await
            .map_err(|e| PayloadError::transport_with_source("Log", e))?;

        Ok(response.into_inner().into())
    }

    async fn node_status(&self, node: NodeId) -> Result<NodeStatus> {
        let mut client = self.get_client()?;

        let request = Request::new(proto::NodeStatusRequest { node_id: node.get() });

        let response = client
            .get_node_status(request)
            .await
            .map_err(|e| PayloadError::transport_with_source("GetNodeStatus", e))?;

        Ok(NodeStatus::from(response.into_inner().status))
    }

    fn local_id(&self) -> NodeId {
        self.local_id
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TypedValue;
    use crate::proto::zebulon_payload_server::{ZebulonPayload, ZebulonPayloadServer};
    use crate::status::query_status;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::transport::Server;
    use tonic::{Response, Status};

    /// Coordinator side of the protocol, recording what it receives.
    #[derive(Default)]
    struct FakeCoordinator {
        ready: Mutex<Vec<proto::PayloadReadyMessage>>,
        loop_ready: Mutex<Vec<proto::PayloadLoopMessage>>,
        loop_end: Mutex<Vec<proto::PayloadLoopMessage>>,
        transmitted: Mutex<Vec<proto::PolluxMessage>>,
        reports: Mutex<Vec<proto::PolluxReportMessage>>,
        logs: Mutex<Vec<proto::PolluxLogMessage>>,
    }

    struct FakeService(Arc<FakeCoordinator>);

    fn accept<T>(
        received: &Mutex<Vec<T>>,
        message: T,
    ) -> std::result::Result<Response<proto::Ack>, Status> {
        received.lock().unwrap().push(message);
        Ok(Response::new(proto::Ack {
            info: "received".to_string(),
        }))
    }

    #[tonic::async_trait]
    impl ZebulonPayload for FakeService {
        async fn payload_ready(
            &self,
            request: Request<proto::PayloadReadyMessage>,
        ) -> std::result::Result<Response<proto::Ack>, Status> {
            accept(&self.0.ready, request.into_inner())
        }

        async fn payload_loop_ready_for_next_iteration(
            &self,
            request: Request<proto::PayloadLoopMessage>,
        ) -> std::result::Result<Response<proto::Ack>, Status> {
            accept(&self.0.loop_ready, request.into_inner())
        }

        async fn payload_loop_end(
            &self,
            request: Request<proto::PayloadLoopMessage>,
        ) -> std::result::Result<Response<proto::Ack>, Status> {
            accept(&self.0.loop_end, request.into_inner())
        }

        async fn transmit(
            &self,
            request: Request<proto::PolluxMessage>,
        ) -> std::result::Result<Response<proto::Ack>, Status> {
            accept(&self.0.transmitted, request.into_inner())
        }

        async fn report(
            &self,
            request: Request<proto::PolluxReportMessage>,
        ) -> std::result::Result<Response<proto::Ack>, Status> {
            accept(&self.0.reports, request.into_inner())
        }

        async fn log(
            &self,
            request: Request<proto::PolluxLogMessage>,
        ) -> std::result::Result<Response<proto::Ack>, Status> {
            accept(&self.0.logs, request.into_inner())
        }

        async fn get_node_status(
            &self,
            _request: Request<proto::NodeStatusRequest>,
        ) -> std::result::Result<Response<proto::NodeStatusResponse>, Status> {
            Err(Status::unavailable("status table not ready"))
        }
    }

    async fn fake_coordinator() -> (Arc<FakeCoordinator>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let coordinator = Arc::new(FakeCoordinator::default());

        let service = ZebulonPayloadServer::new(FakeService(Arc::clone(&coordinator)));
        tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        (coordinator, addr)
    }

    async fn connected_link(addr: SocketAddr, local_id: i32) -> GrpcCoordinatorLink {
        let config = CoordinatorConfig {
            address: addr.to_string(),
            ..Default::default()
        };
        let mut link = GrpcCoordinatorLink::new(config, NodeId(local_id));
        link.connect().await.unwrap();
        assert!(link.is_connected());
        link
    }

    #[test]
    fn test_link_creation() {
        let config = CoordinatorConfig {
            address: "localhost:50000".to_string(),
            ..Default::default()
        };

        let link = GrpcCoordinatorLink::new(config, NodeId(4));
        assert!(!link.is_connected());
        assert_eq!(link.local_id(), NodeId(4));
    }

    #[tokio::test]
    async fn test_calls_fail_when_unconnected() {
        let link = GrpcCoordinatorLink::new(CoordinatorConfig::default(), NodeId(1));
        let err = link.report("key", "value").await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_calls_reach_coordinator_over_grpc() {
        let (coordinator, addr) = fake_coordinator().await;
        let link = connected_link(addr, 7).await;

        let ack = link.payload_ready(1234).await.unwrap();
        assert_eq!(ack.info, "received");
        link.loop_ready_for_next_iteration(3).await.unwrap();
        link.loop_end(4).await.unwrap();
        link.report("messages", "2").await.unwrap();
        link.log("2", "int64").await.unwrap();

        let ready = coordinator.ready.lock().unwrap().clone();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].version, proto::PolluxVersion::Current as i32);
        assert_eq!(ready[0].origin, 7);
        assert_eq!(ready[0].port, 1234);

        let loop_ready = coordinator.loop_ready.lock().unwrap().clone();
        assert_eq!(
            loop_ready,
            vec![proto::PayloadLoopMessage {
                origin: 7,
                iteration: 3
            }]
        );
        let loop_end = coordinator.loop_end.lock().unwrap().clone();
        assert_eq!(
            loop_end,
            vec![proto::PayloadLoopMessage {
                origin: 7,
                iteration: 4
            }]
        );

        let reports = coordinator.reports.lock().unwrap().clone();
        assert_eq!(reports[0].origin, 7);
        assert_eq!((reports[0].key.as_str(), reports[0].value.as_str()), ("messages", "2"));
        let logs = coordinator.logs.lock().unwrap().clone();
        assert_eq!((logs[0].key.as_str(), logs[0].value.as_str()), ("2", "int64"));
    }

    #[tokio::test]
    async fn test_transmit_keeps_destinations() {
        let (coordinator, addr) = fake_coordinator().await;
        let link = connected_link(addr, 7).await;

        let message = Message {
            origin: NodeId(7),
            destinations: vec![NodeId(2), NodeId(3)],
            key: "doublearray".to_string(),
            value: TypedValue::DoubleArray(vec![0.5, 1.5]),
        };
        link.transmit(&message).await.unwrap();

        let transmitted = coordinator.transmitted.lock().unwrap().clone();
        assert_eq!(transmitted.len(), 1);
        assert_eq!(transmitted[0].origin, 7);
        assert_eq!(transmitted[0].destinations, vec![2, 3]);
        assert_eq!(Message::try_from(transmitted[0].clone()).unwrap(), message);
    }

    #[tokio::test]
    async fn test_unavailable_status_is_internal_failure() {
        let (_coordinator, addr) = fake_coordinator().await;
        let link = connected_link(addr, 7).await;

        assert!(link.node_status(NodeId(2)).await.unwrap_err().is_transport());
        assert_eq!(query_status(&link, NodeId(2)).await, NodeStatus::InternalFailure);
    }
}
