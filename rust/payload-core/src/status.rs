//! Peer status query.

use crate::link::CoordinatorLink;
use crate::protocol::{NodeId, NodeStatus};

/// Ask the coordinator for the lifecycle status of `node`.
///
/// One round trip, no retry. A failed query yields
/// [`NodeStatus::InternalFailure`] instead of an error so the caller can keep
/// going; it is never escalated to a process exit.
pub async fn query_status(link: &dyn CoordinatorLink, node: NodeId) -> NodeStatus {
    match link.node_status(node).await {
        Ok(status) => {
            tracing::debug!("Status of node {}: {:?}", node, status);
            status
        }
        Err(e) => {
            tracing::error!("Status query for node {} failed: {}", node, e);
            NodeStatus::InternalFailure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::{LinkCall, RecordingLink};

    #[tokio::test]
    async fn test_status_passthrough() {
        let link = RecordingLink::new(1);
        link.set_status(NodeId(2), NodeStatus::Failure);
        link.set_status(NodeId(3), NodeStatus::Running);

        assert_eq!(query_status(&link, NodeId(2)).await, NodeStatus::Failure);
        assert_eq!(query_status(&link, NodeId(3)).await, NodeStatus::Running);
        assert_eq!(query_status(&link, NodeId(4)).await, NodeStatus::Unknown);
        assert_eq!(link.calls()[0], LinkCall::NodeStatus(NodeId(2)));
    }

    #[tokio::test]
    async fn test_transport_failure_is_internal_failure() {
        let link = RecordingLink::new(1);
        link.set_status(NodeId(2), NodeStatus::Done);
        link.set_failing(true);

        assert_eq!(
            query_status(&link, NodeId(2)).await,
            NodeStatus::InternalFailure
        );
    }
}
