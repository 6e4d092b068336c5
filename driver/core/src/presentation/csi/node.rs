// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! CSI Node Service
//!
//! Validates CSI requests, converts them to lifecycle requests and maps
//! [`NodeError`](crate::application::node_service::NodeError) back onto
//! gRPC status codes. Every call is logged with its outcome.
//!
//! # Architecture
//!
//! - **Layer:** Presentation Layer
//! - **Purpose:** Implements the CSI Node gRPC service

use super::proto::node_server::{Node, NodeServer as NodeGrpcServer};
use super::proto::node_service_capability::{rpc, Rpc};
use super::proto::volume_capability::{access_mode, AccessType};
use super::proto::{
    node_service_capability, NodeExpandVolumeRequest, NodeExpandVolumeResponse,
    NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse, NodeGetInfoRequest,
    NodeGetInfoResponse, NodePublishVolumeRequest, NodePublishVolumeResponse,
    NodeServiceCapability, NodeStageVolumeRequest, NodeStageVolumeResponse,
    NodeUnpublishVolumeRequest, NodeUnpublishVolumeResponse, NodeUnstageVolumeRequest,
    NodeUnstageVolumeResponse, VolumeCapability,
};
use crate::application::node_service::VolumeLifecycle;
use crate::domain::volume::{
    AccessMode, ExpandRequest, PublishRequest, StageRequest, UnpublishRequest, UnstageRequest,
};
use std::path::PathBuf;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, error};

pub struct NodeServer {
    node_id: String,
    lifecycle: Arc<dyn VolumeLifecycle>,
}

impl NodeServer {
    pub fn new(node_id: impl Into<String>, lifecycle: Arc<dyn VolumeLifecycle>) -> Self {
        Self {
            node_id: node_id.into(),
            lifecycle,
        }
    }

    pub fn into_server(self) -> NodeGrpcServer<Self> {
        NodeGrpcServer::new(self)
    }
}

/// Extract the access mode of a mount capability.
///
/// Block volumes are not supported by a filesystem driver.
fn mount_access_mode(capability: Option<&VolumeCapability>) -> Result<AccessMode, Status> {
    let capability =
        capability.ok_or_else(|| Status::invalid_argument("Volume capability missing in request"))?;
    if matches!(capability.access_type, Some(AccessType::Block(_))) {
        return Err(Status::invalid_argument("Block access type is not supported"));
    }

    let mode = capability
        .access_mode
        .as_ref()
        .map(|m| access_mode::Mode::try_from(m.mode).unwrap_or(access_mode::Mode::Unknown))
        .unwrap_or(access_mode::Mode::Unknown);

    Ok(match mode {
        access_mode::Mode::Unknown => AccessMode::Unknown,
        access_mode::Mode::SingleNodeWriter => AccessMode::SingleNodeWriter,
        access_mode::Mode::SingleNodeReaderOnly => AccessMode::SingleNodeReaderOnly,
        access_mode::Mode::MultiNodeReaderOnly => AccessMode::MultiNodeReaderOnly,
        access_mode::Mode::MultiNodeSingleWriter => AccessMode::MultiNodeSingleWriter,
        access_mode::Mode::MultiNodeMultiWriter => AccessMode::MultiNodeMultiWriter,
        access_mode::Mode::SingleNodeSingleWriter => AccessMode::SingleNodeSingleWriter,
        access_mode::Mode::SingleNodeMultiWriter => AccessMode::SingleNodeMultiWriter,
    })
}

fn logged<T>(operation: &str, volume_id: &str, result: Result<T, Status>) -> Result<T, Status> {
    if let Err(status) = &result {
        error!(
            "{} of volume {} failed: {} ({:?})",
            operation,
            volume_id,
            status.message(),
            status.code()
        );
    }
    result
}

fn capability(kind: rpc::Type) -> NodeServiceCapability {
    NodeServiceCapability {
        r#type: Some(node_service_capability::Type::Rpc(Rpc { r#type: kind as i32 })),
    }
}

#[tonic::async_trait]
impl Node for NodeServer {
    async fn node_stage_volume(
        &self,
        request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let access_mode = mount_access_mode(req.volume_capability.as_ref())?;
            let stage = StageRequest {
                volume_id: req.volume_id.clone(),
                staging_path: PathBuf::from(&req.staging_target_path),
                volume_context: req.volume_context.clone(),
                readonly: false,
                access_mode,
            };
            self.lifecycle.stage(stage).await?;
            Ok::<_, Status>(Response::new(NodeStageVolumeResponse {}))
        }
        .await;
        logged("Stage", &req.volume_id, result)
    }

    async fn node_unstage_volume(
        &self,
        request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let unstage = UnstageRequest {
                volume_id: req.volume_id.clone(),
                staging_path: PathBuf::from(&req.staging_target_path),
            };
            self.lifecycle.unstage(unstage).await?;
            Ok::<_, Status>(Response::new(NodeUnstageVolumeResponse {}))
        }
        .await;
        logged("Unstage", &req.volume_id, result)
    }

    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let access_mode = mount_access_mode(req.volume_capability.as_ref())?;
            let publish = PublishRequest {
                volume_id: req.volume_id.clone(),
                staging_path: PathBuf::from(&req.staging_target_path),
                target_path: PathBuf::from(&req.target_path),
                volume_context: req.volume_context.clone(),
                readonly: req.readonly,
                access_mode,
            };
            self.lifecycle.publish(publish).await?;
            Ok::<_, Status>(Response::new(NodePublishVolumeResponse {}))
        }
        .await;
        logged("Publish", &req.volume_id, result)
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let unpublish = UnpublishRequest {
                volume_id: req.volume_id.clone(),
                target_path: PathBuf::from(&req.target_path),
            };
            self.lifecycle.unpublish(unpublish).await?;
            Ok::<_, Status>(Response::new(NodeUnpublishVolumeResponse {}))
        }
        .await;
        logged("Unpublish", &req.volume_id, result)
    }

    async fn node_expand_volume(
        &self,
        request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let range = req
                .capacity_range
                .as_ref()
                .ok_or_else(|| Status::invalid_argument("Capacity range missing in request"))?;
            let expand = ExpandRequest {
                volume_id: req.volume_id.clone(),
                volume_path: PathBuf::from(&req.volume_path),
                capacity_bytes: range.required_bytes,
            };
            let capacity_bytes = self.lifecycle.expand(expand).await?;
            Ok::<_, Status>(Response::new(NodeExpandVolumeResponse { capacity_bytes }))
        }
        .await;
        logged("Expand", &req.volume_id, result)
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        debug!("Node get capabilities");
        Ok(Response::new(NodeGetCapabilitiesResponse {
            capabilities: vec![
                capability(rpc::Type::StageUnstageVolume),
                capability(rpc::Type::ExpandVolume),
            ],
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        debug!("Node get info, node id: {}", self.node_id);
        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: 0,
            accessible_topology: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::node_service::NodeError;
    use crate::presentation::csi::proto::volume_capability::{AccessMode as ProtoAccessMode, BlockVolume, MountVolume};
    use crate::presentation::csi::proto::CapacityRange;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingLifecycle {
        staged: Mutex<Vec<StageRequest>>,
        published: Mutex<Vec<PublishRequest>>,
        expanded: Mutex<Vec<ExpandRequest>>,
    }

    #[async_trait]
    impl VolumeLifecycle for RecordingLifecycle {
        async fn stage(&self, request: StageRequest) -> Result<(), NodeError> {
            if request.volume_id.is_empty() {
                return Err(NodeError::InvalidArgument("Volume ID missing in request".to_string()));
            }
            self.staged.lock().push(request);
            Ok(())
        }

        async fn publish(&self, request: PublishRequest) -> Result<(), NodeError> {
            self.published.lock().push(request);
            Ok(())
        }

        async fn unpublish(&self, _request: UnpublishRequest) -> Result<(), NodeError> {
            Err(NodeError::Internal("target is busy".to_string()))
        }

        async fn unstage(&self, _request: UnstageRequest) -> Result<(), NodeError> {
            Ok(())
        }

        async fn expand(&self, request: ExpandRequest) -> Result<i64, NodeError> {
            let bytes = request.capacity_bytes;
            self.expanded.lock().push(request);
            Ok(bytes)
        }
    }

    fn mount_capability(mode: access_mode::Mode) -> Option<VolumeCapability> {
        Some(VolumeCapability {
            access_type: Some(AccessType::Mount(MountVolume::default())),
            access_mode: Some(ProtoAccessMode { mode: mode as i32 }),
        })
    }

    fn server() -> (NodeServer, Arc<RecordingLifecycle>) {
        let lifecycle = Arc::new(RecordingLifecycle::default());
        (NodeServer::new("node-a", lifecycle.clone()), lifecycle)
    }

    #[tokio::test]
    async fn test_stage_converts_request() {
        let (node, lifecycle) = server();
        let request = NodeStageVolumeRequest {
            volume_id: "vol-1".to_string(),
            staging_target_path: "/staging/vol-1".to_string(),
            volume_capability: mount_capability(access_mode::Mode::MultiNodeReaderOnly),
            volume_context: HashMap::from([("collection".to_string(), "c1".to_string())]),
            ..Default::default()
        };
        node.node_stage_volume(Request::new(request)).await.unwrap();

        let staged = lifecycle.staged.lock();
        assert_eq!(staged[0].staging_path, PathBuf::from("/staging/vol-1"));
        assert_eq!(staged[0].access_mode, AccessMode::MultiNodeReaderOnly);
        assert!(staged[0].read_only());
        assert_eq!(staged[0].volume_context["collection"], "c1");
    }

    #[tokio::test]
    async fn test_missing_capability_is_invalid() {
        let (node, lifecycle) = server();
        let request = NodeStageVolumeRequest {
            volume_id: "vol-1".to_string(),
            staging_target_path: "/staging/vol-1".to_string(),
            ..Default::default()
        };
        let status = node.node_stage_volume(Request::new(request)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(lifecycle.staged.lock().is_empty());
    }

    #[tokio::test]
    async fn test_block_access_is_rejected() {
        let (node, _) = server();
        let request = NodePublishVolumeRequest {
            volume_id: "vol-1".to_string(),
            staging_target_path: "/staging/vol-1".to_string(),
            target_path: "/pods/a".to_string(),
            volume_capability: Some(VolumeCapability {
                access_type: Some(AccessType::Block(BlockVolume {})),
                access_mode: None,
            }),
            ..Default::default()
        };
        let status = node.node_publish_volume(Request::new(request)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_publish_passes_readonly_flag() {
        let (node, lifecycle) = server();
        let request = NodePublishVolumeRequest {
            volume_id: "vol-1".to_string(),
            staging_target_path: "/staging/vol-1".to_string(),
            target_path: "/pods/a".to_string(),
            volume_capability: mount_capability(access_mode::Mode::SingleNodeWriter),
            readonly: true,
            ..Default::default()
        };
        node.node_publish_volume(Request::new(request)).await.unwrap();
        assert!(lifecycle.published.lock()[0].read_only());
    }

    #[tokio::test]
    async fn test_lifecycle_errors_map_to_status_codes() {
        let (node, _) = server();
        let status = node
            .node_unpublish_volume(Request::new(NodeUnpublishVolumeRequest {
                volume_id: "vol-1".to_string(),
                target_path: "/pods/a".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert_eq!(status.message(), "target is busy");

        let request = NodeStageVolumeRequest {
            staging_target_path: "/staging/x".to_string(),
            volume_capability: mount_capability(access_mode::Mode::SingleNodeWriter),
            ..Default::default()
        };
        let status = node.node_stage_volume(Request::new(request)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_expand_returns_required_bytes() {
        let (node, lifecycle) = server();
        let request = NodeExpandVolumeRequest {
            volume_id: "vol-1".to_string(),
            volume_path: "/pods/a".to_string(),
            capacity_range: Some(CapacityRange { required_bytes: 4096, limit_bytes: 0 }),
            ..Default::default()
        };
        let response = node.node_expand_volume(Request::new(request)).await.unwrap().into_inner();
        assert_eq!(response.capacity_bytes, 4096);
        assert_eq!(lifecycle.expanded.lock().len(), 1);

        let request = NodeExpandVolumeRequest {
            volume_id: "vol-1".to_string(),
            volume_path: "/pods/a".to_string(),
            ..Default::default()
        };
        let status = node.node_expand_volume(Request::new(request)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_capabilities_and_info() {
        let (node, _) = server();
        let caps = node
            .node_get_capabilities(Request::new(NodeGetCapabilitiesRequest {}))
            .await
            .unwrap()
            .into_inner()
            .capabilities;
        assert_eq!(caps, vec![
            capability(rpc::Type::StageUnstageVolume),
            capability(rpc::Type::ExpandVolume),
        ]);

        let info = node.node_get_info(Request::new(NodeGetInfoRequest {})).await.unwrap().into_inner();
        assert_eq!(info.node_id, "node-a");
    }
}
