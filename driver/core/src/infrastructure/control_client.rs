// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount Control Client
//!
//! gRPC client for the `SeaweedMount` control service every mount helper
//! exposes on its local unix socket. Used to change a running mount's
//! collection capacity without remounting.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the MountControl domain trait over tonic

pub mod proto {
    tonic::include_proto!("messaging_pb");
}

use crate::domain::mount::quota_for_capacity;
use crate::domain::mount_service::{ControlError, MountControl};
use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use proto::seaweed_mount_client::SeaweedMountClient;
use proto::ConfigureRequest;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tracing::debug;

// The authority is ignored; every connection goes to the unix socket
const PLACEHOLDER_URI: &str = "http://[::]:50051";

pub struct GrpcMountControl {
    timeout: Duration,
}

impl GrpcMountControl {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn connect(&self, socket: &Path) -> Result<Channel, ControlError> {
        let connect_error = |message: String| ControlError::Connect {
            socket: socket.to_path_buf(),
            message,
        };

        let path: PathBuf = socket.to_path_buf();
        let endpoint = Endpoint::try_from(PLACEHOLDER_URI)
            .map_err(|e| connect_error(e.to_string()))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);

        endpoint
            .connect_with_connector(tower::service_fn(move |_: Uri| {
                let path = path.clone();
                async move {
                    let stream = UnixStream::connect(path).await?;
                    Ok::<_, io::Error>(TokioIo::new(stream))
                }
            }))
            .await
            .map_err(|e| connect_error(e.to_string()))
    }
}

#[async_trait]
impl MountControl for GrpcMountControl {
    async fn set_capacity(&self, socket: &Path, capacity_bytes: i64) -> Result<(), ControlError> {
        let collection_capacity = quota_for_capacity(capacity_bytes);
        debug!(
            "Configuring mount at {:?} with collection capacity {}",
            socket, collection_capacity
        );

        let call = async {
            let channel = self.connect(socket).await?;
            SeaweedMountClient::new(channel)
                .configure(ConfigureRequest { collection_capacity })
                .await
                .map_err(|status| ControlError::Rpc(status.message().to_string()))?;
            Ok::<(), ControlError>(())
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ControlError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proto::seaweed_mount_server::{SeaweedMount, SeaweedMountServer};
    use proto::ConfigureResponse;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::net::UnixListener;
    use tokio_stream::wrappers::UnixListenerStream;
    use tonic::{Request, Response, Status};

    #[derive(Clone, Default)]
    struct RecordingMount {
        capacities: Arc<Mutex<Vec<i64>>>,
    }

    #[tonic::async_trait]
    impl SeaweedMount for RecordingMount {
        async fn configure(
            &self,
            request: Request<ConfigureRequest>,
        ) -> Result<Response<ConfigureResponse>, Status> {
            let capacity = request.into_inner().collection_capacity;
            if capacity < 0 {
                return Err(Status::invalid_argument("negative capacity"));
            }
            self.capacities.lock().push(capacity);
            Ok(Response::new(ConfigureResponse {}))
        }
    }

    fn serve(socket: &Path) -> RecordingMount {
        let mount = RecordingMount::default();
        let listener = UnixListener::bind(socket).unwrap();
        let service = SeaweedMountServer::new(mount.clone());
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming(UnixListenerStream::new(listener))
                .await
        });
        mount
    }

    #[tokio::test]
    async fn test_set_capacity_reaches_helper() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("mount.sock");
        let mount = serve(&socket);
        let control = GrpcMountControl::new(Duration::from_secs(5));

        control.set_capacity(&socket, 10 << 30).await.unwrap();
        control.set_capacity(&socket, 1).await.unwrap();

        assert_eq!(mount.capacities.lock().as_slice(), [10 << 30, 0]);
    }

    #[tokio::test]
    async fn test_rejected_configure_is_rpc_error() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("mount.sock");
        let _mount = serve(&socket);
        let control = GrpcMountControl::new(Duration::from_secs(5));

        let err = control.set_capacity(&socket, -5).await.unwrap_err();
        assert!(matches!(err, ControlError::Rpc(message) if message == "negative capacity"));
    }

    #[tokio::test]
    async fn test_missing_socket_is_connect_error() {
        let dir = TempDir::new().unwrap();
        let control = GrpcMountControl::new(Duration::from_secs(2));

        let err = control
            .set_capacity(&dir.path().join("absent.sock"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Connect { .. } | ControlError::Timeout(_)));
    }
}
