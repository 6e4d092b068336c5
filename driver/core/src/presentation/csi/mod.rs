// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! CSI gRPC Surface
//!
//! Generated CSI v1 types plus the server that hosts the Identity and Node
//! services on the configured endpoint.
//!
//! # Architecture
//!
//! - **Layer:** Presentation Layer
//! - **Purpose:** Implements the CSI endpoint and its error mapping

pub mod identity;
pub mod node;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("csi.v1");
}

pub use identity::IdentityService;
pub use node::NodeServer;

use crate::application::node_service::NodeError;
use crate::domain::node_config::Endpoint;
use std::future::Future;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::Status;
use tracing::info;

impl From<NodeError> for Status {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::InvalidArgument(m) => Status::invalid_argument(m),
            NodeError::FailedPrecondition(m) => Status::failed_precondition(m),
            NodeError::PermissionDenied(m) => Status::permission_denied(m),
            NodeError::Internal(m) => Status::internal(m),
        }
    }
}

/// Serve Identity and Node on `endpoint` until `shutdown` resolves.
pub async fn serve<F>(
    endpoint: &Endpoint,
    identity: IdentityService,
    node: NodeServer,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let router = tonic::transport::Server::builder()
        .add_service(identity.into_server())
        .add_service(node.into_server());

    match endpoint {
        Endpoint::Unix(path) => {
            // a previous run may have left its socket behind
            match std::fs::remove_file(path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let listener = UnixListener::bind(path)?;
            info!("Listening for CSI connections on {:?}", path);
            router
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
                .await?;
        }
        Endpoint::Tcp(address) => {
            let addr: std::net::SocketAddr = address.parse()?;
            info!("Listening for CSI connections on {}", addr);
            router.serve_with_shutdown(addr, shutdown).await?;
        }
    }

    info!("CSI server stopped");
    Ok(())
}
