// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount Service Client
//!
//! HTTP/JSON client for the mount manager service, reached over its unix
//! socket. Used by the node plugin in decoupled mode so mount helpers live
//! in a separate, longer-lived process.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the MountService domain trait over HTTP on a unix socket

use crate::domain::mount::{
    ConfigureRequest, ErrorResponse, MountRequest, MountResponse, UnmountRequest,
};
use crate::domain::mount_service::{MountService, MountServiceError};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, warn};

pub struct MountServiceClient {
    socket: PathBuf,
    timeout: Duration,
}

impl MountServiceClient {
    pub fn new(socket: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            timeout,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Whether the service answers its health endpoint.
    pub async fn health(&self) -> Result<(), MountServiceError> {
        let (status, body) = self.send(Method::GET, "/healthz", Bytes::new()).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(decode_error(status, &body, ""))
        }
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        volume_id: &str,
        request: &Req,
    ) -> Result<Resp, MountServiceError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| MountServiceError::InvalidRequest(format!("encode request: {}", e)))?;
        let (status, body) = self.send(Method::POST, path, Bytes::from(payload)).await?;

        if !status.is_success() {
            return Err(decode_error(status, &body, volume_id));
        }
        serde_json::from_slice(&body).map_err(|e| {
            MountServiceError::Transport(format!("decode response of {}: {}", path, e))
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        payload: Bytes,
    ) -> Result<(StatusCode, Bytes), MountServiceError> {
        tokio::time::timeout(self.timeout, self.round_trip(method, path, payload))
            .await
            .map_err(|_| {
                MountServiceError::Transport(format!(
                    "request to {} timed out after {:?}",
                    path, self.timeout
                ))
            })?
    }

    async fn round_trip(
        &self,
        method: Method,
        path: &str,
        payload: Bytes,
    ) -> Result<(StatusCode, Bytes), MountServiceError> {
        let transport = |e: &dyn std::fmt::Display| transport_error(&self.socket, e);

        let stream = UnixStream::connect(&self.socket).await.map_err(|e| transport(&e))?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| transport(&e))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!("Mount service connection error: {}", e);
            }
        });

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(hyper::header::HOST, "localhost")
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Full::new(payload))
            .map_err(|e| transport(&e))?;

        debug!("Mount service request {} {}", request.method(), path);
        let response = sender.send_request(request).await.map_err(|e| transport(&e))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| transport(&e))?
            .to_bytes();
        Ok((status, body))
    }
}

fn transport_error(socket: &Path, e: &dyn std::fmt::Display) -> MountServiceError {
    MountServiceError::Transport(format!("{:?}: {}", socket, e))
}

/// Map a failed response back onto the error the manager raised, so callers
/// see the same variants in both deployment modes.
fn decode_error(status: StatusCode, body: &[u8], volume_id: &str) -> MountServiceError {
    let (message, target) = match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(response) => (response.error, response.target),
        Err(_) => (String::from_utf8_lossy(body).trim().to_string(), None),
    };

    match status {
        StatusCode::BAD_REQUEST => MountServiceError::InvalidRequest(message),
        StatusCode::NOT_FOUND => MountServiceError::NotMounted(volume_id.to_string()),
        StatusCode::CONFLICT => MountServiceError::AlreadyMounted {
            volume_id: volume_id.to_string(),
            target: target.unwrap_or_default(),
        },
        _ => MountServiceError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

#[derive(serde::Deserialize)]
struct Empty {}

#[async_trait]
impl MountService for MountServiceClient {
    async fn mount(&self, request: MountRequest) -> Result<MountResponse, MountServiceError> {
        self.post("/mount", &request.volume_id, &request).await
    }

    async fn unmount(&self, request: UnmountRequest) -> Result<(), MountServiceError> {
        self.post::<_, Empty>("/unmount", &request.volume_id, &request)
            .await
            .map(|_| ())
    }

    async fn configure(&self, request: ConfigureRequest) -> Result<(), MountServiceError> {
        self.post::<_, Empty>("/configure", &request.volume_id, &request)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_bad_request() {
        let err = decode_error(StatusCode::BAD_REQUEST, br#"{"error":"volumeId is required"}"#, "");
        assert!(matches!(err, MountServiceError::InvalidRequest(m) if m == "volumeId is required"));
    }

    #[test]
    fn test_decode_error_plain_body() {
        let err = decode_error(StatusCode::INTERNAL_SERVER_ERROR, b"boom\n", "vol-1");
        match err {
            MountServiceError::Remote { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_matches_manager_variants() {
        let body = br#"{"error":"volume vol-1 already mounted at \"/stage/a\"","target":"/stage/a"}"#;
        match decode_error(StatusCode::CONFLICT, body, "vol-1") {
            MountServiceError::AlreadyMounted { volume_id, target } => {
                assert_eq!(volume_id, "vol-1");
                assert_eq!(target, PathBuf::from("/stage/a"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = decode_error(StatusCode::NOT_FOUND, br#"{"error":"volume vol-1 is not mounted"}"#, "vol-1");
        assert!(matches!(err, MountServiceError::NotMounted(id) if id == "vol-1"));
    }

    #[test]
    fn test_conflict_is_failed_precondition_for_the_node() {
        use crate::application::node_service::NodeError;

        let err = decode_error(StatusCode::CONFLICT, br#"{"error":"mounted elsewhere"}"#, "vol-1");
        assert!(matches!(NodeError::from(err), NodeError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_unreachable_socket_is_transport_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = MountServiceClient::new(dir.path().join("none.sock"), Duration::from_secs(1));
        assert!(matches!(client.health().await, Err(MountServiceError::Transport(_))));
    }
}
