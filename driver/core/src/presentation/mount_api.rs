// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount Manager HTTP API
//!
//! JSON endpoints of the mount manager service, served on a unix socket:
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | POST | `/mount` | `MountRequest` | `MountResponse` |
//! | POST | `/unmount` | `UnmountRequest` | `{}` |
//! | POST | `/configure` | `ConfigureRequest` | `{}` |
//! | GET | `/healthz` | | `{"status":"ok"}` |
//!
//! Failures carry `{"error": "..."}`.
//!
//! # Architecture
//!
//! - **Layer:** Presentation Layer
//! - **Purpose:** Implements the mount manager wire protocol over Axum

use crate::domain::mount::{ConfigureRequest, ErrorResponse, MountRequest, MountResponse, UnmountRequest};
use crate::domain::mount_service::{MountService, MountServiceError};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::{error, info};

pub struct AppState {
    pub mounts: Arc<dyn MountService>,
}

pub fn app(mounts: Arc<dyn MountService>) -> Router {
    let state = Arc::new(AppState { mounts });

    Router::new()
        .route("/mount", post(mount))
        .route("/unmount", post(unmount))
        .route("/configure", post(configure))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Error body plus the status it is served with.
pub struct ApiError(MountServiceError);

impl From<MountServiceError> for ApiError {
    fn from(err: MountServiceError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(MountServiceError::InvalidRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MountServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            MountServiceError::NotMounted(_) => StatusCode::NOT_FOUND,
            MountServiceError::AlreadyMounted { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // invalid input is the caller's problem
        if status.is_server_error() {
            error!("Mount service request failed: {}", self.0);
        }
        let target = match &self.0 {
            MountServiceError::AlreadyMounted { target, .. } => Some(target.clone()),
            _ => None,
        };
        let error = match self.0 {
            MountServiceError::InvalidRequest(message) => message,
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { error, target })).into_response()
    }
}

async fn mount(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MountRequest>, JsonRejection>,
) -> Result<Json<MountResponse>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.mounts.mount(request).await?))
}

async fn unmount(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UnmountRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = payload?;
    state.mounts.unmount(request).await?;
    Ok(Json(json!({})))
}

async fn configure(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConfigureRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = payload?;
    state.mounts.configure(request).await?;
    Ok(Json(json!({})))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Serve the API on `socket` until `shutdown` resolves, then remove the socket.
pub async fn serve<F>(socket: &Path, mounts: Arc<dyn MountService>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    match std::fs::remove_file(socket) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket)?;
    info!("Mount service listening on {:?}", socket);

    let result = axum::serve(listener, app(mounts))
        .with_graceful_shutdown(shutdown)
        .await;

    if let Err(e) = std::fs::remove_file(socket) {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!("Failed to remove socket {:?}: {}", socket, e);
        }
    }
    result?;
    info!("Mount service stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::path::PathBuf;
    use tower::ServiceExt;

    struct StubMounts;

    #[async_trait]
    impl MountService for StubMounts {
        async fn mount(&self, request: MountRequest) -> Result<MountResponse, MountServiceError> {
            if request.volume_id == "taken" {
                return Err(MountServiceError::AlreadyMounted {
                    volume_id: request.volume_id,
                    target: PathBuf::from("/elsewhere"),
                });
            }
            request.validate().map_err(MountServiceError::InvalidRequest)?;
            Ok(MountResponse { local_socket: request.local_socket })
        }

        async fn unmount(&self, _request: UnmountRequest) -> Result<(), MountServiceError> {
            Ok(())
        }

        async fn configure(&self, request: ConfigureRequest) -> Result<(), MountServiceError> {
            Err(MountServiceError::NotMounted(request.volume_id))
        }
    }

    async fn call(method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app(Arc::new(StubMounts)).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn mount_body(volume_id: &str) -> serde_json::Value {
        json!({
            "volumeId": volume_id,
            "targetPath": "/staging/v",
            "cacheDir": "/cache/v",
            "localSocket": "/run/v.sock",
            "mountArgs": ["mount", "-dir=/staging/v"],
        })
    }

    #[tokio::test]
    async fn test_mount_returns_local_socket() {
        let (status, body) = call("POST", "/mount", mount_body("v")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["localSocket"], "/run/v.sock");
    }

    #[tokio::test]
    async fn test_conflicting_mount_is_409() {
        let (status, body) = call("POST", "/mount", mount_body("taken")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already mounted"));
        assert!(body["target"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let (status, body) = call("POST", "/mount", json!({"volumeId": 5})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert!(body.get("target").is_none());
    }

    #[tokio::test]
    async fn test_configure_unknown_volume_is_404() {
        let (status, _) =
            call("POST", "/configure", json!({"volumeId": "v", "collectionCapacity": 10})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unmount_and_health() {
        let (status, body) = call("POST", "/unmount", json!({"volumeId": "v"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let response = app(Arc::new(StubMounts)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
