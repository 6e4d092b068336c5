// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Kubernetes Capacity Source
//!
//! Reads `spec.capacity.storage` of the PersistentVolume named after the
//! volume id, using the pod's service-account credentials.

use super::quantity::parse_quantity;
use crate::domain::capacity::{CapacityError, CapacitySource};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything outside the RFC 3986 unreserved set
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

pub struct KubernetesCapacitySource {
    client: Client,
    api_server: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PersistentVolume {
    #[serde(default)]
    spec: PersistentVolumeSpec,
}

#[derive(Debug, Default, Deserialize)]
struct PersistentVolumeSpec {
    #[serde(default)]
    capacity: std::collections::HashMap<String, String>,
}

impl KubernetesCapacitySource {
    /// Client for an explicit API server, e.g. a local proxy.
    pub fn new(api_server: impl Into<String>, token: Option<String>) -> Result<Self, CapacityError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CapacityError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            api_server: api_server.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Client configured from the in-cluster environment.
    pub fn in_cluster() -> Result<Self, CapacityError> {
        let unavailable = |what: &str| CapacityError::Unavailable(format!("not running in a cluster: {}", what));
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| unavailable("KUBERNETES_SERVICE_HOST is not set"))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))
            .map_err(|e| CapacityError::Unavailable(format!("service account token: {}", e)))?;
        let ca = std::fs::read(dir.join("ca.crt"))
            .map_err(|e| CapacityError::Unavailable(format!("service account CA: {}", e)))?;
        let certificate = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| CapacityError::Unavailable(format!("service account CA: {}", e)))?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .add_root_certificate(certificate)
            .build()
            .map_err(|e| CapacityError::Unavailable(e.to_string()))?;

        // IPv6 service hosts need brackets
        let host = if host.contains(':') { format!("[{}]", host) } else { host };
        Ok(Self {
            client,
            api_server: format!("https://{}:{}", host, port),
            token: Some(token.trim().to_string()),
        })
    }
}

#[async_trait]
impl CapacitySource for KubernetesCapacitySource {
    async fn capacity(&self, volume_id: &str) -> Result<i64, CapacityError> {
        let url = format!(
            "{}/api/v1/persistentvolumes/{}",
            self.api_server,
            utf8_percent_encode(volume_id, PATH_SEGMENT)
        );
        debug!("Fetching capacity of volume {} from {}", volume_id, url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CapacityError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(CapacityError::NotFound(volume_id.to_string())),
            status if !status.is_success() => {
                return Err(CapacityError::Request(format!("{} returned {}", url, status)))
            }
            _ => {}
        }

        let volume: PersistentVolume = response
            .json()
            .await
            .map_err(|e| CapacityError::Request(e.to_string()))?;
        let storage = volume
            .spec
            .capacity
            .get("storage")
            .ok_or_else(|| CapacityError::InvalidQuantity(String::new()))?;
        parse_quantity(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_persistent_volume_capacity() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/persistentvolumes/pvc-123")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"kind":"PersistentVolume","spec":{"capacity":{"storage":"5Gi"}}}"#)
            .create_async()
            .await;

        let source = KubernetesCapacitySource::new(server.url(), Some("secret".to_string())).unwrap();
        assert_eq!(source.capacity("pvc-123").await.unwrap(), 5 * 1024 * 1024 * 1024);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_volume_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/persistentvolumes/gone")
            .with_status(404)
            .create_async()
            .await;

        let source = KubernetesCapacitySource::new(server.url(), None).unwrap();
        assert!(matches!(source.capacity("gone").await, Err(CapacityError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_volume_id_is_a_single_path_segment() {
        let mut server = mockito::Server::new_async().await;
        let escaped = server
            .mock("GET", "/api/v1/persistentvolumes/ns%2Fpvc%3Fx%20y")
            .with_status(200)
            .with_body(r#"{"spec":{"capacity":{"storage":"1Mi"}}}"#)
            .create_async()
            .await;
        let nested = server
            .mock("GET", "/api/v1/persistentvolumes/ns/pvc")
            .with_status(200)
            .with_body(r#"{"spec":{"capacity":{"storage":"9Gi"}}}"#)
            .expect(0)
            .create_async()
            .await;

        let source = KubernetesCapacitySource::new(server.url(), None).unwrap();
        assert_eq!(source.capacity("ns/pvc?x y").await.unwrap(), 1024 * 1024);
        escaped.assert_async().await;
        nested.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_storage_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/persistentvolumes/pvc-1")
            .with_status(200)
            .with_body(r#"{"spec":{}}"#)
            .create_async()
            .await;

        let source = KubernetesCapacitySource::new(server.url(), None).unwrap();
        assert!(matches!(
            source.capacity("pvc-1").await,
            Err(CapacityError::InvalidQuantity(_))
        ));
    }
}
