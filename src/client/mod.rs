//! REST client for the cluster management API
//!
//! Thin wrapper around [`reqwest`] that owns connection settings,
//! authentication, TLS verification, and the mapping from HTTP failures
//! into operation-prefixed [`Error`](crate::error::Error) values.
//!
//! The cluster is the single source of truth: nothing is cached here, and
//! every call is issued fresh against the management endpoint.

pub mod paging;

use crate::error::{Error, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

/// Credentials for the management API
#[derive(Debug, Clone)]
pub enum Credentials {
    /// HTTP Basic authentication
    Basic { username: String, password: String },
    /// Bearer token (session-based deployments)
    Bearer(String),
}

/// Connection descriptor for one cluster
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Management endpoint host (name or address)
    pub host: String,
    /// Management endpoint port
    pub port: u16,
    /// API credentials
    pub credentials: Credentials,
    /// Verify the cluster's TLS certificate
    pub verify_ssl: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            credentials: Credentials::Basic {
                username: "root".to_string(),
                password: String::new(),
            },
            verify_ssl: true,
            timeout: Duration::from_secs(120),
        }
    }
}

impl ClusterConfig {
    fn base_url(&self) -> String {
        // Plain HTTP is only reachable in tests against a local mock.
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("https://{}:{}", self.host, self.port)
        }
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Result of a read that treats 404 as meaningful
///
/// `Absent` is produced only by a true remote 404; every other failure
/// propagates as an error so a transient fault is never mistaken for a
/// missing resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Absent,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Lookup::Absent)
    }
}

// =============================================================================
// REST Client
// =============================================================================

/// Client for one cluster's management API
pub struct RestClient {
    http: reqwest::Client,
    base: String,
    credentials: Credentials,
}

impl RestClient {
    /// Build a client from a connection descriptor.
    pub fn connect(config: &ClusterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            http,
            base: config.base_url(),
            credentials: config.credentials.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base, path);
        let builder = self.http.request(method, url);
        match &self.credentials {
            Credentials::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            Credentials::Bearer(token) => builder.bearer_auth(token),
        }
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<T> {
        debug!("GET {}", path);
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|e| Error::request(operation, e))?;
        let response = Self::check(operation, response).await?;
        decode_body(operation, response).await
    }

    /// GET with 404 mapped to [`Lookup::Absent`].
    pub async fn lookup<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
    ) -> Result<Lookup<T>> {
        debug!("GET {} (lookup)", path);
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|e| Error::request(operation, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Lookup::Absent);
        }

        let response = Self::check(operation, response).await?;
        Ok(Lookup::Found(decode_body(operation, response).await?))
    }

    /// POST a JSON body; returns the response document (create endpoints
    /// answer with the new resource id).
    pub async fn post_json<B: Serialize>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value> {
        debug!("POST {}", path);
        let response = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::request(operation, e))?;
        let response = Self::check(operation, response).await?;

        let text = response
            .text()
            .await
            .map_err(|e| Error::request(operation, e))?;
        if text.trim().is_empty() {
            Ok(serde_json::Value::Null)
        } else {
            serde_json::from_str(&text).map_err(|e| Error::Decode {
                operation: operation.to_string(),
                source: e,
            })
        }
    }

    /// PUT a JSON body; the API answers 204 on success.
    pub async fn put_json<B: Serialize>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> Result<()> {
        debug!("PUT {}", path);
        let response = self
            .request(Method::PUT, path)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::request(operation, e))?;
        Self::check(operation, response).await?;
        Ok(())
    }

    /// DELETE a resource. A 404 is tolerated: the resource vanishing
    /// between read and delete still leaves the cluster in the desired
    /// state.
    pub async fn delete(&self, operation: &str, path: &str) -> Result<()> {
        debug!("DELETE {}", path);
        let response = self
            .request(Method::DELETE, path)
            .send()
            .await
            .map_err(|e| Error::request(operation, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("DELETE {}: already absent", path);
            return Ok(());
        }

        Self::check(operation, response).await?;
        Ok(())
    }

    async fn check(operation: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::api(
            operation,
            status.as_u16(),
            extract_error_message(&body),
        ))
    }
}

async fn decode_body<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
    let text = response
        .text()
        .await
        .map_err(|e| Error::request(operation, e))?;
    serde_json::from_str(&text).map_err(|e| Error::Decode {
        operation: operation.to_string(),
        source: e,
    })
}

/// Pull the human-readable message out of the API's error envelope.
///
/// The management API answers failures with
/// `{"errors": [{"code": "...", "message": "..."}]}`; anything else is
/// passed through raw.
fn extract_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        errors: Vec<EnvelopeError>,
    }
    #[derive(Deserialize)]
    struct EnvelopeError {
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) if !envelope.errors.is_empty() => envelope
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; "),
        _ => {
            if body.trim().is_empty() {
                "no error detail returned".to_string()
            } else {
                body.trim().to_string()
            }
        }
    }
}

/// Percent-encode one path segment (share names, filesystem paths and
/// zone names all appear inside URLs).
pub fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_defaults_to_https() {
        let config = ClusterConfig {
            host: "cluster01.lab".into(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.base_url(), "https://cluster01.lab:8080");
    }

    #[test]
    fn test_base_url_keeps_explicit_scheme() {
        let config = ClusterConfig {
            host: "http://127.0.0.1".into(),
            port: 9999,
            ..Default::default()
        };
        assert_eq!(config.base_url(), "http://127.0.0.1:9999");
    }

    #[test]
    fn test_lookup_helpers() {
        let found: Lookup<u32> = Lookup::Found(3);
        assert_eq!(found.found(), Some(3));

        let absent: Lookup<u32> = Lookup::Absent;
        assert!(absent.is_absent());
        assert_eq!(absent.found(), None);
    }

    #[test]
    fn test_extract_error_message_envelope() {
        let body = r#"{"errors": [{"code": "AEC_CONFLICT", "message": "share exists"}]}"#;
        assert_eq!(extract_error_message(body), "share exists");
    }

    #[test]
    fn test_extract_error_message_multiple() {
        let body =
            r#"{"errors": [{"message": "bad range"}, {"message": "zone unknown"}]}"#;
        assert_eq!(extract_error_message(body), "bad range; zone unknown");
    }

    #[test]
    fn test_extract_error_message_raw_fallback() {
        assert_eq!(extract_error_message("gateway timeout"), "gateway timeout");
        assert_eq!(extract_error_message("  "), "no error detail returned");
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("/ifs/data/proj"), "%2Fifs%2Fdata%2Fproj");
        assert_eq!(encode_segment("team share"), "team%20share");
    }
}
