use super::entity::{format_utc, NormalizedState, RawEntityState};
use super::UpstreamError;
use crate::config::UpstreamConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of the normalized entity state.
///
/// The cache only talks to this trait, so tests can substitute a fake.
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn fetch(&self) -> Result<NormalizedState, UpstreamError>;
}

/// HTTP client for a Home Assistant entity state endpoint.
///
/// Authenticates with a Bearer token. Holds no state besides the connection pool.
pub struct HassClient {
    http_client: Client,
    url: String,
    token: String,
}

impl HassClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("labstatus/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            url: state_url(&config.base_url, &config.entity_id),
            token: config.token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StateSource for HassClient {
    async fn fetch(&self) -> Result<NormalizedState, UpstreamError> {
        debug!(url = %self.url, "Requesting entity state from upstream");

        let response = self
            .http_client
            .get(&self.url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;

        // Non-2xx bodies still go through the parser below
        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Upstream returned non-success status");
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::ReadFailed(e.to_string()))?;
        let observed_at = Utc::now();

        let raw = RawEntityState::from_body(&body)?;
        let state = raw.normalize(observed_at)?;

        info!(
            observed_at = %format_utc(observed_at),
            entity_id = raw.entity_id.as_deref().unwrap_or("?"),
            "Got response from upstream"
        );

        Ok(state)
    }
}

fn state_url(base_url: &str, entity_id: &str) -> String {
    format!("{}/api/states/{}", base_url.trim_end_matches('/'), entity_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use mockito::{Matcher, Server};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const ENTITY: &str = "input_boolean.lab_is_on";

    fn test_config(base_url: String) -> UpstreamConfig {
        UpstreamConfig {
            base_url,
            entity_id: ENTITY.to_string(),
            token: "test_token".to_string(),
            request_timeout_seconds: 5,
        }
    }

    #[test]
    fn test_state_url_trims_trailing_slash() {
        assert_eq!(
            state_url("http://hass.local/", ENTITY),
            "http://hass.local/api/states/input_boolean.lab_is_on"
        );
        assert_eq!(
            state_url("http://hass.local", ENTITY),
            "http://hass.local/api/states/input_boolean.lab_is_on"
        );
    }

    #[tokio::test]
    async fn test_fetch_sends_credentials_and_projects() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/states/input_boolean.lab_is_on")
            .match_header("authorization", "Bearer test_token")
            .match_header("content-type", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "entity_id": "input_boolean.lab_is_on",
                    "state": "on",
                    "attributes": {"editable": true, "friendly_name": "Lab"},
                    "last_changed": "2024-01-01T00:00:00+00:00",
                    "last_updated": "2024-01-02T00:00:00+00:00",
                    "context": {"id": "abc", "parent_id": null, "user_id": null}
                }"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = HassClient::new(&test_config(server.url())).unwrap();
        let before = Utc::now();
        let state = client.fetch().await.unwrap();
        let after = Utc::now();

        mock.assert_async().await;
        assert_eq!(state.state, "on");
        assert_eq!(state.last_changed_utc, "2024-01-01T00:00:00Z");

        // Stamped with local observation time, whole seconds
        let updated = DateTime::parse_from_rfc3339(&state.last_updated_utc)
            .unwrap()
            .with_timezone(&Utc);
        assert!(updated.timestamp() >= before.timestamp());
        assert!(updated.timestamp() <= after.timestamp());
        assert_ne!(state.last_updated_utc, "2024-01-02T00:00:00Z");
    }

    #[tokio::test]
    async fn test_non_success_status_body_still_parsed() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(503)
            .with_body(r#"{"state": "off", "last_changed": "2024-01-01T00:00:00Z"}"#)
            .create_async()
            .await;

        let client = HassClient::new(&test_config(server.url())).unwrap();
        let state = client.fetch().await.unwrap();
        assert_eq!(state.state, "off");
    }

    #[tokio::test]
    async fn test_unauthorized_text_body_is_malformed() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(401)
            .with_body("401: Unauthorized")
            .create_async()
            .await;

        let client = HassClient::new(&test_config(server.url())).unwrap();
        let err = client.fetch().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_invalid_timestamp() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body(r#"{"state": "on", "last_changed": "not-a-date"}"#)
            .create_async()
            .await;

        let client = HassClient::new(&test_config(server.url())).unwrap();
        let err = client.fetch().await.unwrap_err();
        assert_eq!(err, UpstreamError::TimestampInvalid("not-a-date".to_string()));
    }

    #[tokio::test]
    async fn test_truncated_body_is_read_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Promise 100 bytes, send a few, hang up
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{\"state\"")
                .await
                .unwrap();
            let _ = socket.shutdown().await;
        });

        let client = HassClient::new(&test_config(format!("http://{}", addr))).unwrap();
        let err = client.fetch().await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, UpstreamError::ReadFailed(_)), "got {:?}", err);
        assert_eq!(err.kind(), "upstream_read_failed");
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        // Port 1 on loopback has no listener
        let client = HassClient::new(&test_config("http://127.0.0.1:1".to_string())).unwrap();
        let err = client.fetch().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Unavailable(_)));
        assert_eq!(err.kind(), "upstream_unavailable");
    }
}
