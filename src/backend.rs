// ABOUTME: HTTP implementation of the backend collaborators
// ABOUTME: Feature probe, reorder, canonical list fetch, and status over blocking ureq calls

use crate::config::ClientConfig;
use crate::edit::{PlaybackStatus, PlaylistEntry, ReorderBackend, ReorderIntent, StatusSource};
use crate::error::Error;
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Reports whether the server currently allows the primary transport
#[async_trait]
pub trait FeatureProbe: Send + Sync {
    /// `Ok(true)` if the peer-negotiated transport is enabled
    async fn primary_enabled(&self) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct StreamFeatures {
    #[serde(default)]
    webrtc_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ReorderOutcome {
    #[serde(default = "accepted")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn accepted() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ListBody {
    #[serde(default)]
    items: Vec<PlaylistEntry>,
}

/// Backend client talking JSON over HTTP
#[derive(Clone)]
pub struct HttpBackend {
    agent: ureq::Agent,
    config: ClientConfig,
}

impl HttpBackend {
    /// Create a client for the server in `config`
    pub fn new(config: &ClientConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout(config.http_timeout)
            .build();
        Self {
            agent,
            config: config.clone(),
        }
    }

    async fn get_json<T>(&self, url: String) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let response = agent.get(&url).call().map_err(|e| request_error(&url, e))?;
            let body = response.into_string()?;
            Ok(serde_json::from_str(&body)?)
        })
        .await
        .map_err(|e| Error::Http(format!("request task failed: {}", e)))?
    }

    async fn post_json<T>(&self, url: String, body: serde_json::Value) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let response = agent
                .post(&url)
                .send_json(body)
                .map_err(|e| request_error(&url, e))?;
            let text = response.into_string()?;
            let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
            Ok(serde_json::from_str(text)?)
        })
        .await
        .map_err(|e| Error::Http(format!("request task failed: {}", e)))?
    }
}

fn request_error(url: &str, error: ureq::Error) -> Error {
    match error {
        ureq::Error::Status(code, response) => {
            let detail = response.into_string().unwrap_or_default();
            Error::Http(format!("{} returned HTTP {}: {}", url, code, detail.trim()))
        }
        ureq::Error::Transport(transport) => Error::Connection(transport.to_string()),
    }
}

#[async_trait]
impl FeatureProbe for HttpBackend {
    async fn primary_enabled(&self) -> Result<bool> {
        let features: StreamFeatures = self.get_json(self.config.probe_url()).await?;
        log::debug!("Server reports webrtc_enabled={}", features.webrtc_enabled);
        Ok(features.webrtc_enabled)
    }
}

#[async_trait]
impl ReorderBackend for HttpBackend {
    async fn reorder(&self, intent: &ReorderIntent) -> Result<()> {
        let url = format!("{}/reorder", self.config.playlist_url(&intent.list_id));
        let body = serde_json::to_value(intent)?;
        let outcome: ReorderOutcome = self.post_json(url, body).await?;
        if outcome.success {
            Ok(())
        } else {
            Err(Error::Protocol(
                outcome.error.unwrap_or_else(|| "server refused reorder".to_string()),
            ))
        }
    }

    async fn fetch_list(&self, list_id: &str) -> Result<Vec<PlaylistEntry>> {
        let body: ListBody = self.get_json(self.config.playlist_url(list_id)).await?;
        Ok(body.items)
    }
}

#[async_trait]
impl StatusSource for HttpBackend {
    async fn fetch_status(&self) -> Result<PlaybackStatus> {
        self.get_json(self.config.status_url()).await
    }
}

/// Probe that always answers the same way, for offline runs and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

#[async_trait]
impl FeatureProbe for StaticProbe {
    async fn primary_enabled(&self) -> Result<bool> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_default_to_disabled() {
        let features: StreamFeatures = serde_json::from_str("{}").unwrap();
        assert!(!features.webrtc_enabled);
        let features: StreamFeatures = serde_json::from_str(r#"{"webrtc_enabled":true}"#).unwrap();
        assert!(features.webrtc_enabled);
    }

    #[test]
    fn test_reorder_outcome_parsing() {
        let ok: ReorderOutcome = serde_json::from_str("{}").unwrap();
        assert!(ok.success);
        let refused: ReorderOutcome =
            serde_json::from_str(r#"{"success":false,"error":"index out of range"}"#).unwrap();
        assert!(!refused.success);
        assert_eq!(refused.error.as_deref(), Some("index out of range"));
    }

    #[test]
    fn test_list_body_parsing() {
        let body: ListBody =
            serde_json::from_str(r#"{"items":[{"id":"1","title":"One"},{"id":"2"}]}"#).unwrap();
        assert_eq!(body.items.len(), 2);
        assert_eq!(body.items[1], PlaylistEntry::new("2", ""));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let config = ClientConfig::new("http://127.0.0.1:9");
        let backend = HttpBackend::new(&config);
        let err = backend.primary_enabled().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "got {:?}", err);
    }
}
