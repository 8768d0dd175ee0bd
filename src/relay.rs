//! Mail transport over the Pica passthrough relay (Gmail `messages/send`).
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ConfigError, Relay};
use crate::render::RenderedMessage;

const RELAY_API_BASE: &str = "https://api.picaos.com/";
const SEND_PATH: &str = "v1/passthrough/users/me/messages/send";
pub const DEFAULT_ACTION_ID: &str = "conn_mod_def::F_JeJ_A_TKg::cc2kvVQQTiiIiLEDauy6zQ";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to send email: {status} {reason} - {body}")]
    Status {
        status: u16,
        reason: String,
        body: String,
    },
    #[error("Failed to reach mail relay: {0}")]
    Network(#[source] reqwest::Error),
    #[error("Invalid mail relay response: {0}")]
    Decode(String),
    #[error("{0}")]
    Rejected(String),
}

/// Anything able to deliver one rendered message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &RenderedMessage) -> Result<Value, TransportError>;
}

#[derive(Clone)]
pub struct RelayClient {
    http: Client,
    base_url: Url,
    secret_key: String,
    connection_key: String,
    action_id: String,
}

impl fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayClient")
            .field("base_url", &self.base_url)
            .field("action_id", &self.action_id)
            .finish_non_exhaustive()
    }
}

impl RelayClient {
    /// Build a client from config; both keys are required.
    pub fn from_config(cfg: &Relay) -> Result<Self, ConfigError> {
        if cfg.secret_key.trim().is_empty() {
            return Err(ConfigError::Missing("relay.secret_key (PICA_SECRET_KEY)"));
        }
        if cfg.connection_key.trim().is_empty() {
            return Err(ConfigError::Missing(
                "relay.connection_key (PICA_CONNECTION_KEY)",
            ));
        }
        let base = cfg.base_url.as_deref().unwrap_or(RELAY_API_BASE);
        let base_url = parse_base_url(base)?;
        let http = Client::builder()
            .user_agent("camp-mailer/0.1")
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            base_url,
            secret_key: cfg.secret_key.clone(),
            connection_key: cfg.connection_key.clone(),
            action_id: cfg
                .action_id
                .clone()
                .unwrap_or_else(|| DEFAULT_ACTION_ID.to_string()),
        })
    }

    pub fn build_request(&self, message: &RenderedMessage) -> Result<reqwest::Request, TransportError> {
        let endpoint = self
            .base_url
            .join(SEND_PATH)
            .map_err(|e| TransportError::Rejected(format!("invalid relay URL: {e}")))?;
        self.http
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header("x-pica-secret", &self.secret_key)
            .header("x-pica-connection-key", &self.connection_key)
            .header("x-pica-action-id", &self.action_id)
            .json(&json!({ "raw": message.encode_raw() }))
            .build()
            .map_err(TransportError::Network)
    }
}

#[async_trait]
impl MailTransport for RelayClient {
    async fn send(&self, message: &RenderedMessage) -> Result<Value, TransportError> {
        let request = self.build_request(message)?;
        debug!(url = %request.url(), to = %message.to, "sending relay request");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(TransportError::Network)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), to = %message.to, "relay rejected message");
            return Err(TransportError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }

        let text = res.text().await.map_err(TransportError::Network)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// `Url::join` drops the last path segment unless the base ends with `/`.
fn parse_base_url(base: &str) -> Result<Url, ConfigError> {
    let normalized = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    Url::parse(&normalized).map_err(|_| ConfigError::Invalid("relay.base_url is not a valid URL"))
}
