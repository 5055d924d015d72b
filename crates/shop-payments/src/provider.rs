//! Provider boundary for payment processors.
//!
//! This module defines the provider trait, its error type, and the HTTP
//! client used against real processors. No DB logic and no gate logic
//! belong here; the gateway owns orchestration.
//!
//! Amounts cross this boundary as decimal strings plus a currency code so
//! no floating-point rounding is introduced at the edge.

use std::fmt;

use async_trait::async_trait;

use shop_schemas::{
    ProviderCaptureRequest, ProviderChargeRequest, ProviderChargeState, ProviderRefundRequest,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that a [`PaymentProvider`] implementation may return.
#[derive(Debug)]
pub enum ProviderError {
    /// Network or transport failure.
    Transport(String),
    /// The processor returned an application-level refusal (a decline, an
    /// unknown charge, a state conflict). `code` carries the HTTP status
    /// when one exists.
    Api { code: Option<i64>, message: String },
    /// A response payload could not be decoded.
    Decode(String),
    /// A required configuration value (e.g. API key) is missing or invalid.
    Config(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transport(msg) => write!(f, "transport error: {msg}"),
            ProviderError::Api {
                code: Some(c),
                message,
            } => {
                write!(f, "provider api error code={c}: {message}")
            }
            ProviderError::Api {
                code: None,
                message,
            } => {
                write!(f, "provider api error: {message}")
            }
            ProviderError::Decode(msg) => write!(f, "decode error: {msg}"),
            ProviderError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Payment processor contract.
///
/// Implementations must be object-safe so callers can hold an
/// `Arc<dyn PaymentProvider>` without knowing the concrete type, and
/// `Send + Sync` so they can be shared across async task boundaries.
///
/// A decline is an `Err(ProviderError::Api { .. })`, never an `Ok` state;
/// callers branch on the error variant, not on status strings.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Name identifying this provider (e.g. `"sandbox"`), recorded on every
    /// payment attempt row.
    fn provider_name(&self) -> &'static str;

    /// Place an authorization hold for the full charge amount.
    async fn authorize(
        &self,
        req: ProviderChargeRequest,
    ) -> Result<ProviderChargeState, ProviderError>;

    /// Capture a previously authorized charge.
    async fn capture(
        &self,
        req: ProviderCaptureRequest,
    ) -> Result<ProviderChargeState, ProviderError>;

    /// Release an authorization hold without capturing.
    async fn void(&self, provider_charge_id: &str) -> Result<ProviderChargeState, ProviderError>;

    /// Return captured funds.
    async fn refund(
        &self,
        req: ProviderRefundRequest,
    ) -> Result<ProviderChargeState, ProviderError>;
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

/// HTTP-backed payment provider.
///
/// API key is resolved by the caller (boot/secrets layer) and passed in; do
/// not log it. `base_url` is overridable so tests can point the client at a
/// mock server.
#[derive(Debug, Clone)]
pub struct HttpPaymentProvider {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl HttpPaymentProvider {
    /// `base_url` comes from config (`payments.http.base_url`); tests point
    /// it at a mock server.
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json(
        &self,
        url: String,
        body: &impl serde::Serialize,
    ) -> Result<ProviderChargeState, ProviderError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Api {
                code: Some(status.as_u16() as i64),
                message: body_snippet(&text),
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| ProviderError::Decode(format!("charge state decode failed: {e}")))
    }
}

/// Truncate an error body to a loggable snippet.
fn body_snippet(body: &str) -> String {
    const MAX_CHARS: usize = 300;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_CHARS).collect();
    format!("{cut}...")
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    fn provider_name(&self) -> &'static str {
        "http"
    }

    async fn authorize(
        &self,
        req: ProviderChargeRequest,
    ) -> Result<ProviderChargeState, ProviderError> {
        self.post_json(self.url("/v1/charges"), &req).await
    }

    async fn capture(
        &self,
        req: ProviderCaptureRequest,
    ) -> Result<ProviderChargeState, ProviderError> {
        let url = self.url(&format!("/v1/charges/{}/capture", req.provider_charge_id));
        self.post_json(url, &req).await
    }

    async fn void(&self, provider_charge_id: &str) -> Result<ProviderChargeState, ProviderError> {
        let url = self.url(&format!("/v1/charges/{provider_charge_id}/void"));
        self.post_json(url, &serde_json::json!({})).await
    }

    async fn refund(
        &self,
        req: ProviderRefundRequest,
    ) -> Result<ProviderChargeState, ProviderError> {
        let url = self.url(&format!("/v1/charges/{}/refund", req.provider_charge_id));
        self.post_json(url, &req).await
    }
}

// ---------------------------------------------------------------------------
// Tests (no network)
// ---------------------------------------------------------------------------
