//! The Lightning adapter collaborator contract (§6): mints and verifies invoices.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum LnAdapterError {
    #[error("lightning adapter returned a client error: {0}")]
    ClientError(String),
    #[error("lightning adapter is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRequest<'a> {
    pub request_id: &'a str,
    pub payee_id: &'a str,
    pub amount_sats: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResponse {
    pub invoice: String,
    pub payment_hash: String,
    pub expires_at_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest<'a> {
    pub request_id: &'a str,
    pub payee_id: &'a str,
    pub amount_sats: u64,
    pub invoice: &'a str,
    pub payment_hash: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub paid: bool,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub settled_at_ms: Option<i64>,
}

pub trait LightningAdapter {
    fn invoice(
        &self,
        request: InvoiceRequest<'_>,
    ) -> impl Future<Output = Result<InvoiceResponse, LnAdapterError>> + Send;

    fn verify(
        &self,
        request: VerifyRequest<'_>,
    ) -> impl Future<Output = Result<VerifyResponse, LnAdapterError>> + Send;
}

/// A `reqwest`-backed adapter client; the default 10 s deadline matches §5's stated
/// default for adapter calls.
pub struct HttpLightningAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLightningAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client build should not fail with static config");
        HttpLightningAdapter {
            client,
            base_url: base_url.into(),
        }
    }

    fn status_error(status: reqwest::StatusCode, body: String) -> LnAdapterError {
        if status.is_client_error() {
            LnAdapterError::ClientError(body)
        } else {
            LnAdapterError::Unavailable(format!("status {status}: {body}"))
        }
    }
}

impl LightningAdapter for HttpLightningAdapter {
    async fn invoice(&self, request: InvoiceRequest<'_>) -> Result<InvoiceResponse, LnAdapterError> {
        let response = self
            .client
            .post(format!("{}/invoice", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| LnAdapterError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| LnAdapterError::Unavailable(e.to_string()))
    }

    async fn verify(&self, request: VerifyRequest<'_>) -> Result<VerifyResponse, LnAdapterError> {
        let response = self
            .client
            .post(format!("{}/verify", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| LnAdapterError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| LnAdapterError::Unavailable(e.to_string()))
    }
}
