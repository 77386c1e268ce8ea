//! The `Runner` collaborator contract (§6): the HTTP-behind-an-interface service that
//! actually executes inference. Async methods expressed as native async-fn-in-traits,
//! no `async-trait` macro needed.

use std::sync::Arc;
use std::time::Duration;

use router_types::inference::{InferenceRequest, InferenceResponse, MeteringRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("runner returned a client error: {0}")]
    ClientError(String),
    #[error("runner is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerEstimate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
    pub latency_estimate_ms: u64,
}

pub trait Runner {
    fn list_models(&self) -> impl Future<Output = Result<Vec<String>, RunnerError>> + Send;

    fn health(&self) -> impl Future<Output = Result<bool, RunnerError>> + Send;

    fn estimate(
        &self,
        request: &InferenceRequest,
    ) -> impl Future<Output = Result<RunnerEstimate, RunnerError>> + Send;

    fn infer(
        &self,
        request: &InferenceRequest,
    ) -> impl Future<Output = Result<(InferenceResponse, MeteringRecord), RunnerError>> + Send;
}

impl<T: Runner + Sync> Runner for Arc<T> {
    fn list_models(&self) -> impl Future<Output = Result<Vec<String>, RunnerError>> + Send {
        self.as_ref().list_models()
    }

    fn health(&self) -> impl Future<Output = Result<bool, RunnerError>> + Send {
        self.as_ref().health()
    }

    fn estimate(
        &self,
        request: &InferenceRequest,
    ) -> impl Future<Output = Result<RunnerEstimate, RunnerError>> + Send {
        self.as_ref().estimate(request)
    }

    fn infer(
        &self,
        request: &InferenceRequest,
    ) -> impl Future<Output = Result<(InferenceResponse, MeteringRecord), RunnerError>> + Send {
        self.as_ref().infer(request)
    }
}

/// A `reqwest`-backed `Runner`: plain `reqwest::Client`, no retry middleware — this
/// collaborator doesn't need payment-retry semantics, just a fixed request timeout.
pub struct HttpRunner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRunner {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build should not fail with static config");
        HttpRunner {
            client,
            base_url: base_url.into(),
        }
    }

    fn status_error(status: reqwest::StatusCode, body: String) -> RunnerError {
        if status.is_client_error() {
            RunnerError::ClientError(body)
        } else {
            RunnerError::Unavailable(format!("status {status}: {body}"))
        }
    }
}

impl Runner for HttpRunner {
    async fn list_models(&self) -> Result<Vec<String>, RunnerError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .send()
            .await
            .map_err(|e| RunnerError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| RunnerError::Unavailable(e.to_string()))
    }

    async fn health(&self) -> Result<bool, RunnerError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| RunnerError::Unavailable(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn estimate(&self, request: &InferenceRequest) -> Result<RunnerEstimate, RunnerError> {
        let response = self
            .client
            .post(format!("{}/estimate", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| RunnerError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| RunnerError::Unavailable(e.to_string()))
    }

    async fn infer(
        &self,
        request: &InferenceRequest,
    ) -> Result<(InferenceResponse, MeteringRecord), RunnerError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RunnerInferReply {
            response: InferenceResponse,
            metering: MeteringRecord,
        }

        let response = self
            .client
            .post(format!("{}/infer", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| RunnerError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        let reply: RunnerInferReply = response
            .json()
            .await
            .map_err(|e| RunnerError::Unavailable(e.to_string()))?;
        Ok((reply.response, reply.metering))
    }
}
