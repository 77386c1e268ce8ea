//! Forwards an inbound `/infer` request to a peer router and hands its response back
//! unchanged, so the mesh is transparent from the client's point of view (§4.8).

use std::time::Duration;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum PeerClientError {
    #[error("peer router is unreachable: {0}")]
    Unreachable(String),
}

/// A thin `reqwest`-backed client to a peer router's public HTTP surface, grounded on
/// the same shape as [`crate::runner::HttpRunner`]: one client, a fixed timeout, no
/// retry middleware.
pub struct PeerClient {
    client: reqwest::Client,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build should not fail with static config");
        PeerClient { client }
    }

    /// Posts the original signed envelope body to `{endpoint}/infer` and returns the
    /// peer's raw status code and JSON body, to be relayed to the client unchanged.
    pub async fn forward_infer(
        &self,
        endpoint: &str,
        raw_envelope: &Value,
    ) -> Result<(u16, Value), PeerClientError> {
        let url = format!("{}/infer", endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .json(raw_envelope)
            .send()
            .await
            .map_err(|e| PeerClientError::Unreachable(e.to_string()))?;
        let status = response.status().as_u16();
        let body: Value = response
            .json()
            .await
            .map_err(|e| PeerClientError::Unreachable(e.to_string()))?;
        Ok((status, body))
    }
}

impl Default for PeerClient {
    fn default() -> Self {
        PeerClient::new(Duration::from_secs(30))
    }
}
