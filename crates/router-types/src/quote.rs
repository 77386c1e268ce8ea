//! `/quote` request/response wire types (§3, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Constraints;
use crate::schema::{require_non_empty_string, require_number, FieldError, Validate, ValidationResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub request_id: String,
    pub model_id: String,
    pub input_tokens_estimate: u64,
    pub output_tokens_estimate: u64,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}

impl Validate for QuoteRequest {
    fn validate(&self) -> ValidationResult {
        validate_quote_request(&serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

/// Structural-only check of a raw `QuoteRequest` payload, ahead of `serde` decoding, per
/// §4.3: required keys present and well-typed, nothing about business rules.
pub fn validate_quote_request(raw: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    let Some(obj) = raw.as_object() else {
        return ValidationResult::errors(vec![FieldError::new("", "must be a JSON object")]);
    };
    errors.extend(require_non_empty_string(obj, "requestId"));
    errors.extend(require_non_empty_string(obj, "modelId"));
    errors.extend(require_number(obj, "inputTokensEstimate"));
    errors.extend(require_number(obj, "outputTokensEstimate"));
    errors.extend(require_number(obj, "maxTokens"));
    ValidationResult::errors(errors)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotedPrice {
    pub total: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub request_id: String,
    pub node_id: String,
    pub price: QuotedPrice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_estimate_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn well_formed_quote_request_validates() {
        let raw = json!({
            "requestId": "q1",
            "modelId": "m",
            "inputTokensEstimate": 100,
            "outputTokensEstimate": 50,
            "maxTokens": 256,
        });
        let result = validate_quote_request(&raw);
        assert!(result.ok, "{:?}", result.errors);
    }

    #[test]
    fn missing_model_id_is_reported() {
        let raw = json!({
            "requestId": "q1",
            "inputTokensEstimate": 100,
            "outputTokensEstimate": 50,
            "maxTokens": 256,
        });
        let result = validate_quote_request(&raw);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.field == "modelId"));
    }
}
