//! `/infer` request/response wire types (§3, §6), including streaming chunks and metering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::model::Constraints;
use crate::payment::PaymentReceipt;
use crate::schema::{require_non_empty_string, require_number, FieldError, Validate, ValidationResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    pub request_id: String,
    pub model_id: String,
    pub input: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runtime_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payment_receipts: Vec<PaymentReceipt>,
}

impl Validate for InferenceRequest {
    fn validate(&self) -> ValidationResult {
        validate_inference_request(&serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

/// Structural-only check of a raw `InferenceRequest` payload (§4.3). `input` is required
/// but may be empty — a zero-length prompt is a business question for the `Runner`, not a
/// shape violation.
pub fn validate_inference_request(raw: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    let Some(obj) = raw.as_object() else {
        return ValidationResult::errors(vec![FieldError::new("", "must be a JSON object")]);
    };
    errors.extend(require_non_empty_string(obj, "requestId"));
    errors.extend(require_non_empty_string(obj, "modelId"));
    match obj.get("input") {
        Some(Value::String(_)) => {}
        Some(_) => errors.push(FieldError::new("input", "must be a string")),
        None => errors.push(FieldError::new("input", "required field missing")),
    }
    errors.extend(require_number(obj, "maxTokens"));
    ValidationResult::errors(errors)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    pub request_id: String,
    pub node_id: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeteringRecord {
    pub request_id: String,
    pub node_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_sats: Option<u64>,
}

/// One chunk of a streamed `/infer/stream` response; the final chunk of a stream carries
/// the signed response/metering envelopes instead of a text delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InferenceStreamChunk {
    #[serde(rename_all = "camelCase")]
    Delta { request_id: String, text: String },
    #[serde(rename_all = "camelCase")]
    Final {
        request_id: String,
        response: Envelope<InferenceResponse>,
        metering: Envelope<MeteringRecord>,
    },
    #[serde(rename_all = "camelCase")]
    Error { request_id: String, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn well_formed_inference_request_validates() {
        let raw = json!({
            "requestId": "r1",
            "modelId": "m",
            "input": "hello",
            "maxTokens": 128,
        });
        let result = validate_inference_request(&raw);
        assert!(result.ok, "{:?}", result.errors);
    }

    #[test]
    fn non_string_input_is_reported() {
        let raw = json!({
            "requestId": "r1",
            "modelId": "m",
            "input": 5,
            "maxTokens": 128,
        });
        let result = validate_inference_request(&raw);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.field == "input"));
    }

    #[test]
    fn missing_request_id_is_reported() {
        let raw = json!({
            "modelId": "m",
            "input": "hello",
            "maxTokens": 128,
        });
        let result = validate_inference_request(&raw);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.field == "requestId"));
    }
}
