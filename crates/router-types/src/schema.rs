//! Structural validators for wire payloads (§4.3).
//!
//! A validator checks *shape* — required keys, types, enumerated literals — never
//! business rules. Each wire type in this crate gets a `Validate` impl; `validate_envelope`
//! composes the outer envelope shape with an inner payload validator, prefixing the
//! inner errors with `payload:` as specified.

use serde::Serialize;
use serde_json::Value;

use crate::envelope::Envelope;

/// One structural error: the offending field path and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub msg: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, msg: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            msg: msg.into(),
        }
    }
}

/// The outcome of a structural validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        ValidationResult {
            ok: true,
            errors: Vec::new(),
        }
    }

    pub fn errors(errors: Vec<FieldError>) -> Self {
        if errors.is_empty() {
            ValidationResult::ok()
        } else {
            ValidationResult { ok: false, errors }
        }
    }

    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        self.ok = self.errors.is_empty();
        self
    }

    fn prefixed(self, prefix: &str) -> Self {
        let errors = self
            .errors
            .into_iter()
            .map(|e| FieldError::new(format!("{prefix}{}", e.field), e.msg))
            .collect();
        ValidationResult::errors(errors)
    }
}

/// A type whose shape can be checked without resolving business rules.
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}

/// Checks the four mandatory envelope fields are present and well-typed, then runs
/// `inner` over the payload, prefixing any inner errors with `payload:`.
pub fn validate_envelope<T, F>(raw: &Value, inner: F) -> ValidationResult
where
    F: FnOnce(&Value) -> ValidationResult,
{
    let mut errors = Vec::new();
    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            return ValidationResult::errors(vec![FieldError::new(
                "",
                "envelope must be a JSON object",
            )]);
        }
    };
    for field in ["payload", "nonce", "ts", "keyId", "sig"] {
        if !obj.contains_key(field) {
            errors.push(FieldError::new(field, "required field missing"));
        }
    }
    if let Some(nonce) = obj.get("nonce") {
        if !nonce.is_string() {
            errors.push(FieldError::new("nonce", "must be a string"));
        }
    }
    if let Some(ts) = obj.get("ts") {
        if !ts.is_i64() && !ts.is_u64() {
            errors.push(FieldError::new("ts", "must be an integer"));
        }
    }
    if let Some(key_id) = obj.get("keyId") {
        if !key_id.is_string() {
            errors.push(FieldError::new("keyId", "must be a string"));
        }
    }
    if let Some(sig) = obj.get("sig") {
        if !sig.is_string() {
            errors.push(FieldError::new("sig", "must be a string"));
        }
    }
    let outer = ValidationResult::errors(errors);
    let inner_result = match obj.get("payload") {
        Some(payload) => inner(payload).prefixed("payload:"),
        None => ValidationResult::ok(),
    };
    let _marker: Option<Envelope<()>> = None; // ties this fn to the Envelope<T> shape in docs
    outer.merge(inner_result)
}

/// Helper: fails unless `value` is a non-empty string.
pub fn require_non_empty_string(obj: &serde_json::Map<String, Value>, field: &str) -> Vec<FieldError> {
    match obj.get(field) {
        None => vec![FieldError::new(field, "required field missing")],
        Some(Value::String(s)) if !s.is_empty() => vec![],
        Some(Value::String(_)) => vec![FieldError::new(field, "must not be empty")],
        Some(_) => vec![FieldError::new(field, "must be a string")],
    }
}

/// Helper: fails unless `value` is present and numeric.
pub fn require_number(obj: &serde_json::Map<String, Value>, field: &str) -> Vec<FieldError> {
    match obj.get(field) {
        None => vec![FieldError::new(field, "required field missing")],
        Some(v) if v.is_number() => vec![],
        Some(_) => vec![FieldError::new(field, "must be a number")],
    }
}

/// Helper: fails unless `value` is one of `allowed`.
pub fn require_enum(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    allowed: &[&str],
) -> Vec<FieldError> {
    match obj.get(field) {
        None => vec![FieldError::new(field, "required field missing")],
        Some(Value::String(s)) if allowed.contains(&s.as_str()) => vec![],
        Some(Value::String(s)) => vec![FieldError::new(
            field,
            format!("'{s}' is not one of {allowed:?}"),
        )],
        Some(_) => vec![FieldError::new(field, "must be a string")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_shape_accepts_well_formed_value() {
        let raw = json!({
            "payload": {"modelId": "m"},
            "nonce": "abc",
            "ts": 1,
            "keyId": "deadbeef",
            "sig": "00",
        });
        let result = validate_envelope::<(), _>(&raw, |_| ValidationResult::ok());
        assert!(result.ok, "{:?}", result.errors);
    }

    #[test]
    fn envelope_shape_rejects_missing_fields() {
        let raw = json!({"payload": {}});
        let result = validate_envelope::<(), _>(&raw, |_| ValidationResult::ok());
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.field == "nonce"));
    }

    #[test]
    fn inner_errors_are_prefixed() {
        let raw = json!({
            "payload": {},
            "nonce": "abc",
            "ts": 1,
            "keyId": "deadbeef",
            "sig": "00",
        });
        let result = validate_envelope::<(), _>(&raw, |_| {
            ValidationResult::errors(vec![FieldError::new("modelId", "required field missing")])
        });
        assert!(!result.ok);
        assert_eq!(result.errors[0].field, "payload:modelId");
    }
}
