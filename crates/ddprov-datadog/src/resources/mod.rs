//! Resource implementations
//!
//! One module per resource kind. Each exposes `KIND`, `schema()` and a
//! type implementing [`ddprov_core::Resource`]; [`crate::register`] wires
//! them into a registry.

pub mod aws_lambda_arn;
pub mod dashboard;
pub mod downtime;
pub mod logs_pipeline;
pub mod monitor;
pub mod pagerduty;
pub mod security_filter;
pub mod security_rule;
pub mod slo;
pub mod suppression;
pub mod user;

use ddprov_core::error::{Error, Result};
use serde_json::Value;

/// Identifier at `pointer` in a response body
///
/// The v1 API returns integer ids for some entities and string ids for
/// others; both are accepted and stored as strings.
pub(crate) fn response_id(body: &Value, pointer: &str) -> Result<String> {
    match body.pointer(pointer) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(Error::Other(format!("response has no identifier at {}", pointer))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_id_accepts_numbers_and_strings() {
        assert_eq!(response_id(&json!({"id": 42}), "/id").unwrap(), "42");
        assert_eq!(response_id(&json!({"data": {"id": "abc"}}), "/data/id").unwrap(), "abc");
        assert!(response_id(&json!({"id": ""}), "/id").is_err());
        assert!(response_id(&json!({}), "/id").is_err());
    }
}
