use crate::error::TranslationKind;
use chrono::DateTime;
use serde_json::Value;

/// Composable, pure value validators
#[derive(Debug, Clone)]
pub enum Validator {
    /// String must be one of the listed values
    OneOf(&'static [&'static str]),
    /// Integer within an inclusive range
    IntRange { min: i64, max: i64 },
    /// String holding a decimal number
    FloatString,
    /// RFC3339 timestamp
    Rfc3339,
    /// Non-empty string
    NotEmpty,
    /// Arbitrary check returning a message on failure
    Custom(fn(&Value) -> Result<(), String>),
}

impl Validator {
    /// Check a single (non-null) value
    pub fn check(&self, value: &Value) -> Result<(), (TranslationKind, String)> {
        match self {
            Validator::OneOf(allowed) => {
                let text = scalar_text(value);
                if allowed.iter().any(|a| *a == text) {
                    Ok(())
                } else {
                    Err((
                        TranslationKind::InvalidEnum,
                        format!("expected one of [{}], got {:?}", allowed.join(", "), text),
                    ))
                }
            }
            Validator::IntRange { min, max } => match value.as_i64() {
                Some(n) if n >= *min && n <= *max => Ok(()),
                Some(n) => Err((
                    TranslationKind::InvalidEnum,
                    format!("expected a value between {} and {}, got {}", min, max, n),
                )),
                None => Err((TranslationKind::TypeMismatch, "expected an integer".to_string())),
            },
            Validator::FloatString => match value {
                Value::Number(_) => Ok(()),
                Value::String(s) if s.trim().parse::<f64>().is_ok_and(f64::is_finite) => Ok(()),
                _ => Err((
                    TranslationKind::ParseError,
                    format!("{} is not a valid number", scalar_text(value)),
                )),
            },
            Validator::Rfc3339 => match value.as_str() {
                Some(s) if DateTime::parse_from_rfc3339(s).is_ok() => Ok(()),
                _ => Err((
                    TranslationKind::ParseError,
                    format!("{} is not a valid RFC3339 timestamp", scalar_text(value)),
                )),
            },
            Validator::NotEmpty => match value.as_str() {
                Some(s) if !s.is_empty() => Ok(()),
                _ => Err((TranslationKind::MissingRequired, "must not be empty".to_string())),
            },
            Validator::Custom(f) => f(value).map_err(|msg| (TranslationKind::ParseError, msg)),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_one_of() {
        let v = Validator::OneOf(&["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]);
        assert!(v.check(&json!("Mon")).is_ok());
        let (kind, _) = v.check(&json!("mon")).unwrap_err();
        assert_eq!(kind, TranslationKind::InvalidEnum);
    }

    #[test]
    fn test_float_string() {
        assert!(Validator::FloatString.check(&json!("1.5")).is_ok());
        assert!(Validator::FloatString.check(&json!(2)).is_ok());
        assert_eq!(
            Validator::FloatString.check(&json!("abc")).unwrap_err().0,
            TranslationKind::ParseError
        );
    }

    #[test]
    fn test_rfc3339_and_range() {
        assert!(Validator::Rfc3339.check(&json!("2024-12-31T12:00:00Z")).is_ok());
        assert!(Validator::Rfc3339.check(&json!("yesterday")).is_err());
        let priority = Validator::IntRange { min: 1, max: 5 };
        assert!(priority.check(&json!(3)).is_ok());
        assert!(priority.check(&json!(9)).is_err());
    }
}
