use super::NUMERIC_TOLERANCE;
use serde_json::Value;

/// Canonical decimal form: no trailing zeros, no exponent
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{}", value)
}

/// Compare within [`NUMERIC_TOLERANCE`], relative for large magnitudes
pub fn numbers_equal(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= NUMERIC_TOLERANCE * scale
}

/// Serialize JSON with object keys sorted at every level
pub fn canonical_json_text(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.0000001), "0.0000001");
        assert_eq!(format_number(1e21), "1000000000000000000000");
    }

    #[test]
    fn test_numbers_equal() {
        assert!(numbers_equal(0.1 + 0.2, 0.3));
        assert!(!numbers_equal(1.0, 1.001));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let v = json!({"b": {"d": 1, "c": [true, null]}, "a": "x"});
        assert_eq!(canonical_json_text(&v), r#"{"a":"x","b":{"c":[true,null],"d":1}}"#);
    }
}
