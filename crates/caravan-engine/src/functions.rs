//! Global template functions

use minijinja::value::Rest;
use minijinja::{Error, ErrorKind, Value};

/// Walk a JSON string by successive keys.
///
/// Usage: {{ parseJSON(blob, "status", "address") }}
///
/// Fails when the walk ends on nothing, so templates cannot silently
/// interpolate an empty lookup.
pub fn parse_json(blob: String, keys: Rest<String>) -> Result<String, Error> {
    let mut current: serde_json::Value = serde_json::from_str(&blob)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid JSON: {}", e)))?;

    for key in keys.iter() {
        current = current
            .get_mut(key.as_str())
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
    }

    let result = match current {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };

    if result.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("failed to find '{}' in json", keys.join(".")),
        ));
    }
    Ok(result)
}

/// Read a process environment variable (empty when unset)
///
/// Usage: {{ readEnv("HOME") }}
pub fn read_env(name: String) -> String {
    std::env::var(&name).unwrap_or_default()
}

/// Read an entire file as a string
///
/// Usage: {{ readFile("ca.pem") | indent(4) }}
pub fn read_file(path: String) -> Result<String, Error> {
    std::fs::read_to_string(&path)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("failed to read {}: {}", path, e)))
}

/// Log a value while rendering; emits nothing into the output
///
/// Usage: {{ console(values) }}
pub fn console(value: Value) -> String {
    tracing::info!(value = %value, "template console");
    String::new()
}

/// Abort rendering with a custom message
///
/// Usage: {{ fail("unsupported region") }}
pub fn fail(message: String) -> Result<Value, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, message))
}

/// First non-empty argument
///
/// Usage: {{ coalesce(override, default, "fallback") }}
pub fn coalesce(args: Rest<Value>) -> Value {
    for value in args.iter() {
        if value.is_undefined() || value.is_none() {
            continue;
        }
        if let Some(s) = value.as_str() {
            if s.is_empty() {
                continue;
            }
        }
        return value.clone();
    }
    Value::UNDEFINED
}

/// Pick between two values based on a condition
///
/// Usage: {{ ternary(production, "3", "1") }}
pub fn ternary(condition: bool, yes: Value, no: Value) -> Value {
    if condition { yes } else { no }
}

/// Build a map from alternating key/value arguments
///
/// Usage: {{ dict("app", release, "tier", "backend") | toyaml }}
pub fn dict(args: Rest<Value>) -> Result<Value, Error> {
    if args.len() % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dict requires an even number of arguments",
        ));
    }

    let mut map = serde_json::Map::new();
    for pair in args.chunks(2) {
        let key = pair[0]
            .as_str()
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "dict keys must be strings"))?;
        let value = serde_json::to_value(&pair[1])
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
        map.insert(key.to_string(), value);
    }

    Ok(Value::from_serialize(serde_json::Value::Object(map)))
}

/// Build a list from the given arguments
pub fn list(args: Rest<Value>) -> Value {
    Value::from(args.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rest(items: Vec<&str>) -> Rest<String> {
        Rest(items.into_iter().map(String::from).collect())
    }

    #[test]
    fn test_parse_json() {
        let blob = r#"{"status": {"address": "10.0.0.1", "ready": true}}"#;
        assert_eq!(
            parse_json(blob.to_string(), rest(vec!["status", "address"])).unwrap(),
            "10.0.0.1"
        );
        assert_eq!(
            parse_json(blob.to_string(), rest(vec!["status", "ready"])).unwrap(),
            "true"
        );
    }

    #[test]
    fn test_parse_json_missing_key_fails() {
        let blob = r#"{"a": 1}"#;
        assert!(parse_json(blob.to_string(), rest(vec!["b"])).is_err());
        assert!(parse_json("not json".to_string(), rest(vec!["a"])).is_err());
    }

    #[test]
    fn test_read_env() {
        std::env::set_var("CARAVAN_TEST_VAR", "42");
        assert_eq!(read_env("CARAVAN_TEST_VAR".to_string()), "42");
        assert_eq!(read_env("CARAVAN_UNSET_VAR".to_string()), "");
    }

    #[test]
    fn test_coalesce() {
        let picked = coalesce(Rest(vec![
            Value::UNDEFINED,
            Value::from(""),
            Value::from("found"),
        ]));
        assert_eq!(picked.as_str(), Some("found"));
    }

    #[test]
    fn test_ternary() {
        assert_eq!(ternary(true, Value::from("a"), Value::from("b")).as_str(), Some("a"));
        assert_eq!(ternary(false, Value::from("a"), Value::from("b")).as_str(), Some("b"));
    }

    #[test]
    fn test_dict_odd_args() {
        assert!(dict(Rest(vec![Value::from("only-key")])).is_err());
    }
}
