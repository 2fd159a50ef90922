//! General-purpose template filters

use base64::Engine as _;
use minijinja::{Error, ErrorKind, Value};
use sha2::{Digest, Sha256};

/// Quote a string with double quotes
///
/// Usage: {{ name | quote }}
pub fn quote(value: Value) -> String {
    let s = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Quote a string with single quotes
///
/// Usage: {{ name | squote }}
pub fn squote(value: Value) -> String {
    let s = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
    format!("'{}'", s.replace('\'', "''"))
}

/// Indent every non-empty line by the given number of spaces
///
/// Usage: {{ content | indent(4) }}
pub fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Indent with a leading newline, for inlining nested blocks
///
/// Usage: {{ content | nindent(4) }}
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// Truncate a string to at most `len` characters
pub fn trunc(value: String, len: usize) -> String {
    value.chars().take(len).collect()
}

/// Strip a prefix if present
pub fn trimprefix(value: String, prefix: String) -> String {
    value
        .strip_prefix(&prefix)
        .map(str::to_string)
        .unwrap_or(value)
}

/// Strip a suffix if present
pub fn trimsuffix(value: String, suffix: String) -> String {
    value
        .strip_suffix(&suffix)
        .map(str::to_string)
        .unwrap_or(value)
}

/// Base64 encode a string
pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

/// Base64 decode a string
pub fn b64decode(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.as_bytes())
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("base64 decode error: {}", e)))?;

    String::from_utf8(decoded)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("UTF-8 decode error: {}", e)))
}

/// Hex-encoded SHA-256 of a string
pub fn sha256sum(value: String) -> String {
    let digest = Sha256::digest(value.as_bytes());
    format!("{:x}", digest)
}

/// Serialize a value as YAML (without a leading document marker)
///
/// Usage: {{ config | toyaml }}
pub fn toyaml(value: Value) -> Result<String, Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    let yaml = serde_yaml::to_string(&json)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// Serialize a value as compact JSON
pub fn tojson(value: Value) -> Result<String, Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    serde_json::to_string(&json).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Require a value; fail the render when it is undefined or empty
///
/// Usage: {{ release | required("release must be set") }}
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined()
        || value.is_none()
        || value.as_str().map(str::is_empty).unwrap_or(false);

    if missing {
        let message = message.unwrap_or_else(|| "required value is missing".to_string());
        return Err(Error::new(ErrorKind::InvalidOperation, message));
    }
    Ok(value)
}

/// True when a value is undefined, none, or has no content
///
/// Usage: {% if overrides | empty %}
pub fn empty(value: Value) -> bool {
    if value.is_undefined() || value.is_none() {
        return true;
    }
    match value.len() {
        Some(len) => len == 0,
        None => value.as_str().map(str::is_empty).unwrap_or(false),
    }
}

/// Convert to snake_case
pub fn snakecase(value: String) -> String {
    separate_words(&value, '_')
}

/// Convert to kebab-case
pub fn kebabcase(value: String) -> String {
    separate_words(&value, '-')
}

fn separate_words(value: &str, sep: char) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let mut prev_lower = false;

    for ch in value.chars() {
        if ch == ' ' || ch == '-' || ch == '_' {
            out.push(sep);
            prev_lower = false;
        } else if ch.is_uppercase() {
            if prev_lower {
                out.push(sep);
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_numeric();
        }
    }

    out
}
