//! Layered values with deep merge, cascade lookup and environment export

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Layered string -> value mapping shared by every stage of a workflow.
///
/// Values are built up from explicit CLI pairs, template files and the
/// workflow's own `values` block. Merging is deep for sub-maps and
/// last-writer-wins for leaves, so override precedence is simply the
/// order in which layers are appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Default for Values {
    fn default() -> Self {
        Self::new()
    }
}

impl Values {
    /// Create an empty values map
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Parse values from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self(value))
    }

    /// Read additional key/value mappings from a YAML file
    pub fn from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let data = std::fs::read(path.as_ref())?;
        self.from_bytes(&data)
    }

    /// Read additional key/value mappings from a byte slice
    pub fn from_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let overlay: JsonValue = serde_yaml::from_slice(data)?;
        self.append(&Values(overlay));
        Ok(())
    }

    /// Render a file with the provided renderer and merge the parsed result.
    ///
    /// The renderer is passed as a closure so this crate does not depend on
    /// the template engine; callers hand in whatever helper set they carry.
    pub fn from_template<P, F>(&mut self, path: P, render: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: FnOnce(&Path, &Values) -> Result<Vec<u8>>,
    {
        let out = render(path.as_ref(), self)?;
        self.from_bytes(&out)
    }

    /// Deep-merge another values map into this one.
    ///
    /// Sub-maps recurse; everything else (scalars, lists) is overwritten
    /// by the overlay.
    pub fn append(&mut self, overlay: &Values) {
        // an empty document parses to null; merging it is a no-op
        if overlay.0.is_null() {
            return;
        }
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Get a value by dotted path (e.g. "stage1.namespace")
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    /// Set a value by dotted path, creating intermediate maps as needed
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let parts: Vec<&str> = path.split('.').collect();
        set_nested(&mut self.0, &parts, value);
    }

    /// Check whether no values have been collected
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Resolve a field preferring explicit, then qualified, then generic.
    ///
    /// Returns `current` if non-empty, else `values[key][field]`, else
    /// `values[field]` (when it is a string), else empty. The chosen value
    /// is written back under `key.field` so later lookups are stable;
    /// calling cascade twice yields the same answer.
    pub fn cascade(&mut self, current: &str, key: &str, field: &str) -> String {
        let qualified = format!("{}.{}", key, field);

        let chosen = if !current.is_empty() {
            current.to_string()
        } else if let Some(found) = self.get(&qualified).and_then(|v| v.as_str()) {
            found.to_string()
        } else if let Some(found) = self.0.get(field).and_then(|v| v.as_str()) {
            found.to_string()
        } else {
            String::new()
        };

        if !chosen.is_empty() {
            self.set(&qualified, JsonValue::String(chosen.clone()));
        }
        chosen
    }

    /// Flatten into `KEY=VALUE` strings for environment export.
    ///
    /// Nested map keys are joined with `_`; lists are JSON-encoded.
    pub fn to_slice(&self) -> Vec<String> {
        let mut out = Vec::new();
        flatten("", &self.0, &mut |key, value| {
            out.push(format!("{}={}", key, value));
        });
        out
    }

    /// Print `PREFIX_KEY=VALUE` lines to standard output
    pub fn to_env(&self, prefix: &str) {
        flatten(prefix, &self.0, &mut |key, value| {
            println!("{}={}", key, value);
        });
    }
}

/// Deep merge two JSON values: objects recurse, leaves overwrite
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(value);
    }
    match value {
        JsonValue::Object(map) => map
            .get(path[0])
            .and_then(|v| get_nested(v, &path[1..])),
        _ => None,
    }
}

fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    if path.is_empty() {
        *value = new_value;
        return;
    }

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }
    let map = value
        .as_object_mut()
        .expect("value was just replaced with an object");

    if path.len() == 1 {
        map.insert(path[0].to_string(), new_value);
    } else {
        let entry = map
            .entry(path[0].to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
        set_nested(entry, &path[1..], new_value);
    }
}

/// Walk a value depth-first, handing leaf entries to the visitor with
/// `_`-joined keys
fn flatten(prefix: &str, value: &JsonValue, visit: &mut impl FnMut(&str, String)) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                let joined = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}_{}", prefix, key)
                };
                flatten(&joined, child, visit);
            }
        }
        JsonValue::Null => visit(prefix, String::new()),
        JsonValue::String(s) => visit(prefix, s.clone()),
        JsonValue::Array(_) => {
            visit(prefix, serde_json::to_string(value).unwrap_or_default())
        }
        other => visit(prefix, other.to_string()),
    }
}

/// Parse `--value KEY=VALUE` arguments into a values map.
///
/// Dotted keys nest; scalars are typed (bool, number) with a string
/// fallback.
pub fn parse_value_args(args: &[String]) -> Result<Values> {
    let mut values = Values::new();

    for arg in args {
        let (key, val) = arg.split_once('=').ok_or_else(|| CoreError::InvalidValue {
            message: format!("invalid --value format '{}', expected KEY=VALUE", arg),
        })?;

        let json_value = if val == "true" {
            JsonValue::Bool(true)
        } else if val == "false" {
            JsonValue::Bool(false)
        } else if let Ok(num) = val.parse::<i64>() {
            JsonValue::Number(num.into())
        } else {
            JsonValue::String(val.to_string())
        };

        values.set(key, json_value);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_merge() {
        let mut base = Values::from_yaml(
            r#"
image:
  repository: nginx
  tag: "1.0"
replicas: 1
"#,
        )
        .unwrap();

        let overlay = Values::from_yaml(
            r#"
image:
  tag: "2.0"
replicas: 3
"#,
        )
        .unwrap();

        base.append(&overlay);

        assert_eq!(base.get("image.repository").unwrap(), "nginx");
        assert_eq!(base.get("image.tag").unwrap(), "2.0");
        assert_eq!(base.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_append_empty_is_identity() {
        let mut left = Values::from_yaml("a: {b: 1}\nc: two").unwrap();
        let mut right = left.clone();

        left.append(&Values::new());
        assert_eq!(
            serde_json::to_string(&left.0).unwrap(),
            serde_json::to_string(&right.0).unwrap()
        );

        // leaves take the overlay value outright
        right.append(&Values::from_yaml("c: three").unwrap());
        assert_eq!(right.get("c").unwrap(), "three");
        assert_eq!(right.get("a.b").unwrap(), 1);
    }

    #[test]
    fn test_cascade_prefers_current() {
        let mut values = Values::from_yaml("stage1: {namespace: ns1}\nnamespace: default").unwrap();
        assert_eq!(values.cascade("explicit", "stage1", "namespace"), "explicit");
        // back-written for later lookups
        assert_eq!(values.get("stage1.namespace").unwrap(), "explicit");
    }

    #[test]
    fn test_cascade_qualified_then_generic() {
        let mut values = Values::from_yaml("stage1: {namespace: ns1}\nnamespace: default").unwrap();
        assert_eq!(values.cascade("", "stage1", "namespace"), "ns1");
        assert_eq!(values.cascade("", "stage2", "namespace"), "default");
        // stage2 lookup is now stable even if the generic key changes
        values.set("namespace", JsonValue::String("elsewhere".into()));
        assert_eq!(values.cascade("", "stage2", "namespace"), "default");
    }

    #[test]
    fn test_cascade_missing_is_empty() {
        let mut values = Values::new();
        assert_eq!(values.cascade("", "stage1", "namespace"), "");
        assert!(values.get("stage1.namespace").is_none());
    }

    #[test]
    fn test_cascade_idempotent() {
        let mut values = Values::from_yaml("namespace: default").unwrap();
        let first = values.cascade("", "app", "namespace");
        let second = values.cascade("", "app", "namespace");
        assert_eq!(first, second);
    }

    #[test]
    fn test_to_slice_flattens_with_underscores() {
        let values = Values::from_yaml(
            r#"
release: api
db:
  host: postgres
  port: 5432
"#,
        )
        .unwrap();

        let mut slice = values.to_slice();
        slice.sort();
        assert_eq!(
            slice,
            vec![
                "db_host=postgres".to_string(),
                "db_port=5432".to_string(),
                "release=api".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_value_args() {
        let args = vec![
            "image.tag=v2".to_string(),
            "replicas=5".to_string(),
            "debug=true".to_string(),
        ];

        let values = parse_value_args(&args).unwrap();
        assert_eq!(values.get("image.tag").unwrap(), "v2");
        assert_eq!(values.get("replicas").unwrap(), 5);
        assert_eq!(values.get("debug").unwrap(), true);

        assert!(parse_value_args(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_from_template() {
        let mut values = Values::from_yaml("region: eu-west").unwrap();
        values
            .from_template("inline.yaml", |_, current| {
                let region = current.get("region").and_then(|v| v.as_str()).unwrap();
                Ok(format!("bucket: backups-{}", region).into_bytes())
            })
            .unwrap();

        assert_eq!(values.get("bucket").unwrap(), "backups-eu-west");
    }

    #[test]
    fn test_from_file_missing_is_error() {
        let mut values = Values::new();
        assert!(values.from_file("/definitely/not/here.yaml").is_err());
    }
}
