//! YAML parsing into `serde_json::Value` using yaml-rust2
//!
//! Templates and scenario catalogs are YAML on disk but are handled as JSON
//! values internally so they can be deserialized into typed resources.

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// Error type for YAML parsing
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct YamlError(String);

/// Parse a single-document YAML string.
///
/// Resource templates describe exactly one object, so a stream with more
/// than one document is rejected. Empty input yields `Value::Null`.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    let mut docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    match docs.len() {
        0 => Ok(Value::Null),
        1 => yaml_to_json(docs.remove(0)),
        n => Err(YamlError(format!("expected one YAML document, found {n}"))),
    }
}

/// Parse a single-document YAML string straight into a typed value
pub fn from_yaml<T: DeserializeOwned>(input: &str) -> Result<T, YamlError> {
    let value = parse_yaml(input)?;
    serde_json::from_value(value).map_err(|e| YamlError(e.to_string()))
}

fn yaml_key(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        other => Err(YamlError(format!("unsupported YAML key: {other:?}"))),
    }
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError(e.to_string()))?;
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Hash(map) => {
            let mut object = Map::with_capacity(map.len());
            for (k, v) in map {
                object.insert(yaml_key(k)?, yaml_to_json(v)?);
            }
            Value::Object(object)
        }
        Yaml::Alias(_) => return Err(YamlError("YAML aliases not supported".to_string())),
        Yaml::BadValue => return Err(YamlError("bad YAML value".to_string())),
    })
}
