//! Typed access to builder arguments
//!
//! Predicate, filter, limiter and key-function builders receive their
//! configuration as a loosely typed map. [`Args`] keeps the raw values private
//! and hands out typed values, failing uniformly with
//! [`Error::MissingArgument`] or [`Error::InvalidArgument`].

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Argument map handed to a builder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Args(Map<String, Value>);

/// Reference to a nested builder: a name plus its own arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Spec {
    /// Builder name
    pub name: String,
    /// Builder arguments
    pub args: Args,
}

impl Spec {
    /// Spec with no arguments
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Args::new(),
        }
    }
}

impl Args {
    /// Empty argument map
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from an arbitrary JSON value; `null` is treated as empty
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Ok(Self(map)),
            _ => Err(Error::invalid("args", "an object")),
        }
    }

    /// Add an argument, builder style
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Whether an argument is present and not null
    pub fn contains(&self, name: &str) -> bool {
        self.raw(name).is_some()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn raw(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.raw(name).ok_or_else(|| Error::missing(name))
    }

    /// Required string argument
    pub fn get_str(&self, name: &str) -> Result<&str> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| Error::invalid(name, "a string"))
    }

    /// Optional string argument
    pub fn get_opt_str(&self, name: &str) -> Result<Option<&str>> {
        match self.raw(name) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| Error::invalid(name, "a string")),
        }
    }

    /// Required non-negative integer argument
    pub fn get_u64(&self, name: &str) -> Result<u64> {
        let value = self.require(name)?;
        if let Some(n) = value.as_u64() {
            return Ok(n);
        }
        match value.as_f64() {
            Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
            _ => Err(Error::invalid(name, "a non-negative integer")),
        }
    }

    /// Required numeric argument
    pub fn get_f64(&self, name: &str) -> Result<f64> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| Error::invalid(name, "a number"))
    }

    /// Required list of strings; a single string is accepted as a one-element list
    pub fn get_string_list(&self, name: &str) -> Result<Vec<String>> {
        let expected = "a string or a non-empty list of strings";
        match self.require(name)? {
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| Error::invalid(name, expected))
                })
                .collect(),
            _ => Err(Error::invalid(name, expected)),
        }
    }

    /// Required duration: a humantime string (`"250ms"`) or integer nanoseconds
    pub fn get_duration(&self, name: &str) -> Result<Duration> {
        let expected = "a duration string or integer nanoseconds";
        match self.require(name)? {
            Value::String(s) => {
                humantime::parse_duration(s.trim()).map_err(|_| Error::invalid(name, expected))
            }
            Value::Number(n) => n
                .as_u64()
                .map(Duration::from_nanos)
                .ok_or_else(|| Error::invalid(name, expected)),
            _ => Err(Error::invalid(name, expected)),
        }
    }

    /// Required RFC 3339 timestamp, normalized to UTC
    pub fn get_datetime(&self, name: &str) -> Result<DateTime<Utc>> {
        let expected = "an RFC 3339 timestamp";
        let raw = self
            .require(name)?
            .as_str()
            .ok_or_else(|| Error::invalid(name, expected))?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| Error::invalid(name, expected))
    }

    /// Optional nested builder spec: either `"name"` or `{ name, args }`
    pub fn get_spec(&self, name: &str) -> Result<Option<Spec>> {
        let expected = "a builder name or an object with 'name' and 'args'";
        match self.raw(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(Spec::named(s.clone()))),
            Some(Value::Object(map)) => {
                let spec_name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid(name, expected))?;
                let args = match map.get("args") {
                    None => Args::new(),
                    Some(v) => Args::from_value(v.clone()).map_err(|_| Error::invalid(name, expected))?,
                };
                Ok(Some(Spec {
                    name: spec_name.to_string(),
                    args,
                }))
            }
            Some(_) => Err(Error::invalid(name, expected)),
        }
    }
}

impl From<Map<String, Value>> for Args {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Args {
        Args::from_value(value).unwrap()
    }

    #[test]
    fn test_missing_and_wrong_type() {
        let a = args(json!({ "rate": "fast" }));
        assert!(matches!(a.get_str("name"), Err(Error::MissingArgument { .. })));
        assert!(matches!(a.get_f64("rate"), Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let a = args(json!({ "name": null }));
        assert!(!a.contains("name"));
        assert_eq!(a.get_opt_str("name").unwrap(), None);
    }

    #[test]
    fn test_string_list_accepts_scalar() {
        let a = args(json!({ "one": "GET", "many": ["GET", "POST"], "empty": [] }));
        assert_eq!(a.get_string_list("one").unwrap(), vec!["GET"]);
        assert_eq!(a.get_string_list("many").unwrap(), vec!["GET", "POST"]);
        assert!(a.get_string_list("empty").is_err());
    }

    #[test]
    fn test_integers() {
        let a = args(json!({ "burst": 10, "float": 3.0, "neg": -1 }));
        assert_eq!(a.get_u64("burst").unwrap(), 10);
        assert_eq!(a.get_u64("float").unwrap(), 3);
        assert!(a.get_u64("neg").is_err());
    }

    #[test]
    fn test_durations() {
        let a = args(json!({ "text": "1m 5s", "nanos": 1_500_000_000u64, "bad": "soon" }));
        assert_eq!(a.get_duration("text").unwrap(), Duration::from_secs(65));
        assert_eq!(a.get_duration("nanos").unwrap(), Duration::from_millis(1500));
        assert!(a.get_duration("bad").is_err());
    }

    #[test]
    fn test_datetime_normalized_to_utc() {
        let a = args(json!({ "at": "2030-01-01T02:00:00+02:00" }));
        let at = a.get_datetime("at").unwrap();
        assert_eq!(at.to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_nested_spec() {
        let a = args(json!({
            "key": "ip",
            "limiter": { "name": "in-memory", "args": { "rate": 5 } },
            "broken": { "args": {} }
        }));
        assert_eq!(a.get_spec("key").unwrap(), Some(Spec::named("ip")));

        let limiter = a.get_spec("limiter").unwrap().unwrap();
        assert_eq!(limiter.name, "in-memory");
        assert_eq!(limiter.args.get_u64("rate").unwrap(), 5);

        assert!(a.get_spec("broken").is_err());
        assert_eq!(a.get_spec("absent").unwrap(), None);
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Args::from_value(json!([1, 2])).is_err());
        assert!(Args::from_value(Value::Null).unwrap().is_empty());
    }
}
