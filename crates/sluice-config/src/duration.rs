//! Serde codec for durations
//!
//! Accepts humantime strings (`"30s"`, `"1m 5s"`, `"250ms"`) or integer
//! nanoseconds. Serializes as a humantime string.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serializer};
use std::fmt;
use std::time::Duration;

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration string like \"30s\" or integer nanoseconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        humantime::parse_duration(v.trim())
            .map_err(|e| E::custom(format!("invalid duration '{}': {}", v, e)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        Ok(Duration::from_nanos(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        u64::try_from(v)
            .map(Duration::from_nanos)
            .map_err(|_| E::custom("duration must not be negative"))
    }
}

/// Serialize a duration as a humantime string
pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

/// Deserialize a duration from a string or integer nanoseconds
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    deserializer.deserialize_any(DurationVisitor)
}

/// Codec for `Option<Duration>`
pub mod option {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper(#[serde(with = "super")] Duration);

    /// Serialize an optional duration
    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional duration
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "super")]
        every: Duration,
        #[serde(default, with = "super::option", skip_serializing_if = "Option::is_none")]
        after: Option<Duration>,
    }

    #[test]
    fn test_humantime_strings() {
        let holder: Holder = serde_json::from_str(r#"{"every": "1m 5s", "after": "250ms"}"#).unwrap();
        assert_eq!(holder.every, Duration::from_secs(65));
        assert_eq!(holder.after, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_integer_nanoseconds() {
        let holder: Holder = serde_yaml::from_str("every: 10000000\n").unwrap();
        assert_eq!(holder.every, Duration::from_millis(10));
        assert_eq!(holder.after, None);

        let holder: Holder = toml::from_str("every = 1000").unwrap();
        assert_eq!(holder.every, Duration::from_micros(1));
    }

    #[test]
    fn test_invalid_values() {
        assert!(serde_json::from_str::<Holder>(r#"{"every": "soon"}"#).is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"every": -5}"#).is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let holder = Holder {
            every: Duration::from_secs(30),
            after: None,
        };
        assert_eq!(serde_json::to_string(&holder).unwrap(), r#"{"every":"30s"}"#);
    }
}
