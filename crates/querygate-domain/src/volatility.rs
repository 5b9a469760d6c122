//! Volatility classes and time-to-live resolution.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How quickly an operation's data changes on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityClass {
    /// Reference data that practically never changes (24h).
    Static,
    /// Frequently changing data (5 minutes).
    Short,
    /// Moderately changing data (30 minutes).
    Medium,
    /// Slowly changing data (1 hour).
    Long,
}

impl VolatilityClass {
    /// Default time-to-live for this class.
    pub fn default_ttl(self) -> Duration {
        match self {
            VolatilityClass::Static => Duration::from_secs(24 * 60 * 60),
            VolatilityClass::Short => Duration::from_secs(5 * 60),
            VolatilityClass::Medium => Duration::from_secs(30 * 60),
            VolatilityClass::Long => Duration::from_secs(60 * 60),
        }
    }
}

/// How long a cache entry stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Entry expires once this much time has passed since it was stored.
    Expires(Duration),
    /// Entry stays until invalidated or evicted for space.
    Never,
}

impl TtlPolicy {
    pub fn from_secs(secs: u64) -> Self {
        TtlPolicy::Expires(Duration::from_secs(secs))
    }

    /// A zero TTL means the value should not be stored at all.
    pub fn is_zero(&self) -> bool {
        matches!(self, TtlPolicy::Expires(d) if d.is_zero())
    }
}

impl Serialize for TtlPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TtlPolicy::Expires(d) => serializer.serialize_u64(d.as_secs()),
            TtlPolicy::Never => serializer.serialize_str("never"),
        }
    }
}

// Accepts whole seconds (as a number or a numeric string, since environment
// overrides arrive as strings), "never", or null.
impl<'de> Deserialize<'de> for TtlPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TtlVisitor;

        impl<'de> Visitor<'de> for TtlVisitor {
            type Value = TtlPolicy;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number of seconds or \"never\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<TtlPolicy, E> {
                Ok(TtlPolicy::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<TtlPolicy, E> {
                u64::try_from(v)
                    .map(TtlPolicy::from_secs)
                    .map_err(|_| E::custom(format!("ttl cannot be negative: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TtlPolicy, E> {
                let trimmed = v.trim();
                if trimmed.eq_ignore_ascii_case("never") {
                    return Ok(TtlPolicy::Never);
                }
                trimmed
                    .parse::<u64>()
                    .map(TtlPolicy::from_secs)
                    .map_err(|_| E::custom(format!("invalid ttl: {v}")))
            }

            fn visit_none<E: de::Error>(self) -> Result<TtlPolicy, E> {
                Ok(TtlPolicy::Never)
            }

            fn visit_unit<E: de::Error>(self) -> Result<TtlPolicy, E> {
                Ok(TtlPolicy::Never)
            }
        }

        deserializer.deserialize_any(TtlVisitor)
    }
}

/// Resolves the TTL for an operation: explicit override first, then the
/// volatility class default.
#[derive(Debug, Clone, Default)]
pub struct TtlResolver {
    overrides: HashMap<String, TtlPolicy>,
}

impl TtlResolver {
    pub fn new(overrides: HashMap<String, TtlPolicy>) -> Self {
        Self { overrides }
    }

    /// Adds or replaces the override for one operation.
    pub fn with_override(mut self, operation: impl Into<String>, policy: TtlPolicy) -> Self {
        self.overrides.insert(operation.into(), policy);
        self
    }

    pub fn resolve(&self, operation: &str, class: VolatilityClass) -> TtlPolicy {
        self.overrides
            .get(operation)
            .copied()
            .unwrap_or_else(|| TtlPolicy::Expires(class.default_ttl()))
    }
}
