use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Bounds of a [`crate::cache::StreamCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CacheConfig {
    pub maximum_size: usize,
    pub expire_after_write: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            maximum_size: 10_000,
            expire_after_write: Duration::from_secs(10 * 60),
        }
    }
}

fn invalid(message: String) -> Error {
    Error::InvalidOperation(format!("cache config: {message}"))
}

fn parse_duration(value: &str) -> Result<Duration> {
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| invalid(format!("duration `{value}` has no unit")))?;
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| invalid(format!("bad duration `{value}`")))?;
    let millis_per_unit = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        other => return Err(invalid(format!("unknown duration unit `{other}`"))),
    };
    amount
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| invalid(format!("duration `{value}` overflows")))
}

/// Parses comma-separated `key=value` pairs, e.g. `maximumSize=10000,expireAfterWrite=10m`.
/// Keys that are not given keep their defaults.
impl FromStr for CacheConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut config = CacheConfig::default();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected key=value, got `{pair}`")))?;
            match key.trim() {
                "maximumSize" => {
                    config.maximum_size = value
                        .trim()
                        .parse()
                        .map_err(|_| invalid(format!("bad maximumSize `{value}`")))?;
                }
                "expireAfterWrite" => config.expire_after_write = parse_duration(value.trim())?,
                other => return Err(invalid(format!("unknown key `{other}`"))),
            }
        }
        Ok(config)
    }
}

impl fmt::Display for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "maximumSize={},expireAfterWrite={}ms",
            self.maximum_size,
            self.expire_after_write.as_millis()
        )
    }
}
