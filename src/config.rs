//! Per-pool configuration, parsed from a string-keyed option map.
//!
//! Grounded on the teacher's `options.rs` (`parse_duration` for
//! duration-shaped values, `Error::config`-style messages naming the bad
//! key) adapted from zval-typed input to the plain string map this crate's
//! callers supply, per `SPEC_FULL.md` §6.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_CACHESIZE: usize = 1024 * 1024;
const DEFAULT_MAXHANDLES: u32 = 0;
const DEFAULT_MAXROWS: u64 = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CHECKINTERVAL_SECS: u64 = 600;
const MIN_CHECKINTERVAL_SECS: u64 = 30;

/// Parsed, validated options for one pool. See `SPEC_FULL.md` §6 for the
/// recognized keys and their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub cachesize: usize,
    /// `0` means unlimited concurrency via thread-local handles.
    pub maxhandles: u32,
    pub maxrows: u64,
    pub maxidle: Option<Duration>,
    pub maxopen: Option<Duration>,
    pub maxqueries: u64,
    pub timeout: Duration,
    pub checkinterval: Duration,
    pub default: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cachesize: DEFAULT_CACHESIZE,
            maxhandles: DEFAULT_MAXHANDLES,
            maxrows: DEFAULT_MAXROWS,
            maxidle: None,
            maxopen: None,
            maxqueries: 0,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            checkinterval: Duration::from_secs(DEFAULT_CHECKINTERVAL_SECS),
            default: false,
        }
    }
}

impl PoolConfig {
    /// Parses a pool's options from a string-keyed map. Unrecognized keys
    /// are rejected, matching `api::config`'s `Err` for an unknown option
    /// (`SPEC_FULL.md` §9 Decision).
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in options {
            match key.as_str() {
                "cachesize" => config.cachesize = parse_usize(key, value)?,
                "maxhandles" => config.maxhandles = parse_u32(key, value)?,
                "maxrows" => config.maxrows = parse_u64(key, value)?,
                "maxidle" => config.maxidle = parse_optional_duration(key, value)?,
                "maxopen" => config.maxopen = parse_optional_duration(key, value)?,
                "maxqueries" => config.maxqueries = parse_u64(key, value)?,
                "timeout" => config.timeout = parse_duration(key, value)?,
                "checkinterval" => {
                    let d = parse_duration(key, value)?;
                    if d.as_secs() < MIN_CHECKINTERVAL_SECS {
                        return Err(Error::protocol(format!(
                            "checkinterval must be at least {MIN_CHECKINTERVAL_SECS}s"
                        )));
                    }
                    config.checkinterval = d;
                }
                "default" => config.default = parse_bool(key, value)?,
                other => {
                    return Err(Error::protocol(format!("unknown pool option {other:?}")));
                }
            }
        }

        Ok(config)
    }
}

/// The single value a `config(pool, option)` read can return, per
/// `SPEC_FULL.md` §9 Decision: absent options surface as `Ok(None)`, an
/// unknown option name as `Err`, and values round-trip through their
/// natural Rust type rather than a single stringly-typed shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Int(i64),
    Bool(bool),
    Duration(Duration),
}

/// Every option name `from_options`/`get` recognize, used to distinguish
/// "unknown option" from "known option, no value set" in the public
/// `config(pool, opt)` accessor (`SPEC_FULL.md` §9 Decision).
pub const RECOGNIZED_OPTIONS: &[&str] = &[
    "cachesize",
    "maxhandles",
    "maxrows",
    "maxidle",
    "maxopen",
    "maxqueries",
    "timeout",
    "checkinterval",
    "default",
];

impl PoolConfig {
    /// Reads back a single option's current value by name, for the public
    /// `config(pool, opt)` accessor. Returns `None` both when `option` is
    /// unrecognized and when it is recognized but unset; callers that need
    /// to tell those apart should consult [`RECOGNIZED_OPTIONS`] first.
    #[must_use]
    pub fn get(&self, option: &str) -> Option<ConfigValue> {
        match option {
            "cachesize" => Some(ConfigValue::Int(self.cachesize as i64)),
            "maxhandles" => Some(ConfigValue::Int(i64::from(self.maxhandles))),
            "maxrows" => Some(ConfigValue::Int(self.maxrows as i64)),
            "maxidle" => self.maxidle.map(ConfigValue::Duration),
            "maxopen" => self.maxopen.map(ConfigValue::Duration),
            "maxqueries" => Some(ConfigValue::Int(self.maxqueries as i64)),
            "timeout" => Some(ConfigValue::Duration(self.timeout)),
            "checkinterval" => Some(ConfigValue::Duration(self.checkinterval)),
            "default" => Some(ConfigValue::Bool(self.default)),
            _ => None,
        }
    }

    /// Writes a single option's value, for the public `config(pool, opt,
    /// new)` write path. Rejects an unrecognized name and a value whose
    /// variant doesn't match the option's natural type.
    pub fn set(&mut self, option: &str, value: ConfigValue) -> Result<()> {
        match (option, value) {
            ("cachesize", ConfigValue::Int(v)) => self.cachesize = non_negative(option, v)? as usize,
            ("maxhandles", ConfigValue::Int(v)) => self.maxhandles = non_negative(option, v)? as u32,
            ("maxrows", ConfigValue::Int(v)) => self.maxrows = non_negative(option, v)? as u64,
            ("maxidle", ConfigValue::Duration(d)) => self.maxidle = if d.is_zero() { None } else { Some(d) },
            ("maxopen", ConfigValue::Duration(d)) => self.maxopen = if d.is_zero() { None } else { Some(d) },
            ("maxqueries", ConfigValue::Int(v)) => self.maxqueries = non_negative(option, v)? as u64,
            ("timeout", ConfigValue::Duration(d)) => self.timeout = d,
            ("checkinterval", ConfigValue::Duration(d)) => {
                if d.as_secs() < MIN_CHECKINTERVAL_SECS {
                    return Err(Error::protocol(format!(
                        "checkinterval must be at least {MIN_CHECKINTERVAL_SECS}s"
                    )));
                }
                self.checkinterval = d;
            }
            ("default", ConfigValue::Bool(v)) => self.default = v,
            (name, _) if RECOGNIZED_OPTIONS.contains(&name) => {
                return Err(Error::protocol(format!("{name}: wrong value type for this option")));
            }
            (other, _) => return Err(Error::protocol(format!("unknown pool option {other:?}"))),
        }
        Ok(())
    }
}

fn non_negative(key: &str, value: i64) -> Result<i64> {
    if value < 0 {
        return Err(Error::protocol(format!("{key}: must be a non-negative integer")));
    }
    Ok(value)
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    parse_duration::parse(value).map_err(|e| Error::protocol(format!("{key}: {e}")))
}

fn parse_optional_duration(key: &str, value: &str) -> Result<Option<Duration>> {
    let d = parse_duration(key, value)?;
    Ok(if d.is_zero() { None } else { Some(d) })
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| Error::protocol(format!("{key}: must be a non-negative integer")))
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| Error::protocol(format!("{key}: must be a non-negative integer")))
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| Error::protocol(format!("{key}: must be a non-negative integer")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(Error::protocol(format!("{key}: must be a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = PoolConfig::from_options(&HashMap::new()).unwrap();
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn parses_duration_strings_and_seconds() {
        let mut opts = HashMap::new();
        opts.insert("maxidle".to_string(), "5 min".to_string());
        opts.insert("timeout".to_string(), "30".to_string());
        let config = PoolConfig::from_options(&opts).unwrap();
        assert_eq!(config.maxidle, Some(Duration::from_secs(300)));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_unknown_option() {
        let mut opts = HashMap::new();
        opts.insert("bogus".to_string(), "1".to_string());
        assert!(PoolConfig::from_options(&opts).is_err());
    }

    #[test]
    fn rejects_checkinterval_below_minimum() {
        let mut opts = HashMap::new();
        opts.insert("checkinterval".to_string(), "10".to_string());
        assert!(PoolConfig::from_options(&opts).is_err());
    }

    #[test]
    fn get_round_trips_int_option() {
        let mut opts = HashMap::new();
        opts.insert("maxrows".to_string(), "500".to_string());
        let config = PoolConfig::from_options(&opts).unwrap();
        assert_eq!(config.get("maxrows"), Some(ConfigValue::Int(500)));
        assert_eq!(config.get("bogus"), None);
    }

    #[test]
    fn set_rejects_unknown_option() {
        let mut config = PoolConfig::default();
        assert!(config.set("bogus", ConfigValue::Int(1)).is_err());
    }

    #[test]
    fn set_rejects_mismatched_value_type() {
        let mut config = PoolConfig::default();
        assert!(config.set("maxrows", ConfigValue::Bool(true)).is_err());
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut config = PoolConfig::default();
        config.set("maxrows", ConfigValue::Int(42)).unwrap();
        assert_eq!(config.get("maxrows"), Some(ConfigValue::Int(42)));
    }

    #[test]
    fn set_rejects_checkinterval_below_minimum() {
        let mut config = PoolConfig::default();
        let result = config.set("checkinterval", ConfigValue::Duration(Duration::from_secs(10)));
        assert!(result.is_err());
    }
}
