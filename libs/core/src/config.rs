//! Environment overlay helpers shared by the config structs of each crate.

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` from the environment, ignoring unset or malformed values.
pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Read a millisecond count from the environment.
pub fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
