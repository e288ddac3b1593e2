//! Environment variable helpers used by the configuration layer.
//!
//! ```ignore
//! use slotring_core::env::{env_get, env_get_bool};
//!
//! let buf_size: usize = env_get("SLR_BUF_SIZE", 2048);
//! let mitigation = env_get_bool("SLR_MITIGATION", true);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, or return `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if set and valid.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean: "1", "true", "yes", "on" (case-insensitive) are true,
/// "0", "false", "no", "off" are false, anything else is `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Microsecond duration.
#[inline]
pub fn env_get_us(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key).map(Duration::from_micros).unwrap_or(default)
}
