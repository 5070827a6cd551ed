//! Environment helpers shared by the per-component configs.
//!
//! Every component config offers `Default`, `with_*` setters and a
//! `from_env()` built on these helpers. Variables use the `VISTA_` prefix.

use std::str::FromStr;
use std::time::Duration;

/// Parse `name` from the environment, falling back to `default`.
pub fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean flag; anything other than `false`/`0`/`no`/`off` counts as set.
pub fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| !matches!(s.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off"))
        .unwrap_or(default)
}

pub fn env_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(name, default.as_secs()))
}

pub fn env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(name, default.as_millis() as u64))
}
