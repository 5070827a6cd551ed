//! Freshness tiers for cached views.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Cost/TTL tier a view is cached at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Hot,
    Warm,
    Cold,
    Archive,
}

impl CacheTier {
    pub const ALL: [CacheTier; 4] = [Self::Hot, Self::Warm, Self::Cold, Self::Archive];

    pub fn ttl(self) -> Duration {
        match self {
            Self::Hot => Duration::from_secs(5 * 60),
            Self::Warm => Duration::from_secs(30 * 60),
            Self::Cold => Duration::from_secs(6 * 60 * 60),
            Self::Archive => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Shortest tier whose TTL covers `ttl`.
    pub fn for_ttl(ttl: Duration) -> Self {
        Self::ALL
            .into_iter()
            .find(|tier| tier.ttl() >= ttl)
            .unwrap_or(Self::Archive)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "cold" => Ok(Self::Cold),
            "archive" => Ok(Self::Archive),
            other => Err(format!("unknown cache tier '{}'", other)),
        }
    }
}
