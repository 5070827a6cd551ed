//! Time-of-day warming plans.

use serde::{Deserialize, Serialize};
use std::fmt;
use vista_core::{CacheTier, EntityKind};

/// Business period a local hour falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    /// 06:00 to 10:59
    Morning,
    /// 11:00 to 14:59
    Lunch,
    /// 17:00 to 21:59
    Dinner,
    /// 22:00 to 05:59
    Night,
}

impl TimeBucket {
    /// Bucket for a local hour. The gaps (15–16) have no plan.
    pub fn for_hour(hour: u32) -> Option<Self> {
        match hour {
            6..=10 => Some(Self::Morning),
            11..=14 => Some(Self::Lunch),
            17..=21 => Some(Self::Dinner),
            22..=23 | 0..=5 => Some(Self::Night),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Night => "night",
        }
    }

    /// What to warm during this bucket.
    pub fn plan(self) -> Vec<PlanStep> {
        match self {
            Self::Morning => vec![PlanStep::views(
                EntityKind::Restaurant,
                &["dashboard", "summary"],
                CacheTier::Warm,
            )],
            Self::Lunch => vec![PlanStep::all(EntityKind::Menu, CacheTier::Hot)],
            Self::Dinner => vec![
                PlanStep::all(EntityKind::Menu, CacheTier::Hot),
                PlanStep::views(EntityKind::Restaurant, &["orders"], CacheTier::Hot),
            ],
            Self::Night => vec![PlanStep::views(
                EntityKind::Restaurant,
                &["analytics"],
                CacheTier::Cold,
            )],
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of an entity's views to warm.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WarmScope {
    #[default]
    All,
    /// Only views whose first segment after the id is listed
    Views(Vec<String>),
}

impl WarmScope {
    pub fn views(names: &[&str]) -> Self {
        Self::Views(names.iter().map(|n| n.to_string()).collect())
    }

    pub fn includes(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Views(names) => key
                .split(':')
                .nth(2)
                .is_some_and(|view| names.iter().any(|n| n == view)),
        }
    }
}

/// One kind of entity to warm at a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub kind: EntityKind,
    pub scope: WarmScope,
    pub tier: CacheTier,
}

impl PlanStep {
    fn all(kind: EntityKind, tier: CacheTier) -> Self {
        Self {
            kind,
            scope: WarmScope::All,
            tier,
        }
    }

    fn views(kind: EntityKind, names: &[&str], tier: CacheTier) -> Self {
        Self {
            kind,
            scope: WarmScope::views(names),
            tier,
        }
    }
}
