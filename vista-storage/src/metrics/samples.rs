//! Rolling response-time samples and time windows.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Aggregation windows for rolling statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Realtime,
    Short,
    Medium,
    Long,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 4] = [Self::Realtime, Self::Short, Self::Medium, Self::Long];

    pub fn duration(self) -> Duration {
        match self {
            Self::Realtime => Duration::from_secs(60),
            Self::Short => Duration::from_secs(5 * 60),
            Self::Medium => Duration::from_secs(60 * 60),
            Self::Long => Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    millis: f64,
}

/// Bounded FIFO of timed samples.
#[derive(Debug, Clone)]
pub(crate) struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&mut self, millis: f64) {
        self.push_at(Instant::now(), millis);
    }

    pub(crate) fn push_at(&mut self, at: Instant, millis: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { at, millis });
        self.prune(at);
    }

    fn prune(&mut self, now: Instant) {
        let horizon = TimeWindow::Long.duration();
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > horizon {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Sample values recorded within `window` of `now`.
    pub(crate) fn within(&self, window: TimeWindow, now: Instant) -> Vec<f64> {
        let span = window.duration();
        self.samples
            .iter()
            .filter(|s| now.saturating_duration_since(s.at) <= span)
            .map(|s| s.millis)
            .collect()
    }

    /// When the newest sample was recorded.
    pub(crate) fn last_at(&self) -> Option<Instant> {
        self.samples.back().map(|s| s.at)
    }

    pub(crate) fn all(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.millis).collect()
    }

    pub(crate) fn mean(&self) -> Option<f64> {
        mean(&self.all())
    }
}

/// Summary of a set of response times.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseTimeStats {
    pub count: u64,
    pub average_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl ResponseTimeStats {
    pub(crate) fn from_samples(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(|a, b| a.total_cmp(b));
        Self {
            count: values.len() as u64,
            average_ms: round2(mean(&values).unwrap_or(0.0)),
            p50_ms: round2(percentile(&values, 50.0)),
            p95_ms: round2(percentile(&values, 95.0)),
            p99_ms: round2(percentile(&values, 99.0)),
            max_ms: round2(values[values.len() - 1]),
        }
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Nearest-rank percentile over sorted values.
pub(crate) fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
