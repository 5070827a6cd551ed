//! Snapshots, recommendations and export formats.

use super::samples::{ResponseTimeStats, TimeWindow};
use super::MetricsCollector;
use crate::cache::MemoryStats;
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;
use vista_core::{VistaError, VistaResult};

/// Statistics for one aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub window: TimeWindow,
    pub operations: u64,
    pub throughput_per_sec: f64,
    pub average_response_ms: f64,
    pub p95_response_ms: f64,
}

/// Point-in-time view of every counter and window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
    pub errors: u64,
    pub total_operations: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub error_rate: f64,
    pub windows: Vec<WindowStats>,
    pub cache_types: BTreeMap<String, ResponseTimeStats>,
    pub last_reset: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationCategory {
    Performance,
    Reliability,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    High,
    Medium,
    Low,
}

/// Advisory tuning hint. Nothing acts on these automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    pub priority: RecommendationPriority,
    pub message: String,
    pub action: String,
}

/// Output format for [`MetricsCollector::export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Prometheus,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = VistaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "prometheus" | "prom" => Ok(Self::Prometheus),
            "csv" => Ok(Self::Csv),
            other => Err(VistaError::serialization(
                "metrics export",
                format!("unknown format '{}'", other),
            )),
        }
    }
}

impl MetricsCollector {
    /// Tuning hints from the current counters and optional backend memory stats.
    pub fn generate_recommendations(&self, memory: Option<&MemoryStats>) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();
        let config = self.config();

        let reads = self.hits() + self.misses();
        let hit_rate = self.hit_rate();
        if reads > 0 && hit_rate < config.hit_rate_floor {
            recommendations.push(Recommendation {
                category: RecommendationCategory::Performance,
                priority: RecommendationPriority::High,
                message: format!(
                    "Cache hit rate is {:.2}%, below the {:.2}% target",
                    hit_rate, config.hit_rate_floor
                ),
                action: "Increase TTLs for stable views or warm them ahead of demand".to_string(),
            });
        }

        let error_rate = self.error_rate();
        if error_rate > config.error_rate_ceiling {
            recommendations.push(Recommendation {
                category: RecommendationCategory::Reliability,
                priority: RecommendationPriority::High,
                message: format!("Cache error rate is {:.2}%", error_rate),
                action: "Check backend connectivity and operation timeouts".to_string(),
            });
        }

        if let Some(memory) = memory {
            if memory.fragmentation_ratio > config.fragmentation_ceiling {
                recommendations.push(Recommendation {
                    category: RecommendationCategory::Memory,
                    priority: RecommendationPriority::Medium,
                    message: format!(
                        "Memory fragmentation ratio is {:.2}",
                        memory.fragmentation_ratio
                    ),
                    action: "Schedule a backend restart or enable active defragmentation"
                        .to_string(),
                });
            }
        }

        recommendations
    }

    pub fn export(&self, format: ExportFormat) -> VistaResult<String> {
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&self.snapshot())
                .map_err(|e| VistaError::serialization("metrics export", e)),
            ExportFormat::Prometheus => self.export_prometheus(),
            ExportFormat::Csv => Ok(self.export_csv()),
        }
    }

    fn export_prometheus(&self) -> VistaResult<String> {
        self.refresh_gauges();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry().gather(), &mut buffer)
            .map_err(|e| VistaError::serialization("metrics export", e))?;
        String::from_utf8(buffer).map_err(|e| VistaError::serialization("metrics export", e))
    }

    fn export_csv(&self) -> String {
        let snapshot = self.snapshot();
        let timestamp = snapshot.timestamp.to_rfc3339();
        let realtime = snapshot
            .windows
            .iter()
            .find(|w| w.window == TimeWindow::Realtime)
            .map(|w| w.throughput_per_sec)
            .unwrap_or(0.0);

        let rows: [(&str, String, &str); 9] = [
            ("hit_rate", snapshot.hit_rate.to_string(), "percent"),
            ("miss_rate", snapshot.miss_rate.to_string(), "percent"),
            ("error_rate", snapshot.error_rate.to_string(), "percent"),
            ("throughput", realtime.to_string(), "ops/sec"),
            ("total_operations", snapshot.total_operations.to_string(), "count"),
            ("hits", snapshot.hits.to_string(), "count"),
            ("misses", snapshot.misses.to_string(), "count"),
            ("writes", snapshot.writes.to_string(), "count"),
            ("deletes", snapshot.deletes.to_string(), "count"),
        ];

        let mut csv = String::from("Metric,Value,Unit,Timestamp\n");
        for (metric, value, unit) in rows {
            let _ = writeln!(csv, "{},{},{},{}", metric, value, unit, timestamp);
        }
        csv
    }
}
