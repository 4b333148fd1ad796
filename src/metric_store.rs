//! Bounded multi-resolution time-series store for metrics snapshots.
//!
//! Three ring buffers: `fine` receives every tick, `medium` and `coarse`
//! receive downsampled snapshots on their window boundaries. Snapshots are
//! never mutated once recorded.

use crate::models::EconomyMetrics;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    Fine,
    Medium,
    Coarse,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Fine => "fine",
            Resolution::Medium => "medium",
            Resolution::Coarse => "coarse",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricStoreConfig {
    pub fine_capacity: usize,
    pub medium_window: u64,
    pub medium_capacity: usize,
    pub coarse_window: u64,
    pub coarse_capacity: usize,
}

impl Default for MetricStoreConfig {
    fn default() -> Self {
        Self {
            fine_capacity: 600,
            medium_window: 10,
            medium_capacity: 600,
            coarse_window: 100,
            coarse_capacity: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub tick: u64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricQuery {
    pub metric: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeries {
    pub metric: String,
    pub resolution: Resolution,
    pub points: Vec<MetricPoint>,
}

#[derive(Debug, Clone)]
pub struct MetricStore {
    config: MetricStoreConfig,
    fine: VecDeque<EconomyMetrics>,
    medium: VecDeque<EconomyMetrics>,
    coarse: VecDeque<EconomyMetrics>,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(MetricStoreConfig::default())
    }
}

impl MetricStore {
    pub fn new(mut config: MetricStoreConfig) -> Self {
        config.medium_window = config.medium_window.max(1);
        config.coarse_window = config.coarse_window.max(1);
        Self {
            fine: VecDeque::with_capacity(config.fine_capacity),
            medium: VecDeque::with_capacity(config.medium_capacity),
            coarse: VecDeque::with_capacity(config.coarse_capacity),
            config,
        }
    }

    pub fn record(&mut self, metrics: &EconomyMetrics) {
        push_bounded(&mut self.fine, metrics.clone(), self.config.fine_capacity);
        if metrics.tick % self.config.medium_window == 0 {
            push_bounded(
                &mut self.medium,
                metrics.clone(),
                self.config.medium_capacity,
            );
        }
        if metrics.tick % self.config.coarse_window == 0 {
            push_bounded(
                &mut self.coarse,
                metrics.clone(),
                self.config.coarse_capacity,
            );
        }
    }

    /// Newest snapshot at the resolution, or an empty snapshot if none.
    pub fn latest(&self, resolution: Resolution) -> EconomyMetrics {
        self.buffer(resolution)
            .back()
            .cloned()
            .unwrap_or_else(EconomyMetrics::empty)
    }

    pub fn len(&self, resolution: Resolution) -> usize {
        self.buffer(resolution).len()
    }

    pub fn is_empty(&self) -> bool {
        self.fine.is_empty()
    }

    pub fn query(&self, query: &MetricQuery) -> MetricSeries {
        let resolution = query.resolution.unwrap_or_default();
        let from = query.from.unwrap_or(0);
        let to = query.to.unwrap_or(u64::MAX);

        let points = self
            .buffer(resolution)
            .iter()
            .filter(|m| m.tick >= from && m.tick <= to)
            .filter_map(|m| {
                metric_value(m, &query.metric).map(|value| MetricPoint {
                    tick: m.tick,
                    value,
                })
            })
            .collect();

        MetricSeries {
            metric: query.metric.clone(),
            resolution,
            points,
        }
    }

    fn buffer(&self, resolution: Resolution) -> &VecDeque<EconomyMetrics> {
        match resolution {
            Resolution::Fine => &self.fine,
            Resolution::Medium => &self.medium,
            Resolution::Coarse => &self.coarse,
        }
    }
}

fn push_bounded(buf: &mut VecDeque<EconomyMetrics>, metrics: EconomyMetrics, capacity: usize) {
    if buf.len() >= capacity {
        buf.pop_front();
    }
    buf.push_back(metrics);
}

/// Resolves a dotted camelCase key path against a metrics snapshot, walking
/// nested maps (`"giniByCurrency.gold"`, `"customMetrics.retention"`).
///
/// Returns `None` for unknown paths and non-finite leaves, which the rollback
/// monitor treats as a fail-safe trigger.
pub fn metric_value(metrics: &EconomyMetrics, path: &str) -> Option<f64> {
    let root = serde_json::to_value(metrics).ok()?;
    let mut node = &root;
    for segment in path.split('.') {
        node = node.get(segment)?;
    }
    node.as_f64().filter(|v| v.is_finite())
}
