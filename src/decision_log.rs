//! Bounded, queryable log of pipeline decisions.
//!
//! Entries stay in chronological append order. Trimming is amortized: the
//! log only compacts once it grows past 1.5x `max_entries`, slicing back down
//! to the newest `max_entries`.

use crate::models::{DecisionEntry, DecisionResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct DecisionLog {
    entries: Vec<DecisionEntry>,
    max_entries: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionFilter {
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub result: Option<DecisionResult>,
    pub parameter: Option<String>,
    pub principle_id: Option<String>,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl DecisionLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_entries + max_entries / 2 + 1),
            max_entries: max_entries.max(1),
        }
    }

    pub fn record(&mut self, entry: DecisionEntry) {
        self.entries.push(entry);
        if self.entries.len() > self.max_entries + self.max_entries / 2 {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest `n` entries, newest first.
    pub fn latest(&self, n: usize) -> Vec<&DecisionEntry> {
        self.entries.iter().rev().take(n).collect()
    }

    pub fn query(&self, filter: &DecisionFilter) -> Vec<&DecisionEntry> {
        self.entries
            .iter()
            .filter(|e| filter.since.is_none_or(|t| e.tick >= t))
            .filter(|e| filter.until.is_none_or(|t| e.tick <= t))
            .filter(|e| filter.result.is_none_or(|r| e.result == r))
            .filter(|e| {
                filter.parameter.as_deref().is_none_or(|p| {
                    e.plan.as_ref().is_some_and(|plan| plan.parameter == p)
                })
            })
            .filter(|e| {
                filter
                    .principle_id
                    .as_deref()
                    .is_none_or(|id| e.diagnosis.principle_id == id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionDirection, Diagnosis, EconomyMetrics, SuggestedAction};
    use chrono::Utc;
    use std::time::Instant;

    fn entry(tick: u64, result: DecisionResult) -> DecisionEntry {
        DecisionEntry {
            id: format!("d-{tick}"),
            tick,
            timestamp: Utc::now(),
            diagnosis: Diagnosis {
                principle_id: "P3".into(),
                principle_name: "Faucets Balance Sinks".into(),
                category: "flow".into(),
                severity: 6,
                evidence: serde_json::json!({}),
                suggested_action: SuggestedAction {
                    parameter_type: "fee".into(),
                    direction: ActionDirection::Increase,
                    magnitude: None,
                    absolute_value: None,
                    scope: None,
                    reasoning: "tap outpacing sink".into(),
                },
                confidence: 0.8,
                estimated_lag: 5,
                tick,
            },
            plan: None,
            result,
            reasoning: "test".into(),
            metrics_snapshot: EconomyMetrics::empty(),
        }
    }

    #[test]
    fn trims_only_past_one_and_a_half_times_max() {
        let mut log = DecisionLog::new(10);
        for tick in 0..15 {
            log.record(entry(tick, DecisionResult::Applied));
        }
        // 15 == 1.5 * 10: still untrimmed.
        assert_eq!(log.len(), 15);

        log.record(entry(15, DecisionResult::Applied));
        assert_eq!(log.len(), 10);
        // Oldest surviving entry is tick 6.
        assert_eq!(log.query(&DecisionFilter::default())[0].tick, 6);
    }

    #[test]
    fn latest_is_reverse_chronological() {
        let mut log = DecisionLog::new(100);
        for tick in 0..5 {
            log.record(entry(tick, DecisionResult::Applied));
        }
        let latest = log.latest(3);
        let ticks: Vec<u64> = latest.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![4, 3, 2]);
    }

    #[test]
    fn query_filters_compose() {
        let mut log = DecisionLog::new(100);
        log.record(entry(5, DecisionResult::Applied));
        log.record(entry(10, DecisionResult::SkippedCooldown));
        log.record(entry(15, DecisionResult::Applied));

        let applied = log.query(&DecisionFilter {
            result: Some(DecisionResult::Applied),
            since: Some(6),
            ..Default::default()
        });
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].tick, 15);

        let by_principle = log.query(&DecisionFilter {
            principle_id: Some("P3".into()),
            ..Default::default()
        });
        assert_eq!(by_principle.len(), 3);
    }

    #[test]
    fn ten_thousand_inserts_stay_under_a_second() {
        let mut log = DecisionLog::new(1000);
        let template = entry(0, DecisionResult::Applied);
        let start = Instant::now();
        for tick in 0..10_000u64 {
            let mut e = template.clone();
            e.tick = tick;
            log.record(e);
        }
        assert!(start.elapsed().as_secs_f64() < 1.0);
        assert!(log.len() <= 1500);
    }
}
