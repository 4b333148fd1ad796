//! Diagnoser: runs the ordered principle registry over a metrics snapshot.
//!
//! Violations come back sorted by severity, then confidence, then
//! registration order. A check that panics is contained and treated as
//! not-violated for that principle.

use crate::config::Thresholds;
use crate::models::{Diagnosis, EconomyMetrics, PrincipleResult};
use crate::principles::Principle;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Default estimated lag, in ticks, when a principle does not provide one.
const DEFAULT_ESTIMATED_LAG: u64 = 5;

/// Descriptor surfaced by the transport's principle listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipleInfo {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
}

pub struct Diagnoser {
    principles: Vec<Box<dyn Principle>>,
}

impl Diagnoser {
    pub fn new(principles: Vec<Box<dyn Principle>>) -> Self {
        Self { principles }
    }

    pub fn add(&mut self, principle: Box<dyn Principle>) {
        self.principles.push(principle);
    }

    /// Removes a principle by id; returns whether anything was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.principles.len();
        self.principles.retain(|p| p.id() != id);
        self.principles.len() != before
    }

    pub fn len(&self) -> usize {
        self.principles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principles.is_empty()
    }

    pub fn info(&self) -> Vec<PrincipleInfo> {
        self.principles
            .iter()
            .map(|p| PrincipleInfo {
                id: p.id().to_string(),
                name: p.name().to_string(),
                category: p.category().to_string(),
                description: p.description().to_string(),
            })
            .collect()
    }

    /// Runs every check and returns the violations, most severe first, ties
    /// broken by confidence and then registration order.
    pub fn diagnose(&self, metrics: &EconomyMetrics, thresholds: &Thresholds) -> Vec<Diagnosis> {
        let mut diagnoses: Vec<Diagnosis> = Vec::new();

        for principle in &self.principles {
            let result =
                catch_unwind(AssertUnwindSafe(|| principle.check(metrics, thresholds)));
            let result = match result {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        principle = principle.id(),
                        "principle check panicked; treating as not violated"
                    );
                    PrincipleResult::Ok
                }
            };

            if let PrincipleResult::Violated {
                severity,
                evidence,
                suggested_action,
                confidence,
                estimated_lag,
            } = result
            {
                diagnoses.push(Diagnosis {
                    principle_id: principle.id().to_string(),
                    principle_name: principle.name().to_string(),
                    category: principle.category().to_string(),
                    severity: severity.clamp(1, 10),
                    evidence,
                    suggested_action,
                    confidence: confidence.clamp(0.0, 1.0),
                    estimated_lag: estimated_lag.unwrap_or(DEFAULT_ESTIMATED_LAG),
                    tick: metrics.tick,
                });
            }
        }

        // Stable sort keeps registration order for exact ties.
        diagnoses.sort_by(|a, b| {
            b.severity.cmp(&a.severity).then(
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        diagnoses
    }

    /// Ids of principles violated on this snapshot, for set comparisons.
    pub fn violated_ids(
        &self,
        metrics: &EconomyMetrics,
        thresholds: &Thresholds,
    ) -> std::collections::BTreeSet<String> {
        self.diagnose(metrics, thresholds)
            .into_iter()
            .map(|d| d.principle_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionDirection, SuggestedAction};
    use crate::principles::PrincipleDef;

    fn violated(severity: u8, confidence: f64) -> PrincipleResult {
        PrincipleResult::Violated {
            severity,
            evidence: serde_json::json!({}),
            suggested_action: SuggestedAction {
                parameter_type: "fee".into(),
                direction: ActionDirection::Increase,
                magnitude: None,
                absolute_value: None,
                scope: None,
                reasoning: "test".into(),
            },
            confidence,
            estimated_lag: None,
        }
    }

    fn def(
        id: &'static str,
        check_fn: fn(&EconomyMetrics, &Thresholds) -> PrincipleResult,
    ) -> Box<dyn Principle> {
        Box::new(PrincipleDef {
            id,
            name: id,
            category: "test",
            description: "test principle",
            check_fn,
        })
    }

    fn sev3_conf_low(_: &EconomyMetrics, _: &Thresholds) -> PrincipleResult {
        violated(3, 0.5)
    }

    fn sev9(_: &EconomyMetrics, _: &Thresholds) -> PrincipleResult {
        violated(9, 0.6)
    }

    fn sev3_conf_high(_: &EconomyMetrics, _: &Thresholds) -> PrincipleResult {
        violated(3, 0.9)
    }

    fn panicking(_: &EconomyMetrics, _: &Thresholds) -> PrincipleResult {
        panic!("bad check")
    }

    fn never(_: &EconomyMetrics, _: &Thresholds) -> PrincipleResult {
        PrincipleResult::Ok
    }

    #[test]
    fn orders_by_severity_then_confidence_then_registration() {
        let diagnoser = Diagnoser::new(vec![
            def("low", sev3_conf_low),
            def("big", sev9),
            def("confident", sev3_conf_high),
            def("low2", sev3_conf_low),
        ]);
        let out = diagnoser.diagnose(&EconomyMetrics::empty(), &Thresholds::default());
        let ids: Vec<&str> = out.iter().map(|d| d.principle_id.as_str()).collect();
        assert_eq!(ids, vec!["big", "confident", "low", "low2"]);
    }

    #[test]
    fn panicking_check_is_contained() {
        let diagnoser = Diagnoser::new(vec![def("boom", panicking), def("big", sev9)]);
        let out = diagnoser.diagnose(&EconomyMetrics::empty(), &Thresholds::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].principle_id, "big");
    }

    #[test]
    fn add_and_remove_at_runtime() {
        let mut diagnoser = Diagnoser::new(vec![def("quiet", never)]);
        assert_eq!(diagnoser.len(), 1);

        diagnoser.add(def("big", sev9));
        assert_eq!(diagnoser.len(), 2);
        assert_eq!(
            diagnoser
                .diagnose(&EconomyMetrics::empty(), &Thresholds::default())
                .len(),
            1
        );

        assert!(diagnoser.remove("big"));
        assert!(!diagnoser.remove("big"));
        assert!(diagnoser
            .diagnose(&EconomyMetrics::empty(), &Thresholds::default())
            .is_empty());
    }

    #[test]
    fn default_lag_fills_in() {
        let diagnoser = Diagnoser::new(vec![def("big", sev9)]);
        let out = diagnoser.diagnose(&EconomyMetrics::empty(), &Thresholds::default());
        assert_eq!(out[0].estimated_lag, 5);
    }
}
