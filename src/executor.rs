//! Executor: applies plans through the host adapter, tracks the active set,
//! and monitors rollback conditions each tick.

use crate::adapter::HostAdapter;
use crate::error::RegulatorError;
use crate::metric_store::metric_value;
use crate::models::{ActionPlan, EconomyMetrics, RollbackDirection};
use std::collections::HashMap;
use tracing::{info, warn};

/// Hard ceiling: any plan older than this many ticks past `appliedAt` is
/// force-settled regardless of its rollback condition, guaranteeing liveness
/// even for unreachable `checkAfterTick` values.
pub const ACTIVE_PLAN_TTL_TICKS: u64 = 200;

/// Disjoint outcome sets of one rollback sweep.
#[derive(Debug, Default)]
pub struct RollbackReport {
    pub rolled_back: Vec<ActionPlan>,
    pub settled: Vec<ActionPlan>,
}

#[derive(Default)]
pub struct Executor {
    active: HashMap<String, ActionPlan>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_plans(&self) -> impl Iterator<Item = &ActionPlan> {
        self.active.values()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, plan_id: &str) -> bool {
        self.active.contains_key(plan_id)
    }

    /// Stamps `appliedAt`, pushes the target through the adapter and takes
    /// ownership of the plan. An adapter failure leaves the active set
    /// untouched.
    pub async fn apply(
        &mut self,
        mut plan: ActionPlan,
        adapter: &dyn HostAdapter,
    ) -> Result<ActionPlan, RegulatorError> {
        plan.applied_at = Some(plan.diagnosis.tick);
        adapter
            .set_param(&plan.parameter, plan.target_value, plan.scope.as_ref())
            .await?;
        info!(
            plan = %plan.id,
            parameter = %plan.parameter,
            from = plan.current_value,
            to = plan.target_value,
            "plan applied"
        );
        self.active.insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }

    /// Evaluates every active plan against the fresh metrics snapshot.
    ///
    /// Order per plan: hard TTL, arming guard, metric resolution (missing or
    /// non-finite value rolls back fail-safe), threshold evaluation, then
    /// settlement-window expiry.
    pub async fn check_rollbacks(
        &mut self,
        metrics: &EconomyMetrics,
        adapter: &dyn HostAdapter,
        settlement_window_ticks: u64,
    ) -> RollbackReport {
        let tick = metrics.tick;
        let mut report = RollbackReport::default();

        let ids: Vec<String> = self.active.keys().cloned().collect();
        for id in ids {
            let plan = &self.active[&id];
            let applied_at = plan.applied_at.unwrap_or(0);

            if tick.saturating_sub(applied_at) > ACTIVE_PLAN_TTL_TICKS {
                let plan = self.active.remove(&id).expect("plan present");
                info!(plan = %plan.id, "plan force-settled past hard TTL");
                report.settled.push(plan);
                continue;
            }

            if tick < plan.rollback_condition.check_after_tick {
                continue;
            }

            let condition = &plan.rollback_condition;
            let watched = metric_value(metrics, &condition.metric);
            let should_roll_back = match watched {
                // Fail safe: an unobservable watch metric rolls the plan back.
                None => true,
                Some(value) => match condition.direction {
                    RollbackDirection::Below => value < condition.threshold,
                    RollbackDirection::Above => value > condition.threshold,
                },
            };

            if should_roll_back {
                let plan = self.active.remove(&id).expect("plan present");
                match adapter
                    .set_param(&plan.parameter, plan.current_value, plan.scope.as_ref())
                    .await
                {
                    Ok(()) => {
                        warn!(
                            plan = %plan.id,
                            parameter = %plan.parameter,
                            restored = plan.current_value,
                            metric = %plan.rollback_condition.metric,
                            "plan rolled back"
                        );
                    }
                    Err(err) => {
                        // Dropping the plan from tracking here is what keeps
                        // the executor from wedging on a dead adapter.
                        warn!(
                            plan = %plan.id,
                            error = %err,
                            "rollback set_param failed; plan removed from tracking"
                        );
                    }
                }
                report.rolled_back.push(plan);
                continue;
            }

            if tick >= applied_at + settlement_window_ticks {
                let plan = self.active.remove(&id).expect("plan present");
                info!(plan = %plan.id, parameter = %plan.parameter, "plan settled");
                report.settled.push(plan);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SimHostAdapter;
    use crate::models::{
        ActionDirection, Diagnosis, RollbackCondition, SimulationResult, SuggestedAction,
    };

    fn plan_at(tick: u64, check_after: u64) -> ActionPlan {
        ActionPlan {
            id: format!("plan-{tick}-{check_after}"),
            diagnosis: Diagnosis {
                principle_id: "P9".into(),
                principle_name: "Satisfaction Is Healthy".into(),
                category: "population".into(),
                severity: 6,
                evidence: serde_json::json!({}),
                suggested_action: SuggestedAction {
                    parameter_type: "reward".into(),
                    direction: ActionDirection::Increase,
                    magnitude: Some(0.1),
                    absolute_value: None,
                    scope: None,
                    reasoning: "test".into(),
                },
                confidence: 0.8,
                estimated_lag: 5,
                tick,
            },
            parameter: "daily_reward".into(),
            scope: None,
            current_value: 1.0,
            target_value: 1.15,
            max_change_percent: 0.15,
            cooldown_ticks: 15,
            rollback_condition: RollbackCondition {
                metric: "avgSatisfaction".into(),
                direction: RollbackDirection::Below,
                threshold: 30.0,
                check_after_tick: check_after,
            },
            simulation_result: SimulationResult {
                iterations: 100,
                forward_ticks: 20,
                p10_satisfaction: 60.0,
                p50_satisfaction: 70.0,
                mean_satisfaction: 70.0,
                confidence_interval: (65.0, 75.0),
                estimated_effect_tick: tick + 5,
                overshoot_risk: 0.0,
                net_improvement: true,
                no_new_problems: true,
                p50_net_flow_by_currency: HashMap::new(),
                p50_gini_by_currency: HashMap::new(),
            },
            estimated_lag: 5,
            applied_at: None,
        }
    }

    fn metrics_at(tick: u64, satisfaction: f64) -> EconomyMetrics {
        let mut m = EconomyMetrics::empty();
        m.tick = tick;
        m.avg_satisfaction = satisfaction;
        m
    }

    #[tokio::test]
    async fn apply_stamps_applied_at_and_tracks_plan() {
        let mut executor = Executor::new();
        let adapter = SimHostAdapter::default();
        let plan = executor.apply(plan_at(100, 110), &adapter).await.unwrap();

        assert_eq!(plan.applied_at, Some(100));
        assert!(executor.is_active(&plan.id));
        assert_eq!(executor.active_count(), 1);

        let calls = adapter.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].key, "daily_reward");
        assert_eq!(calls[0].value, 1.15);
    }

    #[tokio::test]
    async fn rollback_on_satisfaction_crash_restores_previous_value() {
        let mut executor = Executor::new();
        let adapter = SimHostAdapter::default();
        executor.apply(plan_at(100, 110), &adapter).await.unwrap();

        let report = executor
            .check_rollbacks(&metrics_at(120, 10.0), &adapter, 200)
            .await;
        assert_eq!(report.rolled_back.len(), 1);
        assert!(report.settled.is_empty());
        assert_eq!(executor.active_count(), 0);

        let last = adapter.last_call_for("daily_reward").unwrap();
        assert_eq!(last.value, 1.0);
    }

    #[tokio::test]
    async fn no_rollback_before_check_after_tick() {
        let mut executor = Executor::new();
        let adapter = SimHostAdapter::default();
        executor.apply(plan_at(100, 110), &adapter).await.unwrap();

        let report = executor
            .check_rollbacks(&metrics_at(105, 5.0), &adapter, 200)
            .await;
        assert!(report.rolled_back.is_empty());
        assert_eq!(executor.active_count(), 1);
    }

    #[tokio::test]
    async fn hard_ttl_settles_even_with_unreachable_watch() {
        let mut executor = Executor::new();
        let adapter = SimHostAdapter::default();
        executor.apply(plan_at(0, 99_999), &adapter).await.unwrap();

        let report = executor
            .check_rollbacks(&metrics_at(201, 70.0), &adapter, 200)
            .await;
        assert!(report.rolled_back.is_empty());
        assert_eq!(report.settled.len(), 1);
        assert_eq!(executor.active_count(), 0);
        // No extra adapter call on a settle.
        assert_eq!(adapter.calls().len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_watch_metric_rolls_back_fail_safe() {
        let mut executor = Executor::new();
        let adapter = SimHostAdapter::default();
        let mut plan = plan_at(100, 110);
        plan.rollback_condition.metric = "nonexistent.path".into();
        executor.apply(plan, &adapter).await.unwrap();

        let report = executor
            .check_rollbacks(&metrics_at(115, 90.0), &adapter, 200)
            .await;
        assert_eq!(report.rolled_back.len(), 1);
        assert_eq!(executor.active_count(), 0);
    }

    #[tokio::test]
    async fn settles_after_settlement_window() {
        let mut executor = Executor::new();
        let adapter = SimHostAdapter::default();
        executor.apply(plan_at(100, 110), &adapter).await.unwrap();

        // Healthy satisfaction, 50 ticks past apply with a 50-tick window.
        let report = executor
            .check_rollbacks(&metrics_at(150, 80.0), &adapter, 50)
            .await;
        assert_eq!(report.settled.len(), 1);
        assert!(report.rolled_back.is_empty());
        assert_eq!(executor.active_count(), 0);
    }

    #[tokio::test]
    async fn failed_rollback_write_still_drops_the_plan() {
        let mut executor = Executor::new();
        let adapter = SimHostAdapter::default();
        executor.apply(plan_at(100, 110), &adapter).await.unwrap();

        *adapter.fail_set_param.lock() = true;
        let report = executor
            .check_rollbacks(&metrics_at(120, 5.0), &adapter, 200)
            .await;
        assert_eq!(report.rolled_back.len(), 1);
        assert_eq!(executor.active_count(), 0);
    }

    #[tokio::test]
    async fn above_direction_triggers_on_high_values() {
        let mut executor = Executor::new();
        let adapter = SimHostAdapter::default();
        let mut plan = plan_at(100, 110);
        plan.rollback_condition.metric = "giniCoefficient".into();
        plan.rollback_condition.direction = RollbackDirection::Above;
        plan.rollback_condition.threshold = 0.6;
        executor.apply(plan, &adapter).await.unwrap();

        let mut metrics = metrics_at(115, 80.0);
        metrics.gini_coefficient = 0.75;
        let report = executor.check_rollbacks(&metrics, &adapter, 200).await;
        assert_eq!(report.rolled_back.len(), 1);
    }
}
