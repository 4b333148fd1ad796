//! Planner: turns the top diagnosis plus its simulation into a concrete,
//! cooldown- and budget-checked `ActionPlan`.

use crate::config::RegulatorConfig;
use crate::models::{
    ActionDirection, ActionPlan, Diagnosis, DecisionResult, EconomyMetrics, ParamConstraint,
    ParameterScope, RollbackCondition, RollbackDirection, SimulationResult,
};
use crate::registry::ParameterRegistry;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Planned targets closer to current than this are dropped as no-ops.
const MIN_MEANINGFUL_CHANGE: f64 = 0.001;
/// Rollback floor: satisfaction watch never goes below this.
const ROLLBACK_SATISFACTION_FLOOR: f64 = 20.0;
/// Slack ticks added past the estimated lag before the watch arms.
const ROLLBACK_ARM_SLACK: u64 = 3;

/// Why the planner declined to produce a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanRejection {
    NoCandidate,
    TypeCooldown,
    ParamCooldown,
    Locked,
    SimulationNotImproving,
    SimulationNewProblems,
    ComplexityBudget,
    NegligibleChange,
}

impl PlanRejection {
    /// Decision-log classification: simulation failures get their own
    /// result, locks theirs, everything else reads as a cooldown skip.
    pub fn decision_result(&self) -> DecisionResult {
        match self {
            PlanRejection::SimulationNotImproving | PlanRejection::SimulationNewProblems => {
                DecisionResult::SkippedSimulationFailed
            }
            PlanRejection::Locked => DecisionResult::SkippedLocked,
            _ => DecisionResult::SkippedCooldown,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            PlanRejection::NoCandidate => "no registered parameter matches the suggested type",
            PlanRejection::TypeCooldown => "parameter type and scope are on cooldown",
            PlanRejection::ParamCooldown => "parameter is on cooldown",
            PlanRejection::Locked => "parameter is locked by the operator",
            PlanRejection::SimulationNotImproving => "simulation projects no net improvement",
            PlanRejection::SimulationNewProblems => "simulation projects new principle violations",
            PlanRejection::ComplexityBudget => "active plan budget is exhausted",
            PlanRejection::NegligibleChange => "planned change is below the meaningful minimum",
        }
    }
}

#[derive(Debug, Default)]
pub struct Planner {
    /// Concrete parameter key -> last applied tick.
    param_cooldowns: HashMap<String, u64>,
    /// "type@system/currency" -> last applied tick.
    type_cooldowns: HashMap<String, u64>,
    active_plan_count: usize,
}

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_plan_count(&self) -> usize {
        self.active_plan_count
    }

    /// A key is on cooldown iff `current_tick − last_applied < cooldown`.
    pub fn is_param_on_cooldown(&self, key: &str, tick: u64, cooldown_ticks: u64) -> bool {
        self.param_cooldowns
            .get(key)
            .is_some_and(|last| tick.saturating_sub(*last) < cooldown_ticks)
    }

    fn is_type_on_cooldown(
        &self,
        param_type: &str,
        scope: Option<&ParameterScope>,
        tick: u64,
        cooldown_ticks: u64,
    ) -> bool {
        self.type_cooldowns
            .get(&type_scope_key(param_type, scope))
            .is_some_and(|last| tick.saturating_sub(*last) < cooldown_ticks)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn plan(
        &self,
        diagnosis: &Diagnosis,
        metrics: &EconomyMetrics,
        simulation: &SimulationResult,
        params: &HashMap<String, f64>,
        config: &RegulatorConfig,
        registry: &ParameterRegistry,
        locked_params: &HashSet<String>,
        constraints: &HashMap<String, ParamConstraint>,
    ) -> Result<ActionPlan, PlanRejection> {
        let action = &diagnosis.suggested_action;
        let tick = metrics.tick;

        let candidate = registry
            .resolve(&action.parameter_type, action.scope.as_ref())
            .ok_or(PlanRejection::NoCandidate)?;
        let key = candidate.key.clone();

        if self.is_type_on_cooldown(
            &action.parameter_type,
            action.scope.as_ref(),
            tick,
            config.cooldown_ticks,
        ) {
            return Err(PlanRejection::TypeCooldown);
        }
        if self.is_param_on_cooldown(&key, tick, config.cooldown_ticks) {
            return Err(PlanRejection::ParamCooldown);
        }
        if locked_params.contains(&key) {
            return Err(PlanRejection::Locked);
        }
        if !simulation.net_improvement {
            return Err(PlanRejection::SimulationNotImproving);
        }
        if !simulation.no_new_problems {
            return Err(PlanRejection::SimulationNewProblems);
        }
        if self.active_plan_count >= config.complexity_budget_max {
            return Err(PlanRejection::ComplexityBudget);
        }

        let current_value = candidate
            .current_value
            .or_else(|| params.get(&key).copied())
            .or(action.absolute_value)
            .unwrap_or(1.0);

        let magnitude = action
            .magnitude
            .unwrap_or(0.10)
            .min(config.thresholds.max_adjustment_percent);

        let mut target_value = match (action.direction, action.absolute_value) {
            (ActionDirection::Set, Some(absolute)) => absolute,
            (ActionDirection::Decrease, _) => current_value * (1.0 - magnitude),
            _ => current_value * (1.0 + magnitude),
        };

        if let Some(constraint) = constraints.get(&key) {
            target_value = target_value.clamp(constraint.min, constraint.max);
        }

        if (target_value - current_value).abs() < MIN_MEANINGFUL_CHANGE {
            return Err(PlanRejection::NegligibleChange);
        }

        let scope = candidate.scope.clone().or_else(|| action.scope.clone());
        let rollback_condition = RollbackCondition {
            metric: "avgSatisfaction".to_string(),
            direction: RollbackDirection::Below,
            threshold: ROLLBACK_SATISFACTION_FLOOR.max(metrics.avg_satisfaction - 10.0),
            check_after_tick: tick + diagnosis.estimated_lag + ROLLBACK_ARM_SLACK,
        };

        Ok(ActionPlan {
            id: Uuid::new_v4().to_string(),
            diagnosis: diagnosis.clone(),
            parameter: key,
            scope,
            current_value,
            target_value,
            max_change_percent: magnitude,
            cooldown_ticks: config.cooldown_ticks,
            rollback_condition,
            simulation_result: simulation.clone(),
            estimated_lag: diagnosis.estimated_lag,
            applied_at: None,
        })
    }

    /// Records both cooldowns and bumps the active-plan count.
    pub fn record_applied(&mut self, plan: &ActionPlan, tick: u64) {
        self.param_cooldowns.insert(plan.parameter.clone(), tick);
        self.type_cooldowns.insert(
            type_scope_key(
                &plan.diagnosis.suggested_action.parameter_type,
                plan.diagnosis.suggested_action.scope.as_ref(),
            ),
            tick,
        );
        self.active_plan_count += 1;
    }

    pub fn record_rolled_back(&mut self) {
        self.active_plan_count = self.active_plan_count.saturating_sub(1);
    }

    pub fn record_settled(&mut self) {
        self.active_plan_count = self.active_plan_count.saturating_sub(1);
    }
}

fn type_scope_key(param_type: &str, scope: Option<&ParameterScope>) -> String {
    let system = scope.and_then(|s| s.system.as_deref()).unwrap_or("");
    let currency = scope.and_then(|s| s.currency.as_deref()).unwrap_or("");
    format!("{param_type}@{system}/{currency}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlowImpact, RegisteredParameter, SuggestedAction};

    fn diagnosis(action: SuggestedAction) -> Diagnosis {
        Diagnosis {
            principle_id: "P3".into(),
            principle_name: "Faucets Balance Sinks".into(),
            category: "flow".into(),
            severity: 7,
            evidence: serde_json::json!({}),
            suggested_action: action,
            confidence: 0.8,
            estimated_lag: 5,
            tick: 100,
        }
    }

    fn fee_action() -> SuggestedAction {
        SuggestedAction {
            parameter_type: "fee".into(),
            direction: ActionDirection::Increase,
            magnitude: Some(0.10),
            absolute_value: None,
            scope: None,
            reasoning: "tap outpacing sink".into(),
        }
    }

    fn good_simulation() -> SimulationResult {
        SimulationResult {
            iterations: 100,
            forward_ticks: 20,
            p10_satisfaction: 60.0,
            p50_satisfaction: 70.0,
            mean_satisfaction: 70.0,
            confidence_interval: (65.0, 75.0),
            estimated_effect_tick: 105,
            overshoot_risk: 0.0,
            net_improvement: true,
            no_new_problems: true,
            p50_net_flow_by_currency: HashMap::new(),
            p50_gini_by_currency: HashMap::new(),
        }
    }

    fn registry_with_fee() -> ParameterRegistry {
        let mut registry = ParameterRegistry::new();
        registry.register(&RegisteredParameter {
            key: "market_fee".into(),
            param_type: "fee".into(),
            flow_impact: FlowImpact::Sink,
            scope: None,
            current_value: Some(2.0),
            description: None,
        });
        registry
    }

    fn metrics_at(tick: u64) -> EconomyMetrics {
        let mut m = EconomyMetrics::empty();
        m.tick = tick;
        m.avg_satisfaction = 70.0;
        m
    }

    fn plan_with(
        planner: &Planner,
        config: &RegulatorConfig,
        registry: &ParameterRegistry,
        simulation: &SimulationResult,
        locked: &HashSet<String>,
    ) -> Result<ActionPlan, PlanRejection> {
        planner.plan(
            &diagnosis(fee_action()),
            &metrics_at(100),
            simulation,
            &HashMap::new(),
            config,
            registry,
            locked,
            &HashMap::new(),
        )
    }

    #[test]
    fn produces_plan_with_rollback_condition() {
        let planner = Planner::new();
        let config = RegulatorConfig::default();
        let plan = plan_with(
            &planner,
            &config,
            &registry_with_fee(),
            &good_simulation(),
            &HashSet::new(),
        )
        .unwrap();

        assert_eq!(plan.parameter, "market_fee");
        assert_eq!(plan.current_value, 2.0);
        assert!((plan.target_value - 2.2).abs() < 1e-9);
        assert_eq!(plan.rollback_condition.metric, "avgSatisfaction");
        assert_eq!(plan.rollback_condition.direction, RollbackDirection::Below);
        assert_eq!(plan.rollback_condition.threshold, 60.0);
        assert_eq!(plan.rollback_condition.check_after_tick, 108);
        assert!(plan.applied_at.is_none());
    }

    #[test]
    fn rollback_threshold_floors_at_twenty() {
        let planner = Planner::new();
        let config = RegulatorConfig::default();
        let mut metrics = metrics_at(100);
        metrics.avg_satisfaction = 22.0;
        let plan = planner
            .plan(
                &diagnosis(fee_action()),
                &metrics,
                &good_simulation(),
                &HashMap::new(),
                &config,
                &registry_with_fee(),
                &HashSet::new(),
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(plan.rollback_condition.threshold, 20.0);
    }

    #[test]
    fn rejects_on_failed_simulation() {
        let planner = Planner::new();
        let config = RegulatorConfig::default();

        let mut not_improving = good_simulation();
        not_improving.net_improvement = false;
        assert_eq!(
            plan_with(&planner, &config, &registry_with_fee(), &not_improving, &HashSet::new()),
            Err(PlanRejection::SimulationNotImproving)
        );

        let mut new_problems = good_simulation();
        new_problems.no_new_problems = false;
        assert_eq!(
            plan_with(&planner, &config, &registry_with_fee(), &new_problems, &HashSet::new()),
            Err(PlanRejection::SimulationNewProblems)
        );
    }

    #[test]
    fn rejects_locked_and_missing_parameters() {
        let planner = Planner::new();
        let config = RegulatorConfig::default();

        let locked: HashSet<String> = HashSet::from(["market_fee".to_string()]);
        assert_eq!(
            plan_with(&planner, &config, &registry_with_fee(), &good_simulation(), &locked),
            Err(PlanRejection::Locked)
        );

        let empty = ParameterRegistry::new();
        assert_eq!(
            plan_with(&planner, &config, &empty, &good_simulation(), &HashSet::new()),
            Err(PlanRejection::NoCandidate)
        );
    }

    #[test]
    fn cooldowns_block_and_then_expire() {
        let mut planner = Planner::new();
        let config = RegulatorConfig::default();
        let registry = registry_with_fee();

        let plan = plan_with(&planner, &config, &registry, &good_simulation(), &HashSet::new())
            .unwrap();
        planner.record_applied(&plan, 100);
        assert_eq!(planner.active_plan_count(), 1);

        // Tick 100 + 14 < cooldown 15: still blocked (type cooldown hits first).
        let mut metrics = metrics_at(114);
        metrics.avg_satisfaction = 70.0;
        let blocked = planner.plan(
            &diagnosis(fee_action()),
            &metrics,
            &good_simulation(),
            &HashMap::new(),
            &config,
            &registry,
            &HashSet::new(),
            &HashMap::new(),
        );
        assert_eq!(blocked, Err(PlanRejection::TypeCooldown));

        // Tick 115: cooldown exactly elapsed.
        let metrics = metrics_at(115);
        assert!(planner
            .plan(
                &diagnosis(fee_action()),
                &metrics,
                &good_simulation(),
                &HashMap::new(),
                &config,
                &registry,
                &HashSet::new(),
                &HashMap::new(),
            )
            .is_ok());
    }

    #[test]
    fn complexity_budget_caps_active_plans() {
        let mut planner = Planner::new();
        let mut config = RegulatorConfig::default();
        config.complexity_budget_max = 1;
        config.cooldown_ticks = 0;
        let registry = registry_with_fee();

        let plan = plan_with(&planner, &config, &registry, &good_simulation(), &HashSet::new())
            .unwrap();
        planner.record_applied(&plan, 100);

        assert_eq!(
            plan_with(&planner, &config, &registry, &good_simulation(), &HashSet::new()),
            Err(PlanRejection::ComplexityBudget)
        );

        planner.record_rolled_back();
        assert!(plan_with(&planner, &config, &registry, &good_simulation(), &HashSet::new()).is_ok());
    }

    #[test]
    fn set_direction_uses_absolute_value_and_constraints_clamp() {
        let planner = Planner::new();
        let config = RegulatorConfig::default();
        let registry = registry_with_fee();

        let mut action = fee_action();
        action.direction = ActionDirection::Set;
        action.absolute_value = Some(9.0);
        let constraints = HashMap::from([(
            "market_fee".to_string(),
            ParamConstraint { min: 0.5, max: 5.0 },
        )]);
        let plan = planner
            .plan(
                &diagnosis(action),
                &metrics_at(100),
                &good_simulation(),
                &HashMap::new(),
                &config,
                &registry,
                &HashSet::new(),
                &constraints,
            )
            .unwrap();
        assert_eq!(plan.target_value, 5.0);
    }

    #[test]
    fn negligible_change_is_rejected() {
        let planner = Planner::new();
        let config = RegulatorConfig::default();
        let registry = registry_with_fee();

        let mut action = fee_action();
        action.direction = ActionDirection::Set;
        action.absolute_value = Some(2.0); // equals current value
        assert_eq!(
            planner.plan(
                &diagnosis(action),
                &metrics_at(100),
                &good_simulation(),
                &HashMap::new(),
                &config,
                &registry,
                &HashSet::new(),
                &HashMap::new(),
            ),
            Err(PlanRejection::NegligibleChange)
        );
    }

    #[test]
    fn magnitude_is_capped_by_max_adjustment() {
        let planner = Planner::new();
        let config = RegulatorConfig::default();
        let registry = registry_with_fee();

        let mut action = fee_action();
        action.magnitude = Some(0.5);
        let plan = planner
            .plan(
                &diagnosis(action),
                &metrics_at(100),
                &good_simulation(),
                &HashMap::new(),
                &config,
                &registry,
                &HashSet::new(),
                &HashMap::new(),
            )
            .unwrap();
        // Capped at 0.15: 2.0 * 1.15.
        assert!((plan.target_value - 2.3).abs() < 1e-9);
        assert_eq!(plan.max_change_percent, 0.15);
    }

    #[test]
    fn fallback_current_value_chain() {
        let planner = Planner::new();
        let config = RegulatorConfig::default();

        // Registry entry without a current value; params mirror provides it.
        let mut registry = ParameterRegistry::new();
        registry.register(&RegisteredParameter {
            key: "market_fee".into(),
            param_type: "fee".into(),
            flow_impact: FlowImpact::Sink,
            scope: None,
            current_value: None,
            description: None,
        });
        let params = HashMap::from([("market_fee".to_string(), 4.0)]);
        let plan = planner
            .plan(
                &diagnosis(fee_action()),
                &metrics_at(100),
                &good_simulation(),
                &params,
                &config,
                &registry,
                &HashSet::new(),
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(plan.current_value, 4.0);

        // Nothing known anywhere: defaults to 1.0.
        let plan = planner
            .plan(
                &diagnosis(fee_action()),
                &metrics_at(100),
                &good_simulation(),
                &HashMap::new(),
                &config,
                &registry,
                &HashSet::new(),
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(plan.current_value, 1.0);
    }
}
