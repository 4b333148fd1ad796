//! Controller: drives the five-stage pipeline once per tick and owns every
//! piece of regulator state.
//!
//! Cooperative single-threaded: the only suspension points are the adapter's
//! `get_state` and `set_param`. Everything else runs to completion inside
//! one `tick` call, so no internal locking is needed; the transport shell
//! serializes concurrent tick requests around the whole controller.

use crate::adapter::HostAdapter;
use crate::bus::{BusEvent, EventBus, HandlerOutcome};
use crate::config::{Mode, RegulatorConfig};
use crate::decision_log::DecisionLog;
use crate::diagnoser::Diagnoser;
use crate::error::RegulatorError;
use crate::executor::Executor;
use crate::metric_store::{MetricStore, Resolution};
use crate::models::{
    ActionPlan, DecisionEntry, DecisionResult, Diagnosis, EconomicEvent, EconomyMetrics,
    EconomyState, ParamConstraint, MAX_EVENT_METADATA_KEYS,
};
use crate::observer::Observer;
use crate::persona::PersonaTracker;
use crate::planner::Planner;
use crate::principles::default_principles;
use crate::registry::ParameterRegistry;
use crate::satisfaction::{SatisfactionConfig, SatisfactionEstimator};
use crate::simulator::Simulator;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// FIFO cap on buffered events between ticks.
const EVENT_BUFFER_CAP: usize = 10_000;

/// Outcome of one `tick` call, shaped for the transport response.
#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub health: f64,
    pub adjustments: Vec<ActionPlan>,
    pub alerts: Vec<Diagnosis>,
    pub rolled_back: Vec<ActionPlan>,
    pub settled: Vec<ActionPlan>,
    /// True when the tick was a no-op (not running, paused, observer failed).
    pub skipped: bool,
}

/// A recommendation awaiting operator approval (advisor mode).
#[derive(Debug, Clone)]
pub struct PendingDecision {
    pub decision_id: String,
    pub plan: ActionPlan,
    pub created_tick: u64,
}

pub struct Controller {
    config: RegulatorConfig,
    adapter: Arc<dyn HostAdapter>,
    observer: Observer,
    diagnoser: Diagnoser,
    simulator: Simulator,
    planner: Planner,
    executor: Executor,
    registry: ParameterRegistry,
    metric_store: MetricStore,
    decision_log: DecisionLog,
    satisfaction: SatisfactionEstimator,
    personas: PersonaTracker,
    bus: EventBus,
    event_buffer: VecDeque<EconomicEvent>,
    /// Host push channel, taken from the adapter once at construction.
    host_events: Option<tokio::sync::mpsc::UnboundedReceiver<EconomicEvent>>,
    /// Mirror of parameter values the regulator has written.
    params: HashMap<String, f64>,
    locked_params: HashSet<String>,
    constraints: HashMap<String, ParamConstraint>,
    pending: HashMap<String, PendingDecision>,
    is_running: bool,
    is_paused: bool,
    current_tick: u64,
}

impl Controller {
    pub fn new(config: RegulatorConfig, adapter: Arc<dyn HostAdapter>) -> Self {
        let mut registry = ParameterRegistry::new();
        for param in &config.parameters {
            registry.register(param);
        }
        if config.validate_registry {
            validate_registry(&registry, &config);
        }

        let diagnoser = Diagnoser::new(default_principles(config.dominant_roles.clone()));
        let observer = Observer::new(config.thresholds.blocked_satisfaction_threshold);
        let host_events = adapter.take_event_stream();

        Self {
            config,
            adapter,
            observer,
            diagnoser,
            simulator: Simulator::new(),
            planner: Planner::new(),
            executor: Executor::new(),
            registry,
            metric_store: MetricStore::default(),
            decision_log: DecisionLog::default(),
            satisfaction: SatisfactionEstimator::new(SatisfactionConfig::default()),
            personas: PersonaTracker::new(),
            bus: EventBus::new(),
            event_buffer: VecDeque::new(),
            host_events,
            params: HashMap::new(),
            locked_params: HashSet::new(),
            constraints: HashMap::new(),
            pending: HashMap::new(),
            is_running: true,
            is_paused: false,
            current_tick: 0,
        }
    }

    /// Replaces the Monte-Carlo RNG; used by tests for determinism.
    pub fn with_seeded_simulator(mut self, seed: u64) -> Self {
        self.simulator = Simulator::with_seed(seed);
        self
    }

    // ------------------------------------------------------------------
    // Lifecycle and ingestion
    // ------------------------------------------------------------------

    pub fn start(&mut self) {
        self.is_running = true;
    }

    pub fn stop(&mut self) {
        self.is_running = false;
    }

    pub fn pause(&mut self) {
        self.is_paused = true;
    }

    pub fn resume(&mut self) {
        self.is_paused = false;
    }

    pub fn is_running(&self) -> bool {
        self.is_running && !self.is_paused
    }

    /// Buffers one host event for the next tick. Oversized metadata drops
    /// the event; a full buffer evicts the oldest.
    pub fn ingest(&mut self, event: EconomicEvent) {
        if event.metadata.len() > MAX_EVENT_METADATA_KEYS {
            warn!(
                actor = %event.actor,
                keys = event.metadata.len(),
                "dropping event with oversized metadata"
            );
            return;
        }
        if self.event_buffer.len() >= EVENT_BUFFER_CAP {
            self.event_buffer.pop_front();
        }
        self.event_buffer.push_back(event);
    }

    pub fn buffered_events(&self) -> usize {
        self.event_buffer.len()
    }

    // ------------------------------------------------------------------
    // The tick pipeline
    // ------------------------------------------------------------------

    /// Runs one tick: observe, check rollbacks, diagnose, simulate, plan,
    /// execute. `state` may be pushed by the caller; otherwise it is pulled
    /// from the adapter.
    pub async fn tick(
        &mut self,
        state: Option<EconomyState>,
    ) -> Result<TickReport, RegulatorError> {
        if !self.is_running || self.is_paused {
            return Ok(TickReport {
                skipped: true,
                tick: self.current_tick,
                health: self.health(),
                ..Default::default()
            });
        }

        let mut state = match state {
            Some(state) => state,
            None => self.adapter.get_state().await?,
        };
        self.current_tick = state.tick;

        // Events the host pushed through the adapter channel join the ingest
        // buffer ahead of the drain.
        if let Some(mut stream) = self.host_events.take() {
            while let Ok(event) = stream.try_recv() {
                self.ingest(event);
            }
            self.host_events = Some(stream);
        }

        // Atomic drain: swap the buffer for a fresh one so a concurrently
        // ingested event lands in the next tick, never in limbo.
        let drained: Vec<EconomicEvent> =
            std::mem::take(&mut self.event_buffer).into_iter().collect();

        // Side-updates before observation.
        let persona_distribution = self.personas.update(&state, &drained);
        self.satisfaction.update(&state, &drained);
        if state.agent_satisfaction.is_none() {
            state.agent_satisfaction = Some(self.satisfaction.scores());
        }

        let mut metrics = match self.observer.compute(&state, &drained) {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!(error = %err, "observer failed; skipping tick");
                return Ok(TickReport {
                    skipped: true,
                    tick: self.current_tick,
                    health: self.health(),
                    ..Default::default()
                });
            }
        };
        metrics.persona_distribution = persona_distribution;
        self.metric_store.record(&metrics);

        let mut report = TickReport {
            tick: metrics.tick,
            health: health_score(&metrics),
            ..Default::default()
        };

        // Rollback sweep runs every tick, grace period or not.
        let adapter = self.adapter.clone();
        let rollback_report = self
            .executor
            .check_rollbacks(&metrics, adapter.as_ref(), self.config.settlement_window_ticks)
            .await;
        for plan in &rollback_report.rolled_back {
            self.planner.record_rolled_back();
            self.params
                .insert(plan.parameter.clone(), plan.current_value);
            self.registry
                .update_value(&plan.parameter, plan.current_value);
            self.bus.emit(&BusEvent::Rollback(plan.clone()));
            let entry = self.make_entry(
                plan.diagnosis.clone(),
                Some(plan.clone()),
                DecisionResult::RolledBack,
                format!(
                    "rolled back: {} crossed its rollback threshold",
                    plan.rollback_condition.metric
                ),
                &metrics,
            );
            self.decision_log.record(entry);
        }
        for _ in &rollback_report.settled {
            self.planner.record_settled();
        }
        report.rolled_back = rollback_report.rolled_back;
        report.settled = rollback_report.settled;

        if metrics.tick < self.config.grace_period {
            debug!(tick = metrics.tick, "inside grace period; observing only");
            return Ok(report);
        }
        if metrics.tick % self.config.check_interval.max(1) != 0 {
            return Ok(report);
        }

        let diagnoses = self
            .diagnoser
            .diagnose(&metrics, &self.config.thresholds);
        for diagnosis in &diagnoses {
            self.bus.emit(&BusEvent::Alert(diagnosis.clone()));
        }
        report.alerts = diagnoses.clone();

        let Some(top) = diagnoses.first() else {
            return Ok(report);
        };

        let iterations = self.config.thresholds.simulation_min_iterations.max(100);
        let simulation = self.simulator.simulate(
            &top.suggested_action,
            &metrics,
            &self.config.thresholds,
            iterations,
            self.config.thresholds.simulation_forward_ticks,
            &self.diagnoser,
            &self.registry,
        );

        let plan = match self.planner.plan(
            top,
            &metrics,
            &simulation,
            &self.params,
            &self.config,
            &self.registry,
            &self.locked_params,
            &self.constraints,
        ) {
            Ok(plan) => plan,
            Err(rejection) => {
                let entry = self.make_entry(
                    top.clone(),
                    None,
                    rejection.decision_result(),
                    rejection.reason().to_string(),
                    &metrics,
                );
                self.bus.emit(&BusEvent::Decision(entry.clone()));
                self.decision_log.record(entry);
                return Ok(report);
            }
        };

        if self.config.mode == Mode::Advisor {
            let entry = self.make_entry(
                top.clone(),
                Some(plan.clone()),
                DecisionResult::SkippedOverride,
                "advisor mode: awaiting external approval".to_string(),
                &metrics,
            );
            self.pending.insert(
                entry.id.clone(),
                PendingDecision {
                    decision_id: entry.id.clone(),
                    plan,
                    created_tick: metrics.tick,
                },
            );
            self.bus.emit(&BusEvent::Decision(entry.clone()));
            self.decision_log.record(entry);
            return Ok(report);
        }

        if self.bus.emit(&BusEvent::BeforeAction(plan.clone())) == HandlerOutcome::Veto {
            let entry = self.make_entry(
                top.clone(),
                Some(plan),
                DecisionResult::Rejected,
                "vetoed by beforeAction handler".to_string(),
                &metrics,
            );
            self.bus.emit(&BusEvent::Decision(entry.clone()));
            self.decision_log.record(entry);
            return Ok(report);
        }

        let applied = self.executor.apply(plan, adapter.as_ref()).await?;
        self.finish_apply(&applied, &metrics);
        report.adjustments.push(applied);

        Ok(report)
    }

    /// Post-apply bookkeeping shared by autonomous ticks and advisor
    /// approvals: mirrors, cooldowns, log, decision + after-action events.
    fn finish_apply(&mut self, plan: &ActionPlan, metrics: &EconomyMetrics) {
        self.params
            .insert(plan.parameter.clone(), plan.target_value);
        self.registry.update_value(&plan.parameter, plan.target_value);
        self.planner.record_applied(plan, metrics.tick);

        let entry = self.make_entry(
            plan.diagnosis.clone(),
            Some(plan.clone()),
            DecisionResult::Applied,
            plan.diagnosis.suggested_action.reasoning.clone(),
            metrics,
        );
        self.bus.emit(&BusEvent::Decision(entry.clone()));
        self.decision_log.record(entry);
        self.bus.emit(&BusEvent::AfterAction(plan.clone()));

        info!(
            parameter = %plan.parameter,
            target = plan.target_value,
            principle = %plan.diagnosis.principle_id,
            "adjustment applied"
        );
    }

    fn make_entry(
        &self,
        diagnosis: Diagnosis,
        plan: Option<ActionPlan>,
        result: DecisionResult,
        reasoning: String,
        metrics: &EconomyMetrics,
    ) -> DecisionEntry {
        DecisionEntry {
            id: Uuid::new_v4().to_string(),
            tick: metrics.tick,
            timestamp: Utc::now(),
            diagnosis,
            plan,
            result,
            reasoning,
            metrics_snapshot: metrics.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Advisor approvals
    // ------------------------------------------------------------------

    pub fn pending_decisions(&self) -> Vec<&PendingDecision> {
        let mut pending: Vec<&PendingDecision> = self.pending.values().collect();
        pending.sort_by_key(|p| p.created_tick);
        pending
    }

    /// Applies a pending advisor recommendation.
    pub async fn approve(&mut self, decision_id: &str) -> Result<ActionPlan, RegulatorError> {
        let pending = self.pending.remove(decision_id).ok_or_else(|| {
            RegulatorError::ValidationError(format!("unknown decision '{decision_id}'"))
        })?;
        let adapter = self.adapter.clone();
        let applied = self.executor.apply(pending.plan, adapter.as_ref()).await?;
        let metrics = self.metric_store.latest(Resolution::Fine);
        self.finish_apply(&applied, &metrics);
        Ok(applied)
    }

    /// Discards a pending advisor recommendation.
    pub fn reject(&mut self, decision_id: &str, reason: Option<String>) -> Result<(), RegulatorError> {
        let pending = self.pending.remove(decision_id).ok_or_else(|| {
            RegulatorError::ValidationError(format!("unknown decision '{decision_id}'"))
        })?;
        let metrics = self.metric_store.latest(Resolution::Fine);
        let entry = self.make_entry(
            pending.plan.diagnosis.clone(),
            Some(pending.plan),
            DecisionResult::Rejected,
            reason.unwrap_or_else(|| "rejected by operator".to_string()),
            &metrics,
        );
        self.bus.emit(&BusEvent::Decision(entry.clone()));
        self.decision_log.record(entry);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operator configuration
    // ------------------------------------------------------------------

    pub fn lock_param(&mut self, key: impl Into<String>) {
        self.locked_params.insert(key.into());
    }

    pub fn unlock_param(&mut self, key: &str) {
        self.locked_params.remove(key);
    }

    pub fn constrain_param(&mut self, key: impl Into<String>, constraint: ParamConstraint) {
        self.constraints.insert(key.into(), constraint);
    }

    // ------------------------------------------------------------------
    // Read surface
    // ------------------------------------------------------------------

    /// Side-effect-free diagnosis of a pushed state: no memory committed, no
    /// events drained, nothing recorded.
    pub fn diagnose_preview(&self, state: &EconomyState) -> (f64, Vec<Diagnosis>) {
        let mut state = state.clone();
        if state.agent_satisfaction.is_none() {
            state.agent_satisfaction = Some(self.satisfaction.scores());
        }
        let metrics = self.observer.preview(&state, &[]);
        let diagnoses = self.diagnoser.diagnose(&metrics, &self.config.thresholds);
        (health_score(&metrics), diagnoses)
    }

    /// Health of the latest recorded snapshot; 100 before any tick.
    pub fn health(&self) -> f64 {
        if self.metric_store.is_empty() {
            return 100.0;
        }
        health_score(&self.metric_store.latest(Resolution::Fine))
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn active_plan_count(&self) -> usize {
        self.executor.active_count()
    }

    pub fn config(&self) -> &RegulatorConfig {
        &self.config
    }

    pub fn decision_log(&self) -> &DecisionLog {
        &self.decision_log
    }

    pub fn metric_store(&self) -> &MetricStore {
        &self.metric_store
    }

    pub fn diagnoser(&self) -> &Diagnoser {
        &self.diagnoser
    }

    pub fn diagnoser_mut(&mut self) -> &mut Diagnoser {
        &mut self.diagnoser
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    pub fn observer_mut(&mut self) -> &mut Observer {
        &mut self.observer
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn param(&self, key: &str) -> Option<f64> {
        self.params.get(key).copied()
    }
}

/// Health score 0..100: starts at 100 and monotonically subtracts for each
/// stressed vital. Tick 0 always reads 100.
pub fn health_score(metrics: &EconomyMetrics) -> f64 {
    if metrics.tick == 0 {
        return 100.0;
    }
    let mut score: f64 = 100.0;

    if metrics.avg_satisfaction < 65.0 {
        score -= 15.0;
        if metrics.avg_satisfaction < 50.0 {
            score -= 10.0;
        }
    }
    if metrics.gini_coefficient > 0.45 {
        score -= 15.0;
        if metrics.gini_coefficient > 0.60 {
            score -= 10.0;
        }
    }
    if metrics.net_flow.abs() > 10.0 {
        score -= 15.0;
        if metrics.net_flow.abs() > 20.0 {
            score -= 10.0;
        }
    }
    if metrics.churn_rate > 0.05 {
        score -= 15.0;
    }

    score.clamp(0.0, 100.0)
}

fn validate_registry(registry: &ParameterRegistry, config: &RegulatorConfig) {
    for param in registry.get_all() {
        if param.key.trim().is_empty() {
            warn!("registered parameter with empty key");
        }
        if param.param_type.trim().is_empty() {
            warn!(key = %param.key, "registered parameter with empty type");
        }
    }
    info!(
        parameters = registry.size(),
        mode = config.mode.as_str(),
        "parameter registry validated"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_score_subtracts_per_stressed_vital() {
        let mut m = EconomyMetrics::empty();
        m.tick = 10;
        m.avg_satisfaction = 80.0;
        assert_eq!(health_score(&m), 100.0);

        m.avg_satisfaction = 60.0; // -15
        assert_eq!(health_score(&m), 85.0);

        m.avg_satisfaction = 40.0; // -25
        assert_eq!(health_score(&m), 75.0);

        m.gini_coefficient = 0.65; // -25
        assert_eq!(health_score(&m), 50.0);

        m.net_flow = 25.0; // -25
        assert_eq!(health_score(&m), 25.0);

        m.churn_rate = 0.10; // -15
        assert_eq!(health_score(&m), 10.0);
    }

    #[test]
    fn health_is_100_at_tick_zero_even_when_stressed() {
        let mut m = EconomyMetrics::empty();
        m.tick = 0;
        m.avg_satisfaction = 1.0;
        m.gini_coefficient = 0.9;
        assert_eq!(health_score(&m), 100.0);
    }

    #[test]
    fn health_clamps_at_zero() {
        let mut m = EconomyMetrics::empty();
        m.tick = 5;
        m.avg_satisfaction = 10.0;
        m.gini_coefficient = 0.9;
        m.net_flow = 100.0;
        m.churn_rate = 0.5;
        assert!(health_score(&m) >= 0.0);
    }
}
