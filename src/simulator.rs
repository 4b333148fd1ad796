//! Monte-Carlo forward projection of candidate actions.
//!
//! Deliberately a reduced-order model, not an agent replay: per-currency
//! supply/flow/gini/velocity plus scalar satisfaction, iterated forward with
//! multiplicative noise. Fast enough to run hundreds of trials per candidate
//! inside one tick.

use crate::config::Thresholds;
use crate::diagnoser::Diagnoser;
use crate::models::{
    ActionDirection, EconomyMetrics, FlowImpact, SimulationResult, SuggestedAction,
};
use crate::registry::ParameterRegistry;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::statistics::Statistics;
use std::collections::{BTreeSet, HashMap};

/// Flow smoothing factor: new flow = 0.9 old + 0.1 effect.
const FLOW_SMOOTHING: f64 = 0.9;
/// Gini mean-reversion target is 0.35, folded into the constants below.
const GINI_DECAY: f64 = 0.99;
const GINI_REVERSION: f64 = 0.0035;
/// Velocity proxy: supply per agent times this.
const VELOCITY_COEFF: f64 = 0.01;
/// Base ticks until an adjustment shows up in the metrics.
const BASE_EFFECT_LAG: u64 = 5;

#[derive(Debug, Clone)]
struct BeforeCache {
    tick: u64,
    violated: BTreeSet<String>,
}

pub struct Simulator {
    rng: ChaCha8Rng,
    /// Single-slot cache of the currently-violated principle set, evicted on
    /// tick change so repeated candidates at one tick share one diagnose.
    before_cache: Option<BeforeCache>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
            before_cache: None,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            before_cache: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn simulate(
        &mut self,
        action: &SuggestedAction,
        metrics: &EconomyMetrics,
        thresholds: &Thresholds,
        iterations: usize,
        forward_ticks: usize,
        diagnoser: &Diagnoser,
        registry: &ParameterRegistry,
    ) -> SimulationResult {
        let iterations = iterations.max(thresholds.simulation_min_iterations).max(1);
        let forward_ticks = forward_ticks.max(1);
        let magnitude = action.magnitude.unwrap_or(0.10);
        let action_multiplier = 1.0 + magnitude;

        let currencies: Vec<String> = if metrics.total_supply_by_currency.is_empty() {
            metrics.net_flow_by_currency.keys().cloned().collect()
        } else {
            metrics.total_supply_by_currency.keys().cloned().collect()
        };
        let total_agents = metrics.total_agents.max(1) as f64;

        let mut outcomes: Vec<Trial> = (0..iterations)
            .map(|_| {
                self.run_trial(
                    action,
                    metrics,
                    registry,
                    &currencies,
                    total_agents,
                    forward_ticks,
                    action_multiplier,
                )
            })
            .collect();
        outcomes.sort_by(|a, b| {
            a.satisfaction
                .partial_cmp(&b.satisfaction)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let n = outcomes.len();
        let satisfactions: Vec<f64> = outcomes.iter().map(|t| t.satisfaction).collect();
        let p10 = outcomes[n / 10].satisfaction;
        let p50_trial = &outcomes[n / 2];
        let p50 = p50_trial.satisfaction;
        let mean = satisfactions.clone().mean();
        let std_dev = if n > 1 {
            satisfactions.std_dev()
        } else {
            0.0
        };
        let confidence_interval = (mean - 1.96 * std_dev, mean + 1.96 * std_dev);

        // Overshoot: of the most satisfied 20% of trials, how many blew the
        // flow out past twice its current magnitude.
        let current_mean_abs_flow = mean_abs(&metrics.net_flow_by_currency);
        let top_start = (n as f64 * 0.8).floor() as usize;
        let top = &outcomes[top_start..];
        let overshoot_risk = if top.is_empty() {
            0.0
        } else {
            top.iter()
                .filter(|t| t.mean_abs_net_flow > 2.0 * current_mean_abs_flow)
                .count() as f64
                / top.len() as f64
        };

        let p50_net_flow = p50_trial.net_flow_by_currency.clone();
        let p50_gini = p50_trial.gini_by_currency.clone();

        let net_improvement = p50 >= metrics.avg_satisfaction - 2.0
            && currencies.iter().all(|currency| {
                let before = metrics
                    .net_flow_by_currency
                    .get(currency)
                    .copied()
                    .unwrap_or(0.0);
                let after = p50_net_flow.get(currency).copied().unwrap_or(0.0);
                after.abs() <= 1.2 * before.abs() || after.abs() < 1.0
            })
            && currencies.iter().all(|currency| {
                let before = metrics.gini_by_currency.get(currency).copied().unwrap_or(0.0);
                let after = p50_gini.get(currency).copied().unwrap_or(0.0);
                after <= before + 0.05
            });

        let before_violated = self.before_violated(metrics, thresholds, diagnoser);
        let projected = project_metrics(metrics, p50_trial, &currencies);
        let after_violated = diagnoser.violated_ids(&projected, thresholds);
        let no_new_problems = after_violated.is_subset(&before_violated);

        SimulationResult {
            iterations,
            forward_ticks,
            p10_satisfaction: p10,
            p50_satisfaction: p50,
            mean_satisfaction: mean,
            confidence_interval,
            estimated_effect_tick: metrics.tick + BASE_EFFECT_LAG * thresholds.lag_multiplier_min,
            overshoot_risk,
            net_improvement,
            no_new_problems,
            p50_net_flow_by_currency: p50_net_flow,
            p50_gini_by_currency: p50_gini,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_trial(
        &mut self,
        action: &SuggestedAction,
        metrics: &EconomyMetrics,
        registry: &ParameterRegistry,
        currencies: &[String],
        total_agents: f64,
        forward_ticks: usize,
        action_multiplier: f64,
    ) -> Trial {
        let mut supply: Vec<f64> = currencies
            .iter()
            .map(|c| metrics.total_supply_by_currency.get(c).copied().unwrap_or(0.0))
            .collect();
        let mut net_flow: Vec<f64> = currencies
            .iter()
            .map(|c| metrics.net_flow_by_currency.get(c).copied().unwrap_or(0.0))
            .collect();
        let mut gini: Vec<f64> = currencies
            .iter()
            .map(|c| metrics.gini_by_currency.get(c).copied().unwrap_or(0.0))
            .collect();
        let mut velocity: Vec<f64> = currencies
            .iter()
            .map(|c| metrics.velocity_by_currency.get(c).copied().unwrap_or(0.0))
            .collect();
        let mut satisfaction = metrics.avg_satisfaction;

        for _ in 0..forward_ticks {
            for (i, currency) in currencies.iter().enumerate() {
                let effect = if scope_matches(action, currency) {
                    flow_effect(action, metrics, currency, registry)
                        * action_multiplier
                        * self.noise()
                } else {
                    0.0
                };
                net_flow[i] = FLOW_SMOOTHING * net_flow[i] + (1.0 - FLOW_SMOOTHING) * effect;
                supply[i] = (supply[i] + net_flow[i] * self.noise()).max(0.0);
                gini[i] = (GINI_DECAY * gini[i] + GINI_REVERSION * self.noise()).clamp(0.0, 1.0);
                velocity[i] = (supply[i] / total_agents) * VELOCITY_COEFF * self.noise();
            }

            let avg_net_flow = if net_flow.is_empty() {
                0.0
            } else {
                net_flow.iter().sum::<f64>() / net_flow.len() as f64
            };
            let sat_delta = if avg_net_flow > 0.0 && avg_net_flow < 20.0 {
                0.5
            } else if avg_net_flow < 0.0 {
                -1.0
            } else {
                0.0
            };
            satisfaction = (satisfaction + sat_delta * self.noise()).clamp(0.0, 100.0);
        }

        let net_flow_by_currency: HashMap<String, f64> = currencies
            .iter()
            .cloned()
            .zip(net_flow.iter().copied())
            .collect();
        let mean_abs_net_flow = mean_abs(&net_flow_by_currency);

        Trial {
            satisfaction,
            net_flow_by_currency,
            gini_by_currency: currencies
                .iter()
                .cloned()
                .zip(gini.iter().copied())
                .collect(),
            supply_by_currency: currencies
                .iter()
                .cloned()
                .zip(supply.iter().copied())
                .collect(),
            velocity_by_currency: currencies
                .iter()
                .cloned()
                .zip(velocity.iter().copied())
                .collect(),
            mean_abs_net_flow,
        }
    }

    /// Multiplicative noise in [0.95, 1.05).
    fn noise(&mut self) -> f64 {
        1.0 + (self.rng.gen::<f64>() - 0.5) * 0.1
    }

    fn before_violated(
        &mut self,
        metrics: &EconomyMetrics,
        thresholds: &Thresholds,
        diagnoser: &Diagnoser,
    ) -> BTreeSet<String> {
        match &self.before_cache {
            Some(cache) if cache.tick == metrics.tick => cache.violated.clone(),
            _ => {
                let violated = diagnoser.violated_ids(metrics, thresholds);
                self.before_cache = Some(BeforeCache {
                    tick: metrics.tick,
                    violated: violated.clone(),
                });
                violated
            }
        }
    }
}

struct Trial {
    satisfaction: f64,
    net_flow_by_currency: HashMap<String, f64>,
    gini_by_currency: HashMap<String, f64>,
    supply_by_currency: HashMap<String, f64>,
    velocity_by_currency: HashMap<String, f64>,
    mean_abs_net_flow: f64,
}

fn scope_matches(action: &SuggestedAction, currency: &str) -> bool {
    match action.scope.as_ref().and_then(|s| s.currency.as_deref()) {
        Some(scoped) => scoped == currency,
        None => true,
    }
}

/// Signed flow impact of adjusting the action's parameter type, before the
/// magnitude multiplier and noise.
fn flow_effect(
    action: &SuggestedAction,
    metrics: &EconomyMetrics,
    currency: &str,
    registry: &ParameterRegistry,
) -> f64 {
    let base = metrics
        .net_flow_by_currency
        .get(currency)
        .copied()
        .unwrap_or(0.0)
        .abs()
        .max(1.0);
    let dir_sign = match action.direction {
        ActionDirection::Increase | ActionDirection::Set => 1.0,
        ActionDirection::Decrease => -1.0,
    };

    let impact = registry
        .find_by_type(&action.parameter_type)
        .first()
        .map(|p| p.flow_impact)
        .or_else(|| keyword_impact(&action.parameter_type));

    let coeff = match impact {
        Some(FlowImpact::Faucet) => 0.5,
        Some(FlowImpact::Sink) => -0.5,
        Some(FlowImpact::Mixed) => 0.25,
        Some(FlowImpact::Neutral) => 0.0,
        None => 0.25,
    };

    dir_sign * coeff * base
}

/// Directional table for common parameter type names when the registry has
/// no matching entry.
fn keyword_impact(param_type: &str) -> Option<FlowImpact> {
    let lower = param_type.to_ascii_lowercase();
    if ["fee", "cost", "tax", "burn", "price", "sink"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some(FlowImpact::Sink)
    } else if ["reward", "yield", "faucet", "drop", "payout", "grant"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some(FlowImpact::Faucet)
    } else {
        None
    }
}

fn mean_abs(map: &HashMap<String, f64>) -> f64 {
    if map.is_empty() {
        0.0
    } else {
        map.values().map(|v| v.abs()).sum::<f64>() / map.len() as f64
    }
}

/// Projects the p50 trial back onto a metrics snapshot for re-diagnosis.
fn project_metrics(metrics: &EconomyMetrics, trial: &Trial, currencies: &[String]) -> EconomyMetrics {
    let mut projected = metrics.clone();
    for currency in currencies {
        if let Some(v) = trial.net_flow_by_currency.get(currency) {
            projected.net_flow_by_currency.insert(currency.clone(), *v);
        }
        if let Some(v) = trial.gini_by_currency.get(currency) {
            projected.gini_by_currency.insert(currency.clone(), *v);
        }
        if let Some(v) = trial.supply_by_currency.get(currency) {
            projected
                .total_supply_by_currency
                .insert(currency.clone(), *v);
        }
        if let Some(v) = trial.velocity_by_currency.get(currency) {
            projected.velocity_by_currency.insert(currency.clone(), *v);
        }
    }
    projected.avg_satisfaction = trial.satisfaction;
    projected.total_supply = projected.total_supply_by_currency.values().sum();
    projected.net_flow = mean_signed(&projected.net_flow_by_currency);
    projected.gini_coefficient = mean_signed(&projected.gini_by_currency);
    projected.velocity = mean_signed(&projected.velocity_by_currency);
    projected
}

fn mean_signed(map: &HashMap<String, f64>) -> f64 {
    if map.is_empty() {
        0.0
    } else {
        map.values().sum::<f64>() / map.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParameterScope;
    use crate::principles::default_principles;

    fn metrics_with(currencies: &[(&str, f64, f64)]) -> EconomyMetrics {
        let mut m = EconomyMetrics::empty();
        m.tick = 100;
        m.total_agents = 50;
        m.avg_satisfaction = 70.0;
        for (currency, supply, net_flow) in currencies {
            m.total_supply_by_currency
                .insert((*currency).into(), *supply);
            m.net_flow_by_currency.insert((*currency).into(), *net_flow);
            m.gini_by_currency.insert((*currency).into(), 0.35);
            m.velocity_by_currency.insert((*currency).into(), 0.1);
            m.tap_sink_ratio_by_currency.insert((*currency).into(), 1.0);
        }
        m
    }

    fn fee_increase(scope: Option<ParameterScope>) -> SuggestedAction {
        SuggestedAction {
            parameter_type: "fee".into(),
            direction: ActionDirection::Increase,
            magnitude: Some(0.10),
            absolute_value: None,
            scope,
            reasoning: "test".into(),
        }
    }

    fn harness() -> (Diagnoser, ParameterRegistry, Thresholds) {
        (
            Diagnoser::new(default_principles(Vec::new())),
            ParameterRegistry::new(),
            Thresholds::default(),
        )
    }

    #[test]
    fn iteration_floor_is_enforced() {
        let (diagnoser, registry, thresholds) = harness();
        let mut sim = Simulator::with_seed(7);
        let m = metrics_with(&[("gold", 1000.0, 5.0)]);
        let result = sim.simulate(&fee_increase(None), &m, &thresholds, 3, 20, &diagnoser, &registry);
        assert_eq!(result.iterations, 100);

        let result = sim.simulate(&fee_increase(None), &m, &thresholds, 250, 20, &diagnoser, &registry);
        assert_eq!(result.iterations, 250);
    }

    #[test]
    fn results_are_deterministic_for_a_seed() {
        let (diagnoser, registry, thresholds) = harness();
        let m = metrics_with(&[("gold", 1000.0, 5.0)]);

        let mut a = Simulator::with_seed(42);
        let mut b = Simulator::with_seed(42);
        let ra = a.simulate(&fee_increase(None), &m, &thresholds, 100, 20, &diagnoser, &registry);
        let rb = b.simulate(&fee_increase(None), &m, &thresholds, 100, 20, &diagnoser, &registry);
        assert_eq!(ra.p50_satisfaction, rb.p50_satisfaction);
        assert_eq!(ra.mean_satisfaction, rb.mean_satisfaction);
    }

    #[test]
    fn percentiles_are_ordered() {
        let (diagnoser, registry, thresholds) = harness();
        let mut sim = Simulator::with_seed(3);
        let m = metrics_with(&[("gold", 1000.0, 15.0), ("gems", 400.0, -3.0)]);
        let r = sim.simulate(&fee_increase(None), &m, &thresholds, 200, 20, &diagnoser, &registry);

        assert!(r.p10_satisfaction <= r.p50_satisfaction);
        assert!(r.confidence_interval.0 <= r.mean_satisfaction);
        assert!(r.confidence_interval.1 >= r.mean_satisfaction);
        assert!((0.0..=1.0).contains(&r.overshoot_risk));
    }

    #[test]
    fn scoped_action_leaves_other_currencies_flat() {
        let (diagnoser, registry, thresholds) = harness();
        let mut sim = Simulator::with_seed(9);
        let m = metrics_with(&[("gold", 1000.0, 10.0), ("gems", 400.0, 10.0)]);
        let action = fee_increase(Some(ParameterScope::currency("gold")));
        let r = sim.simulate(&action, &m, &thresholds, 150, 20, &diagnoser, &registry);

        // A fee increase drains flow; the scoped currency must end lower
        // than the unscoped one, which only decays on smoothing.
        let gold = r.p50_net_flow_by_currency["gold"];
        let gems = r.p50_net_flow_by_currency["gems"];
        assert!(gold < gems, "gold {gold} vs gems {gems}");
    }

    #[test]
    fn registry_flow_impact_overrides_keywords() {
        let (diagnoser, mut registry, thresholds) = harness();
        // A "fee" registered as a faucet: raising it should raise flow.
        registry.register(&crate::models::RegisteredParameter {
            key: "weird_fee".into(),
            param_type: "fee".into(),
            flow_impact: FlowImpact::Faucet,
            scope: None,
            current_value: Some(1.0),
            description: None,
        });
        let m = metrics_with(&[("gold", 1000.0, 10.0)]);
        let mut sim = Simulator::with_seed(5);
        let r = sim.simulate(&fee_increase(None), &m, &thresholds, 150, 20, &diagnoser, &registry);

        let mut sink_sim = Simulator::with_seed(5);
        let sink_registry = ParameterRegistry::new();
        let r_sink = sink_sim.simulate(
            &fee_increase(None),
            &m,
            &thresholds,
            150,
            20,
            &diagnoser,
            &sink_registry,
        );
        assert!(
            r.p50_net_flow_by_currency["gold"] > r_sink.p50_net_flow_by_currency["gold"]
        );
    }

    #[test]
    fn before_set_cache_is_evicted_on_tick_change() {
        let (diagnoser, registry, thresholds) = harness();
        let mut sim = Simulator::with_seed(1);
        let m = metrics_with(&[("gold", 1000.0, 5.0)]);
        sim.simulate(&fee_increase(None), &m, &thresholds, 100, 5, &diagnoser, &registry);
        let cached_tick = sim.before_cache.as_ref().unwrap().tick;
        assert_eq!(cached_tick, 100);

        let mut m2 = m.clone();
        m2.tick = 105;
        sim.simulate(&fee_increase(None), &m2, &thresholds, 100, 5, &diagnoser, &registry);
        assert_eq!(sim.before_cache.as_ref().unwrap().tick, 105);
    }

    #[test]
    fn satisfaction_stays_in_range() {
        let (diagnoser, registry, thresholds) = harness();
        let mut sim = Simulator::with_seed(11);
        let mut m = metrics_with(&[("gold", 10.0, -50.0)]);
        m.avg_satisfaction = 3.0;
        let r = sim.simulate(&fee_increase(None), &m, &thresholds, 100, 40, &diagnoser, &registry);
        assert!(r.p10_satisfaction >= 0.0);
        assert!(r.p50_satisfaction <= 100.0);
    }
}
