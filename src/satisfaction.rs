//! Per-agent satisfaction estimation from observable signals.
//!
//! Used when the host does not supply `agentSatisfaction`. Each agent keeps
//! bounded rolling windows of balance totals, transaction counts and
//! inventory sizes; a raw 0..100 score is derived from five bounded
//! components and folded into a smoothed score per tick.

use crate::models::{EconomicEvent, EconomyState};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct SatisfactionConfig {
    /// Rolling window length in ticks.
    pub window: usize,
    /// Smoothing factor: s' = s·(1−α) + raw·α.
    pub alpha: f64,
    /// Ticks of inactivity tolerated before the penalty ramps.
    pub inactivity_threshold: u64,
}

impl Default for SatisfactionConfig {
    fn default() -> Self {
        Self {
            window: 30,
            alpha: 0.15,
            inactivity_threshold: 10,
        }
    }
}

#[derive(Debug, Clone)]
struct AgentWindow {
    balances: VecDeque<f64>,
    tx_counts: VecDeque<u64>,
    inventory_sizes: VecDeque<usize>,
    last_active_tick: u64,
    last_seen_tick: u64,
    score: f64,
}

impl AgentWindow {
    fn new(tick: u64) -> Self {
        Self {
            balances: VecDeque::new(),
            tx_counts: VecDeque::new(),
            inventory_sizes: VecDeque::new(),
            last_active_tick: tick,
            last_seen_tick: tick,
            score: 50.0,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SatisfactionEstimator {
    config: SatisfactionConfig,
    agents: HashMap<String, AgentWindow>,
}

impl SatisfactionEstimator {
    pub fn new(config: SatisfactionConfig) -> Self {
        Self {
            config,
            agents: HashMap::new(),
        }
    }

    /// Folds one tick of observations into every tracked agent's windows and
    /// smoothed score. Prunes long-absent agents on window boundaries.
    pub fn update(&mut self, state: &EconomyState, events: &[EconomicEvent]) {
        let tick = state.tick;

        let mut tx_by_agent: HashMap<&str, u64> = HashMap::new();
        for event in state.recent_transactions.iter().chain(events.iter()) {
            *tx_by_agent.entry(event.actor.as_str()).or_insert(0) += 1;
        }

        let present: HashSet<&String> = state
            .agent_roles
            .keys()
            .chain(state.agent_balances.keys())
            .collect();

        // Population median of balance totals, for the standing component.
        let mut totals: Vec<f64> = present
            .iter()
            .map(|agent| balance_total(state, agent))
            .collect();
        totals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let population_median = crate::observer::median(&totals);

        for agent in &present {
            let balance = balance_total(state, agent);
            let tx_count = tx_by_agent.get(agent.as_str()).copied().unwrap_or(0);
            let inventory_size = state
                .agent_inventories
                .get(*agent)
                .map(|inv| inv.values().filter(|q| **q > 0.0).count())
                .unwrap_or(0);

            let window = self.config.window;
            let entry = self
                .agents
                .entry((*agent).clone())
                .or_insert_with(|| AgentWindow::new(tick));
            entry.last_seen_tick = tick;
            if tx_count > 0 {
                entry.last_active_tick = tick;
            }
            push_window(&mut entry.balances, balance, window);
            push_window(&mut entry.tx_counts, tx_count, window);
            push_window(&mut entry.inventory_sizes, inventory_size, window);

            let raw = compute_raw(entry, tick, population_median, &self.config);
            entry.score =
                (entry.score * (1.0 - self.config.alpha) + raw * self.config.alpha).clamp(0.0, 100.0);
        }

        if self.config.window > 0 && tick % self.config.window as u64 == 0 {
            let horizon = 2 * self.config.window as u64;
            self.agents
                .retain(|_, w| tick.saturating_sub(w.last_seen_tick) < horizon);
        }
    }

    pub fn score(&self, agent: &str) -> Option<f64> {
        self.agents.get(agent).map(|w| w.score)
    }

    /// Smoothed scores for every tracked agent.
    pub fn scores(&self) -> HashMap<String, f64> {
        self.agents
            .iter()
            .map(|(agent, w)| (agent.clone(), w.score))
            .collect()
    }

    pub fn tracked_agents(&self) -> usize {
        self.agents.len()
    }
}

fn balance_total(state: &EconomyState, agent: &str) -> f64 {
    state
        .agent_balances
        .get(agent)
        .map(|b| b.values().sum())
        .unwrap_or(0.0)
}

fn push_window<T>(window: &mut VecDeque<T>, value: T, capacity: usize) {
    if window.len() >= capacity.max(1) {
        window.pop_front();
    }
    window.push_back(value);
}

/// Raw 0..100 score: a 50 baseline plus five bounded signed components.
fn compute_raw(
    window: &AgentWindow,
    tick: u64,
    population_median: f64,
    config: &SatisfactionConfig,
) -> f64 {
    let mut score = 50.0;

    // Balance trajectory over the window, ±15.
    let oldest = window.balances.front().copied().unwrap_or(0.0);
    let latest = window.balances.back().copied().unwrap_or(0.0);
    let trajectory = (latest - oldest) / oldest.max(1.0);
    score += (trajectory * 30.0).clamp(-15.0, 15.0);

    // Transaction engagement against the agent's own history, ±15.
    let current_tx = window.tx_counts.back().copied().unwrap_or(0) as f64;
    let mean_tx = if window.tx_counts.is_empty() {
        0.0
    } else {
        window.tx_counts.iter().sum::<u64>() as f64 / window.tx_counts.len() as f64
    };
    score += ((current_tx - mean_tx) * 5.0).clamp(-15.0, 15.0);

    // Inventory diversity, ±10: empty-handed agents sit at -10, eight or
    // more distinct resources at +10.
    let diversity = window.inventory_sizes.back().copied().unwrap_or(0) as f64;
    score += (diversity * 2.5 - 10.0).clamp(-10.0, 10.0);

    // Standing against the population median, ±10.
    if population_median > 0.0 {
        let ratio = window.balances.back().copied().unwrap_or(0.0) / population_median;
        score += if ratio >= 2.0 {
            10.0
        } else if ratio >= 0.6 {
            0.0
        } else if ratio >= 0.3 {
            -5.0
        } else {
            -10.0
        };
    }

    // Inactivity penalty, up to -20, proportional past the threshold.
    let inactive = tick.saturating_sub(window.last_active_tick);
    if inactive > config.inactivity_threshold {
        let over = (inactive - config.inactivity_threshold) as f64;
        score -= (over * 2.0).min(20.0);
    }

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;

    fn state_with(tick: u64, agents: &[(&str, f64)]) -> EconomyState {
        let mut state = EconomyState {
            tick,
            roles: vec!["trader".into()],
            currencies: vec!["gold".into()],
            ..Default::default()
        };
        for (agent, balance) in agents {
            state
                .agent_balances
                .insert((*agent).into(), HashMap::from([("gold".into(), *balance)]));
            state.agent_roles.insert((*agent).into(), "trader".into());
        }
        state
    }

    #[test]
    fn scores_start_near_baseline_and_stay_bounded() {
        let mut est = SatisfactionEstimator::new(SatisfactionConfig::default());
        est.update(&state_with(1, &[("a1", 100.0), ("a2", 100.0)]), &[]);
        let score = est.score("a1").unwrap();
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn growing_balance_and_activity_raise_the_score() {
        let mut est = SatisfactionEstimator::new(SatisfactionConfig::default());
        let mut idle = est.clone();

        for tick in 1..=20u64 {
            let balance = 100.0 + 10.0 * tick as f64;
            let events = vec![EconomicEvent::new(EventKind::Trade, "a1", 1.0)];
            est.update(&state_with(tick, &[("a1", balance), ("a2", 100.0)]), &events);
            idle.update(&state_with(tick, &[("a1", 100.0), ("a2", 100.0)]), &[]);
        }

        assert!(est.score("a1").unwrap() > idle.score("a1").unwrap());
    }

    #[test]
    fn inactivity_drags_the_score_down() {
        let mut est = SatisfactionEstimator::new(SatisfactionConfig::default());
        for tick in 1..=40u64 {
            est.update(&state_with(tick, &[("a1", 100.0), ("a2", 100.0)]), &[]);
        }
        // 40 ticks without a single transaction: penalty saturated.
        assert!(est.score("a1").unwrap() < 50.0);
    }

    #[test]
    fn absent_agents_are_pruned_on_window_sweeps() {
        let config = SatisfactionConfig {
            window: 5,
            ..Default::default()
        };
        let mut est = SatisfactionEstimator::new(config);
        est.update(&state_with(1, &[("a1", 100.0), ("gone", 50.0)]), &[]);
        assert_eq!(est.tracked_agents(), 2);

        // "gone" disappears from the state; prune fires on tick 15 (>= 2x window absent).
        for tick in 2..=15u64 {
            est.update(&state_with(tick, &[("a1", 100.0)]), &[]);
        }
        assert_eq!(est.tracked_agents(), 1);
        assert!(est.score("gone").is_none());
    }

    #[test]
    fn smoothing_limits_per_tick_movement() {
        let mut est = SatisfactionEstimator::new(SatisfactionConfig::default());
        est.update(&state_with(1, &[("a1", 100.0), ("a2", 100.0)]), &[]);
        let before = est.score("a1").unwrap();

        // One very active tick cannot move the smoothed score more than
        // alpha times the raw swing.
        let events: Vec<EconomicEvent> = (0..10)
            .map(|_| EconomicEvent::new(EventKind::Trade, "a1", 1.0))
            .collect();
        est.update(&state_with(2, &[("a1", 500.0), ("a2", 100.0)]), &events);
        let after = est.score("a1").unwrap();
        assert!((after - before).abs() <= 0.15 * 100.0 + 1e-9);
    }
}
