//! Behavioral persona classification from observable signals.
//!
//! One label per agent per tick; the reported distribution is shares of the
//! tracked population, so the values sum to at most 1.

use crate::models::{EconomicEvent, EconomyState, EventKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Persona {
    Whale,
    ActiveTrader,
    Accumulator,
    Spender,
    NewEntrant,
    AtRisk,
    Dormant,
    PowerUser,
    Passive,
}

impl Persona {
    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::Whale => "Whale",
            Persona::ActiveTrader => "ActiveTrader",
            Persona::Accumulator => "Accumulator",
            Persona::Spender => "Spender",
            Persona::NewEntrant => "NewEntrant",
            Persona::AtRisk => "AtRisk",
            Persona::Dormant => "Dormant",
            Persona::PowerUser => "PowerUser",
            Persona::Passive => "Passive",
        }
    }
}

/// Balance at or above this multiple of the population median reads as a whale.
const WHALE_MEDIAN_MULTIPLE: f64 = 10.0;
/// Window trades at or above this mark an active trader.
const ACTIVE_TRADER_MIN_TRADES: u64 = 5;
/// Balance growth over the window marking an accumulator.
const ACCUMULATOR_GROWTH: f64 = 0.2;
/// First seen within this many ticks reads as a new entrant.
const NEW_ENTRANT_HORIZON: u64 = 10;
/// No activity for this many ticks reads as dormant.
const DORMANT_TICKS: u64 = 15;
/// Declining activity past this many idle ticks reads as at-risk.
const AT_RISK_IDLE_TICKS: u64 = 5;

#[derive(Debug, Clone)]
struct AgentTrack {
    first_seen: u64,
    last_active: u64,
    window_trades: u64,
    window_spends: u64,
    systems: HashSet<String>,
    balance_window_start: f64,
    ever_active: bool,
}

#[derive(Debug, Default, Clone)]
pub struct PersonaTracker {
    agents: HashMap<String, AgentTrack>,
    window: u64,
}

impl PersonaTracker {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            window: 10,
        }
    }

    /// Updates per-agent activity tracks and returns the persona
    /// distribution for this tick.
    pub fn update(
        &mut self,
        state: &EconomyState,
        events: &[EconomicEvent],
    ) -> HashMap<String, f64> {
        let tick = state.tick;
        let window = self.window;

        let agents: Vec<String> = state
            .agent_roles
            .keys()
            .chain(state.agent_balances.keys())
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        for agent in &agents {
            let balance = total_balance(state, agent);
            let track = self.agents.entry(agent.clone()).or_insert(AgentTrack {
                first_seen: tick,
                last_active: tick,
                window_trades: 0,
                window_spends: 0,
                systems: HashSet::new(),
                balance_window_start: balance,
                ever_active: false,
            });
            // Window counters reset on window boundaries so behavior decays.
            if window > 0 && tick % window == 0 {
                track.window_trades = 0;
                track.window_spends = 0;
                track.systems.clear();
                track.balance_window_start = balance;
            }
        }

        for event in state.recent_transactions.iter().chain(events.iter()) {
            let Some(track) = self.agents.get_mut(&event.actor) else {
                continue;
            };
            track.last_active = tick;
            track.ever_active = true;
            match event.kind {
                EventKind::Trade | EventKind::Transfer => track.window_trades += 1,
                EventKind::Burn | EventKind::Consume => track.window_spends += 1,
                _ => {}
            }
            if let Some(system) = &event.system {
                track.systems.insert(system.clone());
            }
        }

        // Population median balance for the whale cutoff.
        let mut totals: Vec<f64> = agents.iter().map(|a| total_balance(state, a)).collect();
        totals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = crate::observer::median(&totals);

        let satisfaction = state.agent_satisfaction.as_ref();

        let mut counts: HashMap<Persona, u64> = HashMap::new();
        for agent in &agents {
            let Some(track) = self.agents.get(agent) else {
                continue;
            };
            let persona = classify(
                track,
                tick,
                total_balance(state, agent),
                median,
                satisfaction.and_then(|s| s.get(agent)).copied(),
            );
            *counts.entry(persona).or_insert(0) += 1;
        }

        let total = agents.len().max(1) as f64;
        counts
            .into_iter()
            .map(|(persona, count)| (persona.as_str().to_string(), count as f64 / total))
            .collect()
    }
}

fn total_balance(state: &EconomyState, agent: &str) -> f64 {
    state
        .agent_balances
        .get(agent)
        .map(|b| b.values().sum())
        .unwrap_or(0.0)
}

fn classify(
    track: &AgentTrack,
    tick: u64,
    balance: f64,
    median: f64,
    satisfaction: Option<f64>,
) -> Persona {
    let idle = tick.saturating_sub(track.last_active);

    if median > 0.0 && balance >= WHALE_MEDIAN_MULTIPLE * median {
        return Persona::Whale;
    }
    if tick.saturating_sub(track.first_seen) <= NEW_ENTRANT_HORIZON {
        return Persona::NewEntrant;
    }
    if track.ever_active && idle >= DORMANT_TICKS {
        return Persona::Dormant;
    }
    if satisfaction.is_some_and(|s| s < 30.0)
        || (track.ever_active && idle >= AT_RISK_IDLE_TICKS)
    {
        return Persona::AtRisk;
    }
    if track.systems.len() >= 2 && track.window_trades >= ACTIVE_TRADER_MIN_TRADES {
        return Persona::PowerUser;
    }
    if track.window_trades >= ACTIVE_TRADER_MIN_TRADES {
        return Persona::ActiveTrader;
    }
    if track.window_spends >= 3 && track.window_spends > track.window_trades {
        return Persona::Spender;
    }
    let growth = (balance - track.balance_window_start) / track.balance_window_start.max(1.0);
    if growth >= ACCUMULATOR_GROWTH {
        return Persona::Accumulator;
    }
    Persona::Passive
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn shares_sum_to_at_most_one() {
        let mut tracker = PersonaTracker::new();
        let dist = tracker.update(&state_with(1, &[("a1", 10.0), ("a2", 20.0), ("a3", 0.0)]), &[]);
        let sum: f64 = dist.values().sum();
        assert!(sum <= 1.0 + 1e-9);
        assert!(sum > 0.99);
    }

    #[test]
    fn whales_are_spotted_by_median_multiple() {
        let mut tracker = PersonaTracker::new();
        let agents = [("whale", 1000.0), ("a1", 10.0), ("a2", 12.0), ("a3", 8.0)];
        let dist = tracker.update(&state_with(1, &agents), &[]);
        assert!(dist.get("Whale").copied().unwrap_or(0.0) > 0.0);
    }

    #[test]
    fn fresh_agents_are_new_entrants() {
        let mut tracker = PersonaTracker::new();
        let dist = tracker.update(&state_with(1, &[("a1", 10.0), ("a2", 11.0)]), &[]);
        assert_eq!(dist.get("NewEntrant").copied().unwrap_or(0.0), 1.0);
    }

    #[test]
    fn traders_become_dormant_when_they_stop() {
        let mut tracker = PersonaTracker::new();
        let agents = [("a1", 10.0), ("a2", 11.0)];

        // a1 trades heavily early on.
        for tick in 1..=12u64 {
            let events = vec![
                EconomicEvent::new(EventKind::Trade, "a1", 1.0),
                EconomicEvent::new(EventKind::Trade, "a1", 1.0),
            ];
            tracker.update(&state_with(tick, &agents), &events);
        }
        // Then goes silent long enough to cross the dormancy cutoff.
        let mut dist = HashMap::new();
        for tick in 13..=30u64 {
            dist = tracker.update(&state_with(tick, &agents), &[]);
        }
        assert!(dist.get("Dormant").copied().unwrap_or(0.0) > 0.0);
    }

    #[test]
    fn active_traders_and_power_users_split_on_system_breadth() {
        let mut tracker = PersonaTracker::new();
        let agents = [("solo", 10.0), ("multi", 11.0)];

        let mut dist = HashMap::new();
        // Run past the new-entrant horizon, keeping both busy every tick.
        for tick in 1..=21u64 {
            let mut events = Vec::new();
            for _ in 0..6 {
                events.push(EconomicEvent::new(EventKind::Trade, "solo", 1.0).with_system("bazaar"));
            }
            for system in ["bazaar", "arena", "bazaar", "arena", "bazaar", "arena"] {
                events.push(EconomicEvent::new(EventKind::Trade, "multi", 1.0).with_system(system));
            }
            dist = tracker.update(&state_with(tick, &agents), &events);
        }
        assert!(dist.get("ActiveTrader").copied().unwrap_or(0.0) > 0.0);
        assert!(dist.get("PowerUser").copied().unwrap_or(0.0) > 0.0);
    }
}
