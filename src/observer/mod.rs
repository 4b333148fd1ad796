//! Observer: aggregates a state snapshot + event stream into the dense
//! per-tick metrics vector.
//!
//! Deterministic for fixed inputs plus two pieces of internal memory: the
//! previous snapshot (inflation, volatility, content-drop age) and the
//! first-tick anchor baselines (per-agent supply when a currency first shows
//! positive supply).

mod wealth;

pub use wealth::{gini, log_price_dispersion, mean_median_divergence, median, top_decile_share};

use crate::error::RegulatorError;
use crate::models::{EconomicEvent, EconomyMetrics, EconomyState, EventKind, PinchPointClass};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Tap/sink ratio saturates here instead of going to infinity.
const TAP_SINK_RATIO_CAP: f64 = 100.0;
/// Trades below this fraction of market price count as gifts.
const GIFT_PRICE_FRACTION: f64 = 0.3;
/// Seller inventory above this multiple of the population mean marks a
/// disposal trade.
const DISPOSAL_INVENTORY_MULTIPLE: f64 = 3.0;

type CustomMetricFn = Box<dyn Fn(&EconomyState) -> anyhow::Result<f64> + Send>;

pub struct Observer {
    prev: Option<EconomyMetrics>,
    /// currency -> baseline currency-per-agent, captured on the first tick
    /// the currency has positive supply.
    anchors: HashMap<String, f64>,
    custom: Vec<(String, CustomMetricFn)>,
    blocked_satisfaction_threshold: f64,
}

impl Observer {
    pub fn new(blocked_satisfaction_threshold: f64) -> Self {
        Self {
            prev: None,
            anchors: HashMap::new(),
            custom: Vec::new(),
            blocked_satisfaction_threshold,
        }
    }

    /// Registers a developer metric. Failures are contained: the metric is
    /// set to NaN and a warning is logged.
    pub fn register_custom_metric(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&EconomyState) -> anyhow::Result<f64> + Send + 'static,
    ) {
        self.custom.push((name.into(), Box::new(f)));
    }

    /// Computes the metrics snapshot and commits internal memory.
    pub fn compute(
        &mut self,
        state: &EconomyState,
        events: &[EconomicEvent],
    ) -> Result<EconomyMetrics, RegulatorError> {
        let (metrics, new_anchors) = self.compute_with(state, events, self.prev.as_ref());
        for (currency, baseline) in new_anchors {
            self.anchors.insert(currency, baseline);
        }
        self.prev = Some(metrics.clone());
        Ok(metrics)
    }

    /// Computes a snapshot without committing memory; used by the
    /// side-effect-free diagnose surface.
    pub fn preview(&self, state: &EconomyState, events: &[EconomicEvent]) -> EconomyMetrics {
        self.compute_with(state, events, self.prev.as_ref()).0
    }

    fn compute_with(
        &self,
        state: &EconomyState,
        events: &[EconomicEvent],
        prev: Option<&EconomyMetrics>,
    ) -> (EconomyMetrics, Vec<(String, f64)>) {
        let mut m = EconomyMetrics {
            tick: state.tick,
            ..Default::default()
        };

        let default_currency = state.currencies.first().cloned().unwrap_or_default();

        // Population: union of role-carrying and balance-carrying agents.
        let agents: HashSet<&String> = state
            .agent_roles
            .keys()
            .chain(state.agent_balances.keys())
            .collect();
        let total_agents = agents.len() as u64;
        m.total_agents = total_agents;

        for role in state.agent_roles.values() {
            *m.population_by_role.entry(role.clone()).or_insert(0) += 1;
        }
        for (role, count) in &m.population_by_role {
            m.role_shares
                .insert(role.clone(), *count as f64 / total_agents.max(1) as f64);
        }

        // Resource supply from inventories; demand accumulates in the event
        // pass below.
        for resource in &state.resources {
            let supply: f64 = state
                .agent_inventories
                .values()
                .map(|inv| inv.get(resource).copied().unwrap_or(0.0))
                .sum();
            m.resource_supply.insert(resource.clone(), supply);
            m.resource_demand.insert(resource.clone(), 0.0);
        }

        // ------------------------------------------------------------------
        // Single classification pass over the event stream.
        // ------------------------------------------------------------------
        struct TradeTally {
            count: u64,
            gifts: u64,
            disposals: u64,
        }
        let mut trades: HashMap<String, TradeTally> = HashMap::new();
        let mut churn_count = 0u64;
        let mut produce_volume = 0.0f64;
        let mut content_drop_seen = false;

        for event in state.recent_transactions.iter().chain(events.iter()) {
            let currency = event
                .currency
                .clone()
                .unwrap_or_else(|| default_currency.clone());

            match event.kind {
                EventKind::Mint | EventKind::Enter => {
                    *m.faucet_volume_by_currency.entry(currency.clone()).or_insert(0.0) +=
                        event.amount;
                }
                EventKind::Burn | EventKind::Consume => {
                    *m.sink_volume_by_currency.entry(currency.clone()).or_insert(0.0) +=
                        event.amount;
                    if event.kind == EventKind::Consume {
                        if let Some(resource) = &event.resource {
                            *m.resource_demand.entry(resource.clone()).or_insert(0.0) +=
                                event.amount;
                        }
                    }
                }
                EventKind::Produce => {
                    produce_volume += event.amount;
                    if event
                        .metadata
                        .get("contentDrop")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false)
                    {
                        content_drop_seen = true;
                    }
                }
                EventKind::Trade => {
                    let tally = trades.entry(currency.clone()).or_insert(TradeTally {
                        count: 0,
                        gifts: 0,
                        disposals: 0,
                    });
                    tally.count += 1;

                    let price = event.price.unwrap_or(0.0);
                    let market_price = event.resource.as_ref().and_then(|res| {
                        state
                            .market_prices
                            .get(&currency)
                            .and_then(|prices| prices.get(res))
                            .copied()
                    });
                    if price == 0.0
                        || market_price
                            .is_some_and(|mp| mp > 0.0 && price < GIFT_PRICE_FRACTION * mp)
                    {
                        tally.gifts += 1;
                    }

                    if let Some(resource) = &event.resource {
                        *m.resource_demand.entry(resource.clone()).or_insert(0.0) +=
                            event.amount;

                        let seller = event.from.as_ref().unwrap_or(&event.actor);
                        let seller_inventory = state
                            .agent_inventories
                            .get(seller)
                            .and_then(|inv| inv.get(resource))
                            .copied()
                            .unwrap_or(0.0);
                        let mean_inventory = m
                            .resource_supply
                            .get(resource)
                            .copied()
                            .unwrap_or(0.0)
                            / total_agents.max(1) as f64;
                        if mean_inventory > 0.0
                            && seller_inventory > DISPOSAL_INVENTORY_MULTIPLE * mean_inventory
                        {
                            tally.disposals += 1;
                        }
                    }
                }
                EventKind::Churn => {
                    churn_count += 1;
                    if let Some(role) = &event.role {
                        *m.churn_by_role.entry(role.clone()).or_insert(0) += 1;
                    }
                }
                EventKind::RoleChange => {
                    if let Some(role) = &event.role {
                        *m.churn_by_role.entry(role.clone()).or_insert(0) += 1;
                    }
                }
                EventKind::Transfer => {}
            }

            // Per-system tracking. Enter never contributes to flow.
            if let Some(system) = &event.system {
                *m.activity_by_system.entry(system.clone()).or_insert(0) += 1;
                let flow_delta = match event.kind {
                    EventKind::Mint => event.amount,
                    EventKind::Burn | EventKind::Consume => -event.amount,
                    _ => 0.0,
                };
                if flow_delta != 0.0 {
                    *m.flow_by_system.entry(system.clone()).or_insert(0.0) += flow_delta;
                }
                m.participants_by_system
                    .entry(system.clone())
                    .or_insert(0);
            }

            // Per-source/per-sink tracking, enter excluded as well.
            if let Some(label) = &event.source_or_sink {
                match event.kind {
                    EventKind::Mint => {
                        *m.flow_by_source.entry(label.clone()).or_insert(0.0) += event.amount;
                    }
                    EventKind::Burn | EventKind::Consume => {
                        *m.flow_by_sink.entry(label.clone()).or_insert(0.0) += event.amount;
                    }
                    _ => {}
                }
            }
        }

        // Unique participants per system need a second, cheap pass.
        let mut participants: HashMap<&str, HashSet<&str>> = HashMap::new();
        for event in state.recent_transactions.iter().chain(events.iter()) {
            if let Some(system) = &event.system {
                participants
                    .entry(system.as_str())
                    .or_default()
                    .insert(event.actor.as_str());
            }
        }
        for (system, actors) in participants {
            m.participants_by_system
                .insert(system.to_string(), actors.len() as u64);
        }

        let source_total: f64 = m.flow_by_source.values().sum();
        if source_total > 0.0 {
            for (label, flow) in &m.flow_by_source {
                m.source_share.insert(label.clone(), flow / source_total);
            }
        }
        let sink_total: f64 = m.flow_by_sink.values().sum();
        if sink_total > 0.0 {
            for (label, flow) in &m.flow_by_sink {
                m.sink_share.insert(label.clone(), flow / sink_total);
            }
        }

        m.churn_rate = churn_count as f64 / total_agents.max(1) as f64;
        m.production_index = produce_volume / total_agents.max(1) as f64;

        // ------------------------------------------------------------------
        // Per-currency derivations.
        // ------------------------------------------------------------------
        let mut new_anchors = Vec::new();

        for currency in &state.currencies {
            let mut balances: Vec<f64> = agents
                .iter()
                .map(|agent| {
                    state
                        .agent_balances
                        .get(*agent)
                        .and_then(|b| b.get(currency))
                        .copied()
                        .unwrap_or(0.0)
                })
                .collect();
            balances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let supply: f64 = balances.iter().sum();
            let faucet = m
                .faucet_volume_by_currency
                .get(currency)
                .copied()
                .unwrap_or(0.0);
            let sink = m
                .sink_volume_by_currency
                .get(currency)
                .copied()
                .unwrap_or(0.0);

            m.total_supply_by_currency.insert(currency.clone(), supply);
            m.faucet_volume_by_currency
                .entry(currency.clone())
                .or_insert(0.0);
            m.sink_volume_by_currency
                .entry(currency.clone())
                .or_insert(0.0);
            m.net_flow_by_currency
                .insert(currency.clone(), faucet - sink);

            let tap_sink = if sink > 0.0 {
                (faucet / sink).min(TAP_SINK_RATIO_CAP)
            } else if faucet > 0.0 {
                TAP_SINK_RATIO_CAP
            } else {
                1.0
            };
            m.tap_sink_ratio_by_currency
                .insert(currency.clone(), tap_sink);

            let prev_supply = prev
                .and_then(|p| p.total_supply_by_currency.get(currency))
                .copied()
                .unwrap_or(0.0);
            let inflation = if prev_supply > 0.0 {
                (supply - prev_supply) / prev_supply
            } else {
                0.0
            };
            m.inflation_by_currency.insert(currency.clone(), inflation);

            let trade_tally = trades.get(currency);
            let trade_count = trade_tally.map(|t| t.count).unwrap_or(0);
            let velocity = if supply > 0.0 {
                trade_count as f64 / supply
            } else {
                0.0
            };
            m.velocity_by_currency.insert(currency.clone(), velocity);

            m.gift_trade_ratio_by_currency.insert(
                currency.clone(),
                trade_tally
                    .filter(|t| t.count > 0)
                    .map(|t| t.gifts as f64 / t.count as f64)
                    .unwrap_or(0.0),
            );
            m.disposal_trade_ratio_by_currency.insert(
                currency.clone(),
                trade_tally
                    .filter(|t| t.count > 0)
                    .map(|t| t.disposals as f64 / t.count as f64)
                    .unwrap_or(0.0),
            );

            // Wealth stats.
            let mean = if balances.is_empty() {
                0.0
            } else {
                supply / balances.len() as f64
            };
            let med = median(&balances);
            m.gini_by_currency.insert(currency.clone(), gini(&balances));
            m.mean_balance_by_currency.insert(currency.clone(), mean);
            m.median_balance_by_currency.insert(currency.clone(), med);
            m.top10_pct_share_by_currency
                .insert(currency.clone(), top_decile_share(&balances));
            m.mean_median_divergence_by_currency
                .insert(currency.clone(), mean_median_divergence(mean, med));

            // Prices.
            let prices = state.market_prices.get(currency);
            let price_index = prices
                .filter(|p| !p.is_empty())
                .map(|p| p.values().sum::<f64>() / p.len() as f64)
                .unwrap_or(0.0);
            m.price_index_by_currency
                .insert(currency.clone(), price_index);
            m.prices_by_currency
                .insert(currency.clone(), prices.cloned().unwrap_or_default());

            let mut volatility = HashMap::new();
            if let Some(prices) = prices {
                for (resource, price) in prices {
                    let prev_price = prev
                        .and_then(|p| p.prices_by_currency.get(currency))
                        .and_then(|p| p.get(resource))
                        .copied()
                        .unwrap_or(0.0);
                    let vol = if prev_price > 0.0 {
                        (price - prev_price).abs() / prev_price
                    } else {
                        0.0
                    };
                    volatility.insert(resource.clone(), vol);
                }
            }
            m.price_volatility_by_currency
                .insert(currency.clone(), volatility);

            m.arbitrage_index_by_currency.insert(
                currency.clone(),
                log_price_dispersion(prices.into_iter().flat_map(|p| p.values().copied())),
            );

            // Anchor drift.
            let per_agent = if total_agents > 0 {
                supply / total_agents as f64
            } else {
                0.0
            };
            let baseline = self.anchors.get(currency).copied().or_else(|| {
                if supply > 0.0 {
                    new_anchors.push((currency.clone(), per_agent));
                    Some(per_agent)
                } else {
                    None
                }
            });
            let drift = match baseline {
                Some(base) if base > 0.0 => (per_agent - base) / base,
                _ => 0.0,
            };
            m.anchor_ratio_drift_by_currency
                .insert(currency.clone(), drift);
        }

        m.pool_sizes = state.pool_sizes.clone().unwrap_or_default();

        // Pinch-point classification.
        for resource in &state.resources {
            let supply = m.resource_supply.get(resource).copied().unwrap_or(0.0);
            let demand = m.resource_demand.get(resource).copied().unwrap_or(0.0);
            let class = if demand > 0.0 && supply / demand < 0.5 {
                PinchPointClass::Scarce
            } else if demand > 0.0 && supply / demand > 3.0 {
                PinchPointClass::Oversupplied
            } else {
                PinchPointClass::Optimal
            };
            m.pinch_points.insert(resource.clone(), class);
        }

        let total_demand: f64 = m.resource_demand.values().sum();
        let total_resource_supply: f64 = m.resource_supply.values().sum();
        m.capacity_usage = (total_demand / total_resource_supply.max(1.0)).min(1.0);

        // ------------------------------------------------------------------
        // Scalar aggregates: arithmetic means of the per-currency maps;
        // total supply is the sum.
        // ------------------------------------------------------------------
        m.total_supply = m.total_supply_by_currency.values().sum();
        m.net_flow = mean_of(&m.net_flow_by_currency);
        m.velocity = mean_of(&m.velocity_by_currency);
        m.inflation_rate = mean_of(&m.inflation_by_currency);
        m.faucet_volume = mean_of(&m.faucet_volume_by_currency);
        m.sink_volume = mean_of(&m.sink_volume_by_currency);
        m.tap_sink_ratio = mean_of(&m.tap_sink_ratio_by_currency);
        m.anchor_ratio_drift = mean_of(&m.anchor_ratio_drift_by_currency);
        m.gini_coefficient = mean_of(&m.gini_by_currency);
        m.median_balance = mean_of(&m.median_balance_by_currency);
        m.top10_pct_share = mean_of(&m.top10_pct_share_by_currency);
        m.mean_median_divergence = mean_of(&m.mean_median_divergence_by_currency);
        m.price_index = mean_of(&m.price_index_by_currency);
        m.arbitrage_index = mean_of(&m.arbitrage_index_by_currency);
        m.gift_trade_ratio = mean_of(&m.gift_trade_ratio_by_currency);
        m.disposal_trade_ratio = mean_of(&m.disposal_trade_ratio_by_currency);
        m.mean_balance = if total_agents > 0 {
            m.total_supply / total_agents as f64
        } else {
            0.0
        };

        let per_currency_volatility: HashMap<String, f64> = m
            .price_volatility_by_currency
            .iter()
            .map(|(currency, vols)| (currency.clone(), mean_of(vols)))
            .collect();
        m.price_volatility = mean_of(&per_currency_volatility);

        // Satisfaction.
        if let Some(satisfaction) = &state.agent_satisfaction {
            if !satisfaction.is_empty() {
                m.avg_satisfaction =
                    satisfaction.values().sum::<f64>() / satisfaction.len() as f64;
                m.blocked_agent_count = satisfaction
                    .values()
                    .filter(|s| **s < self.blocked_satisfaction_threshold)
                    .count() as u64;
            }
        }

        // Developer metrics, contained.
        for (name, f) in &self.custom {
            match f(state) {
                Ok(value) => {
                    m.custom_metrics.insert(name.clone(), value);
                }
                Err(err) => {
                    warn!(metric = %name, error = %err, "custom metric failed; recording NaN");
                    m.custom_metrics.insert(name.clone(), f64::NAN);
                }
            }
        }

        // Content-drop age: reset on a tagged produce event, else count up.
        m.content_drop_age = if content_drop_seen {
            0
        } else {
            prev.map(|p| p.content_drop_age + 1).unwrap_or(0)
        };

        (m, new_anchors)
    }
}

fn mean_of(map: &HashMap<String, f64>) -> f64 {
    if map.is_empty() {
        0.0
    } else {
        map.values().sum::<f64>() / map.len() as f64
    }
}
