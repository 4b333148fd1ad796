//! Default principle library.
//!
//! Fourteen checks covering supply anchoring, flow balance, distribution,
//! market health, population health and faucet diversity. Each check reads
//! the metrics snapshot only; thresholds carry every cutoff.

use super::{Principle, PrincipleDef};
use crate::config::Thresholds;
use crate::models::{
    ActionDirection, EconomyMetrics, ParameterScope, PinchPointClass, PrincipleResult,
    SuggestedAction,
};
use serde_json::json;
use std::collections::HashMap;

/// Builds the default ordered library. `dominant_roles` are exempt from the
/// crowding check (P5).
pub fn default_principles(dominant_roles: Vec<String>) -> Vec<Box<dyn Principle>> {
    vec![
        Box::new(PrincipleDef {
            id: "P1",
            name: "Currency Supply Is Anchored",
            category: "supply",
            description: "Per-agent currency supply stays near its first-tick baseline.",
            check_fn: check_anchor_drift,
        }),
        Box::new(PrincipleDef {
            id: "P2",
            name: "Inflation Is Bounded",
            category: "supply",
            description: "Per-currency supply growth stays inside the configured band.",
            check_fn: check_inflation,
        }),
        Box::new(PrincipleDef {
            id: "P3",
            name: "Faucets Balance Sinks",
            category: "flow",
            description: "Faucet volume stays proportionate to sink volume.",
            check_fn: check_tap_sink_balance,
        }),
        Box::new(PrincipleDef {
            id: "P4",
            name: "Wealth Concentration Is Bounded",
            category: "distribution",
            description: "Gini coefficient and top-decile share stay below their caps.",
            check_fn: check_wealth_concentration,
        }),
        Box::new(RoleCrowdingPrinciple::new(dominant_roles)),
        Box::new(PrincipleDef {
            id: "P6",
            name: "Prices Are Stable",
            category: "market",
            description: "Mean price volatility stays below the configured cap.",
            check_fn: check_price_stability,
        }),
        Box::new(PrincipleDef {
            id: "P7",
            name: "No Systemic Arbitrage",
            category: "market",
            description: "Dispersion of log prices within a currency stays bounded.",
            check_fn: check_arbitrage,
        }),
        Box::new(PrincipleDef {
            id: "P8",
            name: "Trade Is Purposeful",
            category: "market",
            description: "Gift and disposal trades stay a minority of trade volume.",
            check_fn: check_trade_purpose,
        }),
        Box::new(PrincipleDef {
            id: "P9",
            name: "Satisfaction Is Healthy",
            category: "population",
            description: "Average satisfaction stays above the configured floor.",
            check_fn: check_satisfaction,
        }),
        Box::new(PrincipleDef {
            id: "P10",
            name: "Churn Is Contained",
            category: "population",
            description: "Per-tick churn stays below the configured rate.",
            check_fn: check_churn,
        }),
        Box::new(PrincipleDef {
            id: "P11",
            name: "Resources Flow Freely",
            category: "resources",
            description: "No resource is classified as a scarce pinch point.",
            check_fn: check_pinch_points,
        }),
        Box::new(PrincipleDef {
            id: "P12",
            name: "Velocity Is Alive",
            category: "flow",
            description: "Currency changes hands at a minimum rate.",
            check_fn: check_velocity,
        }),
        Box::new(PrincipleDef {
            id: "P13",
            name: "Sources Are Diverse",
            category: "flow",
            description: "No single faucet dominates currency creation.",
            check_fn: check_source_diversity,
        }),
        Box::new(PrincipleDef {
            id: "P14",
            name: "Progression Is Liquid",
            category: "population",
            description: "Blocked agents stay a small share of the population.",
            check_fn: check_blocked_share,
        }),
    ]
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Severity from how far a value sits beyond its threshold (`ratio >= 1`).
fn severity(ratio: f64) -> u8 {
    (ratio * 4.0).round().clamp(1.0, 10.0) as u8
}

/// Confidence grows with margin beyond the threshold, capped below 1.
fn confidence(ratio: f64) -> f64 {
    (0.55 + 0.2 * (ratio - 1.0)).clamp(0.5, 0.95)
}

fn worst_abs(map: &HashMap<String, f64>) -> Option<(&str, f64)> {
    map.iter()
        .max_by(|a, b| {
            a.1.abs()
                .partial_cmp(&b.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(k, v)| (k.as_str(), *v))
}

fn worst_value(map: &HashMap<String, f64>) -> Option<(&str, f64)> {
    map.iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(k, v)| (k.as_str(), *v))
}

fn violation(
    severity: u8,
    evidence: serde_json::Value,
    action: SuggestedAction,
    confidence: f64,
) -> PrincipleResult {
    PrincipleResult::Violated {
        severity,
        evidence,
        suggested_action: action,
        confidence,
        estimated_lag: Some(5),
    }
}

fn action(
    parameter_type: &str,
    direction: ActionDirection,
    scope: Option<ParameterScope>,
    reasoning: String,
) -> SuggestedAction {
    SuggestedAction {
        parameter_type: parameter_type.to_string(),
        direction,
        magnitude: Some(0.10),
        absolute_value: None,
        scope,
        reasoning,
    }
}

// ============================================================================
// Checks
// ============================================================================

fn check_anchor_drift(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    let Some((currency, drift)) = worst_abs(&m.anchor_ratio_drift_by_currency) else {
        return PrincipleResult::Ok;
    };
    if drift.abs() <= t.anchor_drift_max {
        return PrincipleResult::Ok;
    }
    let ratio = drift.abs() / t.anchor_drift_max;
    let (param, reasoning) = if drift > 0.0 {
        (
            "sink_rate",
            format!("per-agent supply of '{currency}' drifted {:.0}% above its anchor", drift * 100.0),
        )
    } else {
        (
            "faucet_rate",
            format!("per-agent supply of '{currency}' drifted {:.0}% below its anchor", -drift * 100.0),
        )
    };
    violation(
        severity(ratio),
        json!({ "currency": currency, "anchorRatioDrift": drift }),
        action(
            param,
            ActionDirection::Increase,
            Some(ParameterScope::currency(currency)),
            reasoning,
        ),
        confidence(ratio),
    )
}

fn check_inflation(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    let Some((currency, rate)) = worst_abs(&m.inflation_by_currency) else {
        return PrincipleResult::Ok;
    };
    if rate <= t.inflation_max && rate >= t.inflation_min {
        return PrincipleResult::Ok;
    }
    let (param, bound, reasoning) = if rate > t.inflation_max {
        (
            "sink_rate",
            t.inflation_max,
            format!("'{currency}' inflating at {:.1}% per tick", rate * 100.0),
        )
    } else {
        (
            "faucet_rate",
            t.inflation_min.abs().max(f64::EPSILON),
            format!("'{currency}' deflating at {:.1}% per tick", -rate * 100.0),
        )
    };
    let ratio = rate.abs() / bound.abs().max(f64::EPSILON);
    violation(
        severity(ratio),
        json!({ "currency": currency, "inflationRate": rate }),
        action(
            param,
            ActionDirection::Increase,
            Some(ParameterScope::currency(currency)),
            reasoning,
        ),
        confidence(ratio),
    )
}

fn check_tap_sink_balance(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    for (currency, ratio) in &m.tap_sink_ratio_by_currency {
        if *ratio > t.tap_sink_ratio_max {
            let over = ratio / t.tap_sink_ratio_max;
            return violation(
                severity(over),
                json!({ "currency": currency, "tapSinkRatio": ratio }),
                action(
                    "fee",
                    ActionDirection::Increase,
                    Some(ParameterScope::currency(currency)),
                    format!("faucets outpace sinks {ratio:.1}:1 for '{currency}'"),
                ),
                confidence(over),
            );
        }
        if *ratio < t.tap_sink_ratio_min {
            let over = t.tap_sink_ratio_min / ratio.max(f64::EPSILON);
            return violation(
                severity(over),
                json!({ "currency": currency, "tapSinkRatio": ratio }),
                action(
                    "reward",
                    ActionDirection::Increase,
                    Some(ParameterScope::currency(currency)),
                    format!("sinks drain '{currency}' {:.1}x faster than faucets refill it", 1.0 / ratio.max(f64::EPSILON)),
                ),
                confidence(over),
            );
        }
    }
    PrincipleResult::Ok
}

fn check_wealth_concentration(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    let Some((currency, gini)) = worst_value(&m.gini_by_currency) else {
        return PrincipleResult::Ok;
    };
    let top_share = m
        .top10_pct_share_by_currency
        .get(currency)
        .copied()
        .unwrap_or(0.0);
    if gini <= t.gini_max && top_share <= t.top10_share_max {
        return PrincipleResult::Ok;
    }
    let ratio = (gini / t.gini_max).max(top_share / t.top10_share_max);
    violation(
        severity(ratio),
        json!({
            "currency": currency,
            "giniCoefficient": gini,
            "top10PctShare": top_share,
        }),
        action(
            "tax",
            ActionDirection::Increase,
            Some(ParameterScope::currency(currency)),
            format!(
                "wealth in '{currency}' concentrating (gini {gini:.2}, top decile {:.0}%)",
                top_share * 100.0
            ),
        ),
        confidence(ratio),
    )
}

/// P5 "Profitability Is Competitive": one role crowds the population, which
/// means its payoff dominates every alternative. Roles listed as dominant by
/// design are exempt.
pub struct RoleCrowdingPrinciple {
    exempt: Vec<String>,
}

impl RoleCrowdingPrinciple {
    pub fn new(exempt: Vec<String>) -> Self {
        Self { exempt }
    }
}

impl Principle for RoleCrowdingPrinciple {
    fn id(&self) -> &str {
        "P5"
    }

    fn name(&self) -> &str {
        "Profitability Is Competitive"
    }

    fn category(&self) -> &str {
        "population"
    }

    fn description(&self) -> &str {
        "No single role's payoff pulls a dominant share of the population."
    }

    fn check(&self, m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
        let crowding = m
            .role_shares
            .iter()
            .filter(|(role, _)| !self.exempt.contains(role))
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
        let Some((role, share)) = crowding else {
            return PrincipleResult::Ok;
        };
        if *share <= t.role_dominance_max_share {
            return PrincipleResult::Ok;
        }
        let ratio = share / t.role_dominance_max_share;
        violation(
            severity(ratio),
            json!({
                "dominantRole": role,
                "share": share,
                "population": m.population_by_role.get(role).copied().unwrap_or(0),
            }),
            action(
                "reward",
                ActionDirection::Decrease,
                None,
                format!(
                    "role '{role}' crowds the population at {:.1}% share; its profitability outcompetes every alternative",
                    share * 100.0
                ),
            ),
            confidence(ratio),
        )
    }
}

fn check_price_stability(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    if m.price_volatility <= t.price_volatility_max {
        return PrincipleResult::Ok;
    }
    let ratio = m.price_volatility / t.price_volatility_max;
    violation(
        severity(ratio),
        json!({ "priceVolatility": m.price_volatility }),
        action(
            "fee",
            ActionDirection::Increase,
            None,
            format!(
                "mean price volatility {:.1}% exceeds the stability band",
                m.price_volatility * 100.0
            ),
        ),
        confidence(ratio),
    )
}

fn check_arbitrage(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    let Some((currency, index)) = worst_value(&m.arbitrage_index_by_currency) else {
        return PrincipleResult::Ok;
    };
    if index <= t.arbitrage_index_max {
        return PrincipleResult::Ok;
    }
    let ratio = index / t.arbitrage_index_max;
    violation(
        severity(ratio),
        json!({ "currency": currency, "arbitrageIndex": index }),
        action(
            "fee",
            ActionDirection::Increase,
            Some(ParameterScope::currency(currency)),
            format!("price dispersion in '{currency}' supports systemic arbitrage loops"),
        ),
        confidence(ratio),
    )
}

fn check_trade_purpose(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    let gift = m.gift_trade_ratio;
    let disposal = m.disposal_trade_ratio;
    if gift <= t.gift_trade_ratio_max && disposal <= t.disposal_trade_ratio_max {
        return PrincipleResult::Ok;
    }
    let ratio = (gift / t.gift_trade_ratio_max).max(disposal / t.disposal_trade_ratio_max);
    violation(
        severity(ratio),
        json!({ "giftTradeRatio": gift, "disposalTradeRatio": disposal }),
        action(
            "cost",
            ActionDirection::Decrease,
            None,
            format!(
                "{:.0}% of trades are gifts and {:.0}% are inventory disposal; the market is not clearing on price",
                gift * 100.0,
                disposal * 100.0
            ),
        ),
        confidence(ratio),
    )
}

fn check_satisfaction(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    if m.total_agents == 0 || m.avg_satisfaction >= t.satisfaction_min {
        return PrincipleResult::Ok;
    }
    let ratio = t.satisfaction_min / m.avg_satisfaction.max(1.0);
    violation(
        severity(ratio),
        json!({ "avgSatisfaction": m.avg_satisfaction }),
        action(
            "reward",
            ActionDirection::Increase,
            None,
            format!(
                "average satisfaction {:.0} has fallen below the {:.0} floor",
                m.avg_satisfaction, t.satisfaction_min
            ),
        ),
        confidence(ratio),
    )
}

fn check_churn(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    if m.churn_rate <= t.churn_rate_max {
        return PrincipleResult::Ok;
    }
    let ratio = m.churn_rate / t.churn_rate_max;
    violation(
        severity(ratio),
        json!({ "churnRate": m.churn_rate, "churnByRole": m.churn_by_role }),
        action(
            "cost",
            ActionDirection::Decrease,
            None,
            format!("churn at {:.1}% of the population per tick", m.churn_rate * 100.0),
        ),
        confidence(ratio),
    )
}

fn check_pinch_points(m: &EconomyMetrics, _t: &Thresholds) -> PrincipleResult {
    let scarce: Vec<&str> = m
        .pinch_points
        .iter()
        .filter(|(_, class)| **class == PinchPointClass::Scarce)
        .map(|(resource, _)| resource.as_str())
        .collect();
    if scarce.is_empty() {
        return PrincipleResult::Ok;
    }
    let share = scarce.len() as f64 / m.pinch_points.len().max(1) as f64;
    violation(
        severity(1.0 + share * 2.0),
        json!({ "scarceResources": scarce }),
        action(
            "drop_rate",
            ActionDirection::Increase,
            None,
            format!("{} resource(s) are scarce pinch points throttling downstream activity", scarce.len()),
        ),
        confidence(1.0 + share),
    )
}

fn check_velocity(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    let starved = m
        .velocity_by_currency
        .iter()
        .filter(|(currency, v)| {
            **v < t.velocity_min
                && m.total_supply_by_currency
                    .get(*currency)
                    .copied()
                    .unwrap_or(0.0)
                    > 0.0
        })
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
    let Some((currency, velocity)) = starved else {
        return PrincipleResult::Ok;
    };
    let ratio = t.velocity_min / velocity.max(f64::EPSILON);
    violation(
        severity(ratio.min(2.5)),
        json!({ "currency": currency, "velocity": velocity }),
        action(
            "fee",
            ActionDirection::Decrease,
            Some(ParameterScope::currency(currency)),
            format!("'{currency}' barely changes hands; holders are sitting on it"),
        ),
        confidence(ratio.min(2.0)),
    )
}

fn check_source_diversity(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    let Some((source, share)) = worst_value(&m.source_share) else {
        return PrincipleResult::Ok;
    };
    if m.source_share.len() < 2 || share <= t.source_share_max {
        return PrincipleResult::Ok;
    }
    let ratio = share / t.source_share_max;
    violation(
        severity(ratio),
        json!({ "source": source, "share": share }),
        action(
            "faucet_rate",
            ActionDirection::Decrease,
            None,
            format!("faucet '{source}' supplies {:.0}% of all currency creation", share * 100.0),
        ),
        confidence(ratio),
    )
}

fn check_blocked_share(m: &EconomyMetrics, t: &Thresholds) -> PrincipleResult {
    if m.total_agents == 0 {
        return PrincipleResult::Ok;
    }
    let share = m.blocked_agent_count as f64 / m.total_agents as f64;
    if share <= t.blocked_share_max {
        return PrincipleResult::Ok;
    }
    let ratio = share / t.blocked_share_max;
    violation(
        severity(ratio),
        json!({ "blockedAgentCount": m.blocked_agent_count, "share": share }),
        action(
            "yield",
            ActionDirection::Increase,
            None,
            format!(
                "{:.0}% of agents are blocked below the satisfaction floor",
                share * 100.0
            ),
        ),
        confidence(ratio),
    )
}
