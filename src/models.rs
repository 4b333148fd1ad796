//! Core data model for the economy regulator.
//!
//! Everything that crosses the wire (HTTP/WS) or is snapshotted into the
//! decision log lives here as a plain serde value type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hard cap on metadata keys per event; events above this are dropped at ingest.
pub const MAX_EVENT_METADATA_KEYS: usize = 50;

// ============================================================================
// Host state
// ============================================================================

/// Snapshot of the host economy, supplied once per tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EconomyState {
    pub tick: u64,
    pub roles: Vec<String>,
    pub resources: Vec<String>,
    pub currencies: Vec<String>,
    /// agent -> currency -> amount
    pub agent_balances: HashMap<String, HashMap<String, f64>>,
    /// agent -> role
    pub agent_roles: HashMap<String, String>,
    /// agent -> resource -> quantity
    pub agent_inventories: HashMap<String, HashMap<String, f64>>,
    /// agent -> 0..100; absent when the host does not track satisfaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_satisfaction: Option<HashMap<String, f64>>,
    /// currency -> resource -> price
    pub market_prices: HashMap<String, HashMap<String, f64>>,
    pub recent_transactions: Vec<EconomicEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_sizes: Option<HashMap<String, HashMap<String, f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub systems: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sinks: Option<Vec<String>>,
}

/// Kinds of economic events the observer classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Trade,
    Mint,
    Burn,
    Transfer,
    Produce,
    Consume,
    RoleChange,
    Enter,
    Churn,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Trade => "trade",
            EventKind::Mint => "mint",
            EventKind::Burn => "burn",
            EventKind::Transfer => "transfer",
            EventKind::Produce => "produce",
            EventKind::Consume => "consume",
            EventKind::RoleChange => "role_change",
            EventKind::Enter => "enter",
            EventKind::Churn => "churn",
        }
    }
}

/// One event from the host's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomicEvent {
    pub kind: EventKind,
    #[serde(default)]
    pub timestamp: u64,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Defaults to the state's first declared currency when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Subsystem label for per-system flow tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Named faucet/sink label for per-source flow tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_or_sink: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EconomicEvent {
    pub fn new(kind: EventKind, actor: impl Into<String>, amount: f64) -> Self {
        Self {
            kind,
            timestamp: 0,
            actor: actor.into(),
            role: None,
            resource: None,
            currency: None,
            amount,
            price: None,
            from: None,
            to: None,
            system: None,
            source_or_sink: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_source_or_sink(mut self, label: impl Into<String>) -> Self {
        self.source_or_sink = Some(label.into());
        self
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Pinch-point classification for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinchPointClass {
    Scarce,
    Optimal,
    Oversupplied,
}

/// Dense metrics vector produced by the Observer, one snapshot per tick.
///
/// Currency-indexed maps are keyed by the state's declared currencies; scalar
/// aggregates are arithmetic means over those maps except `total_supply`,
/// which is the sum.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EconomyMetrics {
    pub tick: u64,

    // Per-currency
    pub total_supply_by_currency: HashMap<String, f64>,
    pub net_flow_by_currency: HashMap<String, f64>,
    pub velocity_by_currency: HashMap<String, f64>,
    pub inflation_by_currency: HashMap<String, f64>,
    pub faucet_volume_by_currency: HashMap<String, f64>,
    pub sink_volume_by_currency: HashMap<String, f64>,
    pub tap_sink_ratio_by_currency: HashMap<String, f64>,
    pub anchor_ratio_drift_by_currency: HashMap<String, f64>,
    pub gini_by_currency: HashMap<String, f64>,
    pub mean_balance_by_currency: HashMap<String, f64>,
    pub median_balance_by_currency: HashMap<String, f64>,
    pub top10_pct_share_by_currency: HashMap<String, f64>,
    pub mean_median_divergence_by_currency: HashMap<String, f64>,
    pub price_index_by_currency: HashMap<String, f64>,
    /// currency -> resource -> price
    pub prices_by_currency: HashMap<String, HashMap<String, f64>>,
    /// currency -> resource -> |Δprice|/prev
    pub price_volatility_by_currency: HashMap<String, HashMap<String, f64>>,
    pub arbitrage_index_by_currency: HashMap<String, f64>,
    pub gift_trade_ratio_by_currency: HashMap<String, f64>,
    pub disposal_trade_ratio_by_currency: HashMap<String, f64>,
    /// pool -> currency -> amount, passed through from the state
    pub pool_sizes: HashMap<String, HashMap<String, f64>>,

    // Scalar aggregates
    pub total_supply: f64,
    pub net_flow: f64,
    pub velocity: f64,
    pub inflation_rate: f64,
    pub faucet_volume: f64,
    pub sink_volume: f64,
    pub tap_sink_ratio: f64,
    pub anchor_ratio_drift: f64,
    pub gini_coefficient: f64,
    pub mean_balance: f64,
    pub median_balance: f64,
    pub top10_pct_share: f64,
    pub mean_median_divergence: f64,
    pub price_index: f64,
    pub price_volatility: f64,
    pub arbitrage_index: f64,
    pub gift_trade_ratio: f64,
    pub disposal_trade_ratio: f64,

    // Population
    pub total_agents: u64,
    pub population_by_role: HashMap<String, u64>,
    pub role_shares: HashMap<String, f64>,
    pub churn_rate: f64,
    pub churn_by_role: HashMap<String, u64>,
    pub persona_distribution: HashMap<String, f64>,

    // Market scalars
    pub production_index: f64,
    pub capacity_usage: f64,

    // Resources
    pub resource_supply: HashMap<String, f64>,
    pub resource_demand: HashMap<String, f64>,
    pub pinch_points: HashMap<String, PinchPointClass>,

    // Satisfaction
    pub avg_satisfaction: f64,
    pub blocked_agent_count: u64,

    // Per-system
    pub flow_by_system: HashMap<String, f64>,
    pub activity_by_system: HashMap<String, u64>,
    pub participants_by_system: HashMap<String, u64>,

    // Per-source / per-sink
    pub flow_by_source: HashMap<String, f64>,
    pub flow_by_sink: HashMap<String, f64>,
    pub source_share: HashMap<String, f64>,
    pub sink_share: HashMap<String, f64>,

    // Developer-registered metrics; a failing callable leaves NaN here.
    pub custom_metrics: HashMap<String, f64>,

    // Reserved metrics, carried at 0 until a principle check populates them.
    pub smoke_test_ratio: f64,
    pub extraction_ratio: f64,
    pub new_user_dependency: f64,
    pub event_completion_rate: f64,
    pub currency_insulation: f64,
    /// Ticks since the last produce event tagged `metadata.contentDrop == true`.
    pub content_drop_age: u64,
}

impl EconomyMetrics {
    /// Empty snapshot used by stores before anything has been recorded.
    pub fn empty() -> Self {
        Self::default()
    }
}

// ============================================================================
// Principles and diagnoses
// ============================================================================

/// Outcome of one principle check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "violated")]
pub enum PrincipleResult {
    #[serde(rename = "false")]
    Ok,
    #[serde(rename = "true")]
    #[serde(rename_all = "camelCase")]
    Violated {
        /// 1..=10
        severity: u8,
        evidence: serde_json::Value,
        suggested_action: SuggestedAction,
        /// 0..=1
        confidence: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_lag: Option<u64>,
    },
}

impl PrincipleResult {
    pub fn is_violated(&self) -> bool {
        matches!(self, PrincipleResult::Violated { .. })
    }
}

/// A prioritized violation, as returned by the Diagnoser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub principle_id: String,
    pub principle_name: String,
    pub category: String,
    pub severity: u8,
    pub evidence: serde_json::Value,
    pub suggested_action: SuggestedAction,
    pub confidence: f64,
    pub estimated_lag: u64,
    pub tick: u64,
}

// ============================================================================
// Actions and plans
// ============================================================================

/// Direction of a suggested adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDirection {
    Increase,
    Decrease,
    Set,
}

/// Abstract corrective action; the Planner resolves the concrete parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedAction {
    pub parameter_type: String,
    pub direction: ActionDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ParameterScope>,
    pub reasoning: String,
}

/// Narrows which host knob a parameter type addresses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParameterScope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl ParameterScope {
    pub fn currency(currency: impl Into<String>) -> Self {
        Self {
            currency: Some(currency.into()),
            ..Default::default()
        }
    }

    pub fn system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            ..Default::default()
        }
    }
}

/// Static classification of a parameter's effect on net flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowImpact {
    Faucet,
    Sink,
    Neutral,
    Mixed,
}

/// A host parameter the regulator is allowed to adjust.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredParameter {
    pub key: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub flow_impact: FlowImpact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ParameterScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Per-parameter clamp applied to planned targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamConstraint {
    pub min: f64,
    pub max: f64,
}

/// Watch condition that triggers an automatic revert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackCondition {
    /// Dotted metric key path, e.g. `avgSatisfaction` or `giniByCurrency.gold`.
    pub metric: String,
    pub direction: RollbackDirection,
    pub threshold: f64,
    pub check_after_tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackDirection {
    Above,
    Below,
}

/// A concrete, validated adjustment ready for the Executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlan {
    pub id: String,
    pub diagnosis: Diagnosis,
    pub parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ParameterScope>,
    pub current_value: f64,
    pub target_value: f64,
    pub max_change_percent: f64,
    pub cooldown_ticks: u64,
    pub rollback_condition: RollbackCondition,
    pub simulation_result: SimulationResult,
    pub estimated_lag: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<u64>,
}

// ============================================================================
// Simulation
// ============================================================================

/// Monte-Carlo projection summary for one candidate action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub iterations: usize,
    pub forward_ticks: usize,
    pub p10_satisfaction: f64,
    pub p50_satisfaction: f64,
    pub mean_satisfaction: f64,
    /// mean ± 1.96σ over final satisfaction
    pub confidence_interval: (f64, f64),
    pub estimated_effect_tick: u64,
    /// Fraction of top-20% trials whose |netFlow| exceeds 2x current.
    pub overshoot_risk: f64,
    pub net_improvement: bool,
    pub no_new_problems: bool,
    pub p50_net_flow_by_currency: HashMap<String, f64>,
    pub p50_gini_by_currency: HashMap<String, f64>,
}

// ============================================================================
// Decision log entries
// ============================================================================

/// Terminal classification of one pipeline decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionResult {
    Applied,
    SkippedCooldown,
    SkippedSimulationFailed,
    SkippedLocked,
    SkippedOverride,
    RolledBack,
    Rejected,
}

impl DecisionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionResult::Applied => "applied",
            DecisionResult::SkippedCooldown => "skipped_cooldown",
            DecisionResult::SkippedSimulationFailed => "skipped_simulation_failed",
            DecisionResult::SkippedLocked => "skipped_locked",
            DecisionResult::SkippedOverride => "skipped_override",
            DecisionResult::RolledBack => "rolled_back",
            DecisionResult::Rejected => "rejected",
        }
    }
}

/// One recorded decision. Plans are stored by value so later mutation of the
/// live plan cannot reach back into the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionEntry {
    pub id: String,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub diagnosis: Diagnosis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ActionPlan>,
    pub result: DecisionResult,
    pub reasoning: String,
    pub metrics_snapshot: EconomyMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trips_snake_case() {
        let json = serde_json::to_string(&EventKind::RoleChange).unwrap();
        assert_eq!(json, "\"role_change\"");
        let back: EventKind = serde_json::from_str("\"role_change\"").unwrap();
        assert_eq!(back, EventKind::RoleChange);
    }

    #[test]
    fn state_deserializes_with_missing_optionals() {
        let raw = r#"{
            "tick": 3,
            "roles": ["trader"],
            "currencies": ["gold"],
            "agentBalances": {"a1": {"gold": 10.0}},
            "agentRoles": {"a1": "trader"}
        }"#;
        let state: EconomyState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.tick, 3);
        assert!(state.agent_satisfaction.is_none());
        assert!(state.pool_sizes.is_none());
        assert!(state.recent_transactions.is_empty());
    }

    #[test]
    fn principle_result_tags_on_violated() {
        let violated = PrincipleResult::Violated {
            severity: 7,
            evidence: serde_json::json!({"giniCoefficient": 0.61}),
            suggested_action: SuggestedAction {
                parameter_type: "tax".into(),
                direction: ActionDirection::Increase,
                magnitude: Some(0.1),
                absolute_value: None,
                scope: None,
                reasoning: "wealth concentration".into(),
            },
            confidence: 0.9,
            estimated_lag: None,
        };
        let json = serde_json::to_value(&violated).unwrap();
        assert_eq!(json["violated"], "true");
        assert_eq!(json["severity"], 7);

        let ok = serde_json::to_value(PrincipleResult::Ok).unwrap();
        assert_eq!(ok["violated"], "false");
    }

    #[test]
    fn metrics_default_is_finite_and_empty() {
        let m = EconomyMetrics::empty();
        assert_eq!(m.tick, 0);
        assert_eq!(m.total_supply, 0.0);
        assert!(m.gini_by_currency.is_empty());
    }
}
