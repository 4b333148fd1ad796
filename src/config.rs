//! Regulator configuration and principle thresholds.
//!
//! Everything is constructible programmatically (struct update on `Default`)
//! and from the environment via `from_env`, CLI flags taking precedence in
//! the binary.

use crate::models::RegisteredParameter;
use serde::{Deserialize, Serialize};
use std::env;

/// Operating mode of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Apply plans through the adapter.
    #[default]
    Autonomous,
    /// Emit recommendations only; applying requires external approval.
    Advisor,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Autonomous => "autonomous",
            Mode::Advisor => "advisor",
        }
    }
}

/// Principle-specific cutoffs plus the planner/simulator knobs that ride
/// along with them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    /// Hard cap on per-step parameter change.
    pub max_adjustment_percent: f64,
    /// Floor on Monte-Carlo trials.
    pub simulation_min_iterations: usize,
    /// Forward projection horizon per trial.
    pub simulation_forward_ticks: usize,
    /// Multiplier on the 5-tick base lag for `estimatedEffectTick`.
    pub lag_multiplier_min: u64,

    pub anchor_drift_max: f64,
    pub inflation_max: f64,
    pub inflation_min: f64,
    pub tap_sink_ratio_min: f64,
    pub tap_sink_ratio_max: f64,
    pub gini_max: f64,
    pub top10_share_max: f64,
    pub role_dominance_max_share: f64,
    pub price_volatility_max: f64,
    pub arbitrage_index_max: f64,
    pub gift_trade_ratio_max: f64,
    pub disposal_trade_ratio_max: f64,
    pub satisfaction_min: f64,
    /// Agents below this satisfaction count as blocked.
    pub blocked_satisfaction_threshold: f64,
    pub blocked_share_max: f64,
    pub churn_rate_max: f64,
    pub velocity_min: f64,
    pub source_share_max: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_adjustment_percent: 0.15,
            simulation_min_iterations: 100,
            simulation_forward_ticks: 20,
            lag_multiplier_min: 1,
            anchor_drift_max: 0.25,
            inflation_max: 0.10,
            inflation_min: -0.05,
            tap_sink_ratio_min: 0.5,
            tap_sink_ratio_max: 2.0,
            gini_max: 0.45,
            top10_share_max: 0.60,
            role_dominance_max_share: 0.35,
            price_volatility_max: 0.15,
            arbitrage_index_max: 0.50,
            gift_trade_ratio_max: 0.30,
            disposal_trade_ratio_max: 0.30,
            satisfaction_min: 60.0,
            blocked_satisfaction_threshold: 25.0,
            blocked_share_max: 0.20,
            churn_rate_max: 0.05,
            velocity_min: 0.01,
            source_share_max: 0.60,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegulatorConfig {
    pub mode: Mode,
    /// Ticks of pure observation before any intervention.
    pub grace_period: u64,
    /// Pipeline runs every N ticks past grace.
    pub check_interval: u64,
    /// Min ticks between two adjustments of the same parameter.
    pub cooldown_ticks: u64,
    /// Ticks after apply before auto-settle.
    pub settlement_window_ticks: u64,
    /// Max concurrent active plans.
    pub complexity_budget_max: usize,
    /// Run registry checks on startup.
    pub validate_registry: bool,
    /// Roles exempt from crowding/suppression principles.
    pub dominant_roles: Vec<String>,
    /// Initial parameter set for the registry.
    pub parameters: Vec<RegisteredParameter>,
    pub thresholds: Thresholds,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Autonomous,
            grace_period: 50,
            check_interval: 5,
            cooldown_ticks: 15,
            settlement_window_ticks: 200,
            complexity_budget_max: 20,
            validate_registry: true,
            dominant_roles: Vec::new(),
            parameters: Vec::new(),
            thresholds: Thresholds::default(),
        }
    }
}

impl RegulatorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mode = match env::var("REGULATOR_MODE").as_deref() {
            Ok("advisor") => Mode::Advisor,
            _ => Mode::Autonomous,
        };

        Self {
            mode,
            grace_period: env_u64("REGULATOR_GRACE_PERIOD", defaults.grace_period),
            check_interval: env_u64("REGULATOR_CHECK_INTERVAL", defaults.check_interval).max(1),
            cooldown_ticks: env_u64("REGULATOR_COOLDOWN_TICKS", defaults.cooldown_ticks),
            settlement_window_ticks: env_u64(
                "REGULATOR_SETTLEMENT_WINDOW_TICKS",
                defaults.settlement_window_ticks,
            ),
            complexity_budget_max: env_u64(
                "REGULATOR_COMPLEXITY_BUDGET_MAX",
                defaults.complexity_budget_max as u64,
            ) as usize,
            validate_registry: env_bool("REGULATOR_VALIDATE_REGISTRY", true),
            dominant_roles: env::var("REGULATOR_DOMINANT_ROLES")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            parameters: Vec::new(),
            thresholds: Thresholds {
                max_adjustment_percent: env_f64(
                    "REGULATOR_MAX_ADJUSTMENT_PERCENT",
                    defaults.thresholds.max_adjustment_percent,
                ),
                simulation_min_iterations: env_u64(
                    "REGULATOR_SIMULATION_MIN_ITERATIONS",
                    defaults.thresholds.simulation_min_iterations as u64,
                ) as usize,
                ..defaults.thresholds
            },
        }
    }
}

/// Transport shell configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub port: u16,
    /// Bearer token required on mutation routes when set.
    pub api_key: Option<String>,
    /// Origin allowed for WebSocket upgrades; unset allows any.
    pub cors_origin: Option<String>,
    /// Max ticks per second across all connections.
    pub global_ticks_per_sec: u32,
    /// Max ticks per second per WebSocket connection.
    pub ws_ticks_per_sec: u32,
    /// WebSocket heartbeat interval.
    pub heartbeat_secs: u64,
    /// Max accepted WebSocket payload.
    pub max_ws_payload_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            api_key: None,
            cors_origin: None,
            global_ticks_per_sec: 20,
            ws_ticks_per_sec: 10,
            heartbeat_secs: 30,
            max_ws_payload_bytes: 1024 * 1024,
        }
    }
}

impl TransportConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_u64("PORT", defaults.port as u64) as u16,
            api_key: env::var("REGULATOR_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            cors_origin: env::var("REGULATOR_CORS_ORIGIN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            global_ticks_per_sec: env_u64(
                "REGULATOR_GLOBAL_TICKS_PER_SEC",
                defaults.global_ticks_per_sec as u64,
            ) as u32,
            ws_ticks_per_sec: env_u64(
                "REGULATOR_WS_TICKS_PER_SEC",
                defaults.ws_ticks_per_sec as u64,
            ) as u32,
            heartbeat_secs: env_u64("REGULATOR_WS_HEARTBEAT_SECS", defaults.heartbeat_secs),
            max_ws_payload_bytes: env_u64(
                "REGULATOR_WS_MAX_PAYLOAD_BYTES",
                defaults.max_ws_payload_bytes as u64,
            ) as usize,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let cfg = RegulatorConfig::default();
        assert_eq!(cfg.mode, Mode::Autonomous);
        assert_eq!(cfg.grace_period, 50);
        assert_eq!(cfg.check_interval, 5);
        assert_eq!(cfg.cooldown_ticks, 15);
        assert_eq!(cfg.settlement_window_ticks, 200);
        assert_eq!(cfg.complexity_budget_max, 20);
        assert!(cfg.validate_registry);
        assert_eq!(cfg.thresholds.max_adjustment_percent, 0.15);
        assert_eq!(cfg.thresholds.simulation_min_iterations, 100);
    }

    #[test]
    fn transport_defaults() {
        let t = TransportConfig::default();
        assert_eq!(t.global_ticks_per_sec, 20);
        assert_eq!(t.ws_ticks_per_sec, 10);
        assert_eq!(t.max_ws_payload_bytes, 1024 * 1024);
    }
}
