//! Structural validation of host-supplied economy state.
//!
//! Type-level errors (wrong shapes, negative ticks) are already rejected by
//! strict JSON parsing at the transport; this validator covers the semantic
//! rules on top of a well-typed `EconomyState`.

use crate::models::EconomyState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub path: String,
    pub expected: String,
    pub received: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
}

pub fn validate_state(state: &EconomyState) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if state.roles.is_empty() {
        errors.push(issue(
            "roles",
            "non-empty string sequence",
            "[]",
            "at least one role must be declared",
        ));
    }
    if state.currencies.is_empty() {
        errors.push(issue(
            "currencies",
            "non-empty string sequence",
            "[]",
            "at least one currency must be declared",
        ));
    }

    for (agent, balances) in &state.agent_balances {
        for (currency, amount) in balances {
            if !state.currencies.contains(currency) {
                errors.push(issue(
                    &format!("agentBalances.{agent}.{currency}"),
                    "declared currency",
                    currency,
                    "balance references an undeclared currency",
                ));
            }
            if !amount.is_finite() || *amount < 0.0 {
                errors.push(issue(
                    &format!("agentBalances.{agent}.{currency}"),
                    "non-negative number",
                    &amount.to_string(),
                    "balances must be non-negative and finite",
                ));
            }
        }
    }

    for (agent, role) in &state.agent_roles {
        if !state.roles.contains(role) {
            errors.push(issue(
                &format!("agentRoles.{agent}"),
                "declared role",
                role,
                "agent role is not in the declared role set",
            ));
        }
    }

    for (currency, prices) in &state.market_prices {
        if !state.currencies.contains(currency) {
            errors.push(issue(
                &format!("marketPrices.{currency}"),
                "declared currency",
                currency,
                "price table references an undeclared currency",
            ));
        }
        for (resource, price) in prices {
            if !price.is_finite() || *price < 0.0 {
                errors.push(issue(
                    &format!("marketPrices.{currency}.{resource}"),
                    "non-negative number",
                    &price.to_string(),
                    "prices must be non-negative and finite",
                ));
            }
        }
    }

    if let Some(satisfaction) = &state.agent_satisfaction {
        for (agent, value) in satisfaction {
            if !value.is_finite() || !(0.0..=100.0).contains(value) {
                errors.push(issue(
                    &format!("agentSatisfaction.{agent}"),
                    "number in [0, 100]",
                    &value.to_string(),
                    "satisfaction must be within [0, 100]",
                ));
            }
        }
    }

    if let Some(pools) = &state.pool_sizes {
        for (pool, balances) in pools {
            for (currency, amount) in balances {
                if !amount.is_finite() || *amount < 0.0 {
                    errors.push(issue(
                        &format!("poolSizes.{pool}.{currency}"),
                        "non-negative number",
                        &amount.to_string(),
                        "pool sizes must be non-negative and finite",
                    ));
                }
            }
        }
    }

    // Warnings: structurally fine, semantically suspicious.
    for currency in &state.currencies {
        let held = state
            .agent_balances
            .values()
            .any(|b| b.get(currency).copied().unwrap_or(0.0) > 0.0);
        if !held {
            warnings.push(format!("declared currency '{currency}' has no holder"));
        }
    }

    for agent in state.agent_balances.keys() {
        if !state.agent_roles.contains_key(agent) {
            warnings.push(format!("agent '{agent}' holds a balance but has no role"));
        }
    }

    for event in &state.recent_transactions {
        if let Some(currency) = &event.currency {
            if !state.currencies.contains(currency) {
                warnings.push(format!(
                    "event from '{}' references unknown currency '{currency}'",
                    event.actor
                ));
            }
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn issue(path: &str, expected: &str, received: &str, message: &str) -> ValidationIssue {
    ValidationIssue {
        path: path.to_string(),
        expected: expected.to_string(),
        received: received.to_string(),
        message: message.to_string(),
    }
}
