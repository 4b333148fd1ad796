//! Economic principle checks.
//!
//! A principle is a uniform predicate over one metrics snapshot plus the
//! configured thresholds. The registry is an ordered sequence of trait
//! objects; most built-ins are plain function-pointer records, checks that
//! carry configuration (role exemptions) get their own struct.

mod library;

pub use library::{default_principles, RoleCrowdingPrinciple};

use crate::config::Thresholds;
use crate::models::{EconomyMetrics, PrincipleResult};

pub trait Principle: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn category(&self) -> &str;
    fn description(&self) -> &str;
    fn check(&self, metrics: &EconomyMetrics, thresholds: &Thresholds) -> PrincipleResult;
}

/// Function-pointer backed principle record; covers every check that needs
/// no construction-time state.
pub struct PrincipleDef {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub check_fn: fn(&EconomyMetrics, &Thresholds) -> PrincipleResult,
}

impl Principle for PrincipleDef {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn category(&self) -> &str {
        self.category
    }

    fn description(&self) -> &str {
        self.description
    }

    fn check(&self, metrics: &EconomyMetrics, thresholds: &Thresholds) -> PrincipleResult {
        (self.check_fn)(metrics, thresholds)
    }
}
