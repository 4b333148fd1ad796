//! Parameter registry with scope-based resolution.
//!
//! Candidates are kept in registration order; re-registering a key replaces
//! the existing entry in place, so `size` counts unique keys.

use crate::models::{FlowImpact, ParameterScope, RegisteredParameter};
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct ParameterRegistry {
    entries: Vec<RegisteredParameter>,
    index: HashMap<String, usize>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a copy of the parameter; the caller's value cannot mutate the
    /// registry afterwards. The later registration wins for a duplicate key.
    pub fn register(&mut self, param: &RegisteredParameter) {
        match self.index.get(&param.key) {
            Some(&i) => self.entries[i] = param.clone(),
            None => {
                self.index.insert(param.key.clone(), self.entries.len());
                self.entries.push(param.clone());
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&RegisteredParameter> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn get_all(&self) -> &[RegisteredParameter] {
        &self.entries
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn find_by_type(&self, param_type: &str) -> Vec<&RegisteredParameter> {
        self.entries
            .iter()
            .filter(|p| p.param_type == param_type)
            .collect()
    }

    pub fn find_by_system(&self, system: &str) -> Vec<&RegisteredParameter> {
        self.entries
            .iter()
            .filter(|p| {
                p.scope
                    .as_ref()
                    .and_then(|s| s.system.as_deref())
                    .is_some_and(|s| s == system)
            })
            .collect()
    }

    /// No-op when the key is absent.
    pub fn update_value(&mut self, key: &str, value: f64) {
        if let Some(&i) = self.index.get(key) {
            self.entries[i].current_value = Some(value);
        }
    }

    pub fn get_flow_impact(&self, key: &str) -> Option<FlowImpact> {
        self.get(key).map(|p| p.flow_impact)
    }

    /// Resolves an abstract parameter type + scope to a concrete parameter.
    ///
    /// Zero candidates -> `None`. One candidate -> that candidate regardless
    /// of scope mismatch. Multiple -> scored; the first strict improvement
    /// over a running best of -1 wins, so a resolution with all candidates
    /// disqualified (score <= -1) returns `None`.
    pub fn resolve(
        &self,
        param_type: &str,
        scope: Option<&ParameterScope>,
    ) -> Option<&RegisteredParameter> {
        let candidates = self.find_by_type(param_type);
        match candidates.len() {
            0 => None,
            1 => Some(candidates[0]),
            _ => {
                let mut best: Option<&RegisteredParameter> = None;
                let mut best_score = -1i64;
                for cand in candidates {
                    let score = scope_score(cand.scope.as_ref(), scope);
                    if score > best_score {
                        best_score = score;
                        best = Some(cand);
                    }
                }
                best
            }
        }
    }
}

fn scope_score(candidate: Option<&ParameterScope>, query: Option<&ParameterScope>) -> i64 {
    let Some(cand) = candidate else { return 0 };
    let mut score = 0i64;

    if let Some(cand_system) = cand.system.as_deref() {
        match query.and_then(|q| q.system.as_deref()) {
            Some(q_system) if q_system == cand_system => score += 10,
            _ => score -= 1,
        }
    }

    if let Some(cand_currency) = cand.currency.as_deref() {
        match query.and_then(|q| q.currency.as_deref()) {
            Some(q_currency) if q_currency == cand_currency => score += 5,
            _ => score -= 1,
        }
    }

    let cand_tags = cand.tags.as_deref().unwrap_or_default();
    let query_tags = query.and_then(|q| q.tags.as_deref()).unwrap_or_default();
    if !cand_tags.is_empty() && !query_tags.is_empty() {
        let overlap = cand_tags.iter().filter(|t| query_tags.contains(t)).count() as i64;
        if overlap > 0 {
            score += 3 * overlap;
        } else {
            score -= 1;
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(key: &str, param_type: &str, scope: Option<ParameterScope>) -> RegisteredParameter {
        RegisteredParameter {
            key: key.to_string(),
            param_type: param_type.to_string(),
            flow_impact: FlowImpact::Sink,
            scope,
            current_value: Some(1.0),
            description: None,
        }
    }

    #[test]
    fn duplicate_registration_keeps_size_one_and_later_wins() {
        let mut reg = ParameterRegistry::new();
        reg.register(&param("fee", "fee", None));
        let mut updated = param("fee", "fee", None);
        updated.current_value = Some(2.5);
        reg.register(&updated);

        assert_eq!(reg.size(), 1);
        assert_eq!(reg.get("fee").unwrap().current_value, Some(2.5));
    }

    #[test]
    fn register_copies_input() {
        let mut reg = ParameterRegistry::new();
        let mut p = param("fee", "fee", None);
        reg.register(&p);
        p.current_value = Some(99.0);
        assert_eq!(reg.get("fee").unwrap().current_value, Some(1.0));
    }

    #[test]
    fn single_candidate_wins_regardless_of_scope() {
        let mut reg = ParameterRegistry::new();
        reg.register(&param(
            "gold_fee",
            "fee",
            Some(ParameterScope::currency("gold")),
        ));

        let resolved = reg
            .resolve("fee", Some(&ParameterScope::currency("gems")))
            .unwrap();
        assert_eq!(resolved.key, "gold_fee");
    }

    #[test]
    fn currency_scope_scoring_selects_matching_candidate() {
        let mut reg = ParameterRegistry::new();
        reg.register(&param(
            "gold_fee",
            "fee",
            Some(ParameterScope::currency("gold")),
        ));
        reg.register(&param(
            "gem_fee",
            "fee",
            Some(ParameterScope::currency("gems")),
        ));

        let gems = reg
            .resolve("fee", Some(&ParameterScope::currency("gems")))
            .unwrap();
        assert_eq!(gems.key, "gem_fee");

        let gold = reg
            .resolve("fee", Some(&ParameterScope::currency("gold")))
            .unwrap();
        assert_eq!(gold.key, "gold_fee");
    }

    #[test]
    fn system_match_outweighs_currency_match() {
        let mut reg = ParameterRegistry::new();
        reg.register(&param(
            "crafting_fee",
            "fee",
            Some(ParameterScope::system("crafting")),
        ));
        reg.register(&param(
            "gold_fee",
            "fee",
            Some(ParameterScope::currency("gold")),
        ));

        let query = ParameterScope {
            system: Some("crafting".into()),
            currency: Some("gold".into()),
            tags: None,
        };
        assert_eq!(reg.resolve("fee", Some(&query)).unwrap().key, "crafting_fee");
    }

    #[test]
    fn all_disqualified_returns_none() {
        let mut reg = ParameterRegistry::new();
        reg.register(&param(
            "a_fee",
            "fee",
            Some(ParameterScope {
                system: Some("arena".into()),
                currency: Some("gold".into()),
                tags: None,
            }),
        ));
        reg.register(&param(
            "b_fee",
            "fee",
            Some(ParameterScope {
                system: Some("bazaar".into()),
                currency: Some("gems".into()),
                tags: None,
            }),
        ));

        // Neither candidate matches anything: both score -2.
        let query = ParameterScope {
            system: Some("mines".into()),
            currency: Some("shells".into()),
            tags: None,
        };
        assert!(reg.resolve("fee", Some(&query)).is_none());
    }

    #[test]
    fn tag_overlap_accumulates() {
        let mut reg = ParameterRegistry::new();
        reg.register(&param(
            "one_tag",
            "reward",
            Some(ParameterScope {
                tags: Some(vec!["combat".into()]),
                ..Default::default()
            }),
        ));
        reg.register(&param(
            "two_tags",
            "reward",
            Some(ParameterScope {
                tags: Some(vec!["combat".into(), "daily".into()]),
                ..Default::default()
            }),
        ));

        let query = ParameterScope {
            tags: Some(vec!["combat".into(), "daily".into()]),
            ..Default::default()
        };
        assert_eq!(reg.resolve("reward", Some(&query)).unwrap().key, "two_tags");
    }

    #[test]
    fn update_value_is_noop_for_unknown_key() {
        let mut reg = ParameterRegistry::new();
        reg.update_value("ghost", 5.0);
        assert_eq!(reg.size(), 0);
    }

    #[test]
    fn resolved_key_always_present_in_find_by_type() {
        let mut reg = ParameterRegistry::new();
        reg.register(&param("x_fee", "fee", None));
        reg.register(&param("y_fee", "fee", Some(ParameterScope::currency("gold"))));

        let resolved = reg.resolve("fee", Some(&ParameterScope::currency("gold")));
        if let Some(r) = resolved {
            assert!(reg.find_by_type("fee").iter().any(|p| p.key == r.key));
        }
    }
}
