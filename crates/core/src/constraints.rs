use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ConstraintsConfig;
use crate::fields::{FieldMap, AVAILABILITY, BUDGET_RANGE, TIMELINE, URGENCY};

pub const NOT_A_FIT_BUDGET: &str = "not_a_fit_budget";
pub const TIMELINE_REQUIRED: &str = "timeline_required";
pub const AVAILABILITY_CONFLICT: &str = "availability_conflict";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Inconsistency,
    Blocking,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub note: String,
    pub fields: Vec<String>,
}

impl ConstraintFinding {
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

/// Feasibility rules over a field map. Implementations must be pure: each call replaces the
/// previous findings wholesale.
pub trait ConstraintEngine: Send + Sync {
    fn evaluate(&self, fields: &FieldMap) -> Vec<ConstraintFinding>;
}

#[derive(Clone, Debug)]
pub struct DeterministicConstraintEngine {
    budget_floor: Decimal,
    not_a_fit_budget: bool,
    timeline_required: bool,
    availability_conflict: bool,
}

impl Default for DeterministicConstraintEngine {
    fn default() -> Self {
        Self {
            budget_floor: Decimal::from(10),
            not_a_fit_budget: true,
            timeline_required: true,
            availability_conflict: true,
        }
    }
}

impl DeterministicConstraintEngine {
    pub fn from_config(config: &ConstraintsConfig) -> Self {
        Self {
            budget_floor: config.budget_floor,
            not_a_fit_budget: config.not_a_fit_budget,
            timeline_required: config.timeline_required,
            availability_conflict: config.availability_conflict,
        }
    }
}

impl ConstraintEngine for DeterministicConstraintEngine {
    fn evaluate(&self, fields: &FieldMap) -> Vec<ConstraintFinding> {
        let mut findings = Vec::new();

        if self.not_a_fit_budget {
            let ceiling =
                fields.get(BUDGET_RANGE).and_then(|value| value.as_range()).and_then(|range| range.ceiling);
            if let Some(ceiling) = ceiling.filter(|ceiling| *ceiling <= self.budget_floor) {
                findings.push(ConstraintFinding {
                    rule_id: NOT_A_FIT_BUDGET.to_string(),
                    severity: Severity::Blocking,
                    note: format!(
                        "Budget ceiling of {} is at or below the minimum serviceable budget of {}.",
                        ceiling.normalize(),
                        self.budget_floor.normalize()
                    ),
                    fields: vec![BUDGET_RANGE.to_string()],
                });
            }
        }

        let choice = |name: &str| fields.get(name).and_then(|value| value.as_choice());

        if self.timeline_required && choice(URGENCY) == Some("urgent") && !fields.contains_key(TIMELINE) {
            findings.push(ConstraintFinding {
                rule_id: TIMELINE_REQUIRED.to_string(),
                severity: Severity::Inconsistency,
                note: "Request is marked urgent but no timeline was given.".to_string(),
                fields: vec![URGENCY.to_string(), TIMELINE.to_string()],
            });
        }

        if self.availability_conflict
            && choice(TIMELINE) == Some("within_24h")
            && choice(AVAILABILITY) == Some("no_availability")
        {
            findings.push(ConstraintFinding {
                rule_id: AVAILABILITY_CONFLICT.to_string(),
                severity: Severity::Inconsistency,
                note: "Work is wanted within 24 hours but no availability was offered.".to_string(),
                fields: vec![TIMELINE.to_string(), AVAILABILITY.to_string()],
            });
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        ConstraintEngine, DeterministicConstraintEngine, Severity, AVAILABILITY_CONFLICT,
        NOT_A_FIT_BUDGET, TIMELINE_REQUIRED,
    };
    use crate::config::AppConfig;
    use crate::fields::{BudgetRange, FieldMap, FieldValue};

    fn fields(entries: &[(&str, FieldValue)]) -> FieldMap {
        entries.iter().map(|(name, value)| (name.to_string(), value.clone())).collect()
    }

    fn budget(raw: &str) -> FieldValue {
        FieldValue::Range(BudgetRange::parse(raw).expect("budget parses"))
    }

    fn choice(value: &str) -> FieldValue {
        FieldValue::Choice(value.to_string())
    }

    #[test]
    fn free_only_budget_blocks() {
        let engine = DeterministicConstraintEngine::default();
        let findings = engine.evaluate(&fields(&[("budget_range", budget("free only"))]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, NOT_A_FIT_BUDGET);
        assert_eq!(findings[0].severity, Severity::Blocking);
        assert!(findings[0].is_blocking());
    }

    #[test]
    fn budget_floor_is_inclusive_and_configurable() {
        let engine = DeterministicConstraintEngine::default();
        assert!(engine.evaluate(&fields(&[("budget_range", budget("<10"))]))[0].is_blocking());
        assert!(engine.evaluate(&fields(&[("budget_range", budget("50-100"))])).is_empty());
        assert!(engine.evaluate(&fields(&[("budget_range", budget("500+"))])).is_empty());

        let mut config = AppConfig::default();
        config.constraints.budget_floor = Decimal::from(100);
        let strict = DeterministicConstraintEngine::from_config(&config.constraints);
        assert!(strict.evaluate(&fields(&[("budget_range", budget("50-100"))]))[0].is_blocking());
    }

    #[test]
    fn urgent_without_timeline_is_inconsistent() {
        let engine = DeterministicConstraintEngine::default();
        let findings = engine.evaluate(&fields(&[("urgency", choice("urgent"))]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, TIMELINE_REQUIRED);
        assert_eq!(findings[0].severity, Severity::Inconsistency);

        let with_timeline = engine
            .evaluate(&fields(&[("urgency", choice("urgent")), ("timeline", choice("within_24h"))]));
        assert!(with_timeline.is_empty());
    }

    #[test]
    fn same_day_without_availability_conflicts() {
        let engine = DeterministicConstraintEngine::default();
        let findings = engine.evaluate(&fields(&[
            ("timeline", choice("within_24h")),
            ("availability", choice("no_availability")),
            ("budget_range", budget("free")),
        ]));
        let rules: Vec<_> = findings.iter().map(|finding| finding.rule_id.as_str()).collect();
        assert_eq!(rules, vec![NOT_A_FIT_BUDGET, AVAILABILITY_CONFLICT]);
    }

    #[test]
    fn disabled_rules_produce_no_findings() {
        let mut config = AppConfig::default();
        config.constraints.not_a_fit_budget = false;
        let engine = DeterministicConstraintEngine::from_config(&config.constraints);
        assert!(engine.evaluate(&fields(&[("budget_range", budget("free only"))])).is_empty());
    }

    #[test]
    fn evaluation_is_pure() {
        let engine = DeterministicConstraintEngine::default();
        let input = fields(&[("urgency", choice("urgent")), ("budget_range", budget("5"))]);
        assert_eq!(engine.evaluate(&input), engine.evaluate(&input));
    }
}
