use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constraints::{ConstraintFinding, Severity};
use crate::fields::{CollectionStage, FieldMap};
use crate::registry::FieldRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ready,
    NotReady,
    NotAFit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessVerdict {
    pub status: ReadinessStatus,
    pub missing_fields: Vec<String>,
    pub inconsistencies: Vec<ConstraintFinding>,
    pub notes: String,
}

impl ReadinessVerdict {
    pub fn is_ready(&self) -> bool {
        self.status == ReadinessStatus::Ready
    }
}

#[derive(Clone, Debug)]
pub struct ReadinessEvaluator {
    registry: Arc<FieldRegistry>,
}

impl ReadinessEvaluator {
    pub fn new(registry: Arc<FieldRegistry>) -> Self {
        Self { registry }
    }

    pub fn assess(&self, fields: &FieldMap, findings: &[ConstraintFinding]) -> ReadinessVerdict {
        let missing_fields = self.registry.missing_names(fields, None);
        let inconsistencies: Vec<ConstraintFinding> =
            findings.iter().filter(|finding| finding.severity >= Severity::Inconsistency).cloned().collect();
        let blocking: Vec<&ConstraintFinding> =
            inconsistencies.iter().filter(|finding| finding.is_blocking()).collect();

        let (status, notes) = if !blocking.is_empty() {
            let reasons: Vec<&str> = blocking.iter().map(|finding| finding.note.as_str()).collect();
            (ReadinessStatus::NotAFit, format!("Request is not a fit: {}", reasons.join(" ")))
        } else if !missing_fields.is_empty() {
            (
                ReadinessStatus::NotReady,
                format!(
                    "More information is required to proceed. Missing: {}.",
                    missing_fields.join(", ")
                ),
            )
        } else if !inconsistencies.is_empty() {
            (
                ReadinessStatus::Ready,
                format!(
                    "Request has sufficient information for human handling. Review {} flagged inconsistenc{}.",
                    inconsistencies.len(),
                    if inconsistencies.len() == 1 { "y" } else { "ies" }
                ),
            )
        } else {
            (
                ReadinessStatus::Ready,
                "Request has sufficient information for human handling.".to_string(),
            )
        };

        ReadinessVerdict { status, missing_fields, inconsistencies, notes }
    }

    /// Stage a not-ready session should return to: context when any missing field belongs there.
    pub fn route_back(&self, verdict: &ReadinessVerdict) -> Option<CollectionStage> {
        if verdict.status != ReadinessStatus::NotReady {
            return None;
        }
        let owners = verdict.missing_fields.iter().filter_map(|name| self.registry.owner(name));
        owners.min()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::AppConfig;
    use crate::constraints::{ConstraintEngine, DeterministicConstraintEngine};
    use crate::fields::{BudgetRange, CollectionStage, FieldMap, FieldValue};
    use crate::readiness::{ReadinessEvaluator, ReadinessStatus};
    use crate::registry::FieldRegistry;

    fn evaluator() -> ReadinessEvaluator {
        let registry = FieldRegistry::from_config(&AppConfig::default()).expect("registry");
        ReadinessEvaluator::new(Arc::new(registry))
    }

    fn complete_fields() -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("location".to_string(), FieldValue::Text("Toronto".to_string()));
        fields.insert("urgency".to_string(), FieldValue::Choice("flexible".to_string()));
        fields.insert("timeline".to_string(), FieldValue::Choice("within_1_week".to_string()));
        fields.insert(
            "budget_range".to_string(),
            FieldValue::Range(BudgetRange::parse("100-300").expect("range")),
        );
        fields
    }

    #[test]
    fn complete_fields_without_blocking_are_ready() {
        let evaluator = evaluator();
        let fields = complete_fields();
        let findings = DeterministicConstraintEngine::default().evaluate(&fields);
        let verdict = evaluator.assess(&fields, &findings);

        assert_eq!(verdict.status, ReadinessStatus::Ready);
        assert!(verdict.missing_fields.is_empty());
        assert!(verdict.inconsistencies.is_empty());
        assert_eq!(evaluator.route_back(&verdict), None);
    }

    #[test]
    fn missing_budget_is_not_ready_and_routes_to_constraints() {
        let evaluator = evaluator();
        let mut fields = complete_fields();
        fields.remove("budget_range");
        let verdict = evaluator.assess(&fields, &[]);

        assert_eq!(verdict.status, ReadinessStatus::NotReady);
        assert_eq!(verdict.missing_fields, vec!["budget_range"]);
        assert_eq!(evaluator.route_back(&verdict), Some(CollectionStage::Constraints));
    }

    #[test]
    fn any_missing_context_field_routes_to_context() {
        let evaluator = evaluator();
        let mut fields = complete_fields();
        fields.remove("budget_range");
        fields.remove("location");
        let verdict = evaluator.assess(&fields, &[]);

        assert_eq!(verdict.missing_fields, vec!["location", "budget_range"]);
        assert_eq!(evaluator.route_back(&verdict), Some(CollectionStage::Context));
    }

    #[test]
    fn blocking_finding_wins_over_missing_fields() {
        let evaluator = evaluator();
        let mut fields = FieldMap::new();
        fields.insert(
            "budget_range".to_string(),
            FieldValue::Range(BudgetRange::parse("free only").expect("range")),
        );
        let findings = DeterministicConstraintEngine::default().evaluate(&fields);
        let verdict = evaluator.assess(&fields, &findings);

        assert_eq!(verdict.status, ReadinessStatus::NotAFit);
        assert_eq!(verdict.inconsistencies.len(), 1);
        assert!(verdict.notes.starts_with("Request is not a fit"));
    }

    #[test]
    fn ready_never_has_missing_fields_or_blocking_findings() {
        let evaluator = evaluator();
        let engine = DeterministicConstraintEngine::default();
        let base = complete_fields();
        let names: Vec<String> = base.keys().cloned().collect();

        for mask in 0..(1u32 << names.len()) {
            let mut fields = FieldMap::new();
            for (index, name) in names.iter().enumerate() {
                if mask & (1 << index) != 0 {
                    if let Some(value) = base.get(name) {
                        fields.insert(name.clone(), value.clone());
                    }
                }
            }
            let verdict = evaluator.assess(&fields, &engine.evaluate(&fields));
            if verdict.is_ready() {
                assert!(verdict.missing_fields.is_empty());
                assert!(verdict.inconsistencies.iter().all(|finding| !finding.is_blocking()));
            }
        }
    }

    #[test]
    fn assessment_is_idempotent() {
        let evaluator = evaluator();
        let fields = complete_fields();
        let findings = DeterministicConstraintEngine::default().evaluate(&fields);
        assert_eq!(evaluator.assess(&fields, &findings), evaluator.assess(&fields, &findings));
    }
}
