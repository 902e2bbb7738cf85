use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::flows::IntakeState;

pub const SCOPE: &str = "scope";
pub const URGENCY: &str = "urgency";
pub const TIMELINE: &str = "timeline";
pub const LOCATION: &str = "location";
pub const AVAILABILITY: &str = "availability";
pub const BUDGET_RANGE: &str = "budget_range";
pub const CONSTRAINTS: &str = "constraints";

pub const BUILTIN_FIELDS: [&str; 7] =
    [SCOPE, URGENCY, TIMELINE, LOCATION, AVAILABILITY, BUDGET_RANGE, CONSTRAINTS];

pub const NOT_PROVIDED: &str = "not_provided";

/// Accepted field values keyed by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// State that owns the collection of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStage {
    #[serde(alias = "S2")]
    Context,
    #[serde(alias = "S3")]
    Constraints,
}

impl CollectionStage {
    pub fn state(&self) -> IntakeState {
        match self {
            Self::Context => IntakeState::ContextCollection,
            Self::Constraints => IntakeState::ConstraintEvaluation,
        }
    }

    /// Whether a session that has reached `state` may hold fields of this stage.
    pub fn reached_by(&self, state: IntakeState) -> bool {
        match (state.rank(), self.state().rank()) {
            (Some(reached), Some(owner)) => reached >= owner,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Choice,
    Range,
    Boolean,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// `descriptive` text must read like a service description, not a yes/no or a question.
    Text { min_chars: usize, descriptive: bool },
    Choice { options: Vec<String> },
    Range,
    Boolean,
}

impl FieldKind {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Text { .. } => FieldType::Text,
            Self::Choice { .. } => FieldType::Choice,
            Self::Range => FieldType::Range,
            Self::Boolean => FieldType::Boolean,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Choice(String),
    Range(BudgetRange),
    Flag(bool),
    List(Vec<String>),
}

impl FieldValue {
    /// Rendering used in the result document.
    pub fn display(&self) -> String {
        match self {
            Self::Text(text) | Self::Choice(text) => text.clone(),
            Self::Range(range) => range.label.clone(),
            Self::Flag(flag) => if *flag { "yes" } else { "no" }.to_string(),
            Self::List(items) => items.join("; "),
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            Self::Choice(choice) => Some(choice),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<&BudgetRange> {
        match self {
            Self::Range(range) => Some(range),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) | Self::Choice(text) => text.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Range(_) | Self::Flag(_) => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Budget bounds in the caller's currency. `label` is the normalized text shown downstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRange {
    pub floor: Option<Decimal>,
    pub ceiling: Option<Decimal>,
    pub label: String,
}

impl BudgetRange {
    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }

        if text.contains("free") {
            return Some(Self { floor: None, ceiling: Some(Decimal::ZERO), label: "free_only".to_string() });
        }

        let cleaned = text.replace(['$', ','], "").replace("usd", "");
        let cleaned = cleaned.trim();

        for prefix in ["less than", "under", "below", "up to", "max", "<=", "<"] {
            if let Some(rest) = cleaned.strip_prefix(prefix) {
                let ceiling = parse_amount(rest)?;
                return Some(Self::bounded(None, Some(ceiling)));
            }
        }

        for prefix in ["more than", "over", "above", "at least", "min", ">=", ">"] {
            if let Some(rest) = cleaned.strip_prefix(prefix) {
                let floor = parse_amount(rest)?;
                return Some(Self::bounded(Some(floor), None));
            }
        }

        if let Some(rest) = cleaned.strip_suffix('+') {
            let floor = parse_amount(rest)?;
            return Some(Self::bounded(Some(floor), None));
        }

        for separator in [" to ", "-", "–"] {
            if let Some((low, high)) = cleaned.split_once(separator) {
                let low = parse_amount(low)?;
                let high = parse_amount(high)?;
                let (floor, ceiling) = if low <= high { (low, high) } else { (high, low) };
                return Some(Self::bounded(Some(floor), Some(ceiling)));
            }
        }

        let exact = parse_amount(cleaned)?;
        Some(Self::bounded(Some(exact), Some(exact)))
    }

    fn bounded(floor: Option<Decimal>, ceiling: Option<Decimal>) -> Self {
        let label = match (floor, ceiling) {
            (Some(floor), Some(ceiling)) if floor == ceiling => floor.normalize().to_string(),
            (Some(floor), Some(ceiling)) => {
                format!("{}-{}", floor.normalize(), ceiling.normalize())
            }
            (None, Some(ceiling)) => format!("<{}", ceiling.normalize()),
            (Some(floor), None) => format!("{}+", floor.normalize()),
            (None, None) => NOT_PROVIDED.to_string(),
        };
        Self { floor, ceiling, label }
    }
}

fn parse_amount(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let (digits, multiplier) = match trimmed.strip_suffix('k') {
        Some(digits) => (digits.trim(), Decimal::from(1000)),
        None => (trimmed, Decimal::ONE),
    };
    let amount = Decimal::from_str(digits).ok()?;
    if amount.is_sign_negative() {
        return None;
    }
    Some(amount * multiplier)
}
