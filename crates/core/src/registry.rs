//! Static declaration of every field the engine can collect.
//!
//! Built once from configuration and shared read-only. Validation turns raw candidate text into
//! typed [`FieldValue`]s; choice fields resolve through the configured synonym tables.

use std::collections::BTreeMap;

use crate::config::{AppConfig, ConfigError, CustomFieldConfig};
use crate::errors::InputValidationError;
use crate::fields::{
    BudgetRange, CollectionStage, FieldKind, FieldMap, FieldType, FieldValue, AVAILABILITY,
    BUDGET_RANGE, CONSTRAINTS, LOCATION, SCOPE, TIMELINE, URGENCY,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub stage: CollectionStage,
    pub required: bool,
    pub multi_valued: bool,
    pub prompt: String,
}

#[derive(Clone, Debug)]
pub struct FieldRegistry {
    fields: Vec<FieldDef>,
    synonyms: BTreeMap<String, BTreeMap<String, String>>,
    ignore_phrases: Vec<String>,
}

const QUESTION_MARKERS: [&str; 10] =
    ["what", "how", "price", "pricing", "cost", "charge", "rates", "hours", "address", "?"];
const FILLER_ANSWERS: [&str; 6] = ["yes", "no", "ok", "okay", "urgent", "flexible"];
const TRUE_WORDS: [&str; 6] = ["yes", "y", "true", "yeah", "yep", "sure"];
const FALSE_WORDS: [&str; 5] = ["no", "n", "false", "nope", "nah"];

fn choice(options: &[&str]) -> FieldKind {
    FieldKind::Choice { options: options.iter().map(|option| (*option).to_string()).collect() }
}

fn builtin_fields() -> Vec<FieldDef> {
    let def = |name: &str, kind, stage, required, multi_valued, prompt: &str| FieldDef {
        name: name.to_string(),
        kind,
        stage,
        required,
        multi_valued,
        prompt: prompt.to_string(),
    };

    vec![
        def(
            SCOPE,
            FieldKind::Text { min_chars: 3, descriptive: true },
            CollectionStage::Context,
            false,
            false,
            "What type of service are you looking for? (repair, installation, consultation, etc.)",
        ),
        def(
            URGENCY,
            choice(&["urgent", "flexible"]),
            CollectionStage::Context,
            true,
            false,
            "Is this urgent or flexible? (urgent/flexible)",
        ),
        def(
            TIMELINE,
            choice(&["within_24h", "within_1_week", "within_2_weeks", "flexible"]),
            CollectionStage::Context,
            true,
            false,
            "When do you want this addressed? (within_24h / within_1_week / within_2_weeks)",
        ),
        def(
            LOCATION,
            FieldKind::Text { min_chars: 2, descriptive: false },
            CollectionStage::Context,
            true,
            false,
            "What is your location (city/country)?",
        ),
        def(
            AVAILABILITY,
            choice(&["anytime", "weekdays", "weekends", "no_availability"]),
            CollectionStage::Constraints,
            false,
            false,
            "When are you available for the visit? (anytime / weekdays / weekends)",
        ),
        def(
            BUDGET_RANGE,
            FieldKind::Range,
            CollectionStage::Constraints,
            true,
            false,
            "Do you have a budget range? (example: <50, 50-100, 100-300, 300-500, 500-1000)",
        ),
        def(
            CONSTRAINTS,
            FieldKind::Text { min_chars: 2, descriptive: false },
            CollectionStage::Constraints,
            false,
            true,
            "Any constraints we should know about? (access, materials, schedule, or none)",
        ),
    ]
}

fn custom_field(custom: &CustomFieldConfig) -> Result<FieldDef, ConfigError> {
    let name = custom.name.trim();
    if name.is_empty() {
        return Err(ConfigError::Validation("custom_fields entries need a name".to_string()));
    }

    let kind = match custom.kind {
        FieldType::Text => FieldKind::Text { min_chars: 1, descriptive: false },
        FieldType::Choice => {
            let options: Vec<String> = custom
                .choices
                .iter()
                .map(|option| canonical_key(option))
                .filter(|option| !option.is_empty())
                .collect();
            if options.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "custom field `{name}` is a choice field but lists no choices"
                )));
            }
            FieldKind::Choice { options }
        }
        FieldType::Range => FieldKind::Range,
        FieldType::Boolean => FieldKind::Boolean,
    };

    let prompt = custom
        .prompt
        .clone()
        .filter(|prompt| !prompt.trim().is_empty())
        .unwrap_or_else(|| format!("Please provide: {name}"));

    Ok(FieldDef {
        name: name.to_string(),
        kind,
        stage: custom.stage,
        required: custom.required,
        multi_valued: custom.multi_valued,
        prompt,
    })
}

/// Lowercased, trimmed, with spaces and hyphens folded to underscores.
pub fn canonical_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|ch: char| ch.is_whitespace() || ch == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Rejects answers that cannot be a service description: questions, fillers, bare numbers.
pub fn is_descriptive(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if lowered.chars().count() < 3 {
        return false;
    }
    if lowered.chars().all(|ch| ch.is_ascii_digit()) {
        return false;
    }
    if FILLER_ANSWERS.contains(&lowered.as_str()) {
        return false;
    }
    !QUESTION_MARKERS.iter().any(|marker| lowered.contains(marker))
}

impl FieldRegistry {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let mut fields = builtin_fields();

        for (name, patch) in &config.fields {
            let Some(field) = fields.iter_mut().find(|field| &field.name == name) else {
                return Err(ConfigError::Validation(format!(
                    "fields.{name} overrides a field that is not built in"
                )));
            };
            if let Some(required) = patch.required {
                field.required = required;
            }
            if let Some(prompt) = patch.prompt.as_ref().filter(|prompt| !prompt.trim().is_empty())
            {
                field.prompt = prompt.clone();
            }
        }

        for custom in &config.custom_fields {
            let def = custom_field(custom)?;
            if fields.iter().any(|field| field.name == def.name) {
                return Err(ConfigError::Validation(format!(
                    "custom field `{}` collides with an existing field",
                    def.name
                )));
            }
            fields.push(def);
        }

        let mut synonyms = BTreeMap::new();
        for (field_name, table) in &config.normalizers.synonyms {
            let Some(field) = fields.iter().find(|field| &field.name == field_name) else {
                return Err(ConfigError::Validation(format!(
                    "normalizers.synonyms.{field_name} refers to an unknown field"
                )));
            };
            let FieldKind::Choice { options } = &field.kind else {
                return Err(ConfigError::Validation(format!(
                    "normalizers.synonyms.{field_name} applies only to choice fields"
                )));
            };

            let mut lookup = BTreeMap::new();
            for (canonical, words) in table {
                let canonical = canonical_key(canonical);
                if !options.contains(&canonical) {
                    return Err(ConfigError::Validation(format!(
                        "normalizers.synonyms.{field_name}.{canonical} is not an option of the field"
                    )));
                }
                for word in words {
                    lookup.insert(word.trim().to_lowercase(), canonical.clone());
                }
            }
            synonyms.insert(field_name.clone(), lookup);
        }

        let ignore_phrases = config
            .normalizers
            .ignore_phrases
            .iter()
            .map(|phrase| phrase.trim().to_lowercase())
            .collect();

        Ok(Self { fields, synonyms, ignore_phrases })
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// All fields, built-ins first, in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn required(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|field| field.required)
    }

    pub fn in_stage(&self, stage: CollectionStage) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(move |field| field.stage == stage)
    }

    pub fn owner(&self, name: &str) -> Option<CollectionStage> {
        self.get(name).map(|field| field.stage)
    }

    pub fn prompt_for(&self, name: &str) -> String {
        self.get(name).map(|field| field.prompt.clone()).unwrap_or_else(|| format!("Please provide: {name}"))
    }

    pub fn validate(&self, name: &str, raw: &str) -> Result<FieldValue, InputValidationError> {
        let field =
            self.get(name).ok_or_else(|| InputValidationError::UnknownField(name.to_string()))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InputValidationError::Empty { field: name.to_string() });
        }

        if field.multi_valued {
            let lowered = trimmed.to_lowercase();
            let ignored = self.ignore_phrases.contains(&lowered) || lowered.starts_with("no ");
            if ignored {
                return Ok(FieldValue::List(Vec::new()));
            }
        }

        match &field.kind {
            FieldKind::Text { min_chars, descriptive } => {
                if trimmed.chars().count() < *min_chars {
                    return Err(InputValidationError::TooShort {
                        field: name.to_string(),
                        value: trimmed.to_string(),
                    });
                }
                if *descriptive && !is_descriptive(trimmed) {
                    return Err(InputValidationError::NotDescriptive {
                        field: name.to_string(),
                        value: trimmed.to_string(),
                    });
                }
                if field.multi_valued {
                    Ok(FieldValue::List(vec![trimmed.to_string()]))
                } else {
                    Ok(FieldValue::Text(trimmed.to_string()))
                }
            }
            FieldKind::Choice { options } => self.resolve_choice(name, options, trimmed),
            FieldKind::Range => BudgetRange::parse(trimmed).map(FieldValue::Range).ok_or_else(|| {
                InputValidationError::UnparseableRange {
                    field: name.to_string(),
                    value: trimmed.to_string(),
                }
            }),
            FieldKind::Boolean => {
                let lowered = trimmed.to_lowercase();
                if TRUE_WORDS.contains(&lowered.as_str()) {
                    Ok(FieldValue::Flag(true))
                } else if FALSE_WORDS.contains(&lowered.as_str()) {
                    Ok(FieldValue::Flag(false))
                } else {
                    Err(InputValidationError::NotBoolean {
                        field: name.to_string(),
                        value: trimmed.to_string(),
                    })
                }
            }
        }
    }

    fn resolve_choice(
        &self,
        name: &str,
        options: &[String],
        raw: &str,
    ) -> Result<FieldValue, InputValidationError> {
        let key = canonical_key(raw);
        if options.contains(&key) {
            return Ok(FieldValue::Choice(key));
        }

        let lowered = raw.trim().to_lowercase();
        self.synonyms
            .get(name)
            .and_then(|table| table.get(&lowered))
            .map(|canonical| FieldValue::Choice(canonical.clone()))
            .ok_or_else(|| InputValidationError::UnknownChoice {
                field: name.to_string(),
                value: raw.to_string(),
            })
    }

    /// Whether an already-typed value still passes its field's constraints.
    pub fn accepts(&self, name: &str, value: &FieldValue) -> bool {
        let Some(field) = self.get(name) else {
            return false;
        };
        match (&field.kind, value) {
            (FieldKind::Text { min_chars, descriptive }, FieldValue::Text(text)) => {
                text.trim().chars().count() >= *min_chars && (!descriptive || is_descriptive(text))
            }
            (FieldKind::Text { .. }, FieldValue::List(items)) => field.multi_valued && !items.is_empty(),
            (FieldKind::Choice { options }, FieldValue::Choice(choice)) => options.contains(choice),
            (FieldKind::Range, FieldValue::Range(_)) | (FieldKind::Boolean, FieldValue::Flag(_)) => {
                true
            }
            _ => false,
        }
    }

    /// Required fields absent from `fields` or failing their validator, in registry order.
    pub fn missing<'a>(
        &'a self,
        fields: &'a FieldMap,
        stage: Option<CollectionStage>,
    ) -> impl Iterator<Item = &'a FieldDef> + 'a {
        self.required().filter(move |field| {
            stage.map_or(true, |stage| field.stage == stage)
                && !fields.get(&field.name).is_some_and(|value| self.accepts(&field.name, value))
        })
    }

    pub fn missing_names(&self, fields: &FieldMap, stage: Option<CollectionStage>) -> Vec<String> {
        self.missing(fields, stage).map(|field| field.name.clone()).collect()
    }
}
