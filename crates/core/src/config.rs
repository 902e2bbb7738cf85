use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fields::{CollectionStage, FieldType};
use crate::registry::FieldRegistry;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub classifier: ClassifierConfig,
    pub constraints: ConstraintsConfig,
    pub fields: BTreeMap<String, FieldOverride>,
    pub custom_fields: Vec<CustomFieldConfig>,
    pub normalizers: NormalizerConfig,
    pub routing: RoutingConfig,
    pub messages: MessagesConfig,
    pub extraction: ExtractionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub schema_version: String,
    pub default_language: String,
    pub max_clarification_retries: u32,
    pub service_category: String,
    pub exit_phrases: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ClassifierConfig {
    pub locales: BTreeMap<String, KeywordSet>,
}

impl ClassifierConfig {
    /// Exact tag, then primary subtag (`es-MX` -> `es`), then `default_language`.
    pub fn keywords_for(&self, locale: &str, default_language: &str) -> Option<&KeywordSet> {
        let wanted = locale.trim().to_ascii_lowercase();
        let primary = wanted.split(['-', '_']).next().unwrap_or_default();
        self.locales
            .get(wanted.as_str())
            .or_else(|| self.locales.get(primary))
            .or_else(|| self.locales.get(default_language))
    }
}

/// Keyword lists for one locale. Matching is case-insensitive on word starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSet {
    pub informational_markers: Vec<String>,
    pub service_keywords: Vec<String>,
    pub greetings: Vec<String>,
    pub min_informative_tokens: usize,
}

#[derive(Clone, Debug)]
pub struct ConstraintsConfig {
    pub budget_floor: Decimal,
    pub not_a_fit_budget: bool,
    pub timeline_required: bool,
    pub availability_conflict: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOverride {
    pub required: Option<bool>,
    pub prompt: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldConfig {
    pub name: String,
    pub kind: FieldType,
    #[serde(default = "default_custom_stage")]
    pub stage: CollectionStage,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub multi_valued: bool,
}

fn default_custom_stage() -> CollectionStage {
    CollectionStage::Context
}

/// Synonym tables keyed by field, then canonical option.
#[derive(Clone, Debug, Default)]
pub struct NormalizerConfig {
    pub synonyms: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    pub ignore_phrases: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub ready: String,
    pub not_ready: String,
    pub not_a_fit: String,
    pub informational: String,
    pub invalid: String,
}

#[derive(Clone, Debug)]
pub struct MessagesConfig {
    pub scope: String,
    pub clarification: String,
    pub guidance: String,
    pub invalid: String,
    pub exit: String,
    pub handoff: String,
}

#[derive(Clone, Debug, Default)]
pub struct ExtractionConfig {
    pub known_locations: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub default_language: Option<String>,
    pub max_clarification_retries: Option<u32>,
    pub budget_floor: Option<Decimal>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

fn english_keywords() -> KeywordSet {
    KeywordSet {
        informational_markers: strings(&[
            "what is",
            "what are",
            "how does",
            "how do",
            "how much",
            "do you",
            "price list",
            "pricing",
            "catalog",
            "catalogue",
            "opening hours",
            "hours",
            "where are you",
            "?",
        ]),
        service_keywords: strings(&[
            "repair",
            "install",
            "installation",
            "book",
            "quote",
            "fix",
            "replace",
            "maintenance",
            "help with",
            "estimate",
            "appointment",
            "broken",
        ]),
        greetings: strings(&[
            "hi",
            "hello",
            "hey",
            "good morning",
            "good afternoon",
            "good evening",
        ]),
        min_informative_tokens: 2,
    }
}

fn spanish_keywords() -> KeywordSet {
    KeywordSet {
        informational_markers: strings(&[
            "que es",
            "qué es",
            "cuanto cuesta",
            "cuánto cuesta",
            "precios",
            "horario",
            "donde estan",
            "dónde están",
            "?",
        ]),
        service_keywords: strings(&[
            "reparar",
            "reparacion",
            "reparación",
            "instalar",
            "instalacion",
            "instalación",
            "cotizacion",
            "cotización",
            "presupuesto",
            "arreglar",
            "cita",
            "mantenimiento",
        ]),
        greetings: strings(&["hola", "buenos dias", "buenos días", "buenas tardes"]),
        min_informative_tokens: 2,
    }
}

fn default_synonyms() -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    let table = |entries: &[(&str, &[&str])]| {
        entries
            .iter()
            .map(|(canonical, synonyms)| ((*canonical).to_string(), strings(synonyms)))
            .collect::<BTreeMap<_, _>>()
    };

    BTreeMap::from([
        (
            "urgency".to_string(),
            table(&[
                ("urgent", &["asap", "immediately", "emergency", "right away", "right now"]),
                ("flexible", &["not urgent", "no rush", "whenever"]),
            ]),
        ),
        (
            "timeline".to_string(),
            table(&[
                ("within_24h", &["today", "tomorrow", "24h", "within 24 hours"]),
                ("within_1_week", &["this week", "next week", "1 week", "a week", "7 days"]),
                ("within_2_weeks", &["2 weeks", "two weeks", "14 days"]),
                ("flexible", &["no deadline", "whenever"]),
            ]),
        ),
        (
            "availability".to_string(),
            table(&[
                ("anytime", &["any time", "always"]),
                ("weekdays", &["weekday", "mon-fri"]),
                ("weekends", &["weekend", "saturday", "sunday"]),
                ("no_availability", &["none", "not available", "no availability", "unavailable"]),
            ]),
        ),
    ])
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                schema_version: "1.0".to_string(),
                default_language: "en".to_string(),
                max_clarification_retries: 3,
                service_category: "general_services".to_string(),
                exit_phrases: strings(&["cancel", "quit", "exit", "stop"]),
            },
            classifier: ClassifierConfig {
                locales: BTreeMap::from([
                    ("en".to_string(), english_keywords()),
                    ("es".to_string(), spanish_keywords()),
                ]),
            },
            constraints: ConstraintsConfig {
                budget_floor: Decimal::from(10),
                not_a_fit_budget: true,
                timeline_required: true,
                availability_conflict: true,
            },
            fields: BTreeMap::new(),
            custom_fields: Vec::new(),
            normalizers: NormalizerConfig {
                synonyms: default_synonyms(),
                ignore_phrases: strings(&["no", "none", "n/a", "na", "nope", "nothing"]),
            },
            routing: RoutingConfig {
                ready: "human_review".to_string(),
                not_ready: "human_review".to_string(),
                not_a_fit: "not_a_fit_review".to_string(),
                informational: "informational".to_string(),
                invalid: "unclassified_review".to_string(),
            },
            messages: MessagesConfig {
                scope: "I can help you prepare a service request. I'll ask a few quick questions to understand your needs.".to_string(),
                clarification: "What type of service are you looking for? (repair, installation, consultation, etc.)".to_string(),
                guidance: "I can help with service requests by preparing an intake. For general info, please check the service page or contact support.".to_string(),
                invalid: "I could not identify a service request. A team member will review this conversation.".to_string(),
                exit: "Understood, I have stopped here. Your answers so far were saved for review.".to_string(),
                handoff: "Thanks, I have everything needed. A team member will follow up shortly.".to_string(),
            },
            extraction: ExtractionConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("intake.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Keyword set for `locale`, falling back to the default language.
    pub fn keywords_for(&self, locale: &str) -> Option<&KeywordSet> {
        self.classifier.keywords_for(locale, &self.engine.default_language)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(engine) = patch.engine {
            if let Some(schema_version) = engine.schema_version {
                self.engine.schema_version = schema_version;
            }
            if let Some(default_language) = engine.default_language {
                self.engine.default_language = default_language;
            }
            if let Some(max_clarification_retries) = engine.max_clarification_retries {
                self.engine.max_clarification_retries = max_clarification_retries;
            }
            if let Some(service_category) = engine.service_category {
                self.engine.service_category = service_category;
            }
            if let Some(exit_phrases) = engine.exit_phrases {
                self.engine.exit_phrases = exit_phrases;
            }
        }

        if let Some(classifier) = patch.classifier {
            for (locale, keywords) in classifier.locales {
                let entry = self.classifier.locales.entry(locale).or_insert_with(|| KeywordSet {
                    informational_markers: Vec::new(),
                    service_keywords: Vec::new(),
                    greetings: Vec::new(),
                    min_informative_tokens: 2,
                });
                if let Some(informational_markers) = keywords.informational_markers {
                    entry.informational_markers = informational_markers;
                }
                if let Some(service_keywords) = keywords.service_keywords {
                    entry.service_keywords = service_keywords;
                }
                if let Some(greetings) = keywords.greetings {
                    entry.greetings = greetings;
                }
                if let Some(min_informative_tokens) = keywords.min_informative_tokens {
                    entry.min_informative_tokens = min_informative_tokens;
                }
            }
        }

        if let Some(constraints) = patch.constraints {
            if let Some(budget_floor) = constraints.budget_floor {
                self.constraints.budget_floor = budget_floor;
            }
            if let Some(enabled) = constraints.not_a_fit_budget {
                self.constraints.not_a_fit_budget = enabled;
            }
            if let Some(enabled) = constraints.timeline_required {
                self.constraints.timeline_required = enabled;
            }
            if let Some(enabled) = constraints.availability_conflict {
                self.constraints.availability_conflict = enabled;
            }
        }

        if let Some(fields) = patch.fields {
            self.fields.extend(fields);
        }
        if let Some(custom_fields) = patch.custom_fields {
            self.custom_fields.extend(custom_fields);
        }

        if let Some(normalizers) = patch.normalizers {
            for (field, table) in normalizers.synonyms {
                self.normalizers.synonyms.entry(field).or_default().extend(table);
            }
            if let Some(ignore_phrases) = normalizers.ignore_phrases {
                self.normalizers.ignore_phrases = ignore_phrases;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(ready) = routing.ready {
                self.routing.ready = ready;
            }
            if let Some(not_ready) = routing.not_ready {
                self.routing.not_ready = not_ready;
            }
            if let Some(not_a_fit) = routing.not_a_fit {
                self.routing.not_a_fit = not_a_fit;
            }
            if let Some(informational) = routing.informational {
                self.routing.informational = informational;
            }
            if let Some(invalid) = routing.invalid {
                self.routing.invalid = invalid;
            }
        }

        if let Some(messages) = patch.messages {
            if let Some(scope) = messages.scope {
                self.messages.scope = scope;
            }
            if let Some(clarification) = messages.clarification {
                self.messages.clarification = clarification;
            }
            if let Some(guidance) = messages.guidance {
                self.messages.guidance = guidance;
            }
            if let Some(invalid) = messages.invalid {
                self.messages.invalid = invalid;
            }
            if let Some(exit) = messages.exit {
                self.messages.exit = exit;
            }
            if let Some(handoff) = messages.handoff {
                self.messages.handoff = handoff;
            }
        }

        if let Some(extraction) = patch.extraction {
            if let Some(known_locations) = extraction.known_locations {
                self.extraction.known_locations = known_locations;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("INTAKE_ENGINE_SCHEMA_VERSION") {
            self.engine.schema_version = value;
        }
        if let Some(value) = read_env("INTAKE_ENGINE_DEFAULT_LANGUAGE") {
            self.engine.default_language = value;
        }
        if let Some(value) = read_env("INTAKE_ENGINE_MAX_CLARIFICATION_RETRIES") {
            self.engine.max_clarification_retries =
                parse_u32("INTAKE_ENGINE_MAX_CLARIFICATION_RETRIES", &value)?;
        }
        if let Some(value) = read_env("INTAKE_ENGINE_SERVICE_CATEGORY") {
            self.engine.service_category = value;
        }
        if let Some(value) = read_env("INTAKE_ENGINE_EXIT_PHRASES") {
            self.engine.exit_phrases = parse_list(&value);
        }

        if let Some(value) = read_env("INTAKE_CONSTRAINTS_BUDGET_FLOOR") {
            self.constraints.budget_floor =
                parse_decimal("INTAKE_CONSTRAINTS_BUDGET_FLOOR", &value)?;
        }

        if let Some(value) = read_env("INTAKE_EXTRACTION_KNOWN_LOCATIONS") {
            self.extraction.known_locations = parse_list(&value);
        }

        let log_level = read_env("INTAKE_LOGGING_LEVEL").or_else(|| read_env("INTAKE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("INTAKE_LOGGING_FORMAT").or_else(|| read_env("INTAKE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(default_language) = overrides.default_language {
            self.engine.default_language = default_language;
        }
        if let Some(max_clarification_retries) = overrides.max_clarification_retries {
            self.engine.max_clarification_retries = max_clarification_retries;
        }
        if let Some(budget_floor) = overrides.budget_floor {
            self.constraints.budget_floor = budget_floor;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_engine(&self.engine)?;
        validate_classifier(&self.classifier, &self.engine.default_language)?;
        validate_constraints(&self.constraints)?;
        validate_routing(&self.routing)?;
        validate_logging(&self.logging)?;
        FieldRegistry::from_config(self)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("intake.toml"), PathBuf::from("config/intake.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${VAR}` in values. Comment text is copied as written.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut quote: Option<char> = None;
    let mut in_comment = false;

    while let Some(ch) = chars.next() {
        if in_comment {
            in_comment = ch != '\n';
            output.push(ch);
            continue;
        }

        match (quote, ch) {
            (None, '#') => in_comment = true,
            (None, '"' | '\'') => quote = Some(ch),
            (Some('"'), '\\') => {
                output.push(ch);
                if let Some(escaped) = chars.next() {
                    output.push(escaped);
                }
                continue;
            }
            (Some(open), _) if open == ch => quote = None,
            _ => {}
        }

        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.schema_version.trim().is_empty() {
        return Err(ConfigError::Validation("engine.schema_version must not be empty".to_string()));
    }

    if engine.max_clarification_retries == 0 || engine.max_clarification_retries > 20 {
        return Err(ConfigError::Validation(
            "engine.max_clarification_retries must be in range 1..=20".to_string(),
        ));
    }

    if engine.service_category.trim().is_empty() {
        return Err(ConfigError::Validation(
            "engine.service_category must not be empty".to_string(),
        ));
    }

    if engine.exit_phrases.iter().any(|phrase| phrase.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "engine.exit_phrases must not contain blank entries".to_string(),
        ));
    }

    Ok(())
}

fn validate_classifier(
    classifier: &ClassifierConfig,
    default_language: &str,
) -> Result<(), ConfigError> {
    if !classifier.locales.contains_key(default_language) {
        return Err(ConfigError::Validation(format!(
            "engine.default_language `{default_language}` has no keyword set under classifier.locales"
        )));
    }

    for (locale, keywords) in &classifier.locales {
        if keywords.service_keywords.iter().all(|keyword| keyword.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "classifier.locales.{locale}.service_keywords must list at least one keyword"
            )));
        }
        if keywords.min_informative_tokens == 0 {
            return Err(ConfigError::Validation(format!(
                "classifier.locales.{locale}.min_informative_tokens must be greater than zero"
            )));
        }
    }

    Ok(())
}

fn validate_constraints(constraints: &ConstraintsConfig) -> Result<(), ConfigError> {
    if constraints.budget_floor.is_sign_negative() {
        return Err(ConfigError::Validation(
            "constraints.budget_floor must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    let hints = [
        ("routing.ready", &routing.ready),
        ("routing.not_ready", &routing.not_ready),
        ("routing.not_a_fit", &routing.not_a_fit),
        ("routing.informational", &routing.informational),
        ("routing.invalid", &routing.invalid),
    ];
    for (key, hint) in hints {
        if hint.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{key} must not be empty")));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    engine: Option<EnginePatch>,
    classifier: Option<ClassifierPatch>,
    constraints: Option<ConstraintsPatch>,
    fields: Option<BTreeMap<String, FieldOverride>>,
    custom_fields: Option<Vec<CustomFieldConfig>>,
    normalizers: Option<NormalizersPatch>,
    routing: Option<RoutingPatch>,
    messages: Option<MessagesPatch>,
    extraction: Option<ExtractionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    schema_version: Option<String>,
    default_language: Option<String>,
    max_clarification_retries: Option<u32>,
    service_category: Option<String>,
    exit_phrases: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierPatch {
    #[serde(default)]
    locales: BTreeMap<String, KeywordSetPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct KeywordSetPatch {
    informational_markers: Option<Vec<String>>,
    service_keywords: Option<Vec<String>>,
    greetings: Option<Vec<String>>,
    min_informative_tokens: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ConstraintsPatch {
    budget_floor: Option<Decimal>,
    not_a_fit_budget: Option<bool>,
    timeline_required: Option<bool>,
    availability_conflict: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct NormalizersPatch {
    #[serde(default)]
    synonyms: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    ignore_phrases: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    ready: Option<String>,
    not_ready: Option<String>,
    not_a_fit: Option<String>,
    informational: Option<String>,
    invalid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesPatch {
    scope: Option<String>,
    clarification: Option<String>,
    guidance: Option<String>,
    invalid: Option<String>,
    exit: Option<String>,
    handoff: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractionPatch {
    known_locations: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::fields::CollectionStage;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn write_config(dir: &TempDir, body: &str) -> Result<std::path::PathBuf, String> {
        let path = dir.path().join("intake.toml");
        fs::write(&path, body).map_err(|err| err.to_string())?;
        Ok(path)
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;
        ensure(config.engine.max_clarification_retries == 3, "retry budget should default to 3")?;
        ensure(config.constraints.budget_floor == Decimal::from(10), "floor should default to 10")?;
        ensure(config.engine.schema_version == "1.0", "schema version should default to 1.0")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_INTAKE_CATEGORY", "home_repairs");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[engine]
service_category = "${TEST_INTAKE_CATEGORY}"
"#,
            )?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.engine.service_category == "home_repairs",
                "service category should be interpolated from environment",
            )
        })();

        clear_vars(&["TEST_INTAKE_CATEGORY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTAKE_LOG_LEVEL", "warn");
        env::set_var("INTAKE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["INTAKE_LOG_LEVEL", "INTAKE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTAKE_ENGINE_MAX_CLARIFICATION_RETRIES", "5");
        env::set_var("INTAKE_CONSTRAINTS_BUDGET_FLOOR", "25");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[engine]
max_clarification_retries = 2

[constraints]
budget_floor = 15

[logging]
level = "warn"
"#,
            )?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    budget_floor: Some(Decimal::from(40)),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.constraints.budget_floor == Decimal::from(40),
                "override budget floor should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.engine.max_clarification_retries == 5,
                "env retries should win over file and defaults",
            )
        })();

        clear_vars(&["INTAKE_ENGINE_MAX_CLARIFICATION_RETRIES", "INTAKE_CONSTRAINTS_BUDGET_FLOOR"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTAKE_CONSTRAINTS_BUDGET_FLOOR", "ten dollars");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "INTAKE_CONSTRAINTS_BUDGET_FLOOR"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["INTAKE_CONSTRAINTS_BUDGET_FLOOR"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTAKE_ENGINE_DEFAULT_LANGUAGE", "fr");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("engine.default_language")
            );
            ensure(has_message, "validation failure should mention engine.default_language")
        })();

        clear_vars(&["INTAKE_ENGINE_DEFAULT_LANGUAGE"]);
        result
    }

    #[test]
    fn file_patches_merge_into_locales_fields_and_synonyms() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(
            &dir,
            r#"
[classifier.locales.en]
service_keywords = ["plumbing", "repair"]

[fields.budget_range]
required = false

[[custom_fields]]
name = "property_type"
kind = "choice"
stage = "context"
required = true
choices = ["house", "apartment"]

[normalizers.synonyms.urgency]
urgent = ["burst pipe"]

[extraction]
known_locations = ["Toronto", "Ottawa"]
"#,
        )?;

        let config =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                .map_err(|err| format!("config load failed: {err}"))?;

        let english = config.classifier.locales.get("en").ok_or("en locale missing")?;
        ensure(english.service_keywords == vec!["plumbing", "repair"], "keywords replaced")?;
        ensure(!english.greetings.is_empty(), "untouched lists keep their defaults")?;
        ensure(
            config.fields.get("budget_range").and_then(|field| field.required) == Some(false),
            "field override should be recorded",
        )?;
        ensure(config.custom_fields.len() == 1, "custom field should be loaded")?;
        ensure(
            config.custom_fields[0].stage == CollectionStage::Context,
            "custom field stage should parse",
        )?;
        let urgency = config.normalizers.synonyms.get("urgency").ok_or("urgency table missing")?;
        ensure(
            urgency.get("urgent").map(Vec::len) == Some(1),
            "synonym entry should be replaced",
        )?;
        ensure(urgency.contains_key("flexible"), "other synonym entries should survive")?;
        ensure(config.extraction.known_locations.len() == 2, "locations should load")
    }

    #[test]
    fn keyword_lookup_falls_back_to_default_language() -> Result<(), String> {
        let config = AppConfig::default();
        let spanish = config.keywords_for("es-MX").ok_or("es-MX should resolve to es")?;
        ensure(spanish.greetings.iter().any(|greeting| greeting == "hola"), "spanish set")?;
        let fallback = config.keywords_for("de").ok_or("unknown locale should fall back")?;
        ensure(
            fallback.greetings.iter().any(|greeting| greeting == "hello"),
            "fallback should be the english set",
        )
    }

    #[test]
    fn comments_are_not_interpolated() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(
            &dir,
            r#"
# values may use ${SOME_UNSET_VARIABLE}
[engine]
service_category = "plumbing" # or "${ANOTHER_UNSET_VARIABLE}"
exit_phrases = ["stop # now"]
"#,
        )?;

        let config = AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.engine.service_category == "plumbing", "value should load")?;
        ensure(
            config.engine.exit_phrases == vec!["stop # now".to_string()],
            "hash inside a string is not a comment",
        )
    }

    #[test]
    fn shipped_example_config_loads() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../config/intake.example.toml");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            ..LoadOptions::default()
        })
        .map_err(|err| format!("example config failed to load: {err}"))?;

        ensure(config.constraints.budget_floor == Decimal::from(25), "floor from example")?;
        ensure(
            config.custom_fields.iter().any(|field| field.name == "property_type"),
            "custom field from example",
        )?;
        ensure(config.extraction.known_locations.len() == 2, "locations from example")
    }

    #[test]
    fn required_file_is_enforced() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let missing = dir.path().join("absent.toml");

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(missing),
            require_file: true,
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("missing file should fail".to_string()),
            Err(error) => error,
        };
        ensure(matches!(error, ConfigError::MissingConfigFile(_)), "missing file error expected")
    }
}
