use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use intake_core::config::LoadOptions;
use toml::Value;

use super::{load_config, CommandResult};

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config("config", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| -> String {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let locales = config.classifier.locales.keys().cloned().collect::<Vec<_>>().join(", ");
    let custom_fields =
        config.custom_fields.iter().map(|field| field.name.clone()).collect::<Vec<_>>().join(", ");

    let entries: Vec<(&str, String, Vec<&str>)> = vec![
        ("engine.schema_version", config.engine.schema_version.clone(), vec!["INTAKE_ENGINE_SCHEMA_VERSION"]),
        (
            "engine.default_language",
            config.engine.default_language.clone(),
            vec!["INTAKE_ENGINE_DEFAULT_LANGUAGE"],
        ),
        (
            "engine.max_clarification_retries",
            config.engine.max_clarification_retries.to_string(),
            vec!["INTAKE_ENGINE_MAX_CLARIFICATION_RETRIES"],
        ),
        (
            "engine.service_category",
            config.engine.service_category.clone(),
            vec!["INTAKE_ENGINE_SERVICE_CATEGORY"],
        ),
        ("engine.exit_phrases", config.engine.exit_phrases.join(", "), vec!["INTAKE_ENGINE_EXIT_PHRASES"]),
        ("classifier.locales", locales, vec![]),
        (
            "constraints.budget_floor",
            config.constraints.budget_floor.to_string(),
            vec!["INTAKE_CONSTRAINTS_BUDGET_FLOOR"],
        ),
        ("constraints.not_a_fit_budget", config.constraints.not_a_fit_budget.to_string(), vec![]),
        ("constraints.timeline_required", config.constraints.timeline_required.to_string(), vec![]),
        (
            "constraints.availability_conflict",
            config.constraints.availability_conflict.to_string(),
            vec![],
        ),
        ("custom_fields", or_unset(custom_fields), vec![]),
        (
            "extraction.known_locations",
            or_unset(config.extraction.known_locations.join(", ")),
            vec!["INTAKE_EXTRACTION_KNOWN_LOCATIONS"],
        ),
        ("routing.ready", config.routing.ready.clone(), vec![]),
        ("routing.not_ready", config.routing.not_ready.clone(), vec![]),
        ("routing.not_a_fit", config.routing.not_a_fit.clone(), vec![]),
        ("routing.informational", config.routing.informational.clone(), vec![]),
        ("routing.invalid", config.routing.invalid.clone(), vec![]),
        ("logging.level", config.logging.level.clone(), vec!["INTAKE_LOGGING_LEVEL", "INTAKE_LOG_LEVEL"]),
        (
            "logging.format",
            config.logging.format.as_str().to_string(),
            vec!["INTAKE_LOGGING_FORMAT", "INTAKE_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries.iter().map(|(key, value, env_keys)| render_line(key, value, source(*key, env_keys.as_slice()))),
    );

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from("intake.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/intake.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn or_unset(value: String) -> String {
    if value.is_empty() {
        "<unset>".to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::contains_path;

    #[test]
    fn nested_key_paths_are_found_in_config_documents() {
        let doc: Value = "[engine]\ndefault_language = \"es\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "engine.default_language"));
        assert!(!contains_path(&doc, "engine.max_clarification_retries"));
        assert!(!contains_path(&doc, "logging.level"));
    }
}
