use chrono::Utc;
use intake_core::config::{AppConfig, LoadOptions};
use intake_core::registry::FieldRegistry;
use intake_core::session::{ChannelMeta, IntakeEngine, TurnInput};
use serde::Serialize;
use std::sync::Arc;

use super::CommandResult;

pub const EXIT_DOCTOR_FAILED: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 3] = ["field_registry", "classifier_locales", "engine_smoke"];

pub fn run(options: &LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_DOCTOR_FAILED };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(options: &LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options.clone()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_field_registry(&config));
            checks.push(check_classifier_locales(&config));
            checks.push(check_engine_smoke(config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_field_registry(config: &AppConfig) -> DoctorCheck {
    match FieldRegistry::from_config(config) {
        Ok(registry) => {
            let required =
                registry.required().map(|field| field.name.as_str()).collect::<Vec<_>>().join(", ");
            DoctorCheck {
                name: "field_registry",
                status: CheckStatus::Pass,
                details: format!("{} fields registered; required: {required}", registry.fields().len()),
            }
        }
        Err(error) => {
            DoctorCheck { name: "field_registry", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_classifier_locales(config: &AppConfig) -> DoctorCheck {
    let language = &config.engine.default_language;
    match config.keywords_for(language) {
        Some(keywords) => DoctorCheck {
            name: "classifier_locales",
            status: CheckStatus::Pass,
            details: format!(
                "default language `{language}` has {} service keywords and {} informational markers",
                keywords.service_keywords.len(),
                keywords.informational_markers.len()
            ),
        },
        None => DoctorCheck {
            name: "classifier_locales",
            status: CheckStatus::Fail,
            details: format!("no keyword set for default language `{language}`"),
        },
    }
}

fn check_engine_smoke(config: AppConfig) -> DoctorCheck {
    let engine = match IntakeEngine::new(Arc::new(config)) {
        Ok(engine) => engine,
        Err(error) => {
            return DoctorCheck { name: "engine_smoke", status: CheckStatus::Fail, details: error.to_string() }
        }
    };

    let mut session = engine.open_session_with_ids(
        "doctor-smoke",
        "req-doctor-smoke",
        ChannelMeta::new("doctor", "doctor", "doctor", Utc::now()),
        None,
    );
    match engine.advance(&mut session, TurnInput::text("hello")) {
        Ok(outcome) => DoctorCheck {
            name: "engine_smoke",
            status: CheckStatus::Pass,
            details: format!("scripted greeting settled in {}", outcome.state),
        },
        Err(error) => {
            DoctorCheck { name: "engine_smoke", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
