use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use intake_agent::extraction::{FieldExtractor, RuleExtractor};
use intake_core::config::{AppConfig, LoadOptions};
use intake_core::errors::ApplicationError;
use intake_core::flows::IntakeState;
use intake_core::output::IntakeResult;
use intake_core::session::{ChannelMeta, IntakeEngine, TurnInput};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::{load_config, to_pretty_json, CommandResult, EXIT_CONFIG, EXIT_INPUT};

const COMMAND: &str = "replay";

#[derive(Clone, Debug, Default)]
pub struct ReplayArgs {
    pub path: PathBuf,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReplayStep {
    seq: usize,
    user: String,
    state: IntakeState,
    reply: String,
    awaiting: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    command: &'static str,
    status: &'static str,
    session_id: String,
    steps: Vec<ReplayStep>,
    ignored_messages: usize,
    result: IntakeResult,
}

pub fn run(options: &LoadOptions, args: ReplayArgs) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let raw = match fs::read_to_string(&args.path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "input",
                format!("could not read transcript `{}`: {error}", args.path.display()),
                EXIT_INPUT,
            );
        }
    };

    let messages = parse_transcript(&raw);
    if messages.is_empty() {
        return CommandResult::failure(
            COMMAND,
            "input",
            format!("transcript `{}` has no messages", args.path.display()),
            EXIT_INPUT,
        );
    }

    replay_messages(config, &messages, &args)
}

/// One message per line; blank lines and `#` comments are skipped.
pub fn parse_transcript(raw: &str) -> Vec<&str> {
    raw.lines().map(str::trim).filter(|line| !line.is_empty() && !line.starts_with('#')).collect()
}

/// Feeds messages through a fresh session. If the transcript ends before a terminal state,
/// the session is abandoned so a result is always produced.
pub fn replay_messages(config: Arc<AppConfig>, messages: &[&str], args: &ReplayArgs) -> CommandResult {
    let engine = match IntakeEngine::new(config.clone()) {
        Ok(engine) => engine,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), EXIT_CONFIG)
        }
    };
    let extractor = match RuleExtractor::from_config(&config) {
        Ok(extractor) => extractor,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", format!("{error:#}"), EXIT_CONFIG)
        }
    };

    let session_id =
        args.session_id.clone().unwrap_or_else(|| format!("replay-{}", Uuid::new_v4().simple()));
    let channel = ChannelMeta::new("replay", "local_user", "local", Utc::now());
    let mut session = match &args.request_id {
        Some(request_id) => engine.open_session_with_ids(
            session_id.clone(),
            request_id.clone(),
            channel,
            args.language.as_deref(),
        ),
        None => engine.open_keyed_session(session_id.clone(), channel, args.language.as_deref()),
    };

    let tool = format!("field_extractor:{}", extractor.name());
    let mut steps = Vec::new();
    for message in messages {
        if session.is_terminal() {
            break;
        }
        let input = TurnInput {
            utterance: (*message).to_string(),
            candidates: extractor.extract_now(message, session.awaiting()),
            tool_calls: vec![tool.clone()],
        };
        let outcome = match engine.advance(&mut session, input) {
            Ok(outcome) => outcome,
            Err(error) => {
                return CommandResult::from_application_error(
                    COMMAND,
                    ApplicationError::from(error),
                    &session_id,
                )
            }
        };
        steps.push(ReplayStep {
            seq: steps.len() + 1,
            user: (*message).to_string(),
            state: outcome.state,
            reply: outcome.reply,
            awaiting: outcome.awaiting,
        });
    }

    let result = match session.result() {
        Some(result) => result.clone(),
        None => match engine.abandon(&mut session) {
            Ok(result) => result,
            Err(error) => {
                return CommandResult::from_application_error(
                    COMMAND,
                    ApplicationError::from(error),
                    &session_id,
                )
            }
        },
    };

    info!(
        event_name = "intake.replay_completed",
        session_id = %session_id,
        turns = steps.len(),
        state = %result.session.state,
        "transcript replay completed"
    );

    let ignored_messages = messages.len() - steps.len();
    to_pretty_json(
        COMMAND,
        &ReplayReport { command: COMMAND, status: "ok", session_id, steps, ignored_messages, result },
    )
}

#[cfg(test)]
mod tests {
    use super::parse_transcript;

    #[test]
    fn transcript_skips_blank_lines_and_comments() {
        let raw = "# opening\nI need a repair quote\n\n   Toronto  \n# done\n";
        assert_eq!(parse_transcript(raw), vec!["I need a repair quote", "Toronto"]);
    }
}
