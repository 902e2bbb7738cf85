use std::io::{self, BufRead, Write};
use std::sync::Arc;

use chrono::Utc;
use intake_agent::extraction::RuleExtractor;
use intake_agent::handoff::LoggingHandoffSink;
use intake_agent::runtime::{InboundMessage, IntakeRuntime};
use intake_core::config::{AppConfig, LoadOptions};
use intake_core::errors::ApplicationError;
use intake_core::session::{ChannelMeta, IntakeEngine};
use uuid::Uuid;

use super::{load_config, to_pretty_json, CommandResult, EXIT_CONFIG, EXIT_INPUT, EXIT_INTERNAL};

const COMMAND: &str = "run";

#[derive(Clone, Debug, Default)]
pub struct RunArgs {
    pub session_id: Option<String>,
    pub language: Option<String>,
}

pub fn run(options: &LoadOptions, args: RunArgs) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut output = stdout.lock();
    run_interactive(config, args, stdin.lock(), &mut output)
}

/// Drives one session from line-oriented input. Replies go to `output`; the returned
/// command result carries the final intake result as JSON.
pub fn run_interactive<R: BufRead, W: Write>(
    config: Arc<AppConfig>,
    args: RunArgs,
    input: R,
    output: &mut W,
) -> CommandResult {
    let executor = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(executor) => executor,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                EXIT_INTERNAL,
            );
        }
    };

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
    let runtime =
        IntakeRuntime::new(Arc::new(engine), Arc::new(extractor), Arc::new(LoggingHandoffSink));

    let session_id = args.session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let channel = ChannelMeta::new("cli", "local_user", "local", Utc::now());
    let mut sent = 0usize;

    let opening = [config.messages.scope.as_str(), config.messages.clarification.as_str()];
    if let Err(error) = writeln!(output, "{}", opening.join("\n")) {
        return CommandResult::failure(COMMAND, "output", error.to_string(), EXIT_INTERNAL);
    }

    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(error) => {
                return CommandResult::failure(COMMAND, "input", error.to_string(), EXIT_INPUT)
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = InboundMessage {
            session_id: session_id.clone(),
            channel: channel.clone(),
            language: args.language.clone(),
            text: line,
        };
        let reply = match executor.block_on(runtime.handle_message(message)) {
            Ok(reply) => reply,
            Err(error) => {
                return CommandResult::from_application_error(
                    COMMAND,
                    ApplicationError::from(error),
                    &session_id,
                )
            }
        };
        sent += 1;

        // The opening lines already showed the scope message.
        let text = match reply.reply.strip_prefix(config.messages.scope.as_str()) {
            Some(rest) if sent == 1 => rest.trim_start_matches('\n'),
            _ => reply.reply.as_str(),
        };
        if text.is_empty() {
            continue;
        }
        if let Err(error) = writeln!(output, "{text}") {
            return CommandResult::failure(COMMAND, "output", error.to_string(), EXIT_INTERNAL);
        }
        if let Some(result) = reply.result {
            return to_pretty_json(COMMAND, &result);
        }
    }

    if sent == 0 {
        return CommandResult::success(COMMAND, "no messages received");
    }

    match executor.block_on(runtime.abandon(&session_id)) {
        Ok(result) => to_pretty_json(COMMAND, &result),
        Err(error) => {
            CommandResult::from_application_error(COMMAND, ApplicationError::from(error), &session_id)
        }
    }
}
