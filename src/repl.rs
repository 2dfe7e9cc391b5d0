use anyhow::{Context, Result};
use reqwest::Client;
use std::io::{self, Write};
use tracing::warn;

use crate::chat::{ChatHost, Sender, TerminalChat};
use crate::cli::Settings;
use crate::config::Config;
use crate::exec::{self, ExecutionContext, PythonRunner};
use crate::orchestrator::{Orchestrator, RespondSettings};
use crate::providers::ResponseRoutes;
use crate::providers::openai_compat::{Endpoint, OpenAiCompatible};
use crate::retrieval::HttpRetriever;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Empty,
    Quit,
    Reset,
    History,
    Help,
    Run(Option<usize>),
    Invalid(String),
    Prompt(String),
}

fn parse_command(input: &str) -> ReplCommand {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return ReplCommand::Empty;
    }
    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
        return ReplCommand::Quit;
    }
    if !trimmed.starts_with('/') {
        return ReplCommand::Prompt(trimmed.to_string());
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next().unwrap_or_default().to_ascii_lowercase();
    let arg = parts.next();
    match (command.as_str(), arg) {
        ("/quit" | "/exit", _) => ReplCommand::Quit,
        ("/reset", _) => ReplCommand::Reset,
        ("/history", _) => ReplCommand::History,
        ("/help", _) => ReplCommand::Help,
        ("/run", None) => ReplCommand::Run(None),
        ("/run", Some(raw)) => match raw.parse::<usize>() {
            Ok(number) if number > 0 => ReplCommand::Run(Some(number)),
            _ => ReplCommand::Invalid(format!("'{raw}' is not a trigger number")),
        },
        (other, _) => ReplCommand::Invalid(format!("unknown command '{other}'")),
    }
}

const COMMANDS_HELP: &str =
    "/run [n] execute code from answer n (default: latest), /history, /reset, /help, exit";

pub async fn run_repl(client: &Client, cfg: &Config, settings: &Settings) -> Result<()> {
    let retriever = HttpRetriever::new(
        client,
        cfg.retrieval_base_url.clone(),
        cfg.model_timeout_secs,
    );
    let alternate = if settings.local {
        Endpoint::local(cfg)
    } else {
        Endpoint::openrouter(cfg)
    };
    let routes = ResponseRoutes::new(
        OpenAiCompatible::new(client, Endpoint::groq(cfg)),
        OpenAiCompatible::new(client, alternate),
    );
    let orchestrator = Orchestrator::new(retriever, routes, RespondSettings::from(settings));
    let runner = PythonRunner::new(&cfg.execution).with_env(cfg.credential_env());
    let mut execution = ExecutionContext::new(Box::new(runner));
    let mut chat = TerminalChat::new(io::stdout());

    println!("model: {}", settings.model);
    if settings.execute {
        println!("code execution: enabled (runs {} on this machine)", cfg.execution.interpreter);
    }
    println!("type a question, or {COMMANDS_HELP}\n");

    loop {
        print!("> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let mut input = String::new();
        let read = io::stdin()
            .read_line(&mut input)
            .context("Failed to read stdin")?;
        if read == 0 {
            break;
        }

        match parse_command(&input) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Reset => {
                chat.transcript_mut().reset();
                println!("conversation reset\n");
            }
            ReplCommand::History => chat.print_history(),
            ReplCommand::Help => println!("{COMMANDS_HELP}\n"),
            ReplCommand::Invalid(reason) => println!("{reason}; {COMMANDS_HELP}\n"),
            ReplCommand::Run(number) => {
                if !orchestrator.settings().execution_enabled {
                    println!("code execution is disabled; restart with --execute to enable it\n");
                    continue;
                }
                let Some(click) = chat.transcript_mut().click(number) else {
                    println!("no code to execute\n");
                    continue;
                };
                exec::execute(&click.blocks, &mut chat, click.clicks, &mut execution).await;
            }
            ReplCommand::Prompt(text) => {
                chat.transcript_mut().push_user(&text);
                if let Err(err) = orchestrator.respond(&mut chat, &text).await {
                    warn!(error = %format!("{err:#}"), "response cycle failed");
                    chat.send(&format!("Error: {err:#}"), Sender::Notice);
                }
            }
        }
    }

    Ok(())
}
