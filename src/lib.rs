pub mod catalog;
pub mod chat;
pub mod cli;
pub mod codeblocks;
pub mod config;
pub mod credentials;
pub mod exec;
pub mod logging;
pub mod model;
pub mod notices;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod repl;
pub mod retrieval;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use reqwest::Client;
use std::io;
use std::time::Duration;
use tracing::{info, warn};

use cli::{Args, Startup};
use config::Config;
use credentials::TerminalKeyPrompt;
use repl::run_repl;

pub async fn run() -> Result<()> {
    let mut cfg = Config::from_env();
    info!(
        groq_base_url = %cfg.groq_base_url,
        openrouter_base_url = %cfg.openrouter_base_url,
        retrieval_base_url = %cfg.retrieval_base_url,
        model_timeout_secs = cfg.model_timeout_secs,
        code_execution = cfg.execution.enabled,
        "loaded runtime configuration"
    );

    let settings = match cli::resolve(Args::parse(), &cfg) {
        Startup::Help => {
            println!("{}", notices::help());
            return Ok(());
        }
        Startup::UnknownLibrary(name) => {
            warn!(library = %name, "unknown library filter");
            println!("{}", notices::unknown_library());
            return Ok(());
        }
        Startup::Run(settings) => settings,
    };
    info!(
        model = %settings.model,
        k = settings.k,
        context_window = settings.context_window,
        local = settings.local,
        execute = settings.execute,
        "resolved session settings"
    );

    credentials::bootstrap(&settings, &mut cfg, &mut TerminalKeyPrompt, &mut io::stdout())?;
    println!("{}", notices::welcome(&settings.model));

    let client = Client::builder()
        .connect_timeout(Duration::from_secs(cfg.model_timeout_secs))
        .read_timeout(Duration::from_secs(cfg.model_timeout_secs))
        .build()
        .context("Failed to initialize HTTP client")?;

    run_repl(&client, &cfg, &settings).await
}
