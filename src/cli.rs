use clap::Parser as ClapParser;

use crate::catalog::{self, DEFAULT_MODEL, LOCAL_MODEL};
use crate::config::Config;
use crate::retrieval::Filters;

const DEFAULT_K: usize = 15;
const DEFAULT_CONTEXT_WINDOW: usize = 3000;

#[derive(ClapParser, Debug)]
#[command(name = "fleet-context", disable_help_flag = true)]
pub struct Args {
    /// `help` prints usage, like --help
    #[arg(hide = true, value_parser = ["help"])]
    pub command: Option<String>,

    /// Number of documentation snippets to retrieve
    #[arg(short = 'k', long = "k_value", default_value_t = DEFAULT_K)]
    pub k_value: usize,

    /// Restrict retrieval to these libraries
    #[arg(short = 'l', long = "libraries", num_args = 1..)]
    pub libraries: Vec<String>,

    /// Model to answer with
    #[arg(short = 'm', long = "model", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Ask the model to cite its sources
    #[arg(short = 'c', long = "cite_sources")]
    pub cite_sources: bool,

    /// Context window for models outside the hosted set
    #[arg(short = 'w', long = "context_window", default_value_t = DEFAULT_CONTEXT_WINDOW)]
    pub context_window: usize,

    /// Use a local model served by LM Studio
    #[arg(short = 'L', long = "local")]
    pub local: bool,

    /// Allow running code blocks from answers
    #[arg(short = 'x', long = "execute")]
    pub execute: bool,

    /// Print help
    #[arg(short = 'h', long = "help")]
    pub help: bool,
}

/// Everything the response cycle needs, fixed for the whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub k: usize,
    pub filters: Filters,
    pub model: String,
    pub cite_sources: bool,
    pub context_window: usize,
    pub local: bool,
    pub execute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Startup {
    Help,
    UnknownLibrary(String),
    Run(Settings),
}

/// Validates arguments against the catalog. Nothing here touches the
/// network or the terminal.
pub fn resolve(args: Args, cfg: &Config) -> Startup {
    if args.help || args.command.as_deref() == Some("help") {
        return Startup::Help;
    }

    if let Some(unknown) = args
        .libraries
        .iter()
        .find(|name| !catalog::is_known_library(name))
    {
        return Startup::UnknownLibrary(unknown.clone());
    }

    let model = if args.local {
        LOCAL_MODEL.to_string()
    } else {
        args.model
    };
    let context_window = catalog::hosted_context_window(&model).unwrap_or(args.context_window);

    Startup::Run(Settings {
        k: args.k_value,
        filters: Filters::libraries(args.libraries),
        model,
        cite_sources: args.cite_sources,
        context_window,
        local: args.local,
        execute: args.execute || cfg.execution.enabled,
    })
}
