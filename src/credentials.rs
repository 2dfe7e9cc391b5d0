use anyhow::{Context, Result, bail};
use std::io::{self, Write};
use tracing::info;

use crate::catalog;
use crate::cli::Settings;
use crate::config::Config;
use crate::notices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRequirement {
    Local,
    Groq,
    OpenRouter,
}

impl KeyRequirement {
    pub fn for_settings(settings: &Settings) -> Self {
        if settings.local {
            Self::Local
        } else if catalog::is_hosted(&settings.model) {
            Self::Groq
        } else {
            Self::OpenRouter
        }
    }
}

/// Asks the user for a secret.
pub trait KeyPrompt {
    fn ask(&mut self, label: &str) -> Result<String>;
}

/// Reads the key from stdin after printing `label`.
#[derive(Debug, Default)]
pub struct TerminalKeyPrompt;

impl KeyPrompt for TerminalKeyPrompt {
    fn ask(&mut self, label: &str) -> Result<String> {
        print!("{label}");
        io::stdout().flush().context("Failed to flush stdout")?;
        let mut input = String::new();
        io::stdin()
            .read_line(&mut input)
            .context("Failed to read API key from stdin")?;
        Ok(input.trim().to_string())
    }
}

fn ask_for_key(prompt: &mut impl KeyPrompt, label: &str) -> Result<String> {
    let key = prompt.ask(label)?;
    if key.is_empty() {
        bail!("An API key is required to continue.");
    }
    Ok(key)
}

/// Makes sure the key for the selected route is present, prompting when it
/// is missing. The key is kept in `cfg` only.
pub fn bootstrap(
    settings: &Settings,
    cfg: &mut Config,
    prompt: &mut impl KeyPrompt,
    out: &mut impl Write,
) -> Result<()> {
    match KeyRequirement::for_settings(settings) {
        KeyRequirement::Local => {
            writeln!(out, "{}", notices::local_model(settings.context_window))?;
        }
        KeyRequirement::Groq if cfg.groq_api_key.is_none() => {
            writeln!(out, "{}", notices::missing_key("Groq"))?;
            cfg.groq_api_key = Some(ask_for_key(prompt, "Groq API key: ")?);
            writeln!(out, "{}", notices::key_tip("GROQ_API_KEY", None))?;
            info!(provider = "groq", "api key provided interactively");
        }
        KeyRequirement::OpenRouter if cfg.openrouter_api_key.is_none() => {
            writeln!(out, "{}", notices::missing_key("OpenRouter"))?;
            cfg.openrouter_api_key = Some(ask_for_key(prompt, "OpenRouter API key: ")?);
            writeln!(
                out,
                "{}",
                notices::key_tip("OPENROUTER_API_KEY", Some(settings.context_window))
            )?;
            info!(provider = "openrouter", "api key provided interactively");
        }
        KeyRequirement::Groq | KeyRequirement::OpenRouter => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{KeyPrompt, KeyRequirement, bootstrap};
    use crate::cli::Settings;
    use crate::config::Config;
    use crate::retrieval::Filters;

    struct ScriptedPrompt {
        answer: String,
        asked: Vec<String>,
    }

    impl ScriptedPrompt {
        fn answering(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                asked: Vec::new(),
            }
        }
    }

    impl KeyPrompt for ScriptedPrompt {
        fn ask(&mut self, label: &str) -> Result<String> {
            self.asked.push(label.to_string());
            Ok(self.answer.clone())
        }
    }

    fn settings(model: &str, local: bool) -> Settings {
        Settings {
            k: 15,
            filters: Filters::default(),
            model: model.to_string(),
            cite_sources: false,
            context_window: 3000,
            local,
            execute: false,
        }
    }

    fn empty_config() -> Config {
        Config::from_env_with(|_| None)
    }

    #[test]
    fn requirement_follows_route() {
        assert_eq!(
            KeyRequirement::for_settings(&settings("llama3-70b-8192", false)),
            KeyRequirement::Groq
        );
        assert_eq!(
            KeyRequirement::for_settings(&settings("openai/gpt-4o", false)),
            KeyRequirement::OpenRouter
        );
        assert_eq!(
            KeyRequirement::for_settings(&settings("local-model", true)),
            KeyRequirement::Local
        );
    }

    #[test]
    fn missing_groq_key_is_prompted_and_kept_in_config() {
        let mut cfg = empty_config();
        let mut prompt = ScriptedPrompt::answering("gsk-typed");
        let mut out = Vec::new();

        bootstrap(&settings("llama3-70b-8192", false), &mut cfg, &mut prompt, &mut out)
            .expect("bootstrap should succeed");

        assert_eq!(prompt.asked, vec!["Groq API key: "]);
        assert_eq!(cfg.groq_api_key.as_deref(), Some("gsk-typed"));
        let printed = String::from_utf8(out).expect("utf8");
        assert!(printed.contains("export GROQ_API_KEY"));
    }

    #[test]
    fn present_key_is_not_prompted() {
        let mut cfg = empty_config();
        cfg.openrouter_api_key = Some("sk-or-env".to_string());
        let mut prompt = ScriptedPrompt::answering("unused");
        let mut out = Vec::new();

        bootstrap(&settings("openai/gpt-4o", false), &mut cfg, &mut prompt, &mut out)
            .expect("bootstrap should succeed");

        assert!(prompt.asked.is_empty());
        assert_eq!(cfg.openrouter_api_key.as_deref(), Some("sk-or-env"));
        assert!(out.is_empty());
    }

    #[test]
    fn local_model_needs_no_key() {
        let mut cfg = empty_config();
        let mut prompt = ScriptedPrompt::answering("unused");
        let mut out = Vec::new();

        bootstrap(&settings("local-model", true), &mut cfg, &mut prompt, &mut out)
            .expect("bootstrap should succeed");

        assert!(prompt.asked.is_empty());
        assert!(String::from_utf8(out).expect("utf8").contains("LM Studio"));
    }

    #[test]
    fn empty_answer_is_rejected() {
        let mut cfg = empty_config();
        let mut prompt = ScriptedPrompt::answering("");
        let mut out = Vec::new();

        let err = bootstrap(&settings("openai/gpt-4o", false), &mut cfg, &mut prompt, &mut out)
            .expect_err("empty key should fail");
        assert!(err.to_string().contains("API key is required"));
        assert_eq!(cfg.openrouter_api_key, None);
    }
}
