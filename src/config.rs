use std::env;

const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_LOCAL_MODEL_BASE_URL: &str = "http://localhost:1234/v1";
const DEFAULT_RETRIEVAL_BASE_URL: &str = "https://context-api.fleet.so";
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CODE_EXECUTION: bool = false;
const DEFAULT_CODE_EXEC_INTERPRETER: &str = "python3";
const DEFAULT_CODE_EXEC_TIMEOUT_SECS: u64 = 30;

/// Controls whether extracted code blocks may be run, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub enabled: bool,
    pub interpreter: String,
    pub timeout_secs: u64,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_CODE_EXECUTION,
            interpreter: DEFAULT_CODE_EXEC_INTERPRETER.to_string(),
            timeout_secs: DEFAULT_CODE_EXEC_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub groq_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub openrouter_app_url: Option<String>,
    pub openrouter_app_title: Option<String>,
    pub groq_base_url: String,
    pub openrouter_base_url: String,
    pub local_base_url: String,
    pub retrieval_base_url: String,
    pub model_timeout_secs: u64,
    pub execution: ExecutionPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_env_with(|key| env::var(key).ok())
    }

    pub(crate) fn from_env_with(mut get_var: impl FnMut(&str) -> Option<String>) -> Self {
        let model_timeout_secs = parse_positive_u64(
            get_var("MODEL_TIMEOUT_SECS").as_deref(),
            DEFAULT_MODEL_TIMEOUT_SECS,
        );
        let execution = ExecutionPolicy {
            enabled: parse_bool(
                get_var("CODE_EXECUTION").as_deref(),
                DEFAULT_CODE_EXECUTION,
            ),
            interpreter: non_empty(get_var("CODE_EXEC_INTERPRETER"))
                .unwrap_or_else(|| DEFAULT_CODE_EXEC_INTERPRETER.to_string()),
            timeout_secs: parse_positive_u64(
                get_var("CODE_EXEC_TIMEOUT_SECS").as_deref(),
                DEFAULT_CODE_EXEC_TIMEOUT_SECS,
            ),
        };

        Self {
            groq_api_key: non_empty(get_var("GROQ_API_KEY")),
            openrouter_api_key: non_empty(get_var("OPENROUTER_API_KEY")),
            openrouter_app_url: non_empty(get_var("OPENROUTER_APP_URL")),
            openrouter_app_title: non_empty(get_var("OPENROUTER_APP_TITLE")),
            groq_base_url: non_empty(get_var("GROQ_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_GROQ_BASE_URL.to_string()),
            openrouter_base_url: non_empty(get_var("OPENROUTER_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE_URL.to_string()),
            local_base_url: non_empty(get_var("LOCAL_MODEL_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_LOCAL_MODEL_BASE_URL.to_string()),
            retrieval_base_url: non_empty(get_var("RETRIEVAL_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_RETRIEVAL_BASE_URL.to_string()),
            model_timeout_secs,
            execution,
        }
    }

    /// API keys to hand to child processes, including keys typed at startup.
    pub fn credential_env(&self) -> Vec<(&'static str, String)> {
        let mut vars = Vec::new();
        if let Some(key) = &self.groq_api_key {
            vars.push(("GROQ_API_KEY", key.clone()));
        }
        if let Some(key) = &self.openrouter_api_key {
            vars.push(("OPENROUTER_API_KEY", key.clone()));
        }
        vars
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_positive_u64(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn parse_bool(raw: Option<&str>, default: bool) -> bool {
    match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
