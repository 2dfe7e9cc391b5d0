//! Startup and help text shown on the terminal.

use colored::Colorize;

use crate::catalog::{self, CAUTION_MODEL, HOSTED_MODELS};

fn rule() -> String {
    "─".repeat(60).bright_black().to_string()
}

pub fn welcome(model: &str) -> String {
    let mut text = format!(
        "{}\nGenerate and run code using the most up-to-date libraries.\n",
        "Welcome to Fleet Context!".bold()
    );
    if model == CAUTION_MODEL {
        text.push_str(&format!(
            "\n{} You are using {model}. Please use with caution.\n",
            "Warning:".yellow().bold()
        ));
    }
    text
}

pub fn local_model(context_window: usize) -> String {
    format!(
        "{rule}\n{}\n\
         Local models are served through LM Studio. Download and start your model to get started.\n\n\
         1. Download LM Studio from https://lmstudio.ai\n\
         2. Open LM Studio and download your model of choice.\n\
         3. Open the local server tab (the ↔ icon in the left sidebar).\n\
         4. Select your model and click \"Start Server\".\n\n\
         Your context window is set to {context_window}. To change it, pass --context_window <tokens>.\n\
         {rule}",
        "You are using a local model.".bold(),
        rule = rule(),
    )
}

pub fn missing_key(provider: &str) -> String {
    format!(
        "{rule}\n{}\nPlease provide a key to proceed.\n{rule}",
        format!("{provider} API key not found.").red().bold(),
        rule = rule(),
    )
}

pub fn key_tip(env_var: &str, context_window: Option<usize>) -> String {
    let mut text = format!(
        "{rule}\n{} To save this key for later, run `export {env_var}=<your key>` on mac/linux \
         or `setx {env_var} <your key>` on windows.\n",
        "Tip:".bold(),
        rule = rule(),
    );
    if env_var == "OPENROUTER_API_KEY" {
        text.push_str("You can optionally set OPENROUTER_APP_URL and OPENROUTER_APP_TITLE, too.\n");
    } else {
        text.push_str(
            "For models outside the hosted set, set OPENROUTER_API_KEY and optionally \
             OPENROUTER_APP_URL and OPENROUTER_APP_TITLE.\n",
        );
    }
    if let Some(tokens) = context_window {
        text.push_str(&format!(
            "Your context window is set to {tokens}. To change it, pass --context_window <tokens>.\n"
        ));
    }
    text.push_str(&rule());
    text
}

pub fn unknown_library() -> &'static str {
    "Library not found. Please refer to the list of available libraries."
}

pub fn help() -> String {
    let hosted: Vec<&str> = HOSTED_MODELS.iter().map(|(name, _)| *name).collect();
    format!(
        "{}\n\n\
         Usage: fleet-context [OPTIONS]\n\n\
         Options:\n\
         \x20 -k, --k_value <N>              number of documentation snippets to retrieve [default: 15]\n\
         \x20 -l, --libraries <NAME>...      restrict retrieval to these libraries\n\
         \x20 -m, --model <MODEL>            model to answer with [default: {default_model}]\n\
         \x20 -c, --cite_sources             ask the model to cite its sources\n\
         \x20 -w, --context_window <TOKENS>  context window for models outside the hosted set [default: 3000]\n\
         \x20 -L, --local                    use a local model served by LM Studio\n\
         \x20 -x, --execute                  allow running code blocks from answers (runs code on this machine)\n\
         \x20 -h, --help                     print this help\n\n\
         Hosted models: {hosted}\n\
         Any other model id is sent to OpenRouter.\n\
         Libraries available for filtering: {libraries}\n\n\
         In the chat: /run [n] executes code from an answer, /history shows the conversation,\n\
         /reset clears it, exit quits.",
        "Fleet Context".bold(),
        default_model = catalog::DEFAULT_MODEL,
        hosted = hosted.join(", "),
        libraries = catalog::LIBRARIES.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::{help, key_tip, welcome};
    use crate::catalog::CAUTION_MODEL;

    #[test]
    fn welcome_warns_only_for_the_caution_model() {
        assert!(welcome(CAUTION_MODEL).contains("Please use with caution"));
        assert!(!welcome("llama3-70b-8192").contains("caution"));
    }

    #[test]
    fn key_tip_mentions_the_variable_and_window() {
        let tip = key_tip("OPENROUTER_API_KEY", Some(3000));
        assert!(tip.contains("export OPENROUTER_API_KEY=<your key>"));
        assert!(tip.contains("OPENROUTER_APP_TITLE"));
        assert!(tip.contains("3000"));
    }

    #[test]
    fn help_lists_flags_and_libraries() {
        let text = help();
        for flag in ["--k_value", "--libraries", "--model", "--cite_sources", "--context_window", "--local", "--execute"] {
            assert!(text.contains(flag), "missing {flag}");
        }
        assert!(text.contains("pandas"));
    }
}
