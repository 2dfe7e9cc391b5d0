//! Token-bounded prompt construction from history and retrieval context.

use std::sync::OnceLock;
use thiserror::Error;
use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::debug;

use crate::model::{Message, MessageRole};
use crate::retrieval::{ContextSet, Snippet};

/// Per-message framing cost added on top of the content tokens.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

const SYSTEM_INSTRUCTIONS: &str = "You are an expert programmer who helps users write and \
understand code with the most up-to-date versions of their libraries. Use the documentation \
excerpts provided as context when they are relevant, and say so when they are not. Put every \
piece of code in a fenced code block tagged with its language.";

const CITE_INSTRUCTIONS: &str = "When an answer relies on a documentation excerpt, cite its \
source URL in square brackets right after the sentence that uses it.";

const CONTEXT_HEADER: &str = "Documentation excerpts for the current question:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub messages: Vec<Message>,
    pub token_count: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("conversation has no user message to answer")]
    NoUserMessage,
    #[error(
        "the message needs {needed} tokens but the context window is {window}; \
         shorten the message or raise --context_window"
    )]
    WindowTooSmall { needed: usize, window: usize },
}

fn tokenizer() -> Option<&'static CoreBPE> {
    static TOKENIZER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    TOKENIZER.get_or_init(|| cl100k_base().ok()).as_ref()
}

pub fn count_tokens(text: &str) -> usize {
    match tokenizer() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

fn message_tokens(message: &Message) -> usize {
    count_tokens(&message.content) + MESSAGE_OVERHEAD_TOKENS
}

fn system_message(cite_sources: bool) -> Message {
    if cite_sources {
        Message::system(format!("{SYSTEM_INSTRUCTIONS}\n\n{CITE_INSTRUCTIONS}"))
    } else {
        Message::system(SYSTEM_INSTRUCTIONS)
    }
}

fn format_snippet(index: usize, snippet: &Snippet, cite_sources: bool) -> String {
    let mut label = format!("[{index}]");
    if let Some(library) = &snippet.library {
        label.push_str(&format!(" ({library})"));
    }
    if cite_sources && let Some(source) = &snippet.source {
        label.push_str(&format!(" source: {source}"));
    }
    format!("{label}\n{}", snippet.text.trim())
}

fn context_message(pieces: &[String]) -> Message {
    Message::system(format!("{CONTEXT_HEADER}\n\n{}", pieces.join("\n\n")))
}

/// Builds the prompt for the last user message in `history`.
///
/// The system instructions and the current user message are always kept.
/// Snippets are then added in rank order while they fit, and the remaining
/// budget goes to prior turns, newest first. The returned `token_count`
/// never exceeds `context_window`.
pub fn construct_prompt(
    history: &[Message],
    context: &ContextSet,
    model: &str,
    cite_sources: bool,
    context_window: usize,
) -> Result<Prompt, PromptError> {
    let (current, prior) = match history.split_last() {
        Some((last, prior)) if last.role == MessageRole::User => (last, prior),
        _ => return Err(PromptError::NoUserMessage),
    };

    let system = system_message(cite_sources);
    let fixed = message_tokens(&system) + message_tokens(current);
    if fixed > context_window {
        return Err(PromptError::WindowTooSmall {
            needed: fixed,
            window: context_window,
        });
    }
    let mut used = fixed;

    let mut pieces: Vec<String> = Vec::new();
    let mut context_cost = 0;
    for snippet in &context.snippets {
        let mut candidate = pieces.clone();
        candidate.push(format_snippet(pieces.len() + 1, snippet, cite_sources));
        let cost = message_tokens(&context_message(&candidate));
        if used + cost <= context_window {
            context_cost = cost;
            pieces = candidate;
        }
    }
    used += context_cost;

    let mut kept_prior: Vec<&Message> = Vec::new();
    for message in prior.iter().rev() {
        let cost = message_tokens(message);
        if used + cost > context_window {
            break;
        }
        used += cost;
        kept_prior.push(message);
    }
    kept_prior.reverse();

    let mut messages = Vec::with_capacity(kept_prior.len() + 3);
    messages.push(system);
    if !pieces.is_empty() {
        messages.push(context_message(&pieces));
    }
    messages.extend(kept_prior.into_iter().cloned());
    messages.push(current.clone());

    debug!(
        model = %model,
        token_count = used,
        context_window,
        snippets_used = pieces.len(),
        snippets_available = context.snippets.len(),
        history_messages = messages.len(),
        "constructed prompt"
    );

    Ok(Prompt {
        messages,
        token_count: used,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        CITE_INSTRUCTIONS, Prompt, PromptError, construct_prompt, count_tokens, message_tokens,
    };
    use crate::model::{Message, MessageRole};
    use crate::retrieval::{ContextSet, Snippet};

    fn snippet(text: &str, source: Option<&str>) -> Snippet {
        Snippet {
            text: text.to_string(),
            source: source.map(str::to_string),
            library: Some("numpy".to_string()),
        }
    }

    fn total(prompt: &Prompt) -> usize {
        prompt.messages.iter().map(message_tokens).sum()
    }

    #[test]
    fn count_tokens_is_positive_for_text() {
        assert_eq!(count_tokens(""), 0);
        assert!(count_tokens("import numpy as np") > 0);
    }

    #[test]
    fn builds_system_context_and_user_in_order() {
        let history = vec![Message::user("plot a sine wave")];
        let context = ContextSet {
            snippets: vec![
                snippet("numpy.sin computes the sine element-wise.", None),
                snippet("matplotlib.pyplot.plot draws lines.", None),
            ],
        };

        let prompt = construct_prompt(&history, &context, "llama3-70b-8192", false, 8192)
            .expect("prompt should build");

        assert_eq!(prompt.messages.len(), 3);
        assert_eq!(prompt.messages[0].role, MessageRole::System);
        assert!(prompt.messages[1].content.contains("[1] (numpy)"));
        assert!(prompt.messages[1].content.contains("[2] (numpy)"));
        assert_eq!(prompt.messages[2], Message::user("plot a sine wave"));
        assert_eq!(prompt.token_count, total(&prompt));
    }

    #[test]
    fn cite_sources_adds_instructions_and_source_labels() {
        let history = vec![Message::user("how do I read a csv?")];
        let context = ContextSet {
            snippets: vec![snippet("pandas.read_csv(path)", Some("https://pandas.pydata.org"))],
        };

        let cited = construct_prompt(&history, &context, "m", true, 4096).expect("prompt");
        assert!(cited.messages[0].content.contains(CITE_INSTRUCTIONS));
        assert!(cited.messages[1].content.contains("source: https://pandas.pydata.org"));

        let plain = construct_prompt(&history, &context, "m", false, 4096).expect("prompt");
        assert!(!plain.messages[0].content.contains(CITE_INSTRUCTIONS));
        assert!(!plain.messages[1].content.contains("source:"));
    }

    #[test]
    fn never_exceeds_the_context_window() {
        let mut history = Vec::new();
        for turn in 0..30 {
            history.push(Message::user(format!("question number {turn} about dataframes")));
            history.push(Message::assistant(format!(
                "answer number {turn}: use df.groupby('key').agg('sum') and inspect the result"
            )));
        }
        history.push(Message::user("and now pivot it"));
        let context = ContextSet {
            snippets: (0..15)
                .map(|i| snippet(&format!("DataFrame.pivot excerpt {i} ").repeat(20), None))
                .collect(),
        };

        for window in [200, 400, 1000, 3000] {
            let prompt = construct_prompt(&history, &context, "m", false, window)
                .expect("prompt should build");
            assert!(prompt.token_count <= window, "window {window} exceeded");
            assert_eq!(prompt.token_count, total(&prompt));
            assert_eq!(
                prompt.messages.last(),
                Some(&Message::user("and now pivot it"))
            );
        }
    }

    #[test]
    fn keeps_newest_history_when_trimming() {
        let history = vec![
            Message::user("oldest question"),
            Message::assistant("oldest answer"),
            Message::user("newer question"),
            Message::assistant("newer answer"),
            Message::user("current"),
        ];
        let full =
            construct_prompt(&history, &ContextSet::default(), "m", false, 4096).expect("prompt");
        assert_eq!(full.messages.len(), 6);

        let budget = full.token_count
            - message_tokens(&history[0])
            - message_tokens(&history[1]);
        let trimmed =
            construct_prompt(&history, &ContextSet::default(), "m", false, budget).expect("prompt");
        let contents: Vec<&str> = trimmed
            .messages
            .iter()
            .skip(1)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["newer question", "newer answer", "current"]);
    }

    #[test]
    fn rejects_window_smaller_than_the_message() {
        let history = vec![Message::user("word ".repeat(500))];
        let err = construct_prompt(&history, &ContextSet::default(), "m", false, 50)
            .expect_err("window is too small");
        assert!(matches!(err, PromptError::WindowTooSmall { window: 50, .. }));
    }

    #[test]
    fn requires_a_trailing_user_message() {
        let err = construct_prompt(&[], &ContextSet::default(), "m", false, 1000)
            .expect_err("empty history");
        assert_eq!(err, PromptError::NoUserMessage);

        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let err = construct_prompt(&history, &ContextSet::default(), "m", false, 1000)
            .expect_err("last message is not from the user");
        assert_eq!(err, PromptError::NoUserMessage);
    }
}
