//! Runs extracted code blocks on request and reports the outcome as chat
//! messages.

pub mod python;

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chat::{ChatHost, Sender};
use crate::codeblocks::{CodeBlock, join_executable};

pub use python::PythonRunner;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub value: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The code itself raised; the payload is the formatted traceback.
    #[error("{traceback}")]
    Raised { traceback: String },

    #[error("execution did not finish within {secs}s; the interpreter was restarted")]
    Timeout { secs: u64 },

    #[error("failed to start interpreter '{interpreter}': {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("interpreter exited unexpectedly; the next run starts a fresh session")]
    Exited,

    #[error("interpreter protocol error: {0}")]
    Protocol(String),
}

pub type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<ExecutionResult, ExecutionError>> + 'a>>;

/// Executes source text. Implementations decide the sandboxing; state may
/// persist between runs on the same runner.
pub trait CodeRunner {
    fn run<'a>(&'a mut self, source: &'a str) -> RunFuture<'a>;
}

/// Per-session execution state. Nothing is shared between contexts.
pub struct ExecutionContext {
    runner: Box<dyn CodeRunner>,
    runs: u64,
}

impl ExecutionContext {
    pub fn new(runner: Box<dyn CodeRunner>) -> Self {
        Self { runner, runs: 0 }
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reported {
    /// Number of output messages sent, zero to three.
    Success { messages: usize },
    Failure,
}

/// Runs `blocks` in `ctx` and reports through `host`. Never fails: every
/// error becomes a single chat message.
pub async fn execute<H: ChatHost>(
    blocks: &[CodeBlock],
    host: &mut H,
    clicks: u64,
    ctx: &mut ExecutionContext,
) -> Reported {
    let source = join_executable(blocks);
    ctx.runs += 1;
    debug!(
        clicks,
        run = ctx.runs,
        block_count = blocks.len(),
        source_len = source.len(),
        "executing code blocks"
    );

    match ctx.runner.run(&source).await {
        Ok(result) => {
            let mut messages = 0;
            if let Some(value) = result.value.as_deref().filter(|v| !v.is_empty()) {
                host.send(value, Sender::Assistant);
                messages += 1;
            }
            if !result.stdout.is_empty() {
                host.send(&result.stdout, Sender::Assistant);
                messages += 1;
            }
            if !result.stderr.is_empty() {
                host.send(
                    &format!("```python\n{}\n```", result.stderr.trim_end()),
                    Sender::Exception,
                );
                messages += 1;
            }
            info!(run = ctx.runs, messages, "code execution finished");
            Reported::Success { messages }
        }
        Err(err) => {
            warn!(run = ctx.runs, error = %err, "code execution failed");
            host.send(&format!("An exception occurred. {err}"), Sender::Assistant);
            Reported::Failure
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::{
        CodeRunner, ExecutionContext, ExecutionError, ExecutionResult, Reported, RunFuture,
        execute,
    };
    use crate::chat::{ChatHost, Sender, Transcript};
    use crate::codeblocks::CodeBlock;

    struct ScriptedRunner {
        seen: Rc<RefCell<Vec<String>>>,
        outcomes: VecDeque<Result<ExecutionResult, ExecutionError>>,
    }

    impl CodeRunner for ScriptedRunner {
        fn run<'a>(&'a mut self, source: &'a str) -> RunFuture<'a> {
            self.seen.borrow_mut().push(source.to_string());
            let outcome = self
                .outcomes
                .pop_front()
                .unwrap_or_else(|| Ok(ExecutionResult::default()));
            Box::pin(async move { outcome })
        }
    }

    fn context(
        outcomes: Vec<Result<ExecutionResult, ExecutionError>>,
    ) -> (ExecutionContext, Rc<RefCell<Vec<String>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let runner = ScriptedRunner {
            seen: Rc::clone(&seen),
            outcomes: outcomes.into(),
        };
        (ExecutionContext::new(Box::new(runner)), seen)
    }

    fn python(source: &str) -> CodeBlock {
        CodeBlock {
            language: Some("python".to_string()),
            source: source.to_string(),
        }
    }

    fn sent(transcript: &Transcript) -> Vec<(Sender, String)> {
        transcript
            .entries()
            .iter()
            .map(|entry| (entry.sender, entry.content.clone()))
            .collect()
    }

    #[tokio::test]
    async fn reports_each_channel_as_its_own_message() {
        let (mut ctx, seen) = context(vec![Ok(ExecutionResult {
            value: Some("42".to_string()),
            stdout: "hello\n".to_string(),
            stderr: "DeprecationWarning: old api\n".to_string(),
        })]);
        let mut transcript = Transcript::new();
        let blocks = vec![
            python("import warnings"),
            CodeBlock {
                language: Some("bash".to_string()),
                source: "rm -rf /".to_string(),
            },
            python("print('hello')\n6 * 7"),
        ];

        let reported = execute(&blocks, &mut transcript, 1, &mut ctx).await;

        assert_eq!(reported, Reported::Success { messages: 3 });
        assert_eq!(
            seen.borrow().as_slice(),
            ["import warnings\nprint('hello')\n6 * 7"]
        );
        assert_eq!(
            sent(&transcript),
            vec![
                (Sender::Assistant, "42".to_string()),
                (Sender::Assistant, "hello\n".to_string()),
                (
                    Sender::Exception,
                    "```python\nDeprecationWarning: old api\n```".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn empty_channels_produce_no_messages() {
        let (mut ctx, _) = context(vec![Ok(ExecutionResult {
            value: None,
            stdout: String::new(),
            stderr: String::new(),
        })]);
        let mut transcript = Transcript::new();

        let reported = execute(&[python("x = 1")], &mut transcript, 1, &mut ctx).await;

        assert_eq!(reported, Reported::Success { messages: 0 });
        assert!(transcript.entries().is_empty());
    }

    #[tokio::test]
    async fn failure_is_a_single_assistant_message() {
        let traceback =
            "Traceback (most recent call last):\n  File \"<code>\", line 1\nZeroDivisionError: division by zero\n";
        let (mut ctx, _) = context(vec![Err(ExecutionError::Raised {
            traceback: traceback.to_string(),
        })]);
        let mut transcript = Transcript::new();

        let reported = execute(&[python("1/0")], &mut transcript, 1, &mut ctx).await;

        assert_eq!(reported, Reported::Failure);
        let messages = sent(&transcript);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Sender::Assistant);
        assert!(messages[0].1.starts_with("An exception occurred."));
        assert!(messages[0].1.contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn every_click_runs_again() {
        let (mut ctx, seen) = context(vec![
            Ok(ExecutionResult {
                stdout: "1\n".to_string(),
                ..ExecutionResult::default()
            }),
            Err(ExecutionError::Exited),
            Ok(ExecutionResult {
                stdout: "2\n".to_string(),
                ..ExecutionResult::default()
            }),
        ]);
        let mut transcript = Transcript::new();
        let blocks = [python("print(n)")];

        let outcomes = [
            execute(&blocks, &mut transcript, 1, &mut ctx).await,
            execute(&blocks, &mut transcript, 2, &mut ctx).await,
            execute(&blocks, &mut transcript, 3, &mut ctx).await,
        ];

        assert_eq!(
            outcomes,
            [
                Reported::Success { messages: 1 },
                Reported::Failure,
                Reported::Success { messages: 1 },
            ]
        );
        assert_eq!(seen.borrow().len(), 3);
        assert_eq!(ctx.runs(), 3);
        assert_eq!(transcript.serialize().len(), 3);
    }
}
