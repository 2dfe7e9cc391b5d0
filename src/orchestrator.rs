//! One response cycle: retrieve, build the prompt, stream the answer into
//! the chat, and arm an execute trigger when the answer carries code.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::chat::{ChatHost, MessageId, Sender};
use crate::cli::Settings;
use crate::codeblocks::{CodeBlock, extract_code_blocks};
use crate::prompt::construct_prompt;
use crate::providers::{ProviderError, ResponseRoutes, ResponseSource, Route};
use crate::retrieval::{Filters, Retriever};

const EXECUTION_DISABLED_HINT: &str =
    "This answer contains code. Restart with --execute (or CODE_EXECUTION=1) to run it here.";

/// Per-session parameters bound once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespondSettings {
    pub k: usize,
    pub filters: Filters,
    pub model: String,
    pub cite_sources: bool,
    pub context_window: usize,
    pub execution_enabled: bool,
}

impl From<&Settings> for RespondSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            k: settings.k,
            filters: settings.filters.clone(),
            model: settings.model.clone(),
            cite_sources: settings.cite_sources,
            context_window: settings.context_window,
            execution_enabled: settings.execute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespondOutcome {
    /// The assistant message, if any chunk arrived.
    pub message: Option<MessageId>,
    pub code_blocks: usize,
    pub trigger_armed: bool,
    pub failure: Option<ProviderError>,
}

fn failure_notice(err: &ProviderError) -> String {
    if err.is_transient() {
        format!("The model response failed: {err} This looks temporary; try again.")
    } else {
        format!("The model response failed: {err}")
    }
}

pub struct Orchestrator<R, H, A> {
    retriever: R,
    routes: ResponseRoutes<H, A>,
    settings: RespondSettings,
}

impl<R, H, A> Orchestrator<R, H, A>
where
    R: Retriever,
    H: ResponseSource,
    A: ResponseSource,
{
    pub fn new(retriever: R, routes: ResponseRoutes<H, A>, settings: RespondSettings) -> Self {
        Self {
            retriever,
            routes,
            settings,
        }
    }

    pub fn settings(&self) -> &RespondSettings {
        &self.settings
    }

    /// Answers `user_text`, which the host already holds as the last user
    /// turn. Retrieval and prompt failures are returned; provider failures
    /// are shown in the chat and reported in the outcome.
    pub async fn respond<C: ChatHost>(
        &self,
        host: &mut C,
        user_text: &str,
    ) -> Result<RespondOutcome> {
        let settings = &self.settings;
        let history = host.serialize();

        let context = self
            .retriever
            .retrieve(user_text, settings.k, &settings.filters)
            .await
            .context("Failed to retrieve documentation context")?;

        let prompt = construct_prompt(
            &history,
            &context,
            &settings.model,
            settings.cite_sources,
            settings.context_window,
        )?;

        let route = Route::for_model(&settings.model);
        info!(
            route = route.as_str(),
            model = %settings.model,
            snippets = context.snippets.len(),
            prompt_tokens = prompt.token_count,
            "streaming response"
        );

        let mut chunks = self.routes.select(route).stream(&prompt, &settings.model);
        let mut message: Option<MessageId> = None;
        let mut failure: Option<ProviderError> = None;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(text) if text.is_empty() => {}
                Ok(text) => message = Some(host.stream(&text, message, Sender::Assistant)),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = &failure {
            warn!(
                route = route.as_str(),
                model = %settings.model,
                transient = err.is_transient(),
                received_text = message.is_some(),
                error = %err,
                "response stream failed"
            );
        }

        let Some(id) = message else {
            if let Some(err) = &failure {
                host.send(&failure_notice(err), Sender::Notice);
            }
            debug!("response produced no text");
            return Ok(RespondOutcome {
                message: None,
                code_blocks: 0,
                trigger_armed: false,
                failure,
            });
        };

        host.finish(id);
        if let Some(err) = &failure {
            host.send(&failure_notice(err), Sender::Notice);
        }

        let executable: Vec<CodeBlock> = extract_code_blocks(host.content(id).unwrap_or_default())
            .into_iter()
            .filter(CodeBlock::is_executable)
            .collect();
        let code_blocks = executable.len();

        let mut trigger_armed = false;
        if code_blocks > 0 {
            if settings.execution_enabled {
                trigger_armed = host.arm_trigger(id, executable).is_some();
            } else {
                host.send(EXECUTION_DISABLED_HINT, Sender::Notice);
            }
        }
        debug!(code_blocks, trigger_armed, "response complete");

        Ok(RespondOutcome {
            message: Some(id),
            code_blocks,
            trigger_armed,
            failure,
        })
    }
}
