pub mod http_errors;
pub mod openai_compat;

use futures_util::Stream;
use std::pin::Pin;

use crate::catalog;
use crate::prompt::Prompt;

pub use http_errors::ProviderError;

/// Lazy, non-restartable sequence of response text chunks.
pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send + 'a>>;

pub trait ResponseSource {
    fn stream<'a>(&'a self, prompt: &'a Prompt, model: &'a str) -> ChunkStream<'a>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Hosted,
    Alternate,
}

impl Route {
    pub fn for_model(model: &str) -> Self {
        if catalog::is_hosted(model) {
            Self::Hosted
        } else {
            Self::Alternate
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hosted => "hosted",
            Self::Alternate => "alternate",
        }
    }
}

/// The two upstream sources, picked per request by model id.
pub struct ResponseRoutes<H, A> {
    pub hosted: H,
    pub alternate: A,
}

impl<H, A> ResponseRoutes<H, A>
where
    H: ResponseSource,
    A: ResponseSource,
{
    pub fn new(hosted: H, alternate: A) -> Self {
        Self { hosted, alternate }
    }

    pub fn select(&self, route: Route) -> &dyn ResponseSource {
        match route {
            Route::Hosted => &self.hosted,
            Route::Alternate => &self.alternate,
        }
    }
}
