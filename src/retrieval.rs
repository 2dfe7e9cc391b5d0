use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filters {
    #[serde(rename = "library_name", skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<String>,
}

impl Filters {
    pub fn libraries(names: Vec<String>) -> Self {
        Self { libraries: names }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Snippet {
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub library: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSet {
    pub snippets: Vec<Snippet>,
}

pub type RetrievalFuture<'a> = Pin<Box<dyn Future<Output = Result<ContextSet>> + 'a>>;

pub trait Retriever {
    fn retrieve<'a>(&'a self, query: &'a str, k: usize, filters: &'a Filters)
    -> RetrievalFuture<'a>;
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    k: usize,
    filters: &'a Filters,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Snippet>,
}

fn query_url(base_url: &str) -> String {
    format!("{}/query", base_url.trim_end_matches('/'))
}

pub struct HttpRetriever<'a> {
    client: &'a Client,
    base_url: String,
    timeout_secs: u64,
}

impl<'a> HttpRetriever<'a> {
    pub fn new(client: &'a Client, base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout_secs,
        }
    }

    async fn query(&self, query: &str, k: usize, filters: &Filters) -> Result<ContextSet> {
        let api_url = query_url(&self.base_url);
        debug!(
            api_url = %api_url,
            k,
            library_filter_count = filters.libraries.len(),
            "sending retrieval query"
        );

        let response = self
            .client
            .post(&api_url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&QueryRequest { query, k, filters })
            .send()
            .await
            .map_err(|err| {
                warn!(api_url = %api_url, error = %err, "retrieval request failed");
                anyhow!("Failed to reach retrieval API at '{}': {}", api_url, err)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read response body>".to_string());
            warn!(api_url = %api_url, status = %status, "retrieval returned non-success status");
            return Err(anyhow!(
                "Retrieval request failed with status {}: {}",
                status,
                body
            ));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .context("Failed to parse retrieval response")?;
        debug!(snippet_count = parsed.results.len(), "received retrieval context");
        Ok(ContextSet {
            snippets: parsed.results,
        })
    }
}

impl Retriever for HttpRetriever<'_> {
    fn retrieve<'a>(
        &'a self,
        query: &'a str,
        k: usize,
        filters: &'a Filters,
    ) -> RetrievalFuture<'a> {
        Box::pin(self.query(query, k, filters))
    }
}
