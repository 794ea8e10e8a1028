//! In-memory provider for unit tests

use crate::fetch::provider::{FetchProvider, ProviderError, ProviderRequest, ProviderResponse};
use crate::fetch::tier::Tier;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Responder = Box<dyn Fn(Tier) -> Result<ProviderResponse, ProviderError> + Send + Sync>;

/// Provider answering from per-URL closures; unknown URLs get a 404
pub(crate) struct MockProvider {
    routes: HashMap<String, Responder>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ProviderRequest>>,
    completed: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self {
            routes: HashMap::new(),
            delay: None,
            requests: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn route<F>(mut self, url: &str, responder: F) -> Self
    where
        F: Fn(Tier) -> Result<ProviderResponse, ProviderError> + Send + Sync + 'static,
    {
        self.routes.insert(url.to_string(), Box::new(responder));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn tiers_for(&self, url: &str) -> Vec<Tier> {
        self.requests()
            .iter()
            .filter(|r| r.url.as_str() == url)
            .map(|r| r.tier)
            .collect()
    }

    pub(crate) fn request_count(&self, url: &str) -> usize {
        self.tiers_for(url).len()
    }

    pub(crate) fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchProvider for MockProvider {
    async fn fetch(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = match self.routes.get(request.url.as_str()) {
            Some(responder) => responder(request.tier),
            None => Ok(status(404)),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        response
    }
}

pub(crate) fn html(body: &str) -> ProviderResponse {
    ProviderResponse {
        status: 200,
        content_type: Some("text/html; charset=utf-8".to_string()),
        body: body.as_bytes().to_vec(),
    }
}

/// An HTML page with `words` words of visible text
pub(crate) fn text_page(words: usize) -> ProviderResponse {
    html(&format!(
        "<html><body><p>{}</p></body></html>",
        "word ".repeat(words)
    ))
}

pub(crate) fn binary(content_type: &str, body: &[u8]) -> ProviderResponse {
    ProviderResponse {
        status: 200,
        content_type: Some(content_type.to_string()),
        body: body.to_vec(),
    }
}

pub(crate) fn status(code: u16) -> ProviderResponse {
    ProviderResponse {
        status: code,
        content_type: None,
        body: Vec::new(),
    }
}
