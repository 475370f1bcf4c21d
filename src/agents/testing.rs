//! Scripted [`CompletionClient`] for the crate's unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::agents::completion::{CompletionClient, CompletionError, CompletionRequest, CompletionResponse};
use crate::models::Provider;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// Replies according to the first rule whose needle appears in the request's
/// instructions (or input), else with the default reply. Every call is recorded.
pub struct MockCompletionClient {
    provider: Provider,
    rules: Vec<(String, Reply)>,
    default_reply: Reply,
    structured: bool,
    web_search: bool,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionClient {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            provider: Provider::OpenAi,
            rules: Vec::new(),
            default_reply: Reply::Text(default_reply.into()),
            structured: false,
            web_search: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        let mut client = Self::new("");
        client.default_reply = Reply::Fail(message.into());
        client
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_structured_output(mut self) -> Self {
        self.structured = true;
        self
    }

    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }

    pub fn reply_when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Text(reply.into())));
        self
    }

    pub fn fail_when(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Fail(message.into())));
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn supports_structured_output(&self) -> bool {
        self.structured
    }

    fn supports_web_search(&self) -> bool {
        self.web_search
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| request.instructions.contains(needle.as_str()) || request.input.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default_reply.clone());

        let structured = self.structured && request.output_schema.is_some();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request);
        }

        match reply {
            Reply::Text(output_text) => Ok(CompletionResponse { output_text, structured }),
            Reply::Fail(message) => Err(CompletionError::Provider(message)),
        }
    }
}
