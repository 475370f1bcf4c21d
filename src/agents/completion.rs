use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig::client::Nothing;
use rig::completion::Prompt;
use rig::prelude::CompletionClient as _;
use rig::providers::{ollama, openai};
use serde_json::json;
use thiserror::Error;

use crate::error::{AppError, ErrorCode};
use crate::models::{Provider, ReasoningEffort};

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub instructions: String,
    pub input: String,
    pub web_search: bool,
    pub reasoning_effort: ReasoningEffort,
    /// `(name, json schema)` the reply must satisfy when the provider can enforce it.
    pub output_schema: Option<(String, serde_json::Value)>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, instructions: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: instructions.into(),
            input: input.into(),
            web_search: false,
            reasoning_effort: ReasoningEffort::default(),
            output_schema: None,
        }
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn with_output_schema(mut self, name: impl Into<String>, schema: serde_json::Value) -> Self {
        self.output_schema = Some((name.into(), schema));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub output_text: String,
    /// True when the provider enforced `output_schema` on this reply.
    pub structured: bool,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider '{0}' is not configured")]
    UnsupportedProvider(Provider),
    #[error("model returned an empty response")]
    EmptyResponse,
}

impl From<CompletionError> for AppError {
    fn from(err: CompletionError) -> Self {
        let code = match &err {
            CompletionError::Provider(_) => ErrorCode::CompletionError,
            CompletionError::Timeout(_) => ErrorCode::Timeout,
            CompletionError::UnsupportedProvider(_) => ErrorCode::BadRequest,
            CompletionError::EmptyResponse => ErrorCode::ExternalServiceError,
        };
        AppError::new(code, err.to_string())
    }
}

// ============================================================================
// CAPABILITY
// ============================================================================

/// Text-completion capability the agents are built on.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn provider(&self) -> Provider;

    fn supports_structured_output(&self) -> bool {
        false
    }

    fn supports_web_search(&self) -> bool {
        false
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, CompletionError>;
}

// ============================================================================
// RIG-BACKED CLIENT
// ============================================================================

#[derive(Clone)]
enum RigBackend {
    OpenAi(openai::Client),
    Ollama(ollama::Client),
}

#[derive(Clone)]
pub struct RigCompletionClient {
    backend: RigBackend,
    max_output_tokens: u64,
    timeout: Duration,
}

impl RigCompletionClient {
    pub fn openai(
        api_key: &str,
        base_url: Option<&str>,
        max_output_tokens: u64,
        timeout: Duration,
    ) -> crate::error::Result<Self> {
        let client = match base_url {
            Some(url) => openai::Client::builder().api_key(api_key).base_url(url).build(),
            None => openai::Client::builder().api_key(api_key).build(),
        }
        .map_err(|e| AppError::configuration(format!("OpenAI client: {}", e)))?;

        Ok(Self {
            backend: RigBackend::OpenAi(client),
            max_output_tokens,
            timeout,
        })
    }

    pub fn ollama(url: &str, max_output_tokens: u64, timeout: Duration) -> crate::error::Result<Self> {
        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(url)
            .build()
            .map_err(|e| AppError::configuration(format!("Ollama client: {}", e)))?;

        Ok(Self {
            backend: RigBackend::Ollama(client),
            max_output_tokens,
            timeout,
        })
    }

    fn openai_params(request: &CompletionRequest) -> serde_json::Value {
        let mut params = json!({
            "reasoning": { "effort": request.reasoning_effort.as_ref() }
        });
        if request.web_search {
            params["tools"] = json!([{ "type": "web_search_preview" }]);
        }
        if let Some((name, schema)) = &request.output_schema {
            params["text"] = json!({
                "format": {
                    "type": "json_schema",
                    "name": name,
                    "schema": schema,
                    "strict": false
                }
            });
        }
        params
    }

    async fn prompt(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        match &self.backend {
            RigBackend::OpenAi(client) => {
                let agent = client
                    .agent(&request.model)
                    .preamble(&request.instructions)
                    .max_tokens(self.max_output_tokens)
                    .additional_params(Self::openai_params(request))
                    .build();
                agent
                    .prompt(request.input.as_str())
                    .await
                    .map_err(|e| CompletionError::Provider(e.to_string()))
            }
            RigBackend::Ollama(client) => {
                let agent = client
                    .agent(&request.model)
                    .preamble(&request.instructions)
                    .max_tokens(self.max_output_tokens)
                    .build();
                agent
                    .prompt(request.input.as_str())
                    .await
                    .map_err(|e| CompletionError::Provider(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl CompletionClient for RigCompletionClient {
    fn provider(&self) -> Provider {
        match self.backend {
            RigBackend::OpenAi(_) => Provider::OpenAi,
            RigBackend::Ollama(_) => Provider::Ollama,
        }
    }

    fn supports_structured_output(&self) -> bool {
        matches!(self.backend, RigBackend::OpenAi(_))
    }

    fn supports_web_search(&self) -> bool {
        matches!(self.backend, RigBackend::OpenAi(_))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        log::debug!(
            "completion: provider={} model={} effort={} web_search={} schema={}",
            self.provider(),
            request.model,
            request.reasoning_effort,
            request.web_search,
            request.output_schema.as_ref().map(|(name, _)| name.as_str()).unwrap_or("-")
        );

        let output_text = tokio::time::timeout(self.timeout, self.prompt(&request))
            .await
            .map_err(|_| CompletionError::Timeout(self.timeout))??;

        if output_text.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }

        Ok(CompletionResponse {
            output_text,
            structured: request.output_schema.is_some() && self.supports_structured_output(),
        })
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Configured completion clients, one per provider.
#[derive(Clone)]
pub struct CompletionClients {
    clients: HashMap<Provider, Arc<dyn CompletionClient>>,
    default_provider: Provider,
}

impl CompletionClients {
    pub fn new(default_client: Arc<dyn CompletionClient>) -> Self {
        let default_provider = default_client.provider();
        let mut clients = HashMap::new();
        clients.insert(default_provider, default_client);
        Self {
            clients,
            default_provider,
        }
    }

    pub fn register(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn CompletionClient>, CompletionError> {
        self.clients
            .get(&provider)
            .cloned()
            .ok_or(CompletionError::UnsupportedProvider(provider))
    }

    pub fn default_client(&self) -> Arc<dyn CompletionClient> {
        self.clients[&self.default_provider].clone()
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.clients.keys().copied().collect();
        providers.sort_by_key(|p| p.to_string());
        providers
    }
}
