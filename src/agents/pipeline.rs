use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::agents::agent::{Agent, GeneratedPromptOutput, OutputShape, ToolRole};
use crate::agents::completion::{CompletionClients, CompletionRequest};
use crate::agents::events::PipelineEvent;
use crate::agents::extract::extract_sections;
use crate::agents::formats::{self, IndustryFormats};
use crate::agents::runner::{AgentRunner, RunResult, StepPolicy};
use crate::error::Result;
use crate::models::{
    FormatsResponse, GenerateFormatsRequest, GeneratePromptRequest, GeneratedPrompt, PipelineResult,
    ProcessPromptRequest, PromptSections, Provider, ReasoningEffort,
};
use crate::storage::{AiConfig, TemplateStore};

pub const EXTRACTION_TEMPLATE: &str = "extraction_prompt.md";
pub const CRITIQUE_TEMPLATE: &str = "critique_system.md";
pub const REVISE_TEMPLATE: &str = "revise_prompt.md";
pub const MAIN_TEMPLATE: &str = "main_prompt.md";
pub const GENERATION_TEMPLATE: &str = "generate_prompt.md";

/// Templates that must exist for the service to start.
pub const REQUIRED_TEMPLATES: [&str; 5] = [
    GENERATION_TEMPLATE,
    EXTRACTION_TEMPLATE,
    CRITIQUE_TEMPLATE,
    REVISE_TEMPLATE,
    MAIN_TEMPLATE,
];

const DEFAULT_REGION: &str = "global";
const PIPELINE_METHOD: &str = "5-step agent pipeline";
const GENERATION_INSTRUCTIONS: &str =
    "You are an expert prompt engineer. Follow the task description exactly and answer in the requested format.";

// ============================================================================
// CANCELLATION TOKEN
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<RwLock<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn cancel(&self) {
        let mut cancelled = self.cancelled.write().await;
        *cancelled = true;
    }

    pub async fn is_cancelled(&self) -> bool {
        *self.cancelled.read().await
    }
}

// ============================================================================
// REQUEST MANAGER
// ============================================================================

#[derive(Default)]
pub struct RequestManager {
    active_requests: RwLock<HashMap<String, CancellationToken>>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, request_id: String) -> CancellationToken {
        let token = CancellationToken::new();
        let mut requests = self.active_requests.write().await;
        requests.insert(request_id, token.clone());
        token
    }

    pub async fn cancel(&self, request_id: &str) -> bool {
        let requests = self.active_requests.read().await;
        if let Some(token) = requests.get(request_id) {
            token.cancel().await;
            true
        } else {
            false
        }
    }

    pub async fn unregister(&self, request_id: &str) {
        let mut requests = self.active_requests.write().await;
        requests.remove(request_id);
    }

    pub async fn active(&self) -> usize {
        self.active_requests.read().await.len()
    }
}

/// Cancels a streaming run when dropped, unless disarmed first.
pub struct CancelOnDrop {
    request_manager: Arc<RequestManager>,
    request_id: String,
    armed: bool,
}

impl CancelOnDrop {
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let request_manager = self.request_manager.clone();
        let request_id = std::mem::take(&mut self.request_id);
        handle.spawn(async move {
            if request_manager.cancel(&request_id).await {
                log::info!("🔌 Stream closed early, cancelled {}", request_id);
            }
        });
    }
}

// ============================================================================
// PIPELINE SERVICE
// ============================================================================

pub struct PromptPipelineService {
    clients: CompletionClients,
    templates: Arc<TemplateStore>,
    ai_config: AiConfig,
    policy: StepPolicy,
    request_manager: Arc<RequestManager>,
}

impl PromptPipelineService {
    pub fn new(clients: CompletionClients, templates: Arc<TemplateStore>, ai_config: AiConfig, policy: StepPolicy) -> Self {
        Self {
            clients,
            templates,
            ai_config,
            policy,
            request_manager: Arc::new(RequestManager::new()),
        }
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.clients.providers()
    }

    /// Assembles the search/extract/critique/revise tools under the main agent.
    pub fn build_agents(&self, industry: &str, usecase: &str, region: Option<&str>) -> Result<Agent> {
        let region = region.filter(|r| !r.trim().is_empty()).unwrap_or(DEFAULT_REGION);
        let vars = [("industry", industry), ("usecase", usecase), ("region", region)];
        let model = self.ai_config.default_model.as_str();

        let search_agent = Agent::new("search_agent", model, search_instructions(industry, usecase)).with_web_search();
        let extract_agent = Agent::new("extract_agent", model, self.templates.load(EXTRACTION_TEMPLATE, &vars)?)
            .with_output_shape(OutputShape::InstructionList);
        let critique_agent = Agent::new("critique_agent", model, self.templates.load(CRITIQUE_TEMPLATE, &vars)?)
            .with_output_shape(OutputShape::CritiqueIssues);
        let revise_agent = Agent::new("revise_agent", model, self.templates.load(REVISE_TEMPLATE, &vars)?)
            .with_output_shape(OutputShape::RevisedPrompt);

        Ok(Agent::new("prompt_editing_agent", model, self.templates.load(MAIN_TEMPLATE, &vars)?)
            .with_output_shape(OutputShape::RevisedPrompt)
            .with_tool(search_agent.as_tool(
                ToolRole::Search,
                "search_agent",
                "Search the web for industry and use case specific information",
            ))
            .with_tool(extract_agent.as_tool(
                ToolRole::Extract,
                "extract_agent",
                "Extract the instructions from the prompt",
            ))
            .with_tool(critique_agent.as_tool(
                ToolRole::Critique,
                "critique_agent",
                "Critique the instructions from the prompt",
            ))
            .with_tool(revise_agent.as_tool(
                ToolRole::Revise,
                "revise_agent",
                "Revise the instructions from the prompt",
            )))
    }

    fn runner(&self, reasoning_effort: ReasoningEffort) -> AgentRunner {
        AgentRunner::new(self.clients.default_client())
            .with_reasoning_effort(reasoning_effort)
            .with_policy(self.policy)
    }

    /// One improvement pass over `request.content`.
    ///
    /// Only configuration problems (missing templates) are returned as `Err`;
    /// completion failures come back as an unsuccessful [`PipelineResult`].
    pub async fn generate(&self, request: &ProcessPromptRequest) -> Result<PipelineResult> {
        let main_agent = self.build_agents(&request.industry, &request.use_case, request.region.as_deref())?;

        log::info!(
            "🚀 Starting {} for {} - {}",
            PIPELINE_METHOD,
            request.industry,
            request.use_case
        );
        let result = self
            .runner(request.reasoning_effort)
            .run(&main_agent, &request.content)
            .await;
        log::info!("🏁 Pipeline finished (success: {})", !result.is_error());

        Ok(pipeline_result(request, result))
    }

    /// Same run as [`generate`](Self::generate) on a background task, reporting
    /// progress as [`PipelineEvent`]s. The returned id can be passed to
    /// [`cancel`](Self::cancel).
    pub async fn process_stream(
        &self,
        request: ProcessPromptRequest,
    ) -> Result<(String, mpsc::Receiver<PipelineEvent>)> {
        let main_agent = self.build_agents(&request.industry, &request.use_case, request.region.as_deref())?;

        let request_id = Uuid::now_v7().to_string();
        let token = self.request_manager.register(request_id.clone()).await;
        let (tx, rx) = mpsc::channel(100);

        let runner = self
            .runner(request.reasoning_effort)
            .with_events(request_id.clone(), tx.clone())
            .with_cancellation(token.clone());
        let request_manager = self.request_manager.clone();
        let id = request_id.clone();

        tokio::spawn(async move {
            let _ = tx
                .send(PipelineEvent::Started {
                    request_id: id.clone(),
                    industry: request.industry.clone(),
                    usecase: request.use_case.clone(),
                    timestamp: chrono::Utc::now().timestamp(),
                })
                .await;

            let result = runner.run(&main_agent, &request.content).await;

            let event = if token.is_cancelled().await {
                PipelineEvent::Cancelled {
                    request_id: id.clone(),
                    reason: "User cancelled".to_string(),
                }
            } else {
                PipelineEvent::Completed {
                    request_id: id.clone(),
                    result: pipeline_result(&request, result),
                    timestamp: chrono::Utc::now().timestamp(),
                }
            };
            let _ = tx.send(event).await;

            request_manager.unregister(&id).await;
        });

        Ok((request_id, rx))
    }

    pub async fn cancel(&self, request_id: &str) -> bool {
        self.request_manager.cancel(request_id).await
    }

    pub async fn active_requests(&self) -> usize {
        self.request_manager.active().await
    }

    /// Guard that cancels `request_id` if the consumer of its events goes away.
    pub fn cancel_on_drop(&self, request_id: &str) -> CancelOnDrop {
        CancelOnDrop {
            request_manager: self.request_manager.clone(),
            request_id: request_id.to_string(),
            armed: true,
        }
    }

    fn generation_template(&self, provider: Provider) -> String {
        let specific = format!("generate_prompt_{}.md", provider);
        if self.templates.exists(&specific) {
            specific
        } else {
            GENERATION_TEMPLATE.to_string()
        }
    }

    /// Fills the generation template for `(industry, use case)` and makes one
    /// completion call.
    pub async fn generate_new_prompt(&self, request: &GeneratePromptRequest) -> Result<GeneratedPrompt> {
        let provider = request.model_provider;
        let client = self.clients.get(provider)?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.ai_config.generation_model_for(provider).to_string());

        let vars = [("industry", request.industry.as_str()), ("usecase", request.use_case.as_str())];
        let mut filled = self.templates.load(&self.generation_template(provider), &vars)?;
        if !request.context.trim().is_empty() {
            filled.push_str("\n\nAdditional context:\n");
            filled.push_str(request.context.trim());
        }

        let shape = OutputShape::GeneratedPrompt;
        let mut completion = CompletionRequest::new(model.clone(), GENERATION_INSTRUCTIONS, filled)
            .with_reasoning_effort(request.reasoning_effort)
            .with_web_search(client.supports_web_search());
        if client.supports_structured_output() {
            completion = completion.with_output_schema(shape.as_ref(), shape.schema());
        }

        log::info!(
            "🎨 Generating prompt for {} - {} ({}/{})",
            request.industry,
            request.use_case,
            provider,
            model
        );

        let mut generated = GeneratedPrompt {
            success: false,
            generated_prompt: String::new(),
            sections: PromptSections::default(),
            industry: request.industry.clone(),
            usecase: request.use_case.clone(),
            context: request.context.clone(),
            model_provider: provider,
            model,
            method: String::new(),
            error: None,
        };

        let response = match client.complete(completion).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("❌ Prompt generation failed: {}", e);
                generated.method = "failed".to_string();
                generated.error = Some(e.to_string());
                return Ok(generated);
            }
        };

        let structured = response
            .structured
            .then(|| serde_json::from_str::<GeneratedPromptOutput>(response.output_text.trim()).ok())
            .flatten();

        generated.success = true;
        match structured {
            Some(output) => {
                generated.generated_prompt = output.final_prompt.clone();
                generated.sections = PromptSections {
                    planning: Some(output.planning),
                    final_prompt: Some(output.final_prompt),
                    considerations: Some(output.considerations),
                };
                generated.method = "structured output".to_string();
            }
            None => {
                generated.sections = extract_sections(&response.output_text);
                generated.method = if generated.sections.is_empty() {
                    "plain text".to_string()
                } else {
                    "section extraction".to_string()
                };
                generated.generated_prompt = response.output_text;
            }
        }

        Ok(generated)
    }

    /// JSON input/output formats for `(industry, use case)`; never fails, falls
    /// back to canned formats.
    pub async fn generate_formats(&self, request: &GenerateFormatsRequest) -> FormatsResponse {
        let client = self.clients.default_client();
        let IndustryFormats {
            input_format,
            output_format,
            generated,
        } = formats::generate_json_formats(
            client.as_ref(),
            &self.ai_config.generation_model,
            &request.industry,
            &request.use_case,
            &request.tasks,
            request.reasoning_effort,
        )
        .await;

        FormatsResponse {
            industry: request.industry.clone(),
            usecase: request.use_case.clone(),
            detected_industry: formats::detect_industry(&request.use_case).to_string(),
            input_format,
            output_format,
            generated,
        }
    }
}

fn search_instructions(industry: &str, usecase: &str) -> String {
    format!(
        r#"You are a **Web-Search Assistant** for **{industry}**, focused on **{usecase}**.
When invoked, run a concise, focused web search to retrieve up-to-date domain
facts that are relevant to prompt engineering for this use case.
Return only JSON: {{ "query": "...", "results": [{{ "title": "...", "snippet": "...", "url": "..." }}] }}"#
    )
}

fn pipeline_result(request: &ProcessPromptRequest, result: RunResult) -> PipelineResult {
    let success = !result.is_error();
    PipelineResult {
        success,
        original_prompt: request.content.clone(),
        refined_prompt: if success {
            result.content
        } else {
            request.content.clone()
        },
        industry: request.industry.clone(),
        usecase: request.use_case.clone(),
        steps: result.steps,
        error: result.error,
        method: PIPELINE_METHOD.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::MockCompletionClient;
    use crate::error::ErrorCode;

    fn template_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| std::fs::write(dir.path().join(name), body).unwrap();
        write(EXTRACTION_TEMPLATE, "EXTRACT for {industry}/{usecase}");
        write(CRITIQUE_TEMPLATE, "CRITIQUE for {industry}/{usecase} in {region}");
        write(REVISE_TEMPLATE, "REVISE for {industry}/{usecase}");
        write(MAIN_TEMPLATE, "MAIN for {industry}/{usecase}");
        write(GENERATION_TEMPLATE, "Write a prompt for {industry} / {usecase}. Use {{json}}.");
        dir
    }

    fn service(dir: &tempfile::TempDir, client: Arc<MockCompletionClient>) -> PromptPipelineService {
        let templates = Arc::new(TemplateStore::new(dir.path(), dir.path().join("samples")));
        PromptPipelineService::new(
            CompletionClients::new(client),
            templates,
            AiConfig::default(),
            StepPolicy::default(),
        )
    }

    fn pipeline_client() -> MockCompletionClient {
        MockCompletionClient::new("unexpected")
            .reply_when("Web-Search Assistant", "{\"query\": \"q\", \"results\": []}")
            .reply_when("EXTRACT", "{\"instructions\": []}")
            .reply_when("CRITIQUE", "{\"issues\": []}")
            .reply_when("REVISE", "{\"value\": \"You are a market analyst. Summarize today's market.\"}")
    }

    #[test]
    fn test_build_agents_fills_templates() {
        let dir = template_dir();
        let svc = service(&dir, Arc::new(MockCompletionClient::new("x")));

        let main = svc.build_agents("healthcare", "patient_engagement", None).unwrap();

        assert_eq!(main.instructions(), "MAIN for healthcare/patient_engagement");
        assert_eq!(main.tools().len(), 4);
        let critique = &main.tool(ToolRole::Critique).unwrap().agent;
        assert_eq!(critique.instructions(), "CRITIQUE for healthcare/patient_engagement in global");
        assert!(main.tool(ToolRole::Search).unwrap().agent.web_search());
        assert!(main.tool(ToolRole::Search).unwrap().agent.instructions().contains("healthcare"));
    }

    #[test]
    fn test_missing_template_is_configuration_error() {
        let dir = template_dir();
        std::fs::remove_file(dir.path().join(REVISE_TEMPLATE)).unwrap();
        let svc = service(&dir, Arc::new(MockCompletionClient::new("x")));

        let err = svc.build_agents("finance", "stock analysis", None).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigurationError);
    }

    #[tokio::test]
    async fn test_generate_returns_revise_output() {
        let dir = template_dir();
        let client = Arc::new(pipeline_client());
        let svc = service(&dir, client.clone());

        let request = ProcessPromptRequest::new("Summarize today's market.", "finance", "stock analysis");
        let result = svc.generate(&request).await.unwrap();

        assert!(result.success);
        assert_eq!(result.refined_prompt, "You are a market analyst. Summarize today's market.");
        assert_eq!(result.original_prompt, "Summarize today's market.");
        assert_eq!(result.industry, "finance");
        assert_eq!(result.usecase, "stock analysis");
        assert_eq!(result.steps.len(), 4);
        assert_eq!(client.call_count(), 4);
    }

    #[tokio::test]
    async fn test_generate_failure_is_well_formed() {
        let dir = template_dir();
        let svc = service(&dir, Arc::new(MockCompletionClient::failing("connection reset")));

        let request = ProcessPromptRequest::new("Draft an email.", "retail", "support");
        let result = svc.generate(&request).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.refined_prompt, "Draft an email.");
        assert!(result.error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_process_stream_emits_completed() {
        let dir = template_dir();
        let svc = service(&dir, Arc::new(pipeline_client()));

        let (request_id, mut rx) = svc
            .process_stream(ProcessPromptRequest::new("p", "finance", "stock analysis"))
            .await
            .unwrap();

        let mut last = None;
        while let Some(event) = rx.recv().await {
            let done = event.is_terminal();
            last = Some(event);
            if done {
                break;
            }
        }
        match last {
            Some(PipelineEvent::Completed { request_id: id, result, .. }) => {
                assert_eq!(id, request_id);
                assert!(result.success);
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_dropped_guard_cancels_request() {
        let dir = template_dir();
        let svc = service(&dir, Arc::new(pipeline_client()));

        let token = svc.request_manager.register("gone".to_string()).await;
        assert_eq!(svc.active_requests().await, 1);
        drop(svc.cancel_on_drop("gone"));
        settle().await;
        assert!(token.is_cancelled().await);

        let token = svc.request_manager.register("finished".to_string()).await;
        let mut guard = svc.cancel_on_drop("finished");
        guard.disarm();
        drop(guard);
        settle().await;
        assert!(!token.is_cancelled().await);
    }

    #[tokio::test]
    async fn test_cancel_unknown_request() {
        let dir = template_dir();
        let svc = service(&dir, Arc::new(pipeline_client()));
        assert!(!svc.cancel("nope").await);
    }

    #[tokio::test]
    async fn test_generate_new_prompt_extracts_sections() {
        let dir = template_dir();
        let client = Arc::new(MockCompletionClient::new(
            "<planning>Think.</planning>\n<final_prompt>You are a tutor.</final_prompt>",
        ));
        let svc = service(&dir, client.clone());

        let request = GeneratePromptRequest {
            industry: "education".to_string(),
            use_case: "tutoring".to_string(),
            context: "K-12 math".to_string(),
            ..Default::default()
        };
        let generated = svc.generate_new_prompt(&request).await.unwrap();

        assert!(generated.success);
        assert_eq!(generated.sections.final_prompt.as_deref(), Some("You are a tutor."));
        assert_eq!(generated.method, "section extraction");
        let input = &client.calls()[0].input;
        assert!(input.starts_with("Write a prompt for education / tutoring. Use {json}."));
        assert!(input.ends_with("Additional context:\nK-12 math"));
    }

    #[tokio::test]
    async fn test_generate_new_prompt_structured() {
        let dir = template_dir();
        let client = Arc::new(
            MockCompletionClient::new(r#"{"planning": "P", "final_prompt": "F", "considerations": "C"}"#)
                .with_structured_output(),
        );
        let svc = service(&dir, client.clone());

        let generated = svc.generate_new_prompt(&GeneratePromptRequest::default()).await.unwrap();

        assert_eq!(generated.generated_prompt, "F");
        assert_eq!(generated.sections.considerations.as_deref(), Some("C"));
        assert_eq!(generated.method, "structured output");
        assert!(client.calls()[0].output_schema.is_some());
    }

    #[tokio::test]
    async fn test_generate_new_prompt_unconfigured_provider() {
        let dir = template_dir();
        let svc = service(&dir, Arc::new(MockCompletionClient::new("x")));
        let request = GeneratePromptRequest {
            model_provider: Provider::Ollama,
            ..Default::default()
        };

        let err = svc.generate_new_prompt(&request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn test_provider_specific_generation_template() {
        let dir = template_dir();
        std::fs::write(dir.path().join("generate_prompt_ollama.md"), "OLLAMA {industry}").unwrap();
        let ollama = Arc::new(MockCompletionClient::new("plain").with_provider(Provider::Ollama));
        let svc = PromptPipelineService::new(
            CompletionClients::new(Arc::new(MockCompletionClient::new("x"))).register(ollama.clone()),
            Arc::new(TemplateStore::new(dir.path(), dir.path())),
            AiConfig::default(),
            StepPolicy::default(),
        );

        let request = GeneratePromptRequest {
            industry: "legal".to_string(),
            model_provider: Provider::Ollama,
            ..Default::default()
        };
        let generated = svc.generate_new_prompt(&request).await.unwrap();

        assert_eq!(ollama.calls()[0].input, "OLLAMA legal");
        assert!(!ollama.calls()[0].web_search);
        assert_eq!(generated.method, "plain text");
        assert_eq!(generated.model, "llama3.2");
    }
}
