use std::sync::Arc;

use async_recursion::async_recursion;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::agents::agent::{Agent, AgentTool, ToolRole};
use crate::agents::completion::{CompletionClient, CompletionRequest};
use crate::agents::events::PipelineEvent;
use crate::agents::extract::{decode_shape, preview};
use crate::agents::pipeline::CancellationToken;
use crate::models::ReasoningEffort;

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub role: ToolRole,
    pub agent_name: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub content: String,
    pub agent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepOutput>,
}

impl RunResult {
    pub fn ok(content: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            agent_name: agent_name.into(),
            error: None,
            steps: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>, agent_name: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            content: format!("Error: {}", error),
            agent_name: agent_name.into(),
            error: Some(error),
            steps: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    fn with_steps(mut self, steps: Vec<StepOutput>) -> Self {
        self.steps = steps;
        self
    }
}

// ============================================================================
// POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepPolicy {
    /// Fail the orchestration up front when the extract or critique tool is absent.
    pub require_analysis_steps: bool,
}

// ============================================================================
// RUNNER
// ============================================================================

#[derive(Clone)]
struct EventSink {
    request_id: String,
    tx: mpsc::Sender<PipelineEvent>,
}

#[derive(Clone)]
pub struct AgentRunner {
    client: Arc<dyn CompletionClient>,
    reasoning_effort: ReasoningEffort,
    policy: StepPolicy,
    events: Option<EventSink>,
    cancellation: Option<CancellationToken>,
}

impl AgentRunner {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            reasoning_effort: ReasoningEffort::default(),
            policy: StepPolicy::default(),
            events: None,
            cancellation: None,
        }
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn with_policy(mut self, policy: StepPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, request_id: impl Into<String>, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(EventSink {
            request_id: request_id.into(),
            tx,
        });
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Runs `agent` against `input`. Never fails: errors come back as an
    /// error-carrying [`RunResult`].
    #[async_recursion]
    pub async fn run(&self, agent: &Agent, input: &str) -> RunResult {
        log::info!("🤖 Running {} with {}", agent.name(), agent.model());

        if agent.tools().is_empty() {
            self.run_simple(agent, input).await
        } else {
            self.run_with_tools(agent, input).await
        }
    }

    async fn run_simple(&self, agent: &Agent, input: &str) -> RunResult {
        let mut request = CompletionRequest::new(agent.model(), agent.instructions(), input)
            .with_reasoning_effort(agent.reasoning_effort().unwrap_or(self.reasoning_effort))
            .with_web_search(agent.web_search() && self.client.supports_web_search());
        if let Some(shape) = agent.output_shape() {
            if self.client.supports_structured_output() {
                request = request.with_output_schema(shape.as_ref(), shape.schema());
            }
        }

        let response = match self.client.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("❌ Error in agent {}: {}", agent.name(), e);
                return RunResult::failed(e.to_string(), agent.name());
            }
        };
        log::info!("✅ {} completed", agent.name());

        if let Some(shape) = agent.output_shape() {
            match decode_shape(shape, &response.output_text, response.structured) {
                Ok(decoded) => return RunResult::ok(decoded, agent.name()),
                Err(e) => log::warn!("⚠️ {}: {}, keeping raw text", agent.name(), e),
            }
        }

        RunResult::ok(response.output_text, agent.name())
    }

    async fn run_with_tools(&self, agent: &Agent, input: &str) -> RunResult {
        log::info!("🔧 {} orchestrating {} tools", agent.name(), agent.tools().len());

        if self.policy.require_analysis_steps {
            let missing: Vec<String> = [ToolRole::Extract, ToolRole::Critique]
                .into_iter()
                .filter(|role| agent.tool(*role).is_none())
                .map(|role| role.to_string())
                .collect();
            if !missing.is_empty() {
                return RunResult::failed(
                    format!("{} is missing required tools: {}", agent.name(), missing.join(", ")),
                    agent.name(),
                );
            }
        }

        let mut log_lines: Vec<String> = Vec::new();
        let mut steps: Vec<StepOutput> = Vec::new();

        let analysis = [
            (ToolRole::Search, format!("Research information for: {}", input)),
            (ToolRole::Extract, input.to_string()),
            (ToolRole::Critique, input.to_string()),
        ];
        for (role, step_input) in analysis {
            let Some(tool) = agent.tool(role) else {
                log::warn!("{}: no {} tool, skipping step", agent.name(), role);
                self.emit(|request_id| PipelineEvent::StepSkipped { request_id, step: role })
                    .await;
                continue;
            };
            if let Err(result) = self.check_cancelled(agent).await {
                return result.with_steps(steps);
            }

            let output = self.run_step(tool, &step_input).await;
            log_lines.push(format!("{}: {}", role.log_label(), preview(&output.content)));
            steps.push(output);
        }

        if let Some(tool) = agent.tool(ToolRole::Revise) {
            if let Err(result) = self.check_cancelled(agent).await {
                return result.with_steps(steps);
            }

            let revision_context = format!(
                "Original: {}\n\nPrevious analysis:\n{}",
                input,
                log_lines.join("\n")
            );
            let output = self.run_step(tool, &revision_context).await;
            let result = match &output.error {
                Some(error) => RunResult::failed(error.clone(), agent.name()),
                None => RunResult::ok(output.content.clone(), agent.name()),
            };
            steps.push(output);

            log::info!("✅ {} orchestration completed", agent.name());
            return result.with_steps(steps);
        }

        if let Err(result) = self.check_cancelled(agent).await {
            return result.with_steps(steps);
        }
        self.emit(|request_id| PipelineEvent::Synthesizing {
            request_id,
            agent: agent.name().to_string(),
        })
        .await;

        let synthesis_prompt = format!(
            "Original prompt: {}\n\nAnalysis results:\n{}\n\nBased on this analysis, provide an improved version of the original prompt.",
            input,
            log_lines.join("\n")
        );
        // same decoding as a tool-less call: the main agent's shape applies
        let result = self.run_simple(agent, &synthesis_prompt).await;
        if !result.is_error() {
            log::info!("✅ {} orchestration completed", agent.name());
        }
        result.with_steps(steps)
    }

    async fn run_step(&self, tool: &AgentTool, input: &str) -> StepOutput {
        self.emit(|request_id| PipelineEvent::StepStarted {
            request_id,
            step: tool.role,
            agent: tool.agent.name().to_string(),
        })
        .await;

        let result = self.run(&tool.agent, input).await;

        self.emit(|request_id| PipelineEvent::StepCompleted {
            request_id,
            step: tool.role,
            agent: tool.agent.name().to_string(),
            preview: preview(&result.content),
            failed: result.is_error(),
        })
        .await;

        StepOutput {
            role: tool.role,
            agent_name: result.agent_name,
            content: result.content,
            error: result.error,
        }
    }

    async fn check_cancelled(&self, agent: &Agent) -> Result<(), RunResult> {
        match &self.cancellation {
            Some(token) if token.is_cancelled().await => {
                log::warn!("{} cancelled", agent.name());
                Err(RunResult::failed("Operation cancelled", agent.name()))
            }
            _ => Ok(()),
        }
    }

    async fn emit(&self, event: impl FnOnce(String) -> PipelineEvent) {
        if let Some(sink) = &self.events {
            let _ = sink.tx.send(event(sink.request_id.clone())).await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::agent::OutputShape;
    use crate::agents::testing::MockCompletionClient;

    fn tool(role: ToolRole, instructions: &str) -> AgentTool {
        let name = format!("{}_agent", role);
        Agent::new(name.clone(), "gpt-5", instructions).as_tool(role, name, "test tool")
    }

    fn orchestrator(roles: &[ToolRole]) -> Agent {
        let tools = roles.iter().map(|role| tool(*role, &format!("{} instructions", role)));
        Agent::new("main_agent", "gpt-5", "main instructions").with_tools(tools)
    }

    fn scripted() -> MockCompletionClient {
        MockCompletionClient::new("synthesized prompt")
            .reply_when("search instructions", "search findings")
            .reply_when("extract instructions", "extracted list")
            .reply_when("critique instructions", "critique notes")
            .reply_when("revise instructions", "revised prompt")
    }

    #[tokio::test]
    async fn test_simple_agent_makes_one_call() {
        let client = Arc::new(MockCompletionClient::new("hello"));
        let runner = AgentRunner::new(client.clone());
        let agent = Agent::new("solo", "gpt-5", "be nice");

        let result = runner.run(&agent, "hi").await;

        assert_eq!(result.content, "hello");
        assert_eq!(result.agent_name, "solo");
        assert!(!result.is_error());
        assert_eq!(client.call_count(), 1);
        let call = &client.calls()[0];
        assert_eq!(call.instructions, "be nice");
        assert_eq!(call.input, "hi");
    }

    #[tokio::test]
    async fn test_simple_agent_failure_becomes_error_result() {
        let client = Arc::new(MockCompletionClient::failing("503 upstream"));
        let runner = AgentRunner::new(client.clone());

        let result = runner.run(&Agent::new("solo", "gpt-5", "x"), "hi").await;

        assert!(result.is_error());
        assert!(result.content.starts_with("Error:"));
        assert!(result.content.contains("503 upstream"));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_output_shape_decoded_or_raw() {
        let client = Arc::new(
            MockCompletionClient::new("not json at all")
                .reply_when("shaped", "Here you go: {\"value\": \"tight prompt\"}"),
        );
        let runner = AgentRunner::new(client);

        let shaped = Agent::new("revise", "gpt-5", "shaped").with_output_shape(OutputShape::RevisedPrompt);
        assert_eq!(runner.run(&shaped, "p").await.content, "tight prompt");

        let raw = Agent::new("revise", "gpt-5", "other").with_output_shape(OutputShape::RevisedPrompt);
        assert_eq!(runner.run(&raw, "p").await.content, "not json at all");
    }

    #[tokio::test]
    async fn test_schema_sent_only_when_supported() {
        let plain = Arc::new(MockCompletionClient::new("{\"value\": \"v\"}"));
        let agent = Agent::new("revise", "gpt-5", "x").with_output_shape(OutputShape::RevisedPrompt);
        AgentRunner::new(plain.clone()).run(&agent, "p").await;
        assert!(plain.calls()[0].output_schema.is_none());

        let structured = Arc::new(MockCompletionClient::new("{\"value\": \"v\"}").with_structured_output());
        let result = AgentRunner::new(structured.clone()).run(&agent, "p").await;
        assert_eq!(result.content, "v");
        assert_eq!(structured.calls()[0].output_schema.as_ref().unwrap().0, "revised_prompt");
    }

    #[tokio::test]
    async fn test_revise_output_is_final() {
        let client = Arc::new(scripted());
        let runner = AgentRunner::new(client.clone());
        let agent = orchestrator(&[ToolRole::Search, ToolRole::Extract, ToolRole::Critique, ToolRole::Revise]);

        let result = runner.run(&agent, "Summarize today's market.").await;

        assert_eq!(result.content, "revised prompt");
        assert_eq!(result.agent_name, "main_agent");
        assert_eq!(client.call_count(), 4);

        let calls = client.calls();
        assert_eq!(calls[0].input, "Research information for: Summarize today's market.");
        assert_eq!(calls[1].input, "Summarize today's market.");
        assert_eq!(calls[2].input, "Summarize today's market.");
        assert!(calls[3].input.starts_with("Original: Summarize today's market."));
        assert!(calls[3].input.contains("Search Results: search findings"));
        assert!(calls[3].input.contains("Extracted Instructions: extracted list"));
        assert!(calls[3].input.contains("Critique: critique notes"));

        let roles: Vec<ToolRole> = result.steps.iter().map(|s| s.role).collect();
        assert_eq!(
            roles,
            vec![ToolRole::Search, ToolRole::Extract, ToolRole::Critique, ToolRole::Revise]
        );
    }

    #[tokio::test]
    async fn test_revise_only_still_final() {
        let client = Arc::new(scripted());
        let result = AgentRunner::new(client.clone())
            .run(&orchestrator(&[ToolRole::Revise]), "prompt")
            .await;

        assert_eq!(result.content, "revised prompt");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_without_revise_one_synthesis_call() {
        let client = Arc::new(scripted());
        let agent = orchestrator(&[ToolRole::Search, ToolRole::Critique]);

        let result = AgentRunner::new(client.clone()).run(&agent, "prompt").await;

        assert_eq!(result.content, "synthesized prompt");
        assert_eq!(client.call_count(), 3);
        let last = client.calls().pop().unwrap();
        assert_eq!(last.instructions, "main instructions");
        assert!(last.input.starts_with("Original prompt: prompt"));
        assert!(last.input.contains("Critique: critique notes"));
    }

    #[tokio::test]
    async fn test_synthesis_reply_decoded_with_main_shape() {
        let client = Arc::new(
            MockCompletionClient::new("Improved: {\"value\": \"You are a market analyst.\"}")
                .reply_when("critique instructions", "critique notes"),
        );
        let agent = orchestrator(&[ToolRole::Critique]).with_output_shape(OutputShape::RevisedPrompt);

        let result = AgentRunner::new(client.clone()).run(&agent, "prompt").await;

        assert!(!result.is_error());
        assert_eq!(result.content, "You are a market analyst.");
        assert_eq!(result.steps.len(), 1);
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_previews_truncated_in_log() {
        let long = "x".repeat(450);
        let client = Arc::new(
            MockCompletionClient::new("unused")
                .reply_when("search instructions", long.clone())
                .reply_when("revise instructions", "done"),
        );
        let agent = orchestrator(&[ToolRole::Search, ToolRole::Revise]);

        let result = AgentRunner::new(client.clone()).run(&agent, "p").await;

        let revise_input = &client.calls()[1].input;
        let expected = format!("Search Results: {}...", "x".repeat(200));
        assert!(revise_input.contains(&expected));
        assert!(!revise_input.contains(&"x".repeat(201)));
        // the step record keeps the full output
        assert_eq!(result.steps[0].content, long);
    }

    #[tokio::test]
    async fn test_early_failure_does_not_abort() {
        let client = Arc::new(
            MockCompletionClient::new("synthesized prompt")
                .fail_when("search instructions", "search down")
                .reply_when("revise instructions", "revised prompt"),
        );
        let agent = orchestrator(&[ToolRole::Search, ToolRole::Revise]);

        let result = AgentRunner::new(client.clone()).run(&agent, "p").await;

        assert_eq!(result.content, "revised prompt");
        assert!(!result.is_error());
        assert!(result.steps[0].error.is_some());
        assert!(client.calls()[1].input.contains("Search Results: Error: provider error: search down"));
    }

    #[tokio::test]
    async fn test_revise_failure_fails_run() {
        let client = Arc::new(MockCompletionClient::new("ok").fail_when("revise instructions", "quota"));
        let result = AgentRunner::new(client)
            .run(&orchestrator(&[ToolRole::Extract, ToolRole::Revise]), "p")
            .await;

        assert!(result.is_error());
        assert_eq!(result.agent_name, "main_agent");
        assert!(result.content.contains("quota"));
    }

    #[tokio::test]
    async fn test_required_analysis_steps() {
        let client = Arc::new(scripted());
        let runner = AgentRunner::new(client.clone()).with_policy(StepPolicy {
            require_analysis_steps: true,
        });

        let result = runner.run(&orchestrator(&[ToolRole::Search, ToolRole::Revise]), "p").await;

        assert!(result.is_error());
        assert!(result.content.contains("extract, critique"));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let client = Arc::new(scripted());
        let token = CancellationToken::new();
        token.cancel().await;

        let result = AgentRunner::new(client.clone())
            .with_cancellation(token)
            .run(&orchestrator(&[ToolRole::Extract, ToolRole::Revise]), "p")
            .await;

        assert_eq!(result.error.as_deref(), Some("Operation cancelled"));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let (tx, mut rx) = mpsc::channel(32);
        let client = Arc::new(scripted());
        AgentRunner::new(client)
            .with_events("req-1", tx)
            .run(&orchestrator(&[ToolRole::Extract, ToolRole::Critique]), "p")
            .await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                PipelineEvent::StepStarted { step, .. } => format!("start:{}", step),
                PipelineEvent::StepCompleted { step, .. } => format!("done:{}", step),
                PipelineEvent::StepSkipped { step, .. } => format!("skip:{}", step),
                PipelineEvent::Synthesizing { .. } => "synth".to_string(),
                _ => "other".to_string(),
            });
        }
        assert_eq!(
            kinds,
            vec!["skip:search", "start:extract", "done:extract", "start:critique", "done:critique", "synth"]
        );
    }
}
