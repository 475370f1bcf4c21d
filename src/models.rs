use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::agents::runner::StepOutput;

fn general() -> String {
    "general".to_string()
}

// ============================================================================
// Tuning knobs
// ============================================================================

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Provider {
    #[default]
    OpenAi,
    Ollama,
}

// ============================================================================
// Requests
// ============================================================================

/// Body of `POST /api/process-prompt`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessPromptRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default = "general")]
    pub industry: String,
    #[serde(default = "general", alias = "usecase")]
    pub use_case: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
}

impl ProcessPromptRequest {
    pub fn new(content: impl Into<String>, industry: impl Into<String>, use_case: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            industry: industry.into(),
            use_case: use_case.into(),
            region: None,
            reasoning_effort: ReasoningEffort::default(),
        }
    }
}

/// Body of `POST /api/generate-prompt`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeneratePromptRequest {
    #[serde(default = "general")]
    pub industry: String,
    #[serde(default = "general", alias = "usecase")]
    pub use_case: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub model_provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalyzePromptRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerateFormatsRequest {
    #[serde(default = "general")]
    pub industry: String,
    #[serde(default = "general", alias = "usecase")]
    pub use_case: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of one pass through the search/extract/critique/revise pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub original_prompt: String,
    pub refined_prompt: String,
    pub industry: String,
    pub usecase: String,
    pub steps: Vec<StepOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub method: String,
    pub timestamp: String,
}

/// Named sections a generation template asks the model to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptSections {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub considerations: Option<String>,
}

impl PromptSections {
    pub fn is_empty(&self) -> bool {
        self.planning.is_none() && self.final_prompt.is_none() && self.considerations.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPrompt {
    pub success: bool,
    pub generated_prompt: String,
    #[serde(flatten)]
    pub sections: PromptSections,
    pub industry: String,
    pub usecase: String,
    pub context: String,
    pub model_provider: Provider,
    pub model: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatsResponse {
    pub industry: String,
    pub usecase: String,
    pub detected_industry: String,
    pub input_format: serde_json::Value,
    pub output_format: serde_json::Value,
    pub generated: bool,
}

// ============================================================================
// Sample prompt library
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptListing {
    pub id: usize,
    pub name: String,
    pub category: String,
    pub description: String,
    pub file: String,
    pub tags: Vec<String>,
    pub tool_path: String,
    pub available_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptLibrary {
    pub prompts: Vec<PromptListing>,
    pub categories: std::collections::BTreeMap<String, Vec<PromptListing>>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedPrompt {
    pub tool_name: String,
    pub file_name: String,
    pub content: String,
    pub available_files: Vec<String>,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub message: String,
    pub providers: Vec<Provider>,
    /// Streaming runs still in flight.
    pub active_requests: usize,
    pub features: Vec<String>,
}

impl HealthStatus {
    pub fn healthy(providers: Vec<Provider>, active_requests: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            message: "Propt API is running".to_string(),
            providers,
            active_requests,
            features: vec![
                "5-step agent pipeline".to_string(),
                "Prompt generation".to_string(),
                "Prompt analysis".to_string(),
            ],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_reasoning_effort_parsing() {
        assert_eq!(ReasoningEffort::from_str("HIGH").unwrap(), ReasoningEffort::High);
        assert_eq!(ReasoningEffort::Low.to_string(), "low");
        assert!(ReasoningEffort::from_str("extreme").is_err());
    }

    #[test]
    fn test_process_request_defaults() {
        let req: ProcessPromptRequest =
            serde_json::from_str(r#"{"content": "Summarize today's market."}"#).unwrap();
        assert_eq!(req.industry, "general");
        assert_eq!(req.use_case, "general");
        assert_eq!(req.reasoning_effort, ReasoningEffort::Medium);
        assert!(req.region.is_none());
    }

    #[test]
    fn test_generate_request_accepts_usecase_alias() {
        let req: GeneratePromptRequest = serde_json::from_str(
            r#"{"industry": "finance", "usecase": "stock analysis", "model_provider": "ollama"}"#,
        )
        .unwrap();
        assert_eq!(req.use_case, "stock analysis");
        assert_eq!(req.model_provider, Provider::Ollama);
    }

    #[test]
    fn test_generated_prompt_flattens_sections() {
        let generated = GeneratedPrompt {
            success: true,
            generated_prompt: "raw".to_string(),
            sections: PromptSections {
                final_prompt: Some("You are...".to_string()),
                ..Default::default()
            },
            industry: "finance".to_string(),
            usecase: "stock analysis".to_string(),
            context: String::new(),
            model_provider: Provider::OpenAi,
            model: "gpt-5".to_string(),
            method: "structured".to_string(),
            error: None,
        };
        let json = serde_json::to_value(&generated).unwrap();
        assert_eq!(json["final_prompt"], "You are...");
        assert!(json.get("planning").is_none());
        assert_eq!(json["model_provider"], "openai");
    }

    #[test]
    fn test_health() {
        let json = serde_json::to_value(HealthStatus::healthy(vec![Provider::OpenAi, Provider::Ollama], 3)).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["providers"], serde_json::json!(["openai", "ollama"]));
        assert_eq!(json["active_requests"], 3);
    }
}
