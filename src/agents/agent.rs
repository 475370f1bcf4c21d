use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::models::ReasoningEffort;

// ============================================================================
// OUTPUT SHAPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Instruction {
    /// A 2-8 word title of the instruction.
    pub instruction_title: String,
    /// The exact text extracted from the prompt.
    pub extracted_instruction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InstructionList {
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CritiqueIssue {
    pub issue: String,
    pub snippet: String,
    pub explanation: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CritiqueIssues {
    pub issues: Vec<CritiqueIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RevisedPrompt {
    /// The revised prompt as a string.
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GeneratedPromptOutput {
    pub planning: String,
    pub final_prompt: String,
    pub considerations: String,
}

/// Structured reply an agent is asked to produce.
///
/// Decoding is advisory: callers fall back to the raw reply when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OutputShape {
    InstructionList,
    CritiqueIssues,
    RevisedPrompt,
    GeneratedPrompt,
}

impl OutputShape {
    pub fn schema(&self) -> serde_json::Value {
        let schema = match self {
            Self::InstructionList => schemars::schema_for!(InstructionList),
            Self::CritiqueIssues => schemars::schema_for!(CritiqueIssues),
            Self::RevisedPrompt => schemars::schema_for!(RevisedPrompt),
            Self::GeneratedPrompt => schemars::schema_for!(GeneratedPromptOutput),
        };
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }

    /// Decodes `json` against this shape and renders the value handed downstream.
    pub fn decode(&self, json: &str) -> Result<String, serde_json::Error> {
        match self {
            Self::RevisedPrompt => Ok(serde_json::from_str::<RevisedPrompt>(json)?.value),
            Self::InstructionList => {
                serde_json::to_string_pretty(&serde_json::from_str::<InstructionList>(json)?)
            }
            Self::CritiqueIssues => {
                serde_json::to_string_pretty(&serde_json::from_str::<CritiqueIssues>(json)?)
            }
            Self::GeneratedPrompt => {
                serde_json::to_string_pretty(&serde_json::from_str::<GeneratedPromptOutput>(json)?)
            }
        }
    }
}

// ============================================================================
// TOOLS
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolRole {
    Search,
    Extract,
    Critique,
    Revise,
}

impl ToolRole {
    /// Label used for this step's line in the orchestration results log.
    pub fn log_label(&self) -> &'static str {
        match self {
            Self::Search => "Search Results",
            Self::Extract => "Extracted Instructions",
            Self::Critique => "Critique",
            Self::Revise => "Revision",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentTool {
    pub role: ToolRole,
    pub name: String,
    pub description: String,
    pub agent: Agent,
}

// ============================================================================
// AGENT
// ============================================================================

#[derive(Debug, Clone)]
pub struct Agent {
    name: String,
    model: String,
    instructions: String,
    output_shape: Option<OutputShape>,
    tools: Vec<AgentTool>,
    reasoning_effort: Option<ReasoningEffort>,
    web_search: bool,
}

impl Agent {
    pub fn new(name: impl Into<String>, model: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            instructions: instructions.into(),
            output_shape: None,
            tools: Vec::new(),
            reasoning_effort: None,
            web_search: false,
        }
    }

    pub fn with_output_shape(mut self, shape: OutputShape) -> Self {
        self.output_shape = Some(shape);
        self
    }

    pub fn with_tool(mut self, tool: AgentTool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = AgentTool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }

    /// Wraps this agent so an orchestrating agent can call it as `role`.
    pub fn as_tool(self, role: ToolRole, name: impl Into<String>, description: impl Into<String>) -> AgentTool {
        AgentTool {
            role,
            name: name.into(),
            description: description.into(),
            agent: self,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn output_shape(&self) -> Option<OutputShape> {
        self.output_shape
    }

    pub fn tools(&self) -> &[AgentTool] {
        &self.tools
    }

    pub fn reasoning_effort(&self) -> Option<ReasoningEffort> {
        self.reasoning_effort
    }

    pub fn web_search(&self) -> bool {
        self.web_search
    }

    pub fn tool(&self, role: ToolRole) -> Option<&AgentTool> {
        self.tools.iter().find(|t| t.role == role)
    }
}
