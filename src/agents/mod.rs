// Public module exports
pub mod agent;
pub mod analysis;
pub mod completion;
pub mod events;
pub mod extract;
pub mod formats;
pub mod pipeline;
pub mod runner;
#[cfg(test)]
pub mod testing;

// Re-export main types for convenience
pub use agent::{Agent, AgentTool, OutputShape, ToolRole};
pub use analysis::{AnalysisReport, PromptAnalysis};
pub use completion::{CompletionClient, CompletionClients, CompletionError, CompletionRequest, CompletionResponse, RigCompletionClient};
pub use events::PipelineEvent;
pub use pipeline::{CancellationToken, PromptPipelineService, RequestManager};
pub use runner::{AgentRunner, RunResult, StepOutput, StepPolicy};
