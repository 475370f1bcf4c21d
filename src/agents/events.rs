use serde::{Deserialize, Serialize};

use crate::agents::agent::ToolRole;
use crate::models::PipelineResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // Lifecycle events
    Started {
        request_id: String,
        industry: String,
        usecase: String,
        timestamp: i64,
    },

    // Step events
    StepStarted {
        request_id: String,
        step: ToolRole,
        agent: String,
    },

    StepCompleted {
        request_id: String,
        step: ToolRole,
        agent: String,
        preview: String,
        failed: bool,
    },

    StepSkipped {
        request_id: String,
        step: ToolRole,
    },

    Synthesizing {
        request_id: String,
        agent: String,
    },

    // Completion events
    Completed {
        request_id: String,
        result: PipelineResult,
        timestamp: i64,
    },

    // Error events
    Error {
        request_id: String,
        error: String,
        recoverable: bool,
    },

    // Cancelled events
    Cancelled {
        request_id: String,
        reason: String,
    },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Error { .. } | Self::Cancelled { .. }
        )
    }
}
