pub mod agents;
pub mod error;
pub mod handlers;
pub mod init;
pub mod models;
pub mod rate_limit;
pub mod storage;

pub use crate::storage::{AiConfig, AppState};
pub use crate::agents::{CancellationToken, PromptPipelineService, RequestManager};
