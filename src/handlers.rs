use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive};
use axum::response::Sse;
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::agents::analysis::{AnalysisReport, PromptAnalysis};
use crate::agents::events::PipelineEvent;
use crate::error::*;
use crate::models::*;
use crate::AppState;

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub request_id: String,
    pub message: String,
}

// ============================================================================
// CLIENT IDENTIFICATION
// ============================================================================

/// Rate-limit key. The peer address, unless the service sits behind a trusted
/// proxy: then the first `X-Forwarded-For` hop, else `X-Real-IP`.
pub fn client_key(headers: &HeaderMap, peer: SocketAddr, trust_proxy_headers: bool) -> String {
    if !trust_proxy_headers {
        return peer.ip().to_string();
    }

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header("X-Forwarded-For")
        .or_else(|| header("X-Real-IP"))
        .unwrap_or_else(|| peer.ip().to_string())
}

fn require_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(AppError::bad_request("Prompt content is required"));
    }
    Ok(())
}

// ============================================================================
// PIPELINE HANDLERS
// ============================================================================

/// POST /api/process-prompt
pub async fn process_prompt_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ProcessPromptRequest>,
) -> Result<Json<PipelineResult>> {
    require_content(&request.content)?;
    state.rate_limiter.check(&client_key(&headers, peer, state.trust_proxy_headers)).await?;

    let result = state.pipeline.generate(&request).await?;
    Ok(Json(result))
}

/// POST /api/process-prompt/stream
///
/// Returns: Server-Sent Events stream with PipelineEvent data
pub async fn process_prompt_stream_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ProcessPromptRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    require_content(&request.content)?;
    state.rate_limiter.check(&client_key(&headers, peer, state.trust_proxy_headers)).await?;

    let (request_id, mut rx) = state.pipeline.process_stream(request).await?;
    log::info!("📡 Streaming pipeline run {}", request_id);
    let mut guard = state.pipeline.cancel_on_drop(&request_id);

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json_data) => {
                    yield Ok(Event::default().event("message").data(json_data));

                    if event.is_terminal() {
                        guard.disarm();
                        break;
                    }
                }
                Err(e) => {
                    let error_event = PipelineEvent::Error {
                        request_id: request_id.clone(),
                        error: format!("Serialization error: {}", e),
                        recoverable: false,
                    };

                    if let Ok(json_data) = serde_json::to_string(&error_event) {
                        yield Ok(Event::default().event("error").data(json_data));
                    }
                    break;
                }
            }
        }

        yield Ok(Event::default().event("done").data("Stream closed"));
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// DELETE /api/process-prompt/:request_id
pub async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<CancelResponse>> {
    if !state.pipeline.cancel(&request_id).await {
        return Err(AppError::not_found(format!("Request {}", request_id)));
    }

    log::info!("🛑 Cancelled request {}", request_id);
    Ok(Json(CancelResponse {
        success: true,
        message: format!("Request {} cancelled successfully", request_id),
        request_id,
    }))
}

// ============================================================================
// GENERATION && ANALYSIS HANDLERS
// ============================================================================

/// POST /api/generate-prompt
pub async fn generate_prompt_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<GeneratePromptRequest>,
) -> Result<Json<GeneratedPrompt>> {
    state.rate_limiter.check(&client_key(&headers, peer, state.trust_proxy_headers)).await?;

    let generated = state.pipeline.generate_new_prompt(&request).await?;
    Ok(Json(generated))
}

/// POST /api/analyze-prompt
pub async fn analyze_prompt_handler(Json(request): Json<AnalyzePromptRequest>) -> Result<Json<AnalysisReport>> {
    require_content(&request.content)?;
    Ok(Json(PromptAnalysis::of(&request.content).report()))
}

/// POST /api/generate-formats
pub async fn generate_formats_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateFormatsRequest>,
) -> Json<FormatsResponse> {
    Json(state.pipeline.generate_formats(&request).await)
}

// ============================================================================
// SAMPLE LIBRARY HANDLERS
// ============================================================================

/// GET /api/list-prompts
pub async fn list_prompts_handler(State(state): State<Arc<AppState>>) -> Result<Json<PromptLibrary>> {
    Ok(Json(state.templates.list_samples()?))
}

/// GET /api/load-prompt/:tool_name
pub async fn load_prompt_handler(
    State(state): State<Arc<AppState>>,
    Path(tool_name): Path<String>,
) -> Result<Json<LoadedPrompt>> {
    Ok(Json(state.templates.load_sample(&tool_name)?))
}

// ============================================================================
// HEALTH
// ============================================================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(HealthStatus::healthy(
        state.pipeline.providers(),
        state.pipeline.active_requests().await,
    ))
}
