use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use propt_agent::handlers::{
    analyze_prompt_handler, cancel_handler, generate_formats_handler, generate_prompt_handler, health_check,
    list_prompts_handler, load_prompt_handler, process_prompt_handler, process_prompt_stream_handler,
};
use propt_agent::init::app_init;
use propt_agent::AppState;

fn create_app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/process-prompt", post(process_prompt_handler))
        .route("/api/process-prompt/stream", post(process_prompt_stream_handler))
        .route("/api/process-prompt/{request_id}", delete(cancel_handler))
        .route("/api/generate-prompt", post(generate_prompt_handler))
        .route("/api/analyze-prompt", post(analyze_prompt_handler))
        .route("/api/generate-formats", post(generate_formats_handler))
        .route("/api/list-prompts", get(list_prompts_handler))
        .route("/api/load-prompt/{tool_name}", get(load_prompt_handler))
        .route("/api/health", get(health_check))
        .route("/health", get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("🚀 Starting Propt prompt pipeline server...");
    let (config, state) = app_init().await?;
    log::info!("✅ Application state initialized");
    let app = create_app_router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("");
    log::info!("🎉 Server started!");
    log::info!("📍 http://{}", addr);
    log::info!("🛠️  Pipeline: http://{}/api/process-prompt", addr);
    log::info!("📡 Stream: http://{}/api/process-prompt/stream", addr);
    log::info!("🎨 Generate: http://{}/api/generate-prompt", addr);
    log::info!("❤️  Health: http://{}/api/health", addr);
    log::info!("");
    log::info!("📂 Templates: {}", config.templates_dir.display());
    log::info!(
        "🚦 Rate limit: {} per {}s",
        config.rate_limit.max_requests,
        config.rate_limit.window.as_secs()
    );
    log::info!("");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
