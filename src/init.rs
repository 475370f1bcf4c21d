use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::completion::{CompletionClients, RigCompletionClient};
use crate::agents::pipeline::{PromptPipelineService, REQUIRED_TEMPLATES};
use crate::agents::runner::StepPolicy;
use crate::error::Result;
use crate::rate_limit::RateLimiter;
use crate::storage::{env_parse, AiConfig, AppState, TemplateStore};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub templates_dir: PathBuf,
    pub samples_dir: PathBuf,
    pub rate_limit: RateLimitConfig,
    pub require_analysis_steps: bool,
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 5001)?,
            templates_dir: std::env::var("TEMPLATES_DIR")
                .unwrap_or_else(|_| "prompts".to_string())
                .into(),
            samples_dir: std::env::var("SAMPLE_PROMPTS_DIR")
                .unwrap_or_else(|_| "sample_prompts".to_string())
                .into(),
            rate_limit: RateLimitConfig {
                max_requests: env_parse("RATE_LIMIT_MAX", 2)?,
                window: Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SECS", 86400)?),
            },
            require_analysis_steps: env_parse("REQUIRE_ANALYSIS_STEPS", false)?,
            trust_proxy_headers: env_parse("TRUST_PROXY_HEADERS", false)?,
        })
    }
}

pub async fn app_init() -> std::result::Result<(Config, Arc<AppState>), Box<dyn Error>> {
    let config = Config::from_env()?;
    log::info!("✅ Configuration loaded");
    let ai_config = AiConfig::from_env()?;
    log::info!("✅ Ai Configuration loaded");

    // Templates
    let templates = Arc::new(TemplateStore::new(&config.templates_dir, &config.samples_dir));
    templates.verify(&REQUIRED_TEMPLATES)?;
    log::info!("✅ Prompt templates found in {}", config.templates_dir.display());

    // Completion providers
    let clients = setup_clients(&ai_config)?;
    log::info!("✅ Completion providers: {:?}", clients.providers());

    let pipeline = Arc::new(PromptPipelineService::new(
        clients,
        templates.clone(),
        ai_config,
        StepPolicy {
            require_analysis_steps: config.require_analysis_steps,
        },
    ));

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_requests,
        config.rate_limit.window,
    ));

    // Application state
    let state = Arc::new(AppState {
        pipeline,
        templates,
        rate_limiter,
        trust_proxy_headers: config.trust_proxy_headers,
    });
    Ok((config, state))
}

// ============================================================================
// Setup Functions
// ============================================================================

fn setup_clients(ai_config: &AiConfig) -> Result<CompletionClients> {
    let api_key = ai_config.openai_api_key.as_deref().unwrap_or_default();
    let openai = RigCompletionClient::openai(
        api_key,
        ai_config.openai_base_url.as_deref(),
        ai_config.max_output_tokens,
        ai_config.completion_timeout,
    )?;
    let mut clients = CompletionClients::new(Arc::new(openai));

    if let Some(url) = &ai_config.ollama_url {
        log::info!("🦙 Registering Ollama at {}", url);
        let ollama = RigCompletionClient::ollama(url, ai_config.max_output_tokens, ai_config.completion_timeout)?;
        clients = clients.register(Arc::new(ollama));
    }

    Ok(clients)
}
