use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agents::pipeline::PromptPipelineService;
use crate::error::*;
use crate::models::{LoadedPrompt, PromptLibrary, PromptListing, Provider};
use crate::rate_limit::RateLimiter;

// ============================================================================
// AppState && AiConfig
// ============================================================================

#[derive(Clone)]
pub struct AiConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub ollama_url: Option<String>,
    pub default_model: String,
    pub generation_model: String,
    pub ollama_model: String,
    pub max_output_tokens: u64,
    pub completion_timeout: Duration,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: None,
            default_model: "gpt-5".to_string(),
            generation_model: "gpt-5-mini-2025-08-07".to_string(),
            ollama_model: "llama3.2".to_string(),
            max_output_tokens: 2000,
            completion_timeout: Duration::from_secs(120),
        }
    }
}

impl AiConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::configuration("OPENAI_API_KEY is not set"))?;

        Ok(Self {
            openai_api_key: Some(api_key),
            openai_base_url: std::env::var("OPENAI_BASE_URL").ok(),
            ollama_url: std::env::var("OLLAMA_URL").ok(),
            default_model: std::env::var("DEFAULT_MODEL").unwrap_or(defaults.default_model),
            generation_model: std::env::var("GENERATION_MODEL").unwrap_or(defaults.generation_model),
            ollama_model: std::env::var("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            max_output_tokens: env_parse("MAX_OUTPUT_TOKENS", defaults.max_output_tokens)?,
            completion_timeout: Duration::from_secs(env_parse(
                "COMPLETION_TIMEOUT_SECS",
                defaults.completion_timeout.as_secs(),
            )?),
        })
    }

    pub fn generation_model_for(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.generation_model,
            Provider::Ollama => &self.ollama_model,
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::configuration(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PromptPipelineService>,
    pub templates: Arc<TemplateStore>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Key rate limits on `X-Forwarded-For` / `X-Real-IP` instead of the peer address.
    pub trust_proxy_headers: bool,
}

// ============================================================================
// Template store
// ============================================================================

/// File-backed prompt templates plus the sample prompt library.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates_dir: PathBuf,
    samples_dir: PathBuf,
}

impl TemplateStore {
    pub fn new(templates_dir: impl Into<PathBuf>, samples_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            samples_dir: samples_dir.into(),
        }
    }

    fn template_path(&self, id: &str) -> Result<PathBuf> {
        if !is_plain_name(id) {
            return Err(AppError::bad_request(format!("Invalid template name: {}", id)));
        }
        Ok(self.templates_dir.join(id))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.template_path(id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Reads template `id` and fills its `{name}` placeholders from `vars`.
    pub fn load(&self, id: &str, vars: &[(&str, &str)]) -> Result<String> {
        let path = self.template_path(id)?;
        if !path.is_file() {
            return Err(AppError::template_not_found(path.display().to_string()));
        }
        let text = std::fs::read_to_string(&path).context(format!("reading {}", path.display()))?;
        log::debug!("Loaded template {} ({} bytes)", id, text.len());
        Ok(fill_template(&text, vars))
    }

    /// Fails on the first template in `ids` that is absent.
    pub fn verify(&self, ids: &[&str]) -> Result<()> {
        for id in ids {
            if !self.exists(id) {
                return Err(AppError::template_not_found(
                    self.templates_dir.join(id).display().to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn list_samples(&self) -> Result<PromptLibrary> {
        if !self.samples_dir.is_dir() {
            return Err(AppError::not_found("Sample prompts directory"));
        }

        let mut categories: BTreeMap<String, Vec<PromptListing>> = BTreeMap::new();
        for name in ["AI Coding Assistants", "Development Platforms", "Conversational AI"] {
            categories.insert(name.to_string(), Vec::new());
        }

        let mut prompts = Vec::new();
        for tool_name in sorted_entries(&self.samples_dir, |p| p.is_dir())? {
            let tool_dir = self.samples_dir.join(&tool_name);
            let prompt_files = sorted_entries(&tool_dir, |p| p.is_file() && is_prompt_file(p))?;
            let Some(first) = prompt_files.first().cloned() else {
                continue;
            };

            let category = categorize(&tool_name);
            let listing = PromptListing {
                id: prompts.len() + 1,
                name: tool_name.clone(),
                category: category.to_lowercase().replace(' ', "_"),
                description: format!("AI assistant and productivity tool - {}", tool_name),
                file: first,
                tags: vec!["AI-assistant".to_string(), "prompt".to_string()],
                tool_path: tool_name,
                available_files: prompt_files,
            };
            categories.entry(category.to_string()).or_default().push(listing.clone());
            prompts.push(listing);
        }

        Ok(PromptLibrary {
            total: prompts.len(),
            prompts,
            categories,
        })
    }

    pub fn load_sample(&self, tool_name: &str) -> Result<LoadedPrompt> {
        if !is_plain_name(tool_name) {
            return Err(AppError::bad_request(format!("Invalid tool name: {}", tool_name)));
        }
        let tool_dir = self.samples_dir.join(tool_name);
        if !tool_dir.is_dir() {
            return Err(AppError::not_found(format!("Tool '{}'", tool_name)));
        }

        let available_files = sorted_entries(&tool_dir, |p| p.is_file())?;
        let file_name = available_files
            .iter()
            .find(|f| {
                let lower = f.to_lowercase();
                (lower.ends_with(".txt") || lower.ends_with(".md")) && lower.contains("prompt")
            })
            .or_else(|| available_files.iter().find(|f| f.ends_with(".txt")))
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Prompt file for '{}'", tool_name)))?;

        let content = std::fs::read_to_string(tool_dir.join(&file_name))
            .context(format!("Error loading prompt {}", file_name))?;

        Ok(LoadedPrompt {
            tool_name: tool_name.to_string(),
            file_name,
            content,
            available_files,
        })
    }
}

/// Replaces `{name}` (and `${name}`) placeholders found in `vars`; `{{` and
/// `}}` collapse to single braces. Unknown placeholders are left as written.
pub fn fill_template(text: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let key = &tail[1..end];
                if let Some((_, value)) = vars.iter().find(|(k, _)| *k == key) {
                    if out.ends_with('$') {
                        out.pop();
                    }
                    out.push_str(value);
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }

        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

fn is_prompt_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}

fn categorize(tool_name: &str) -> &'static str {
    let lower = tool_name.to_lowercase();
    if lower.contains("cursor") || lower.contains("devin") || lower.contains("coding") {
        "AI Coding Assistants"
    } else if ["Lovable", "Replit", "Same.dev"].contains(&tool_name) {
        "Development Platforms"
    } else {
        "Conversational AI"
    }
}

fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| keep(&entry.path()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}

// ============================================================================
// Tests
// ============================================================================
