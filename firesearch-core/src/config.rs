//! Configuration system for FireSearch.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/firesearch/config.toml` and/or
//! `.firesearch/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FireSearchConfig {
    pub search: SearchConfig,
    pub llm: LlmConfig,
    pub firecrawl: FirecrawlConfig,
    pub questions: QuestionConfig,
    pub retry: RetryConfig,
}

impl FireSearchConfig {
    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for w in self.search.validate() {
            warnings.push(format!("[search] {}", w));
        }
        for w in self.llm.validate() {
            warnings.push(format!("[llm] {}", w));
        }
        for w in self.questions.validate() {
            warnings.push(format!("[questions] {}", w));
        }
        warnings
    }
}

/// Knobs for the research pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum distinct search queries issued per session.
    pub max_search_queries: usize,
    /// Maximum queries planned in a single round.
    pub max_queries_per_round: usize,
    /// Maximum planning/search/evaluate rounds.
    pub max_rounds: u32,
    /// Maximum results requested from the search provider per query.
    pub max_sources_per_search: usize,
    /// Maximum sources scraped per round.
    pub max_sources_to_scrape: usize,
    /// Extracted text shorter than this is discarded.
    pub min_content_length: usize,
    /// Character budget for per-source summaries.
    pub summary_char_limit: usize,
    /// Raw content above this length is replaced by its summary in the synthesis prompt.
    pub synthesis_content_limit: usize,
    /// Preview length used when showing sources in narration.
    pub context_preview_length: usize,
    /// Per-source content preview used for confidence checks.
    pub answer_check_preview: usize,
    /// Maximum sources inspected per confidence check.
    pub max_sources_to_check: usize,
    /// Retry ceiling for search, scrape, summary and confidence operations.
    pub max_retries: u32,
    /// Search rounds allowed per sub-question.
    pub max_search_attempts: u32,
    /// Below this score a sub-question at its attempt ceiling is low-confidence.
    pub min_answer_confidence: f64,
    /// At or above this score a sub-question is answered immediately.
    pub early_termination_confidence: f64,
    /// Hard timeout for a single extraction call.
    pub scrape_timeout_ms: u64,
    /// Timeout for a single search call.
    pub search_timeout_ms: u64,
    /// Generate summaries concurrently across sources.
    pub parallel_summary_generation: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_search_queries: 10,
            max_queries_per_round: 4,
            max_rounds: 3,
            max_sources_per_search: 10,
            max_sources_to_scrape: 10,
            min_content_length: 100,
            summary_char_limit: 100,
            synthesis_content_limit: 4_000,
            context_preview_length: 500,
            answer_check_preview: 2_500,
            max_sources_to_check: 10,
            max_retries: 3,
            max_search_attempts: 3,
            min_answer_confidence: 0.3,
            early_termination_confidence: 0.8,
            scrape_timeout_ms: 15_000,
            search_timeout_ms: 20_000,
            parallel_summary_generation: true,
        }
    }
}

impl SearchConfig {
    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.scrape_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.max_search_queries == 0 {
            warnings.push("max_search_queries is 0 - no searches will run".to_string());
        }
        if self.max_queries_per_round == 0 {
            warnings.push("max_queries_per_round is 0 - planning rounds will be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_answer_confidence)
            || !(0.0..=1.0).contains(&self.early_termination_confidence)
        {
            warnings.push("confidence thresholds must lie within [0, 1]".to_string());
        }
        if self.min_answer_confidence > self.early_termination_confidence {
            warnings.push(format!(
                "min_answer_confidence ({}) exceeds early_termination_confidence ({})",
                self.min_answer_confidence, self.early_termination_confidence
            ));
        }
        if self.scrape_timeout_ms == 0 {
            warnings.push("scrape_timeout_ms is 0 - every scrape will time out".to_string());
        }
        if self.max_search_attempts == 0 {
            warnings.push(
                "max_search_attempts is 0 - sub-questions close before any search".to_string(),
            );
        }

        warnings
    }
}

/// Model service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai" or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Model used for planning, confidence checks and summaries.
    pub fast_model: String,
    /// Model used for synthesis.
    pub quality_model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Timeout for a single request, in seconds.
    pub request_timeout_secs: u64,
    /// Explicit API key; takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            fast_model: "gpt-4o-mini".to_string(),
            quality_model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.0,
            request_timeout_secs: 60,
            api_key: None,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.request_timeout_secs == 0 {
            warnings.push("request_timeout_secs is 0 - every model call will time out".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            warnings.push(format!(
                "temperature {} is outside the usual [0, 2] range",
                self.temperature
            ));
        }
        warnings
    }
}

/// Firecrawl search/extraction service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirecrawlConfig {
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// API base URL.
    pub base_url: String,
    /// Use the plain HTTP fetcher for extraction instead of Firecrawl scrape.
    pub use_http_fetch: bool,
}

impl Default for FirecrawlConfig {
    fn default() -> Self {
        Self {
            api_key_env: "FIRECRAWL_API_KEY".to_string(),
            base_url: "https://api.firecrawl.dev/v1".to_string(),
            use_http_fetch: false,
        }
    }
}

/// Industry question generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub question_count: usize,
    pub max_retries: u32,
}

impl Default for QuestionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 1500,
            question_count: 8,
            max_retries: 2,
        }
    }
}

impl QuestionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.question_count == 0 {
            warnings.push("question_count is 0 - generated sets will be empty".to_string());
        }
        warnings
    }
}

/// Exponential backoff settings for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 32_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Same backoff shape with a different attempt ceiling.
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "firesearch", "firesearch")
}

/// Path of the user-level configuration file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

/// Path of the workspace-level configuration file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".firesearch").join("config.toml")
}

/// Load configuration from all sources with layered merging.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&FireSearchConfig>,
) -> Result<FireSearchConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(FireSearchConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // FIRESEARCH_SEARCH__MAX_ROUNDS, FIRESEARCH_LLM__FAST_MODEL, ...
    figment = figment.merge(Env::prefixed("FIRESEARCH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(path) = user_config_path()
        && path.exists()
    {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}
