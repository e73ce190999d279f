use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConciergeError, Result};

/// Main configuration structure for Concierge
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Remote embedding/generation endpoint
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Tiered embedding cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Embedding batch dispatcher
    #[serde(default)]
    pub batch: BatchConfig,
    /// Knowledge-base retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Conversation engine
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Human handoff rules
    #[serde(default)]
    pub escalation: EscalationConfig,
    /// Performance thresholds
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Cost rate table and budgets
    #[serde(default)]
    pub costs: CostConfig,
}

impl Config {
    /// Read and parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConciergeError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| ConciergeError::Config(format!("Failed to parse config: {e}")))
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: impl Into<String>) -> Result<()> {
            Err(ConciergeError::Config(msg.into()))
        }

        if url::Url::parse(&self.provider.base_url).is_err() {
            return invalid(format!(
                "provider.base_url is not a valid URL: {}",
                self.provider.base_url
            ));
        }
        if self.batch.batch_size == 0 {
            return invalid("batch.batch_size must be at least 1");
        }
        if self.batch.max_retries == 0 {
            return invalid("batch.max_retries must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return invalid("retrieval.similarity_threshold must be within [0, 1]");
        }
        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be at least 1");
        }
        if self.conversation.max_history == 0 {
            return invalid("conversation.max_history must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.conversation.temperature) {
            return invalid("conversation.temperature must be within [0, 2]");
        }
        if !(-1.0..=1.0).contains(&self.escalation.sentiment_threshold) {
            return invalid("escalation.sentiment_threshold must be within [-1, 1]");
        }
        if self.monitor.window_size == 0 {
            return invalid("monitor.window_size must be at least 1");
        }
        if self.costs.rates.values().any(|r| *r < 0.0) || self.costs.default_rate < 0.0 {
            return invalid("costs rates cannot be negative");
        }
        Ok(())
    }
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API base URL (requests go to `{base_url}/embeddings` and `{base_url}/chat/completions`)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Embedding model identifier
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Chat model identifier used for classification and replies
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            embedding_model: default_embedding_model(),
            generation_model: default_generation_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.studio.nebius.ai/v1".to_string()
}

fn default_api_key_env() -> String {
    "NEBIUS_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    "BAAI/bge-m3".to_string()
}

fn default_generation_model() -> String {
    "meta-llama/Meta-Llama-3.1-70B-Instruct".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Embedding cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached embeddings in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Local entries older than this are removed by the sweeper, whatever their TTL
    #[serde(default = "default_eviction_window_secs")]
    pub eviction_window_secs: u64,
    /// How often the sweeper runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Attach the in-process shared tier
    #[serde(default = "default_shared_enabled")]
    pub shared_enabled: bool,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn eviction_window(&self) -> Duration {
        Duration::from_secs(self.eviction_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            eviction_window_secs: default_eviction_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            shared_enabled: default_shared_enabled(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_eviction_window_secs() -> u64 {
    86_400
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_shared_enabled() -> bool {
    false
}

/// Batch dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum texts per provider call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Longest time the oldest pending text waits before a partial batch flushes
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Total provider attempts per batch, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the second attempt; doubles after each failure
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Capacity of the submission channel
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl BatchConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_wait_ms: default_max_wait_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_max_wait_ms() -> u64 {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    1024
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum similarity for a passage to be used as context
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Character budget for the concatenated context
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    /// Passages requested from the retrieval provider
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_context_length: default_max_context_length(),
            top_k: default_top_k(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_max_context_length() -> usize {
    2000
}

fn default_top_k() -> usize {
    5
}

/// Conversation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Turns kept per session
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Prior turns included in the reply prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Longest accepted message, in characters
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Token limit for replies
    #[serde(default = "default_response_max_tokens")]
    pub response_max_tokens: u32,
    /// Sampling temperature for replies
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Token limit for intent/sentiment classification
    #[serde(default = "default_classify_max_tokens")]
    pub classify_max_tokens: u32,
    /// Sampling temperature for classification
    #[serde(default = "default_classify_temperature")]
    pub classify_temperature: f32,
    /// Mask passwords, national ids, e-mails, phone and card numbers before use
    #[serde(default = "default_mask_sensitive_data")]
    pub mask_sensitive_data: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            history_window: default_history_window(),
            max_message_length: default_max_message_length(),
            response_max_tokens: default_response_max_tokens(),
            temperature: default_temperature(),
            classify_max_tokens: default_classify_max_tokens(),
            classify_temperature: default_classify_temperature(),
            mask_sensitive_data: default_mask_sensitive_data(),
        }
    }
}

fn default_max_history() -> usize {
    10
}

fn default_history_window() -> usize {
    3
}

fn default_max_message_length() -> usize {
    2000
}

fn default_response_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_classify_max_tokens() -> u32 {
    50
}

fn default_classify_temperature() -> f32 {
    0.1
}

fn default_mask_sensitive_data() -> bool {
    true
}

/// Escalation rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Sentiment strictly below this escalates
    #[serde(default = "default_sentiment_threshold")]
    pub sentiment_threshold: f32,
    /// Unresolved issue turns in a row that escalate
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: usize,
    /// Prior complaint turns that, with a complaint now, escalate
    #[serde(default = "default_complaint_streak")]
    pub complaint_streak: usize,
    /// Sentiment at or above this counts as resolved
    #[serde(default = "default_resolution_sentiment")]
    pub resolution_sentiment: f32,
    /// Identical consecutive messages that escalate (0 disables)
    #[serde(default = "default_repeat_limit")]
    pub repeat_limit: usize,
    /// Phrases asking for a human
    #[serde(default = "default_handoff_keywords")]
    pub handoff_keywords: Vec<String>,
    /// Phrases marking an urgent request
    #[serde(default = "default_urgent_keywords")]
    pub urgent_keywords: Vec<String>,
    /// Keep a session escalated until it is reset
    #[serde(default)]
    pub sticky: bool,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            sentiment_threshold: default_sentiment_threshold(),
            max_failed_attempts: default_max_failed_attempts(),
            complaint_streak: default_complaint_streak(),
            resolution_sentiment: default_resolution_sentiment(),
            repeat_limit: default_repeat_limit(),
            handoff_keywords: default_handoff_keywords(),
            urgent_keywords: default_urgent_keywords(),
            sticky: false,
        }
    }
}

fn default_sentiment_threshold() -> f32 {
    -0.5
}

fn default_max_failed_attempts() -> usize {
    3
}

fn default_complaint_streak() -> usize {
    2
}

fn default_resolution_sentiment() -> f32 {
    0.5
}

fn default_repeat_limit() -> usize {
    3
}

fn default_handoff_keywords() -> Vec<String> {
    ["human", "agent", "manusia", "operator", "admin"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_urgent_keywords() -> Vec<String> {
    [
        "urgent",
        "emergency",
        "darurat",
        "segera",
        "penting",
        "critical",
        "kritis",
    ]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Performance monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Samples kept per latency kind
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Mean response time alert threshold in seconds
    #[serde(default = "default_response_time_threshold")]
    pub response_time_threshold: f64,
    /// Mean embedding time alert threshold in seconds
    #[serde(default = "default_embedding_time_threshold")]
    pub embedding_time_threshold: f64,
    /// Mean search time alert threshold in seconds
    #[serde(default = "default_search_time_threshold")]
    pub search_time_threshold: f64,
    /// Error rate alert threshold (fraction of requests)
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Cache hit rate below this raises an info alert
    #[serde(default = "default_cache_hit_rate_target")]
    pub cache_hit_rate_target: f64,
    /// Host memory alert threshold in MB
    #[serde(default = "default_memory_threshold_mb")]
    pub memory_threshold_mb: f64,
    /// Host CPU alert threshold in percent
    #[serde(default = "default_cpu_threshold_percent")]
    pub cpu_threshold_percent: f64,
    /// Capacity of the alert delivery queue
    #[serde(default = "default_alert_queue_capacity")]
    pub alert_queue_capacity: usize,
    /// How long a shared cache failure keeps its alert raised, in seconds
    #[serde(default = "default_cache_outage_alert_secs")]
    pub cache_outage_alert_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            response_time_threshold: default_response_time_threshold(),
            embedding_time_threshold: default_embedding_time_threshold(),
            search_time_threshold: default_search_time_threshold(),
            error_rate_threshold: default_error_rate_threshold(),
            cache_hit_rate_target: default_cache_hit_rate_target(),
            memory_threshold_mb: default_memory_threshold_mb(),
            cpu_threshold_percent: default_cpu_threshold_percent(),
            alert_queue_capacity: default_alert_queue_capacity(),
            cache_outage_alert_secs: default_cache_outage_alert_secs(),
        }
    }
}

fn default_window_size() -> usize {
    1000
}

fn default_response_time_threshold() -> f64 {
    3.0
}

fn default_embedding_time_threshold() -> f64 {
    2.0
}

fn default_search_time_threshold() -> f64 {
    1.0
}

fn default_error_rate_threshold() -> f64 {
    0.05
}

fn default_cache_hit_rate_target() -> f64 {
    0.8
}

fn default_memory_threshold_mb() -> f64 {
    512.0
}

fn default_cpu_threshold_percent() -> f64 {
    80.0
}

fn default_alert_queue_capacity() -> usize {
    256
}

fn default_cache_outage_alert_secs() -> f64 {
    300.0
}

/// Cost tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// USD per 1000 tokens, keyed by model id
    #[serde(default = "default_rates")]
    pub rates: HashMap<String, f64>,
    /// USD per 1000 tokens for models missing from `rates`
    #[serde(default = "default_rate")]
    pub default_rate: f64,
    /// Provider calls per day before a budget alert
    #[serde(default = "default_max_daily_api_calls")]
    pub max_daily_api_calls: usize,
    /// Tokens per calendar month before a budget alert
    #[serde(default = "default_max_monthly_tokens")]
    pub max_monthly_tokens: u64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            rates: default_rates(),
            default_rate: default_rate(),
            max_daily_api_calls: default_max_daily_api_calls(),
            max_monthly_tokens: default_max_monthly_tokens(),
        }
    }
}

fn default_rates() -> HashMap<String, f64> {
    HashMap::from([
        (default_embedding_model(), 0.0001),
        (default_generation_model(), 0.002),
    ])
}

fn default_rate() -> f64 {
    0.001
}

fn default_max_daily_api_calls() -> usize {
    10_000
}

fn default_max_monthly_tokens() -> u64 {
    1_000_000
}
