//! Runtime configuration for the analyst
//!
//! Every knob has a sensible default; `from_env()` layers environment
//! variables (and a `.env` file, if present) on top of those defaults.

use std::time::Duration;

/// Which LLM backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Ollama's `/api/generate` endpoint
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` endpoint
    OpenAi,
}

impl Provider {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(Provider::Ollama),
            "openai" => Some(Provider::OpenAi),
            _ => None,
        }
    }
}

/// Sampling options sent with every completion request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 512,
        }
    }
}

/// Environment setting that was rejected; the default was kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub value: String,
    pub reason: &'static str,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={:?}: {}", self.key, self.value, self.reason)
    }
}

/// Configuration for the analyst pipeline
#[derive(Debug, Clone)]
pub struct AnalystConfig {
    /// LLM backend flavour
    pub provider: Provider,
    /// Base URL of the LLM server
    pub base_url: String,
    /// API key (OpenAI-compatible backends only)
    pub api_key: Option<String>,
    /// Model name passed to the backend
    pub model: String,
    /// Sampling options
    pub generation: GenerationOptions,
    /// Width of the task executor's worker pool
    pub max_workers: usize,
    /// Number of refinement retries before giving up on a question
    pub retry_budget: u32,
    /// Number of candidate sources fetched from the vector store
    pub top_n: usize,
    /// Upper bound on a single LLM round trip
    pub llm_timeout_secs: u64,
    /// Wall-clock limit for one execution of generated code
    pub execution_timeout_secs: u64,
    /// Interpreter used by the code sandbox
    pub python_bin: String,
    /// Address-space limit for the sandboxed interpreter, in bytes
    pub sandbox_memory_bytes: u64,
    /// Stringified results longer than this are not summarized
    pub summary_max_chars: usize,
    /// Tables with more rows or columns than this are not summarized
    pub summary_max_table_dim: usize,
    /// OTLP collector endpoint; console logging only when unset
    pub otlp_endpoint: Option<String>,
    /// Emit console logs as JSON lines
    pub log_json: bool,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            model: "qwen3".to_string(),
            generation: GenerationOptions::default(),
            max_workers: 20,
            retry_budget: 5,
            top_n: 5,
            llm_timeout_secs: 120,
            execution_timeout_secs: 30,
            python_bin: "python3".to_string(),
            sandbox_memory_bytes: 2 * 1024 * 1024 * 1024, // 2GB
            summary_max_chars: 1024,
            summary_max_table_dim: 10,
            otlp_endpoint: None,
            log_json: false,
        }
    }
}

impl AnalystConfig {
    /// Build a configuration from the process environment
    ///
    /// Loads `.env` first. Rejected values keep their default and are
    /// returned as warnings for the caller to log.
    pub fn from_env() -> (Self, Vec<ConfigWarning>) {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<ConfigWarning>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut warnings = Vec::new();

        if let Some(provider) = lookup("DATALOOM_PROVIDER") {
            match Provider::parse(&provider) {
                Some(p) => config.provider = p,
                None => warnings.push(ConfigWarning {
                    key: "DATALOOM_PROVIDER".to_string(),
                    value: provider,
                    reason: "unknown provider",
                }),
            }
        }

        if let Some(url) = lookup("DATALOOM_BASE_URL").or_else(|| lookup("OPENAI_API_BASE")) {
            config.base_url = url;
        } else if config.provider == Provider::OpenAi {
            config.base_url = "https://api.openai.com/v1".to_string();
        }

        config.api_key = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty());

        if let Some(model) = lookup("DATALOOM_MODEL").or_else(|| lookup("MODEL")) {
            config.model = model;
        }

        parse_into(&lookup, &mut warnings, "DATALOOM_MAX_WORKERS", &mut config.max_workers);
        parse_into(&lookup, &mut warnings, "DATALOOM_RETRY_BUDGET", &mut config.retry_budget);
        parse_into(&lookup, &mut warnings, "DATALOOM_TOP_N", &mut config.top_n);
        parse_secs(&lookup, &mut warnings, "DATALOOM_LLM_TIMEOUT_SECS", &mut config.llm_timeout_secs);
        parse_secs(&lookup, &mut warnings, "DATALOOM_EXEC_TIMEOUT_SECS", &mut config.execution_timeout_secs);

        if let Some(python) = lookup("DATALOOM_PYTHON") {
            config.python_bin = python;
        }

        config.otlp_endpoint = lookup("DATALOOM_OTLP_ENDPOINT").filter(|e| !e.is_empty());
        parse_into(&lookup, &mut warnings, "DATALOOM_LOG_JSON", &mut config.log_json);

        // A zero-width pool would never drain the queue
        config.max_workers = config.max_workers.max(1);

        (config, warnings)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

fn parse_into<F, T>(lookup: &F, warnings: &mut Vec<ConfigWarning>, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warnings.push(ConfigWarning {
                key: key.to_string(),
                value: raw,
                reason: "unparseable value",
            }),
        }
    }
}

/// Timeouts must be positive; zero would fail every call at once
fn parse_secs<F>(lookup: &F, warnings: &mut Vec<ConfigWarning>, key: &str, target: &mut u64)
where
    F: Fn(&str) -> Option<String>,
{
    let mut secs = *target;
    parse_into(lookup, warnings, key, &mut secs);
    if secs == 0 {
        warnings.push(ConfigWarning {
            key: key.to_string(),
            value: "0".to_string(),
            reason: "timeout must be greater than zero",
        });
    } else {
        *target = secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AnalystConfig::default();
        assert_eq!(config.max_workers, 20);
        assert_eq!(config.retry_budget, 5);
        assert_eq!(config.top_n, 5);
        assert_eq!(config.generation.max_tokens, 512);
        assert_eq!(config.generation.temperature, 0.0);
        assert_eq!(config.generation.top_p, 1.0);
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn test_openai_provider_from_lookup() {
        let (config, warnings) = AnalystConfig::from_lookup(lookup_from(&[
            ("DATALOOM_PROVIDER", "OpenAI"),
            ("OPENAI_API_KEY", "sk-test"),
            ("MODEL", "gpt-4o-mini"),
        ]));
        assert_eq!(config.provider, Provider::OpenAi);
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model, "gpt-4o-mini");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_numeric_overrides_and_bad_values() {
        let (config, warnings) = AnalystConfig::from_lookup(lookup_from(&[
            ("DATALOOM_MAX_WORKERS", "0"),
            ("DATALOOM_RETRY_BUDGET", "3"),
            ("DATALOOM_TOP_N", "many"),
            ("DATALOOM_PROVIDER", "bedrock"),
        ]));
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.top_n, 5);
        assert_eq!(config.provider, Provider::Ollama);

        let keys: Vec<&str> = warnings.iter().map(|w| w.key.as_str()).collect();
        assert_eq!(keys, vec!["DATALOOM_PROVIDER", "DATALOOM_TOP_N"]);
        assert_eq!(warnings[1].value, "many");
    }

    #[test]
    fn test_zero_timeouts_keep_defaults() {
        let (config, warnings) = AnalystConfig::from_lookup(lookup_from(&[
            ("DATALOOM_LLM_TIMEOUT_SECS", "0"),
            ("DATALOOM_EXEC_TIMEOUT_SECS", " 0 "),
        ]));
        assert_eq!(config.llm_timeout(), Duration::from_secs(120));
        assert_eq!(config.execution_timeout(), Duration::from_secs(30));
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.reason == "timeout must be greater than zero"));

        let (config, warnings) =
            AnalystConfig::from_lookup(lookup_from(&[("DATALOOM_LLM_TIMEOUT_SECS", "7")]));
        assert_eq!(config.llm_timeout_secs, 7);
        assert!(warnings.is_empty());
    }
}
