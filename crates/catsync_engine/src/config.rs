//! Configuration for the reconciliation engine.

use crate::error::{SyncError, SyncResult};
use catsync_protocol::ProductOption;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default window inside which a Target-originated stamp counts as an echo.
pub const DEFAULT_ECHO_THRESHOLD: Duration = Duration::from_secs(10);

/// Environment variable names read by [`MirrorConfig::from_env`].
pub mod env {
    /// Base URL of the Source store.
    pub const SOURCE_URL: &str = "CATSYNC_SOURCE_URL";
    /// Source collection holding the records.
    pub const SOURCE_COLLECTION: &str = "CATSYNC_SOURCE_COLLECTION";
    /// Static token for the Source store.
    pub const SOURCE_TOKEN: &str = "CATSYNC_SOURCE_TOKEN";
    /// Base URL of the Target store.
    pub const TARGET_URL: &str = "CATSYNC_TARGET_URL";
    /// API key for the Target store.
    pub const TARGET_API_KEY: &str = "CATSYNC_TARGET_API_KEY";
    /// Echo threshold in milliseconds.
    pub const ECHO_THRESHOLD_MS: &str = "CATSYNC_ECHO_THRESHOLD_MS";
    /// Maximum attempts per remote call.
    pub const RETRY_ATTEMPTS: &str = "CATSYNC_RETRY_ATTEMPTS";
    /// Delay before the first retry, in milliseconds.
    pub const RETRY_DELAY_MS: &str = "CATSYNC_RETRY_DELAY_MS";
    /// Upper bound on the delay between retries, in milliseconds.
    pub const RETRY_MAX_DELAY_MS: &str = "CATSYNC_RETRY_MAX_DELAY_MS";
}

fn parse_var<T>(key: &str, raw: &str) -> SyncResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| SyncError::Config(format!("{key}={raw:?}: {e}")))
}

/// Configuration for mirroring.
#[derive(Clone)]
pub struct MirrorConfig {
    /// Source store base URL.
    pub source_url: String,
    /// Source collection (also the event resource name).
    pub source_collection: String,
    /// Static bearer token for the Source store.
    pub source_token: Option<String>,
    /// Target store base URL.
    pub target_url: String,
    /// API key for the Target store.
    pub target_api_key: Option<String>,
    /// Echo detection window.
    pub echo_threshold: Duration,
    /// Options attached to newly created Target products.
    pub default_options: Vec<ProductOption>,
    /// Retry configuration for store calls.
    pub retry: RetryConfig,
}

impl MirrorConfig {
    /// Creates a configuration for the given endpoints.
    pub fn new(source_url: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            source_collection: "products".into(),
            source_token: None,
            target_url: target_url.into(),
            target_api_key: None,
            echo_threshold: DEFAULT_ECHO_THRESHOLD,
            default_options: ProductOption::default_set(),
            retry: RetryConfig::default(),
        }
    }

    /// Reads configuration from the process environment.
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through a lookup function.
    ///
    /// Unset or empty variables fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get(env::SOURCE_URL) {
            config.source_url = url;
        }
        if let Some(collection) = get(env::SOURCE_COLLECTION) {
            config.source_collection = collection;
        }
        config.source_token = get(env::SOURCE_TOKEN);
        if let Some(url) = get(env::TARGET_URL) {
            config.target_url = url;
        }
        config.target_api_key = get(env::TARGET_API_KEY);

        if let Some(raw) = get(env::ECHO_THRESHOLD_MS) {
            config.echo_threshold = Duration::from_millis(parse_var(env::ECHO_THRESHOLD_MS, &raw)?);
        }
        if let Some(raw) = get(env::RETRY_DELAY_MS) {
            config.retry.initial_delay = Duration::from_millis(parse_var(env::RETRY_DELAY_MS, &raw)?);
        }
        if let Some(raw) = get(env::RETRY_MAX_DELAY_MS) {
            config.retry.max_delay = Duration::from_millis(parse_var(env::RETRY_MAX_DELAY_MS, &raw)?);
        }
        if let Some(raw) = get(env::RETRY_ATTEMPTS) {
            let attempts: u32 = parse_var(env::RETRY_ATTEMPTS, &raw)?;
            if attempts == 0 {
                return Err(SyncError::Config(format!(
                    "{} must be at least 1",
                    env::RETRY_ATTEMPTS
                )));
            }
            config.retry.max_attempts = attempts;
        }

        Ok(config)
    }

    /// Sets the source collection.
    pub fn with_source_collection(mut self, collection: impl Into<String>) -> Self {
        self.source_collection = collection.into();
        self
    }

    /// Sets the Source bearer token.
    pub fn with_source_token(mut self, token: impl Into<String>) -> Self {
        self.source_token = Some(token.into());
        self
    }

    /// Sets the Target API key.
    pub fn with_target_api_key(mut self, key: impl Into<String>) -> Self {
        self.target_api_key = Some(key.into());
        self
    }

    /// Sets the echo threshold.
    pub fn with_echo_threshold(mut self, threshold: Duration) -> Self {
        self.echo_threshold = threshold;
        self
    }

    /// Sets the default option set.
    pub fn with_default_options(mut self, options: Vec<ProductOption>) -> Self {
        self.default_options = options;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self::new("http://localhost:8055", "http://localhost:9000")
    }
}

fn redact(secret: &Option<String>) -> &'static str {
    if secret.is_some() {
        "Some(<redacted>)"
    } else {
        "None"
    }
}

impl fmt::Debug for MirrorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorConfig")
            .field("source_url", &self.source_url)
            .field("source_collection", &self.source_collection)
            .field("source_token", &format_args!("{}", redact(&self.source_token)))
            .field("target_url", &self.target_url)
            .field(
                "target_api_key",
                &format_args!("{}", redact(&self.target_api_key)),
            )
            .field("echo_threshold", &self.echo_threshold)
            .field("default_options", &self.default_options)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
