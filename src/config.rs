use crate::core::{Result, SyncError};
use crate::realtime::ReconnectPolicy;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sync layer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the REST API, e.g. "https://crm.example.com/api"
    pub base_url: String,

    /// Timeout of a single remote request
    pub request_timeout: Duration,

    /// Change feed reconnection budget and base delay
    pub reconnect: ReconnectPolicy,

    /// Lifetime of a cached read
    pub cache_ttl: Duration,

    /// Maximum number of cached reads
    pub cache_max_entries: usize,

    /// File mirroring the response cache; memory only when unset
    pub cache_path: Option<PathBuf>,

    /// Size of the "recent" projection in statistics
    pub recent_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            request_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            cache_ttl: Duration::from_secs(5 * 60),
            cache_max_entries: 100,
            cache_path: None,
            recent_limit: 5,
        }
    }
}

/// On-disk shape: every key optional, durations in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    base_url: Option<String>,
    request_timeout_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    reconnect_base_delay_ms: Option<u64>,
    cache_ttl_ms: Option<u64>,
    cache_max_entries: Option<usize>,
    cache_path: Option<PathBuf>,
    recent_limit: Option<usize>,
}

impl SyncConfig {
    /// Create a configuration for the API at `base_url`
    pub fn new(base_url: &str) -> Self {
        Self::default().base_url(base_url)
    }

    /// Set the API base URL
    pub fn base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Set the request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set how many reconnection attempts follow a feed failure
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }

    /// Set the delay before the first reconnection attempt
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect.base_delay = delay;
        self
    }

    /// Set the cache TTL
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the maximum number of cached reads
    pub fn cache_max_entries(mut self, max: usize) -> Self {
        self.cache_max_entries = max;
        self
    }

    /// Mirror the response cache into a JSON file
    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Set the size of the recent projection
    pub fn recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    /// Cache capacity as the cache expects it. Call after `validate`.
    pub fn cache_capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.cache_max_entries)
            .ok_or_else(|| SyncError::Config("cache_max_entries must be > 0".to_string()))
    }

    /// Parse from JSON; missing keys keep their defaults
    ///
    /// ```ignore
    /// let config = SyncConfig::from_json_str(r#"{ "base_url": "http://api", "cache_ttl_ms": 1000 }"#)?;
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)
            .map_err(|e| SyncError::Config(format!("invalid configuration: {}", e)))?;

        let mut config = Self::default();
        if let Some(url) = raw.base_url {
            config = config.base_url(&url);
        }
        if let Some(ms) = raw.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = raw.max_reconnect_attempts {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(ms) = raw.reconnect_base_delay_ms {
            config.reconnect.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.cache_ttl_ms {
            config.cache_ttl = Duration::from_millis(ms);
        }
        if let Some(max) = raw.cache_max_entries {
            config.cache_max_entries = max;
        }
        config.cache_path = raw.cache_path.or(config.cache_path);
        if let Some(limit) = raw.recent_limit {
            config.recent_limit = limit;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(SyncError::Config("base_url cannot be empty".to_string()));
        }

        if self.request_timeout.is_zero() {
            return Err(SyncError::Config("request_timeout must be > 0".to_string()));
        }

        if self.reconnect.max_attempts == 0 {
            return Err(SyncError::Config(
                "max_reconnect_attempts must be > 0".to_string(),
            ));
        }

        if self.reconnect.base_delay.is_zero() {
            return Err(SyncError::Config(
                "reconnect_base_delay must be > 0".to_string(),
            ));
        }

        if self.cache_max_entries == 0 {
            return Err(SyncError::Config("cache_max_entries must be > 0".to_string()));
        }

        if self.recent_limit == 0 {
            return Err(SyncError::Config("recent_limit must be > 0".to_string()));
        }

        Ok(())
    }
}
