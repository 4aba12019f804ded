//! Configuration types for objectloader

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};

/// Batch coalescing and request concurrency settings
///
/// Used as a nested sub-config within [`LoaderConfig`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchConfig {
    /// How long requested ids accumulate before a batch is sent (default: 200ms)
    ///
    /// The window opens with the first id of a batch and is not extended by
    /// later ids, so a steady trickle of `add` calls still flushes on time.
    #[serde(default = "default_max_batch_wait", with = "duration_serde")]
    pub max_batch_wait: Duration,

    /// Upper bound on ids per batch request (default: 10000)
    ///
    /// A batch that reaches this size is sent without waiting for the window.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Maximum batch requests in flight at once (default: 4)
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Graphs at or below this many objects use a single batch sized to the graph (default: 50)
    #[serde(default = "default_small_graph_threshold")]
    pub small_graph_threshold: usize,

    /// Upper bound on how long disposal waits for background work (default: 1s)
    #[serde(default = "default_dispose_timeout", with = "duration_serde")]
    pub dispose_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_wait: default_max_batch_wait(),
            max_batch_size: default_max_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            small_graph_threshold: default_small_graph_threshold(),
            dispose_timeout: default_dispose_timeout(),
        }
    }
}

impl BatchConfig {
    /// Batch size cap for a graph of `total_expected` objects
    pub fn batch_size_for(&self, total_expected: usize) -> usize {
        if total_expected <= self.small_graph_threshold {
            total_expected.max(1)
        } else {
            self.max_batch_size
        }
    }
}

/// Shared-memory channel settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Usable ring capacity in bytes (default: 16 KiB)
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: usize,

    /// How long a channel send waits for free space (default: 5s)
    #[serde(default = "default_send_timeout", with = "duration_serde")]
    pub send_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_capacity_bytes(),
            send_timeout: default_send_timeout(),
        }
    }
}

/// Main configuration for a loader context
///
/// One config describes one (server, project, root object) triple. The
/// `headers` map is passed through to every request unmodified, which is how
/// callers attach telemetry or proxy headers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Base URL of the object store server (e.g. "https://app.example.com")
    pub server_url: String,

    /// Project (stream) the objects belong to
    pub project_id: String,

    /// Root object of the graph being loaded
    pub object_id: String,

    /// Bearer token for the `Authorization` header
    #[serde(default)]
    pub token: Option<String>,

    /// Extra request headers, passed through unmodified
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Batching behavior
    #[serde(default)]
    pub batch: BatchConfig,

    /// Shared-memory channel behavior
    #[serde(default)]
    pub channel: ChannelConfig,
}

impl LoaderConfig {
    /// Create a config with default batching and channel settings
    pub fn new(
        server_url: impl Into<String>,
        project_id: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            project_id: project_id.into(),
            object_id: object_id.into(),
            token: None,
            headers: HashMap::new(),
            batch: BatchConfig::default(),
            channel: ChannelConfig::default(),
        }
    }

    /// Set the bearer token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Add a pass-through request header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Check the config for values that can never work
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.server_url)
            .map_err(|e| Error::config(format!("invalid server url: {e}"), "server_url"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::config(
                format!("unsupported url scheme '{}'", parsed.scheme()),
                "server_url",
            ));
        }
        if self.project_id.trim().is_empty() {
            return Err(Error::config("project id must not be empty", "project_id"));
        }
        if self.object_id.trim().is_empty() {
            return Err(Error::config("object id must not be empty", "object_id"));
        }
        if self.batch.max_batch_size == 0 {
            return Err(Error::config(
                "max batch size must be at least 1",
                "batch.max_batch_size",
            ));
        }
        if self.batch.max_concurrent_batches == 0 {
            return Err(Error::config(
                "at least one concurrent batch is required",
                "batch.max_concurrent_batches",
            ));
        }
        if self.channel.capacity_bytes == 0 || self.channel.capacity_bytes >= u32::MAX as usize {
            return Err(Error::config(
                "channel capacity must be between 1 and u32::MAX - 1 bytes",
                "channel.capacity_bytes",
            ));
        }
        Ok(())
    }

    /// Server URL without a trailing slash
    pub(crate) fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// Endpoint that accepts batch requests
    pub fn batch_url(&self) -> String {
        format!("{}/api/getobjects/{}", self.base_url(), self.project_id)
    }

    /// Endpoint that serves one object as bare JSON
    pub fn single_url(&self, object_id: &str) -> String {
        format!(
            "{}/objects/{}/{}/single",
            self.base_url(),
            self.project_id,
            object_id
        )
    }
}

fn default_max_batch_wait() -> Duration {
    Duration::from_millis(200)
}

fn default_max_batch_size() -> usize {
    10_000
}

fn default_max_concurrent_batches() -> usize {
    4
}

fn default_small_graph_threshold() -> usize {
    50
}

fn default_dispose_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_capacity_bytes() -> usize {
    16 * 1024
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(5)
}

// Durations are expressed in milliseconds in serialized configs
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
