//! Engine and observability configuration.
//!
//! `EngineConfig` is read from `chatsync.toml`. Every field has a default so
//! an empty or partial file is valid.

use serde::{Deserialize, Serialize};

/// Limits and defaults applied by the message stream and trackers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Page size used by callers that do not pick their own.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Longest text (in characters) accepted by `send`, `reply` and `edit`.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,

    /// MIME types accepted by `send_file`. Empty accepts everything.
    #[serde(default)]
    pub allowed_file_types: Vec<String>,

    #[serde(default = "default_max_rating_note_length")]
    pub max_rating_note_length: usize,

    /// Sender name put on optimistic visitor messages.
    #[serde(default)]
    pub visitor_name: String,
}

fn default_page_size() -> usize {
    100
}

fn default_max_message_length() -> usize {
    32_000
}

fn default_max_file_size_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_rating_note_length() -> usize {
    2_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_message_length: default_max_message_length(),
            max_file_size_bytes: default_max_file_size_bytes(),
            allowed_file_types: Vec::new(),
            max_rating_note_length: default_max_rating_note_length(),
            visitor_name: String::new(),
        }
    }
}

impl EngineConfig {
    /// Clamp limits that would make every operation fail.
    pub fn sanitized(mut self) -> Self {
        if self.default_page_size == 0 {
            self.default_page_size = default_page_size();
        }
        if self.max_message_length == 0 {
            self.max_message_length = default_max_message_length();
        }
        if self.max_file_size_bytes == 0 {
            self.max_file_size_bytes = default_max_file_size_bytes();
        }
        self.allowed_file_types = self
            .allowed_file_types
            .into_iter()
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    /// Whether `content_type` passes the allow-list.
    pub fn allows_file_type(&self, content_type: &str) -> bool {
        self.allowed_file_types.is_empty()
            || self
                .allowed_file_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(content_type))
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserveConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

fn default_log_filter() -> String {
    "chatsync=info".to_string()
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            json: false,
            otel: false,
        }
    }
}
