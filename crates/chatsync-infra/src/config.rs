//! Configuration loader for chatsync.
//!
//! Reads `chatsync.toml` from a config directory. Engine limits live at the
//! top level of the file; tracing settings live under `[observe]`:
//!
//! ```toml
//! max_message_length = 4000
//! allowed_file_types = ["image/png"]
//!
//! [observe]
//! log_filter = "chatsync=debug"
//! json = true
//! ```
//!
//! Falls back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chatsync_types::config::{EngineConfig, ObserveConfig};
use serde::Deserialize;

/// Name of the config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "chatsync.toml";

#[derive(Debug, Default, Deserialize)]
struct ObserveSection {
    #[serde(default)]
    observe: ObserveConfig,
}

fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

/// Contents of the config file; `None` when it does not exist.
async fn read_config_file(path: &Path) -> anyhow::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Read and parse the config file as `T`; `None` when it does not exist.
async fn parse_config_file<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> anyhow::Result<Option<T>> {
    let Some(content) = read_config_file(path).await? else {
        return Ok(None);
    };
    let parsed = toml::from_str::<T>(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(parsed))
}

/// Load engine limits from `{dir}/chatsync.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or malformed file: logs a warning and returns the default.
/// - Otherwise the parsed config, passed through [`EngineConfig::sanitized`].
pub async fn load_engine_config(dir: &Path) -> EngineConfig {
    let path = config_path(dir);
    match parse_config_file::<EngineConfig>(&path).await {
        Ok(Some(config)) => config.sanitized(),
        Ok(None) => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            EngineConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err:#}, using default engine config");
            EngineConfig::default()
        }
    }
}

/// Load tracing settings from the `[observe]` table of `{dir}/chatsync.toml`.
pub async fn load_observe_config(dir: &Path) -> ObserveConfig {
    let path = config_path(dir);
    match parse_config_file::<ObserveSection>(&path).await {
        Ok(Some(section)) => section.observe,
        Ok(None) => ObserveConfig::default(),
        Err(err) => {
            tracing::warn!("{err:#}, using default observe config");
            ObserveConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
        assert_eq!(load_observe_config(tmp.path()).await, ObserveConfig::default());
    }

    #[tokio::test]
    async fn test_valid_file_is_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"
max_message_length = 4000
allowed_file_types = ["Image/PNG"]
visitor_name = "Guest"

[observe]
log_filter = "chatsync=debug"
json = true
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_message_length, 4000);
        assert_eq!(config.allowed_file_types, vec!["image/png".to_string()]);
        assert_eq!(config.visitor_name, "Guest");
        assert_eq!(config.default_page_size, 100);

        let observe = load_observe_config(tmp.path()).await;
        assert_eq!(observe.log_filter, "chatsync=debug");
        assert!(observe.json);
        assert!(!observe.otel);
    }

    #[tokio::test]
    async fn test_malformed_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE_NAME), "this is not { valid toml !!!")
            .await
            .unwrap();

        assert_eq!(load_engine_config(tmp.path()).await, EngineConfig::default());
        assert_eq!(load_observe_config(tmp.path()).await, ObserveConfig::default());
    }

    #[tokio::test]
    async fn test_zero_limits_are_sanitized() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "default_page_size = 0\nmax_file_size_bytes = 0\n",
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_page_size, 100);
        assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
    }
}
