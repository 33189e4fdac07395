//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILSEARCH_CONFIG` (environment variable)
//! 2. `~/.config/mailsearch/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailsearch\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Query routing and evaluation.
    pub search: SearchConfig,
    /// SQLite backing store.
    pub store: StoreConfig,
    /// Performance tuning.
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for indexes and logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Query routing and evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Expression used when the caller passes an empty one.
    pub default_expression: String,
    /// Declare folder summaries memory-only (never route to SQL).
    pub memory_only: bool,
    /// Build a body word index when loading a folder.
    pub build_word_index: bool,
}

/// SQLite backing store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. No database means every query runs in memory.
    pub database: Option<PathBuf>,
    /// Table name override (defaults to the mbox file stem).
    pub table: Option<String>,
}

/// Performance tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Number of decoded messages kept in the LRU cache.
    pub lru_cache_size: usize,
    /// Maximum message size in bytes (default: 268435456 = 256 MB).
    pub max_message_size: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_expression: crate::search::router::MATCH_EVERYTHING.to_string(),
            memory_only: false,
            build_word_index: true,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            lru_cache_size: 50,
            max_message_size: 256 * 1024 * 1024, // 256 MB
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    let Some(path) = config_file_path() else {
        return Config::default();
    };
    if !path.exists() {
        return Config::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded config");
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILSEARCH_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailsearch").join("config.toml"))
}

/// Return the cache directory for folder indexes and logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailsearch")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mailsearch.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.search.default_expression, "(match-all)");
        assert!(!cfg.search.memory_only);
        assert!(cfg.store.database.is_none());
        assert_eq!(cfg.performance.lru_cache_size, 50);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[search]
memory_only = true

[store]
database = "/tmp/folders.db"
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert!(cfg.search.memory_only);
        assert_eq!(cfg.store.database, Some(PathBuf::from("/tmp/folders.db")));
        assert!(cfg.search.build_word_index);
        assert_eq!(cfg.performance.max_message_size, 256 * 1024 * 1024);
    }

    #[test]
    fn test_save_config_round_trips() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        std::env::set_var("MAILSEARCH_CONFIG", &path);

        let mut cfg = Config::default();
        cfg.search.memory_only = true;
        cfg.store.table = Some("inbox".to_string());
        save_config(&cfg).expect("save");
        assert!(path.is_file());

        let loaded = load_config();
        std::env::remove_var("MAILSEARCH_CONFIG");
        assert!(loaded.search.memory_only);
        assert_eq!(loaded.store.table.as_deref(), Some("inbox"));
    }

    #[test]
    fn test_log_file_inside_cache_dir() {
        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(PathBuf::from("/var/cache/ms"));
        assert_eq!(
            log_file_path(&cfg),
            PathBuf::from("/var/cache/ms/mailsearch.log")
        );
    }
}
