//! Runtime configuration for the campaign orchestrator.
//!
//! Resolution order: built-in defaults, an optional `leadforge.toml` file
//! (first candidate found wins; see [`Config::find_config_file`]), then
//! environment variable overrides. Construction fails closed — an
//! unreadable or malformed config file is an error, not a silently ignored
//! default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File-level overrides, deserialized from `leadforge.toml` / `.yaml`.
///
/// Every field is optional; absent fields keep the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub db_path: Option<PathBuf>,
    pub bind_addr: Option<String>,
    pub default_batch_size: Option<u32>,
    pub default_http_concurrency: Option<u32>,
    pub default_http_max_retries: Option<u32>,
    pub snapshot_event_interval: Option<u64>,
    pub snapshot_time_interval_secs: Option<u64>,
    pub cache_ttl_secs: Option<u64>,
    pub sse_buffer_size: Option<usize>,
    pub sse_heartbeat_secs: Option<u64>,
    pub log_dir: Option<PathBuf>,
}

/// Fully resolved runtime configuration.
///
/// Threaded explicitly through constructors (the `Env` pattern) rather than
/// read from globals — tests construct their own `Config` with an
/// in-memory database path and inject it directly.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub default_batch_size: u32,
    pub default_http_concurrency: u32,
    pub default_http_max_retries: u32,
    pub snapshot_event_interval: u64,
    pub snapshot_time_interval_secs: u64,
    pub cache_ttl_secs: u64,
    pub sse_buffer_size: usize,
    pub sse_heartbeat_secs: u64,
    pub log_dir: PathBuf,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("leadforge.sqlite3"),
            bind_addr: "127.0.0.1:4180".to_string(),
            default_batch_size: 32,
            default_http_concurrency: 8,
            default_http_max_retries: 3,
            snapshot_event_interval: 500,
            snapshot_time_interval_secs: 60,
            cache_ttl_secs: 600,
            sse_buffer_size: 256,
            sse_heartbeat_secs: 15,
            log_dir: PathBuf::from("logs"),
            verbose: false,
        }
    }
}

impl Config {
    /// Build the runtime config: defaults, overridden by an optional config
    /// file, overridden by environment variables.
    pub fn load(project_dir: &Path, verbose: bool) -> Result<Self> {
        let mut cfg = Config {
            verbose,
            ..Config::default()
        };

        if let Some(path) = Self::find_config_file(project_dir) {
            let file = Self::read_config_file(&path)
                .with_context(|| format!("failed to read config file at {}", path.display()))?;
            cfg.apply_file(file);
        }

        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = file.default_batch_size {
            self.default_batch_size = v;
        }
        if let Some(v) = file.default_http_concurrency {
            self.default_http_concurrency = v;
        }
        if let Some(v) = file.default_http_max_retries {
            self.default_http_max_retries = v;
        }
        if let Some(v) = file.snapshot_event_interval {
            self.snapshot_event_interval = v;
        }
        if let Some(v) = file.snapshot_time_interval_secs {
            self.snapshot_time_interval_secs = v;
        }
        if let Some(v) = file.cache_ttl_secs {
            self.cache_ttl_secs = v;
        }
        if let Some(v) = file.sse_buffer_size {
            self.sse_buffer_size = v;
        }
        if let Some(v) = file.sse_heartbeat_secs {
            self.sse_heartbeat_secs = v;
        }
        if let Some(v) = file.log_dir {
            self.log_dir = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("LEADFORGE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LEADFORGE_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("LEADFORGE_HTTP_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.default_http_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("LEADFORGE_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.default_batch_size = n;
            }
        }
    }

    /// Find `leadforge.toml` then `leadforge.yaml` in `project_dir`; first hit wins.
    fn find_config_file(project_dir: &Path) -> Option<PathBuf> {
        for name in ["leadforge.toml", "leadforge.yaml"] {
            let candidate = project_dir.join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    fn read_config_file(path: &Path) -> Result<ConfigFile> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            toml::from_str(&contents).context("failed to parse config file as TOML")
        } else {
            serde_yaml::from_str(&contents).context("failed to parse config file as YAML")
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("failed to create log directory")?;
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("failed to create database parent directory")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply_when_no_config_file_present() {
        let dir = tempdir().unwrap();
        let cfg = Config::load(dir.path(), false).unwrap();
        assert_eq!(cfg.default_batch_size, 32);
        assert_eq!(cfg.sse_heartbeat_secs, 15);
    }

    #[test]
    fn toml_config_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("leadforge.toml"),
            "default_batch_size = 64\nbind_addr = \"0.0.0.0:9000\"\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path(), false).unwrap();
        assert_eq!(cfg.default_batch_size, 64);
        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        // unrelated fields keep their default
        assert_eq!(cfg.sse_heartbeat_secs, 15);
    }

    #[test]
    fn env_var_overrides_file_and_default() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("leadforge.toml"),
            "default_http_concurrency = 4\n",
        )
        .unwrap();
        // SAFETY: test is single-threaded with respect to this env var.
        unsafe {
            std::env::set_var("LEADFORGE_HTTP_CONCURRENCY", "16");
        }
        let cfg = Config::load(dir.path(), false).unwrap();
        assert_eq!(cfg.default_http_concurrency, 16);
        unsafe {
            std::env::remove_var("LEADFORGE_HTTP_CONCURRENCY");
        }
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("leadforge.toml"), "not = [valid toml").unwrap();
        let result = Config::load(dir.path(), false);
        assert!(result.is_err());
    }

    #[test]
    fn ensure_directories_creates_log_dir() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::load(dir.path(), false).unwrap();
        cfg.log_dir = dir.path().join("nested/logs");
        cfg.ensure_directories().unwrap();
        assert!(cfg.log_dir.exists());
    }
}
