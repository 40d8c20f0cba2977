//! Runtime configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (RUNSTREAM_APPROVAL_TIMEOUT_MS,
//!    RUNSTREAM_RETENTION_SECONDS, RUNSTREAM_PIPELINE_NAME)
//! 2. Config file (.runstream/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .runstream/config.yaml
//! - Falls back to ~/.runstream/config.yaml

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<RuntimeConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".runstream";
const CONFIG_FILE: &str = "config.yaml";

pub const ENV_APPROVAL_TIMEOUT_MS: &str = "RUNSTREAM_APPROVAL_TIMEOUT_MS";
pub const ENV_RETENTION_SECONDS: &str = "RUNSTREAM_RETENTION_SECONDS";
pub const ENV_PIPELINE_NAME: &str = "RUNSTREAM_PIPELINE_NAME";

/// Raw config file schema (matches YAML structure); every key optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub pipeline_name: Option<String>,
    pub approval_timeout_ms: Option<u64>,
    pub plan_delay_ms: Option<u64>,
    pub execute_delay_ms: Option<u64>,
    pub progress_delay_ms: Option<u64>,
    pub retention_seconds: Option<u64>,
    pub reaper_interval_seconds: Option<u64>,
}

impl ConfigFile {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config YAML")
    }
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeConfig {
    /// Name reported in `run.started`
    pub pipeline_name: String,

    /// How long the approval step waits for a response
    pub approval_timeout_ms: u64,

    /// Simulated plan latency
    pub plan_delay_ms: u64,

    /// Simulated execute latency after the last progress report
    pub execute_delay_ms: u64,

    /// Simulated delay between progress reports
    pub progress_delay_ms: u64,

    /// Finished runs older than this are reaped
    pub retention_seconds: u64,

    /// Reaper period (0 disables the reaper)
    pub reaper_interval_seconds: u64,

    /// Path to config file (if found)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pipeline_name: "Approval Pipeline".to_string(),
            approval_timeout_ms: 60_000,
            plan_delay_ms: 500,
            execute_delay_ms: 500,
            progress_delay_ms: 300,
            retention_seconds: 3600,
            reaper_interval_seconds: 60,
            config_file: None,
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    ConfigFile::from_yaml(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn env_u64<F>(env: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid value for {}: {}", key, value))
        })
        .transpose()
}

/// Merge a config file and environment lookups over the defaults
pub fn resolve<F>(file: Option<ConfigFile>, env: F) -> Result<RuntimeConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = RuntimeConfig::default();
    let file = file.unwrap_or_default();

    let pipeline_name = env(ENV_PIPELINE_NAME)
        .or(file.pipeline_name)
        .unwrap_or(defaults.pipeline_name);

    let approval_timeout_ms = env_u64(&env, ENV_APPROVAL_TIMEOUT_MS)?
        .or(file.approval_timeout_ms)
        .unwrap_or(defaults.approval_timeout_ms);

    let retention_seconds = env_u64(&env, ENV_RETENTION_SECONDS)?
        .or(file.retention_seconds)
        .unwrap_or(defaults.retention_seconds);

    if approval_timeout_ms == 0 {
        anyhow::bail!("approval_timeout_ms must be greater than zero");
    }

    Ok(RuntimeConfig {
        pipeline_name,
        approval_timeout_ms,
        plan_delay_ms: file.plan_delay_ms.unwrap_or(defaults.plan_delay_ms),
        execute_delay_ms: file.execute_delay_ms.unwrap_or(defaults.execute_delay_ms),
        progress_delay_ms: file.progress_delay_ms.unwrap_or(defaults.progress_delay_ms),
        retention_seconds,
        reaper_interval_seconds: file
            .reaper_interval_seconds
            .unwrap_or(defaults.reaper_interval_seconds),
        config_file: None,
    })
}

/// Load configuration from all sources
pub fn load() -> Result<RuntimeConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    let config_file = find_config_file(&cwd).or_else(|| {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
            .filter(|path| path.exists())
    });

    let file = config_file.as_deref().map(load_config_file).transpose()?;

    let mut config = resolve(file, |key| std::env::var(key).ok())?;
    config.config_file = config_file;
    Ok(config)
}

/// Get the cached configuration, loading it on first use
pub fn get() -> Result<&'static RuntimeConfig> {
    CONFIG
        .get_or_init(|| load().map_err(|e| format!("{:#}", e)))
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = resolve(None, no_env).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.approval_timeout_ms, 60_000);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = ConfigFile::from_yaml(
            r#"
pipeline_name: Nightly
approval_timeout_ms: 5000
plan_delay_ms: 0
reaper_interval_seconds: 0
"#,
        )
        .unwrap();

        let config = resolve(Some(file), no_env).unwrap();
        assert_eq!(config.pipeline_name, "Nightly");
        assert_eq!(config.approval_timeout_ms, 5000);
        assert_eq!(config.plan_delay_ms, 0);
        assert_eq!(config.reaper_interval_seconds, 0);
        assert_eq!(config.execute_delay_ms, 500);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            approval_timeout_ms: Some(5000),
            retention_seconds: Some(10),
            ..Default::default()
        };
        let env: HashMap<&str, &str> = [
            (ENV_APPROVAL_TIMEOUT_MS, "250"),
            (ENV_PIPELINE_NAME, "From Env"),
        ]
        .into_iter()
        .collect();

        let config = resolve(Some(file), |key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.approval_timeout_ms, 250);
        assert_eq!(config.pipeline_name, "From Env");
        assert_eq!(config.retention_seconds, 10);
    }

    #[test]
    fn test_invalid_env_value() {
        let result = resolve(None, |key| {
            (key == ENV_RETENTION_SECONDS).then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let file = ConfigFile {
            approval_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(resolve(Some(file), no_env).is_err());
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join(CONFIG_FILE), "approval_timeout_ms: 1000\n").unwrap();

        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, config_dir.join(CONFIG_FILE));

        let file = load_config_file(&found).unwrap();
        assert_eq!(file.approval_timeout_ms, Some(1000));
    }
}
