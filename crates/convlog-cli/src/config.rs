//! `convlog.toml` loading and overrides.
//!
//! Precedence, lowest first: built-in defaults, the config file, `CONVLOG_*`
//! environment variables (a `.env` file is read into the environment at
//! start), command-line flags.

use anyhow::Context;
use convlog_tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`PathsConfig::log_dir`].
pub const ENV_LOG_DIR: &str = "CONVLOG_LOG_DIR";
/// Environment variable overriding [`PathsConfig::transcript_dir`].
pub const ENV_TRANSCRIPT_DIR: &str = "CONVLOG_TRANSCRIPT_DIR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where run-trace files go.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Where transcripts go.
    #[serde(default = "default_transcript_dir")]
    pub transcript_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            transcript_dir: default_transcript_dir(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_transcript_dir() -> PathBuf {
    PathBuf::from("./transcripts")
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    let config: AppConfig = toml::from_str(text)?;
    config.tracker.validate()?;
    Ok(config)
}

/// Read `path`. A missing file yields the defaults unless `required`.
pub fn load_config(path: &Path, required: bool) -> anyhow::Result<AppConfig> {
    if !path.exists() && !required {
        return Ok(AppConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config(&text).with_context(|| format!("Invalid config file '{}'", path.display()))
}

impl AppConfig {
    /// Apply `CONVLOG_*` overrides, looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = var(ENV_LOG_DIR).filter(|v| !v.is_empty()) {
            self.paths.log_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var(ENV_TRANSCRIPT_DIR).filter(|v| !v.is_empty()) {
            self.paths.transcript_dir = PathBuf::from(dir);
        }
    }

    /// Apply command-line overrides.
    pub fn apply_flags(&mut self, log_dir: Option<PathBuf>, transcript_dir: Option<PathBuf>) {
        if let Some(dir) = log_dir {
            self.paths.log_dir = dir;
        }
        if let Some(dir) = transcript_dir {
            self.paths.transcript_dir = dir;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use convlog_tracker::FlushPolicy;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.paths.log_dir, PathBuf::from("./logs"));
        assert_eq!(config.tracker.tick_interval_ms, 1000);
    }

    #[test]
    fn test_full_file() {
        let config = parse_config(
            r#"
            [paths]
            log_dir = "/var/log/convlog"
            transcript_dir = "/srv/transcripts"

            [tracker]
            tick_interval_ms = 500
            acquire_retry_ms = 2000

            [tracker.flush]
            mode = "every_n_ticks"
            ticks = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.paths.transcript_dir, PathBuf::from("/srv/transcripts"));
        assert_eq!(config.tracker.acquire_retry_ms, 2000);
        assert_eq!(config.tracker.flush, FlushPolicy::EveryNTicks { ticks: 10 });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(parse_config("[tracker]\ntick_interval_ms = 0\n").is_err());
        assert!(parse_config("[tracker.flush]\nmode = \"every_n_ticks\"\nticks = 0\n").is_err());
        assert!(parse_config("paths = 3").is_err());
    }

    #[test]
    fn test_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("convlog.toml");
        assert_eq!(load_config(&path, false).unwrap(), AppConfig::default());
        assert!(load_config(&path, true).is_err());
    }

    #[test]
    fn test_override_precedence() {
        let mut config = parse_config("[paths]\nlog_dir = \"from-file\"\n").unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_LOG_DIR, "from-env"),
            (ENV_TRANSCRIPT_DIR, "env-transcripts"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|name| env.get(name).map(|v| (*v).to_string()));
        assert_eq!(config.paths.log_dir, PathBuf::from("from-env"));

        config.apply_flags(Some(PathBuf::from("from-flag")), None);
        assert_eq!(config.paths.log_dir, PathBuf::from("from-flag"));
        assert_eq!(config.paths.transcript_dir, PathBuf::from("env-transcripts"));
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config, AppConfig::default());
    }
}
