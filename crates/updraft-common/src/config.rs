//! ---
//! upd_section: "00-shared"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Shared primitives and utilities for the update runtime."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Lower bound for the polling cadence; anything tighter hammers the feed.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(60);

fn default_identity() -> String {
    "dev.updraft.desktop".to_owned()
}

fn default_app_name() -> String {
    "Updraft".to_owned()
}

fn default_enabled() -> bool {
    true
}

fn default_auto_download() -> bool {
    true
}

fn default_install_on_quit() -> bool {
    true
}

fn default_feed() -> String {
    "configs/update_feed.json".to_owned()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(4 * 60 * 60)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_skipped_path() -> PathBuf {
    PathBuf::from("target/updraft/skipped.json")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the Updraft runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppIdentityConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub instance: InstanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "UPDRAFT_CONFIG";

    /// Load configuration from disk, respecting the `UPDRAFT_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.app.validate()?;
        self.update.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Identity of the application being updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppIdentityConfig {
    /// Reverse-DNS style identifier; scopes the single-instance lock.
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Display name used in banners and status texts.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Release number of the packaged application. Falls back to the crate version.
    #[serde(default)]
    pub version: Option<String>,
}

impl Default for AppIdentityConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            name: default_app_name(),
            version: None,
        }
    }
}

impl AppIdentityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(anyhow!("app.identity must not be empty"));
        }
        if let Some(version) = &self.version {
            if version.trim().is_empty() {
                return Err(anyhow!("app.version must not be blank when set"));
            }
        }
        Ok(())
    }
}

/// Where the skipped-version set lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkipPersistence {
    /// Skips only suppress re-prompting for the running process.
    #[default]
    Session,
    /// Skips survive restarts in a JSON file at `skipped_path`.
    Disk,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// When false the daemon injects an engine that rejects every check.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Feed location: a file path or an http(s) URL.
    #[serde(default = "default_feed")]
    pub feed: String,
    /// Start downloading as soon as a release is found.
    #[serde(default = "default_auto_download")]
    pub auto_download: bool,
    /// Install a downloaded release silently when the process exits.
    #[serde(default = "default_install_on_quit")]
    pub install_on_quit: bool,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    /// Delay before the first automatic check. Zero disables the startup check.
    #[serde(default = "default_initial_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub initial_delay: Duration,
    #[serde(default)]
    pub skip_persistence: SkipPersistence,
    #[serde(default = "default_skipped_path")]
    pub skipped_path: PathBuf,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub allow_downgrade: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            feed: default_feed(),
            auto_download: default_auto_download(),
            install_on_quit: default_install_on_quit(),
            poll_interval: default_poll_interval(),
            initial_delay: default_initial_delay(),
            skip_persistence: SkipPersistence::default(),
            skipped_path: default_skipped_path(),
            cache_dir: None,
            allow_downgrade: false,
        }
    }
}

impl UpdateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.feed.trim().is_empty() {
            return Err(anyhow!("update.feed must not be empty"));
        }
        if self.poll_interval < MIN_POLL_INTERVAL {
            return Err(anyhow!(
                "update.poll_interval must be at least {}s (got {}s)",
                MIN_POLL_INTERVAL.as_secs(),
                self.poll_interval.as_secs()
            ));
        }
        if self.skip_persistence == SkipPersistence::Disk
            && self.skipped_path.as_os_str().is_empty()
        {
            return Err(anyhow!(
                "update.skipped_path is required when skip_persistence = \"disk\""
            ));
        }
        Ok(())
    }

    /// Initial delay as an option; zero means no startup check.
    pub fn startup_delay(&self) -> Option<Duration> {
        (!self.initial_delay.is_zero()).then_some(self.initial_delay)
    }

    /// Directory receiving downloaded artifacts.
    pub fn resolved_cache_dir(&self, identity: &str) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(identity)
                .join("updates")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstanceConfig {
    /// Directory holding the instance socket. Defaults to the user runtime dir.
    #[serde(default)]
    pub runtime_dir: Option<PathBuf>,
}

impl InstanceConfig {
    pub fn resolved_runtime_dir(&self) -> PathBuf {
        self.runtime_dir.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("updraft")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn parses_full_document() {
        let raw = r#"
            [app]
            identity = "com.example.notes"
            name = "Notes"
            version = "1.9.0"

            [update]
            feed = "https://updates.example.com/feed.json"
            auto_download = true
            install_on_quit = true
            poll_interval = 3600
            initial_delay = 0
            skip_persistence = "disk"
            skipped_path = "state/skipped.json"

            [logging]
            format = "pretty"
        "#;
        let config: AppConfig = raw.parse().expect("parse");
        assert_eq!(config.app.identity, "com.example.notes");
        assert_eq!(config.app.version.as_deref(), Some("1.9.0"));
        assert!(config.update.auto_download);
        assert!(config.update.install_on_quit);
        assert_eq!(config.update.poll_interval, Duration::from_secs(3600));
        assert_eq!(config.update.startup_delay(), None);
        assert_eq!(config.update.skip_persistence, SkipPersistence::Disk);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn omitted_flags_download_and_install_on_quit() {
        let config: AppConfig = "[update]\nfeed = \"feed.json\"\n".parse().expect("parse");
        assert!(config.update.auto_download);
        assert!(config.update.install_on_quit);
        let defaults = UpdateConfig::default();
        assert!(defaults.auto_download && defaults.install_on_quit);

        let config: AppConfig = "[update]\nauto_download = false\ninstall_on_quit = false\n"
            .parse()
            .expect("parse");
        assert!(!config.update.auto_download);
        assert!(!config.update.install_on_quit);
    }

    #[test]
    fn rejects_tight_poll_interval() {
        let raw = "[update]\npoll_interval = 5\n";
        let err = raw.parse::<AppConfig>().expect_err("too tight");
        assert!(format!("{err:#}").contains("poll_interval"));
    }

    #[test]
    fn rejects_empty_identity() {
        let raw = "[app]\nidentity = \"  \"\n";
        assert!(raw.parse::<AppConfig>().is_err());
    }

    #[test]
    fn load_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("updraft.toml");
        fs::write(&path, "[app]\nidentity = \"com.example.loaded\"\n").expect("write");
        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).expect("load");
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.app.identity, "com.example.loaded");
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let config = UpdateConfig {
            cache_dir: Some(PathBuf::from("/tmp/cache")),
            ..UpdateConfig::default()
        };
        assert_eq!(
            config.resolved_cache_dir("com.example"),
            PathBuf::from("/tmp/cache")
        );
    }
}
