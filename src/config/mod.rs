use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::errors::{Result, ScheduleError};

const HOME_ENV: &str = "SCHEDULE_CORE_HOME";
const DEFAULT_DIR_NAME: &str = ".schedule_core";
const CONFIG_FILE: &str = "config.json";
const DATA_FILE: &str = "schedule.json";
const TMP_SUFFIX: &str = "tmp";

/// User-tunable settings for previews and reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Days covered by the "upcoming" preview, starting today.
    #[serde(default = "Config::default_upcoming_window_days")]
    pub upcoming_window_days: u32,
    /// Overdue occurrences a single rule may materialise per reconciliation pass.
    #[serde(default = "Config::default_catch_up_limit")]
    pub catch_up_limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<PathBuf>,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upcoming_window_days: Self::default_upcoming_window_days(),
            catch_up_limit: Self::default_catch_up_limit(),
            data_file: None,
            log_filter: None,
        }
    }
}

impl Config {
    pub fn default_upcoming_window_days() -> u32 {
        30
    }

    pub fn default_catch_up_limit() -> usize {
        1
    }

    pub fn validate(&self) -> Result<()> {
        if self.catch_up_limit == 0 {
            return Err(ScheduleError::Config(
                "catch_up_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Loads and saves [`Config`] under the application base directory.
pub struct ConfigManager {
    base: PathBuf,
    path: PathBuf,
}

impl ConfigManager {
    /// Uses `SCHEDULE_CORE_HOME` when set, otherwise `~/.schedule_core`.
    pub fn new() -> Self {
        Self::with_base_dir(default_base_dir())
    }

    pub fn with_base_dir(base: PathBuf) -> Self {
        let path = base.join(CONFIG_FILE);
        Self { base, path }
    }

    /// Returns the stored configuration, or defaults when nothing has been saved yet.
    pub fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        let data = fs::read_to_string(&self.path)?;
        let config: Config = serde_json::from_str(&data)
            .map_err(|err| ScheduleError::Config(format!("{}: {err}", self.path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;
        fs::create_dir_all(&self.base)?;
        let json = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension(TMP_SUFFIX);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// The schedule document to use: the configured one, or `schedule.json` in the base dir.
    pub fn resolve_data_file(&self, config: &Config) -> PathBuf {
        config
            .data_file
            .clone()
            .unwrap_or_else(|| self.base.join(DATA_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn default_base_dir() -> PathBuf {
    if let Some(custom) = env::var_os(HOME_ENV) {
        return PathBuf::from(custom);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DIR_NAME)
}
