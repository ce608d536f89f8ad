//! Watcher configuration.
//!
//! `.nudge/config.toml` is discovered by walking up from the current
//! directory; every field has a default so the file is optional. CLI flags
//! override file values (the merge happens in `main`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".nudge";

fn default_message() -> String {
    "please continue".to_string()
}

fn default_cooldown_secs() -> f64 {
    1.0
}

fn default_send_delay_ms() -> u64 {
    250
}

fn default_enter_delay_ms() -> u64 {
    150
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_rebind_interval_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    300
}

fn default_idle_rebind_secs() -> f64 {
    20.0
}

fn default_retry_budget() -> u32 {
    30
}

fn default_max_rebind_attempts() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
pub struct WatchSettings {
    /// Follow-up message sent on each completed turn.
    #[serde(default = "default_message")]
    pub message: String,
    /// Minimum seconds between two deliveries to the same pane.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    /// Delay before writing the payload into the pane.
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
    /// Delay between the payload and the activation Enter.
    #[serde(default = "default_enter_delay_ms")]
    pub enter_delay_ms: u64,
    /// Sleep between stream polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How often the locator re-confirms the bound session.
    #[serde(default = "default_rebind_interval_secs")]
    pub rebind_interval_secs: u64,
    /// No stream growth for this long marks the watcher stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// In auto mode, rebind to a newer session after ours has been idle
    /// this long while the other keeps reporting.
    #[serde(default = "default_idle_rebind_secs")]
    pub idle_rebind_secs: f64,
    /// Consecutive failing stream polls tolerated before giving up.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Rebind attempts tolerated while health is `error` before the loop
    /// exits.
    #[serde(default = "default_max_rebind_attempts")]
    pub max_rebind_attempts: u32,
    /// Skip delivery while the pane is not its window's active pane.
    #[serde(default)]
    pub require_pane_active: bool,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            message: default_message(),
            cooldown_secs: default_cooldown_secs(),
            send_delay_ms: default_send_delay_ms(),
            enter_delay_ms: default_enter_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            rebind_interval_secs: default_rebind_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            idle_rebind_secs: default_idle_rebind_secs(),
            retry_budget: default_retry_budget(),
            max_rebind_attempts: default_max_rebind_attempts(),
            require_pane_active: false,
        }
    }
}

/// Root-path overrides, mainly for running against a non-default Codex home.
#[derive(Debug, Deserialize, Default)]
pub struct PathSettings {
    #[serde(default)]
    pub codex_home: Option<PathBuf>,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

impl Config {
    /// Search upward from `start` for `.nudge/config.toml` and load it.
    /// Returns defaults when no file exists; a file that exists but does not
    /// parse is a configuration error.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((Config::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
