use std::env;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

/// Parse a concurrency value: `auto` (or `0`) means "use available parallelism".
fn parse_concurrency(value: &str) -> Result<usize, ConfigError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("auto") || trimmed.eq_ignore_ascii_case("automatic") {
        return Ok(0);
    }
    trimmed.parse().map_err(|_| ConfigError::Invalid {
        key: "MAX_CONCURRENT_TASKS".to_string(),
        value: value.to_string(),
    })
}

fn parse_tick(value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(ConfigError::Invalid {
            key: "TASK_TICK_MS".to_string(),
            value: value.to_string(),
        }),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub tasks: TaskSettings,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SPECFLOW_PROFILE` env var. When set (e.g. `BATCH`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SPECFLOW_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let mut tasks = TaskSettings::default();
        tasks.apply_env_overrides(p);
        Self {
            profile: p.to_string(),
            tasks,
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  tasks:       max_concurrent={}, tick={}ms",
            self.tasks.concurrency_label(),
            self.tasks.tick_interval_ms
        );
    }
}

// ── Tasks ─────────────────────────────────────────────────────

/// Task controller settings.
///
/// Parsed from the `[tasks]` section of a TOML file, or from
/// `MAX_CONCURRENT_TASKS` / `TASK_TICK_MS` in the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Maximum concurrently running normal-priority tasks. 0 = automatic.
    /// Accepts a count or the same strings as `MAX_CONCURRENT_TASKS`.
    #[serde(
        default = "default_max_concurrent_tasks",
        deserialize_with = "deserialize_concurrency"
    )]
    pub max_concurrent_tasks: usize,
    /// Dispatch loop tick in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_max_concurrent_tasks() -> usize { 0 }
fn default_tick_interval_ms() -> u64 { 300 }

#[derive(Deserialize)]
#[serde(untagged)]
enum ConcurrencyValue {
    Count(usize),
    Text(String),
}

fn deserialize_concurrency<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    match ConcurrencyValue::deserialize(deserializer)? {
        ConcurrencyValue::Count(n) => Ok(n),
        ConcurrencyValue::Text(s) => parse_concurrency(&s).map_err(serde::de::Error::custom),
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    tasks: TaskSettings,
}

impl TaskSettings {
    /// Parse settings from a TOML string, then apply env overrides for `profile`.
    pub fn from_toml(toml_str: &str, profile: &str) -> Result<Self, ConfigError> {
        let file: SettingsFile = toml::from_str(toml_str)?;
        let mut settings = file.tasks;
        settings.apply_env_overrides(&profile.to_uppercase());
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file path.
    pub fn from_file(path: impl AsRef<Path>, profile: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content, profile)
    }

    /// Reject values the dispatch loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "tick_interval_ms".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// "auto" for 0, otherwise the configured number.
    pub fn concurrency_label(&self) -> String {
        if self.max_concurrent_tasks == 0 {
            "auto".to_string()
        } else {
            self.max_concurrent_tasks.to_string()
        }
    }

    /// Unparseable values are logged and ignored, keeping the previous value.
    fn apply_env_overrides(&mut self, profile: &str) {
        if let Some(v) = profiled_env_opt(profile, "MAX_CONCURRENT_TASKS") {
            match parse_concurrency(&v) {
                Ok(n) => self.max_concurrent_tasks = n,
                Err(e) => tracing::warn!(error = %e, "ignoring env override"),
            }
        }
        if let Some(v) = profiled_env_opt(profile, "TASK_TICK_MS") {
            match parse_tick(&v) {
                Ok(ms) => self.tick_interval_ms = ms,
                Err(e) => tracing::warn!(error = %e, "ignoring env override"),
            }
        }
    }
}
