//! TOML-based application configuration.
//!
//! Stores:
//! - Timer cadence (tick, auto-save, orphan cut-off, streak-mode threshold)
//! - Freeze economy (cap and base price)
//! - XP awards
//! - The signed-in user and defaults for new profiles
//!
//! Configuration is stored at `~/.config/studioflow/config.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;
use crate::streak::UserTimezone;

/// Timer cadence configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Elapsed minutes after which a session turns into a streak session.
    #[serde(default = "default_streak_mode_minutes")]
    pub streak_mode_minutes: u32,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,
    /// Snapshots older than this are discarded on load.
    #[serde(default = "default_orphan_after_hours")]
    pub orphan_after_hours: u32,
}

/// Freeze economy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeConfig {
    #[serde(default = "default_max_streak_freezes")]
    pub max_streak_freezes: u32,
    /// Price of one freeze for goals up to 15 minutes; longer goals scale it.
    #[serde(default = "default_base_cost")]
    pub base_cost: i64,
}

/// XP awards for finished sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpConfig {
    #[serde(default = "default_xp_per_minute")]
    pub per_minute: i64,
    #[serde(default = "default_streak_mode_bonus")]
    pub streak_mode_bonus: i64,
}

/// Signed-in user and defaults applied when a profile is first created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub timezone: UserTimezone,
    #[serde(default = "default_daily_goal_minutes")]
    pub daily_goal_minutes: u32,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/studioflow/config.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub freeze: FreezeConfig,
    #[serde(default)]
    pub xp: XpConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
}

fn default_streak_mode_minutes() -> u32 {
    25
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_autosave_interval_secs() -> u64 {
    30
}
fn default_orphan_after_hours() -> u32 {
    2
}
fn default_max_streak_freezes() -> u32 {
    5
}
fn default_base_cost() -> i64 {
    100
}
fn default_xp_per_minute() -> i64 {
    1
}
fn default_streak_mode_bonus() -> i64 {
    10
}
fn default_daily_goal_minutes() -> u32 {
    30
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            streak_mode_minutes: default_streak_mode_minutes(),
            tick_interval_ms: default_tick_interval_ms(),
            autosave_interval_secs: default_autosave_interval_secs(),
            orphan_after_hours: default_orphan_after_hours(),
        }
    }
}

impl TimerConfig {
    pub fn streak_threshold_secs(&self) -> u64 {
        u64::from(self.streak_mode_minutes) * 60
    }

    pub fn orphan_after(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.orphan_after_hours))
    }
}

impl Default for FreezeConfig {
    fn default() -> Self {
        Self {
            max_streak_freezes: default_max_streak_freezes(),
            base_cost: default_base_cost(),
        }
    }
}

impl Default for XpConfig {
    fn default() -> Self {
        Self {
            per_minute: default_xp_per_minute(),
            streak_mode_bonus: default_streak_mode_bonus(),
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            timezone: UserTimezone::utc(),
            daily_goal_minutes: default_daily_goal_minutes(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let (parent_path, leaf) = match key.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, key),
        };
        if leaf.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        if let Some(parent_path) = parent_path {
            for part in parent_path.split('.') {
                current = current
                    .get_mut(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
            }
        }

        let obj = current
            .as_object_mut()
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        let existing = obj
            .get(leaf)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

        let new_value = match existing {
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                value
                    .parse::<bool>()
                    .map_err(|e| invalid(e.to_string()))?,
            ),
            serde_json::Value::Number(_) => {
                if let Ok(n) = value.parse::<i64>() {
                    serde_json::Value::Number(n.into())
                } else {
                    return Err(invalid(format!("cannot parse '{value}' as integer")));
                }
            }
            serde_json::Value::Null if value.is_empty() => serde_json::Value::Null,
            _ => serde_json::Value::String(value.into()),
        };

        obj.insert(leaf.to_string(), new_value);
        Ok(())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there if the file is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving. Returns error if key is unknown
    /// or the value does not fit the field.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let parsed: Config = toml::from_str("[freeze]\nmax_streak_freezes = 3\n").unwrap();
        assert_eq!(parsed.freeze.max_streak_freezes, 3);
        assert_eq!(parsed.freeze.base_cost, 100);
        assert_eq!(parsed.timer.autosave_interval_secs, 30);
        assert_eq!(parsed.profile.timezone, UserTimezone::utc());
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("timer.streak_mode_minutes").as_deref(), Some("25"));
        assert_eq!(cfg.get("profile.timezone").as_deref(), Some("UTC"));
        assert!(cfg.get("timer.missing_key").is_none());
    }

    #[test]
    fn set_updates_number_and_timezone() {
        let mut cfg = Config::default();
        cfg.set("freeze.max_streak_freezes", "7").unwrap();
        cfg.set("profile.timezone", "+09:00").unwrap();
        assert_eq!(cfg.freeze.max_streak_freezes, 7);
        assert_eq!(cfg.profile.timezone.to_string(), "+09:00");
    }

    #[test]
    fn set_fills_optional_user_id() {
        let mut cfg = Config::default();
        cfg.set("profile.user_id", "creator-1").unwrap();
        assert_eq!(cfg.profile.user_id.as_deref(), Some("creator-1"));
    }

    #[test]
    fn set_rejects_unknown_key_and_bad_values() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("timer.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            cfg.set("timer.tick_interval_ms", "fast"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(cfg.set("profile.timezone", "Mars/Base").is_err());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_from_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(path.exists());
    }
}
