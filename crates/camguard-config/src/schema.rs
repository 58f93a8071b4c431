//! Raw configuration schema (as parsed from TOML)

use camguard_util::{ChannelId, UserId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    pub channels: RawChannels,

    #[serde(default)]
    pub roles: RawRoles,

    #[serde(default)]
    pub moderation: RawModeration,

    #[serde(default)]
    pub auto_pause: RawAutoPause,

    #[serde(default)]
    pub commands: RawCommands,

    #[serde(default)]
    pub stats: RawStats,

    #[serde(default)]
    pub browser: RawBrowser,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path for the gateway bridge
    pub socket_path: Option<PathBuf>,

    /// Directory holding the persisted state file
    pub data_dir: Option<PathBuf>,

    /// How often dirty state is flushed to disk
    pub flush_interval_seconds: Option<u64>,

    /// How often rotation and timeout expiry are checked
    pub tick_interval_seconds: Option<u64>,

    /// How often history and cooldowns are pruned
    pub prune_interval_seconds: Option<u64>,
}

/// Channel identifiers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawChannels {
    /// Voice channels where the camera policy is enforced
    pub monitored: Vec<ChannelId>,

    /// Destination for first-violation moves
    pub punishment: ChannelId,

    /// Text channel for notices (auto-pause, punishments, leaderboards)
    pub chat: Option<ChannelId>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRoles {
    pub owner: Option<UserId>,

    /// Streamer accounts: exempt and allowed to run every command
    #[serde(default)]
    pub allowed_users: Vec<UserId>,

    /// Role names granting admin capability
    #[serde(default)]
    pub admin_roles: Vec<String>,

    /// Bots that are never moderated (music bots and the like)
    #[serde(default)]
    pub exempt_bots: Vec<UserId>,

    /// Users never tracked by stats
    #[serde(default)]
    pub stats_excluded: Vec<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawModeration {
    pub enabled: Option<bool>,
    pub grace_period_seconds: Option<u64>,
    pub short_timeout_seconds: Option<u64>,
    pub long_timeout_seconds: Option<u64>,
    /// Clear all violation counts when moderation is switched back on
    pub reset_violations_on_enable: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAutoPause {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCommands {
    pub cooldown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawStats {
    /// Daily rotation time, "HH:MM" in UTC
    pub rotation_time: Option<String>,
    pub leaderboard_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBrowser {
    /// WebDriver endpoint (e.g. msedgedriver or chromedriver)
    pub webdriver_url: Option<String>,

    /// Page the stream runs on
    pub target_url: Option<String>,

    /// WebDriver `browserName` capability
    pub browser_name: Option<String>,

    /// Browser profile directory, passed as `--user-data-dir`
    pub user_data_dir: Option<PathBuf>,

    /// Keys sent, one at a time, to skip
    pub skip_keys: Option<Vec<String>>,

    pub key_interval_ms: Option<u64>,
    pub start_delay_ms: Option<u64>,
    pub operation_timeout_seconds: Option<u64>,
    pub health_check_interval_seconds: Option<u64>,
    pub max_relaunch_attempts: Option<u32>,
    pub relaunch_backoff_seconds: Option<u64>,
    pub queue_capacity: Option<usize>,
}
