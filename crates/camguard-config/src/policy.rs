//! Validated policy structures

use crate::schema::{
    RawAutoPause, RawBrowser, RawChannels, RawCommands, RawConfig, RawModeration, RawRoles,
    RawServiceConfig, RawStats,
};
use crate::validation::parse_time;
use camguard_api::{Capability, MemberInfo};
use camguard_util::{ChannelId, UserId, WallClock};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 15;
pub const DEFAULT_SHORT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_LONG_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_COOLDOWN_SECS: u64 = 5;

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone)]
pub struct Policy {
    pub service: ServiceConfig,
    pub channels: ChannelPolicy,
    pub roles: RolePolicy,
    pub moderation: ModerationPolicy,
    pub auto_pause: AutoPausePolicy,
    pub commands: CommandPolicy,
    pub stats: StatsPolicy,
    pub browser: BrowserPolicy,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            channels: ChannelPolicy::from_raw(raw.channels),
            roles: RolePolicy::from_raw(raw.roles),
            moderation: ModerationPolicy::from_raw(raw.moderation),
            auto_pause: AutoPausePolicy::from_raw(raw.auto_pause),
            commands: CommandPolicy::from_raw(raw.commands),
            stats: StatsPolicy::from_raw(raw.stats),
            browser: BrowserPolicy::from_raw(raw.browser),
        }
    }

    /// Minimal policy around the given channels, with every other setting at
    /// its default. Used by tests and tooling.
    pub fn with_channels(monitored: Vec<ChannelId>, punishment: ChannelId) -> Self {
        Self::from_raw(RawConfig {
            config_version: crate::CURRENT_CONFIG_VERSION,
            service: Default::default(),
            channels: RawChannels {
                monitored,
                punishment,
                chat: None,
            },
            roles: Default::default(),
            moderation: Default::default(),
            auto_pause: Default::default(),
            commands: Default::default(),
            stats: Default::default(),
            browser: Default::default(),
        })
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub flush_interval: Duration,
    pub tick_interval: Duration,
    pub prune_interval: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(camguard_util::default_socket_path),
            data_dir: raw.data_dir.unwrap_or_else(camguard_util::default_data_dir),
            flush_interval: Duration::from_secs(raw.flush_interval_seconds.unwrap_or(60)),
            tick_interval: Duration::from_secs(raw.tick_interval_seconds.unwrap_or(30)),
            prune_interval: Duration::from_secs(raw.prune_interval_seconds.unwrap_or(3600)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelPolicy {
    pub monitored: Vec<ChannelId>,
    pub punishment: ChannelId,
    pub chat: Option<ChannelId>,
}

impl ChannelPolicy {
    fn from_raw(raw: RawChannels) -> Self {
        Self {
            monitored: raw.monitored,
            punishment: raw.punishment,
            chat: raw.chat,
        }
    }

    pub fn is_monitored(&self, channel: ChannelId) -> bool {
        self.monitored.contains(&channel)
    }
}

/// Exemption and capability sets
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    pub owner: Option<UserId>,
    pub allowed_users: HashSet<UserId>,
    pub admin_roles: HashSet<String>,
    pub exempt_bots: HashSet<UserId>,
    pub stats_excluded: HashSet<UserId>,
}

impl RolePolicy {
    fn from_raw(raw: RawRoles) -> Self {
        Self {
            owner: raw.owner,
            allowed_users: raw.allowed_users.into_iter().collect(),
            admin_roles: raw.admin_roles.into_iter().collect(),
            exempt_bots: raw.exempt_bots.into_iter().collect(),
            stats_excluded: raw.stats_excluded.into_iter().collect(),
        }
    }

    /// Resolve a member's capability from their id and current role names.
    ///
    /// Streamer accounts resolve to `AllowedUser` even when they also hold
    /// an admin role, so they never count toward the audience.
    pub fn resolve(&self, member: &MemberInfo) -> Capability {
        if self.owner == Some(member.user_id) {
            Capability::Owner
        } else if self.allowed_users.contains(&member.user_id) {
            Capability::AllowedUser
        } else if member.roles.iter().any(|r| self.admin_roles.contains(r)) {
            Capability::Admin
        } else {
            Capability::Member
        }
    }

    /// Bots are never moderated nor counted
    pub fn is_exempt_bot(&self, member: &MemberInfo) -> bool {
        member.is_bot || self.exempt_bots.contains(&member.user_id)
    }

    pub fn is_stats_excluded(&self, user_id: UserId) -> bool {
        self.stats_excluded.contains(&user_id)
    }
}

#[derive(Debug, Clone)]
pub struct ModerationPolicy {
    pub enabled: bool,
    pub grace_period: Duration,
    pub short_timeout: Duration,
    pub long_timeout: Duration,
    pub reset_violations_on_enable: bool,
}

impl ModerationPolicy {
    fn from_raw(raw: RawModeration) -> Self {
        Self {
            enabled: raw.enabled.unwrap_or(true),
            grace_period: Duration::from_secs(
                raw.grace_period_seconds.unwrap_or(DEFAULT_GRACE_PERIOD_SECS),
            ),
            short_timeout: Duration::from_secs(
                raw.short_timeout_seconds.unwrap_or(DEFAULT_SHORT_TIMEOUT_SECS),
            ),
            long_timeout: Duration::from_secs(
                raw.long_timeout_seconds.unwrap_or(DEFAULT_LONG_TIMEOUT_SECS),
            ),
            reset_violations_on_enable: raw.reset_violations_on_enable.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AutoPausePolicy {
    pub enabled: bool,
}

impl AutoPausePolicy {
    fn from_raw(raw: RawAutoPause) -> Self {
        Self {
            enabled: raw.enabled.unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    pub cooldown: Duration,
}

impl CommandPolicy {
    fn from_raw(raw: RawCommands) -> Self {
        Self {
            cooldown: Duration::from_secs(raw.cooldown_seconds.unwrap_or(DEFAULT_COOLDOWN_SECS)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsPolicy {
    /// UTC time of day of the daily rotation
    pub rotation_time: WallClock,
    pub leaderboard_size: usize,
}

impl StatsPolicy {
    fn from_raw(raw: RawStats) -> Self {
        let (hour, minute) = raw
            .rotation_time
            .as_deref()
            .and_then(|s| parse_time(s).ok())
            .unwrap_or((0, 0));
        Self {
            rotation_time: WallClock { hour, minute },
            leaderboard_size: raw.leaderboard_size.unwrap_or(10),
        }
    }
}

/// Browser automation settings
#[derive(Debug, Clone)]
pub struct BrowserPolicy {
    pub webdriver_url: String,
    pub target_url: String,
    pub browser_name: String,
    pub user_data_dir: Option<PathBuf>,
    pub skip_keys: Vec<String>,
    /// Pause between consecutive skip keys
    pub key_interval: Duration,
    /// Wait after navigating before the first skip
    pub start_delay: Duration,
    /// Upper bound for any single driver call
    pub operation_timeout: Duration,
    pub health_check_interval: Duration,
    pub max_relaunch_attempts: u32,
    /// Backoff before the first relaunch; doubles for each further attempt
    pub relaunch_backoff: Duration,
    pub queue_capacity: usize,
}

impl BrowserPolicy {
    fn from_raw(raw: RawBrowser) -> Self {
        Self {
            webdriver_url: raw
                .webdriver_url
                .unwrap_or_else(|| "http://127.0.0.1:9515".into()),
            target_url: raw
                .target_url
                .unwrap_or_else(|| "https://www.omegle.com/".into()),
            browser_name: raw.browser_name.unwrap_or_else(|| "MicrosoftEdge".into()),
            user_data_dir: raw.user_data_dir,
            skip_keys: raw
                .skip_keys
                .unwrap_or_else(|| vec!["Escape".into(), "Escape".into()]),
            key_interval: Duration::from_millis(raw.key_interval_ms.unwrap_or(1000)),
            start_delay: Duration::from_millis(raw.start_delay_ms.unwrap_or(3000)),
            operation_timeout: Duration::from_secs(raw.operation_timeout_seconds.unwrap_or(20)),
            health_check_interval: Duration::from_secs(
                raw.health_check_interval_seconds.unwrap_or(30),
            ),
            max_relaunch_attempts: raw.max_relaunch_attempts.unwrap_or(2),
            relaunch_backoff: Duration::from_secs(raw.relaunch_backoff_seconds.unwrap_or(5)),
            queue_capacity: raw.queue_capacity.unwrap_or(16),
        }
    }
}

impl Default for BrowserPolicy {
    fn default() -> Self {
        Self::from_raw(RawBrowser::default())
    }
}
