//! Configuration validation

use crate::schema::RawConfig;
use camguard_util::ChannelId;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("At least one monitored channel is required")]
    NoMonitoredChannels,

    #[error("Duplicate monitored channel: {0}")]
    DuplicateChannel(ChannelId),

    #[error("Punishment channel {0} must not be a monitored channel")]
    PunishmentChannelMonitored(ChannelId),

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("long_timeout_seconds ({long}) must be >= short_timeout_seconds ({short})")]
    TimeoutOrder { short: u64, long: u64 },

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },

    #[error("{field} '{value}' is not an http(s) URL")]
    InvalidUrl { field: &'static str, value: String },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let channels = &config.channels;
    if channels.monitored.is_empty() {
        errors.push(ValidationError::NoMonitoredChannels);
    }
    let mut seen = HashSet::new();
    for channel in &channels.monitored {
        if !seen.insert(channel) {
            errors.push(ValidationError::DuplicateChannel(*channel));
        }
    }
    if channels.monitored.contains(&channels.punishment) {
        errors.push(ValidationError::PunishmentChannelMonitored(channels.punishment));
    }

    let moderation = &config.moderation;
    for (field, value) in [
        ("moderation.grace_period_seconds", moderation.grace_period_seconds),
        ("moderation.short_timeout_seconds", moderation.short_timeout_seconds),
        ("moderation.long_timeout_seconds", moderation.long_timeout_seconds),
        ("service.flush_interval_seconds", config.service.flush_interval_seconds),
        ("service.tick_interval_seconds", config.service.tick_interval_seconds),
        ("service.prune_interval_seconds", config.service.prune_interval_seconds),
        ("browser.operation_timeout_seconds", config.browser.operation_timeout_seconds),
        (
            "browser.health_check_interval_seconds",
            config.browser.health_check_interval_seconds,
        ),
    ] {
        if value == Some(0) {
            errors.push(ValidationError::ZeroDuration { field });
        }
    }

    let short = moderation
        .short_timeout_seconds
        .unwrap_or(crate::DEFAULT_SHORT_TIMEOUT_SECS);
    let long = moderation
        .long_timeout_seconds
        .unwrap_or(crate::DEFAULT_LONG_TIMEOUT_SECS);
    if long < short {
        errors.push(ValidationError::TimeoutOrder { short, long });
    }

    if let Some(rotation) = &config.stats.rotation_time
        && let Err(message) = parse_time(rotation)
    {
        errors.push(ValidationError::InvalidTimeFormat {
            value: rotation.clone(),
            message,
        });
    }

    if config.stats.leaderboard_size == Some(0) {
        errors.push(ValidationError::EmptyField {
            field: "stats.leaderboard_size",
        });
    }

    let browser = &config.browser;
    if let Some(keys) = &browser.skip_keys
        && (keys.is_empty() || keys.iter().any(|k| k.is_empty()))
    {
        errors.push(ValidationError::EmptyField {
            field: "browser.skip_keys",
        });
    }
    if browser.queue_capacity == Some(0) {
        errors.push(ValidationError::EmptyField {
            field: "browser.queue_capacity",
        });
    }
    for (field, value) in [
        ("browser.webdriver_url", &browser.webdriver_url),
        ("browser.target_url", &browser.target_url),
    ] {
        if let Some(url) = value
            && !is_http_url(url)
        {
            errors.push(ValidationError::InvalidUrl {
                field,
                value: url.clone(),
            });
        }
    }

    errors
}

fn is_http_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty())
}

/// Parse HH:MM time format
pub fn parse_time(s: &str) -> Result<(u8, u8), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err("Expected HH:MM format".into());
    }

    let hour: u8 = parts[0]
        .parse()
        .map_err(|_| "Invalid hour".to_string())?;
    let minute: u8 = parts[1]
        .parse()
        .map_err(|_| "Invalid minute".to_string())?;

    if hour >= 24 {
        return Err("Hour must be 0-23".into());
    }
    if minute >= 60 {
        return Err("Minute must be 0-59".into());
    }

    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RawChannels;

    fn base_config() -> RawConfig {
        RawConfig {
            config_version: 1,
            service: Default::default(),
            channels: RawChannels {
                monitored: vec![ChannelId::new(10), ChannelId::new(11)],
                punishment: ChannelId::new(20),
                chat: None,
            },
            roles: Default::default(),
            moderation: Default::default(),
            auto_pause: Default::default(),
            commands: Default::default(),
            stats: Default::default(),
            browser: Default::default(),
        }
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("14:30").unwrap(), (14, 30));
        assert_eq!(parse_time("00:00").unwrap(), (0, 0));
        assert_eq!(parse_time("23:59").unwrap(), (23, 59));

        assert!(parse_time("24:00").is_err());
        assert!(parse_time("12:60").is_err());
        assert!(parse_time("invalid").is_err());
    }

    #[test]
    fn test_base_config_is_valid() {
        assert!(validate_config(&base_config()).is_empty());
    }

    #[test]
    fn test_punishment_channel_cannot_be_monitored() {
        let mut config = base_config();
        config.channels.punishment = ChannelId::new(10);

        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::PunishmentChannelMonitored(_))));
    }

    #[test]
    fn test_duplicate_monitored_channel() {
        let mut config = base_config();
        config.channels.monitored.push(ChannelId::new(10));

        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateChannel(_))));
    }

    #[test]
    fn test_timeout_order() {
        let mut config = base_config();
        config.moderation.short_timeout_seconds = Some(900);
        config.moderation.long_timeout_seconds = Some(300);

        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::TimeoutOrder { short: 900, long: 300 })));
    }

    #[test]
    fn test_zero_grace_period_rejected() {
        let mut config = base_config();
        config.moderation.grace_period_seconds = Some(0);

        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::ZeroDuration {
                field: "moderation.grace_period_seconds"
            }
        )));
    }

    #[test]
    fn test_browser_settings() {
        let mut config = base_config();
        config.browser.skip_keys = Some(vec![]);
        config.browser.target_url = Some("omegle".into());
        config.stats.rotation_time = Some("25:00".into());

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 3);
    }
}
