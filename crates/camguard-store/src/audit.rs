//! Audit event types

use camguard_api::{ViolationEvent, ViolationAction};
use camguard_util::{ChannelId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    ServiceStarted,

    ServiceStopped,

    /// Member entered a monitored channel
    Joined { user_id: UserId, channel_id: ChannelId },

    /// Member left the monitored channels
    Left { user_id: UserId, vc_seconds: u64 },

    ViolationRecorded {
        user_id: UserId,
        violation_number: u32,
        action: ViolationAction,
    },

    TimeoutApplied {
        user_id: UserId,
        duration_secs: u64,
        moderator: String,
    },

    TimeoutRemoved {
        user_id: UserId,
        removed_by: Option<String>,
    },

    /// A moderation action was refused by the platform
    ActionDenied {
        user_id: Option<UserId>,
        action: String,
        message: String,
    },

    ModerationToggled { enabled: bool, by: UserId },

    AutoPauseToggled { enabled: bool, by: UserId },

    HushToggled { enabled: bool, by: UserId },

    ViolationsReset { target: Option<UserId>, by: UserId },

    /// A member was barred from (or allowed back to) running commands
    CommandsToggled {
        user_id: UserId,
        disabled: bool,
        by: UserId,
    },

    StatsCleared { by: UserId },

    StreamAutoPaused,

    StatsRotated {
        total_commands: u64,
        violation_events: u64,
    },

    BrowserCrashed { restart_count: u32 },
}

/// Full audit event with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(timestamp: DateTime<Utc>, event: AuditEventType) -> Self {
        Self { timestamp, event }
    }

    pub fn violation(event: &ViolationEvent) -> Self {
        Self::new(
            event.timestamp,
            AuditEventType::ViolationRecorded {
                user_id: event.user_id,
                violation_number: event.violation_number,
                action: event.action_taken,
            },
        )
    }
}
