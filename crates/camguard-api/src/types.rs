//! Shared types for the camguardd API

use camguard_util::{ChannelId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capability of a member, resolved once per event from the member's id and
/// role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Member,
    AllowedUser,
    Admin,
    Owner,
}

impl Capability {
    /// Exempt from the camera requirement
    pub fn is_camera_exempt(&self) -> bool {
        !matches!(self, Capability::Member)
    }

    /// May run administrative commands and bypass control preconditions
    pub fn is_staff(&self) -> bool {
        !matches!(self, Capability::Member)
    }

    /// Counts toward the audience watched by auto-pause. The streamer
    /// accounts (owner and allow-listed users) are always present and are
    /// not audience.
    pub fn counts_as_audience(&self) -> bool {
        matches!(self, Capability::Member | Capability::Admin)
    }

    /// Can be barred from running commands; streamer accounts cannot
    pub fn can_be_disabled(&self) -> bool {
        matches!(self, Capability::Member | Capability::Admin)
    }
}

/// Identity of a guild member as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub is_bot: bool,
}

impl MemberInfo {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            display_name: None,
            roles: Vec::new(),
            is_bot: false,
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    /// Name for messages: the display name if known, otherwise the raw id
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.user_id.to_string())
    }
}

/// A member currently connected to some voice channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceMember {
    pub member: MemberInfo,
    pub channel_id: ChannelId,
    pub camera_on: bool,
}

/// Punishment applied for a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationAction {
    Moved,
    TimeoutShort,
    TimeoutLong,
}

impl ViolationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationAction::Moved => "moved",
            ViolationAction::TimeoutShort => "timeout_short",
            ViolationAction::TimeoutLong => "timeout_long",
        }
    }
}

/// One camera-policy violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    /// 1-based count including this violation
    pub violation_number: u32,
    pub action_taken: ViolationAction,
}

/// A timeout applied to a member, automatically or by a moderator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutRecord {
    pub user_id: UserId,
    pub applied_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub reason: String,
    pub moderator: String,
    #[serde(default)]
    pub removed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub removed_by: Option<String>,
}

impl TimeoutRecord {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.applied_at + chrono::Duration::seconds(self.duration_secs as i64)
    }

    /// Still in force at `now`: not removed and not yet expired
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.removed_at.is_none() && now < self.expires_at()
    }
}

/// Health of the browser automation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserHealth {
    Healthy,
    Degraded,
    Crashed,
}

/// Observable state of the single browser automation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserSession {
    pub health_status: BrowserHealth,
    pub last_health_check_time: Option<DateTime<Utc>>,
    pub restart_count: u32,
}

impl Default for BrowserSession {
    fn default() -> Self {
        Self {
            health_status: BrowserHealth::Healthy,
            last_health_check_time: None,
            restart_count: 0,
        }
    }
}

/// Stream control operations available to members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOp {
    Skip,
    Refresh,
    Start,
    Pause,
}

impl ControlOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOp::Skip => "skip",
            ControlOp::Refresh => "refresh",
            ControlOp::Start => "start",
            ControlOp::Pause => "pause",
        }
    }
}

/// A moderation or messaging call the daemon asks the gateway to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GatewayAction {
    Mute {
        user_id: UserId,
        muted: bool,
    },
    Deafen {
        user_id: UserId,
        deafened: bool,
    },
    MoveMember {
        user_id: UserId,
        channel_id: ChannelId,
    },
    ApplyTimeout {
        user_id: UserId,
        duration_secs: u64,
        reason: String,
    },
    RemoveTimeout {
        user_id: UserId,
        reason: String,
    },
    SendChannelMessage {
        channel_id: ChannelId,
        content: String,
    },
    SendDirectMessage {
        user_id: UserId,
        content: String,
    },
}

impl GatewayAction {
    /// The member this action targets, if any
    pub fn target(&self) -> Option<UserId> {
        match self {
            GatewayAction::Mute { user_id, .. }
            | GatewayAction::Deafen { user_id, .. }
            | GatewayAction::MoveMember { user_id, .. }
            | GatewayAction::ApplyTimeout { user_id, .. }
            | GatewayAction::RemoveTimeout { user_id, .. }
            | GatewayAction::SendDirectMessage { user_id, .. } => Some(*user_id),
            GatewayAction::SendChannelMessage { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GatewayAction::Mute { .. } => "mute",
            GatewayAction::Deafen { .. } => "deafen",
            GatewayAction::MoveMember { .. } => "move_member",
            GatewayAction::ApplyTimeout { .. } => "apply_timeout",
            GatewayAction::RemoveTimeout { .. } => "remove_timeout",
            GatewayAction::SendChannelMessage { .. } => "send_channel_message",
            GatewayAction::SendDirectMessage { .. } => "send_direct_message",
        }
    }
}

/// Why the gateway could not perform an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionFailure {
    /// The platform refused (role hierarchy, missing permission)
    PermissionDenied,
    /// The member does not accept direct messages
    DirectMessagesDisabled,
    /// The member or channel no longer exists
    NotFound,
    Other,
}

/// Result of a gateway action as reported by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Done,
    Failed { failure: ActionFailure, message: String },
}

/// Ranked leaderboard line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub value: u64,
}

/// Summary of one stats period, published at rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Users ranked by seconds spent in monitored channels
    pub top_vc_time: Vec<LeaderboardEntry>,
    /// Users ranked by command invocations
    pub top_commands: Vec<LeaderboardEntry>,
    /// Users ranked by lifetime violation count
    pub top_violators: Vec<LeaderboardEntry>,
    pub total_commands: u64,
    pub violation_events: u64,
}

/// Daemon health summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub moderation_enabled: bool,
    pub auto_pause_enabled: bool,
    pub hush_active: bool,
    pub present_users: usize,
    pub compliant_audience: usize,
    pub store_healthy: bool,
    pub browser: BrowserSession,
}

/// Client role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Trusted gateway bridge: may push events and answer action requests
    Bridge,
    /// Read-only client (dashboards, operators)
    Observer,
}

impl ClientRole {
    pub fn can_drive_gateway(&self) -> bool {
        matches!(self, ClientRole::Bridge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_exemptions() {
        assert!(!Capability::Member.is_camera_exempt());
        assert!(Capability::Admin.is_camera_exempt());
        assert!(Capability::AllowedUser.is_camera_exempt());
        assert!(Capability::Owner.is_camera_exempt());

        assert!(Capability::Member.counts_as_audience());
        assert!(Capability::Admin.counts_as_audience());
        assert!(!Capability::Owner.counts_as_audience());
        assert!(!Capability::AllowedUser.counts_as_audience());
    }

    #[test]
    fn timeout_record_activity() {
        let applied_at = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut record = TimeoutRecord {
            user_id: UserId::new(9),
            applied_at,
            duration_secs: 300,
            reason: "camera off".into(),
            moderator: "AutoMod".into(),
            removed_at: None,
            removed_by: None,
        };

        assert!(record.is_active(applied_at + chrono::Duration::seconds(299)));
        assert!(!record.is_active(applied_at + chrono::Duration::seconds(300)));

        record.removed_at = Some(applied_at + chrono::Duration::seconds(10));
        assert!(!record.is_active(applied_at + chrono::Duration::seconds(20)));
    }

    #[test]
    fn gateway_action_wire_format() {
        let action = GatewayAction::ApplyTimeout {
            user_id: UserId::new(5),
            duration_secs: 300,
            reason: "camera off".into(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "apply_timeout");
        assert_eq!(json["user_id"], 5);
        assert_eq!(action.target(), Some(UserId::new(5)));
    }

    #[test]
    fn action_outcome_parses_failure() {
        let json = r#"{"status":"failed","failure":"permission_denied","message":"missing permission"}"#;
        let outcome: ActionOutcome = serde_json::from_str(json).unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Failed {
                failure: ActionFailure::PermissionDenied,
                message: "missing permission".into()
            }
        );
    }
}
