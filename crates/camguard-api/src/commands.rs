//! Command types for the camguardd protocol

use camguard_util::{ActionId, ChannelId, ClientId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ActionOutcome, ClientRole, ControlOp, HealthStatus, Leaderboard, MemberInfo, TimeoutRecord,
    VoiceMember, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    PermissionDenied,
    /// Member must be in a monitored channel with camera on
    NotPresent,
    CooldownActive,
    /// Browser session crashed and needs manual relaunch
    AutomationUnavailable,
    AutomationBusy,
    AutomationFailed,
    GatewayError,
    UnknownAction,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // Gateway events (bridge only)

    /// A member's voice state changed. Carries the new state; a `None`
    /// channel means the member disconnected from voice.
    VoiceStateUpdate {
        member: MemberInfo,
        channel_id: Option<ChannelId>,
        #[serde(default)]
        camera_on: bool,
    },

    /// A member's roles or communication timeout changed
    MemberUpdate {
        member: MemberInfo,
        #[serde(default)]
        timed_out_until: Option<DateTime<Utc>>,
        /// Moderator responsible for a timeout change, from the audit log
        #[serde(default)]
        moderator: Option<String>,
    },

    /// A message was posted; `command` is the bot command it invoked, if any
    Message {
        member: MemberInfo,
        #[serde(default)]
        command: Option<String>,
    },

    /// Full voice roster of the monitored and punishment channels, sent by
    /// the bridge when it (re)connects
    PresenceSync { members: Vec<VoiceMember> },

    /// Reply to an `action_requested` event
    ActionResult {
        action_id: ActionId,
        outcome: ActionOutcome,
    },

    // Member commands

    /// Drive the stream (skip, refresh, start, pause)
    Control { actor: MemberInfo, op: ControlOp },

    // Admin commands

    SetModeration { actor: MemberInfo, enabled: bool },

    SetAutoPause { actor: MemberInfo, enabled: bool },

    /// While hushed, members are not unmuted when their camera turns on.
    /// `deafen` hushes with a server deafen as well.
    SetHush {
        actor: MemberInfo,
        enabled: bool,
        #[serde(default)]
        deafen: bool,
    },

    /// Bar a member from running commands, or allow them back
    SetUserDisabled {
        actor: MemberInfo,
        target: MemberInfo,
        disabled: bool,
    },

    /// Discard the current period's stats
    ClearStats { actor: MemberInfo },

    /// Reset violation counts for one member, or everyone if `target` is None
    ResetViolations {
        actor: MemberInfo,
        target: Option<UserId>,
    },

    /// Lift active timeouts for one member, or everyone if `target` is None
    RemoveTimeouts {
        actor: MemberInfo,
        target: Option<UserId>,
    },

    /// Retry launching the browser after it was marked crashed
    RelaunchBrowser { actor: MemberInfo },

    // Queries

    /// Leaderboard for the current period so far
    GetStats,

    /// Currently active timeouts
    GetTimeouts,

    GetHealth,

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    UnsubscribeEvents,

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Commands that only the gateway bridge may send
    pub fn requires_bridge(&self) -> bool {
        !matches!(
            self,
            Command::GetStats
                | Command::GetTimeouts
                | Command::GetHealth
                | Command::SubscribeEvents
                | Command::UnsubscribeEvents
                | Command::Ping
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// Gateway event accepted
    Accepted,
    ControlDone { op: ControlOp },
    ModerationSet { enabled: bool },
    AutoPauseSet { enabled: bool },
    HushSet { enabled: bool },
    /// `changed` is false when the member already had that status
    UserDisabledSet {
        user_id: UserId,
        disabled: bool,
        changed: bool,
    },
    StatsCleared,
    ViolationsReset { users_cleared: usize },
    TimeoutsRemoved {
        removed: Vec<UserId>,
        failed: Vec<UserId>,
    },
    BrowserRelaunched,
    Stats(Leaderboard),
    Timeouts { active: Vec<TimeoutRecord> },
    Health(HealthStatus),
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
