//! Core events emitted by the engine

use camguard_api::{GatewayAction, Leaderboard, TimeoutRecord, ViolationAction, ViolationEvent};
use camguard_util::UserId;
use chrono::{DateTime, Utc};

/// Who asked for a gateway action; decides how its outcome is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOrigin {
    /// Mute, deafen and notices driven by presence changes
    Presence,
    /// Punishment for a recorded violation
    Violation {
        user_id: UserId,
        action: ViolationAction,
    },
    /// Issued on behalf of a staff member
    Admin { actor: UserId },
}

/// Events emitted by the core engine
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// Start (or replace) the grace timer for a user
    ArmComplianceTimer {
        user_id: UserId,
        generation: u64,
        deadline: DateTime<Utc>,
    },

    /// Stop the user's grace timer, if any
    CancelComplianceTimer { user_id: UserId },

    /// Perform a gateway call; report its outcome back to the engine
    Dispatch {
        action: GatewayAction,
        origin: ActionOrigin,
    },

    ViolationRecorded(ViolationEvent),

    /// The camera-on audience emptied; pause the stream
    PauseStream,

    TimeoutApplied(TimeoutRecord),

    TimeoutRemoved(TimeoutRecord),

    /// A stats period closed
    LeaderboardPublished(Leaderboard),

    ModerationChanged { enabled: bool },

    AutoPauseChanged { enabled: bool },

    HushChanged { enabled: bool },

    ViolationsReset { target: Option<UserId> },

    /// Current-period stats were discarded by staff
    StatsCleared,
}
