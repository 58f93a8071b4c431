//! Event types for camguardd -> client streaming

use camguard_util::{ActionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BrowserSession, GatewayAction, Leaderboard, TimeoutRecord, ViolationEvent, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: camguard_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// The bridge must perform `action` and answer with `action_result`
    ActionRequested {
        action_id: ActionId,
        action: GatewayAction,
    },

    ViolationRecorded(ViolationEvent),

    TimeoutApplied(TimeoutRecord),

    TimeoutRemoved(TimeoutRecord),

    /// The stream was paused because no audience member had a camera on
    StreamAutoPaused,

    LeaderboardPublished(Leaderboard),

    ModerationChanged { enabled: bool },

    AutoPauseChanged { enabled: bool },

    HushChanged { enabled: bool },

    ViolationsReset { target: Option<UserId> },

    StatsCleared,

    BrowserHealthChanged(BrowserSession),

    /// Browser relaunch budget exhausted; operator attention required
    BrowserAlert { message: String, restart_count: u32 },

    /// Service is shutting down
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BrowserHealth;

    #[test]
    fn action_requested_wire_format() {
        let event = Event::new(EventPayload::ActionRequested {
            action_id: ActionId::new(),
            action: GatewayAction::Mute {
                user_id: UserId::new(11),
                muted: true,
            },
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "action_requested");
        assert_eq!(json["payload"]["action"]["action"], "mute");
        assert_eq!(json["payload"]["action"]["muted"], true);

        let parsed: Event = serde_json::from_value(json).unwrap();
        assert!(matches!(parsed.payload, EventPayload::ActionRequested { .. }));
    }

    #[test]
    fn browser_alert_serialization() {
        let event = Event::new(EventPayload::BrowserHealthChanged(BrowserSession {
            health_status: BrowserHealth::Crashed,
            last_health_check_time: None,
            restart_count: 2,
        }));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("browser_health_changed"));
        assert!(json.contains("crashed"));
    }
}
