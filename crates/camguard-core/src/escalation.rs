//! Graduated punishment ladder

use camguard_api::{GatewayAction, ViolationAction, ViolationEvent};
use camguard_config::ModerationPolicy;
use camguard_util::{ChannelId, format_duration};

/// Action for a user who already has `prior` violations on record
pub fn escalate(prior: u32) -> ViolationAction {
    match prior {
        0 => ViolationAction::Moved,
        1 => ViolationAction::TimeoutShort,
        _ => ViolationAction::TimeoutLong,
    }
}

/// Gateway call carrying out the punishment for `event`
pub fn punishment_action(
    event: &ViolationEvent,
    moderation: &ModerationPolicy,
    punishment_channel: ChannelId,
) -> GatewayAction {
    let reason = format!("Camera off in VC (violation #{})", event.violation_number);
    match event.action_taken {
        ViolationAction::Moved => GatewayAction::MoveMember {
            user_id: event.user_id,
            channel_id: punishment_channel,
        },
        ViolationAction::TimeoutShort => GatewayAction::ApplyTimeout {
            user_id: event.user_id,
            duration_secs: moderation.short_timeout.as_secs(),
            reason,
        },
        ViolationAction::TimeoutLong => GatewayAction::ApplyTimeout {
            user_id: event.user_id,
            duration_secs: moderation.long_timeout.as_secs(),
            reason,
        },
    }
}

/// Direct message sent to the punished user
pub fn violation_dm(action: ViolationAction, moderation: &ModerationPolicy) -> String {
    match action {
        ViolationAction::Moved => {
            "You've been moved for not having a camera on in the VC.".to_string()
        }
        ViolationAction::TimeoutShort => format!(
            "You've been timed out for {} for not having a camera on in the VC.",
            format_duration(moderation.short_timeout)
        ),
        ViolationAction::TimeoutLong => format!(
            "You've been timed out for {} for not having a camera on in the VC.",
            format_duration(moderation.long_timeout)
        ),
    }
}

/// Public notice posted to the chat channel
pub fn violation_notice(label: &str, event: &ViolationEvent, moderation: &ModerationPolicy) -> String {
    let what = match event.action_taken {
        ViolationAction::Moved => "was moved out of the VC".to_string(),
        ViolationAction::TimeoutShort => {
            format!("was timed out for {}", format_duration(moderation.short_timeout))
        }
        ViolationAction::TimeoutLong => {
            format!("was timed out for {}", format_duration(moderation.long_timeout))
        }
    };
    format!(
        "{} {} for not having a camera on (violation #{}).",
        label, what, event.violation_number
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use camguard_config::Policy;
    use camguard_util::UserId;
    use chrono::Utc;

    fn event(n: u32) -> ViolationEvent {
        ViolationEvent {
            user_id: UserId::new(9),
            timestamp: Utc::now(),
            violation_number: n,
            action_taken: escalate(n - 1),
        }
    }

    #[test]
    fn test_ladder() {
        assert_eq!(escalate(0), ViolationAction::Moved);
        assert_eq!(escalate(1), ViolationAction::TimeoutShort);
        assert_eq!(escalate(2), ViolationAction::TimeoutLong);
        assert_eq!(escalate(17), ViolationAction::TimeoutLong);
    }

    #[test]
    fn test_punishment_actions_use_policy_durations() {
        let policy = Policy::with_channels(vec![ChannelId::new(1)], ChannelId::new(2));

        assert_eq!(
            punishment_action(&event(1), &policy.moderation, ChannelId::new(2)),
            GatewayAction::MoveMember {
                user_id: UserId::new(9),
                channel_id: ChannelId::new(2)
            }
        );
        assert!(matches!(
            punishment_action(&event(2), &policy.moderation, ChannelId::new(2)),
            GatewayAction::ApplyTimeout { duration_secs: 300, .. }
        ));
        assert!(matches!(
            punishment_action(&event(5), &policy.moderation, ChannelId::new(2)),
            GatewayAction::ApplyTimeout { duration_secs: 900, .. }
        ));
    }

    #[test]
    fn test_messages() {
        let policy = Policy::with_channels(vec![ChannelId::new(1)], ChannelId::new(2));
        assert_eq!(
            violation_dm(ViolationAction::TimeoutShort, &policy.moderation),
            "You've been timed out for 5m 0s for not having a camera on in the VC."
        );
        assert_eq!(
            violation_notice("alice", &event(1), &policy.moderation),
            "alice was moved out of the VC for not having a camera on (violation #1)."
        );
    }
}
