//! Per-user camera compliance state machine

use camguard_api::Capability;
use camguard_util::{ChannelId, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Enforcement state of a member present in a monitored channel.
/// Absence from the monitor is the `NotPresent` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    /// Camera on, or exempt
    Compliant,
    /// Camera off, grace timer running
    NonCompliant,
    /// Grace expired and a violation was issued for this episode
    Punished,
    /// Camera off while moderation is disabled
    Unenforced,
}

/// What the monitor knows about one present member
#[derive(Debug, Clone)]
pub struct UserPresenceRecord {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub channel_id: ChannelId,
    pub capability: Capability,
    pub exempt: bool,
    pub is_bot: bool,
    pub camera_on: bool,
    pub vc_join_time: DateTime<Utc>,
    pub non_compliant_since: Option<DateTime<Utc>>,
    pub state: PresenceState,
}

impl UserPresenceRecord {
    /// Counts toward the camera-on audience watched by auto-pause
    pub fn is_compliant_audience(&self) -> bool {
        self.camera_on && !self.is_bot && self.capability.counts_as_audience()
    }

    /// Server-muted by the monitor
    pub fn is_silenced(&self) -> bool {
        matches!(
            self.state,
            PresenceState::NonCompliant | PresenceState::Punished
        )
    }
}

/// A voice state as seen by the monitor. `channel_id` is only set when the
/// member is in a monitored channel.
#[derive(Debug, Clone)]
pub struct VoiceObservation {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub camera_on: bool,
    pub capability: Capability,
    pub exempt: bool,
    pub is_bot: bool,
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEffect {
    Joined {
        user_id: UserId,
        channel_id: ChannelId,
    },
    Left {
        user_id: UserId,
        joined_at: DateTime<Utc>,
    },
    ArmTimer {
        user_id: UserId,
        generation: u64,
        deadline: DateTime<Utc>,
    },
    CancelTimer {
        user_id: UserId,
    },
    /// Server mute and deafen
    Silence {
        user_id: UserId,
    },
    /// Lift server mute and deafen
    Restore {
        user_id: UserId,
    },
    /// Grace expired; exactly one per episode
    Violation {
        user_id: UserId,
    },
}

/// Owns every `UserPresenceRecord`.
///
/// Each grace timer carries the generation current when it was armed. Any
/// transition out of `NonCompliant` bumps the generation, so a timer that
/// fires afterwards no longer matches and is dropped.
#[derive(Debug)]
pub struct PresenceMonitor {
    records: HashMap<UserId, UserPresenceRecord>,
    generations: HashMap<UserId, u64>,
    grace_period: Duration,
    moderation_enabled: bool,
}

impl PresenceMonitor {
    pub fn new(grace_period: Duration, moderation_enabled: bool) -> Self {
        Self {
            records: HashMap::new(),
            generations: HashMap::new(),
            grace_period,
            moderation_enabled,
        }
    }

    pub fn moderation_enabled(&self) -> bool {
        self.moderation_enabled
    }

    pub fn record(&self, user_id: UserId) -> Option<&UserPresenceRecord> {
        self.records.get(&user_id)
    }

    pub fn state(&self, user_id: UserId) -> Option<PresenceState> {
        self.records.get(&user_id).map(|r| r.state)
    }

    pub fn records(&self) -> impl Iterator<Item = &UserPresenceRecord> {
        self.records.values()
    }

    pub fn present_count(&self) -> usize {
        self.records.len()
    }

    /// Members with camera on that count as audience
    pub fn compliant_audience(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.is_compliant_audience())
            .count()
    }

    /// Current generation for `user_id`
    pub fn generation(&self, user_id: UserId) -> u64 {
        self.generations.get(&user_id).copied().unwrap_or(0)
    }

    fn bump_generation(&mut self, user_id: UserId) -> u64 {
        let generation = self.generations.entry(user_id).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Apply a voice state observation
    pub fn observe(
        &mut self,
        obs: VoiceObservation,
        now: DateTime<Utc>,
        out: &mut Vec<PresenceEffect>,
    ) {
        match (self.records.contains_key(&obs.user_id), obs.channel_id) {
            (false, None) => {}
            (false, Some(channel_id)) => self.join(obs, channel_id, now, out),
            (true, None) => self.leave(obs.user_id, out),
            (true, Some(channel_id)) => {
                if let Some(record) = self.records.get_mut(&obs.user_id) {
                    record.channel_id = channel_id;
                    record.camera_on = obs.camera_on;
                    record.capability = obs.capability;
                    record.exempt = obs.exempt;
                    record.is_bot = obs.is_bot;
                    if obs.display_name.is_some() {
                        record.display_name = obs.display_name;
                    }
                }
                self.evaluate(obs.user_id, now, out);
            }
        }
    }

    fn join(
        &mut self,
        obs: VoiceObservation,
        channel_id: ChannelId,
        now: DateTime<Utc>,
        out: &mut Vec<PresenceEffect>,
    ) {
        debug!(user_id = %obs.user_id, channel_id = %channel_id, camera_on = obs.camera_on, "Member joined monitored channel");
        let user_id = obs.user_id;
        self.records.insert(
            user_id,
            UserPresenceRecord {
                user_id,
                display_name: obs.display_name,
                channel_id,
                capability: obs.capability,
                exempt: obs.exempt,
                is_bot: obs.is_bot,
                camera_on: obs.camera_on,
                vc_join_time: now,
                non_compliant_since: None,
                // Settled by evaluate below
                state: PresenceState::Compliant,
            },
        );
        out.push(PresenceEffect::Joined {
            user_id,
            channel_id,
        });
        self.evaluate(user_id, now, out);
    }

    fn leave(&mut self, user_id: UserId, out: &mut Vec<PresenceEffect>) {
        let Some(record) = self.records.remove(&user_id) else {
            return;
        };
        debug!(user_id = %user_id, state = ?record.state, "Member left monitored channels");
        if record.state == PresenceState::NonCompliant {
            self.bump_generation(user_id);
            out.push(PresenceEffect::CancelTimer { user_id });
        }
        out.push(PresenceEffect::Left {
            user_id,
            joined_at: record.vc_join_time,
        });
    }

    /// Move the record to the state its camera, exemption and the moderation
    /// switch call for.
    fn evaluate(&mut self, user_id: UserId, now: DateTime<Utc>, out: &mut Vec<PresenceEffect>) {
        let Some(record) = self.records.get(&user_id) else {
            return;
        };
        let current = record.state;
        let satisfied = record.exempt || record.camera_on;

        if satisfied {
            match current {
                PresenceState::Compliant => {}
                PresenceState::NonCompliant => {
                    self.bump_generation(user_id);
                    out.push(PresenceEffect::CancelTimer { user_id });
                    out.push(PresenceEffect::Restore { user_id });
                }
                PresenceState::Punished => out.push(PresenceEffect::Restore { user_id }),
                PresenceState::Unenforced => {}
            }
            self.set_state(user_id, PresenceState::Compliant, None);
        } else if self.moderation_enabled {
            match current {
                PresenceState::Compliant | PresenceState::Unenforced => {
                    self.start_episode(user_id, now, out);
                }
                PresenceState::NonCompliant | PresenceState::Punished => {}
            }
        } else {
            self.set_state(user_id, PresenceState::Unenforced, None);
        }
    }

    fn start_episode(&mut self, user_id: UserId, now: DateTime<Utc>, out: &mut Vec<PresenceEffect>) {
        let generation = self.bump_generation(user_id);
        let grace = chrono::Duration::from_std(self.grace_period)
            .unwrap_or_else(|_| chrono::Duration::seconds(15));
        self.set_state(user_id, PresenceState::NonCompliant, Some(now));
        out.push(PresenceEffect::Silence { user_id });
        out.push(PresenceEffect::ArmTimer {
            user_id,
            generation,
            deadline: now + grace,
        });
    }

    fn set_state(
        &mut self,
        user_id: UserId,
        state: PresenceState,
        non_compliant_since: Option<DateTime<Utc>>,
    ) {
        if let Some(record) = self.records.get_mut(&user_id) {
            record.state = state;
            record.non_compliant_since = non_compliant_since;
        }
    }

    /// A grace timer fired. Returns true if it produced a violation.
    pub fn on_timer_fired(
        &mut self,
        user_id: UserId,
        generation: u64,
        out: &mut Vec<PresenceEffect>,
    ) -> bool {
        if generation != self.generation(user_id) {
            debug!(user_id = %user_id, generation, "Discarding stale compliance timer");
            return false;
        }
        let live = self
            .records
            .get(&user_id)
            .is_some_and(|r| r.state == PresenceState::NonCompliant);
        if !live || !self.moderation_enabled {
            debug!(user_id = %user_id, "Compliance timer fired outside an episode");
            return false;
        }

        self.bump_generation(user_id);
        self.set_state(user_id, PresenceState::Punished, None);
        out.push(PresenceEffect::Violation { user_id });
        true
    }

    /// Switch enforcement on or off for everyone present
    pub fn set_moderation(
        &mut self,
        enabled: bool,
        now: DateTime<Utc>,
        out: &mut Vec<PresenceEffect>,
    ) {
        if self.moderation_enabled == enabled {
            return;
        }
        self.moderation_enabled = enabled;

        let mut users: Vec<UserId> = self.records.keys().copied().collect();
        users.sort();
        for user_id in users {
            let Some(state) = self.state(user_id) else {
                continue;
            };
            if enabled {
                if state == PresenceState::Unenforced {
                    self.start_episode(user_id, now, out);
                }
            } else {
                match state {
                    PresenceState::NonCompliant => {
                        self.bump_generation(user_id);
                        out.push(PresenceEffect::CancelTimer { user_id });
                        out.push(PresenceEffect::Restore { user_id });
                    }
                    PresenceState::Punished => out.push(PresenceEffect::Restore { user_id }),
                    PresenceState::Compliant | PresenceState::Unenforced => continue,
                }
                self.set_state(user_id, PresenceState::Unenforced, None);
            }
        }
    }

    /// Users currently tracked, sorted for deterministic iteration
    pub fn present_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.records.keys().copied().collect();
        users.sort();
        users
    }
}
