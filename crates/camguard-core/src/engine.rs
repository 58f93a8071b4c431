//! Core moderation engine

use camguard_api::{
    BrowserSession, Capability, ControlOp, GatewayAction, HealthStatus, Leaderboard, MemberInfo,
    TimeoutRecord, ViolationEvent, VoiceMember,
};
use camguard_config::Policy;
use camguard_gateway::{GatewayError, GatewayResult};
use camguard_store::{
    AuditEvent, AuditEventType, PersistedState, PersistentStateStore, StatsSnapshot, StoreResult,
};
use camguard_util::{
    CamguardError, ChannelId, CooldownGate, MonotonicInstant, Result, UserId, elapsed_secs,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::{
    ActionOrigin, AutoPauseController, CoreEvent, PresenceEffect, PresenceMonitor,
    StatsAggregator, VoiceObservation, escalate, punishment_action, violation_dm,
    violation_notice,
};

/// Moderator name recorded for timeouts issued by the engine
pub const AUTOMOD_MODERATOR: &str = "AutoMod";

/// Chat notice posted when the stream is paused for lack of viewers
pub const AUTO_PAUSE_NOTICE: &str = "Stream automatically paused";

/// The core moderation engine.
///
/// All methods take the current wall-clock time explicitly and return the
/// side effects the daemon must carry out. Nothing here blocks or performs
/// IO apart from flushing the state store.
pub struct CoreEngine {
    policy: Policy,
    store: PersistentStateStore,
    presence: PresenceMonitor,
    auto_pause: AutoPauseController,
    stats: StatsAggregator,
    cooldowns: CooldownGate,
    hush: bool,
    hush_deafen: bool,
    /// Violation timeouts dispatched and not confirmed yet
    pending_auto_timeouts: HashSet<UserId>,
    /// Members who left voice while server-muted by the monitor
    lingering_silence: HashSet<UserId>,
}

impl CoreEngine {
    /// Create a new core engine. Feature toggles saved by a previous run
    /// take precedence over the configured defaults.
    pub fn new(policy: Policy, mut store: PersistentStateStore, now: DateTime<Utc>) -> Self {
        let toggles = store.state().toggles.clone();
        let moderation_enabled = toggles
            .moderation_enabled
            .unwrap_or(policy.moderation.enabled);
        let auto_pause_enabled = toggles
            .auto_pause_enabled
            .unwrap_or(policy.auto_pause.enabled);

        info!(
            monitored_channels = policy.channels.monitored.len(),
            moderation_enabled,
            auto_pause_enabled,
            hush = toggles.hush,
            "Core engine initialized"
        );

        store
            .state_mut()
            .record_audit(AuditEvent::new(now, AuditEventType::ServiceStarted));

        Self {
            presence: PresenceMonitor::new(policy.moderation.grace_period, moderation_enabled),
            auto_pause: AutoPauseController::new(auto_pause_enabled),
            stats: StatsAggregator::new(&policy.stats, policy.roles.stats_excluded.clone()),
            cooldowns: CooldownGate::new(policy.commands.cooldown),
            hush: toggles.hush,
            hush_deafen: toggles.hush && toggles.hush_deafen,
            pending_auto_timeouts: HashSet::new(),
            lingering_silence: HashSet::new(),
            policy,
            store,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn presence(&self) -> &PresenceMonitor {
        &self.presence
    }

    pub fn state(&self) -> &PersistedState {
        self.store.state()
    }

    pub fn is_hushed(&self) -> bool {
        self.hush
    }

    /// A member's voice state changed. `channel_id` is the member's current
    /// voice channel (None when disconnected), monitored or not.
    pub fn handle_voice_state(
        &mut self,
        member: &MemberInfo,
        channel_id: Option<ChannelId>,
        camera_on: bool,
        now: DateTime<Utc>,
    ) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        self.apply_voice_state(member, channel_id, camera_on, now, &mut events);
        self.check_auto_pause(now, &mut events);
        events
    }

    fn apply_voice_state(
        &mut self,
        member: &MemberInfo,
        channel_id: Option<ChannelId>,
        camera_on: bool,
        now: DateTime<Utc>,
        events: &mut Vec<CoreEvent>,
    ) {
        let user_id = member.user_id;
        let was_silenced = self
            .presence
            .record(user_id)
            .is_some_and(|r| r.is_silenced());
        let lingering = self.lingering_silence.remove(&user_id);

        let observation = self.observation(member, channel_id, camera_on);
        let mut effects = Vec::new();
        self.presence.observe(observation, now, &mut effects);
        self.apply_effects(effects, now, events);

        // The monitor lifts the mute it applied wherever the member goes.
        // A member who disconnected cannot be unmuted until they are back.
        let silenced_before = was_silenced || lingering;
        match (channel_id, self.presence.record(user_id)) {
            (None, _) => {
                if silenced_before {
                    self.lingering_silence.insert(user_id);
                }
            }
            (Some(channel_id), None) => {
                if silenced_before {
                    debug!(user_id = %user_id, channel_id = %channel_id, "Member left monitored channels, restoring voice");
                    push_voice(user_id, false, false, events);
                }
            }
            (Some(_), Some(record)) => {
                if lingering && !record.is_silenced() {
                    push_voice(
                        user_id,
                        self.hush_applies(user_id),
                        self.hush_deafens(user_id),
                        events,
                    );
                }
            }
        }
    }

    fn observation(
        &self,
        member: &MemberInfo,
        channel_id: Option<ChannelId>,
        camera_on: bool,
    ) -> VoiceObservation {
        let capability = self.policy.roles.resolve(member);
        let is_bot = self.policy.roles.is_exempt_bot(member);
        VoiceObservation {
            user_id: member.user_id,
            display_name: member.display_name.clone(),
            channel_id: channel_id.filter(|c| self.policy.channels.is_monitored(*c)),
            camera_on,
            capability,
            exempt: is_bot || capability.is_camera_exempt(),
            is_bot,
        }
    }

    fn apply_effects(
        &mut self,
        effects: Vec<PresenceEffect>,
        now: DateTime<Utc>,
        events: &mut Vec<CoreEvent>,
    ) {
        for effect in effects {
            match effect {
                PresenceEffect::Joined {
                    user_id,
                    channel_id,
                } => {
                    let is_bot = self.presence.record(user_id).is_some_and(|r| r.is_bot);
                    let state = self.store.state_mut();
                    if !is_bot {
                        self.stats.session_started(state, user_id, now);
                    }
                    state.record_audit(AuditEvent::new(
                        now,
                        AuditEventType::Joined {
                            user_id,
                            channel_id,
                        },
                    ));

                    let hush_applies = self
                        .presence
                        .record(user_id)
                        .is_some_and(|r| !r.exempt && !r.is_silenced());
                    if self.hush && hush_applies {
                        events.push(CoreEvent::Dispatch {
                            action: GatewayAction::Mute {
                                user_id,
                                muted: true,
                            },
                            origin: ActionOrigin::Presence,
                        });
                        if self.hush_deafen {
                            events.push(CoreEvent::Dispatch {
                                action: GatewayAction::Deafen {
                                    user_id,
                                    deafened: true,
                                },
                                origin: ActionOrigin::Presence,
                            });
                        }
                    }
                }
                PresenceEffect::Left { user_id, joined_at } => {
                    let state = self.store.state_mut();
                    let vc_seconds = self
                        .stats
                        .session_ended(state, user_id, now)
                        .unwrap_or(0);
                    state.record_audit(AuditEvent::new(
                        now,
                        AuditEventType::Left {
                            user_id,
                            vc_seconds,
                        },
                    ));
                    debug!(user_id = %user_id, joined_at = %joined_at, vc_seconds, "Session closed");
                }
                PresenceEffect::ArmTimer {
                    user_id,
                    generation,
                    deadline,
                } => events.push(CoreEvent::ArmComplianceTimer {
                    user_id,
                    generation,
                    deadline,
                }),
                PresenceEffect::CancelTimer { user_id } => {
                    events.push(CoreEvent::CancelComplianceTimer { user_id })
                }
                PresenceEffect::Silence { user_id } => push_voice(user_id, true, true, events),
                PresenceEffect::Restore { user_id } => {
                    let stay_muted = self.hush_applies(user_id);
                    let stay_deafened = self.hush_deafens(user_id);
                    push_voice(user_id, stay_muted, stay_deafened, events);
                }
                PresenceEffect::Violation { user_id } => {
                    self.record_violation(user_id, now, events)
                }
            }
        }
    }

    /// Hush keeps a present, non-exempt member muted
    fn hush_applies(&self, user_id: UserId) -> bool {
        self.hush
            && self
                .presence
                .record(user_id)
                .is_some_and(|r| !r.exempt)
    }

    fn hush_deafens(&self, user_id: UserId) -> bool {
        self.hush_deafen && self.hush_applies(user_id)
    }

    fn record_violation(&mut self, user_id: UserId, now: DateTime<Utc>, events: &mut Vec<CoreEvent>) {
        let label = self
            .presence
            .record(user_id)
            .and_then(|r| r.display_name.clone())
            .unwrap_or_else(|| user_id.to_string());

        let state = self.store.state_mut();
        let prior = state.violation_count(user_id);
        let event = ViolationEvent {
            user_id,
            timestamp: now,
            violation_number: prior.saturating_add(1),
            action_taken: escalate(prior),
        };
        state.violations.insert(user_id, event.violation_number);
        self.stats.record_violation(state, user_id);
        state.record_audit(AuditEvent::violation(&event));
        let dms_open = !state.dms_disabled.contains(&user_id);

        info!(
            user_id = %user_id,
            violation_number = event.violation_number,
            action = event.action_taken.as_str(),
            "Camera violation recorded"
        );

        let origin = ActionOrigin::Violation {
            user_id,
            action: event.action_taken,
        };
        let punishment = punishment_action(
            &event,
            &self.policy.moderation,
            self.policy.channels.punishment,
        );
        // The platform may report the timeout before the gateway confirms it
        if matches!(punishment, GatewayAction::ApplyTimeout { .. }) {
            self.pending_auto_timeouts.insert(user_id);
        }
        events.push(CoreEvent::ViolationRecorded(event.clone()));
        events.push(CoreEvent::Dispatch {
            action: punishment,
            origin,
        });
        if dms_open {
            events.push(CoreEvent::Dispatch {
                action: GatewayAction::SendDirectMessage {
                    user_id,
                    content: violation_dm(event.action_taken, &self.policy.moderation),
                },
                origin,
            });
        }
        if let Some(chat) = self.policy.channels.chat {
            events.push(CoreEvent::Dispatch {
                action: GatewayAction::SendChannelMessage {
                    channel_id: chat,
                    content: violation_notice(&label, &event, &self.policy.moderation),
                },
                origin,
            });
        }
    }

    fn check_auto_pause(&mut self, now: DateTime<Utc>, events: &mut Vec<CoreEvent>) {
        if !self.auto_pause.observe(self.presence.compliant_audience()) {
            return;
        }
        self.store
            .state_mut()
            .record_audit(AuditEvent::new(now, AuditEventType::StreamAutoPaused));
        events.push(CoreEvent::PauseStream);
        if let Some(chat) = self.policy.channels.chat {
            events.push(CoreEvent::Dispatch {
                action: GatewayAction::SendChannelMessage {
                    channel_id: chat,
                    content: AUTO_PAUSE_NOTICE.to_string(),
                },
                origin: ActionOrigin::Presence,
            });
        }
    }

    /// A member's roles or timeout changed.
    ///
    /// `timed_out_until` is the platform's current timeout end for the
    /// member. Timeouts not issued by the engine are tracked as manual ones.
    pub fn handle_member_update(
        &mut self,
        member: &MemberInfo,
        timed_out_until: Option<DateTime<Utc>>,
        moderator: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<CoreEvent> {
        let user_id = member.user_id;
        let mut events = Vec::new();

        // Role changes can grant or revoke the camera exemption
        if let Some(record) = self.presence.record(user_id) {
            let (channel_id, camera_on) = (record.channel_id, record.camera_on);
            let observation = self.observation(member, Some(channel_id), camera_on);
            let mut effects = Vec::new();
            self.presence.observe(observation, now, &mut effects);
            self.apply_effects(effects, now, &mut events);
        }

        let until = timed_out_until.filter(|until| *until > now);
        let tracked = self
            .store
            .state()
            .active_timeouts
            .get(&user_id)
            .is_some_and(|t| t.is_active(now));

        match (until, tracked) {
            (Some(_), false) if self.pending_auto_timeouts.contains(&user_id) => {
                debug!(user_id = %user_id, "Timeout reported before its confirmation, waiting for it");
            }
            (Some(until), false) => {
                let record = TimeoutRecord {
                    user_id,
                    applied_at: now,
                    duration_secs: elapsed_secs(now, until),
                    reason: "Manual timeout".to_string(),
                    moderator: moderator.unwrap_or_else(|| "unknown".to_string()),
                    removed_at: None,
                    removed_by: None,
                };
                info!(user_id = %user_id, moderator = %record.moderator, duration_secs = record.duration_secs, "Manual timeout tracked");
                self.track_timeout(record.clone(), now);
                events.push(CoreEvent::TimeoutApplied(record));
            }
            (None, true) => {
                let removed_by = moderator.unwrap_or_else(|| "unknown".to_string());
                if let Some(record) = self.close_timeout(user_id, now, removed_by) {
                    events.push(CoreEvent::TimeoutRemoved(record));
                }
            }
            _ => {}
        }

        self.check_auto_pause(now, &mut events);
        events
    }

    fn track_timeout(&mut self, record: TimeoutRecord, now: DateTime<Utc>) {
        let state = self.store.state_mut();
        state.record_audit(AuditEvent::new(
            now,
            AuditEventType::TimeoutApplied {
                user_id: record.user_id,
                duration_secs: record.duration_secs,
                moderator: record.moderator.clone(),
            },
        ));
        state.active_timeouts.insert(record.user_id, record);
    }

    fn close_timeout(
        &mut self,
        user_id: UserId,
        at: DateTime<Utc>,
        removed_by: String,
    ) -> Option<TimeoutRecord> {
        let state = self.store.state_mut();
        let record = state.close_timeout(user_id, at, Some(removed_by.clone()))?;
        state.record_audit(AuditEvent::new(
            at,
            AuditEventType::TimeoutRemoved {
                user_id,
                removed_by: Some(removed_by),
            },
        ));
        info!(user_id = %user_id, removed_by = ?record.removed_by, "Timeout closed");
        Some(record)
    }

    /// A chat message was seen; counts command usage
    pub fn handle_message(&mut self, member: &MemberInfo, command: Option<&str>) {
        if self.policy.roles.is_exempt_bot(member) {
            return;
        }
        if let Some(command) = command {
            self.stats
                .record_command(self.store.state_mut(), member.user_id, command);
        }
    }

    /// Full voice roster from the gateway, sent on (re)connect.
    ///
    /// Members still present keep their stored accounting start. Stored
    /// sessions of members no longer present are closed at the time the
    /// state was last saved.
    pub fn handle_presence_sync(
        &mut self,
        members: &[VoiceMember],
        now: DateTime<Utc>,
    ) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        let roster: HashSet<UserId> = members
            .iter()
            .filter(|m| self.policy.channels.is_monitored(m.channel_id))
            .map(|m| m.member.user_id)
            .collect();

        for user_id in self.presence.present_users() {
            if !roster.contains(&user_id) {
                if self
                    .presence
                    .record(user_id)
                    .is_some_and(|r| r.is_silenced())
                {
                    self.lingering_silence.insert(user_id);
                }
                let mut effects = Vec::new();
                self.presence.observe(
                    VoiceObservation {
                        user_id,
                        display_name: None,
                        channel_id: None,
                        camera_on: false,
                        capability: Capability::Member,
                        exempt: false,
                        is_bot: false,
                    },
                    now,
                    &mut effects,
                );
                self.apply_effects(effects, now, &mut events);
            }
        }

        for m in members {
            self.apply_voice_state(&m.member, Some(m.channel_id), m.camera_on, now, &mut events);
        }

        let stale: Vec<UserId> = self
            .store
            .state()
            .open_sessions
            .keys()
            .filter(|user_id| self.presence.record(**user_id).is_none())
            .copied()
            .collect();
        if !stale.is_empty() {
            let closed_at = self.store.state().saved_at.unwrap_or(now).min(now);
            let state = self.store.state_mut();
            for user_id in stale {
                let vc_seconds = self
                    .stats
                    .session_ended(state, user_id, closed_at)
                    .unwrap_or(0);
                state.record_audit(AuditEvent::new(
                    closed_at,
                    AuditEventType::Left {
                        user_id,
                        vc_seconds,
                    },
                ));
            }
        }

        info!(
            present = self.presence.present_count(),
            audience = self.presence.compliant_audience(),
            "Presence synchronized"
        );
        self.check_auto_pause(now, &mut events);
        events
    }

    /// A grace timer fired
    pub fn on_timer_fired(
        &mut self,
        user_id: UserId,
        generation: u64,
        now: DateTime<Utc>,
    ) -> Vec<CoreEvent> {
        let mut effects = Vec::new();
        let mut events = Vec::new();
        if self.presence.on_timer_fired(user_id, generation, &mut effects) {
            self.apply_effects(effects, now, &mut events);
        }
        events
    }

    /// The gateway finished (or failed) an action the engine dispatched
    pub fn record_action_outcome(
        &mut self,
        action: &GatewayAction,
        origin: ActionOrigin,
        result: &GatewayResult<()>,
        now: DateTime<Utc>,
    ) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        if let (GatewayAction::ApplyTimeout { user_id, .. }, ActionOrigin::Violation { .. }) =
            (action, origin)
        {
            self.pending_auto_timeouts.remove(user_id);
        }
        match result {
            Ok(()) => match (action, origin) {
                (
                    GatewayAction::ApplyTimeout {
                        user_id,
                        duration_secs,
                        reason,
                    },
                    ActionOrigin::Violation { .. },
                ) => {
                    let record = TimeoutRecord {
                        user_id: *user_id,
                        applied_at: now,
                        duration_secs: *duration_secs,
                        reason: reason.clone(),
                        moderator: AUTOMOD_MODERATOR.to_string(),
                        removed_at: None,
                        removed_by: None,
                    };
                    self.track_timeout(record.clone(), now);
                    events.push(CoreEvent::TimeoutApplied(record));
                }
                (GatewayAction::RemoveTimeout { user_id, .. }, ActionOrigin::Admin { actor }) => {
                    if let Some(record) = self.close_timeout(*user_id, now, actor.to_string()) {
                        events.push(CoreEvent::TimeoutRemoved(record));
                    }
                }
                (GatewayAction::SendDirectMessage { user_id, .. }, _) => {
                    if self.store.state().dms_disabled.contains(user_id) {
                        self.store.state_mut().dms_disabled.remove(user_id);
                    }
                }
                _ => {}
            },
            Err(GatewayError::DirectMessagesDisabled) => {
                if let GatewayAction::SendDirectMessage { user_id, .. } = action {
                    info!(user_id = %user_id, "Direct messages disabled, not messaging again");
                    self.store.state_mut().dms_disabled.insert(*user_id);
                }
            }
            Err(GatewayError::PermissionDenied(message)) => {
                warn!(
                    action = action.name(),
                    target_user = ?action.target(),
                    message = %message,
                    "Gateway refused action"
                );
                self.store.state_mut().record_audit(AuditEvent::new(
                    now,
                    AuditEventType::ActionDenied {
                        user_id: action.target(),
                        action: action.name().to_string(),
                        message: message.clone(),
                    },
                ));
            }
            Err(e) => {
                warn!(action = action.name(), target_user = ?action.target(), error = %e, "Gateway action failed");
            }
        }
        events
    }

    /// Check that `actor` may run stream control `op` now.
    ///
    /// Members must be in a monitored channel with their camera on; staff
    /// skip that check. Everyone is subject to the per-command cooldown.
    pub fn authorize_control(
        &mut self,
        actor: &MemberInfo,
        op: ControlOp,
        now: MonotonicInstant,
    ) -> Result<Capability> {
        let capability = self.policy.roles.resolve(actor);
        self.check_not_disabled(actor.user_id, capability)?;
        if !capability.is_staff() {
            let watching = self
                .presence
                .record(actor.user_id)
                .is_some_and(|r| r.camera_on);
            if !watching {
                debug!(user_id = %actor.user_id, op = op.as_str(), "Control refused, not watching");
                return Err(CamguardError::UserNotPresent(actor.user_id));
            }
        }
        self.acquire_cooldown(actor.user_id, op.as_str(), now)?;
        Ok(capability)
    }

    /// Check that `actor` is staff and off cooldown for `action`
    pub fn authorize_admin(
        &mut self,
        actor: &MemberInfo,
        action: &str,
        now: MonotonicInstant,
    ) -> Result<Capability> {
        let capability = self.policy.roles.resolve(actor);
        if !capability.is_staff() {
            return Err(CamguardError::permission(format!(
                "{} may not run {}",
                actor.label(),
                action
            )));
        }
        self.check_not_disabled(actor.user_id, capability)?;
        self.acquire_cooldown(actor.user_id, action, now)?;
        Ok(capability)
    }

    fn check_not_disabled(&self, user_id: UserId, capability: Capability) -> Result<()> {
        if capability.can_be_disabled() && self.is_command_disabled(user_id) {
            debug!(user_id = %user_id, "Command refused, member is disabled");
            return Err(CamguardError::CommandsDisabled(user_id));
        }
        Ok(())
    }

    fn acquire_cooldown(&mut self, actor: UserId, action: &str, now: MonotonicInstant) -> Result<()> {
        self.cooldowns
            .try_acquire(actor, action, now)
            .map_err(|remaining| CamguardError::CooldownActive {
                retry_after_secs: remaining.as_secs().max(1),
            })
    }

    /// Turn camera enforcement on or off
    pub fn set_moderation(&mut self, actor: UserId, enabled: bool, now: DateTime<Utc>) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        let state = self.store.state_mut();
        state.toggles.moderation_enabled = Some(enabled);
        state.record_audit(AuditEvent::new(
            now,
            AuditEventType::ModerationToggled { enabled, by: actor },
        ));
        if enabled
            && !self.presence.moderation_enabled()
            && self.policy.moderation.reset_violations_on_enable
            && !state.violations.is_empty()
        {
            state.violations.clear();
            events.push(CoreEvent::ViolationsReset { target: None });
        }

        info!(enabled, by = %actor, "Moderation toggled");
        let mut effects = Vec::new();
        self.presence.set_moderation(enabled, now, &mut effects);
        self.apply_effects(effects, now, &mut events);
        events.push(CoreEvent::ModerationChanged { enabled });
        self.post_notice(
            if enabled {
                "VC moderation enabled"
            } else {
                "VC moderation disabled"
            },
            &mut events,
        );
        events
    }

    pub fn set_auto_pause(&mut self, actor: UserId, enabled: bool, now: DateTime<Utc>) -> Vec<CoreEvent> {
        self.auto_pause.set_enabled(enabled);
        let state = self.store.state_mut();
        state.toggles.auto_pause_enabled = Some(enabled);
        state.record_audit(AuditEvent::new(
            now,
            AuditEventType::AutoPauseToggled { enabled, by: actor },
        ));
        info!(enabled, by = %actor, "Auto-pause toggled");
        vec![CoreEvent::AutoPauseChanged { enabled }]
    }

    /// Mute (or unmute) every present member who is not exempt. With
    /// `deafen`, hush deafens them too. Turning hush off lifts whatever the
    /// active hush applied.
    pub fn set_hush(
        &mut self,
        actor: UserId,
        enabled: bool,
        deafen: bool,
        now: DateTime<Utc>,
    ) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        let deafens = if enabled { deafen } else { self.hush_deafen };
        self.hush = enabled;
        self.hush_deafen = enabled && deafen;
        let state = self.store.state_mut();
        state.toggles.hush = enabled;
        state.toggles.hush_deafen = enabled && deafen;
        state.record_audit(AuditEvent::new(
            now,
            AuditEventType::HushToggled { enabled, by: actor },
        ));

        let mut affected: Vec<UserId> = self
            .presence
            .records()
            .filter(|r| !r.exempt && !r.is_silenced())
            .map(|r| r.user_id)
            .collect();
        affected.sort();
        for user_id in affected {
            events.push(CoreEvent::Dispatch {
                action: GatewayAction::Mute {
                    user_id,
                    muted: enabled,
                },
                origin: ActionOrigin::Admin { actor },
            });
            if deafens {
                events.push(CoreEvent::Dispatch {
                    action: GatewayAction::Deafen {
                        user_id,
                        deafened: enabled,
                    },
                    origin: ActionOrigin::Admin { actor },
                });
            }
        }

        info!(enabled, deafen = deafens, by = %actor, "Hush toggled");
        events.push(CoreEvent::HushChanged { enabled });
        events
    }

    /// Bar `target` from running commands, or allow them back.
    ///
    /// Streamer accounts cannot be barred. Returns whether anything changed.
    pub fn set_user_disabled(
        &mut self,
        actor: UserId,
        target: &MemberInfo,
        disabled: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if disabled && !self.policy.roles.resolve(target).can_be_disabled() {
            return Err(CamguardError::permission(format!(
                "{} cannot be disabled",
                target.label()
            )));
        }

        let state = self.store.state_mut();
        let changed = if disabled {
            state.command_disabled.insert(target.user_id)
        } else {
            state.command_disabled.remove(&target.user_id)
        };
        if changed {
            state.record_audit(AuditEvent::new(
                now,
                AuditEventType::CommandsToggled {
                    user_id: target.user_id,
                    disabled,
                    by: actor,
                },
            ));
            info!(user_id = %target.user_id, disabled, by = %actor, "Command access changed");
        }
        Ok(changed)
    }

    pub fn is_command_disabled(&self, user_id: UserId) -> bool {
        self.store.state().command_disabled.contains(&user_id)
    }

    /// Throw away the current period's stats without publishing them. Open
    /// sessions restart at `now`; lifetime violation counts are kept.
    pub fn clear_stats(&mut self, actor: UserId, now: DateTime<Utc>) -> Vec<CoreEvent> {
        let state = self.store.state_mut();
        state.stats = StatsSnapshot::new(now);
        for started in state.open_sessions.values_mut() {
            *started = now;
        }
        state.record_audit(AuditEvent::new(now, AuditEventType::StatsCleared { by: actor }));
        info!(by = %actor, "Stats cleared");
        vec![CoreEvent::StatsCleared]
    }

    /// Clear the violation count of `target`, or of everyone.
    ///
    /// Returns how many users had their count cleared.
    pub fn reset_violations(
        &mut self,
        actor: UserId,
        target: Option<UserId>,
        now: DateTime<Utc>,
    ) -> (usize, Vec<CoreEvent>) {
        let state = self.store.state_mut();
        let cleared = match target {
            Some(user_id) => usize::from(state.violations.remove(&user_id).is_some()),
            None => {
                let count = state.violations.len();
                state.violations.clear();
                count
            }
        };
        state.record_audit(AuditEvent::new(
            now,
            AuditEventType::ViolationsReset { target, by: actor },
        ));
        info!(target_user = ?target, cleared, by = %actor, "Violations reset");
        (cleared, vec![CoreEvent::ViolationsReset { target }])
    }

    /// Ask the gateway to lift active timeouts of `target`, or of everyone.
    /// The records close once the gateway confirms each removal.
    pub fn remove_timeouts(
        &mut self,
        actor: &MemberInfo,
        target: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Vec<CoreEvent> {
        self.active_timeouts(now)
            .into_iter()
            .filter(|t| target.is_none_or(|u| u == t.user_id))
            .map(|t| CoreEvent::Dispatch {
                action: GatewayAction::RemoveTimeout {
                    user_id: t.user_id,
                    reason: format!("Removed by {}", actor.label()),
                },
                origin: ActionOrigin::Admin {
                    actor: actor.user_id,
                },
            })
            .collect()
    }

    /// Periodic housekeeping: stats rotation and timeout expiry
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        if self.stats.rotation_due(self.store.state(), now) {
            let state = self.store.state_mut();
            let board = self.stats.rotate(state, now);
            state.record_audit(AuditEvent::new(
                now,
                AuditEventType::StatsRotated {
                    total_commands: board.total_commands,
                    violation_events: board.violation_events,
                },
            ));
            events.push(CoreEvent::LeaderboardPublished(board));
        }

        let expired: Vec<(UserId, DateTime<Utc>)> = self
            .store
            .state()
            .active_timeouts
            .values()
            .filter(|t| !t.is_active(now))
            .map(|t| (t.user_id, t.expires_at()))
            .collect();
        for (user_id, expires_at) in expired {
            if let Some(record) = self.close_timeout(user_id, expires_at, "expired".to_string()) {
                events.push(CoreEvent::TimeoutRemoved(record));
            }
        }

        events
    }

    /// Trim audit history and stale cooldown entries
    pub fn prune(&mut self, now: DateTime<Utc>, now_mono: MonotonicInstant) {
        self.cooldowns.cleanup(now_mono);
        if self.store.state_mut().prune(now) {
            debug!("Pruned history");
        }
    }

    /// Record a browser crash in the audit history
    pub fn record_browser_crash(&mut self, restart_count: u32, now: DateTime<Utc>) {
        self.store.state_mut().record_audit(AuditEvent::new(
            now,
            AuditEventType::BrowserCrashed { restart_count },
        ));
    }

    /// Note the daemon is stopping. Open sessions stay open so a restart
    /// continues counting from the stored start.
    pub fn shutdown(&mut self, now: DateTime<Utc>) {
        self.store
            .state_mut()
            .record_audit(AuditEvent::new(now, AuditEventType::ServiceStopped));
    }

    pub fn flush_if_dirty(&mut self, now: DateTime<Utc>) -> StoreResult<bool> {
        self.store.flush_if_dirty(now)
    }

    pub fn flush(&mut self, now: DateTime<Utc>) -> StoreResult<()> {
        self.store.flush(now)
    }

    /// Leaderboard of the current period so far
    pub fn leaderboard(&self, now: DateTime<Utc>) -> Leaderboard {
        self.stats.leaderboard(self.store.state(), now)
    }

    pub fn active_timeouts(&self, now: DateTime<Utc>) -> Vec<TimeoutRecord> {
        self.store
            .state()
            .active_timeouts
            .values()
            .filter(|t| t.is_active(now))
            .cloned()
            .collect()
    }

    pub fn health(&self, browser: BrowserSession) -> HealthStatus {
        HealthStatus {
            moderation_enabled: self.presence.moderation_enabled(),
            auto_pause_enabled: self.auto_pause.is_enabled(),
            hush_active: self.hush,
            present_users: self.presence.present_count(),
            compliant_audience: self.presence.compliant_audience(),
            store_healthy: self.store.is_healthy(),
            browser,
        }
    }

    fn post_notice(&self, content: &str, events: &mut Vec<CoreEvent>) {
        if let Some(chat) = self.policy.channels.chat {
            events.push(CoreEvent::Dispatch {
                action: GatewayAction::SendChannelMessage {
                    channel_id: chat,
                    content: content.to_string(),
                },
                origin: ActionOrigin::Presence,
            });
        }
    }
}

fn push_voice(user_id: UserId, muted: bool, deafened: bool, events: &mut Vec<CoreEvent>) {
    events.push(CoreEvent::Dispatch {
        action: GatewayAction::Mute { user_id, muted },
        origin: ActionOrigin::Presence,
    });
    events.push(CoreEvent::Dispatch {
        action: GatewayAction::Deafen { user_id, deafened },
        origin: ActionOrigin::Presence,
    });
}
