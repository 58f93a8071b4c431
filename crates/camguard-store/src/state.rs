//! The persisted state document

use camguard_api::TimeoutRecord;
use camguard_util::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::AuditEvent;

/// Current schema version written by this build
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Audit history older than this is pruned
pub const HISTORY_MAX_AGE_DAYS: i64 = 7;

/// Audit history is capped at this many entries (oldest dropped first)
pub const HISTORY_MAX_ENTRIES: usize = 200;

/// Closed timeout records kept for reference
pub const TIMEOUT_HISTORY_MAX_ENTRIES: usize = 200;

/// Everything that survives a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u32,

    /// When the document was last written
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub toggles: FeatureToggles,

    /// Lifetime violation count per user
    #[serde(default)]
    pub violations: BTreeMap<UserId, u32>,

    /// Timeouts currently in force, by user
    #[serde(default)]
    pub active_timeouts: BTreeMap<UserId, TimeoutRecord>,

    /// Timeouts that were removed or have expired
    #[serde(default)]
    pub timeout_history: Vec<TimeoutRecord>,

    pub stats: StatsSnapshot,

    /// Accounting start of each tracked user currently in a monitored channel
    #[serde(default)]
    pub open_sessions: BTreeMap<UserId, DateTime<Utc>>,

    /// Users whose direct messages were refused by the platform
    #[serde(default)]
    pub dms_disabled: BTreeSet<UserId>,

    /// Users barred from running commands
    #[serde(default)]
    pub command_disabled: BTreeSet<UserId>,

    #[serde(default)]
    pub history: Vec<AuditEvent>,
}

impl PersistedState {
    /// Fresh state whose stats period starts at `now`
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            saved_at: None,
            toggles: FeatureToggles::default(),
            violations: BTreeMap::new(),
            active_timeouts: BTreeMap::new(),
            timeout_history: Vec::new(),
            stats: StatsSnapshot::new(now),
            open_sessions: BTreeMap::new(),
            dms_disabled: BTreeSet::new(),
            command_disabled: BTreeSet::new(),
            history: Vec::new(),
        }
    }

    pub fn violation_count(&self, user_id: UserId) -> u32 {
        self.violations.get(&user_id).copied().unwrap_or(0)
    }

    pub fn record_audit(&mut self, event: AuditEvent) {
        self.history.push(event);
    }

    /// Close the active timeout for `user_id`, moving it to the history
    pub fn close_timeout(
        &mut self,
        user_id: UserId,
        removed_at: DateTime<Utc>,
        removed_by: Option<String>,
    ) -> Option<TimeoutRecord> {
        let mut record = self.active_timeouts.remove(&user_id)?;
        record.removed_at = Some(removed_at);
        record.removed_by = removed_by;
        self.timeout_history.push(record.clone());
        Some(record)
    }

    /// Drop stale history and move expired timeouts into the history.
    ///
    /// Returns true if anything changed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;

        let expired: Vec<UserId> = self
            .active_timeouts
            .values()
            .filter(|t| !t.is_active(now))
            .map(|t| t.user_id)
            .collect();
        for user_id in expired {
            if let Some(mut record) = self.active_timeouts.remove(&user_id) {
                record.removed_at = Some(record.expires_at());
                self.timeout_history.push(record);
                changed = true;
            }
        }

        let cutoff = now - chrono::Duration::days(HISTORY_MAX_AGE_DAYS);
        let before = self.history.len();
        self.history.retain(|e| e.timestamp >= cutoff);
        if self.history.len() > HISTORY_MAX_ENTRIES {
            let excess = self.history.len() - HISTORY_MAX_ENTRIES;
            self.history.drain(..excess);
        }
        changed |= self.history.len() != before;

        let before = self.timeout_history.len();
        self.timeout_history
            .retain(|t| t.removed_at.is_none_or(|at| at >= cutoff));
        if self.timeout_history.len() > TIMEOUT_HISTORY_MAX_ENTRIES {
            let excess = self.timeout_history.len() - TIMEOUT_HISTORY_MAX_ENTRIES;
            self.timeout_history.drain(..excess);
        }
        changed |= self.timeout_history.len() != before;

        changed
    }
}

/// Runtime overrides of the configured feature switches. `None` means the
/// configured value applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggles {
    #[serde(default)]
    pub moderation_enabled: Option<bool>,
    #[serde(default)]
    pub auto_pause_enabled: Option<bool>,
    #[serde(default)]
    pub hush: bool,
    /// Hush also deafens
    #[serde(default)]
    pub hush_deafen: bool,
}

/// Current-period usage counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub as_of_date: NaiveDate,
    pub period_started_at: DateTime<Utc>,
    /// Finalized seconds in monitored channels this period
    #[serde(default)]
    pub vc_seconds: BTreeMap<UserId, u64>,
    /// Command invocations per user per command name
    #[serde(default)]
    pub command_usage: BTreeMap<UserId, BTreeMap<String, u64>>,
    #[serde(default)]
    pub violation_events: u64,
    /// Violations per user this period
    #[serde(default)]
    pub violations: BTreeMap<UserId, u32>,
}

impl StatsSnapshot {
    pub fn new(period_start: DateTime<Utc>) -> Self {
        Self {
            as_of_date: period_start.date_naive(),
            period_started_at: period_start,
            vc_seconds: BTreeMap::new(),
            command_usage: BTreeMap::new(),
            violation_events: 0,
            violations: BTreeMap::new(),
        }
    }

    pub fn commands_for(&self, user_id: UserId) -> u64 {
        self.command_usage
            .get(&user_id)
            .map(|per_command| per_command.values().sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::TimeZone;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, hour, 0, 0).unwrap()
    }

    fn timeout(user: u64, applied_at: DateTime<Utc>, secs: u64) -> TimeoutRecord {
        TimeoutRecord {
            user_id: UserId::new(user),
            applied_at,
            duration_secs: secs,
            reason: "camera off".into(),
            moderator: "AutoMod".into(),
            removed_at: None,
            removed_by: None,
        }
    }

    #[test]
    fn test_close_timeout_moves_to_history() {
        let mut state = PersistedState::empty(t(0));
        state
            .active_timeouts
            .insert(UserId::new(1), timeout(1, t(1), 300));

        let closed = state
            .close_timeout(UserId::new(1), t(1), Some("mod".into()))
            .unwrap();
        assert_eq!(closed.removed_by.as_deref(), Some("mod"));
        assert!(state.active_timeouts.is_empty());
        assert_eq!(state.timeout_history.len(), 1);
        assert!(state.close_timeout(UserId::new(1), t(2), None).is_none());
    }

    #[test]
    fn test_prune_expires_timeouts() {
        let mut state = PersistedState::empty(t(0));
        state
            .active_timeouts
            .insert(UserId::new(1), timeout(1, t(1), 300));
        state
            .active_timeouts
            .insert(UserId::new(2), timeout(2, t(1), 86_400));

        assert!(state.prune(t(2)));
        assert_eq!(state.active_timeouts.len(), 1);
        assert!(state.active_timeouts.contains_key(&UserId::new(2)));
        assert_eq!(
            state.timeout_history[0].removed_at,
            Some(t(1) + chrono::Duration::seconds(300))
        );
    }

    #[test]
    fn test_prune_history_by_age_and_length() {
        let mut state = PersistedState::empty(t(0));
        let old = t(0) - chrono::Duration::days(8);
        state.record_audit(AuditEvent::new(old, AuditEventType::ServiceStarted));
        for _ in 0..(HISTORY_MAX_ENTRIES + 5) {
            state.record_audit(AuditEvent::new(t(1), AuditEventType::StreamAutoPaused));
        }

        assert!(state.prune(t(2)));
        assert_eq!(state.history.len(), HISTORY_MAX_ENTRIES);
        assert!(state.history.iter().all(|e| e.timestamp == t(1)));
        assert!(!state.prune(t(2)));
    }

    #[test]
    fn test_commands_for_sums_all_commands() {
        let mut stats = StatsSnapshot::new(t(0));
        let per_user = stats.command_usage.entry(UserId::new(3)).or_default();
        per_user.insert("skip".into(), 4);
        per_user.insert("refresh".into(), 1);

        assert_eq!(stats.commands_for(UserId::new(3)), 5);
        assert_eq!(stats.commands_for(UserId::new(4)), 0);
        assert_eq!(stats.as_of_date, t(0).date_naive());
    }
}
