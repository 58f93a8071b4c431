//! VC time and command usage accounting with daily rotation

use camguard_api::{Leaderboard, LeaderboardEntry};
use camguard_config::StatsPolicy;
use camguard_store::{PersistedState, StatsSnapshot};
use camguard_util::{UserId, WallClock, elapsed_secs};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

/// Stats bookkeeping over the persisted document.
///
/// VC time is derived from accounting starts kept in
/// `PersistedState::open_sessions`, so a restart does not lose the time of
/// members who stayed connected.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    rotation_time: WallClock,
    leaderboard_size: usize,
    excluded: HashSet<UserId>,
}

impl StatsAggregator {
    pub fn new(policy: &StatsPolicy, excluded: HashSet<UserId>) -> Self {
        Self {
            rotation_time: policy.rotation_time,
            leaderboard_size: policy.leaderboard_size,
            excluded,
        }
    }

    pub fn is_tracked(&self, user_id: UserId) -> bool {
        !self.excluded.contains(&user_id)
    }

    /// Open a session for `user_id` unless one is already open.
    ///
    /// Returns true if a new session was opened.
    pub fn session_started(
        &self,
        state: &mut PersistedState,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_tracked(user_id) || state.open_sessions.contains_key(&user_id) {
            return false;
        }
        state.open_sessions.insert(user_id, now);
        true
    }

    /// Close the session of `user_id`, crediting its time.
    ///
    /// Returns the seconds credited, or None if no session was open.
    pub fn session_ended(
        &self,
        state: &mut PersistedState,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        let started = state.open_sessions.remove(&user_id)?;
        let secs = elapsed_secs(started, now);
        *state.stats.vc_seconds.entry(user_id).or_insert(0) += secs;
        Some(secs)
    }

    pub fn record_command(&self, state: &mut PersistedState, user_id: UserId, command: &str) {
        if !self.is_tracked(user_id) {
            return;
        }
        *state
            .stats
            .command_usage
            .entry(user_id)
            .or_default()
            .entry(command.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_violation(&self, state: &mut PersistedState, user_id: UserId) {
        state.stats.violation_events += 1;
        if self.is_tracked(user_id) {
            *state.stats.violations.entry(user_id).or_insert(0) += 1;
        }
    }

    /// When the current period ends
    pub fn next_rotation(&self, state: &PersistedState) -> DateTime<Utc> {
        self.rotation_time
            .next_occurrence_after(state.stats.period_started_at)
    }

    /// A rotation instant has passed since the period started. A restart
    /// that missed one or more instants rotates once on the next check.
    pub fn rotation_due(&self, state: &PersistedState, now: DateTime<Utc>) -> bool {
        now >= self.next_rotation(state)
    }

    /// Leaderboard of the current period as of `now`, counting open
    /// sessions up to `now`
    pub fn leaderboard(&self, state: &PersistedState, now: DateTime<Utc>) -> Leaderboard {
        let mut vc: BTreeMap<UserId, u64> = state.stats.vc_seconds.clone();
        for (user_id, started) in &state.open_sessions {
            *vc.entry(*user_id).or_insert(0) += elapsed_secs(*started, now);
        }

        let commands: BTreeMap<UserId, u64> = state
            .stats
            .command_usage
            .keys()
            .map(|user_id| (*user_id, state.stats.commands_for(*user_id)))
            .collect();
        let total_commands = commands.values().sum();

        let violators: BTreeMap<UserId, u64> = state
            .stats
            .violations
            .iter()
            .filter(|(user_id, _)| self.is_tracked(**user_id))
            .map(|(user_id, count)| (*user_id, u64::from(*count)))
            .collect();

        Leaderboard {
            period_start: state.stats.period_started_at,
            period_end: now,
            top_vc_time: self.top(vc),
            top_commands: self.top(commands),
            top_violators: self.top(violators),
            total_commands,
            violation_events: state.stats.violation_events,
        }
    }

    /// Close the current period at `now`: return its leaderboard, reset the
    /// period counters and restart every open session at `now`.
    pub fn rotate(&self, state: &mut PersistedState, now: DateTime<Utc>) -> Leaderboard {
        let board = self.leaderboard(state, now);
        state.stats = StatsSnapshot::new(now);
        for started in state.open_sessions.values_mut() {
            *started = now;
        }
        info!(
            total_commands = board.total_commands,
            violation_events = board.violation_events,
            "Stats period rotated"
        );
        board
    }

    fn top(&self, values: BTreeMap<UserId, u64>) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = values
            .into_iter()
            .filter(|(user_id, value)| *value > 0 && self.is_tracked(*user_id))
            .map(|(user_id, value)| LeaderboardEntry { user_id, value })
            .collect();
        // Ties keep ascending user id order from the BTreeMap
        entries.sort_by(|a, b| b.value.cmp(&a.value));
        entries.truncate(self.leaderboard_size);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, minute, 0).unwrap()
    }

    fn aggregator(size: usize) -> StatsAggregator {
        let policy = StatsPolicy {
            rotation_time: WallClock::new(0, 0).unwrap(),
            leaderboard_size: size,
        };
        StatsAggregator::new(&policy, [UserId::new(99)].into_iter().collect())
    }

    #[test]
    fn test_session_accounting() {
        let stats = aggregator(10);
        let mut state = PersistedState::empty(at(1, 12, 0));
        let alice = UserId::new(1);

        assert!(stats.session_started(&mut state, alice, at(1, 12, 0)));
        assert!(!stats.session_started(&mut state, alice, at(1, 12, 5)));
        assert_eq!(stats.session_ended(&mut state, alice, at(1, 12, 10)), Some(600));
        assert_eq!(stats.session_ended(&mut state, alice, at(1, 12, 20)), None);
        assert_eq!(state.stats.vc_seconds[&alice], 600);
    }

    #[test]
    fn test_excluded_user_untracked() {
        let stats = aggregator(10);
        let mut state = PersistedState::empty(at(1, 12, 0));
        let excluded = UserId::new(99);

        assert!(!stats.session_started(&mut state, excluded, at(1, 12, 0)));
        stats.record_command(&mut state, excluded, "skip");
        assert!(state.stats.command_usage.is_empty());
        assert!(state.open_sessions.is_empty());
    }

    #[test]
    fn test_leaderboard_ordering_and_size() {
        let stats = aggregator(2);
        let mut state = PersistedState::empty(at(1, 0, 0));
        for (id, count) in [(1, 3), (2, 5), (3, 1)] {
            for _ in 0..count {
                stats.record_command(&mut state, UserId::new(id), "skip");
            }
        }
        stats.record_command(&mut state, UserId::new(3), "refresh");
        stats.record_violation(&mut state, UserId::new(4));
        stats.record_violation(&mut state, UserId::new(4));

        let board = stats.leaderboard(&state, at(1, 6, 0));
        assert_eq!(board.total_commands, 10);
        assert_eq!(
            board.top_commands,
            vec![
                LeaderboardEntry { user_id: UserId::new(2), value: 5 },
                LeaderboardEntry { user_id: UserId::new(1), value: 3 },
            ]
        );
        assert_eq!(
            board.top_violators,
            vec![LeaderboardEntry { user_id: UserId::new(4), value: 2 }]
        );
    }

    #[test]
    fn test_rotation_resets_period_and_restarts_sessions() {
        let stats = aggregator(10);
        let mut state = PersistedState::empty(at(1, 20, 0));
        let alice = UserId::new(1);
        stats.session_started(&mut state, alice, at(1, 23, 0));
        stats.record_command(&mut state, alice, "skip");
        stats.record_violation(&mut state, alice);

        assert!(!stats.rotation_due(&state, at(1, 23, 59)));
        assert!(stats.rotation_due(&state, at(2, 0, 0)));

        let board = stats.rotate(&mut state, at(2, 0, 0));
        assert_eq!(board.top_vc_time[0].value, 3600);
        assert_eq!(board.violation_events, 1);
        assert_eq!(board.total_commands, 1);

        assert_eq!(state.stats.period_started_at, at(2, 0, 0));
        assert!(state.stats.command_usage.is_empty());
        assert_eq!(state.stats.violation_events, 0);
        assert_eq!(state.open_sessions[&alice], at(2, 0, 0));
        assert!(!stats.rotation_due(&state, at(2, 12, 0)));

        // Time in the new period only counts from the rotation instant
        assert_eq!(stats.session_ended(&mut state, alice, at(2, 0, 30)), Some(1800));
    }

    #[test]
    fn test_violators_are_ranked_per_period() {
        let stats = aggregator(10);
        let mut state = PersistedState::empty(at(1, 20, 0));
        let bob = UserId::new(2);
        // Lifetime count lives outside the period snapshot
        state.violations.insert(bob, 1);
        stats.record_violation(&mut state, bob);

        let board = stats.rotate(&mut state, at(2, 0, 0));
        assert_eq!(board.top_violators[0].user_id, bob);

        let next = stats.leaderboard(&state, at(2, 1, 0));
        assert_eq!(next.violation_events, 0);
        assert!(next.top_violators.is_empty());
        assert_eq!(state.violations[&bob], 1);
    }

    #[test]
    fn test_missed_rotations_collapse() {
        let stats = aggregator(10);
        let state = PersistedState::empty(at(1, 10, 0));
        // Down for several days; one rotation is due
        assert!(stats.rotation_due(&state, at(4, 9, 0)));
    }
}
