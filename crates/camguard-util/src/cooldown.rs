//! Per-(actor, action) command cooldowns

use std::collections::HashMap;
use std::time::Duration;

use crate::{MonotonicInstant, UserId};

/// Rate limiter keyed by the invoking user and the action name.
///
/// A request is permitted iff at least `interval` has passed since the last
/// permitted request for the same key. The timestamp is recorded as part of
/// the permit, so the check and the update cannot be separated by a second
/// invocation from the same actor.
#[derive(Debug)]
pub struct CooldownGate {
    interval: Duration,
    last_invoked: HashMap<(UserId, String), MonotonicInstant>,
}

impl CooldownGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_invoked: HashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check and record an invocation at `now`.
    ///
    /// Returns `Ok(())` if permitted, or `Err(remaining)` with the time left
    /// until the key is usable again.
    pub fn try_acquire(
        &mut self,
        actor: UserId,
        action: &str,
        now: MonotonicInstant,
    ) -> Result<(), Duration> {
        let key = (actor, action.to_string());
        if let Some(last) = self.last_invoked.get(&key) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.interval {
                return Err(self.interval - elapsed);
            }
        }
        self.last_invoked.insert(key, now);
        Ok(())
    }

    /// Drop entries whose cooldown has long expired
    pub fn cleanup(&mut self, now: MonotonicInstant) {
        let interval = self.interval;
        self.last_invoked
            .retain(|_, last| now.duration_since(*last) < interval);
    }

    pub fn len(&self) -> usize {
        self.last_invoked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_invoked.is_empty()
    }
}
