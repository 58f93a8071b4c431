//! Per-user grace timers

use camguard_util::UserId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A grace timer ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub user_id: UserId,
    pub generation: u64,
}

/// At most one pending timer per user.
///
/// Each timer is a sleeping task that posts a [`TimerFired`] when it wakes.
/// Arming again replaces the user's previous timer. The engine still checks
/// the generation, so a firing that races a cancellation is harmless.
pub struct ComplianceTimers {
    tasks: HashMap<UserId, JoinHandle<()>>,
    tx: mpsc::UnboundedSender<TimerFired>,
}

impl ComplianceTimers {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tasks: HashMap::new(),
                tx,
            },
            rx,
        )
    }

    pub fn arm(&mut self, user_id: UserId, generation: u64, deadline: DateTime<Utc>, now: DateTime<Utc>) {
        let delay = (deadline - now).to_std().unwrap_or_default();
        let tx = self.tx.clone();

        debug!(user_id = %user_id, generation, delay_ms = delay.as_millis() as u64, "Grace timer armed");

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerFired {
                user_id,
                generation,
            });
        });

        if let Some(previous) = self.tasks.insert(user_id, task) {
            previous.abort();
        }
    }

    pub fn cancel(&mut self, user_id: UserId) {
        if let Some(task) = self.tasks.remove(&user_id) {
            task.abort();
            debug!(user_id = %user_id, "Grace timer cancelled");
        }
    }

    /// Forget a timer that already fired
    pub fn fired(&mut self, user_id: UserId) {
        if self.tasks.get(&user_id).is_some_and(|t| t.is_finished()) {
            self.tasks.remove(&user_id);
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }

    /// Timers still waiting to fire
    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|t| !t.is_finished()).count()
    }
}

impl Drop for ComplianceTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
