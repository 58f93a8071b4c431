//! Ordered delivery of gateway actions

use camguard_api::GatewayAction;
use camguard_core::ActionOrigin;
use camguard_gateway::{Gateway, GatewayResult};
use camguard_util::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// A finished gateway call, reported back to the main loop
#[derive(Debug)]
pub struct ActionDone {
    pub action: GatewayAction,
    pub origin: ActionOrigin,
    pub result: GatewayResult<()>,
}

type Queued = (GatewayAction, ActionOrigin);

struct Lane {
    tx: mpsc::UnboundedSender<Queued>,
    /// Actions pushed and not finished yet
    queued: Arc<AtomicUsize>,
}

/// Runs gateway actions off the main loop.
///
/// Actions for the same member run one after another in the order they were
/// pushed, so a mute is never overtaken by the unmute that follows it.
/// Different members (and channel messages) proceed independently.
pub struct ActionQueue {
    gateway: Arc<dyn Gateway>,
    outcomes: mpsc::UnboundedSender<ActionDone>,
    lanes: HashMap<Option<UserId>, Lane>,
}

impl ActionQueue {
    pub fn new(gateway: Arc<dyn Gateway>, outcomes: mpsc::UnboundedSender<ActionDone>) -> Self {
        Self {
            gateway,
            outcomes,
            lanes: HashMap::new(),
        }
    }

    pub fn push(&mut self, action: GatewayAction, origin: ActionOrigin) {
        let key = action.target();
        let mut queued = (action, origin);

        if let Some(lane) = self.lanes.get(&key) {
            // Counted before sending so the lane task never decrements first
            lane.queued.fetch_add(1, Ordering::SeqCst);
            match lane.tx.send(queued) {
                Ok(()) => return,
                // The lane task is gone; start a new one below
                Err(mpsc::error::SendError(returned)) => {
                    lane.queued.fetch_sub(1, Ordering::SeqCst);
                    queued = returned;
                }
            }
        }

        let lane = self.spawn_lane(key);
        lane.queued.fetch_add(1, Ordering::SeqCst);
        let _ = lane.tx.send(queued);
        self.lanes.insert(key, lane);
    }

    fn spawn_lane(&self, key: Option<UserId>) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<Queued>();
        let queued = Arc::new(AtomicUsize::new(0));
        let gateway = self.gateway.clone();
        let outcomes = self.outcomes.clone();
        let counter = queued.clone();

        tokio::spawn(async move {
            while let Some((action, origin)) = rx.recv().await {
                let result = gateway.perform(&action).await;
                counter.fetch_sub(1, Ordering::SeqCst);
                debug!(lane = ?key, action = action.name(), ok = result.is_ok(), "Gateway action finished");
                if outcomes
                    .send(ActionDone {
                        action,
                        origin,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        Lane { tx, queued }
    }

    /// Drop idle lanes; their tasks exit
    pub fn prune(&mut self) {
        self.lanes
            .retain(|_, lane| !lane.tx.is_closed() && lane.queued.load(Ordering::SeqCst) > 0);
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Actions queued on the lane of `key` and not finished yet
    pub fn queued(&self, key: Option<UserId>) -> usize {
        self.lanes
            .get(&key)
            .map_or(0, |lane| lane.queued.load(Ordering::SeqCst))
    }
}
