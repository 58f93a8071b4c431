//! Serialized access to the browser session
//!
//! One worker task owns the driver. Requests are queued on a bounded channel
//! and run strictly one at a time in arrival order; each carries a oneshot
//! responder. The same task health-checks the session on an interval and
//! relaunches it with exponential backoff when it stops answering.

use camguard_api::{BrowserHealth, BrowserSession, ControlOp};
use camguard_config::BrowserPolicy;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{BrowserDriver, DriverError, DriverResult};

/// Errors reported to callers of the channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowserError {
    /// The session crashed and automatic relaunch gave up
    #[error("Browser automation unavailable")]
    Unavailable,

    #[error("Browser automation busy, try again shortly")]
    Busy,

    #[error("Browser worker stopped")]
    Closed,

    #[error("Browser operation failed: {0}")]
    Failed(DriverError),
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Operations accepted by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserOp {
    /// Send the skip key sequence
    Skip,
    /// Reload the page, optionally skipping once it settles
    Refresh { then_skip: bool },
    /// Open the target page and skip
    Start,
    /// Reload without skipping
    Pause,
    /// Restart the browser, including from the crashed state
    Relaunch,
}

impl BrowserOp {
    pub fn name(&self) -> &'static str {
        match self {
            BrowserOp::Skip => "skip",
            BrowserOp::Refresh { .. } => "refresh",
            BrowserOp::Start => "start",
            BrowserOp::Pause => "pause",
            BrowserOp::Relaunch => "relaunch",
        }
    }
}

impl From<ControlOp> for BrowserOp {
    fn from(op: ControlOp) -> Self {
        match op {
            ControlOp::Skip => BrowserOp::Skip,
            ControlOp::Refresh => BrowserOp::Refresh { then_skip: false },
            ControlOp::Start => BrowserOp::Start,
            ControlOp::Pause => BrowserOp::Pause,
        }
    }
}

/// Events emitted by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    /// Health status changed
    HealthChanged(BrowserSession),
    /// Automatic recovery gave up; an operator has to step in
    Alert { message: String, restart_count: u32 },
}

struct Request {
    op: BrowserOp,
    respond: oneshot::Sender<BrowserResult<()>>,
}

/// Handle to the browser worker. Cheap to clone.
#[derive(Clone)]
pub struct BrowserControlChannel {
    tx: mpsc::Sender<Request>,
    session: watch::Receiver<BrowserSession>,
}

impl BrowserControlChannel {
    /// Spawn the worker. It launches the browser, then serves requests until
    /// `shutdown_rx` turns true or every handle is dropped.
    pub fn spawn(
        driver: Box<dyn BrowserDriver>,
        policy: BrowserPolicy,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, mpsc::Receiver<BrowserEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(policy.queue_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(32);
        let (session_tx, session) = watch::channel(BrowserSession::default());

        let worker = Worker {
            driver,
            policy,
            session_tx,
            event_tx,
        };
        let handle = tokio::spawn(worker.run(rx, shutdown_rx));

        (Self { tx, session }, event_rx, handle)
    }

    /// Queue `op` without waiting for it to run.
    ///
    /// Fails with `Busy` when the queue is full.
    pub fn submit(&self, op: BrowserOp) -> BrowserResult<oneshot::Receiver<BrowserResult<()>>> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .try_send(Request { op, respond })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BrowserError::Busy,
                mpsc::error::TrySendError::Closed(_) => BrowserError::Closed,
            })?;
        Ok(rx)
    }

    /// Queue `op` and wait for its result
    pub async fn execute(&self, op: BrowserOp) -> BrowserResult<()> {
        let rx = self.submit(op)?;
        rx.await.map_err(|_| BrowserError::Closed)?
    }

    /// Latest published session state
    pub fn session(&self) -> BrowserSession {
        self.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BrowserSession> {
        self.session.clone()
    }
}

/// Bound a driver call by `limit`
async fn bounded<T>(limit: Duration, call: impl Future<Output = DriverResult<T>>) -> DriverResult<T> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(DriverError::Timeout(limit)))
}

struct Worker {
    driver: Box<dyn BrowserDriver>,
    policy: BrowserPolicy,
    session_tx: watch::Sender<BrowserSession>,
    event_tx: mpsc::Sender<BrowserEvent>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Request>, mut shutdown: watch::Receiver<bool>) {
        info!(target_url = %self.policy.target_url, "Browser worker starting");
        if let Err(e) = self.open().await {
            warn!(error = %e, "Initial browser launch failed");
            self.recover(e).await;
        }

        let mut interval = tokio::time::interval(self.policy.health_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else {
                        debug!("All browser handles dropped");
                        break;
                    };
                    let result = self.handle(request.op).await;
                    if request.respond.send(result).is_err() {
                        debug!(op = request.op.name(), "Requester went away before completion");
                    }
                }
                _ = interval.tick() => {
                    self.health_check().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Fail whatever is still queued
        rx.close();
        while let Ok(request) = rx.try_recv() {
            let _ = request.respond.send(Err(BrowserError::Closed));
        }

        let limit = self.policy.operation_timeout;
        if let Err(e) = bounded(limit, self.driver.quit()).await {
            warn!(error = %e, "Browser quit failed");
        }
        info!("Browser worker stopped");
    }

    fn session(&self) -> BrowserSession {
        self.session_tx.borrow().clone()
    }

    fn publish(&self, session: BrowserSession) {
        let changed = self.session_tx.borrow().health_status != session.health_status;
        self.session_tx.send_replace(session.clone());
        if changed {
            info!(health = ?session.health_status, restart_count = session.restart_count, "Browser health changed");
            if self.event_tx.try_send(BrowserEvent::HealthChanged(session)).is_err() {
                debug!("Browser event dropped");
            }
        }
    }

    async fn handle(&mut self, op: BrowserOp) -> BrowserResult<()> {
        if op == BrowserOp::Relaunch {
            info!("Manual browser relaunch requested");
            let mut session = self.session();
            session.restart_count = 0;
            self.session_tx.send_replace(session);
            return if self.relaunch_with_backoff(false).await {
                Ok(())
            } else {
                Err(BrowserError::Unavailable)
            };
        }

        if self.session().health_status == BrowserHealth::Crashed {
            return Err(BrowserError::Unavailable);
        }

        match self.perform(op).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(op = op.name(), error = %e, "Browser operation failed");
                if !self.recover(e).await {
                    return Err(BrowserError::Unavailable);
                }
                // One more try on the fresh session
                self.perform(op).await.map_err(BrowserError::Failed)
            }
        }
    }

    async fn perform(&mut self, op: BrowserOp) -> DriverResult<()> {
        let limit = self.policy.operation_timeout;
        match op {
            BrowserOp::Skip => self.skip().await,
            BrowserOp::Refresh { then_skip } => {
                bounded(limit, self.driver.reload()).await?;
                if then_skip {
                    tokio::time::sleep(self.policy.start_delay).await;
                    self.skip().await?;
                }
                Ok(())
            }
            BrowserOp::Start => {
                let url = self.policy.target_url.clone();
                bounded(limit, self.driver.navigate(&url)).await?;
                tokio::time::sleep(self.policy.start_delay).await;
                self.skip().await
            }
            BrowserOp::Pause => bounded(limit, self.driver.reload()).await,
            // Handled before dispatch
            BrowserOp::Relaunch => Ok(()),
        }
    }

    /// Send each skip key separately, `key_interval` apart
    async fn skip(&mut self) -> DriverResult<()> {
        let limit = self.policy.operation_timeout;
        let keys = self.policy.skip_keys.clone();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.policy.key_interval).await;
            }
            bounded(limit, self.driver.send_key_sequence(std::slice::from_ref(key))).await?;
        }
        debug!(keys = keys.len(), "Skip sent");
        Ok(())
    }

    /// Launch the browser and open the target page
    async fn open(&mut self) -> DriverResult<()> {
        let limit = self.policy.operation_timeout;
        let url = self.policy.target_url.clone();
        bounded(limit, self.driver.launch()).await?;
        bounded(limit, self.driver.navigate(&url)).await
    }

    async fn health_check(&mut self) {
        if self.session().health_status == BrowserHealth::Crashed {
            return;
        }
        let limit = self.policy.operation_timeout;
        match bounded(limit, self.driver.current_location()).await {
            Ok(location) => {
                debug!(location = %location, "Browser health check passed");
                let mut session = self.session();
                session.last_health_check_time = Some(camguard_util::now());
                self.publish(session);
            }
            Err(e) => {
                warn!(error = %e, "Browser health check failed");
                self.recover(e).await;
            }
        }
    }

    /// React to a failed driver call. Returns true if the session is usable
    /// again.
    async fn recover(&mut self, cause: DriverError) -> bool {
        if cause.is_fatal() {
            self.crash(&cause.to_string());
            return false;
        }
        self.relaunch_with_backoff(true).await
    }

    /// Up to `max_relaunch_attempts` relaunches, waiting
    /// `relaunch_backoff * 2^n` before attempt n. With `backoff` false the
    /// first attempt runs immediately.
    async fn relaunch_with_backoff(&mut self, backoff: bool) -> bool {
        let mut session = self.session();
        session.health_status = BrowserHealth::Degraded;
        self.publish(session);

        let attempts = self.policy.max_relaunch_attempts.max(1);
        let mut last_error = String::from("no attempt made");
        for attempt in 0..attempts {
            if backoff || attempt > 0 {
                let delay = self.policy.relaunch_backoff * 2u32.saturating_pow(attempt);
                debug!(attempt, delay_secs = delay.as_secs(), "Waiting before browser relaunch");
                tokio::time::sleep(delay).await;
            }

            let mut session = self.session();
            session.restart_count += 1;
            self.session_tx.send_replace(session);

            let limit = self.policy.operation_timeout;
            if let Err(e) = bounded(limit, self.driver.quit()).await {
                debug!(error = %e, "Quit before relaunch failed");
            }
            match self.open().await {
                Ok(()) => {
                    info!(attempt = attempt + 1, "Browser relaunched");
                    self.publish(BrowserSession {
                        health_status: BrowserHealth::Healthy,
                        last_health_check_time: Some(camguard_util::now()),
                        restart_count: 0,
                    });
                    return true;
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Browser relaunch failed");
                    last_error = e.to_string();
                    if e.is_fatal() {
                        break;
                    }
                }
            }
        }

        self.crash(&last_error);
        false
    }

    fn crash(&mut self, reason: &str) {
        let mut session = self.session();
        session.health_status = BrowserHealth::Crashed;
        let restart_count = session.restart_count;
        self.publish(session);

        let message = format!(
            "Browser automation crashed ({}); manual relaunch required",
            reason
        );
        error!(restart_count, reason, "Browser automation crashed");
        if self
            .event_tx
            .try_send(BrowserEvent::Alert {
                message,
                restart_count,
            })
            .is_err()
        {
            debug!("Browser alert dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DriverCall, MockDriver};
    use tokio::time::Instant;

    fn policy() -> BrowserPolicy {
        BrowserPolicy {
            skip_keys: vec!["Escape".into(), "Escape".into()],
            key_interval: Duration::from_secs(1),
            start_delay: Duration::from_secs(3),
            operation_timeout: Duration::from_secs(20),
            health_check_interval: Duration::from_secs(30),
            max_relaunch_attempts: 2,
            relaunch_backoff: Duration::from_secs(5),
            queue_capacity: 4,
            ..BrowserPolicy::default()
        }
    }

    fn spawn(
        driver: &MockDriver,
        policy: BrowserPolicy,
    ) -> (
        BrowserControlChannel,
        mpsc::Receiver<BrowserEvent>,
        watch::Sender<bool>,
    ) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (channel, events, _handle) =
            BrowserControlChannel::spawn(Box::new(driver.clone()), policy, shutdown_rx);
        (channel, events, shutdown_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_opens_target() {
        let driver = MockDriver::new();
        let (channel, _events, _shutdown) = spawn(&driver, policy());

        channel.execute(BrowserOp::Pause).await.unwrap();
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Launch,
                DriverCall::Navigate(policy().target_url),
                DriverCall::Reload,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_sends_keys_one_at_a_time() {
        let driver = MockDriver::new();
        let (channel, _events, _shutdown) = spawn(&driver, policy());

        let started = Instant::now();
        channel.execute(BrowserOp::Skip).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));

        let keys: Vec<DriverCall> = driver
            .calls()
            .into_iter()
            .filter(|c| matches!(c, DriverCall::Keys(_)))
            .collect();
        assert_eq!(
            keys,
            vec![
                DriverCall::Keys(vec!["Escape".into()]),
                DriverCall::Keys(vec!["Escape".into()]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_navigates_then_skips() {
        let driver = MockDriver::new();
        let (channel, _events, _shutdown) = spawn(&driver, policy());

        channel.execute(BrowserOp::Start).await.unwrap();
        let calls = driver.calls();
        assert_eq!(calls[2], DriverCall::Navigate(policy().target_url));
        assert!(matches!(calls[3], DriverCall::Keys(_)));
        assert_eq!(calls.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_run_in_order_never_concurrently() {
        let driver = MockDriver::new();
        driver.set_delay(Duration::from_millis(500));
        let (channel, _events, _shutdown) = spawn(&driver, policy());

        let first = channel.submit(BrowserOp::Pause).unwrap();
        let second = channel.submit(BrowserOp::Refresh { then_skip: false }).unwrap();
        let third = channel.submit(BrowserOp::Skip).unwrap();

        let (a, b, c) = tokio::join!(first, second, third);
        assert!(a.unwrap().is_ok() && b.unwrap().is_ok() && c.unwrap().is_ok());

        assert_eq!(driver.max_in_flight(), 1);
        let calls = driver.calls();
        let tail: Vec<&DriverCall> = calls.iter().skip(2).collect();
        assert_eq!(tail[0], &DriverCall::Reload);
        assert_eq!(tail[1], &DriverCall::Reload);
        assert!(matches!(tail[2], DriverCall::Keys(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_is_busy() {
        let driver = MockDriver::new();
        let (channel, _events, _shutdown) = spawn(
            &driver,
            BrowserPolicy {
                queue_capacity: 1,
                ..policy()
            },
        );

        // The worker has not run yet; the first request fills the queue
        let _first = channel.submit(BrowserOp::Skip).unwrap();
        assert_eq!(channel.submit(BrowserOp::Skip).err(), Some(BrowserError::Busy));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_relaunches_and_retries() {
        let driver = MockDriver::new();
        let (channel, mut events, _shutdown) = spawn(&driver, policy());
        channel.execute(BrowserOp::Pause).await.unwrap();

        driver.fail_next_calls(1);
        channel.execute(BrowserOp::Pause).await.unwrap();

        assert_eq!(driver.count(|c| *c == DriverCall::Launch), 2);
        let session = channel.session();
        assert_eq!(session.health_status, BrowserHealth::Healthy);
        assert_eq!(session.restart_count, 0);

        assert!(matches!(
            events.recv().await,
            Some(BrowserEvent::HealthChanged(BrowserSession { health_status: BrowserHealth::Degraded, .. }))
        ));
        assert!(matches!(
            events.recv().await,
            Some(BrowserEvent::HealthChanged(BrowserSession { health_status: BrowserHealth::Healthy, .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_relaunch_crashes_and_fails_fast() {
        let driver = MockDriver::new();
        let (channel, mut events, _shutdown) = spawn(&driver, policy());
        channel.execute(BrowserOp::Pause).await.unwrap();

        driver.fail_next_calls(1);
        driver.fail_launches(u32::MAX);
        let started = Instant::now();
        assert_eq!(
            channel.execute(BrowserOp::Skip).await,
            Err(BrowserError::Unavailable)
        );
        // Backoff of 5s then 10s
        assert!(started.elapsed() >= Duration::from_secs(15));

        let session = channel.session();
        assert_eq!(session.health_status, BrowserHealth::Crashed);
        assert_eq!(session.restart_count, 2);

        let mut alert = None;
        while let Ok(event) = events.try_recv() {
            if let BrowserEvent::Alert { restart_count, .. } = event {
                alert = Some(restart_count);
            }
        }
        assert_eq!(alert, Some(2));

        // Further operations never reach the driver
        let before = driver.calls().len();
        assert_eq!(
            channel.execute(BrowserOp::Skip).await,
            Err(BrowserError::Unavailable)
        );
        assert_eq!(driver.calls().len(), before);

        // Manual recovery once the browser can start again
        driver.fail_launches(0);
        channel.execute(BrowserOp::Relaunch).await.unwrap();
        assert_eq!(channel.session().health_status, BrowserHealth::Healthy);
        channel.execute(BrowserOp::Skip).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out() {
        let driver = MockDriver::new();
        let (channel, _events, _shutdown) = spawn(&driver, policy());
        channel.execute(BrowserOp::Pause).await.unwrap();

        driver.hang_next_calls(1);
        channel.execute(BrowserOp::Pause).await.unwrap();
        assert_eq!(driver.count(|c| *c == DriverCall::Launch), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_detects_dead_session() {
        let driver = MockDriver::new();
        let (channel, _events, _shutdown) = spawn(&driver, policy());
        channel.execute(BrowserOp::Pause).await.unwrap();

        driver.fail_next_calls(1);
        tokio::time::sleep(Duration::from_secs(31)).await;
        // Let the backoff and relaunch complete
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(driver.calls().contains(&DriverCall::Location));
        assert_eq!(driver.count(|c| *c == DriverCall::Launch), 2);
        assert_eq!(channel.session().health_status, BrowserHealth::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_crashes_without_relaunch() {
        let driver = MockDriver::new();
        let (channel, _events, _shutdown) = spawn(&driver, policy());
        channel.execute(BrowserOp::Pause).await.unwrap();

        driver.fail_fatally(true);
        assert_eq!(
            channel.execute(BrowserOp::Pause).await,
            Err(BrowserError::Unavailable)
        );
        assert_eq!(driver.count(|c| *c == DriverCall::Launch), 1);
        assert_eq!(channel.session().health_status, BrowserHealth::Crashed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_quits_browser() {
        let driver = MockDriver::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (channel, _events, handle) =
            BrowserControlChannel::spawn(Box::new(driver.clone()), policy(), shutdown_rx);
        channel.execute(BrowserOp::Pause).await.unwrap();

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(driver.calls().last(), Some(&DriverCall::Quit));
        assert_eq!(
            channel.execute(BrowserOp::Skip).await,
            Err(BrowserError::Closed)
        );
    }
}
