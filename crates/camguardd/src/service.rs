//! Main service state and event loop

use anyhow::{Context, Result};
use camguard_api::{
    Command, ErrorCode, ErrorInfo, Event, EventPayload, Response, ResponsePayload,
};
use camguard_browser::{BrowserControlChannel, BrowserDriver, BrowserError, BrowserEvent, BrowserOp};
use camguard_config::Policy;
use camguard_core::{CoreEngine, CoreEvent};
use camguard_gateway::Gateway;
use camguard_ipc::{IpcServer, ServerMessage};
use camguard_store::PersistentStateStore;
use camguard_util::{CamguardError, ClientId, MonotonicInstant};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{ActionDone, ActionQueue, ComplianceTimers, PendingActions, TimerFired};

/// How long shutdown waits for the browser worker to close the session
const BROWSER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the service is built from
pub struct ServiceParts {
    pub policy: Policy,
    pub store: PersistentStateStore,
    /// Started IPC server
    pub ipc: Arc<IpcServer>,
    pub gateway: Arc<dyn Gateway>,
    /// Where bridge answers to gateway actions are delivered
    pub pending: PendingActions,
    pub driver: Box<dyn BrowserDriver>,
}

struct Inbox {
    ipc_messages: mpsc::UnboundedReceiver<ServerMessage>,
    timers: mpsc::UnboundedReceiver<TimerFired>,
    outcomes: mpsc::UnboundedReceiver<ActionDone>,
    browser: mpsc::Receiver<BrowserEvent>,
}

/// Main service state
pub struct Service {
    engine: CoreEngine,
    ipc: Arc<IpcServer>,
    gateway: Arc<dyn Gateway>,
    pending: PendingActions,
    actions: ActionQueue,
    outcome_tx: mpsc::UnboundedSender<ActionDone>,
    timers: ComplianceTimers,
    browser: BrowserControlChannel,
    browser_worker: Option<JoinHandle<()>>,
    browser_shutdown: watch::Sender<bool>,
    inbox: Option<Inbox>,
}

impl Service {
    pub async fn new(parts: ServiceParts) -> Result<Self> {
        let ServiceParts {
            policy,
            store,
            ipc,
            gateway,
            pending,
            driver,
        } = parts;

        let ipc_messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let (browser_shutdown, shutdown_rx) = watch::channel(false);
        let (browser, browser_events, browser_worker) =
            BrowserControlChannel::spawn(driver, policy.browser.clone(), shutdown_rx);

        let (timers, timer_rx) = ComplianceTimers::new();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let actions = ActionQueue::new(gateway.clone(), outcome_tx.clone());

        let engine = CoreEngine::new(policy, store, camguard_util::now());

        Ok(Self {
            engine,
            ipc,
            gateway,
            pending,
            actions,
            outcome_tx,
            timers,
            browser,
            browser_worker: Some(browser_worker),
            browser_shutdown,
            inbox: Some(Inbox {
                ipc_messages,
                timers: timer_rx,
                outcomes: outcome_rx,
                browser: browser_events,
            }),
        })
    }

    /// Run until `shutdown` completes, then stop the browser worker and save
    /// state.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Inbox {
            mut ipc_messages,
            timers: mut timer_rx,
            outcomes: mut outcome_rx,
            browser: mut browser_events,
        } = self.inbox.take().context("Service already ran")?;

        let ipc_accept = self.ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let service_policy = self.engine.policy().service.clone();
        let mut flush_timer = tokio::time::interval(service_policy.flush_interval);
        let mut tick_timer = tokio::time::interval(service_policy.tick_interval);
        let mut prune_timer = tokio::time::interval(service_policy.prune_interval);
        for timer in [&mut flush_timer, &mut tick_timer, &mut prune_timer] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        tokio::pin!(shutdown);

        info!("Service running");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                Some(msg) = ipc_messages.recv() => {
                    self.handle_ipc_message(msg).await;
                }

                Some(fired) = timer_rx.recv() => {
                    self.timers.fired(fired.user_id);
                    let events = self.engine.on_timer_fired(
                        fired.user_id,
                        fired.generation,
                        camguard_util::now(),
                    );
                    self.handle_core_events(events);
                }

                Some(done) = outcome_rx.recv() => {
                    let events = self.engine.record_action_outcome(
                        &done.action,
                        done.origin,
                        &done.result,
                        camguard_util::now(),
                    );
                    self.handle_core_events(events);
                }

                Some(event) = browser_events.recv() => {
                    self.handle_browser_event(event);
                }

                _ = flush_timer.tick() => {
                    self.flush_if_dirty();
                }

                // Stats rotation and timeout expiry
                _ = tick_timer.tick() => {
                    let events = self.engine.tick(camguard_util::now());
                    self.handle_core_events(events);
                }

                _ = prune_timer.tick() => {
                    self.engine.prune(camguard_util::now(), MonotonicInstant::now());
                    self.actions.prune();
                }
            }
        }

        self.shutdown().await
    }

    async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down camguardd");

        self.timers.cancel_all();
        self.ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        let _ = self.browser_shutdown.send(true);
        if let Some(worker) = self.browser_worker.take()
            && tokio::time::timeout(BROWSER_STOP_TIMEOUT, worker).await.is_err()
        {
            warn!("Browser worker did not stop in time");
        }

        let now = camguard_util::now();
        self.engine.shutdown(now);
        self.engine
            .flush(now)
            .context("Failed to save state on shutdown")?;

        self.ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }

    fn flush_if_dirty(&mut self) {
        match self.engine.flush_if_dirty(camguard_util::now()) {
            Ok(true) => debug!("State saved"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to save state, will retry"),
        }
    }

    fn handle_core_events(&mut self, events: Vec<CoreEvent>) {
        for event in events {
            match event {
                CoreEvent::ArmComplianceTimer {
                    user_id,
                    generation,
                    deadline,
                } => {
                    self.timers
                        .arm(user_id, generation, deadline, camguard_util::now());
                }

                CoreEvent::CancelComplianceTimer { user_id } => {
                    self.timers.cancel(user_id);
                }

                CoreEvent::Dispatch { action, origin } => {
                    self.actions.push(action, origin);
                }

                CoreEvent::ViolationRecorded(violation) => {
                    self.broadcast(EventPayload::ViolationRecorded(violation));
                }

                CoreEvent::PauseStream => {
                    self.pause_stream();
                }

                CoreEvent::TimeoutApplied(record) => {
                    self.broadcast(EventPayload::TimeoutApplied(record));
                }

                CoreEvent::TimeoutRemoved(record) => {
                    self.broadcast(EventPayload::TimeoutRemoved(record));
                }

                CoreEvent::LeaderboardPublished(board) => {
                    info!(
                        total_commands = board.total_commands,
                        violation_events = board.violation_events,
                        "Stats period closed"
                    );
                    self.broadcast(EventPayload::LeaderboardPublished(board));
                }

                CoreEvent::ModerationChanged { enabled } => {
                    self.broadcast(EventPayload::ModerationChanged { enabled });
                }

                CoreEvent::AutoPauseChanged { enabled } => {
                    self.broadcast(EventPayload::AutoPauseChanged { enabled });
                }

                CoreEvent::HushChanged { enabled } => {
                    self.broadcast(EventPayload::HushChanged { enabled });
                }

                CoreEvent::ViolationsReset { target } => {
                    self.broadcast(EventPayload::ViolationsReset { target });
                }

                CoreEvent::StatsCleared => {
                    self.broadcast(EventPayload::StatsCleared);
                }
            }
        }
    }

    fn broadcast(&self, payload: EventPayload) {
        self.ipc.broadcast_event(Event::new(payload));
    }

    /// Queue a pause without waiting for the browser
    fn pause_stream(&self) {
        self.broadcast(EventPayload::StreamAutoPaused);

        match self.browser.submit(BrowserOp::Pause) {
            Ok(rx) => {
                tokio::spawn(async move {
                    match rx.await {
                        Ok(Ok(())) => info!("Stream paused"),
                        Ok(Err(e)) => warn!(error = %e, "Auto-pause failed"),
                        Err(_) => debug!("Browser worker stopped before pausing"),
                    }
                });
            }
            Err(e) => warn!(error = %e, "Could not queue auto-pause"),
        }
    }

    fn handle_browser_event(&mut self, event: BrowserEvent) {
        match event {
            BrowserEvent::HealthChanged(session) => {
                info!(
                    health = ?session.health_status,
                    restart_count = session.restart_count,
                    "Browser health changed"
                );
                self.broadcast(EventPayload::BrowserHealthChanged(session));
            }

            BrowserEvent::Alert {
                message,
                restart_count,
            } => {
                error!(restart_count, message = %message, "Browser automation needs attention");
                self.engine
                    .record_browser_crash(restart_count, camguard_util::now());
                self.broadcast(EventPayload::BrowserAlert {
                    message,
                    restart_count,
                });
            }
        }
    }

    async fn handle_ipc_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                let role = self.ipc.get_client_info(&client_id).await.map(|i| i.role);
                let allowed = !request.command.requires_bridge()
                    || role.is_some_and(|r| r.can_drive_gateway());

                let response = if allowed {
                    self.handle_command(&client_id, request.request_id, request.command)
                        .await
                } else {
                    warn!(client_id = %client_id, role = ?role, "Observer sent a bridge command");
                    Some(Response::error(
                        request.request_id,
                        ErrorInfo::new(
                            ErrorCode::PermissionDenied,
                            "Only the gateway bridge may send this command",
                        ),
                    ))
                };

                if let Some(response) = response {
                    let _ = self.ipc.send_response(&client_id, response).await;
                }
            }

            ServerMessage::ClientConnected { client_id, info } => {
                info!(
                    client_id = %client_id,
                    role = ?info.role,
                    uid = ?info.uid,
                    "Client connected"
                );
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");
            }
        }
    }

    /// Handle one command. Returns `None` when a spawned task answers later.
    async fn handle_command(
        &mut self,
        client_id: &ClientId,
        request_id: u64,
        command: Command,
    ) -> Option<Response> {
        let now = camguard_util::now();
        let now_mono = MonotonicInstant::now();

        let response = match command {
            Command::VoiceStateUpdate {
                member,
                channel_id,
                camera_on,
            } => {
                let events = self
                    .engine
                    .handle_voice_state(&member, channel_id, camera_on, now);
                self.handle_core_events(events);
                Response::success(request_id, ResponsePayload::Accepted)
            }

            Command::MemberUpdate {
                member,
                timed_out_until,
                moderator,
            } => {
                let events = self
                    .engine
                    .handle_member_update(&member, timed_out_until, moderator, now);
                self.handle_core_events(events);
                Response::success(request_id, ResponsePayload::Accepted)
            }

            Command::Message { member, command } => {
                self.engine.handle_message(&member, command.as_deref());
                Response::success(request_id, ResponsePayload::Accepted)
            }

            Command::PresenceSync { members } => {
                let events = self.engine.handle_presence_sync(&members, now);
                self.handle_core_events(events);
                Response::success(request_id, ResponsePayload::Accepted)
            }

            Command::ActionResult { action_id, outcome } => {
                if self.pending.resolve(action_id, outcome).await {
                    Response::success(request_id, ResponsePayload::Accepted)
                } else {
                    Response::error(
                        request_id,
                        ErrorInfo::new(
                            ErrorCode::UnknownAction,
                            format!("No pending action {}", action_id),
                        ),
                    )
                }
            }

            Command::Control { actor, op } => {
                // Every invocation counts, allowed or not
                self.engine.handle_message(&actor, Some(op.as_str()));

                if let Err(e) = self.engine.authorize_control(&actor, op, now_mono) {
                    return Some(Response::error(request_id, error_info(&e)));
                }

                info!(user_id = %actor.user_id, op = op.as_str(), "Stream control");
                let rx = match self.browser.submit(op.into()) {
                    Ok(rx) => rx,
                    Err(e) => return Some(Response::error(request_id, browser_error_info(&e))),
                };

                self.respond_later(client_id, async move {
                    match rx.await.unwrap_or(Err(BrowserError::Closed)) {
                        Ok(()) => Response::success(request_id, ResponsePayload::ControlDone { op }),
                        Err(e) => Response::error(request_id, browser_error_info(&e)),
                    }
                });
                return None;
            }

            Command::SetModeration { actor, enabled } => {
                if let Err(e) = self.engine.authorize_admin(&actor, "moderation", now_mono) {
                    return Some(Response::error(request_id, error_info(&e)));
                }
                let events = self.engine.set_moderation(actor.user_id, enabled, now);
                self.handle_core_events(events);
                Response::success(request_id, ResponsePayload::ModerationSet { enabled })
            }

            Command::SetAutoPause { actor, enabled } => {
                if let Err(e) = self.engine.authorize_admin(&actor, "auto_pause", now_mono) {
                    return Some(Response::error(request_id, error_info(&e)));
                }
                let events = self.engine.set_auto_pause(actor.user_id, enabled, now);
                self.handle_core_events(events);
                Response::success(request_id, ResponsePayload::AutoPauseSet { enabled })
            }

            Command::SetHush {
                actor,
                enabled,
                deafen,
            } => {
                if let Err(e) = self.engine.authorize_admin(&actor, "hush", now_mono) {
                    return Some(Response::error(request_id, error_info(&e)));
                }
                let events = self.engine.set_hush(actor.user_id, enabled, deafen, now);
                self.handle_core_events(events);
                Response::success(request_id, ResponsePayload::HushSet { enabled })
            }

            Command::SetUserDisabled {
                actor,
                target,
                disabled,
            } => {
                if let Err(e) = self.engine.authorize_admin(&actor, "disable", now_mono) {
                    return Some(Response::error(request_id, error_info(&e)));
                }
                match self
                    .engine
                    .set_user_disabled(actor.user_id, &target, disabled, now)
                {
                    Ok(changed) => Response::success(
                        request_id,
                        ResponsePayload::UserDisabledSet {
                            user_id: target.user_id,
                            disabled,
                            changed,
                        },
                    ),
                    Err(e) => Response::error(request_id, error_info(&e)),
                }
            }

            Command::ClearStats { actor } => {
                if let Err(e) = self.engine.authorize_admin(&actor, "clear_stats", now_mono) {
                    return Some(Response::error(request_id, error_info(&e)));
                }
                let events = self.engine.clear_stats(actor.user_id, now);
                self.handle_core_events(events);
                Response::success(request_id, ResponsePayload::StatsCleared)
            }

            Command::ResetViolations { actor, target } => {
                if let Err(e) = self.engine.authorize_admin(&actor, "reset_violations", now_mono) {
                    return Some(Response::error(request_id, error_info(&e)));
                }
                let (users_cleared, events) =
                    self.engine.reset_violations(actor.user_id, target, now);
                self.handle_core_events(events);
                Response::success(request_id, ResponsePayload::ViolationsReset { users_cleared })
            }

            Command::RemoveTimeouts { actor, target } => {
                if let Err(e) = self.engine.authorize_admin(&actor, "remove_timeouts", now_mono) {
                    return Some(Response::error(request_id, error_info(&e)));
                }
                let events = self.engine.remove_timeouts(&actor, target, now);
                self.remove_timeouts(client_id, request_id, events);
                return None;
            }

            Command::RelaunchBrowser { actor } => {
                if let Err(e) = self.engine.authorize_admin(&actor, "relaunch", now_mono) {
                    return Some(Response::error(request_id, error_info(&e)));
                }

                info!(by = %actor.user_id, "Manual browser relaunch");
                let rx = match self.browser.submit(BrowserOp::Relaunch) {
                    Ok(rx) => rx,
                    Err(e) => return Some(Response::error(request_id, browser_error_info(&e))),
                };

                self.respond_later(client_id, async move {
                    match rx.await.unwrap_or(Err(BrowserError::Closed)) {
                        Ok(()) => Response::success(request_id, ResponsePayload::BrowserRelaunched),
                        Err(e) => Response::error(request_id, browser_error_info(&e)),
                    }
                });
                return None;
            }

            Command::GetStats => {
                Response::success(request_id, ResponsePayload::Stats(self.engine.leaderboard(now)))
            }

            Command::GetTimeouts => Response::success(
                request_id,
                ResponsePayload::Timeouts {
                    active: self.engine.active_timeouts(now),
                },
            ),

            Command::GetHealth => Response::success(
                request_id,
                ResponsePayload::Health(self.engine.health(self.browser.session())),
            ),

            Command::SubscribeEvents => Response::success(
                request_id,
                ResponsePayload::Subscribed {
                    client_id: client_id.clone(),
                },
            ),

            Command::UnsubscribeEvents => {
                Response::success(request_id, ResponsePayload::Unsubscribed)
            }

            Command::Ping => Response::success(request_id, ResponsePayload::Pong),
        };

        Some(response)
    }

    /// Send the response produced by `fut` once it completes
    fn respond_later(
        &self,
        client_id: &ClientId,
        fut: impl Future<Output = Response> + Send + 'static,
    ) {
        let ipc = self.ipc.clone();
        let client_id = client_id.clone();
        tokio::spawn(async move {
            let response = fut.await;
            if let Err(e) = ipc.send_response(&client_id, response).await {
                debug!(client_id = %client_id, error = %e, "Client gone before response");
            }
        });
    }

    /// Lift timeouts one by one and answer with what worked. Outcomes still
    /// go through the main loop so the records close there.
    fn remove_timeouts(&self, client_id: &ClientId, request_id: u64, events: Vec<CoreEvent>) {
        let gateway = self.gateway.clone();
        let outcomes = self.outcome_tx.clone();

        self.respond_later(client_id, async move {
            let mut removed = Vec::new();
            let mut failed = Vec::new();

            for event in events {
                let CoreEvent::Dispatch { action, origin } = event else {
                    continue;
                };
                let result = gateway.perform(&action).await;
                if let Some(user_id) = action.target() {
                    if result.is_ok() {
                        removed.push(user_id);
                    } else {
                        failed.push(user_id);
                    }
                }
                let _ = outcomes.send(ActionDone {
                    action,
                    origin,
                    result,
                });
            }

            Response::success(request_id, ResponsePayload::TimeoutsRemoved { removed, failed })
        });
    }
}

fn error_info(e: &CamguardError) -> ErrorInfo {
    let (code, message) = match e {
        CamguardError::UserNotPresent(_) => (
            ErrorCode::NotPresent,
            "You must be in the VC with your camera on".to_string(),
        ),
        CamguardError::PermissionDenied(_) => (ErrorCode::PermissionDenied, e.to_string()),
        CamguardError::CommandsDisabled(_) => (
            ErrorCode::PermissionDenied,
            "You are currently disabled from using any commands".to_string(),
        ),
        CamguardError::CooldownActive { retry_after_secs } => (
            ErrorCode::CooldownActive,
            format!("Try again in {}s", retry_after_secs),
        ),
        CamguardError::GatewayError(_) => (ErrorCode::GatewayError, e.to_string()),
        CamguardError::AutomationError(_) => (ErrorCode::AutomationFailed, e.to_string()),
        CamguardError::ConfigError(_)
        | CamguardError::StoreError(_)
        | CamguardError::IpcError(_)
        | CamguardError::Internal(_) => (ErrorCode::InternalError, e.to_string()),
    };
    ErrorInfo::new(code, message)
}

fn browser_error_info(e: &BrowserError) -> ErrorInfo {
    let code = match e {
        BrowserError::Unavailable | BrowserError::Closed => ErrorCode::AutomationUnavailable,
        BrowserError::Busy => ErrorCode::AutomationBusy,
        BrowserError::Failed(_) => ErrorCode::AutomationFailed,
    };
    ErrorInfo::new(code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camguard_browser::DriverError;
    use camguard_util::UserId;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            error_info(&CamguardError::UserNotPresent(UserId::new(1))).code,
            ErrorCode::NotPresent
        );
        let cooldown = error_info(&CamguardError::CooldownActive {
            retry_after_secs: 3,
        });
        assert_eq!(cooldown.code, ErrorCode::CooldownActive);
        assert_eq!(cooldown.message, "Try again in 3s");
        assert_eq!(
            error_info(&CamguardError::permission("nope")).code,
            ErrorCode::PermissionDenied
        );
        let disabled = error_info(&CamguardError::CommandsDisabled(UserId::new(2)));
        assert_eq!(disabled.code, ErrorCode::PermissionDenied);
        assert_eq!(disabled.message, "You are currently disabled from using any commands");
    }

    #[test]
    fn test_browser_error_codes() {
        assert_eq!(
            browser_error_info(&BrowserError::Unavailable).code,
            ErrorCode::AutomationUnavailable
        );
        assert_eq!(browser_error_info(&BrowserError::Busy).code, ErrorCode::AutomationBusy);
        assert_eq!(
            browser_error_info(&BrowserError::Failed(DriverError::Transient("x".into()))).code,
            ErrorCode::AutomationFailed
        );
    }
}
