//! Integration tests for camguardd
//!
//! These tests run the full service loop behind a real socket, with the
//! gateway, browser and state backend replaced by mocks.

use camguard_api::{
    BrowserHealth, Command, ErrorCode, EventPayload, GatewayAction, MemberInfo, Response,
    ResponsePayload, ResponseResult,
};
use camguard_browser::{DriverCall, MockDriver};
use camguard_config::Policy;
use camguard_gateway::MockGateway;
use camguard_ipc::{IpcClient, IpcServer};
use camguard_store::{MemoryStore, PersistedState, PersistentStateStore};
use camguard_util::{ChannelId, UserId};
use camguardd::{PendingActions, Service, ServiceParts};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const MONITORED: ChannelId = ChannelId::new(1000);
const PUNISHMENT: ChannelId = ChannelId::new(2000);

fn make_test_policy() -> Policy {
    let mut policy = Policy::with_channels(vec![MONITORED], PUNISHMENT);
    policy.moderation.grace_period = Duration::from_millis(300);
    policy.roles.admin_roles.insert("Mods".to_string());
    policy.browser.key_interval = Duration::from_millis(10);
    policy.browser.start_delay = Duration::from_millis(10);
    policy.browser.relaunch_backoff = Duration::from_millis(10);
    policy.browser.health_check_interval = Duration::from_secs(3600);
    policy.service.flush_interval = Duration::from_secs(3600);
    policy.service.tick_interval = Duration::from_secs(3600);
    policy.service.prune_interval = Duration::from_secs(3600);
    policy
}

struct Harness {
    _dir: TempDir,
    socket: PathBuf,
    gateway: MockGateway,
    driver: MockDriver,
    store: Arc<MemoryStore>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    async fn start(policy: Policy) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("camguard.sock");

        let mut ipc = IpcServer::new(&socket);
        ipc.start().await.unwrap();

        let gateway = MockGateway::new();
        let driver = MockDriver::new();
        let store = Arc::new(MemoryStore::new());
        let persistent = PersistentStateStore::open(Box::new(store.clone()), Utc::now()).unwrap();

        let service = Service::new(ServiceParts {
            policy,
            store: persistent,
            ipc: Arc::new(ipc),
            gateway: Arc::new(gateway.clone()),
            pending: PendingActions::new(),
            driver: Box::new(driver.clone()),
        })
        .await
        .unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(service.run(async move {
            let _ = rx.await;
        }));

        Self {
            _dir: dir,
            socket,
            gateway,
            driver,
            store,
            shutdown: Some(tx),
            task,
        }
    }

    async fn client(&self) -> IpcClient {
        IpcClient::connect(&self.socket).await.unwrap()
    }

    async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(15), self.task)
            .await
            .expect("service did not stop")
            .unwrap()
    }
}

async fn voice(client: &mut IpcClient, member: &MemberInfo, channel: Option<ChannelId>, camera_on: bool) {
    let response = client
        .send(Command::VoiceStateUpdate {
            member: member.clone(),
            channel_id: channel,
            camera_on,
        })
        .await
        .unwrap();
    assert!(matches!(
        response.result,
        ResponseResult::Ok(ResponsePayload::Accepted)
    ));
}

/// Poll `check` for up to five seconds
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn moved_to_punishment(gateway: &MockGateway, user_id: UserId) -> bool {
    gateway.calls_for(user_id).iter().any(|a| {
        matches!(a, GatewayAction::MoveMember { channel_id, .. } if *channel_id == PUNISHMENT)
    })
}

fn error_code(response: &Response) -> Option<ErrorCode> {
    match &response.result {
        ResponseResult::Err(e) => Some(e.code),
        ResponseResult::Ok(_) => None,
    }
}

#[tokio::test]
async fn test_camera_off_past_grace_is_moved_and_messaged() {
    let h = Harness::start(make_test_policy()).await;
    let mut bridge = h.client().await;
    let alice = MemberInfo::new(UserId::new(10)).with_name("alice");

    voice(&mut bridge, &alice, Some(MONITORED), false).await;

    assert!(eventually(|| moved_to_punishment(&h.gateway, alice.user_id)).await);
    assert!(
        eventually(|| h.gateway.calls_for(alice.user_id).iter().any(|a| {
            matches!(a, GatewayAction::SendDirectMessage { content, .. } if content.contains("moved"))
        }))
        .await
    );

    // Silenced while out of compliance
    let calls = h.gateway.calls_for(alice.user_id);
    assert!(calls.contains(&GatewayAction::Mute {
        user_id: alice.user_id,
        muted: true
    }));
    assert!(calls.contains(&GatewayAction::Deafen {
        user_id: alice.user_id,
        deafened: true
    }));

    let response = bridge.send(Command::GetStats).await.unwrap();
    let ResponseResult::Ok(ResponsePayload::Stats(board)) = response.result else {
        panic!("expected stats");
    };
    assert_eq!(board.violation_events, 1);
    assert!(
        board
            .top_violators
            .iter()
            .any(|e| e.user_id == alice.user_id && e.value == 1)
    );

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_camera_on_within_grace_is_not_punished() {
    let h = Harness::start(make_test_policy()).await;
    let mut bridge = h.client().await;
    let bob = MemberInfo::new(UserId::new(11)).with_name("bob");

    voice(&mut bridge, &bob, Some(MONITORED), false).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    voice(&mut bridge, &bob, Some(MONITORED), true).await;

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(!moved_to_punishment(&h.gateway, bob.user_id));

    // Unmuted once the camera came on
    assert!(
        eventually(|| h.gateway.calls_for(bob.user_id).contains(&GatewayAction::Mute {
            user_id: bob.user_id,
            muted: false
        }))
        .await
    );

    h.stop().await.unwrap();
}

async fn wait_for_timeout_record(bridge: &mut IpcClient, user_id: UserId, duration_secs: u64) -> bool {
    for _ in 0..100 {
        let response = bridge.send(Command::GetTimeouts).await.unwrap();
        if let ResponseResult::Ok(ResponsePayload::Timeouts { active }) = response.result
            && active.iter().any(|t| {
                t.user_id == user_id && t.duration_secs == duration_secs && t.moderator == "AutoMod"
            })
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn timed_out_for(gateway: &MockGateway, user_id: UserId, secs: u64) -> bool {
    gateway.calls_for(user_id).iter().any(|a| {
        matches!(a, GatewayAction::ApplyTimeout { duration_secs, .. } if *duration_secs == secs)
    })
}

#[tokio::test]
async fn test_repeat_violations_escalate() {
    let h = Harness::start(make_test_policy()).await;
    let mut bridge = h.client().await;
    let carol = MemberInfo::new(UserId::new(12)).with_name("carol");

    voice(&mut bridge, &carol, Some(MONITORED), false).await;
    assert!(eventually(|| moved_to_punishment(&h.gateway, carol.user_id)).await);

    // The move lands her in the punishment channel; she comes back, still
    // without a camera
    voice(&mut bridge, &carol, Some(PUNISHMENT), false).await;
    voice(&mut bridge, &carol, Some(MONITORED), false).await;

    assert!(eventually(|| timed_out_for(&h.gateway, carol.user_id, 300)).await);
    assert!(wait_for_timeout_record(&mut bridge, carol.user_id, 300).await);

    // Third time: the long timeout
    voice(&mut bridge, &carol, None, false).await;
    voice(&mut bridge, &carol, Some(MONITORED), false).await;

    assert!(eventually(|| timed_out_for(&h.gateway, carol.user_id, 900)).await);
    assert!(wait_for_timeout_record(&mut bridge, carol.user_id, 900).await);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_stream_control_requires_camera() {
    let h = Harness::start(make_test_policy()).await;
    let mut bridge = h.client().await;
    let dave = MemberInfo::new(UserId::new(13)).with_name("dave");

    let response = bridge
        .send(Command::Control {
            actor: dave.clone(),
            op: camguard_api::ControlOp::Skip,
        })
        .await
        .unwrap();
    assert_eq!(error_code(&response), Some(ErrorCode::NotPresent));

    voice(&mut bridge, &dave, Some(MONITORED), true).await;

    let response = bridge
        .send(Command::Control {
            actor: dave.clone(),
            op: camguard_api::ControlOp::Skip,
        })
        .await
        .unwrap();
    assert!(matches!(
        response.result,
        ResponseResult::Ok(ResponsePayload::ControlDone { .. })
    ));
    assert!(h.driver.count(|c| matches!(c, DriverCall::Keys(_))) >= 1);

    // Same command again right away hits the cooldown
    let response = bridge
        .send(Command::Control {
            actor: dave.clone(),
            op: camguard_api::ControlOp::Skip,
        })
        .await
        .unwrap();
    assert_eq!(error_code(&response), Some(ErrorCode::CooldownActive));

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_last_viewer_leaving_pauses_stream() {
    let h = Harness::start(make_test_policy()).await;
    let mut bridge = h.client().await;
    let mut observer = h.client().await;
    observer.subscribe().await.unwrap();

    let erin = MemberInfo::new(UserId::new(14)).with_name("erin");
    voice(&mut bridge, &erin, Some(MONITORED), true).await;
    voice(&mut bridge, &erin, None, false).await;

    let paused = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = observer.next_event().await.unwrap();
            if matches!(event.payload, EventPayload::StreamAutoPaused) {
                break;
            }
        }
    })
    .await;
    assert!(paused.is_ok());

    assert!(eventually(|| h.driver.count(|c| *c == DriverCall::Reload) >= 1).await);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_camera_off_pauses_exactly_once() {
    let h = Harness::start(make_test_policy()).await;
    let mut bridge = h.client().await;
    let mut observer = h.client().await;
    observer.subscribe().await.unwrap();

    let ivan = MemberInfo::new(UserId::new(18)).with_name("ivan");
    voice(&mut bridge, &ivan, Some(MONITORED), true).await;
    voice(&mut bridge, &ivan, Some(MONITORED), false).await;
    // Further zero readings do not pause again
    voice(&mut bridge, &ivan, Some(MONITORED), false).await;
    voice(&mut bridge, &ivan, None, false).await;

    let mut pauses = 0;
    let _ = tokio::time::timeout(Duration::from_millis(800), async {
        loop {
            let event = observer.next_event().await.unwrap();
            if matches!(event.payload, EventPayload::StreamAutoPaused) {
                pauses += 1;
            }
        }
    })
    .await;
    assert_eq!(pauses, 1);
    assert_eq!(h.driver.count(|c| *c == DriverCall::Reload), 1);

    h.stop().await.unwrap();
}

#[test]
fn test_stats_survive_reload() {
    use camguard_core::CoreEngine;
    use chrono::TimeZone;

    let t0 = Utc.with_ymd_and_hms(2025, 7, 4, 18, 0, 0).unwrap();
    let policy = make_test_policy();
    let backend = Arc::new(MemoryStore::new());
    let judy = MemberInfo::new(UserId::new(19)).with_name("judy");

    let saved = {
        let store = PersistentStateStore::open(Box::new(backend.clone()), t0).unwrap();
        let mut engine = CoreEngine::new(policy.clone(), store, t0);
        engine.handle_voice_state(&judy, Some(MONITORED), true, t0);
        for _ in 0..5 {
            engine.handle_message(&judy, Some("skip"));
        }
        engine.handle_voice_state(&judy, None, false, t0 + chrono::Duration::seconds(120));
        engine.flush(t0 + chrono::Duration::seconds(121)).unwrap();
        engine.state().clone()
    };

    let store = PersistentStateStore::open(Box::new(backend), t0).unwrap();
    let engine = CoreEngine::new(policy, store, t0);
    let reloaded = engine.state();

    assert_eq!(reloaded.stats.vc_seconds[&judy.user_id], 120);
    assert_eq!(reloaded.stats.commands_for(judy.user_id), 5);
    assert_eq!(reloaded.stats, saved.stats);
    assert_eq!(reloaded.violations, saved.violations);
}

#[tokio::test]
async fn test_admin_commands_need_staff() {
    let h = Harness::start(make_test_policy()).await;
    let mut bridge = h.client().await;
    let member = MemberInfo::new(UserId::new(15)).with_name("frank");
    let moderator = MemberInfo::new(UserId::new(16))
        .with_name("grace")
        .with_roles(["Mods"]);

    let response = bridge
        .send(Command::SetModeration {
            actor: member.clone(),
            enabled: false,
        })
        .await
        .unwrap();
    assert_eq!(error_code(&response), Some(ErrorCode::PermissionDenied));

    let response = bridge
        .send(Command::SetModeration {
            actor: moderator.clone(),
            enabled: false,
        })
        .await
        .unwrap();
    assert!(matches!(
        response.result,
        ResponseResult::Ok(ResponsePayload::ModerationSet { enabled: false })
    ));

    // With moderation off nobody is punished
    voice(&mut bridge, &member, Some(MONITORED), false).await;
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(!moved_to_punishment(&h.gateway, member.user_id));

    let response = bridge.send(Command::GetHealth).await.unwrap();
    let ResponseResult::Ok(ResponsePayload::Health(health)) = response.result else {
        panic!("expected health");
    };
    assert!(!health.moderation_enabled);
    assert_eq!(health.present_users, 1);
    assert_eq!(health.browser.health_status, BrowserHealth::Healthy);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_disabled_member_and_stats_clear() {
    let h = Harness::start(make_test_policy()).await;
    let mut bridge = h.client().await;
    let kim = MemberInfo::new(UserId::new(20)).with_name("kim");
    let moderator = MemberInfo::new(UserId::new(21))
        .with_name("lee")
        .with_roles(["Mods"]);

    voice(&mut bridge, &kim, Some(MONITORED), true).await;

    let response = bridge
        .send(Command::SetUserDisabled {
            actor: moderator.clone(),
            target: kim.clone(),
            disabled: true,
        })
        .await
        .unwrap();
    assert!(matches!(
        response.result,
        ResponseResult::Ok(ResponsePayload::UserDisabledSet { changed: true, .. })
    ));

    let response = bridge
        .send(Command::Control {
            actor: kim.clone(),
            op: camguard_api::ControlOp::Skip,
        })
        .await
        .unwrap();
    assert_eq!(error_code(&response), Some(ErrorCode::PermissionDenied));
    assert_eq!(h.driver.count(|c| matches!(c, DriverCall::Keys(_))), 0);

    // The refused attempt still counted as usage; clearing drops it
    let response = bridge.send(Command::GetStats).await.unwrap();
    let ResponseResult::Ok(ResponsePayload::Stats(board)) = response.result else {
        panic!("expected stats");
    };
    assert_eq!(board.total_commands, 1);

    let response = bridge
        .send(Command::ClearStats {
            actor: moderator.clone(),
        })
        .await
        .unwrap();
    assert!(matches!(
        response.result,
        ResponseResult::Ok(ResponsePayload::StatsCleared)
    ));

    let response = bridge.send(Command::GetStats).await.unwrap();
    let ResponseResult::Ok(ResponsePayload::Stats(board)) = response.result else {
        panic!("expected stats");
    };
    assert_eq!(board.total_commands, 0);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_saves_state_and_closes_browser() {
    let h = Harness::start(make_test_policy()).await;
    let mut bridge = h.client().await;
    let heidi = MemberInfo::new(UserId::new(17)).with_name("heidi");

    voice(&mut bridge, &heidi, Some(MONITORED), false).await;
    assert!(eventually(|| moved_to_punishment(&h.gateway, heidi.user_id)).await);

    let store = h.store.clone();
    let driver = h.driver.clone();
    h.stop().await.unwrap();

    let document = store.document().expect("state saved on shutdown");
    let state: PersistedState = serde_json::from_str(&document).unwrap();
    assert_eq!(state.violation_count(heidi.user_id), 1);

    assert!(driver.calls().contains(&DriverCall::Launch));
    assert_eq!(driver.calls().last(), Some(&DriverCall::Quit));
}
