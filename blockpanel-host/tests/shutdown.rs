mod support;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use blockpanel_core::{HostEvent, ShutdownState};
use blockpanel_host::{
    backend::{BackendClient, StopOutcome},
    shutdown::ShutdownReason,
    supervisor::{LaunchSpec, SupervisorEvent},
};
use blockpanel_stub::StubState;
use support::{FAST_TIMINGS, dead_address, harness, hung_address, start_stub};
use tokio::time::timeout;

const SLACK: Duration = Duration::from_millis(700);

#[cfg(unix)]
fn shell(script: &str) -> LaunchSpec {
    LaunchSpec {
        program: "sh".to_owned(),
        args: vec!["-c".to_owned(), script.to_owned()],
        working_dir: None,
        envs: Vec::new(),
    }
}

#[tokio::test]
async fn repeated_triggers_send_one_stop_request() {
    let stub = start_stub(StubState::new().with_stop_delay(Duration::from_millis(100))).await;
    let mut h = harness(&stub.base_url(), FAST_TIMINGS);

    let first = h
        .coordinator
        .spawn_shutdown(ShutdownReason::WindowClose)
        .expect("first trigger starts the sequence");
    assert!(h.coordinator.spawn_shutdown(ShutdownReason::UiClose).is_none());
    assert!(!h.coordinator.shutdown(ShutdownReason::Signal).await);

    timeout(Duration::from_secs(5), first)
        .await
        .expect("sequence finished")
        .expect("sequence task");

    assert_eq!(h.coordinator.state(), ShutdownState::Exited);
    assert_eq!(stub.state.stop_requests(), 1);
    assert_eq!(h.ui_events.try_recv(), Ok(HostEvent::CloseRequested));
    assert!(h.ui_events.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_triggers_elect_one_winner() {
    let stub = start_stub(StubState::new()).await;
    let h = harness(&stub.base_url(), FAST_TIMINGS);

    let mut tasks = Vec::new();
    for reason in [
        ShutdownReason::WindowClose,
        ShutdownReason::UiClose,
        ShutdownReason::Signal,
        ShutdownReason::Quit,
    ] {
        let coordinator = Arc::clone(&h.coordinator);
        tasks.push(tokio::spawn(async move { coordinator.shutdown(reason).await }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.expect("trigger task") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    timeout(Duration::from_secs(5), h.coordinator.wait_for_exit())
        .await
        .expect("reached exited");
    assert_eq!(stub.state.stop_requests(), 1);
}

#[tokio::test]
async fn unreachable_backend_finishes_within_bounds() {
    let address = dead_address().await;
    let h = harness(&format!("http://{address}"), FAST_TIMINGS);

    let started = Instant::now();
    assert!(h.coordinator.shutdown(ShutdownReason::Quit).await);
    let elapsed = started.elapsed();

    assert_eq!(h.coordinator.state(), ShutdownState::Exited);
    assert!(elapsed >= FAST_TIMINGS.grace_period);
    assert!(
        elapsed < FAST_TIMINGS.stop_timeout + FAST_TIMINGS.grace_period + SLACK,
        "took {elapsed:?}"
    );
}

#[tokio::test]
async fn hung_backend_is_abandoned_after_stop_timeout() {
    let address = hung_address().await;
    let h = harness(&format!("http://{address}"), FAST_TIMINGS);

    let started = Instant::now();
    assert!(h.coordinator.shutdown(ShutdownReason::WindowClose).await);
    let elapsed = started.elapsed();

    assert_eq!(h.coordinator.state(), ShutdownState::Exited);
    assert!(elapsed >= FAST_TIMINGS.stop_timeout + FAST_TIMINGS.grace_period);
    assert!(
        elapsed < FAST_TIMINGS.stop_timeout + FAST_TIMINGS.grace_period + SLACK,
        "took {elapsed:?}"
    );
}

#[tokio::test]
async fn states_only_move_forward() {
    let stub = start_stub(StubState::new()).await;
    let h = harness(&stub.base_url(), FAST_TIMINGS);
    let mut rx = h.coordinator.subscribe();
    let initial = *rx.borrow_and_update();

    let observer = tokio::spawn(async move {
        let mut seen = vec![initial];
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            seen.push(state);
            if state == ShutdownState::Exited {
                break;
            }
        }
        seen
    });

    assert!(h.coordinator.shutdown(ShutdownReason::UiClose).await);
    let seen = timeout(Duration::from_secs(5), observer)
        .await
        .expect("observer finished")
        .expect("observer task");

    assert_eq!(seen.first(), Some(&ShutdownState::Running));
    assert_eq!(seen.last(), Some(&ShutdownState::Exited));
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "{seen:?}");
}

#[tokio::test]
async fn stop_request_outcomes() {
    let stub = start_stub(StubState::new()).await;
    let live = BackendClient::new(&stub.base_url()).expect("client");
    assert!(matches!(
        live.request_stop(Duration::from_secs(2)).await,
        StopOutcome::Acknowledged(200)
    ));

    let dead = BackendClient::new(&format!("http://{}", dead_address().await)).expect("client");
    assert_eq!(
        dead.request_stop(Duration::from_millis(300)).await,
        StopOutcome::Unreachable
    );

    let hung = BackendClient::new(&format!("http://{}", hung_address().await)).expect("client");
    let started = Instant::now();
    assert_eq!(
        hung.request_stop(Duration::from_millis(300)).await,
        StopOutcome::TimedOut
    );
    assert!(started.elapsed() < Duration::from_millis(300) + SLACK);
}

#[tokio::test]
async fn liveness_probe_is_bounded() {
    let stub = start_stub(StubState::new()).await;
    let live = BackendClient::new(&stub.base_url()).expect("client");
    assert!(live.check_alive().await);

    let dead = BackendClient::new(&format!("http://{}", dead_address().await)).expect("client");
    assert!(!dead.check_alive().await);

    let hung = BackendClient::new(&format!("http://{}", hung_address().await))
        .expect("client")
        .with_liveness_timeout(Duration::from_millis(200));
    let started = Instant::now();
    assert!(!hung.check_alive().await);
    assert!(started.elapsed() < Duration::from_millis(200) + SLACK);
}

#[tokio::test]
async fn backend_actions_reach_the_stub() {
    let stub = start_stub(StubState::new()).await;
    let client = BackendClient::new(&stub.base_url()).expect("client");

    client.start_server().await.expect("start");
    let status = client.fetch_status().await.expect("status");
    assert_eq!(status.status, blockpanel_core::ServerPhase::Online);

    client.send_command("say hi").await.expect("command");
    client.stop_server().await.expect("stop");
    assert_eq!(stub.state.phase().await, blockpanel_core::ServerPhase::Offline);
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_kills_a_lingering_backend_before_exiting() {
    let stub = start_stub(StubState::new()).await;
    let mut h = harness(&stub.base_url(), FAST_TIMINGS);
    let handle = h.supervisor.start(&shell("sleep 30")).expect("spawn shell");

    assert!(h.coordinator.shutdown(ShutdownReason::WindowClose).await);
    assert_eq!(h.coordinator.state(), ShutdownState::Exited);
    assert!(handle.is_settled());

    let code = timeout(Duration::from_secs(5), handle.wait_for_exit())
        .await
        .expect("backend reaped");
    assert_eq!(code, None);

    let event = timeout(Duration::from_secs(5), h.supervisor_events.recv())
        .await
        .expect("exit event in time");
    assert_eq!(event, Some(SupervisorEvent::Exited { code: None }));
    assert!(h.supervisor_events.try_recv().is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn failing_exit_while_stopping_is_not_a_crash() {
    let stub = start_stub(StubState::new().with_stop_delay(Duration::from_secs(1))).await;
    let mut h = harness(&stub.base_url(), FAST_TIMINGS);
    let handle = h
        .supervisor
        .start(&shell("sleep 0.15; exit 1"))
        .expect("spawn shell");

    assert!(h.coordinator.shutdown(ShutdownReason::Quit).await);
    let code = timeout(Duration::from_secs(5), handle.wait_for_exit())
        .await
        .expect("backend exited");
    assert_eq!(code, Some(1));

    let event = timeout(Duration::from_secs(5), h.supervisor_events.recv())
        .await
        .expect("exit event in time");
    assert_eq!(event, Some(SupervisorEvent::Exited { code: Some(1) }));
    assert!(h.supervisor_events.try_recv().is_err());
    assert_eq!(stub.state.stop_requests(), 1);
}
