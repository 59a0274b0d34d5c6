mod support;

use std::time::Duration;

use blockpanel_core::{ConsoleLine, LogLevel, ServerPhase};
use blockpanel_host::{config::HostConfig, session::AppSession, shutdown::ShutdownReason};
use blockpanel_stub::StubState;
use support::{FAST_TIMINGS, eventually, start_stub};
use tokio::time::timeout;

fn attach_config(address: std::net::SocketAddr, data_dir: &std::path::Path) -> HostConfig {
    let mut config = HostConfig::attach(address.ip().to_string(), address.port(), data_dir.into());
    config.timings = FAST_TIMINGS;
    config
}

#[tokio::test]
async fn session_tracks_status_and_console() {
    let stub = start_stub(StubState::new()).await;
    stub.state
        .push_log(ConsoleLine::new("Done (3.2s)! For help, type \"help\"", LogLevel::Success))
        .await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let session = AppSession::create(attach_config(stub.address, dir.path()))
        .await
        .expect("create session");
    assert!(session.backend_handle().is_none());

    let mut status = session.status();
    timeout(Duration::from_secs(5), status.wait_for(|view| view.is_online()))
        .await
        .expect("status in time")
        .expect("monitor running");

    let console = session.console().clone();
    eventually("console history replay", || {
        console
            .snapshot()
            .iter()
            .any(|line| line.message.starts_with("Done (3.2s)!"))
    })
    .await;
    eventually("console connected", || console.is_connected()).await;

    session.send_console_command("  say hi  ");
    eventually("command echo", || {
        let lines = console.snapshot();
        lines.contains(&ConsoleLine::new("> say hi", LogLevel::Input))
            && lines.iter().any(|line| line.message == "[stub] ran: say hi")
    })
    .await;

    session.backend().start_server().await.expect("start");
    timeout(
        Duration::from_secs(5),
        status.wait_for(|view| match view {
            blockpanel_host::monitor::BackendView::Online(s) => s.status == ServerPhase::Online,
            _ => false,
        }),
    )
    .await
    .expect("online in time")
    .expect("monitor running");

    session.teardown();
}

#[tokio::test]
async fn session_shutdown_runs_once_and_exits() {
    let stub = start_stub(StubState::new()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let session = AppSession::create(attach_config(stub.address, dir.path()))
        .await
        .expect("create session");
    let mut ui_events = session.take_ui_events().expect("ui events");
    assert!(session.take_ui_events().is_none());

    let (exited_tx, exited_rx) = tokio::sync::oneshot::channel();
    session.spawn_exit_on_shutdown(move || {
        let _ = exited_tx.send(());
    });

    assert!(session.request_shutdown(ShutdownReason::WindowClose));
    assert!(!session.request_shutdown(ShutdownReason::UiClose));

    timeout(Duration::from_secs(5), exited_rx)
        .await
        .expect("exit callback in time")
        .expect("exit callback ran");
    assert_eq!(stub.state.stop_requests(), 1);
    assert!(ui_events.try_recv().is_ok());

    session.teardown();
    session.teardown();
}

#[tokio::test]
async fn disconnected_console_answers_locally() {
    let address = support::dead_address().await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let session = AppSession::create(attach_config(address, dir.path()))
        .await
        .expect("create session");

    session.send_console_command("list");
    let console = session.console().clone();
    eventually("local error line", || {
        console.snapshot().contains(&ConsoleLine::new(
            "Error: Not connected to console.",
            LogLevel::Error,
        ))
    })
    .await;
    assert!(!console.is_connected());
}
