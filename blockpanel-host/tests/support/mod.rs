#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use blockpanel_core::ShutdownState;
use blockpanel_host::{
    backend::BackendClient,
    bridge::UiEventReceiver,
    shutdown::{ShutdownCoordinator, ShutdownTimings},
    supervisor::{Supervisor, SupervisorEvent},
};
use blockpanel_stub::{StubState, build_router};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, watch},
};

pub const FAST_TIMINGS: ShutdownTimings = ShutdownTimings {
    stop_timeout: Duration::from_millis(300),
    grace_period: Duration::from_millis(100),
};

pub struct StubServer {
    pub address: SocketAddr,
    pub state: StubState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StubServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn start_stub(state: StubState) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral stub socket");
    let address = listener.local_addr().expect("stub local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, build_router(state.clone())).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    StubServer {
        address,
        state,
        shutdown: Some(shutdown_tx),
    }
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral socket");
    let address = listener.local_addr().expect("local addr");
    drop(listener);
    address
}

/// Accepts connections and never answers them.
pub async fn hung_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral socket");
    let address = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    address
}

pub struct Harness {
    pub coordinator: Arc<ShutdownCoordinator>,
    pub supervisor: Arc<Supervisor>,
    pub ui_events: UiEventReceiver,
    pub supervisor_events: mpsc::UnboundedReceiver<SupervisorEvent>,
}

pub fn harness(base_url: &str, timings: ShutdownTimings) -> Harness {
    let (state_tx, state_rx) = watch::channel(ShutdownState::Running);
    let (events_tx, supervisor_events) = mpsc::unbounded_channel();
    let (ui_tx, ui_events) = mpsc::unbounded_channel();
    let supervisor = Arc::new(Supervisor::new(state_rx, events_tx));
    let backend = BackendClient::new(base_url).expect("backend client");
    let coordinator = Arc::new(ShutdownCoordinator::new(
        state_tx,
        Arc::clone(&supervisor),
        backend,
        ui_tx,
        timings,
    ));
    Harness {
        coordinator,
        supervisor,
        ui_events,
        supervisor_events,
    }
}

pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
