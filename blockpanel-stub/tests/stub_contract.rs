use std::time::Duration;

use blockpanel_core::{BackendStatus, ConsoleLine, LogLevel, ServerPhase};
use blockpanel_stub::{StubState, build_router};
use futures::{SinkExt, StreamExt};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[tokio::test]
async fn status_reflects_start_and_stop() {
    let state = StubState::new();
    let (address, shutdown_tx) = start_stub(state.clone()).await;
    let client = reqwest::Client::new();

    let status: BackendStatus = client
        .get(format!("http://{address}/status"))
        .send()
        .await
        .expect("status request")
        .json()
        .await
        .expect("status body");
    assert_eq!(status.status, ServerPhase::Offline);

    let response = client
        .post(format!("http://{address}/start"))
        .send()
        .await
        .expect("start request");
    assert!(response.status().is_success());
    assert_eq!(state.phase().await, ServerPhase::Online);

    let status: BackendStatus = client
        .get(format!("http://{address}/status"))
        .send()
        .await
        .expect("status request")
        .json()
        .await
        .expect("status body");
    assert_eq!(status.status, ServerPhase::Online);
    assert_eq!(
        status.recent_logs.last(),
        Some(&ConsoleLine::new("Server started", LogLevel::Success))
    );

    client
        .post(format!("http://{address}/stop"))
        .send()
        .await
        .expect("stop request");
    assert_eq!(state.stop_requests(), 1);
    assert_eq!(state.phase().await, ServerPhase::Offline);
    assert_eq!(state.status_requests(), 2);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn console_replays_history_and_accepts_commands() {
    let state = StubState::new();
    state
        .push_log(ConsoleLine::new("Preparing spawn area", LogLevel::Info))
        .await;
    let (address, shutdown_tx) = start_stub(state.clone()).await;

    let (ws_stream, _) = connect_async(format!("ws://{address}/ws/console"))
        .await
        .expect("connect console");
    let (mut write, mut read) = ws_stream.split();

    let replayed = next_line(&mut read).await.expect("replayed line");
    assert_eq!(replayed, ConsoleLine::new("Preparing spawn area", LogLevel::Info));

    write
        .send(Message::Text("say hello".into()))
        .await
        .expect("send command");
    let echoed = next_line(&mut read).await.expect("echoed command");
    assert_eq!(echoed.message, "[stub] ran: say hello");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn console_attach_during_logging_sends_each_line_once() {
    const LINES: usize = 120;
    let state = StubState::new();
    let (address, shutdown_tx) = start_stub(state.clone()).await;

    let writer = {
        let state = state.clone();
        tokio::spawn(async move {
            for n in 0..LINES {
                state
                    .push_log(ConsoleLine::new(format!("tick {n}"), LogLevel::Info))
                    .await;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let (ws_stream, _) = connect_async(format!("ws://{address}/ws/console"))
        .await
        .expect("connect console");
    let (_write, mut read) = ws_stream.split();

    let mut seen = Vec::new();
    while let Some(line) = next_line(&mut read).await {
        let n: usize = line
            .message
            .strip_prefix("tick ")
            .and_then(|n| n.parse().ok())
            .expect("numbered line");
        seen.push(n);
        if n == LINES - 1 {
            break;
        }
    }
    writer.await.expect("writer task");

    assert_eq!(seen.last(), Some(&(LINES - 1)));
    assert!(
        seen.windows(2).all(|pair| pair[0] < pair[1]),
        "lines repeated or reordered: {seen:?}"
    );

    let _ = shutdown_tx.send(());
}

async fn next_line<S>(read: &mut S) -> Option<ConsoleLine>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = timeout(Duration::from_secs(2), read.next()).await.ok()??.ok()?;
        if let Message::Text(text) = message {
            return Some(ConsoleLine::from_frame(text.as_str()));
        }
    }
}

async fn start_stub(state: StubState) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral stub socket");
    let address = listener.local_addr().expect("stub local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, build_router(state)).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (address.to_string(), shutdown_tx)
}
