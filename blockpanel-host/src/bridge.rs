//! Host side of the UI bridge.
//!
//! The UI can only reach the host through [`BridgeRequest`], a closed enum.
//! Nothing in here hands the UI a path to anything else.

use std::{future::Future, path::PathBuf, sync::Arc};

use blockpanel_core::{BridgeReply, BridgeRequest, HostEvent};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::{
    HostError,
    shutdown::{ShutdownCoordinator, ShutdownReason},
};

pub trait WindowControl: Send + Sync {
    fn minimize(&self);
    fn toggle_maximize(&self);
}

pub trait DirectoryPicker: Send + Sync {
    fn pick_directory(&self) -> impl Future<Output = Option<PathBuf>> + Send;
}

pub type UiEventSender = mpsc::UnboundedSender<HostEvent>;
pub type UiEventReceiver = mpsc::UnboundedReceiver<HostEvent>;

pub struct Bridge<W, D> {
    window: W,
    picker: D,
    coordinator: Arc<ShutdownCoordinator>,
}

impl<W: WindowControl, D: DirectoryPicker> Bridge<W, D> {
    pub fn new(window: W, picker: D, coordinator: Arc<ShutdownCoordinator>) -> Self {
        Self {
            window,
            picker,
            coordinator,
        }
    }

    pub async fn handle(&self, request: BridgeRequest) -> BridgeReply {
        debug!(channel = request.channel(), "bridge request");
        match request {
            BridgeRequest::OpenDirectory => {
                BridgeReply::Directory(self.picker.pick_directory().await)
            }
            BridgeRequest::CloseConfirmed => {
                info!("ui acknowledged shutdown");
                BridgeReply::Acknowledged
            }
            BridgeRequest::Minimize => {
                self.window.minimize();
                BridgeReply::Attempted
            }
            BridgeRequest::ToggleMaximize => {
                self.window.toggle_maximize();
                BridgeReply::Attempted
            }
            BridgeRequest::Close => {
                if self
                    .coordinator
                    .spawn_shutdown(ShutdownReason::UiClose)
                    .is_none()
                {
                    debug!("close ignored; shutdown already running");
                }
                BridgeReply::Attempted
            }
        }
    }

    /// Entry point for callers that only have a channel name.
    pub async fn handle_raw(&self, channel: &str) -> Result<BridgeReply, HostError> {
        let request: BridgeRequest = channel.parse()?;
        Ok(self.handle(request).await)
    }
}

#[derive(Debug)]
pub struct BridgeCall {
    pub request: BridgeRequest,
    pub reply: Option<oneshot::Sender<BridgeReply>>,
}

/// UI-side handle for issuing bridge requests.
#[derive(Debug, Clone)]
pub struct BridgeSender {
    tx: mpsc::UnboundedSender<BridgeCall>,
}

impl BridgeSender {
    /// Fire-and-forget; the reply, if any, is dropped.
    pub fn send(&self, request: BridgeRequest) -> bool {
        self.tx
            .send(BridgeCall {
                request,
                reply: None,
            })
            .is_ok()
    }

    pub fn invoke(&self, request: BridgeRequest) -> oneshot::Receiver<BridgeReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        // A closed bridge drops the sender, which the caller sees as RecvError.
        let _ = self.tx.send(BridgeCall {
            request,
            reply: Some(reply_tx),
        });
        reply_rx
    }
}

pub fn bridge_channel() -> (BridgeSender, mpsc::UnboundedReceiver<BridgeCall>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BridgeSender { tx }, rx)
}

/// Serve bridge calls until every [`BridgeSender`] is dropped. Each call
/// gets its own task so an open dialog does not hold up window commands.
pub async fn serve_bridge<W, D>(
    bridge: Arc<Bridge<W, D>>,
    mut calls: mpsc::UnboundedReceiver<BridgeCall>,
) where
    W: WindowControl + 'static,
    D: DirectoryPicker + 'static,
{
    while let Some(call) = calls.recv().await {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let reply = bridge.handle(call.request).await;
            if let Some(reply_tx) = call.reply {
                let _ = reply_tx.send(reply);
            }
        });
    }
    debug!("bridge closed");
}
