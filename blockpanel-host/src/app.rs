use std::{path::PathBuf, sync::Arc, time::Duration};

use blockpanel_core::{
    BridgeReply, BridgeRequest, HostEvent, LogLevel, ServerPhase, ShutdownState,
};
use blockpanel_host::{
    bridge::{Bridge, BridgeSender, UiEventReceiver, WindowControl, bridge_channel, serve_bridge},
    dialogs::{NativeDirectoryPicker, show_error},
    monitor::BackendView,
    session::AppSession,
    shutdown::ShutdownReason,
    supervisor::{CrashReport, SupervisorEvent, drain_crash_reports},
    ui_state::{
        MIN_WINDOW_HEIGHT, MIN_WINDOW_WIDTH, SavedUiState, WindowPlacement,
        clamp_placement_in_rect, load_ui_state, save_ui_state_with_retry, ui_state_path,
    },
};
use eframe::egui::{self, Color32, RichText, Sense};
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, info, warn};

const APP_TITLE: &str = "BlockPanel";
const TITLE_BAR_HEIGHT: f32 = 32.0;
const REPAINT_INTERVAL: Duration = Duration::from_millis(250);
const PLACEMENT_MARGIN: i32 = 16;

/// Window commands issued from bridge tasks.
struct EguiWindow {
    ctx: egui::Context,
}

impl WindowControl for EguiWindow {
    fn minimize(&self) {
        self.ctx.send_viewport_cmd(egui::ViewportCommand::Minimized(true));
        self.ctx.request_repaint();
    }

    fn toggle_maximize(&self) {
        let maximized = self.ctx.input(|i| i.viewport().maximized.unwrap_or(false));
        self.ctx.send_viewport_cmd(egui::ViewportCommand::Maximized(!maximized));
        self.ctx.request_repaint();
    }
}

enum ActionOutcome {
    Done(&'static str),
    Failed(String),
}

struct ShellApp {
    runtime: Handle,
    session: Arc<AppSession>,
    bridge: BridgeSender,
    status: watch::Receiver<BackendView>,
    shutdown_state: watch::Receiver<ShutdownState>,
    supervisor_events: Option<mpsc::UnboundedReceiver<SupervisorEvent>>,
    ui_events: Option<UiEventReceiver>,
    ui_state: SavedUiState,
    state_path: PathBuf,
    closing: bool,
    command_input: String,
    action_tx: mpsc::UnboundedSender<ActionOutcome>,
    action_rx: mpsc::UnboundedReceiver<ActionOutcome>,
    action_message: Option<(String, bool)>,
    pending_folder: Option<oneshot::Receiver<BridgeReply>>,
}

impl ShellApp {
    fn new(
        runtime: Handle,
        session: Arc<AppSession>,
        bridge: BridgeSender,
        ui_state: SavedUiState,
        state_path: PathBuf,
    ) -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Self {
            status: session.status(),
            shutdown_state: session.shutdown_state(),
            supervisor_events: session.take_supervisor_events(),
            ui_events: session.take_ui_events(),
            runtime,
            session,
            bridge,
            ui_state,
            state_path,
            closing: false,
            command_input: String::new(),
            action_tx,
            action_rx,
            action_message: None,
            pending_folder: None,
        }
    }

    fn handle_native_close(&mut self, ctx: &egui::Context) {
        if !ctx.input(|i| i.viewport().close_requested()) {
            return;
        }
        // The window stays open until the shutdown sequence exits the process.
        ctx.send_viewport_cmd(egui::ViewportCommand::CancelClose);
        let _enter = self.runtime.enter();
        if !self.session.request_shutdown(ShutdownReason::WindowClose) {
            debug!("close request ignored; shutdown already running");
        }
    }

    fn poll_host_events(&mut self, ctx: &egui::Context) {
        let mut close_requested = false;
        if let Some(events) = self.ui_events.as_mut() {
            while let Ok(event) = events.try_recv() {
                match event {
                    HostEvent::CloseRequested => close_requested = true,
                }
            }
        }
        if close_requested && !self.closing {
            info!("backend shutdown started; showing overlay");
            self.closing = true;
            self.persist_ui_state(ctx);
            self.bridge.send(BridgeRequest::CloseConfirmed);
        }

        if !self.shutdown_state.borrow().is_running() {
            self.closing = true;
        }
    }

    fn poll_supervisor_events(&mut self) {
        let Some(events) = self.supervisor_events.as_mut() else {
            return;
        };
        for report in drain_crash_reports(events) {
            self.show_crash(report);
        }
    }

    fn show_crash(&self, report: CrashReport) {
        let message = report.message();
        self.runtime.spawn_blocking(move || {
            show_error(CrashReport::TITLE, &message);
        });
    }

    fn poll_actions(&mut self) {
        while let Ok(outcome) = self.action_rx.try_recv() {
            self.action_message = Some(match outcome {
                ActionOutcome::Done(text) => (text.to_owned(), false),
                ActionOutcome::Failed(text) => (text, true),
            });
        }

        if let Some(rx) = self.pending_folder.as_mut() {
            match rx.try_recv() {
                Ok(BridgeReply::Directory(Some(path))) => {
                    info!(path = %path.display(), "server folder selected");
                    self.ui_state.last_directory = Some(path);
                    self.pending_folder = None;
                }
                Ok(_) => self.pending_folder = None,
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    warn!("directory request dropped");
                    self.pending_folder = None;
                }
            }
        }
    }

    fn persist_ui_state(&mut self, ctx: &egui::Context) {
        let (outer, maximized) =
            ctx.input(|i| (i.viewport().outer_rect, i.viewport().maximized.unwrap_or(false)));
        self.ui_state.maximized = maximized;
        if let Some(rect) = outer
            && !maximized
        {
            self.ui_state.window = Some(
                WindowPlacement {
                    x: rect.min.x.round() as i32,
                    y: rect.min.y.round() as i32,
                    w: rect.width().round().max(0.0) as u32,
                    h: rect.height().round().max(0.0) as u32,
                }
                .normalized(MIN_WINDOW_WIDTH, MIN_WINDOW_HEIGHT),
            );
        }

        let state = self.ui_state.clone();
        let path = self.state_path.clone();
        self.runtime.spawn_blocking(move || {
            if let Err(err) = save_ui_state_with_retry(&path, &state) {
                warn!("failed to save ui state: {err}");
            }
        });
    }

    fn spawn_action(&self, label: &'static str, start: bool) {
        let backend = self.session.backend().clone();
        let tx = self.action_tx.clone();
        self.runtime.spawn(async move {
            let result = if start {
                backend.start_server().await
            } else {
                backend.stop_server().await
            };
            let outcome = match result {
                Ok(()) => ActionOutcome::Done(label),
                Err(err) => ActionOutcome::Failed(format!("{label} failed: {err}")),
            };
            let _ = tx.send(outcome);
        });
    }

    fn submit_command(&mut self) {
        let command = std::mem::take(&mut self.command_input);
        self.session.send_console_command(&command);
    }

    fn title_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("title_bar")
            .exact_height(TITLE_BAR_HEIGHT)
            .show(ctx, |ui| {
                let bar = ui.max_rect();
                let response =
                    ui.interact(bar, ui.id().with("title_drag"), Sense::click_and_drag());
                if response.drag_started() {
                    ctx.send_viewport_cmd(egui::ViewportCommand::StartDrag);
                }
                if response.double_clicked() {
                    self.bridge.send(BridgeRequest::ToggleMaximize);
                }

                ui.horizontal_centered(|ui| {
                    ui.label(RichText::new(APP_TITLE).strong());
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.button("🗙").on_hover_text("Close").clicked() {
                            self.bridge.send(BridgeRequest::Close);
                        }
                        if ui.button("🗖").on_hover_text("Maximize").clicked() {
                            self.bridge.send(BridgeRequest::ToggleMaximize);
                        }
                        if ui.button("🗕").on_hover_text("Minimize").clicked() {
                            self.bridge.send(BridgeRequest::Minimize);
                        }
                    });
                });
            });
    }

    fn status_panel(&mut self, ctx: &egui::Context) {
        let view = self.status.borrow().clone();
        egui::TopBottomPanel::top("status").show(ctx, |ui| {
            ui.add_space(6.0);
            ui.horizontal(|ui| {
                let (text, color) = match &view {
                    BackendView::Connecting => ("Connecting…".to_owned(), Color32::GRAY),
                    BackendView::Offline => ("Backend unreachable".to_owned(), Color32::LIGHT_RED),
                    BackendView::Online(status) => {
                        (status.status.label().to_owned(), phase_color(status.status))
                    }
                };
                ui.colored_label(color, RichText::new(text).strong());

                if let BackendView::Online(status) = &view {
                    if let Some(kind) = &status.server_type {
                        ui.separator();
                        ui.label(kind);
                    }
                    if let Some(version) = &status.minecraft_version {
                        ui.label(version);
                    }
                    if let Some(cpu) = status.cpu {
                        ui.separator();
                        ui.label(format!("CPU {cpu:.1}%"));
                    }
                    if let Some(ram) = &status.ram {
                        ui.label(format!("RAM {ram}"));
                    }
                    if let Some(uptime) = &status.uptime {
                        ui.label(format!("Up {uptime}"));
                    }
                }
            });

            ui.horizontal(|ui| {
                let online = view.is_online();
                if ui.add_enabled(online, egui::Button::new("Start server")).clicked() {
                    self.spawn_action("Start", true);
                }
                if ui.add_enabled(online, egui::Button::new("Stop server")).clicked() {
                    self.spawn_action("Stop", false);
                }
                let picking = self.pending_folder.is_some();
                if ui
                    .add_enabled(!picking, egui::Button::new("Choose server folder…"))
                    .clicked()
                {
                    self.pending_folder = Some(self.bridge.invoke(BridgeRequest::OpenDirectory));
                }
                if let Some(dir) = &self.ui_state.last_directory {
                    ui.label(RichText::new(dir.display().to_string()).weak());
                }
            });

            if let Some((message, failed)) = &self.action_message {
                let color = if *failed {
                    Color32::LIGHT_RED
                } else {
                    Color32::LIGHT_GREEN
                };
                ui.colored_label(color, message);
            }
            ui.add_space(6.0);
        });
    }

    fn console_panel(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("command").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                let connected = self.session.console().is_connected();
                let dot = if connected {
                    Color32::LIGHT_GREEN
                } else {
                    Color32::GRAY
                };
                ui.colored_label(dot, "●");
                let input = ui.add(
                    egui::TextEdit::singleline(&mut self.command_input)
                        .hint_text("Type a server command")
                        .desired_width(ui.available_width() - 60.0),
                );
                let entered = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if ui.button("Send").clicked() || entered {
                    self.submit_command();
                    input.request_focus();
                }
            });
            ui.add_space(4.0);
        });

        let lines = self.session.console().snapshot();
        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .auto_shrink([false, false])
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for line in &lines {
                        ui.label(
                            RichText::new(&line.message)
                                .monospace()
                                .color(level_color(line.level)),
                        );
                    }
                });
        });
    }

    fn closing_overlay(&self, ctx: &egui::Context) {
        if !self.closing {
            return;
        }
        let screen = ctx.screen_rect();
        egui::Area::new(egui::Id::new("closing_overlay"))
            .order(egui::Order::Foreground)
            .fixed_pos(screen.min)
            .show(ctx, |ui| {
                // Swallows clicks so nothing underneath can be used.
                let (rect, _) = ui.allocate_exact_size(screen.size(), Sense::click_and_drag());
                ui.painter()
                    .rect_filled(rect, 0.0, Color32::from_black_alpha(200));
                ui.painter().text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "Stopping server…",
                    egui::FontId::proportional(22.0),
                    Color32::WHITE,
                );
            });
    }
}

impl eframe::App for ShellApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_native_close(ctx);
        self.poll_host_events(ctx);
        self.poll_supervisor_events();
        self.poll_actions();

        ctx.request_repaint_after(REPAINT_INTERVAL);

        self.title_bar(ctx);
        self.status_panel(ctx);
        self.console_panel(ctx);
        self.closing_overlay(ctx);
    }
}

fn phase_color(phase: ServerPhase) -> Color32 {
    match phase {
        ServerPhase::Online => Color32::LIGHT_GREEN,
        ServerPhase::Starting => Color32::YELLOW,
        ServerPhase::Offline | ServerPhase::NotConfigured | ServerPhase::Unknown => {
            Color32::GRAY
        }
    }
}

fn level_color(level: LogLevel) -> Color32 {
    match level {
        LogLevel::Normal | LogLevel::Unknown => Color32::LIGHT_GRAY,
        LogLevel::Info => Color32::LIGHT_BLUE,
        LogLevel::Success => Color32::LIGHT_GREEN,
        LogLevel::Warning => Color32::YELLOW,
        LogLevel::Error => Color32::LIGHT_RED,
        LogLevel::Input => Color32::from_rgb(120, 220, 220),
    }
}

fn build_viewport(state: &SavedUiState) -> egui::ViewportBuilder {
    let mut builder = egui::ViewportBuilder::default()
        .with_title(APP_TITLE)
        .with_inner_size([
            WindowPlacement::default().w as f32,
            WindowPlacement::default().h as f32,
        ])
        .with_min_inner_size([MIN_WINDOW_WIDTH as f32, MIN_WINDOW_HEIGHT as f32])
        .with_decorations(false)
        .with_maximized(state.maximized);

    if let Some(saved) = state.window {
        let placement = saved.normalized(MIN_WINDOW_WIDTH, MIN_WINDOW_HEIGHT);
        builder = builder
            .with_position([placement.x as f32, placement.y as f32])
            .with_inner_size([placement.w as f32, placement.h as f32]);
    }
    builder
}

/// Keep a restored window on screen once the monitor size is known.
fn clamp_to_monitor(ctx: &egui::Context, state: &SavedUiState) {
    let Some(saved) = state.window else {
        return;
    };
    let Some(monitor) = ctx.input(|i| i.viewport().monitor_size) else {
        return;
    };
    let rect = [0, 0, monitor.x as i32, monitor.y as i32];
    let clamped = clamp_placement_in_rect(
        saved,
        MIN_WINDOW_WIDTH,
        MIN_WINDOW_HEIGHT,
        PLACEMENT_MARGIN,
        rect,
    );
    if clamped != saved {
        ctx.send_viewport_cmd(egui::ViewportCommand::OuterPosition(egui::pos2(
            clamped.x as f32,
            clamped.y as f32,
        )));
        ctx.send_viewport_cmd(egui::ViewportCommand::InnerSize(egui::vec2(
            clamped.w as f32,
            clamped.h as f32,
        )));
    }
}

/// Open the window and block until it closes.
pub fn run(runtime: Handle, session: Arc<AppSession>) -> Result<(), eframe::Error> {
    let data_dir = session.config().data_dir.clone();
    let state_path = ui_state_path(&data_dir);
    let ui_state = load_ui_state(&data_dir);

    let options = eframe::NativeOptions {
        viewport: build_viewport(&ui_state),
        ..Default::default()
    };

    eframe::run_native(
        APP_TITLE,
        options,
        Box::new(move |cc| {
            clamp_to_monitor(&cc.egui_ctx, &ui_state);
            let bridge = Arc::new(Bridge::new(
                EguiWindow {
                    ctx: cc.egui_ctx.clone(),
                },
                NativeDirectoryPicker::default(),
                Arc::clone(session.coordinator()),
            ));
            let (sender, calls) = bridge_channel();
            runtime.spawn(serve_bridge(bridge, calls));
            Ok(Box::new(ShellApp::new(
                runtime, session, sender, ui_state, state_path,
            )))
        }),
    )
}
