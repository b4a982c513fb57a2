pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod models;
pub mod observable;
pub mod session;
pub mod sfu;
pub mod signaling;
pub mod state;

use std::rc::Rc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::{ClientConfig, RoomLink};
use crate::error::Result;
use crate::events::{create_event_bus, EventSender};
use crate::media::synthetic::{SyntheticCapture, SyntheticDevices};
use crate::session::RoomSession;
use crate::sfu::headless::HeadlessDevice;
use crate::signaling::websocket::WebSocketConnector;
use crate::state::RoomContext;

/// Options for a headless client run.
#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    pub config: ClientConfig,
    pub audio_devices: usize,
    pub video_devices: usize,
}

/// Logs every room event as one JSON line.
fn spawn_event_logger(events: &EventSender) {
    let mut event_rx = events.subscribe();

    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "roomcall::events", "{}", json),
                    Err(e) => warn!("Failed to encode room event: {}", e),
                },
                Err(RecvError::Lagged(n)) => {
                    warn!("Event logger lagged, skipped {} events", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Joins a room over WebSocket signaling with synthetic devices and the
/// signaling-only SFU device, until interrupted.
///
/// Must run inside a current-thread runtime; the room is `!Send`.
pub async fn run_headless(options: HeadlessOptions) -> Result<()> {
    let HeadlessOptions {
        config,
        audio_devices,
        video_devices,
    } = options;

    let (event_tx, _event_rx) = create_event_bus();
    spawn_event_logger(&event_tx);

    let context = RoomContext {
        devices: Rc::new(SyntheticDevices::with_counts(audio_devices, video_devices)),
        capture: Rc::new(SyntheticCapture::new()),
        sfu: Rc::new(HeadlessDevice::new()),
        connector: Rc::new(WebSocketConnector),
        persistence: Rc::new(RoomLink::new(config.page_url.clone())),
    };

    info!(
        "Running headless with {} microphone(s), {} camera(s)",
        audio_devices, video_devices
    );
    let room = RoomSession::new(config, context, event_tx);

    let leave_on_interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => room.leave().await,
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
    };
    tokio::select! {
        _ = room.run() => {}
        _ = async { leave_on_interrupt.await; std::future::pending::<()>().await } => {}
    }
    Ok(())
}
