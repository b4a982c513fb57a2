use serde::Serialize;
use std::rc::Rc;

use crate::config::RoomPersistence;
use crate::media::{CaptureSource, DeviceEnumerator};
use crate::models::RoomId;
use crate::observable::Observable;
use crate::sfu::SfuDevice;
use crate::signaling::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    Joining,
    Connected,
    ReconnectWait,
    Leaving,
}

/// Room-level observables: keep-running flag, room identity and phase.
#[derive(Clone)]
pub struct RoomState {
    pub running: Observable<bool>,
    pub room_id: Observable<Option<RoomId>>,
    pub phase: Observable<RoomPhase>,
}

impl RoomState {
    pub fn new(room_id: Option<RoomId>) -> Self {
        Self {
            running: Observable::new(true),
            room_id: Observable::new(room_id),
            phase: Observable::new(RoomPhase::Joining),
        }
    }
}

/// Platform capabilities the room runs on.
#[derive(Clone)]
pub struct RoomContext {
    pub devices: Rc<dyn DeviceEnumerator>,
    pub capture: Rc<dyn CaptureSource>,
    pub sfu: Rc<dyn SfuDevice>,
    pub connector: Rc<dyn Connector>,
    pub persistence: Rc<dyn RoomPersistence>,
}
