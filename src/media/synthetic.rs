//! In-process device and capture backends.
//!
//! The headless client and the tests run the full negotiation state machine
//! against these: devices come from a configurable list and captured tracks
//! carry no samples, but they do keep their live flag and last constraints so
//! ownership and constraint handling stay observable.

use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use uuid::Uuid;

use super::{AudioConstraints, CaptureSource, DeviceEnumerator, MediaTrack, TrackHandle, VideoConstraints};
use crate::error::{Error, Result};
use crate::models::{DeviceInfo, MediaKind};

#[derive(Debug)]
pub struct SyntheticTrack {
    id: String,
    kind: MediaKind,
    display: bool,
    live: Cell<bool>,
    constraints: RefCell<Option<VideoConstraints>>,
}

impl SyntheticTrack {
    pub fn new(kind: MediaKind) -> Self {
        Self::with_id(format!("{}-{}", kind, Uuid::new_v4()), kind)
    }

    pub fn with_id(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            display: false,
            live: Cell::new(true),
            constraints: RefCell::new(None),
        }
    }

    pub fn constraints(&self) -> Option<VideoConstraints> {
        self.constraints.borrow().clone()
    }
}

#[async_trait(?Send)]
impl MediaTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_live(&self) -> bool {
        self.live.get()
    }

    fn stop(&self) {
        self.live.set(false);
    }

    async fn apply_constraints(&self, constraints: &VideoConstraints) -> Result<()> {
        if !self.is_live() {
            return Err(Error::Acquisition(format!("track {} has ended", self.id)));
        }
        let mut current = self.constraints.borrow_mut();
        let device_id = current.as_ref().and_then(|c| c.device_id.clone());
        *current = Some(VideoConstraints {
            device_id: constraints.device_id.clone().or(device_id),
            ..constraints.clone()
        });
        Ok(())
    }
}

/// Device list that can be swapped to simulate hot-plugging.
#[derive(Debug, Default)]
pub struct SyntheticDevices {
    devices: RefCell<Vec<DeviceInfo>>,
}

impl SyntheticDevices {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices: RefCell::new(devices),
        }
    }

    /// `audio` microphones and `video` cameras with generated ids.
    pub fn with_counts(audio: usize, video: usize) -> Self {
        let mut devices = Vec::with_capacity(audio + video);
        for i in 0..audio {
            devices.push(DeviceInfo::new(format!("mic-{i}"), format!("Synthetic microphone {i}"), MediaKind::Audio));
        }
        for i in 0..video {
            devices.push(DeviceInfo::new(format!("cam-{i}"), format!("Synthetic camera {i}"), MediaKind::Video));
        }
        Self::new(devices)
    }

    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        *self.devices.borrow_mut() = devices;
    }
}

#[async_trait(?Send)]
impl DeviceEnumerator for SyntheticDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        tokio::task::yield_now().await;
        Ok(self.devices.borrow().clone())
    }
}

/// Hands out [`SyntheticTrack`]s and remembers every one it issued.
#[derive(Debug, Default)]
pub struct SyntheticCapture {
    denied: Cell<bool>,
    issued: RefCell<Vec<Rc<SyntheticTrack>>>,
    max_live: RefCell<[usize; 2]>,
}

impl SyntheticCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every capture fails as if permission was refused.
    pub fn set_denied(&self, denied: bool) {
        self.denied.set(denied);
    }

    pub fn issued_count(&self) -> usize {
        self.issued.borrow().len()
    }

    pub fn live_count(&self, kind: MediaKind) -> usize {
        self.issued
            .borrow()
            .iter()
            .filter(|t| t.kind == kind && t.is_live())
            .count()
    }

    /// Highest number of simultaneously live tracks of `kind` seen at issue time.
    pub fn max_concurrent_live(&self, kind: MediaKind) -> usize {
        self.max_live.borrow()[slot(kind)]
    }

    pub fn is_display(&self, id: &str) -> bool {
        self.find(id).map(|t| t.display).unwrap_or(false)
    }

    pub fn constraints_of(&self, id: &str) -> Option<VideoConstraints> {
        self.find(id).and_then(|t| t.constraints())
    }

    fn find(&self, id: &str) -> Option<Rc<SyntheticTrack>> {
        self.issued.borrow().iter().find(|t| t.id == id).cloned()
    }

    async fn issue(&self, track: SyntheticTrack) -> Result<TrackHandle> {
        tokio::task::yield_now().await;
        if self.denied.get() {
            return Err(Error::Acquisition(format!("permission denied for {}", track.kind)));
        }
        let kind = track.kind;
        let track = Rc::new(track);
        self.issued.borrow_mut().push(track.clone());

        let live = self.live_count(kind);
        let mut max_live = self.max_live.borrow_mut();
        max_live[slot(kind)] = max_live[slot(kind)].max(live);
        drop(max_live);
        Ok(track as TrackHandle)
    }
}

fn slot(kind: MediaKind) -> usize {
    match kind {
        MediaKind::Audio => 0,
        MediaKind::Video => 1,
    }
}

#[async_trait(?Send)]
impl CaptureSource for SyntheticCapture {
    async fn capture_audio(&self, _constraints: &AudioConstraints) -> Result<TrackHandle> {
        self.issue(SyntheticTrack::new(MediaKind::Audio)).await
    }

    async fn capture_video(&self, constraints: &VideoConstraints) -> Result<TrackHandle> {
        let track = SyntheticTrack::new(MediaKind::Video);
        *track.constraints.borrow_mut() = Some(constraints.clone());
        self.issue(track).await
    }

    async fn capture_display(&self, constraints: &VideoConstraints) -> Result<TrackHandle> {
        let mut track = SyntheticTrack::new(MediaKind::Video);
        track.display = true;
        *track.constraints.borrow_mut() = Some(constraints.clone());
        self.issue(track).await
    }
}
