pub mod audio;
pub mod synthetic;
pub mod video;

use async_trait::async_trait;
use serde::Serialize;
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{DeviceInfo, FrameSize, MediaKind};
use crate::observable::Observable;

/// A live local or remote media track.
#[async_trait(?Send)]
pub trait MediaTrack: fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn is_live(&self) -> bool;
    /// Ends the track and releases the capture device behind it. Idempotent.
    fn stop(&self);
    async fn apply_constraints(&self, constraints: &VideoConstraints) -> Result<()>;
}

pub type TrackHandle = Rc<dyn MediaTrack>;

pub fn same_track(a: &TrackHandle, b: &TrackHandle) -> bool {
    a.id() == b.id()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    pub device_id: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub channel_count: u16,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            device_id: None,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: false,
            channel_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    pub device_id: Option<String>,
    pub frame_size: FrameSize,
    pub frame_rate: u32,
}

/// Lists input devices of every kind.
#[async_trait(?Send)]
pub trait DeviceEnumerator {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;
}

/// Acquires local capture tracks. Failures surface as `Error::Acquisition`.
#[async_trait(?Send)]
pub trait CaptureSource {
    async fn capture_audio(&self, constraints: &AudioConstraints) -> Result<TrackHandle>;
    async fn capture_video(&self, constraints: &VideoConstraints) -> Result<TrackHandle>;
    async fn capture_display(&self, constraints: &VideoConstraints) -> Result<TrackHandle>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    NoTrack,
    Acquiring,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InputChange {
    Keep,
    Select(DeviceInfo),
    Clear,
}

/// Decides the selected input after the device list changed.
pub(crate) fn reconcile_input(inputs: &[DeviceInfo], current: Option<&DeviceInfo>) -> InputChange {
    if let Some(current) = current {
        if inputs.iter().any(|d| d.device_id == current.device_id) {
            return InputChange::Keep;
        }
    }
    match inputs.first() {
        Some(first) => InputChange::Select(first.clone()),
        None if current.is_some() => InputChange::Clear,
        None => InputChange::Keep,
    }
}

/// Device selection and active-track state shared by audio and video.
///
/// At most one track is active at a time. Switching always stops the previous
/// track before the next one is acquired, and a failed acquisition leaves the
/// source at `NoTrack` with the error kept in `last_error`.
pub struct TrackSource {
    kind: MediaKind,
    pub inputs: Observable<Vec<DeviceInfo>>,
    pub selected_input: Observable<Option<DeviceInfo>>,
    pub track: Observable<Option<TrackHandle>>,
    pub pause: Observable<bool>,
    pub status: Observable<TrackStatus>,
    pub last_error: Observable<Option<String>>,
    generation: Cell<u64>,
}

impl TrackSource {
    pub(crate) fn new(kind: MediaKind) -> Rc<Self> {
        let source = Rc::new(Self {
            kind,
            inputs: Observable::new(Vec::new()),
            selected_input: Observable::new(None),
            track: Observable::new(None),
            pause: Observable::new(false),
            status: Observable::new(TrackStatus::NoTrack),
            last_error: Observable::new(None),
            generation: Cell::new(0),
        });
        source
            .inputs
            .subscribe_weak(&source, |source, _| async move { source.update_selected_input().await });
        source
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.track
            .with(|track| track.as_ref().map(|t| t.is_live()).unwrap_or(false))
    }

    pub async fn select_input(&self, device: Option<DeviceInfo>) {
        self.selected_input.set(device).await;
    }

    pub async fn set_pause(&self, pause: bool) {
        self.pause.set(pause).await;
    }

    pub(crate) async fn refresh_inputs(&self, devices: &dyn DeviceEnumerator) {
        match devices.enumerate_devices().await {
            Ok(all) => {
                let inputs: Vec<DeviceInfo> =
                    all.into_iter().filter(|d| d.kind == self.kind).collect();
                debug!("{} inputs: {}", self.kind, inputs.len());
                self.inputs.set(inputs).await;
            }
            Err(e) => warn!("Failed to enumerate {} devices: {}", self.kind, e),
        }
    }

    async fn update_selected_input(&self) {
        let inputs = self.inputs.get();
        let current = self.selected_input.get();
        match reconcile_input(&inputs, current.as_ref()) {
            InputChange::Keep => {}
            InputChange::Select(device) => {
                info!("Selecting {} input: {}", self.kind, device.label);
                self.selected_input.set(Some(device)).await;
            }
            InputChange::Clear => {
                info!("No {} inputs left, clearing selection", self.kind);
                self.selected_input.set(None).await;
            }
        }
    }

    /// Stops the current track, then installs the result of `acquire`.
    ///
    /// A switch that was overtaken by a newer one while acquiring stops the
    /// track it obtained instead of installing it.
    pub(crate) async fn switch_track<F>(&self, acquire: F)
    where
        F: Future<Output = Result<TrackHandle>>,
    {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        if let Some(current) = self.track.get() {
            current.stop();
        }
        self.status.set(TrackStatus::Acquiring).await;

        let result = acquire.await;
        if self.generation.get() != generation {
            if let Ok(track) = result {
                debug!("Discarding superseded {} track {}", self.kind, track.id());
                track.stop();
            }
            return;
        }

        match result {
            Ok(track) => {
                info!("{} track {} acquired", self.kind, track.id());
                self.last_error.set(None).await;
                self.status.set(TrackStatus::Active).await;
                self.track.set(Some(track)).await;
            }
            Err(e) => {
                warn!("{} acquisition failed: {}", self.kind, e);
                self.last_error.set(Some(e.to_string())).await;
                self.status.set(TrackStatus::NoTrack).await;
                self.track.set(None).await;
            }
        }
    }

    /// Stops and forgets the active track, if any.
    pub async fn release(&self) {
        self.generation.set(self.generation.get() + 1);
        if let Some(track) = self.track.get() {
            track.stop();
            self.track.set(None).await;
            debug!("{} track {} released", self.kind, track.id());
        }
        if self.status.get() != TrackStatus::NoTrack {
            self.status.set(TrackStatus::NoTrack).await;
        }
    }
}
