use std::ops::Deref;
use std::rc::Rc;

use super::{AudioConstraints, CaptureSource, DeviceEnumerator, TrackSource};
use crate::models::MediaKind;

/// Local microphone state: input selection, the active audio track and the
/// pause flag published to the producer.
pub struct AudioState {
    source: Rc<TrackSource>,
    devices: Rc<dyn DeviceEnumerator>,
    capture: Rc<dyn CaptureSource>,
}

impl AudioState {
    pub fn new(devices: Rc<dyn DeviceEnumerator>, capture: Rc<dyn CaptureSource>) -> Rc<Self> {
        let state = Rc::new(Self {
            source: TrackSource::new(MediaKind::Audio),
            devices,
            capture,
        });
        state
            .source
            .selected_input
            .subscribe_weak(&state, |state, _| async move { state.update_selected_track().await });
        state
    }

    pub fn source(&self) -> &Rc<TrackSource> {
        &self.source
    }

    /// Re-reads the device list; call on every device-change notification.
    pub async fn refresh_inputs(&self) {
        self.source.refresh_inputs(self.devices.as_ref()).await;
    }

    /// Re-acquires a track when an input is selected but nothing is live.
    pub async fn ensure_track(&self) {
        if !self.source.is_active() && self.source.selected_input.with(Option::is_some) {
            self.update_selected_track().await;
        }
    }

    async fn update_selected_track(&self) {
        let Some(device) = self.source.selected_input.get() else {
            self.source.release().await;
            return;
        };
        let constraints = AudioConstraints {
            device_id: Some(device.device_id),
            ..AudioConstraints::default()
        };
        let capture = self.capture.clone();
        self.source
            .switch_track(async move { capture.capture_audio(&constraints).await })
            .await;
    }
}

impl Deref for AudioState {
    type Target = TrackSource;

    fn deref(&self) -> &TrackSource {
        &self.source
    }
}
