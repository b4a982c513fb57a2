use std::ops::Deref;
use std::rc::Rc;
use tracing::{debug, warn};

use super::{CaptureSource, DeviceEnumerator, TrackSource, VideoConstraints};
use crate::models::{FrameSize, MediaKind};
use crate::observable::Observable;

/// Local camera / screen-share state.
///
/// Toggling screen share swaps the capture source with the same stop-first
/// discipline as a device switch. Frame rate and size are applied live to the
/// active track and remembered for the next acquisition.
pub struct VideoState {
    source: Rc<TrackSource>,
    pub screen_share: Observable<bool>,
    pub frame_rate: Observable<u32>,
    pub frame_size: Observable<FrameSize>,
    devices: Rc<dyn DeviceEnumerator>,
    capture: Rc<dyn CaptureSource>,
}

impl VideoState {
    pub fn new(
        devices: Rc<dyn DeviceEnumerator>,
        capture: Rc<dyn CaptureSource>,
        frame_rate: u32,
        frame_size: FrameSize,
    ) -> Rc<Self> {
        let state = Rc::new(Self {
            source: TrackSource::new(MediaKind::Video),
            screen_share: Observable::new(false),
            frame_rate: Observable::new(frame_rate),
            frame_size: Observable::new(frame_size),
            devices,
            capture,
        });
        state
            .source
            .selected_input
            .subscribe_weak(&state, |state, _| async move { state.update_selected_track().await });
        state
            .screen_share
            .subscribe_weak(&state, |state, _| async move { state.update_selected_track().await });
        state
            .frame_rate
            .subscribe_weak(&state, |state, _| async move { state.update_constraints().await });
        state
            .frame_size
            .subscribe_weak(&state, |state, _| async move { state.update_constraints().await });
        state
    }

    pub fn source(&self) -> &Rc<TrackSource> {
        &self.source
    }

    pub async fn refresh_inputs(&self) {
        self.source.refresh_inputs(self.devices.as_ref()).await;
    }

    pub async fn set_screen_share(&self, enabled: bool) {
        self.screen_share.set(enabled).await;
    }

    pub async fn set_frame_rate(&self, frame_rate: u32) {
        self.frame_rate.set(frame_rate).await;
    }

    pub async fn set_frame_size(&self, width: u32, height: u32) {
        self.frame_size.set(FrameSize::new(width, height)).await;
    }

    pub async fn ensure_track(&self) {
        let wanted = self.screen_share.get() || self.source.selected_input.with(Option::is_some);
        if wanted && !self.source.is_active() {
            self.update_selected_track().await;
        }
    }

    fn constraints(&self, device_id: Option<String>) -> VideoConstraints {
        VideoConstraints {
            device_id,
            frame_size: self.frame_size.get(),
            frame_rate: self.frame_rate.get(),
        }
    }

    async fn update_selected_track(&self) {
        let capture = self.capture.clone();
        if self.screen_share.get() {
            let constraints = self.constraints(None);
            self.source
                .switch_track(async move { capture.capture_display(&constraints).await })
                .await;
            return;
        }

        let Some(device) = self.source.selected_input.get() else {
            self.source.release().await;
            return;
        };
        let constraints = self.constraints(Some(device.device_id));
        self.source
            .switch_track(async move { capture.capture_video(&constraints).await })
            .await;
    }

    async fn update_constraints(&self) {
        let Some(track) = self.source.track.get() else {
            return;
        };
        if !track.is_live() {
            return;
        }
        let constraints = self.constraints(None);
        debug!("Applying constraints {:?} to {}", constraints, track.id());
        if let Err(e) = track.apply_constraints(&constraints).await {
            warn!("Failed to apply constraints to {}: {}", track.id(), e);
        }
    }
}

impl Deref for VideoState {
    type Target = TrackSource;

    fn deref(&self) -> &TrackSource {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::synthetic::{SyntheticCapture, SyntheticDevices};
    use crate::media::TrackStatus;
    use crate::models::DeviceInfo;

    fn camera(id: &str) -> DeviceInfo {
        DeviceInfo::new(id, format!("Camera {id}"), MediaKind::Video)
    }

    fn video_state(capture: &Rc<SyntheticCapture>) -> Rc<VideoState> {
        let devices = Rc::new(SyntheticDevices::new(vec![camera("c1")]));
        VideoState::new(devices, capture.clone(), 30, FrameSize::default())
    }

    #[tokio::test]
    async fn screen_share_swaps_source_without_overlap() {
        let capture = Rc::new(SyntheticCapture::new());
        let video = video_state(&capture);
        video.refresh_inputs().await;
        let camera_track = video.track.get().unwrap();

        video.set_screen_share(true).await;

        let display = video.track.get().unwrap();
        assert!(!camera_track.is_live());
        assert!(display.is_live());
        assert!(capture.is_display(display.id()));
        assert_eq!(capture.max_concurrent_live(MediaKind::Video), 1);

        video.set_screen_share(false).await;
        let back = video.track.get().unwrap();
        assert!(!capture.is_display(back.id()));
        assert!(!display.is_live());
    }

    #[tokio::test]
    async fn frame_changes_apply_live_without_restart() {
        let capture = Rc::new(SyntheticCapture::new());
        let video = video_state(&capture);
        video.refresh_inputs().await;
        let track = video.track.get().unwrap();

        video.set_frame_rate(15).await;
        video.set_frame_size(640, 480).await;

        assert_eq!(video.track.get().unwrap().id(), track.id());
        assert_eq!(capture.issued_count(), 1);
        let applied = capture.constraints_of(track.id()).unwrap();
        assert_eq!(applied.frame_rate, 15);
        assert_eq!(applied.frame_size, FrameSize::new(640, 480));
    }

    #[tokio::test]
    async fn frame_changes_without_track_are_remembered() {
        let capture = Rc::new(SyntheticCapture::new());
        let video = video_state(&capture);

        video.set_frame_rate(24).await;
        video.set_frame_size(1280, 720).await;
        assert_eq!(capture.issued_count(), 0);

        video.refresh_inputs().await;
        let track = video.track.get().unwrap();
        let applied = capture.constraints_of(track.id()).unwrap();
        assert_eq!(applied.frame_rate, 24);
        assert_eq!(applied.frame_size, FrameSize::new(1280, 720));
        assert_eq!(applied.device_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn ensure_track_reacquires_after_release() {
        let capture = Rc::new(SyntheticCapture::new());
        let video = video_state(&capture);
        video.refresh_inputs().await;

        video.release().await;
        assert_eq!(video.status.get(), TrackStatus::NoTrack);

        video.ensure_track().await;
        assert!(video.is_active());
        assert_eq!(capture.issued_count(), 2);
    }
}
