//! Publishes the local audio and video tracks.
//!
//! For each kind the session keeps the server-side producer in step with the
//! local track: produce when a track appears, replace the track in place on a
//! device switch, close when the track goes away. Reconciliation runs whenever
//! the track or the send transport changes; a change that lands while a
//! reconciliation of the same kind is awaiting the server is folded into one
//! more pass instead of running concurrently.

use async_trait::async_trait;
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::media::{same_track, TrackSource};
use crate::models::{MediaKind, ProducerId};
use crate::observable::Observable;
use crate::sfu::{Producer, SendTransport, SendTransportHandler, SfuDevice};
use crate::signaling::protocol::{ClientMessage, ServerInit};
use crate::signaling::SignalingChannel;

struct ProducerSlot {
    source: Rc<TrackSource>,
    producer: Observable<Option<Rc<dyn Producer>>>,
    busy: Cell<bool>,
    dirty: Cell<bool>,
}

impl ProducerSlot {
    fn new(source: Rc<TrackSource>) -> Self {
        Self {
            source,
            producer: Observable::new(None),
            busy: Cell::new(false),
            dirty: Cell::new(false),
        }
    }
}

struct BusyGuard<'a>(&'a Cell<bool>);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct ProducerSession {
    device: Rc<dyn SfuDevice>,
    pub transport: Observable<Option<Rc<dyn SendTransport>>>,
    audio: ProducerSlot,
    video: ProducerSlot,
}

impl ProducerSession {
    pub fn new(
        device: Rc<dyn SfuDevice>,
        audio: Rc<TrackSource>,
        video: Rc<TrackSource>,
    ) -> Rc<Self> {
        let session = Rc::new(Self {
            device,
            transport: Observable::new(None),
            audio: ProducerSlot::new(audio),
            video: ProducerSlot::new(video),
        });

        for kind in [MediaKind::Audio, MediaKind::Video] {
            let slot = session.slot(kind);
            slot.source.track.subscribe_weak(&session, move |session, _| async move {
                session.update_producer(kind).await
            });
            session.transport.subscribe_weak(&session, move |session, _| async move {
                session.update_producer(kind).await
            });
            slot.source.pause.subscribe_weak(&session, move |session, _| async move {
                session.update_pause(kind)
            });
            slot.producer.subscribe_weak(&session, move |session, _| async move {
                session.update_pause(kind)
            });
        }
        session
    }

    fn slot(&self, kind: MediaKind) -> &ProducerSlot {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    pub fn producer(&self, kind: MediaKind) -> Option<Rc<dyn Producer>> {
        self.slot(kind).producer.get()
    }

    /// Live producers, audio first.
    pub fn producers(&self) -> Vec<Rc<dyn Producer>> {
        [MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .filter_map(|kind| self.producer(kind))
            .filter(|p| !p.is_closed())
            .collect()
    }

    /// Loads the device, answers the server's Init with our capabilities and
    /// opens the send transport.
    pub async fn start(&self, init: &ServerInit, channel: Rc<SignalingChannel>) -> Result<()> {
        self.device.load(&init.router_rtp_capabilities).await?;
        channel.send(&ClientMessage::Init {
            rtp_capabilities: self.device.rtp_capabilities(),
        });

        let handler = Rc::new(ChannelSendHandler { channel });
        let transport = self
            .device
            .create_send_transport(&init.producer_transport_options, handler)?;
        self.attach(transport).await;
        Ok(())
    }

    pub(crate) async fn attach(&self, transport: Rc<dyn SendTransport>) {
        info!("Send transport {} ready", transport.id());
        self.transport.set(Some(transport)).await;
    }

    /// Stops both local tracks, closes both producers, then the transport.
    /// Safe to call repeatedly and with any part already gone.
    pub async fn stop(&self) {
        self.video.source.release().await;
        self.audio.source.release().await;

        for kind in [MediaKind::Video, MediaKind::Audio] {
            let slot = self.slot(kind);
            if let Some(producer) = slot.producer.get() {
                producer.close();
                slot.producer.set(None).await;
            }
        }

        if let Some(transport) = self.transport.get() {
            transport.close();
            self.transport.set(None).await;
            info!("Send transport {} closed", transport.id());
        }
    }

    async fn update_producer(&self, kind: MediaKind) {
        let slot = self.slot(kind);
        if slot.busy.get() {
            slot.dirty.set(true);
            return;
        }
        slot.busy.set(true);
        let _busy = BusyGuard(&slot.busy);

        loop {
            slot.dirty.set(false);
            self.reconcile(kind).await;
            if !slot.dirty.get() {
                break;
            }
        }
    }

    async fn reconcile(&self, kind: MediaKind) {
        let slot = self.slot(kind);
        let Some(transport) = self.transport.get() else {
            return;
        };
        if transport.is_closed() {
            return;
        }
        let track = slot.source.track.get();
        if let Some(track) = &track {
            if !track.is_live() {
                debug!("{} track {} ended, waiting for replacement", kind, track.id());
                return;
            }
        }

        match (track, slot.producer.get()) {
            (Some(track), Some(producer)) => {
                if producer.track().map(|t| same_track(&t, &track)).unwrap_or(false) {
                    return;
                }
                match producer.replace_track(track.clone()).await {
                    Ok(()) => info!("Producer {} now sends {}", producer.id(), track.id()),
                    Err(e) => warn!("Failed to replace {} track: {}", kind, e),
                }
            }
            (Some(track), None) => match transport.produce(track).await {
                Ok(producer) => {
                    let current = self.transport.get();
                    let still_attached = current
                        .map(|t| Rc::ptr_eq(&t, &transport) && !t.is_closed())
                        .unwrap_or(false);
                    if !still_attached {
                        debug!("Transport went away while producing {}", kind);
                        producer.close();
                        return;
                    }
                    info!("{} producer {} created", kind, producer.id());
                    slot.producer.set(Some(producer)).await;
                }
                Err(e) => warn!("Failed to produce {}: {}", kind, e),
            },
            (None, Some(producer)) => {
                producer.close();
                info!("{} producer {} closed", kind, producer.id());
                slot.producer.set(None).await;
            }
            (None, None) => {}
        }
    }

    fn update_pause(&self, kind: MediaKind) {
        let slot = self.slot(kind);
        let Some(producer) = slot.producer.get() else {
            return;
        };
        if slot.source.pause.get() {
            producer.pause();
        } else {
            producer.resume();
        }
    }
}

/// Routes send-transport callbacks over the signaling channel.
struct ChannelSendHandler {
    channel: Rc<SignalingChannel>,
}

#[async_trait(?Send)]
impl SendTransportHandler for ChannelSendHandler {
    async fn connect(&self, dtls_parameters: Value) -> Result<()> {
        self.channel.connect_producer_transport(dtls_parameters).await
    }

    async fn produce(&self, kind: MediaKind, rtp_parameters: Value) -> Result<ProducerId> {
        self.channel.produce(kind, rtp_parameters).await
    }
}
