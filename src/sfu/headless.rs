//! Signaling-only SFU device.
//!
//! Runs the complete transport/producer/consumer negotiation (DTLS connect
//! handshake, RTP parameter generation, server-assigned ids) without moving
//! any media. Remote tracks are [`SyntheticTrack`]s that end when their
//! consumer closes. Local tracks stay owned by their track source: closing a
//! producer detaches the track but never stops it.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    Consumer, Producer, RecvTransport, RecvTransportHandler, SendTransport, SendTransportHandler,
    SfuDevice,
};
use crate::error::{Error, Result};
use crate::media::synthetic::SyntheticTrack;
use crate::media::{MediaTrack, TrackHandle};
use crate::models::{ConsumerId, MediaKind, ProducerId};
use crate::signaling::protocol::{ConsumerOptions, TransportOptions};

#[derive(Debug, Default)]
pub struct HeadlessDevice {
    router_capabilities: RefCell<Option<Value>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn loaded_capabilities(&self) -> Result<Value> {
        self.router_capabilities
            .borrow()
            .clone()
            .ok_or_else(|| Error::Transport("device not loaded".into()))
    }
}

#[async_trait(?Send)]
impl SfuDevice for HeadlessDevice {
    async fn load(&self, router_rtp_capabilities: &Value) -> Result<()> {
        if !router_rtp_capabilities.is_object() {
            return Err(Error::Protocol("router RTP capabilities must be an object".into()));
        }
        let codecs = codecs_of(router_rtp_capabilities).len();
        *self.router_capabilities.borrow_mut() = Some(router_rtp_capabilities.clone());
        debug!("Device loaded with {} router codecs", codecs);
        Ok(())
    }

    fn rtp_capabilities(&self) -> Value {
        let capabilities = self.router_capabilities.borrow();
        let codecs = capabilities.as_ref().map(codecs_of).unwrap_or_default();
        let header_extensions = capabilities
            .as_ref()
            .and_then(|c| c.get("headerExtensions").cloned())
            .unwrap_or_else(|| json!([]));
        json!({ "codecs": codecs, "headerExtensions": header_extensions })
    }

    fn create_send_transport(
        &self,
        options: &TransportOptions,
        handler: Rc<dyn SendTransportHandler>,
    ) -> Result<Rc<dyn SendTransport>> {
        let router = self.loaded_capabilities()?;
        info!("Creating send transport {}", options.id);
        Ok(Rc::new(HeadlessSendTransport {
            base: TransportBase::new(&options.id),
            router,
            handler,
            next_mid: Cell::new(0),
            producers: RefCell::new(Vec::new()),
        }))
    }

    fn create_recv_transport(
        &self,
        options: &TransportOptions,
        handler: Rc<dyn RecvTransportHandler>,
    ) -> Result<Rc<dyn RecvTransport>> {
        self.loaded_capabilities()?;
        info!("Creating receive transport {}", options.id);
        Ok(Rc::new(HeadlessRecvTransport {
            base: TransportBase::new(&options.id),
            handler,
            consumers: RefCell::new(Vec::new()),
        }))
    }
}

fn codecs_of(capabilities: &Value) -> Vec<Value> {
    capabilities
        .get("codecs")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// State shared by both transport directions. `ops` serializes connect and
/// produce/consume so the handshake happens exactly once, before the first
/// operation.
struct TransportBase {
    id: String,
    connected: Cell<bool>,
    closed: Cell<bool>,
    ops: Mutex<()>,
}

impl TransportBase {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            connected: Cell::new(false),
            closed: Cell::new(false),
            ops: Mutex::new(()),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.get() {
            return Err(Error::Transport(format!("transport {} closed", self.id)));
        }
        Ok(())
    }
}

fn dtls_parameters() -> Value {
    let bytes: [u8; 32] = rand::random();
    let fingerprint = bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":");
    json!({
        "role": "client",
        "fingerprints": [{ "algorithm": "sha-256", "value": fingerprint }],
    })
}

fn rtp_parameters(router: &Value, kind: MediaKind, mid: u32) -> Result<Value> {
    let prefix = format!("{}/", kind.as_str());
    let codec = codecs_of(router)
        .into_iter()
        .find(|codec| {
            codec
                .get("mimeType")
                .and_then(Value::as_str)
                .map(|mime| mime.to_ascii_lowercase().starts_with(&prefix))
                .unwrap_or(false)
        })
        .ok_or_else(|| Error::Transport(format!("router has no {kind} codec")))?;

    let mut negotiated = json!({
        "mimeType": codec["mimeType"],
        "payloadType": codec.get("preferredPayloadType").cloned().unwrap_or(json!(100)),
        "clockRate": codec["clockRate"],
        "parameters": codec.get("parameters").cloned().unwrap_or_else(|| json!({})),
    });
    if let Some(channels) = codec.get("channels") {
        negotiated["channels"] = channels.clone();
    }

    Ok(json!({
        "mid": mid.to_string(),
        "codecs": [negotiated],
        "headerExtensions": [],
        "encodings": [{ "ssrc": rand::random::<u32>() }],
        "rtcp": { "cname": Uuid::new_v4().to_string(), "reducedSize": true },
    }))
}

struct HeadlessSendTransport {
    base: TransportBase,
    router: Value,
    handler: Rc<dyn SendTransportHandler>,
    next_mid: Cell<u32>,
    producers: RefCell<Vec<Rc<HeadlessProducer>>>,
}

#[async_trait(?Send)]
impl SendTransport for HeadlessSendTransport {
    fn id(&self) -> &str {
        &self.base.id
    }

    async fn produce(&self, track: TrackHandle) -> Result<Rc<dyn Producer>> {
        self.base.check_open()?;
        let _op = self.base.ops.lock().await;
        self.base.check_open()?;

        if !self.base.connected.get() {
            self.handler.connect(dtls_parameters()).await?;
            self.base.connected.set(true);
            debug!("Send transport {} connected", self.base.id);
        }
        if !track.is_live() {
            return Err(Error::Transport(format!("track {} has ended", track.id())));
        }

        let kind = track.kind();
        let mid = self.next_mid.get();
        self.next_mid.set(mid + 1);
        let parameters = rtp_parameters(&self.router, kind, mid)?;
        let id = self.handler.produce(kind, parameters).await?;
        self.base.check_open()?;

        let producer = Rc::new(HeadlessProducer {
            id,
            kind,
            track: RefCell::new(Some(track)),
            paused: Cell::new(false),
            closed: Cell::new(false),
        });
        self.producers.borrow_mut().push(producer.clone());
        Ok(producer)
    }

    fn close(&self) {
        if self.base.closed.replace(true) {
            return;
        }
        for producer in self.producers.borrow_mut().drain(..) {
            producer.close();
        }
        debug!("Send transport {} closed", self.base.id);
    }

    fn is_closed(&self) -> bool {
        self.base.closed.get()
    }
}

struct HeadlessProducer {
    id: ProducerId,
    kind: MediaKind,
    track: RefCell<Option<TrackHandle>>,
    paused: Cell<bool>,
    closed: Cell<bool>,
}

#[async_trait(?Send)]
impl Producer for HeadlessProducer {
    fn id(&self) -> &ProducerId {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> Option<TrackHandle> {
        self.track.borrow().clone()
    }

    async fn replace_track(&self, track: TrackHandle) -> Result<()> {
        if self.closed.get() {
            return Err(Error::Transport(format!("producer {} closed", self.id)));
        }
        if !track.is_live() {
            return Err(Error::Transport(format!("track {} has ended", track.id())));
        }
        *self.track.borrow_mut() = Some(track);
        Ok(())
    }

    fn pause(&self) {
        self.paused.set(true);
    }

    fn resume(&self) {
        self.paused.set(false);
    }

    fn is_paused(&self) -> bool {
        self.paused.get()
    }

    fn close(&self) {
        if !self.closed.replace(true) {
            self.track.borrow_mut().take();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

struct HeadlessRecvTransport {
    base: TransportBase,
    handler: Rc<dyn RecvTransportHandler>,
    consumers: RefCell<Vec<Rc<HeadlessConsumer>>>,
}

#[async_trait(?Send)]
impl RecvTransport for HeadlessRecvTransport {
    fn id(&self) -> &str {
        &self.base.id
    }

    async fn consume(&self, options: ConsumerOptions) -> Result<Rc<dyn Consumer>> {
        self.base.check_open()?;
        let _op = self.base.ops.lock().await;
        self.base.check_open()?;

        if !self.base.connected.get() {
            self.handler.connect(dtls_parameters()).await?;
            self.base.connected.set(true);
            debug!("Receive transport {} connected", self.base.id);
        }
        self.base.check_open()?;

        let track = Rc::new(SyntheticTrack::with_id(
            format!("remote-{}", options.id),
            options.kind,
        ));
        let consumer = Rc::new(HeadlessConsumer {
            id: options.id,
            producer_id: options.producer_id,
            kind: options.kind,
            track,
            closed: Cell::new(false),
        });
        self.consumers.borrow_mut().push(consumer.clone());
        Ok(consumer)
    }

    fn close(&self) {
        if self.base.closed.replace(true) {
            return;
        }
        for consumer in self.consumers.borrow_mut().drain(..) {
            consumer.close();
        }
        debug!("Receive transport {} closed", self.base.id);
    }

    fn is_closed(&self) -> bool {
        self.base.closed.get()
    }
}

struct HeadlessConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    track: Rc<SyntheticTrack>,
    closed: Cell<bool>,
}

impl Consumer for HeadlessConsumer {
    fn id(&self) -> &ConsumerId {
        &self.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> TrackHandle {
        self.track.clone()
    }

    fn close(&self) {
        if !self.closed.replace(true) {
            self.track.stop();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
    }
}
