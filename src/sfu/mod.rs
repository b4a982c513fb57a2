//! Client side of the SFU media library.
//!
//! A [`SfuDevice`] is loaded with the router's RTP capabilities and then
//! creates one send and one receive transport per connection. Transports
//! report their DTLS handshake and every new producer back through the handler
//! traits, which the sessions implement on top of the signaling channel.

pub mod headless;

use async_trait::async_trait;
use serde_json::Value;
use std::rc::Rc;

use crate::error::Result;
use crate::media::TrackHandle;
use crate::models::{ConsumerId, MediaKind, ProducerId};
use crate::signaling::protocol::{ConsumerOptions, TransportOptions};

/// Callbacks of a send transport.
#[async_trait(?Send)]
pub trait SendTransportHandler {
    /// Called once, before the first media flows, with the local DTLS parameters.
    async fn connect(&self, dtls_parameters: Value) -> Result<()>;
    /// Called for every `produce`; returns the id the server assigned.
    async fn produce(&self, kind: MediaKind, rtp_parameters: Value) -> Result<ProducerId>;
}

/// Callbacks of a receive transport.
#[async_trait(?Send)]
pub trait RecvTransportHandler {
    async fn connect(&self, dtls_parameters: Value) -> Result<()>;
}

#[async_trait(?Send)]
pub trait SfuDevice {
    async fn load(&self, router_rtp_capabilities: &Value) -> Result<()>;
    fn rtp_capabilities(&self) -> Value;
    fn create_send_transport(
        &self,
        options: &TransportOptions,
        handler: Rc<dyn SendTransportHandler>,
    ) -> Result<Rc<dyn SendTransport>>;
    fn create_recv_transport(
        &self,
        options: &TransportOptions,
        handler: Rc<dyn RecvTransportHandler>,
    ) -> Result<Rc<dyn RecvTransport>>;
}

#[async_trait(?Send)]
pub trait SendTransport {
    fn id(&self) -> &str;
    async fn produce(&self, track: TrackHandle) -> Result<Rc<dyn Producer>>;
    /// Closes the transport and every producer created on it.
    fn close(&self);
    fn is_closed(&self) -> bool;
}

#[async_trait(?Send)]
pub trait Producer {
    fn id(&self) -> &ProducerId;
    fn kind(&self) -> MediaKind;
    fn track(&self) -> Option<TrackHandle>;
    async fn replace_track(&self, track: TrackHandle) -> Result<()>;
    fn pause(&self);
    fn resume(&self);
    fn is_paused(&self) -> bool;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

#[async_trait(?Send)]
pub trait RecvTransport {
    fn id(&self) -> &str;
    async fn consume(&self, options: ConsumerOptions) -> Result<Rc<dyn Consumer>>;
    /// Closes the transport and every consumer created on it.
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub trait Consumer {
    fn id(&self) -> &ConsumerId;
    fn producer_id(&self) -> &ProducerId;
    fn kind(&self) -> MediaKind;
    fn track(&self) -> TrackHandle;
    /// Ends the consumer and its track. Idempotent.
    fn close(&self);
    fn is_closed(&self) -> bool;
}
