use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ConsumerId, MediaKind, ParticipantId, ProducerId, RoomId};

/// Server-provided parameters for creating a send or receive transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    #[serde(default)]
    pub ice_parameters: Value,
    #[serde(default)]
    pub ice_candidates: Value,
    #[serde(default)]
    pub dtls_parameters: Value,
}

/// Parameters returned by the server for one consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerOptions {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    #[serde(default)]
    pub rtp_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInit {
    pub room_id: RoomId,
    #[serde(default)]
    pub router_rtp_capabilities: Value,
    pub producer_transport_options: TransportOptions,
    pub consumer_transport_options: TransportOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerNotice {
    pub participant_id: ParticipantId,
    pub producer_id: ProducerId,
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Init { rtp_capabilities: Value },
    ConnectProducerTransport { dtls_parameters: Value },
    ConnectConsumerTransport { dtls_parameters: Value },
    Produce { kind: MediaKind, rtp_parameters: Value },
    Consume { producer_id: ProducerId },
    ConsumerResume { id: ConsumerId },
}

impl ClientMessage {
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::Init { .. } => "Init",
            ClientMessage::ConnectProducerTransport { .. } => "ConnectProducerTransport",
            ClientMessage::ConnectConsumerTransport { .. } => "ConnectConsumerTransport",
            ClientMessage::Produce { .. } => "Produce",
            ClientMessage::Consume { .. } => "Consume",
            ClientMessage::ConsumerResume { .. } => "ConsumerResume",
        }
    }

    /// Action tag of the reply this request is answered with, if any.
    pub fn reply_action(&self) -> Option<&'static str> {
        match self {
            ClientMessage::ConnectProducerTransport { .. } => Some("ConnectedProducerTransport"),
            ClientMessage::ConnectConsumerTransport { .. } => Some("ConnectedConsumerTransport"),
            ClientMessage::Produce { .. } => Some("Produced"),
            ClientMessage::Consume { .. } => Some("Consumed"),
            ClientMessage::Init { .. } | ClientMessage::ConsumerResume { .. } => None,
        }
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Init(ServerInit),
    ProducerAdded(ProducerNotice),
    ProducerRemoved(ProducerNotice),
    ConnectedProducerTransport,
    ConnectedConsumerTransport,
    Produced { id: ProducerId },
    Consumed(ConsumerOptions),
}

impl ServerMessage {
    pub fn action(&self) -> &'static str {
        match self {
            ServerMessage::Init(_) => "Init",
            ServerMessage::ProducerAdded(_) => "ProducerAdded",
            ServerMessage::ProducerRemoved(_) => "ProducerRemoved",
            ServerMessage::ConnectedProducerTransport => "ConnectedProducerTransport",
            ServerMessage::ConnectedConsumerTransport => "ConnectedConsumerTransport",
            ServerMessage::Produced { .. } => "Produced",
            ServerMessage::Consumed(_) => "Consumed",
        }
    }
}

/// Just the tag, so a frame can be routed before it is fully decoded.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub action: String,
}
