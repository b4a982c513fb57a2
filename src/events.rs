use serde::Serialize;
use tokio::sync::broadcast;

use crate::media::TrackStatus;
use crate::models::{MediaKind, ParticipantId, RoomId};

/// Room lifecycle events for whatever sits on top of the session (UI bridge,
/// headless logger). Emitting never blocks and never fails the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum RoomEvent {
    RoomAssigned { room_id: RoomId, link: String },
    Connected { room_id: RoomId },
    Disconnected { reconnecting: bool },
    ParticipantJoined { participant_id: ParticipantId },
    ParticipantLeft { participant_id: ParticipantId },
    LocalTrackChanged { kind: MediaKind, status: TrackStatus },
}

pub type EventSender = broadcast::Sender<RoomEvent>;
pub type EventReceiver = broadcast::Receiver<RoomEvent>;

pub fn create_event_bus() -> (EventSender, EventReceiver) {
    broadcast::channel(256)
}

/// Sends `event`, ignoring the case where nobody is subscribed.
pub fn emit(events: &EventSender, event: RoomEvent) {
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_adjacently_tagged() {
        let event = RoomEvent::ParticipantJoined {
            participant_id: ParticipantId::new("alice"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ParticipantJoined");
        assert_eq!(json["data"]["participant_id"], "alice");

        let json = serde_json::to_value(RoomEvent::LocalTrackChanged {
            kind: MediaKind::Video,
            status: TrackStatus::NoTrack,
        })
        .unwrap();
        assert_eq!(json["data"]["kind"], "video");
        assert_eq!(json["data"]["status"], "no_track");
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_harmless() {
        let (tx, rx) = create_event_bus();
        drop(rx);
        emit(&tx, RoomEvent::Disconnected { reconnecting: true });

        let mut rx = tx.subscribe();
        emit(&tx, RoomEvent::Disconnected { reconnecting: false });
        assert_eq!(
            rx.recv().await.unwrap(),
            RoomEvent::Disconnected { reconnecting: false }
        );
    }
}
