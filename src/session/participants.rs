//! Remote participants and the media tracks currently attributed to them.
//!
//! The registry is driven only by the consumer session. Every track is keyed
//! by the producer it mirrors, so removal works from the producer id alone and
//! a participant exists exactly while it has at least one track.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, info};

use crate::events::{emit, EventSender, RoomEvent};
use crate::media::TrackHandle;
use crate::models::{MediaKind, ParticipantId, ProducerId};
use crate::observable::Observable;

/// At most one track per kind.
#[derive(Debug, Clone, Default)]
pub struct ParticipantTracks {
    pub audio: Option<TrackHandle>,
    pub video: Option<TrackHandle>,
}

impl ParticipantTracks {
    pub fn get(&self, kind: MediaKind) -> Option<&TrackHandle> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    fn slot(&mut self, kind: MediaKind) -> &mut Option<TrackHandle> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    pub fn len(&self) -> usize {
        self.audio.iter().chain(self.video.iter()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Participant {
    pub id: ParticipantId,
    pub tracks: Observable<ParticipantTracks>,
}

impl Participant {
    fn new(id: ParticipantId) -> Rc<Self> {
        Rc::new(Self {
            id,
            tracks: Observable::new(ParticipantTracks::default()),
        })
    }
}

pub struct ParticipantRegistry {
    by_id: RefCell<BTreeMap<ParticipantId, Rc<Participant>>>,
    producer_tracks: RefCell<HashMap<ProducerId, TrackHandle>>,
    producer_participants: RefCell<HashMap<ProducerId, ParticipantId>>,
    /// Current participants, ordered by id. Emitted on every join and leave.
    pub participants: Observable<Vec<Rc<Participant>>>,
    events: EventSender,
}

impl ParticipantRegistry {
    pub fn new(events: EventSender) -> Rc<Self> {
        Rc::new(Self {
            by_id: RefCell::new(BTreeMap::new()),
            producer_tracks: RefCell::new(HashMap::new()),
            producer_participants: RefCell::new(HashMap::new()),
            participants: Observable::new(Vec::new()),
            events,
        })
    }

    pub fn get(&self, id: &ParticipantId) -> Option<Rc<Participant>> {
        self.by_id.borrow().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.borrow().is_empty()
    }

    pub fn track_count(&self) -> usize {
        self.producer_tracks.borrow().len()
    }

    /// Attributes `track` to `participant_id`. A previous track of the same
    /// kind is replaced and stopped; the producer it mirrored is returned.
    pub async fn add_track(
        &self,
        participant_id: ParticipantId,
        producer_id: ProducerId,
        track: TrackHandle,
    ) -> Option<ProducerId> {
        self.producer_tracks
            .borrow_mut()
            .insert(producer_id.clone(), track.clone());
        self.producer_participants
            .borrow_mut()
            .insert(producer_id.clone(), participant_id.clone());

        let participant = self.get_or_create(&participant_id).await;
        let mut tracks = participant.tracks.get();
        let mut superseded = None;
        if let Some(previous) = tracks.slot(track.kind()).replace(track.clone()) {
            if previous.id() != track.id() {
                debug!("Replacing {} track of {}", track.kind(), participant_id);
                previous.stop();
                superseded = self
                    .producer_tracks
                    .borrow()
                    .iter()
                    .find(|(_, t)| t.id() == previous.id())
                    .map(|(producer, _)| producer.clone());
                if let Some(producer) = &superseded {
                    self.forget(producer);
                }
            }
        }
        info!(
            "{} track from producer {} attributed to {}",
            track.kind(),
            producer_id,
            participant_id
        );
        participant.tracks.set(tracks).await;
        superseded
    }

    /// Removes the track mirroring `producer_id`. Unknown producers are
    /// ignored, so a removal racing a teardown is harmless.
    pub async fn delete_track(&self, participant_id: &ParticipantId, producer_id: &ProducerId) {
        let Some(track) = self.forget(producer_id) else {
            debug!("No track for producer {}", producer_id);
            return;
        };
        track.stop();

        let Some(participant) = self.get(participant_id) else {
            return;
        };
        let mut tracks = participant.tracks.get();
        let slot = tracks.slot(track.kind());
        if slot.as_ref().map(|t| t.id() == track.id()).unwrap_or(false) {
            slot.take();
        }

        if tracks.is_empty() {
            self.by_id.borrow_mut().remove(participant_id);
            info!("Participant {} left", participant_id);
            participant.tracks.set(tracks).await;
            self.publish().await;
            emit(
                &self.events,
                RoomEvent::ParticipantLeft {
                    participant_id: participant_id.clone(),
                },
            );
        } else {
            participant.tracks.set(tracks).await;
        }
    }

    /// Removes every track and participant. Used on connection teardown.
    pub async fn delete_all(&self) {
        let attributed: Vec<(ProducerId, ParticipantId)> = self
            .producer_participants
            .borrow()
            .iter()
            .map(|(producer, participant)| (producer.clone(), participant.clone()))
            .collect();
        for (producer_id, participant_id) in attributed {
            self.delete_track(&participant_id, &producer_id).await;
        }
        self.producer_tracks.borrow_mut().clear();
        self.producer_participants.borrow_mut().clear();

        let leftover: Vec<ParticipantId> = self.by_id.borrow().keys().cloned().collect();
        if leftover.is_empty() {
            return;
        }
        self.by_id.borrow_mut().clear();
        self.publish().await;
        for participant_id in leftover {
            emit(&self.events, RoomEvent::ParticipantLeft { participant_id });
        }
    }

    fn forget(&self, producer_id: &ProducerId) -> Option<TrackHandle> {
        self.producer_participants.borrow_mut().remove(producer_id);
        self.producer_tracks.borrow_mut().remove(producer_id)
    }

    async fn get_or_create(&self, id: &ParticipantId) -> Rc<Participant> {
        if let Some(participant) = self.get(id) {
            return participant;
        }
        let participant = Participant::new(id.clone());
        self.by_id
            .borrow_mut()
            .insert(id.clone(), participant.clone());
        info!("Participant {} joined", id);
        self.publish().await;
        emit(
            &self.events,
            RoomEvent::ParticipantJoined {
                participant_id: id.clone(),
            },
        );
        participant
    }

    async fn publish(&self) {
        let current: Vec<Rc<Participant>> = self.by_id.borrow().values().cloned().collect();
        self.participants.set(current).await;
    }
}
