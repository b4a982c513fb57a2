pub mod consumer;
pub mod participants;
pub mod producer;
pub mod room;

pub use consumer::ConsumerSession;
pub use participants::{Participant, ParticipantRegistry, ParticipantTracks};
pub use producer::ProducerSession;
pub use room::RoomSession;
