//! Connection lifecycle of one room.
//!
//! `run` keeps a signaling connection open for as long as the running flag is
//! set. Each connection is answered by the server with `Init`, which (re)starts
//! both media sessions on fresh transports. When the connection ends for any
//! reason both sessions are torn down completely; unless the user left, the
//! next attempt follows after the configured delay.

use futures::future::ready;
use std::cell::Cell;
use std::rc::Rc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use super::consumer::ConsumerSession;
use super::participants::ParticipantRegistry;
use super::producer::ProducerSession;
use crate::config::{signaling_url, ClientConfig};
use crate::error::Result;
use crate::events::{emit, EventSender, RoomEvent};
use crate::media::audio::AudioState;
use crate::media::video::VideoState;
use crate::signaling::protocol::{ServerInit, ServerMessage};
use crate::signaling::{Duplex, SignalingChannel};
use crate::state::{RoomContext, RoomPhase, RoomState};

pub struct RoomSession {
    config: ClientConfig,
    context: RoomContext,
    pub state: RoomState,
    pub audio: Rc<AudioState>,
    pub video: Rc<VideoState>,
    participants: Rc<ParticipantRegistry>,
    producer: Rc<ProducerSession>,
    consumer: Rc<ConsumerSession>,
    events: EventSender,
    wake: Notify,
}

impl RoomSession {
    pub fn new(config: ClientConfig, context: RoomContext, events: EventSender) -> Rc<Self> {
        let audio = AudioState::new(context.devices.clone(), context.capture.clone());
        let video = VideoState::new(
            context.devices.clone(),
            context.capture.clone(),
            config.frame_rate,
            config.frame_size,
        );
        let participants = ParticipantRegistry::new(events.clone());
        let producer = ProducerSession::new(
            context.sfu.clone(),
            audio.source().clone(),
            video.source().clone(),
        );
        let consumer = ConsumerSession::new(context.sfu.clone(), participants.clone());

        for source in [audio.source(), video.source()] {
            let kind = source.kind();
            let events = events.clone();
            source.status.subscribe(move |status| {
                emit(&events, RoomEvent::LocalTrackChanged { kind, status });
                ready(())
            });
        }

        let room = Rc::new(Self {
            state: RoomState::new(config.room_id.clone()),
            config,
            context,
            audio,
            video,
            participants,
            producer,
            consumer,
            events,
            wake: Notify::new(),
        });
        room.state.running.subscribe_weak(&room, |room, running| async move {
            if !running {
                room.wake.notify_one();
            }
        });
        room
    }

    pub fn participants(&self) -> &Rc<ParticipantRegistry> {
        &self.participants
    }

    pub fn producer(&self) -> &Rc<ProducerSession> {
        &self.producer
    }

    pub fn consumer(&self) -> &Rc<ConsumerSession> {
        &self.consumer
    }

    /// Stops the room: the live connection closes right away and no reconnect
    /// follows.
    pub async fn leave(&self) {
        info!("Leaving room");
        self.state.running.set(false).await;
    }

    /// Re-reads both device lists after the platform reported a change.
    pub async fn on_devices_changed(&self) {
        self.audio.refresh_inputs().await;
        self.video.refresh_inputs().await;
    }

    pub async fn run(&self) {
        self.audio.refresh_inputs().await;
        self.video.refresh_inputs().await;

        while self.state.running.get() {
            self.state.phase.set(RoomPhase::Joining).await;
            if let Err(e) = self.connect().await {
                warn!("Failed to connect: {}", e);
            }

            self.producer.stop().await;
            self.consumer.stop().await;

            if !self.state.running.get() {
                break;
            }
            emit(&self.events, RoomEvent::Disconnected { reconnecting: true });
            self.state.phase.set(RoomPhase::ReconnectWait).await;
            info!("Reconnecting in {:?}", self.config.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.state.phase.set(RoomPhase::Leaving).await;
        emit(&self.events, RoomEvent::Disconnected { reconnecting: false });
        info!("Room closed");
    }

    /// One connection, from open to close.
    async fn connect(&self) -> Result<()> {
        let room_id = self.state.room_id.get();
        let url = signaling_url(&self.config.page_url, room_id.as_ref())?;
        info!("Connecting to {}", url);
        let Duplex { outgoing, incoming } = self.context.connector.connect(&url).await?;

        let channel = SignalingChannel::new(outgoing);
        let closer = {
            let channel = channel.clone();
            self.state.running.subscribe(move |running| {
                if !running {
                    channel.close();
                }
                ready(())
            })
        };
        if !self.state.running.get() {
            channel.close();
        }

        let channel_ref = &channel;
        let initialized = Cell::new(false);
        let initialized_ref = &initialized;
        channel
            .run(incoming, move |message| {
                self.on_message(message, channel_ref, initialized_ref)
            })
            .await;

        self.state.running.unsubscribe(closer);
        info!("Disconnected from {}", url);
        Ok(())
    }

    async fn on_message(
        &self,
        message: ServerMessage,
        channel: &Rc<SignalingChannel>,
        initialized: &Cell<bool>,
    ) -> Result<()> {
        match message {
            // Transports and producers are bound to the first Init.
            ServerMessage::Init(_) if initialized.get() => {
                warn!("Ignoring repeated Init on the same connection");
                Ok(())
            }
            ServerMessage::Init(init) => {
                initialized.set(true);
                self.on_init(init, channel).await
            }
            ServerMessage::ProducerAdded(notice) => {
                self.consumer.on_producer_added(notice, channel).await
            }
            ServerMessage::ProducerRemoved(notice) => {
                self.consumer.on_producer_removed(notice).await;
                Ok(())
            }
            other => {
                error!("Received unexpected message {}", other.action());
                Ok(())
            }
        }
    }

    async fn on_init(&self, init: ServerInit, channel: &Rc<SignalingChannel>) -> Result<()> {
        if self.state.room_id.with(Option::is_none) {
            let room_id = init.room_id.clone();
            info!("Server assigned room {}", room_id);
            self.state.room_id.set(Some(room_id.clone())).await;
            let link = self.context.persistence.persist_room_id(&room_id);
            emit(
                &self.events,
                RoomEvent::RoomAssigned {
                    room_id,
                    link: link.to_string(),
                },
            );
        }

        self.producer.start(&init, channel.clone()).await?;
        self.consumer.start(&init, channel.clone()).await?;

        // Teardown of the previous connection stopped the local tracks.
        self.audio.ensure_track().await;
        self.video.ensure_track().await;

        if channel.is_closed() {
            return Ok(());
        }
        self.state.phase.set(RoomPhase::Connected).await;
        if let Some(room_id) = self.state.room_id.get() {
            emit(&self.events, RoomEvent::Connected { room_id });
        }
        Ok(())
    }
}
