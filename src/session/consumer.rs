use async_trait::async_trait;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, info};

use super::participants::ParticipantRegistry;
use crate::error::{Error, Result};
use crate::models::{ParticipantId, ProducerId};
use crate::observable::Observable;
use crate::sfu::{Consumer, RecvTransport, RecvTransportHandler, SfuDevice};
use crate::signaling::protocol::{ClientMessage, ProducerNotice, ServerInit};
use crate::signaling::SignalingChannel;

/// Mirrors every remote producer the server announces as a local consumer and
/// attributes its track to the owning participant.
pub struct ConsumerSession {
    device: Rc<dyn SfuDevice>,
    participants: Rc<ParticipantRegistry>,
    pub transport: Observable<Option<Rc<dyn RecvTransport>>>,
    consumers: RefCell<HashMap<ProducerId, Rc<dyn Consumer>>>,
}

impl ConsumerSession {
    pub fn new(device: Rc<dyn SfuDevice>, participants: Rc<ParticipantRegistry>) -> Rc<Self> {
        Rc::new(Self {
            device,
            participants,
            transport: Observable::new(None),
            consumers: RefCell::new(HashMap::new()),
        })
    }

    pub fn participants(&self) -> &Rc<ParticipantRegistry> {
        &self.participants
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.borrow().len()
    }

    pub async fn start(&self, init: &ServerInit, channel: Rc<SignalingChannel>) -> Result<()> {
        let handler = Rc::new(ChannelRecvHandler { channel });
        let transport = self
            .device
            .create_recv_transport(&init.consumer_transport_options, handler)?;
        info!("Receive transport {} ready", transport.id());
        self.transport.set(Some(transport)).await;
        Ok(())
    }

    /// Clears the registry, closes every consumer, then the transport.
    pub async fn stop(&self) {
        self.participants.delete_all().await;

        let consumers: Vec<Rc<dyn Consumer>> =
            self.consumers.borrow_mut().drain().map(|(_, c)| c).collect();
        for consumer in consumers {
            consumer.close();
        }

        if let Some(transport) = self.transport.get() {
            transport.close();
            self.transport.set(None).await;
            info!("Receive transport {} closed", transport.id());
        }
    }

    /// Consumes a newly announced remote producer: one `Consume` round trip,
    /// local consumer creation, one `ConsumerResume`, then registry update.
    pub async fn on_producer_added(
        &self,
        notice: ProducerNotice,
        channel: &SignalingChannel,
    ) -> Result<()> {
        let ProducerNotice {
            participant_id,
            producer_id,
        } = notice;
        let transport = self
            .transport
            .get()
            .ok_or_else(|| Error::Transport("no receive transport".into()))?;

        let options = channel.consume(producer_id.clone()).await?;
        let consumer = transport.consume(options).await?;
        if consumer.producer_id() != &producer_id {
            consumer.close();
            return Err(Error::Protocol(format!(
                "consumer {} belongs to producer {}, expected {}",
                consumer.id(),
                consumer.producer_id(),
                producer_id
            )));
        }
        info!(
            "{} consumer {} created for producer {}",
            consumer.kind(),
            consumer.id(),
            producer_id
        );

        channel.send(&ClientMessage::ConsumerResume {
            id: consumer.id().clone(),
        });

        let previous = self
            .consumers
            .borrow_mut()
            .insert(producer_id.clone(), consumer.clone());
        if let Some(previous) = previous {
            debug!("Producer {} consumed again, closing {}", producer_id, previous.id());
            previous.close();
        }

        let superseded = self
            .participants
            .add_track(participant_id, producer_id, consumer.track())
            .await;
        if let Some(superseded) = superseded {
            let replaced = self.consumers.borrow_mut().remove(&superseded);
            if let Some(replaced) = replaced {
                replaced.close();
                info!("Consumer {} for superseded producer {} closed", replaced.id(), superseded);
            }
        }
        Ok(())
    }

    pub async fn on_producer_removed(&self, notice: ProducerNotice) {
        self.remove(&notice.participant_id, &notice.producer_id).await;
    }

    async fn remove(&self, participant_id: &ParticipantId, producer_id: &ProducerId) {
        self.participants.delete_track(participant_id, producer_id).await;
        let consumer = self.consumers.borrow_mut().remove(producer_id);
        if let Some(consumer) = consumer {
            consumer.close();
            info!("Consumer {} for producer {} closed", consumer.id(), producer_id);
        }
    }
}

struct ChannelRecvHandler {
    channel: Rc<SignalingChannel>,
}

#[async_trait(?Send)]
impl RecvTransportHandler for ChannelRecvHandler {
    async fn connect(&self, dtls_parameters: Value) -> Result<()> {
        self.channel.connect_consumer_transport(dtls_parameters).await
    }
}
