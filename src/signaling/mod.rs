//! Request/response correlation and ordered dispatch over one signaling
//! connection.
//!
//! Replies are matched to waiters by their action tag, so at most one call per
//! reply tag may be outstanding. A second call with the same tag rejects the
//! older waiter with [`Error::Superseded`]. Everything that is not a reply goes
//! to the inbound handler, one message at a time: message N+1 is not handed out
//! until the handler future for message N has completed.

pub mod protocol;
pub mod websocket;

use async_trait::async_trait;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::models::{MediaKind, ProducerId};
use protocol::{ClientMessage, ConsumerOptions, Envelope, ServerMessage};

/// Raw text frames of one open connection.
pub struct Duplex {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens signaling connections. The connection is over once `incoming`
/// yields `None`; dropping `outgoing` asks the remote end to close.
#[async_trait(?Send)]
pub trait Connector {
    async fn connect(&self, url: &Url) -> Result<Duplex>;
}

type Waiter = oneshot::Sender<Result<ServerMessage>>;

pub struct SignalingChannel {
    outgoing: RefCell<Option<mpsc::UnboundedSender<String>>>,
    waiting: RefCell<HashMap<&'static str, Waiter>>,
    closed: Cell<bool>,
    close_requested: Notify,
}

impl SignalingChannel {
    pub fn new(outgoing: mpsc::UnboundedSender<String>) -> Rc<Self> {
        Rc::new(Self {
            outgoing: RefCell::new(Some(outgoing)),
            waiting: RefCell::new(HashMap::new()),
            closed: Cell::new(false),
            close_requested: Notify::new(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Requests close. `run` returns once the reader has stopped.
    pub fn close(&self) {
        if self.closed.get() {
            return;
        }
        debug!("Closing signaling channel");
        self.outgoing.borrow_mut().take();
        self.close_requested.notify_one();
    }

    /// Fire-and-forget. Dropped silently once the channel is closed.
    pub fn send(&self, message: &ClientMessage) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {}: {}", message.action(), e);
                return;
            }
        };
        match self.outgoing.borrow().as_ref() {
            Some(tx) => {
                if tx.send(text).is_err() {
                    debug!("Signaling writer gone, dropping {}", message.action());
                }
            }
            None => debug!("Signaling channel closed, dropping {}", message.action()),
        }
    }

    /// Sends `message` and waits for the reply carrying its reply tag.
    pub async fn call(&self, message: ClientMessage) -> Result<ServerMessage> {
        let reply = message
            .reply_action()
            .ok_or_else(|| Error::Protocol(format!("{} has no reply", message.action())))?;
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let (tx, rx) = oneshot::channel();
        let previous = self.waiting.borrow_mut().insert(reply, tx);
        if let Some(previous) = previous {
            warn!("Call awaiting {} replaced by a newer one", reply);
            let _ = previous.send(Err(Error::Superseded(reply)));
        }

        self.send(&message);
        rx.await.unwrap_or(Err(Error::ChannelClosed))
    }

    pub async fn connect_producer_transport(&self, dtls_parameters: Value) -> Result<()> {
        match self
            .call(ClientMessage::ConnectProducerTransport { dtls_parameters })
            .await?
        {
            ServerMessage::ConnectedProducerTransport => Ok(()),
            other => Err(unexpected_reply(&other)),
        }
    }

    pub async fn connect_consumer_transport(&self, dtls_parameters: Value) -> Result<()> {
        match self
            .call(ClientMessage::ConnectConsumerTransport { dtls_parameters })
            .await?
        {
            ServerMessage::ConnectedConsumerTransport => Ok(()),
            other => Err(unexpected_reply(&other)),
        }
    }

    pub async fn produce(&self, kind: MediaKind, rtp_parameters: Value) -> Result<ProducerId> {
        match self
            .call(ClientMessage::Produce { kind, rtp_parameters })
            .await?
        {
            ServerMessage::Produced { id } => Ok(id),
            other => Err(unexpected_reply(&other)),
        }
    }

    pub async fn consume(&self, producer_id: ProducerId) -> Result<ConsumerOptions> {
        match self.call(ClientMessage::Consume { producer_id }).await? {
            ServerMessage::Consumed(options) => Ok(options),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Drives the connection until it closes, handing unsolicited messages to
    /// `on_message` strictly in arrival order.
    ///
    /// On close every outstanding call is rejected with
    /// [`Error::ChannelClosed`] and queued messages that were not yet handed
    /// out are discarded. A handler already running is allowed to finish.
    pub async fn run<F, Fut>(&self, mut incoming: mpsc::UnboundedReceiver<String>, mut on_message: F)
    where
        F: FnMut(ServerMessage) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<ServerMessage>();

        let reader = async move {
            loop {
                tokio::select! {
                    frame = incoming.recv() => match frame {
                        Some(text) => self.route(&text, &queue_tx),
                        None => break,
                    },
                    _ = self.close_requested.notified() => break,
                }
            }
            self.shutdown();
        };

        let dispatcher = async {
            while let Some(message) = queue_rx.recv().await {
                if self.is_closed() {
                    debug!("Discarding {} received before close", message.action());
                    continue;
                }
                let action = message.action();
                if let Err(e) = on_message(message).await {
                    error!("Unexpected error during {} handling: {}", action, e);
                }
            }
        };

        futures::join!(reader, dispatcher);
    }

    fn route(&self, text: &str, queue: &mpsc::UnboundedSender<ServerMessage>) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping undecodable signaling frame: {}", e);
                return;
            }
        };

        let waiter = self.waiting.borrow_mut().remove(envelope.action.as_str());
        let decoded = serde_json::from_str::<ServerMessage>(text);
        match (waiter, decoded) {
            (Some(waiter), Ok(message)) => {
                let _ = waiter.send(Ok(message));
            }
            (Some(waiter), Err(e)) => {
                let _ = waiter.send(Err(Error::Protocol(format!(
                    "malformed {} reply: {}",
                    envelope.action, e
                ))));
            }
            (None, Ok(message)) => {
                let _ = queue.send(message);
            }
            (None, Err(e)) => {
                warn!("Dropping unrecognized message {}: {}", envelope.action, e);
            }
        }
    }

    fn shutdown(&self) {
        if !self.closed.replace(true) {
            info!("Signaling channel closed");
        }
        self.outgoing.borrow_mut().take();
        let waiting: Vec<Waiter> = self.waiting.borrow_mut().drain().map(|(_, w)| w).collect();
        for waiter in waiting {
            let _ = waiter.send(Err(Error::ChannelClosed));
        }
    }
}

fn unexpected_reply(message: &ServerMessage) -> Error {
    Error::Protocol(format!("unexpected reply {}", message.action()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::ProducerNotice;
    use serde_json::json;
    use std::time::Duration;

    fn open() -> (
        Rc<SignalingChannel>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (SignalingChannel::new(out_tx), out_rx, in_tx, in_rx)
    }

    fn added(participant: &str, producer: &str) -> String {
        json!({"action": "ProducerAdded", "participantId": participant, "producerId": producer})
            .to_string()
    }

    #[tokio::test]
    async fn call_resolves_with_correlated_reply() {
        let (channel, mut sent, server, incoming) = open();

        let client = async {
            let id = channel.produce(MediaKind::Video, json!({})).await.unwrap();
            assert_eq!(id.as_str(), "prod-1");
            channel.close();
        };
        let server_side = async {
            let request: Value = serde_json::from_str(&sent.recv().await.unwrap()).unwrap();
            assert_eq!(request["action"], "Produce");
            assert_eq!(request["kind"], "video");
            server
                .send(json!({"action": "Produced", "id": "prod-1"}).to_string())
                .unwrap();
        };

        tokio::join!(
            channel.run(incoming, |_| async { Ok(()) }),
            client,
            server_side
        );
    }

    #[tokio::test]
    async fn close_rejects_outstanding_calls() {
        let (channel, _sent, server, incoming) = open();

        let client = async {
            let result = channel.consume(ProducerId::new("p")).await;
            assert!(matches!(result, Err(Error::ChannelClosed)));
        };
        let server_side = async move {
            tokio::task::yield_now().await;
            drop(server);
        };

        tokio::join!(channel.run(incoming, |_| async { Ok(()) }), client, server_side);
        assert!(channel.is_closed());
        assert!(matches!(
            channel.consume(ProducerId::new("p")).await,
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn second_call_with_same_tag_supersedes_first() {
        let (channel, _sent, _server, incoming) = open();

        let first = channel.consume(ProducerId::new("a"));
        let second = async {
            tokio::task::yield_now().await;
            let _ = channel.consume(ProducerId::new("b")).await;
        };
        let stop = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            channel.close();
        };

        let (first, _, _, _) = tokio::join!(
            first,
            second,
            stop,
            channel.run(incoming, |_| async { Ok(()) })
        );
        assert!(matches!(first, Err(Error::Superseded("Consumed"))));
    }

    #[tokio::test]
    async fn inbound_messages_are_handled_sequentially() {
        let (channel, _sent, server, incoming) = open();
        server.send(added("p1", "a")).unwrap();
        server.send(added("p1", "b")).unwrap();
        server.send(json!({"action": "Bogus"}).to_string()).unwrap();
        server.send(added("p2", "c")).unwrap();

        let log = RefCell::new(Vec::new());
        channel
            .run(incoming, |message| {
                let log = &log;
                let channel = &channel;
                async move {
                    let ServerMessage::ProducerAdded(ProducerNotice { producer_id, .. }) = message else {
                        return Err(Error::Protocol("unexpected".into()));
                    };
                    log.borrow_mut().push(format!("start:{producer_id}"));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    log.borrow_mut().push(format!("end:{producer_id}"));
                    if producer_id.as_str() == "c" {
                        channel.close();
                    }
                    Ok(())
                }
            })
            .await;

        assert_eq!(
            *log.borrow(),
            vec!["start:a", "end:a", "start:b", "end:b", "start:c", "end:c"]
        );
        drop(server);
    }

    #[tokio::test]
    async fn messages_queued_at_close_are_discarded() {
        let (channel, _sent, server, incoming) = open();
        server.send(added("p1", "a")).unwrap();
        server.send(added("p1", "b")).unwrap();
        drop(server);

        let handled = Cell::new(0);
        channel
            .run(incoming, |_| {
                handled.set(handled.get() + 1);
                async { Ok(()) }
            })
            .await;

        assert!(channel.is_closed());
        assert_eq!(handled.get(), 0);
    }

    #[tokio::test]
    async fn send_after_close_is_dropped() {
        let (channel, mut sent, _server, _incoming) = open();
        channel.send(&ClientMessage::ConsumerResume {
            id: crate::models::ConsumerId::new("c1"),
        });
        channel.close();
        channel.send(&ClientMessage::ConsumerResume {
            id: crate::models::ConsumerId::new("c2"),
        });

        let first: Value = serde_json::from_str(&sent.recv().await.unwrap()).unwrap();
        assert_eq!(first["id"], "c1");
        assert!(sent.recv().await.is_none());
    }
}
