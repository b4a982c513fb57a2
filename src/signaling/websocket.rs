use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{Connector, Duplex};
use crate::error::{Error, Result};

/// Signaling over a WebSocket, one text frame per JSON message.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait(?Send)]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Duplex> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Connect(format!("{url}: {e}")))?;
        info!("Signaling connected to {}", url);

        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("Failed to write signaling frame: {}", e);
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            debug!("Signaling writer finished");
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if incoming_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => {
                            if incoming_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Err(_) => warn!("Dropping non-UTF-8 binary signaling frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling socket error: {}", e);
                        break;
                    }
                }
            }
            debug!("Signaling reader finished");
        });

        Ok(Duplex { outgoing, incoming })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn listen() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn frames_cross_a_plain_websocket() {
        let (listener, port) = listen().await;
        let server = async {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let frame = ws.next().await.unwrap().unwrap();
            ws.send(frame).await.unwrap();
            let _ = ws.close(None).await;
        };
        let client = async {
            let url = Url::parse(&format!("ws://127.0.0.1:{port}/ws")).unwrap();
            let Duplex {
                outgoing,
                mut incoming,
            } = WebSocketConnector.connect(&url).await.unwrap();
            outgoing.send(r#"{"action":"Init"}"#.to_string()).unwrap();
            assert_eq!(incoming.recv().await.unwrap(), r#"{"action":"Init"}"#);
            assert!(incoming.recv().await.is_none());
        };
        tokio::join!(server, client);
    }

    #[tokio::test]
    async fn secure_url_starts_tls_handshake() {
        let (listener, port) = listen().await;
        let server = async {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut record_type = [0u8; 1];
            socket.read_exact(&mut record_type).await.unwrap();
            record_type[0]
        };
        let url = Url::parse(&format!("wss://127.0.0.1:{port}/ws")).unwrap();

        let (record_type, result) = tokio::join!(server, WebSocketConnector.connect(&url));
        // 0x16 opens a TLS handshake record.
        assert_eq!(record_type, 0x16);
        match result {
            Err(Error::Connect(reason)) => assert!(!reason.contains("not compiled")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("handshake cannot succeed against a bare socket"),
        }
    }
}
