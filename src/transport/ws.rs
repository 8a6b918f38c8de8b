//! WebSocket transport
//!
//! Connects with tokio-tungstenite, performs the handshake exchange, then
//! pumps frames between the socket and the manager's channels.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{Connector, Transport, TransportEvent};
use crate::error::ChannelError;
use crate::protocol::{EventFrame, Handshake, ServerFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production connector over a WebSocket.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, handshake: &Handshake) -> Result<Transport, ChannelError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        debug!(%url, "socket open, authenticating");

        let (mut sink, mut stream) = socket.split();

        let json = handshake
            .to_json()
            .map_err(|e| ChannelError::Handshake(e.to_string()))?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        // Wait for the server acknowledgment before handing the link over.
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match ServerFrame::from_json(&text) {
                    Ok(ServerFrame::Welcome) => break,
                    Ok(ServerFrame::Error { message }) => {
                        return Err(ChannelError::Handshake(message));
                    }
                    Ok(ServerFrame::Event { event, .. }) => {
                        warn!(%event, "event before welcome, dropping");
                    }
                    Err(e) => return Err(ChannelError::Handshake(e.to_string())),
                },
                Some(Ok(Message::Ping(data))) => {
                    sink.send(Message::Pong(data))
                        .await
                        .map_err(|e| ChannelError::Transport(e.to_string()))?;
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(ChannelError::Handshake(close_reason(frame)));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
                None => {
                    return Err(ChannelError::Transport(
                        "socket closed during handshake".to_string(),
                    ));
                }
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(pump(sink, stream, outbound_rx, events_tx));

        Ok(Transport::new(outbound_tx, events_rx))
    }
}

/// Multiplex outbound frames and inbound messages until either side ends.
async fn pump(
    mut sink: futures_util::stream::SplitSink<WsStream, Message>,
    mut stream: futures_util::stream::SplitStream<WsStream>,
    mut outbound_rx: mpsc::UnboundedReceiver<EventFrame>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let reason = loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        let json = match frame.to_json() {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(event = %frame.event, error = %e, "failed to encode frame");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            break format!("send failed: {}", e);
                        }
                    }
                    None => {
                        // Manager dropped the link; local teardown, no Closed event.
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match ServerFrame::from_json(&text) {
                        Ok(ServerFrame::Event { event, args }) => {
                            let _ = events_tx.send(TransportEvent::Frame(EventFrame::new(event, args)));
                        }
                        Ok(ServerFrame::Error { message }) => {
                            break format!("server error: {}", message);
                        }
                        Ok(ServerFrame::Welcome) => {}
                        Err(e) => {
                            warn!(error = %e, "undecodable frame, dropping");
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break "send failed during ping".to_string();
                        }
                    }
                    Some(Ok(Message::Close(frame))) => break close_reason(frame),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("transport error: {}", e),
                    None => break "connection closed".to_string(),
                }
            }
        }
    };

    let _ = events_tx.send(TransportEvent::Closed { reason });
}

fn close_reason(frame: Option<CloseFrame>) -> String {
    frame
        .map(|f| f.reason.to_string())
        .filter(|reason| !reason.is_empty())
        .unwrap_or_else(|| "connection closed".to_string())
}
