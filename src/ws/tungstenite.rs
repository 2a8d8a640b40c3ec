//! [`Connector`] over `tokio-tungstenite`.

use std::borrow::Cow;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};

use super::close::{CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL};
use super::error::WsError;
use super::traits::{Connector, EventSink, Transport, TransportEvent};
use super::types::{Payload, SendOptions};

/// How long a locally initiated close waits for the peer to finish the handshake.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Command {
    Send(Message),
    Close(u16, String),
}

/// Opens WebSocket transports with [`connect_async`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    type Transport = TungsteniteTransport;

    fn open(&mut self, address: &str, sink: EventSink) -> Self::Transport {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(address.to_owned(), sink, command_rx));

        TungsteniteTransport {
            command_tx,
            closing: false,
        }
    }
}

/// Handle to one tungstenite connection task.
///
/// Frames queued before the handshake completes are sent once it does. Dropping the handle
/// closes the connection normally.
#[derive(Debug)]
pub struct TungsteniteTransport {
    command_tx: mpsc::UnboundedSender<Command>,
    closing: bool,
}

impl TungsteniteTransport {
    fn command(&self, command: Command) -> Result<(), WsError> {
        if self.closing {
            return Err(WsError::ConnectionClosed);
        }
        self.command_tx
            .send(command)
            .map_err(|_e| WsError::ConnectionClosed)
    }
}

impl Transport for TungsteniteTransport {
    fn send(&mut self, payload: Payload, options: SendOptions) -> Result<(), WsError> {
        let payload = if options.binary {
            payload.into_binary()
        } else {
            payload
        };
        let message = match payload {
            Payload::Text(text) => Message::Text(text.into()),
            Payload::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.command(Command::Send(message))
    }

    fn ping(&mut self) -> Result<(), WsError> {
        self.command(Command::Send(Message::Ping(Vec::new().into())))
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.closing {
            return;
        }
        _ = self.command(Command::Close(code, reason.to_owned()));
        self.closing = true;
    }
}

/// Connection task: performs the handshake, then pumps frames both ways until either side
/// closes.
async fn drive(address: String, sink: EventSink, mut command_rx: mpsc::UnboundedReceiver<Command>) {
    let stream = match connect_async(address.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(tungstenite::Error::Http(response)) => {
            let status = response.status().as_u16();
            let body = response
                .body()
                .as_deref()
                .map(String::from_utf8_lossy)
                .map(Cow::into_owned)
                .unwrap_or_default();
            sink.emit(TransportEvent::Rejected { status, body });
            return;
        }
        Err(e) => {
            sink.emit(TransportEvent::Error(e.into()));
            sink.emit(TransportEvent::Closed(CLOSE_ABNORMAL));
            return;
        }
    };

    sink.emit(TransportEvent::Opened);

    let (mut write, mut read) = stream.split();
    let mut remote_code = None;

    loop {
        tokio::select! {
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        sink.emit(TransportEvent::Message(Payload::Text(text.as_str().to_owned())));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        sink.emit(TransportEvent::Message(Payload::Binary(bytes.to_vec())));
                    }
                    Some(Ok(Message::Pong(_))) => {
                        sink.emit(TransportEvent::Pong);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        remote_code = Some(frame.map_or(CLOSE_NO_STATUS, |frame| u16::from(frame.code)));
                    }
                    Some(Ok(_)) => {
                        // PINGs are answered by tungstenite itself
                    }
                    Some(Err(tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake))) | None => {
                        sink.emit(TransportEvent::Closed(remote_code.unwrap_or(CLOSE_ABNORMAL)));
                        return;
                    }
                    Some(Err(e)) => {
                        sink.emit(TransportEvent::Error(e.into()));
                        sink.emit(TransportEvent::Closed(remote_code.unwrap_or(CLOSE_ABNORMAL)));
                        return;
                    }
                }
            }

            command = command_rx.recv() => {
                let (code, reason) = match command {
                    Some(Command::Send(message)) => {
                        if let Err(e) = write.send(message).await {
                            sink.emit(TransportEvent::Error(e.into()));
                            sink.emit(TransportEvent::Closed(CLOSE_ABNORMAL));
                            return;
                        }
                        continue;
                    }
                    Some(Command::Close(code, reason)) => (code, reason),
                    None => (CLOSE_NORMAL, String::new()),
                };

                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                _ = write.send(Message::Close(Some(frame))).await;
                _ = timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
                    while let Some(Ok(_)) = read.next().await {}
                })
                .await;

                sink.emit(TransportEvent::Closed(code));
                return;
            }
        }
    }
}
