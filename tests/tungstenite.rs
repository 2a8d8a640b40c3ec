#![cfg(feature = "ws")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use reconnecting_socket::ws::config::{Config, ReconnectConfig};
use reconnecting_socket::ws::{Payload, SendOptions, Session, SessionEvent};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const WAIT: Duration = Duration::from_secs(5);

/// Echo server that can close its connections on demand.
struct MockWsServer {
    addr: SocketAddr,
    /// Close code to send to every connected client
    close_tx: broadcast::Sender<u16>,
    /// Close codes received from clients
    client_close_rx: mpsc::UnboundedReceiver<u16>,
    /// One entry per accepted WebSocket handshake
    accepted_rx: mpsc::UnboundedReceiver<()>,
}

impl MockWsServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (close_tx, _) = broadcast::channel::<u16>(16);
        let (client_close_tx, client_close_rx) = mpsc::unbounded_channel();
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();

        let server_close_tx = close_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                drop(accepted_tx.send(()));

                let (mut write, mut read) = ws_stream.split();
                let client_close_tx = client_close_tx.clone();
                let mut close_rx = server_close_tx.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                                        if write.send(msg).await.is_err() {
                                            break;
                                        }
                                    }
                                    Some(Ok(Message::Close(frame))) => {
                                        let code = frame.map_or(1005, |f| u16::from(f.code));
                                        drop(client_close_tx.send(code));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            code = close_rx.recv() => {
                                let Ok(code) = code else {
                                    break;
                                };
                                let frame = CloseFrame {
                                    code: CloseCode::from(code),
                                    reason: "server closing".into(),
                                };
                                drop(write.send(Message::Close(Some(frame))).await);
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            close_tx,
            client_close_rx,
            accepted_rx,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/realtime", self.addr)
    }

    /// Close every connected client with `code`.
    fn close_clients(&self, code: u16) {
        drop(self.close_tx.send(code));
    }

    async fn recv_client_close(&mut self) -> Option<u16> {
        timeout(WAIT, self.client_close_rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn accepted(&mut self) -> bool {
        timeout(WAIT, self.accepted_rx.recv())
            .await
            .ok()
            .flatten()
            .is_some()
    }
}

/// Plain HTTP server answering every handshake with the same status.
async fn rejecting_server(status_line: &'static str) -> (String, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (hits_tx, hits_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            drop(hits_tx.send(()));

            let mut request = [0_u8; 2048];
            drop(stream.read(&mut request).await);
            let body = "rejected";
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            drop(stream.write_all(response.as_bytes()).await);
            drop(stream.shutdown().await);
        }
    });

    (format!("ws://{addr}/realtime"), hits_rx)
}

fn fast_config() -> Config {
    Config::builder()
        .reconnect(
            ReconnectConfig::builder()
                .initial_backoff(Duration::from_millis(50))
                .max_backoff(Duration::from_millis(500))
                .downtime_interval(Duration::from_millis(100))
                .build(),
        )
        .build()
}

async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("no event was emitted")
        .unwrap()
}

/// Skip events until one matches, returning it.
async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    predicate: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn echoes_text_and_binary_frames() {
    let server = MockWsServer::start().await;
    let session = Session::new(
        reconnecting_socket::ws::tungstenite::TungsteniteConnector::default(),
        fast_config(),
    )
    .unwrap();
    let mut events = session.subscribe();
    session.open(&server.ws_url()).unwrap();

    assert!(matches!(next_event(&mut events).await, SessionEvent::Opened));
    assert!(session.state().is_connected());

    session.send("hello", SendOptions::default()).unwrap();
    session.send("raw", SendOptions::binary()).unwrap();

    match next_event(&mut events).await {
        SessionEvent::Message(payload) => assert_eq!(payload, Payload::from("hello")),
        other => panic!("unexpected event {other:?}"),
    }
    match next_event(&mut events).await {
        SessionEvent::Message(payload) => assert_eq!(payload, Payload::Binary(b"raw".to_vec())),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn server_close_code_drives_reconnect() {
    let mut server = MockWsServer::start().await;
    let session = Session::connect(&server.ws_url(), fast_config()).unwrap();
    let mut events = session.subscribe();
    assert!(server.accepted().await);
    wait_for(&mut events, |e| matches!(e, SessionEvent::Opened)).await;

    server.close_clients(4000);

    let closed = wait_for(&mut events, |e| matches!(e, SessionEvent::Closed(_))).await;
    assert!(matches!(closed, SessionEvent::Closed(4000)), "got {closed:?}");
    assert!(matches!(next_event(&mut events).await, SessionEvent::Reconnecting));
    assert!(server.accepted().await, "session should reconnect");
    assert!(matches!(next_event(&mut events).await, SessionEvent::Opened));
}

#[tokio::test]
async fn server_normal_close_ends_session() {
    let mut server = MockWsServer::start().await;
    let session = Session::connect(&server.ws_url(), fast_config()).unwrap();
    let mut events = session.subscribe();
    assert!(server.accepted().await);
    wait_for(&mut events, |e| matches!(e, SessionEvent::Opened)).await;

    server.close_clients(1000);

    assert!(matches!(next_event(&mut events).await, SessionEvent::Closed(1000)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::Ended(1000)));
    assert!(!server.accepted().await, "session should not reconnect");
}

#[tokio::test]
async fn close_sends_normal_close_frame() {
    let mut server = MockWsServer::start().await;
    let session = Session::connect(&server.ws_url(), fast_config()).unwrap();
    let mut events = session.subscribe();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Opened)).await;

    session.close().unwrap();

    assert_eq!(server.recv_client_close().await, Some(1000));
    assert!(matches!(next_event(&mut events).await, SessionEvent::Closed(1000)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::Ended(1000)));
}

#[tokio::test]
async fn answered_probes_keep_connection_alive() {
    let server = MockWsServer::start().await;
    let config = Config::builder()
        .ping_interval(Duration::from_millis(50))
        .pong_timeout(Duration::from_millis(200))
        .build();
    let session = Session::connect(&server.ws_url(), config).unwrap();
    let mut events = session.subscribe();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Opened)).await;

    let event = timeout(Duration::from_millis(600), events.recv()).await;

    assert!(event.is_err(), "unexpected event {event:?}");
    assert!(session.state().is_connected());
}

#[tokio::test]
async fn unauthorized_handshake_ends_session() {
    let (url, mut hits) = rejecting_server("401 Unauthorized").await;
    let session = Session::new(
        reconnecting_socket::ws::tungstenite::TungsteniteConnector::default(),
        fast_config(),
    )
    .unwrap();
    let mut events = session.subscribe();
    session.open(&url).unwrap();

    assert!(matches!(next_event(&mut events).await, SessionEvent::Closed(1011)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::Ended(1011)));
    assert!(timeout(WAIT, hits.recv()).await.unwrap().is_some());
    let retry = timeout(Duration::from_millis(500), hits.recv()).await;
    assert!(retry.is_err(), "session should not retry");
}

#[tokio::test]
async fn unavailable_handshake_is_retried() {
    let (url, mut hits) = rejecting_server("503 Service Unavailable").await;
    let session = Session::new(
        reconnecting_socket::ws::tungstenite::TungsteniteConnector::default(),
        fast_config(),
    )
    .unwrap();
    let mut events = session.subscribe();
    session.open(&url).unwrap();

    assert!(matches!(next_event(&mut events).await, SessionEvent::Closed(1012)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::Reconnecting));
    assert!(timeout(WAIT, hits.recv()).await.unwrap().is_some());
    assert!(timeout(WAIT, hits.recv()).await.unwrap().is_some());
}

#[tokio::test]
async fn refused_connection_retries_without_error_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = Session::connect(&format!("ws://{addr}/realtime"), fast_config()).unwrap();
    let mut events = session.subscribe();

    assert!(matches!(next_event(&mut events).await, SessionEvent::Closed(1006)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::Reconnecting));
}
