// WebSocket sockets: each attempt runs in its own task and reports back
// through the console's event channel.
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use tracing::{debug, warn};

use crate::connection::{ConnectionEvent, Socket, SocketEvent, Transport};
use crate::error::ConnectError;

enum Outgoing {
    Text(String),
    Close,
}

pub struct WsTransport {
    events: UnboundedSender<ConnectionEvent>,
    tls: native_tls::TlsConnector,
    draining: Draining,
}

/// Socket tasks that were asked to close and outlived their socket handle.
#[derive(Clone, Default)]
pub struct Draining(Rc<RefCell<Vec<JoinHandle<()>>>>);

impl Draining {
    /// Waits up to `limit` for every closing socket to finish its handshake.
    pub async fn finish(&self, limit: Duration) {
        let tasks = std::mem::take(&mut *self.0.borrow_mut());
        if tasks.is_empty() {
            return;
        }
        let count = tasks.len();
        match tokio::time::timeout(limit, join_all(tasks)).await {
            Ok(_) => debug!(count, "sockets closed"),
            Err(_) => warn!(count, "sockets still closing at shutdown"),
        }
    }
}

impl WsTransport {
    /// Self-signed and mismatched certificates are accepted.
    pub fn new(events: UnboundedSender<ConnectionEvent>) -> Result<Self, ConnectError> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        Ok(Self {
            events,
            tls,
            draining: Draining::default(),
        })
    }

    /// Handle for awaiting closes that are still in flight once the
    /// registry is gone.
    pub fn draining(&self) -> Draining {
        self.draining.clone()
    }
}

impl Transport for WsTransport {
    fn open(&mut self, id: usize, attempt: u64, url: &str) -> Result<Box<dyn Socket>, ConnectError> {
        let request = url.into_client_request()?;
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            request,
            self.tls.clone(),
            Reporter {
                id,
                attempt,
                events: self.events.clone(),
            },
            outgoing_rx,
        ));
        Ok(Box::new(WsSocket {
            outgoing: outgoing_tx,
            task: Some(task),
            closing: Cell::new(false),
            draining: self.draining.clone(),
        }))
    }
}

struct WsSocket {
    outgoing: UnboundedSender<Outgoing>,
    task: Option<JoinHandle<()>>,
    closing: Cell<bool>,
    draining: Draining,
}

impl Socket for WsSocket {
    fn send(&self, payload: &str) -> bool {
        self.outgoing.send(Outgoing::Text(payload.to_string())).is_ok()
    }

    fn close(&self) {
        if self.outgoing.send(Outgoing::Close).is_ok() {
            self.closing.set(true);
        }
    }
}

impl Drop for WsSocket {
    /// A socket with a close queued keeps running until the close handshake
    /// is done; any other socket is torn down at once.
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if self.closing.get() && !task.is_finished() {
            self.draining.0.borrow_mut().push(task);
        } else {
            task.abort();
        }
    }
}

struct Reporter {
    id: usize,
    attempt: u64,
    events: UnboundedSender<ConnectionEvent>,
}

impl Reporter {
    fn emit(&self, event: SocketEvent) {
        let _ = self.events.send(ConnectionEvent::Socket {
            id: self.id,
            attempt: self.attempt,
            event,
        });
    }
}

async fn run_socket(
    request: Request,
    tls: native_tls::TlsConnector,
    reporter: Reporter,
    mut outgoing: UnboundedReceiver<Outgoing>,
) {
    let uri = request.uri().to_string();
    let stream = match connect_async_tls_with_config(request, None, false, Some(Connector::NativeTls(tls))).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            debug!(id = reporter.id, %uri, error = %err, "handshake failed");
            reporter.emit(SocketEvent::Error(err.to_string()));
            reporter.emit(SocketEvent::Close(None));
            return;
        }
    };
    debug!(id = reporter.id, %uri, "handshake complete");
    reporter.emit(SocketEvent::Open);

    let (mut write, mut read) = stream.split();
    let mut code = None;

    loop {
        tokio::select! {
            next = outgoing.recv() => match next {
                Some(Outgoing::Text(text)) => {
                    if let Err(err) = write.send(Message::Text(text.into())).await {
                        warn!(id = reporter.id, error = %err, "send failed");
                        reporter.emit(SocketEvent::Error(err.to_string()));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    // the handshake completes when the peer echoes the close
                    while let Some(Ok(message)) = read.next().await {
                        if let Message::Close(frame) = message {
                            code = frame.map(|f| u16::from(f.code));
                        }
                    }
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => reporter.emit(SocketEvent::Message(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    reporter.emit(SocketEvent::Message(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(Ok(Message::Ping(_))) => reporter.emit(SocketEvent::Ping),
                Some(Ok(Message::Pong(_))) => reporter.emit(SocketEvent::Pong),
                Some(Ok(Message::Close(frame))) => code = frame.map(|f| u16::from(f.code)),
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(err)) => {
                    reporter.emit(SocketEvent::Error(err.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    debug!(id = reporter.id, %uri, ?code, "socket finished");
    reporter.emit(SocketEvent::Close(code));
}
