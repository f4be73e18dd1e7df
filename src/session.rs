//! WebSocket echo session.
//!
//! A session owns one accepted connection and drives it through a small
//! state machine:
//!
//! ```text
//! Handshaking --upgraded--> Reading --received--> Writing
//!                              ^                     |
//!                              +-------echoed--------+
//!
//! any state --peer closed / failed--> Closed
//! ```
//!
//! Each session runs as its own task, so exactly one operation (handshake,
//! read or write) is outstanding at a time and the buffer is only ever
//! touched by the task that owns it.

use crate::error::{Op, SessionError};
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SERVER;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, trace};

/// Initial receive buffer capacity.
const BUFFER_SIZE: usize = 4 * 1024;

/// `Server` header sent in the handshake response unless configured otherwise.
pub const DEFAULT_SERVER_HEADER: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " websocket-server-async"
);

/// Per-session protocol options, shared by every session of a listener.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on the opening handshake.
    pub handshake_timeout: Duration,
    /// Silence after which the peer is considered gone. A keep-alive ping is
    /// sent halfway through. Also bounds each write. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Largest accepted message. `None` keeps the protocol library default.
    pub max_message_size: Option<usize>,
    /// Value of the `Server` header in the handshake response.
    pub server_header: HeaderValue,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(300)),
            max_message_size: Some(16 * 1024 * 1024),
            server_header: HeaderValue::from_static(DEFAULT_SERVER_HEADER),
        }
    }
}

impl SessionOptions {
    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        if let Some(size) = self.max_message_size {
            config.max_message_size = Some(size);
        }
        config
    }
}

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the opening handshake to complete.
    Handshaking,
    /// Waiting for the next complete data message.
    Reading,
    /// Echoing the buffered message back.
    Writing,
    /// Terminal. Nothing further is scheduled.
    Closed,
}

/// Completion of the operation issued in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Upgraded,
    Received,
    Echoed,
    PeerClosed,
    Failed,
}

impl State {
    /// Transition taken when the operation issued in `self` completes.
    pub fn advance(self, event: Event) -> State {
        match (self, event) {
            (State::Handshaking, Event::Upgraded) => State::Reading,
            (State::Reading, Event::Received) => State::Writing,
            (State::Writing, Event::Echoed) => State::Reading,
            _ => State::Closed,
        }
    }
}

/// Receive buffer reused across read/write iterations.
///
/// Each received payload is copied in, so the session holds one long-lived
/// allocation instead of echoing the protocol layer's per-message buffers.
/// The payload handed to a write shares that allocation; once the write has
/// released it, the next `fill` reclaims the same memory.
#[derive(Debug)]
pub struct MessageBuffer {
    data: BytesMut,
    text: bool,
}

impl MessageBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            text: false,
        }
    }

    /// Store a received payload along with its text/binary kind.
    pub fn fill(&mut self, payload: &[u8], text: bool) {
        self.data.reserve(payload.len());
        self.data.extend_from_slice(payload);
        self.text = text;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_text(&self) -> bool {
        self.text
    }

    /// Build the echo message from the buffered payload.
    pub fn message(&mut self) -> Result<Message, std::str::Utf8Error> {
        let payload = self.data.split().freeze();
        if self.text {
            Utf8Bytes::try_from(payload).map(Message::Text)
        } else {
            Ok(Message::Binary(payload))
        }
    }

    /// Discard whatever is left of the current message.
    pub fn consume(&mut self) {
        self.data.clear();
        self.text = false;
    }
}

/// Lifecycle statistics of a session that closed cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Messages echoed.
    pub messages: u64,
    /// Payload bytes echoed.
    pub bytes: u64,
    /// Keep-alive pings sent to a quiet peer.
    pub keepalive_pings: u64,
}

enum Conn<S> {
    /// Accepted, not yet upgraded.
    Pending(S),
    Open(WebSocketStream<S>),
    Closed,
}

/// Echoes back all received WebSocket messages.
pub struct Session<S> {
    conn: Conn<S>,
    options: Arc<SessionOptions>,
    buffer: MessageBuffer,
    state: State,
    messages: u64,
    bytes: u64,
    keepalive_pings: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Take ownership of an accepted connection.
    pub fn new(stream: S, options: Arc<SessionOptions>) -> Self {
        Self {
            conn: Conn::Pending(stream),
            options,
            buffer: MessageBuffer::with_capacity(BUFFER_SIZE),
            state: State::Handshaking,
            messages: 0,
            bytes: 0,
            keepalive_pings: 0,
        }
    }

    /// Drive the session until the peer closes it or an operation fails.
    ///
    /// A peer close is the normal end of a session and returns `Ok`.
    pub async fn run(mut self) -> Result<SessionSummary, SessionError> {
        let mut failure = None;

        loop {
            let step = match self.state {
                State::Handshaking => self.handshake().await,
                State::Reading => self.read().await,
                State::Writing => self.write().await,
                State::Closed => break,
            };

            let event = step.unwrap_or_else(|err| {
                failure = Some(err);
                Event::Failed
            });

            let next = self.state.advance(event);
            trace!(from = ?self.state, to = ?next, ?event, "Session transition");
            self.state = next;
        }

        self.finish(failure.is_none()).await;

        match failure {
            Some(err) => Err(err),
            None => Ok(SessionSummary {
                messages: self.messages,
                bytes: self.bytes,
                keepalive_pings: self.keepalive_pings,
            }),
        }
    }

    async fn handshake(&mut self) -> Result<Event, SessionError> {
        let stream = match std::mem::replace(&mut self.conn, Conn::Closed) {
            Conn::Pending(stream) => stream,
            other => {
                self.conn = other;
                return Err(SessionError::Handshake(tungstenite::Error::AlreadyClosed));
            }
        };

        let server_header = self.options.server_header.clone();
        let decorate =
            move |_: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                response.headers_mut().insert(SERVER, server_header);
                Ok(response)
            };

        let accept =
            accept_hdr_async_with_config(stream, decorate, Some(self.options.websocket_config()));
        let upgraded = limit(Some(self.options.handshake_timeout), Op::Handshake, accept).await;

        let ws = upgraded?.map_err(SessionError::Handshake)?;
        self.conn = Conn::Open(ws);
        Ok(Event::Upgraded)
    }

    async fn read(&mut self) -> Result<Event, SessionError> {
        let Conn::Open(ws) = &mut self.conn else {
            return Err(SessionError::Read(tungstenite::Error::AlreadyClosed));
        };
        let half_idle = self.options.idle_timeout.map(|idle| idle / 2);
        let mut pinged = false;

        loop {
            let next = match half_idle {
                None => ws.next().await,
                Some(half) => match timeout(half, ws.next()).await {
                    Ok(next) => next,
                    Err(_) if !pinged => {
                        trace!("Peer quiet, sending keep-alive ping");
                        limit(Some(half), Op::Write, ws.send(Message::Ping(Bytes::new())))
                            .await?
                            .map_err(SessionError::Write)?;
                        self.keepalive_pings += 1;
                        pinged = true;
                        continue;
                    }
                    Err(_) => return Err(SessionError::Timeout { op: Op::Read }),
                },
            };

            // Any frame from the peer restarts the idle period
            pinged = false;

            return match next {
                Some(Ok(Message::Text(text))) => {
                    self.buffer.fill(text.as_bytes(), true);
                    Ok(Event::Received)
                }
                Some(Ok(Message::Binary(data))) => {
                    self.buffer.fill(&data, false);
                    Ok(Event::Received)
                }
                Some(Ok(Message::Close(frame))) => {
                    trace!(?frame, "Close frame received");
                    Ok(Event::PeerClosed)
                }
                // Control frames are answered by the protocol layer and never echoed
                Some(Ok(_)) => continue,
                None
                | Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                )) => Ok(Event::PeerClosed),
                Some(Err(e)) => Err(SessionError::Read(e)),
            };
        }
    }

    async fn write(&mut self) -> Result<Event, SessionError> {
        let Conn::Open(ws) = &mut self.conn else {
            return Err(SessionError::Write(tungstenite::Error::AlreadyClosed));
        };

        trace!(
            len = self.buffer.len(),
            text = self.buffer.is_text(),
            "Echoing message"
        );

        // Echo the message with the kind it arrived with
        let message = self.buffer.message().map_err(SessionError::Encoding)?;
        let len = message.len();

        let sent = limit(self.options.idle_timeout, Op::Write, ws.send(message)).await;

        sent?.map_err(SessionError::Write)?;

        self.buffer.consume();
        self.messages += 1;
        self.bytes += len as u64;
        Ok(Event::Echoed)
    }

    /// Release the connection, completing a peer-initiated close first.
    async fn finish(&mut self, clean: bool) {
        if let Conn::Open(ws) = &mut self.conn {
            if clean {
                match limit(self.options.idle_timeout, Op::Write, ws.close(None)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(error = %e, "Close handshake incomplete"),
                    Err(e) => debug!(error = %e, "Close handshake incomplete"),
                }
            }
        }
        self.conn = Conn::Closed;
    }
}

/// Bound `fut` by `duration`, reporting expiry against `op`.
async fn limit<F: Future>(
    duration: Option<Duration>,
    op: Op,
    fut: F,
) -> Result<F::Output, SessionError> {
    match duration {
        Some(duration) => timeout(duration, fut)
            .await
            .map_err(|_| SessionError::Timeout { op }),
        None => Ok(fut.await),
    }
}
