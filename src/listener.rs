//! Accepts incoming connections and launches the sessions.
//!
//! The accept loop runs as its own task and never waits on a session: each
//! accepted connection is moved into a fresh [`Session`] which is spawned on
//! its own task, and the next accept is issued immediately.

use crate::error::{fail, Op, SetupError};
use crate::session::{Session, SessionOptions};
use crate::stats::ServerStats;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, debug_span, Instrument};

/// Source of accepted connections.
pub trait Accept: Send + 'static {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next inbound connection.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Conn, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    type Conn = TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Accept loop handing each connection to a new session.
pub struct Listener<A> {
    acceptor: A,
    options: Arc<SessionOptions>,
    stats: Arc<ServerStats>,
}

impl Listener<TcpListener> {
    /// Open, configure, bind and start listening on `addr`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(
        addr: SocketAddr,
        backlog: i32,
        options: Arc<SessionOptions>,
        stats: Arc<ServerStats>,
    ) -> Result<Self, SetupError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(SetupError::Open)?;

        socket
            .set_reuse_address(true)
            .map_err(SetupError::SetOption)?;
        socket.bind(&addr.into()).map_err(SetupError::Bind)?;
        socket.listen(backlog).map_err(SetupError::Listen)?;
        socket
            .set_nonblocking(true)
            .map_err(SetupError::SetOption)?;

        let listener = TcpListener::from_std(socket.into()).map_err(SetupError::Register)?;
        Ok(Self::new(listener, options, stats))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }
}

impl<A: Accept> Listener<A> {
    pub fn new(acceptor: A, options: Arc<SessionOptions>, stats: Arc<ServerStats>) -> Self {
        Self {
            acceptor,
            options,
            stats,
        }
    }

    /// Accept connections forever.
    ///
    /// Accept failures are reported and followed by the next accept.
    pub async fn run(mut self) {
        loop {
            match self.acceptor.accept().await {
                Ok((stream, peer)) => self.launch(stream, peer),
                Err(e) => {
                    self.stats.record_accept_error();
                    fail(Op::Accept, &e);
                }
            }
        }
    }

    fn launch(&self, stream: A::Conn, peer: SocketAddr) {
        debug!(peer = %peer, "New connection");

        let session = Session::new(stream, Arc::clone(&self.options));
        let stats = Arc::clone(&self.stats);
        stats.session_started();

        tokio::spawn(
            async move {
                match session.run().await {
                    Ok(summary) => {
                        stats.session_finished(true);
                        debug!(
                            messages = summary.messages,
                            bytes = summary.bytes,
                            keepalive_pings = summary.keepalive_pings,
                            active = stats.snapshot().active,
                            "Session closed"
                        );
                    }
                    Err(e) => {
                        stats.session_finished(false);
                        fail(e.op(), &e);
                    }
                }
            }
            .instrument(debug_span!("session", peer = %peer)),
        );
    }
}
