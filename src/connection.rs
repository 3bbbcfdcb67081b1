//! A single postgres connection.
use bytes::Bytes;
use std::{
    collections::HashMap,
    io,
    sync::Arc,
    task::{Context, Poll, ready},
};

use crate::{
    common::{ByteStr, general, verbose},
    error::{Error, Result},
    net::{BufferedSocket, Socket},
    postgres::{
        BackendProtocol, DatabaseError, FrontendProtocol, ProtocolError,
        backend::{BackendMessage, CommandComplete, ReadyForQuery},
        frontend,
    },
    statement::StatementMetadata,
};

mod config;
mod startup;

pub use config::{Config, ParseError, SslMode};
pub use startup::AuthError;

/// A single postgres connection.
///
/// Owned by at most one lease at a time; protocol phases on it are
/// strictly serialized, the next phase begins only after the previous
/// `ReadyForQuery` was observed.
#[derive(Debug)]
pub struct Connection {
    stream: BufferedSocket,
    host: ByteStr,
    port: u16,
    /// Prebuilt `CancelRequest` frame from `BackendKeyData`.
    cancel_frame: Option<Bytes>,
    /// Server parameters reported during startup.
    parameters: HashMap<ByteStr, ByteStr>,
    /// Prepared statements by query id; evicted only with the
    /// connection.
    statements: HashMap<u64, Arc<StatementMetadata>>,
    /// `ReadyForQuery` frames still owed before the next phase may run.
    skip_until_ready: u32,
    /// Whether a `Terminate` frame was queued already.
    terminating: bool,
    broken: bool,
}

impl Connection {
    /// Connect and run the startup phase, all within the connect
    /// timeout.
    pub async fn connect_with(config: Config) -> Result<Connection> {
        let attempt = async {
            let socket = Socket::connect(&config.host, config.port, config.ssl).await?;
            let mut stream = BufferedSocket::new(socket);
            let data = startup::startup(&mut stream, &config).await?;
            verbose!(host = %config.host, port = config.port, "connection ready");
            Ok(Connection {
                stream,
                host: config.host.clone(),
                port: config.port,
                cancel_frame: data.cancel_frame,
                parameters: data.parameters,
                statements: HashMap::new(),
                skip_until_ready: 0,
                terminating: false,
                broken: false,
            })
        };

        match tokio::time::timeout(config.connect_timeout, attempt).await {
            Ok(outcome) => outcome.map_err(|e: Error| e.context("failed to connect")),
            Err(_) => Err(Error::connect_timeout(config.connect_timeout)),
        }
    }

    /// Connect using [`Config::from_env`].
    pub async fn connect_env() -> Result<Connection> {
        Self::connect_with(Config::from_env()).await
    }

    /// Connect to a `postgres://` url.
    pub async fn connect(url: &str) -> Result<Connection> {
        Self::connect_with(Config::parse(url)?).await
    }

    /// Value of a server parameter reported during startup.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.iter().find(|(k, _)| ***k == *name).map(|(_, v)| v.as_str())
    }

    /// Execute a query on this connection.
    ///
    /// Pooled callers go through [`Pool::run`][crate::Pool::run]
    /// instead, which leases a connection per query.
    pub fn run(&mut self, query: impl Into<crate::sql::Query>) -> crate::query::Run<'_> {
        crate::query::Run::direct(self, query.into())
    }

    /// Buffer a frontend message; call [`poll_flush`][Self::poll_flush]
    /// to write it out.
    pub(crate) fn send<F: FrontendProtocol>(&mut self, message: F) {
        message.encode(self.stream.write_buf_mut());
    }

    /// Ignore all backend messages until one more `ReadyForQuery`.
    ///
    /// Used after a failed phase: the backend keeps replying until the
    /// `Sync` it skips to, and those frames belong to no phase.
    pub(crate) fn ready_request(&mut self) {
        self.skip_until_ready += 1;
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    /// Mark the stream untrustworthy; the pool will destroy it.
    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub(crate) fn statement(&self, query_id: u64) -> Option<Arc<StatementMetadata>> {
        self.statements.get(&query_id).cloned()
    }

    pub(crate) fn add_statement(&mut self, query_id: u64, meta: Arc<StatementMetadata>) {
        self.statements.insert(query_id, meta);
    }

    /// Host, port and prebuilt frame for the out-of-band cancel
    /// connection.
    pub(crate) fn cancel_key(&self) -> Option<(ByteStr, u16, Bytes)> {
        let frame = self.cancel_frame.clone()?;
        Some((self.host.clone(), self.port, frame))
    }

    /// Flush buffered frontend messages.
    pub(crate) fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        self.stream.poll_flush(cx)
    }

    /// Receive the next message of the active phase.
    ///
    /// This is the universal driver layer: buffered writes are flushed
    /// first, `NoticeResponse` is logged and never surfaced,
    /// `ErrorResponse` is parsed into a typed [`DatabaseError`] and fails
    /// the phase, and frames owed to a failed phase are skipped until
    /// their `ReadyForQuery`.
    pub(crate) fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        loop {
            if !self.stream.write_is_empty() {
                ready!(self.stream.poll_flush(cx)).map_err(|err| self.fatal(err))?;
            }

            let (tag, body) = match ready!(self.stream.poll_frame(cx)) {
                Ok(frame) => frame,
                Err(err) => {
                    self.broken = true;
                    return Poll::Ready(Err(err));
                }
            };

            // notices are a side channel, never a phase outcome
            if tag == b'N' {
                self.log_notice(body)?;
                continue;
            }

            if self.skip_until_ready > 0 {
                if tag == ReadyForQuery::FORMAT {
                    self.skip_until_ready -= 1;
                }
                verbose!(skip = self.skip_until_ready, "discarded frame while draining");
                continue;
            }

            if tag == b'E' {
                let err = DatabaseError::parse(body).map_err(|err| self.fatal(err))?;
                return Poll::Ready(Err(err.into()));
            }

            return Poll::Ready(match B::decode(tag, body) {
                Ok(message) => Ok(message),
                // out-of-order reply, the stream is no longer trustworthy
                Err(err) => Err(self.fatal(err)),
            });
        }
    }

    /// Flush and drain owed `ReadyForQuery` frames.
    ///
    /// The pool calls this before recycling a connection, so a lease
    /// never observes frames of a previous failed phase.
    pub(crate) fn poll_ready(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        loop {
            ready!(self.stream.poll_flush(cx)).map_err(|err| self.fatal(err))?;
            if self.skip_until_ready == 0 {
                return Poll::Ready(Ok(()));
            }

            let (tag, body) = match ready!(self.stream.poll_frame(cx)) {
                Ok(frame) => frame,
                Err(err) => {
                    self.broken = true;
                    return Poll::Ready(Err(err));
                }
            };
            match tag {
                _ if tag == ReadyForQuery::FORMAT => self.skip_until_ready -= 1,
                b'N' => self.log_notice(body)?,
                _ => verbose!("discarded frame while draining"),
            }
        }
    }

    /// Graceful shutdown: `Terminate`, flush, close the socket.
    pub(crate) fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        if !self.terminating {
            self.terminating = true;
            if !self.broken {
                self.send(frontend::Terminate);
            }
        }
        if !self.broken {
            ready!(self.stream.poll_flush(cx))?;
        }
        self.stream.poll_shutdown(cx)
    }

    /// Run one simple query cycle; only used for transaction control
    /// (`begin`, `commit`, `rollback` and savepoint statements).
    ///
    /// Succeeds iff a `CommandComplete` arrived before the terminal
    /// `ReadyForQuery`, and returns its tag.
    pub(crate) async fn simple_query(&mut self, sql: &str) -> Result<ByteStr> {
        self.send(frontend::Query { sql });
        self.flush().await?;

        let mut tag = None;
        loop {
            let message = match self.recv::<BackendMessage>().await {
                Ok(message) => message,
                Err(err) => {
                    // the backend still finishes the cycle after an error
                    if err.as_database().is_some() {
                        self.ready_request();
                    }
                    return Err(err);
                }
            };
            match message {
                BackendMessage::CommandComplete(CommandComplete { tag: t }) => tag = Some(t),
                BackendMessage::EmptyQueryResponse(_) => {}
                BackendMessage::ReadyForQuery(_) => break,
                other => {
                    let err = other.unexpected("running a simple query");
                    return Err(self.fatal(err));
                }
            }
        }

        tag.ok_or_else(|| {
            self.fatal(ProtocolError::new(general!("simple query finished without completing")))
        })
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        let result = std::future::poll_fn(|cx| self.stream.poll_flush(cx)).await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fatal(err)),
        }
    }

    pub(crate) async fn recv<B: BackendProtocol>(&mut self) -> Result<B> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    fn log_notice(&mut self, body: Bytes) -> Result<()> {
        match DatabaseError::parse(body) {
            Ok(notice) => {
                tracing::warn!(severity = %notice.severity, code = %notice.code, "{}", notice.message);
                Ok(())
            }
            Err(err) => Err(self.fatal(err)),
        }
    }

    fn fatal(&mut self, err: impl Into<Error>) -> Error {
        self.broken = true;
        err.into()
    }
}
