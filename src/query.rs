//! Query execution futures.
//!
//! [`Run`] drives one query through its protocol phases: lease
//! acquisition, extended-query preparation when no metadata is cached,
//! then extended-query execution. It is cancellable through a
//! [`CancelHandle`] and by the pool query timeout; both fire the
//! out-of-band `CancelRequest` and the future keeps draining until the
//! terminal `ReadyForQuery`, so the connection stays usable.
use bytes::BytesMut;
use std::{
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll, Waker, ready},
    time::Duration,
};
use tokio::time::{Sleep, sleep};

use crate::{
    common::general,
    connection::Connection,
    error::{Error, Result},
    net,
    pool::{
        PoolConnection,
        worker::{Acquire, WorkerHandle},
    },
    postgres::{ProtocolError, backend::BackendMessage, frontend},
    row::{QueryResult, Row, rows_affected},
    sql::Query,
    statement::{StatementMetadata, StatementName},
    types::{self, PgValue, UnsupportedType},
};

/// Shared cancel flag between a future and its handles.
#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl CancelState {
    fn register(&self, waker: &Waker) {
        *self.waker.lock().unwrap() = Some(waker.clone());
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancels the query of the [`Run`] future it was taken from.
///
/// Cancellation is idempotent and best-effort: the server may still run
/// the statement to completion, in which case the future resolves with
/// the result.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Request cancellation and wake the future so it can fire the
    /// out-of-band `CancelRequest`.
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::SeqCst) {
            if let Some(waker) = self.state.waker.lock().unwrap().take() {
                waker.wake();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Where the future gets its connection from.
enum Io<'c> {
    /// Waiting on the pool; dropping this skips the waiter.
    Acquiring(Acquire, WorkerHandle),
    Pooled(PoolConnection),
    /// A transaction's connection.
    Borrowed(&'c mut Connection),
    Gone,
}

impl Io<'_> {
    fn conn(&mut self) -> &mut Connection {
        match self {
            Io::Pooled(lease) => lease.connection(),
            Io::Borrowed(conn) => conn,
            Io::Acquiring(..) | Io::Gone => unreachable!("no connection leased"),
        }
    }

    fn has_conn(&self) -> bool {
        matches!(self, Io::Pooled(_) | Io::Borrowed(_))
    }
}

/// Future of one executed query. Created by [`Pool::run`][crate::Pool::run]
/// and [`Transaction::run`][crate::Transaction::run].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Run<'c> {
    io: Io<'c>,
    query: Query,
    phase: Phase,
    meta: Option<Arc<StatementMetadata>>,
    rows: Vec<Row>,
    during: &'static str,

    cancel: Arc<CancelState>,
    timeout: Pin<Box<Sleep>>,
    timed_out: bool,
    cancel_fired: bool,

    /// Rollback-only marker of the owning transaction.
    tx_flag: Option<&'c mut bool>,
}

enum Phase {
    Init,
    Prepare(PrepareState),
    ExecuteSend,
    Execute(ExecState),
    Done,
}

impl Run<'static> {
    pub(crate) fn pooled(handle: WorkerHandle, query: Query, timeout: Duration) -> Run<'static> {
        Self::new(Io::Acquiring(handle.acquire(), handle), query, timeout, None)
    }
}

impl<'c> Run<'c> {
    /// Run on a standalone connection, outside any pool.
    pub(crate) fn direct(conn: &'c mut Connection, query: Query) -> Run<'c> {
        // the pool default window
        Self::new(Io::Borrowed(conn), query, Duration::from_millis(120_000), None)
    }

    pub(crate) fn transactional(
        conn: &'c mut Connection,
        tx_flag: &'c mut bool,
        query: Query,
        timeout: Duration,
    ) -> Run<'c> {
        Self::new(Io::Borrowed(conn), query, timeout, Some(tx_flag))
    }

    fn new(
        io: Io<'c>,
        query: Query,
        timeout: Duration,
        tx_flag: Option<&'c mut bool>,
    ) -> Run<'c> {
        Run {
            io,
            query,
            phase: Phase::Init,
            meta: None,
            rows: Vec::new(),
            during: "while waiting for a connection",
            cancel: Arc::default(),
            timeout: Box::pin(sleep(timeout)),
            timed_out: false,
            cancel_fired: false,
            tx_flag,
        }
    }

    /// A handle that cancels this query from anywhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { state: self.cancel.clone() }
    }

    fn cancel_requested(&self) -> bool {
        self.timed_out || self.cancel.is_cancelled()
    }

    /// Final error mapping: a backend `57014` after our cancel request
    /// becomes the cancelled error, and a cancelled statement marks the
    /// owning transaction rollback-only.
    fn settle(&mut self, err: Error) -> Error {
        let server_cancelled = self.cancel_requested()
            && err.as_database().is_some_and(|db| db.is_query_cancelled());
        let err = match server_cancelled {
            true => Error::cancelled(self.during, self.timed_out),
            false => err,
        };
        if err.is_cancelled() {
            if let Some(flag) = self.tx_flag.as_mut() {
                **flag = true;
            }
        }
        self.phase = Phase::Done;
        err
    }

    fn cancelled_now(&mut self) -> Error {
        let err = Error::cancelled(self.during, self.timed_out);
        self.settle(err)
    }

    /// Open the cancel connection, once.
    fn fire_cancel(&mut self) {
        if self.cancel_fired {
            return;
        }
        self.cancel_fired = true;
        if let Some((host, port, frame)) = self.io.conn().cancel_key() {
            tokio::spawn(async move {
                if let Err(err) = net::send_cancel(&host, port, frame).await {
                    tracing::warn!(error = %err, "cancel request failed");
                }
            });
        }
    }
}

impl Future for Run<'_> {
    type Output = Result<QueryResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();

        me.cancel.register(cx.waker());
        if me.timeout.as_mut().poll(cx).is_ready() {
            me.timed_out = true;
        }

        if me.cancel_requested() {
            match me.phase {
                // a waiting lease is abandoned, the pool skips the waiter
                Phase::Init if !me.io.has_conn() => {
                    me.io = Io::Gone;
                    return Poll::Ready(Err(me.cancelled_now()));
                }
                // nothing in flight on the wire, fail cleanly
                Phase::Init | Phase::ExecuteSend => {
                    return Poll::Ready(Err(me.cancelled_now()));
                }
                // a phase is in flight: cancel out of band, keep draining
                Phase::Prepare(_) | Phase::Execute(_) => me.fire_cancel(),
                Phase::Done => {}
            }
        }

        loop {
            match &mut me.phase {
                Phase::Init => {
                    if let Io::Acquiring(acquire, handle) = &mut me.io {
                        let conn = match ready!(Pin::new(acquire).poll(cx)) {
                            Ok(conn) => conn,
                            Err(err) => return Poll::Ready(Err(me.settle(err))),
                        };
                        let handle = handle.clone();
                        me.io = Io::Pooled(PoolConnection::new(handle, conn));
                    }

                    let query = &me.query;
                    let conn = me.io.conn();
                    me.meta = query
                        .metadata()
                        .cloned()
                        .or_else(|| conn.statement(query.id()));

                    match me.meta.is_some() {
                        true => me.phase = Phase::ExecuteSend,
                        false => {
                            me.during = "during preparation";
                            send_prepare(conn, query.id(), query.sql());
                            me.phase = Phase::Prepare(PrepareState::default());
                        }
                    }
                }
                Phase::Prepare(st) => {
                    let conn = match &mut me.io {
                        Io::Pooled(lease) => lease.connection(),
                        Io::Borrowed(conn) => conn,
                        _ => unreachable!("no connection leased"),
                    };
                    let meta = match ready!(poll_prepare(conn, st, me.query.id(), cx)) {
                        Ok(meta) => meta,
                        Err(err) => return Poll::Ready(Err(me.settle(err))),
                    };
                    me.meta = Some(meta);
                    // deterministic: a cancel seen while preparing fails
                    // the query even though preparation finished
                    if me.cancel_requested() {
                        return Poll::Ready(Err(me.cancelled_now()));
                    }
                    me.phase = Phase::ExecuteSend;
                }
                Phase::ExecuteSend => {
                    me.during = "during execution";
                    let meta = me.meta.clone().expect("metadata resolved before execution");
                    let query = &me.query;

                    if query.params().len() != meta.param_types.len() {
                        let err = UnsupportedType::new(format!(
                            "query expects {} parameters, {} bound",
                            meta.param_types.len(),
                            query.params().len(),
                        ));
                        return Poll::Ready(Err(me.settle(err.into())));
                    }

                    let payloads = match encode_params(query.params(), &meta) {
                        Ok(payloads) => payloads,
                        Err(err) => return Poll::Ready(Err(me.settle(err.into()))),
                    };

                    let conn = me.io.conn();
                    let name = StatementName::from_query_id(query.id());
                    let mut st = ExecState::default();

                    // the statement may be prepared on another connection
                    // only; re-parse it here, declaring the known types
                    if conn.statement(query.id()).is_none() {
                        conn.send(frontend::Parse {
                            statement: name.as_str(),
                            sql: query.sql(),
                            param_types_len: meta.param_types.len() as i16,
                            param_types: meta.param_types.iter().copied(),
                        });
                        st.parse_pending = true;
                    }
                    conn.send(frontend::Bind {
                        portal: "",
                        statement: name.as_str(),
                        params: &payloads,
                    });
                    conn.send(frontend::Execute { portal: "", max_rows: 0 });
                    conn.send(frontend::Sync);

                    me.phase = Phase::Execute(st);
                }
                Phase::Execute(st) => {
                    let meta = me.meta.as_ref().expect("metadata resolved before execution");
                    let conn = match &mut me.io {
                        Io::Pooled(lease) => lease.connection(),
                        Io::Borrowed(conn) => conn,
                        _ => unreachable!("no connection leased"),
                    };
                    let affected = match ready!(poll_execute(
                        conn,
                        st,
                        meta,
                        &mut me.rows,
                        me.query.id(),
                        cx,
                    )) {
                        Ok(affected) => affected,
                        Err(err) => return Poll::Ready(Err(me.settle(err))),
                    };
                    me.phase = Phase::Done;
                    return Poll::Ready(Ok(QueryResult {
                        rows: std::mem::take(&mut me.rows),
                        rows_affected: affected,
                    }));
                }
                Phase::Done => panic!("`Run` polled after completion"),
            }
        }
    }
}

impl Drop for Run<'_> {
    /// A future abandoned mid-phase leaves its frames on the wire; mark
    /// the drain so the pool never recycles a dirty connection, and
    /// close the statement whose parse outcome is now unknown.
    fn drop(&mut self) {
        if !self.io.has_conn() {
            return;
        }
        match &self.phase {
            Phase::Prepare(_) => {
                let id = self.query.id();
                let conn = self.io.conn();
                conn.ready_request();
                close_statement(conn, id);
            }
            Phase::Execute(st) => {
                let parse_pending = st.parse_pending;
                let id = self.query.id();
                let conn = self.io.conn();
                conn.ready_request();
                if parse_pending {
                    close_statement(conn, id);
                }
            }
            Phase::Init | Phase::ExecuteSend | Phase::Done => {}
        }
    }
}

/// Future of [`Pool::metadata`][crate::Pool::metadata]: prepare without
/// executing, yielding the inferred parameter and column types.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Metadata<'c> {
    io: Io<'c>,
    sql: String,
    id: u64,
    phase: MetaPhase,
    timeout: Pin<Box<Sleep>>,
    timed_out: bool,
    cancel_fired: bool,
}

enum MetaPhase {
    Init,
    Prepare(PrepareState),
    Done,
}

impl Metadata<'static> {
    pub(crate) fn pooled(handle: WorkerHandle, sql: &str, timeout: Duration) -> Metadata<'static> {
        Metadata {
            io: Io::Acquiring(handle.acquire(), handle),
            sql: sql.to_string(),
            id: crate::sql::query_id(sql),
            phase: MetaPhase::Init,
            timeout: Box::pin(sleep(timeout)),
            timed_out: false,
            cancel_fired: false,
        }
    }
}

impl Future for Metadata<'_> {
    type Output = Result<Arc<StatementMetadata>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();

        if me.timeout.as_mut().poll(cx).is_ready() {
            me.timed_out = true;
            match me.phase {
                MetaPhase::Init if !me.io.has_conn() => {
                    me.io = Io::Gone;
                    me.phase = MetaPhase::Done;
                    return Poll::Ready(Err(Error::cancelled(
                        "while waiting for a connection",
                        true,
                    )));
                }
                MetaPhase::Prepare(_) if !me.cancel_fired => {
                    me.cancel_fired = true;
                    if let Some((host, port, frame)) = me.io.conn().cancel_key() {
                        tokio::spawn(async move {
                            if let Err(err) = net::send_cancel(&host, port, frame).await {
                                tracing::warn!(error = %err, "cancel request failed");
                            }
                        });
                    }
                }
                _ => {}
            }
        }

        loop {
            match &mut me.phase {
                MetaPhase::Init => {
                    if let Io::Acquiring(acquire, handle) = &mut me.io {
                        let conn = match ready!(Pin::new(acquire).poll(cx)) {
                            Ok(conn) => conn,
                            Err(err) => {
                                me.phase = MetaPhase::Done;
                                return Poll::Ready(Err(err));
                            }
                        };
                        let handle = handle.clone();
                        me.io = Io::Pooled(PoolConnection::new(handle, conn));
                    }

                    let conn = me.io.conn();
                    if let Some(meta) = conn.statement(me.id) {
                        me.phase = MetaPhase::Done;
                        return Poll::Ready(Ok(meta));
                    }
                    send_prepare(conn, me.id, &me.sql);
                    me.phase = MetaPhase::Prepare(PrepareState::default());
                }
                MetaPhase::Prepare(st) => {
                    let conn = match &mut me.io {
                        Io::Pooled(lease) => lease.connection(),
                        Io::Borrowed(conn) => conn,
                        _ => unreachable!("no connection leased"),
                    };
                    let id = me.id;
                    let result = ready!(poll_prepare(conn, st, id, cx));
                    me.phase = MetaPhase::Done;
                    return Poll::Ready(result.map_err(|err| {
                        let cancelled = me.timed_out
                            && err.as_database().is_some_and(|db| db.is_query_cancelled());
                        match cancelled {
                            true => Error::cancelled("during preparation", true),
                            false => err,
                        }
                    }));
                }
                MetaPhase::Done => panic!("`Metadata` polled after completion"),
            }
        }
    }
}

impl Drop for Metadata<'_> {
    fn drop(&mut self) {
        if matches!(self.phase, MetaPhase::Prepare(_)) && self.io.has_conn() {
            let id = self.id;
            let conn = self.io.conn();
            conn.ready_request();
            close_statement(conn, id);
        }
    }
}

/// Queue the preparation batch: `Parse` + `Describe(statement)` + `Sync`.
///
/// Parameter types are left for the server to infer.
fn send_prepare(conn: &mut Connection, query_id: u64, sql: &str) {
    let name = StatementName::from_query_id(query_id);
    conn.send(frontend::Parse {
        statement: name.as_str(),
        sql,
        param_types_len: 0,
        param_types: std::iter::empty::<types::Oid>(),
    });
    conn.send(frontend::Describe { kind: b'S', name: name.as_str() });
    conn.send(frontend::Sync);
}

/// Queue `Close(statement)` + `Sync` for a statement whose preparation
/// phase failed after its `Parse` succeeded; without this, the next
/// attempt would hit `42P05 duplicate prepared statement`.
fn close_statement(conn: &mut Connection, query_id: u64) {
    let name = StatementName::from_query_id(query_id);
    conn.send(frontend::Close { kind: b'S', name: name.as_str() });
    conn.send(frontend::Sync);
    conn.ready_request();
}

#[derive(Debug, Default)]
struct PrepareState {
    parse_done: bool,
    params: Option<Vec<types::Oid>>,
    columns: Option<Vec<crate::statement::ColumnInfo>>,
    no_data: bool,
}

/// Drive one preparation phase to its `ReadyForQuery`.
///
/// Succeeds iff `ParseComplete` and `ParameterDescription` were seen,
/// plus either `RowDescription` or `NoData`. The produced metadata is
/// cached on the connection.
fn poll_prepare(
    conn: &mut Connection,
    st: &mut PrepareState,
    query_id: u64,
    cx: &mut Context,
) -> Poll<Result<Arc<StatementMetadata>>> {
    loop {
        let message = match ready!(conn.poll_recv::<BackendMessage>(cx)) {
            Ok(message) => message,
            Err(err) => {
                if err.as_database().is_some() {
                    // the backend skips to our Sync; the half-made
                    // statement must not linger server-side
                    if st.parse_done {
                        close_statement(conn, query_id);
                    }
                    conn.ready_request();
                }
                return Poll::Ready(Err(err));
            }
        };

        use BackendMessage::*;
        match message {
            ParseComplete(_) => st.parse_done = true,
            ParameterDescription(p) => st.params = Some(p.types),
            RowDescription(rd) => st.columns = Some(rd.columns),
            NoData(_) => st.no_data = true,
            ReadyForQuery(_) => {
                let complete =
                    st.parse_done && st.params.is_some() && (st.columns.is_some() || st.no_data);
                if !complete {
                    let err = ProtocolError::new(general!(
                        "statement preparation finished incomplete"
                    ));
                    conn.mark_broken();
                    return Poll::Ready(Err(err.into()));
                }
                let meta = Arc::new(StatementMetadata {
                    param_types: st.params.take().unwrap_or_default(),
                    columns: st.columns.take().unwrap_or_default().into(),
                });
                conn.add_statement(query_id, meta.clone());
                return Poll::Ready(Ok(meta));
            }
            other => {
                let err = other.unexpected("preparing a statement");
                conn.mark_broken();
                return Poll::Ready(Err(err.into()));
            }
        }
    }
}

#[derive(Debug, Default)]
struct ExecState {
    /// A `Parse` was sent in this phase and is not confirmed yet.
    parse_pending: bool,
    bind_done: bool,
    complete: bool,
    affected: u64,
}

/// Drive one execution phase to its `ReadyForQuery`.
///
/// Succeeds iff parse (when sent), bind and command completion were all
/// observed. Rows are decoded by their declared column oids as they
/// arrive.
fn poll_execute(
    conn: &mut Connection,
    st: &mut ExecState,
    meta: &Arc<StatementMetadata>,
    rows: &mut Vec<Row>,
    query_id: u64,
    cx: &mut Context,
) -> Poll<Result<u64>> {
    loop {
        let message = match ready!(conn.poll_recv::<BackendMessage>(cx)) {
            Ok(message) => message,
            Err(err) => {
                if err.as_database().is_some() {
                    conn.ready_request();
                }
                return Poll::Ready(Err(err));
            }
        };

        use BackendMessage::*;
        match message {
            ParseComplete(_) if st.parse_pending => {
                st.parse_pending = false;
                conn.add_statement(query_id, meta.clone());
            }
            BindComplete(_) => st.bind_done = true,
            DataRow(row) => {
                if row.values.len() != meta.columns.len() {
                    let err = ProtocolError::new(general!(
                        "DataRow carries {} values for {} columns",
                        row.values.len(),
                        meta.columns.len(),
                    ));
                    conn.mark_broken();
                    return Poll::Ready(Err(err.into()));
                }
                let mut values = Vec::with_capacity(row.values.len());
                for (column, value) in meta.columns.iter().zip(row.values) {
                    match value {
                        None => values.push(PgValue::Null),
                        Some(bytes) => match types::decode(column.type_oid, bytes) {
                            Ok(value) => values.push(value),
                            Err(err) => {
                                // skip the rest of this result set
                                conn.ready_request();
                                return Poll::Ready(Err(Error::from(err)
                                    .context(format!("column {:?}", column.name))));
                            }
                        },
                    }
                }
                rows.push(Row::new(meta.columns.clone(), values));
            }
            CommandComplete(c) => {
                st.affected = rows_affected(&c.tag);
                st.complete = true;
            }
            EmptyQueryResponse(_) => st.complete = true,
            ReadyForQuery(_) => {
                let success = !st.parse_pending && st.bind_done && st.complete;
                if !success {
                    let err =
                        ProtocolError::new(general!("statement execution finished incomplete"));
                    conn.mark_broken();
                    return Poll::Ready(Err(err.into()));
                }
                return Poll::Ready(Ok(st.affected));
            }
            other => {
                let err = other.unexpected("executing a statement");
                conn.mark_broken();
                return Poll::Ready(Err(err.into()));
            }
        }
    }
}

/// Encode every parameter against its declared oid.
fn encode_params(
    params: &[PgValue],
    meta: &StatementMetadata,
) -> Result<Vec<Option<bytes::Bytes>>, UnsupportedType> {
    let mut payloads = Vec::with_capacity(params.len());
    for (value, &oid) in params.iter().zip(&meta.param_types) {
        if value.is_null() {
            payloads.push(None);
            continue;
        }
        let mut buf = BytesMut::new();
        types::encode(value, oid, &mut buf)?;
        payloads.push(Some(buf.freeze()));
    }
    Ok(payloads)
}
