use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    time::{Instant, Sleep, sleep},
};
use tracing::trace;

use super::PoolConfig;
use crate::{
    connection::Connection,
    error::{Error, Result},
};

/// First retry delay when the pool is below its minimum.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(16);

/// Retry backoff cap.
const MAX_RETRY_DELAY: Duration = Duration::from_millis(4096);

/// Cheap clonable handle into the worker task.
///
/// All pool state lives in the worker future; handles only pass
/// messages, so no pool structure is ever shared between tasks.
pub(crate) struct WorkerHandle {
    send: UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
    pub fn new(config: PoolConfig) -> (Self, WorkerFuture) {
        let (send, recv) = mpsc::unbounded_channel();
        let reaper = Box::pin(sleep(config.idle_timeout));
        (
            Self { send },
            WorkerFuture {
                config,
                recv,
                open: 0,
                idle: Vec::new(),
                waiters: VecDeque::new(),
                opening: Vec::new(),
                draining: Vec::new(),
                closing: Vec::new(),
                retry: None,
                retry_delay: INITIAL_RETRY_DELAY,
                reaper,
            },
        )
    }

    /// Request a connection lease.
    pub fn acquire(&self) -> Acquire {
        let (send, recv) = oneshot::channel();
        match self.send.send(WorkerMessage::Acquire(send)) {
            Ok(()) => Acquire { recv: Some(recv) },
            Err(_) => Acquire { recv: None },
        }
    }

    /// Return a leased connection; exactly once per lease, from the
    /// lease's `Drop`.
    pub fn release(&self, conn: Connection) {
        let _ = self.send.send(WorkerMessage::Release(conn));
    }

    /// Tear the pool down; resolves once every connection is dropped.
    pub fn destroy(&self) -> Option<oneshot::Receiver<()>> {
        let (send, recv) = oneshot::channel();
        self.send.send(WorkerMessage::Destroy(send)).ok()?;
        Some(recv)
    }
}

impl Clone for WorkerHandle {
    fn clone(&self) -> Self {
        Self { send: self.send.clone() }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WorkerHandle")
    }
}

/// Pending lease request.
///
/// Dropping it cancels the wait: the worker skips the waiter when its
/// turn comes and the produced connection returns to the pool.
#[derive(Debug)]
pub(crate) struct Acquire {
    recv: Option<AcquireRecv>,
}

impl Future for Acquire {
    type Output = Result<Connection>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(recv) = self.recv.as_mut() else {
            return Poll::Ready(Err(Error::pool_closed()));
        };
        match std::task::ready!(Pin::new(recv).poll(cx)) {
            Ok(result) => Poll::Ready(result),
            // worker dropped the sender: the pool was destroyed
            Err(_) => Poll::Ready(Err(Error::pool_closed())),
        }
    }
}

type AcquireSend = oneshot::Sender<Result<Connection>>;
type AcquireRecv = oneshot::Receiver<Result<Connection>>;

enum WorkerMessage {
    Acquire(AcquireSend),
    Release(Connection),
    Destroy(oneshot::Sender<()>),
}

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Connection>> + Send>>;

struct Idle {
    conn: Connection,
    since: Instant,
}

/// The pool state machine, run as one task.
///
/// - the idle stack is LIFO, the most recently used connection is
///   reused first
/// - waiters are FIFO
/// - a released connection is drained of any frames owed to a failed
///   phase before it is recycled
/// - below the minimum, failed connection attempts back off
///   exponentially from 16 ms up to `min(4096 ms, connect_timeout)`
pub(crate) struct WorkerFuture {
    config: PoolConfig,
    recv: UnboundedReceiver<WorkerMessage>,

    /// Live connections, leased ones included.
    open: usize,
    /// Unleased connections; pushed and popped at the back.
    idle: Vec<Idle>,
    waiters: VecDeque<AcquireSend>,
    opening: Vec<ConnectFuture>,
    /// Released connections still draining a failed phase.
    draining: Vec<Connection>,
    /// Connections shutting down gracefully.
    closing: Vec<Connection>,

    retry: Option<Pin<Box<Sleep>>>,
    retry_delay: Duration,
    reaper: Pin<Box<Sleep>>,
}

impl WorkerFuture {
    /// Hand `conn` to the first waiter still listening, else stack it.
    fn offer(&mut self, mut conn: Connection) {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Ok(conn)) {
                Ok(()) => return,
                // the waiter cancelled; reclaim and try the next one
                Err(Ok(reclaimed)) => conn = reclaimed,
                Err(Err(_)) => unreachable!("only `Ok` leases are offered"),
            }
        }
        self.idle.push(Idle { conn, since: Instant::now() });
    }

    fn connect_finished(&mut self, result: Result<Connection>) {
        match result {
            Ok(conn) => {
                self.open += 1;
                self.retry_delay = INITIAL_RETRY_DELAY;
                self.offer(conn);
            }
            Err(err) => {
                tracing::warn!(error = %err, "connection attempt failed");
                // waiters learn promptly; the minimum recovers through
                // the backoff retries
                if let Some(waiter) = self.waiters.pop_front() {
                    let _ = waiter.send(Err(err));
                }
            }
        }
    }

    fn spawn_connect(&mut self, cx: &mut Context) {
        let mut attempt: ConnectFuture =
            Box::pin(Connection::connect_with(self.config.conn.clone()));
        match attempt.as_mut().poll(cx) {
            Poll::Ready(result) => {
                let failed = result.is_err();
                self.connect_finished(result);
                if failed && self.open + self.opening.len() < self.config.min_connections {
                    self.schedule_retry(cx);
                }
            }
            Poll::Pending => self.opening.push(attempt),
        }
    }

    /// Arm the backoff timer: `delay = min(4096 ms, connect_timeout,
    /// delay * 2)` starting at 16 ms.
    fn schedule_retry(&mut self, cx: &mut Context) {
        if self.retry.is_some() {
            return;
        }
        let delay = self
            .retry_delay
            .min(MAX_RETRY_DELAY)
            .min(self.config.conn.connect_timeout);
        self.retry_delay = (delay * 2).min(MAX_RETRY_DELAY);

        let mut timer = Box::pin(sleep(delay));
        // register immediately; a spawned timer nobody polled never fires
        if timer.as_mut().poll(cx).is_pending() {
            self.retry = Some(timer);
        }
        trace!(?delay, "retry scheduled");
    }

    /// Keep `open + opening` at the configured minimum.
    fn ensure_min(&mut self, cx: &mut Context) {
        if self.retry.is_some() {
            return;
        }
        while self.open + self.opening.len() < self.config.min_connections {
            self.spawn_connect(cx);
            if self.retry.is_some() {
                // an attempt failed synchronously, back off instead
                return;
            }
        }
    }

    /// Spawn attempts for queued waiters, up to the maximum.
    fn spawn_for_demand(&mut self, cx: &mut Context) {
        while self.opening.len() < self.waiters.len()
            && self.open + self.opening.len() < self.config.max_connections
        {
            self.spawn_connect(cx);
        }
    }

    fn reap_idle(&mut self) {
        let timeout = self.config.idle_timeout;
        let mut i = 0;
        while self.open > self.config.min_connections && i < self.idle.len() {
            if self.idle[i].since.elapsed() >= timeout {
                let idle = self.idle.remove(i);
                self.open -= 1;
                self.closing.push(idle.conn);
                trace!("idle connection past deadline, closing");
            } else {
                i += 1;
            }
        }
    }

    fn reset_reaper(&mut self, cx: &mut Context) {
        let timeout = self.config.idle_timeout;
        let next = match self.open > self.config.min_connections {
            true => self
                .idle
                .iter()
                .fold(timeout, |acc, idle| acc.min(timeout.saturating_sub(idle.since.elapsed()))),
            false => timeout,
        };
        self.reaper.as_mut().reset(Instant::now() + next);
        let _ = self.reaper.as_mut().poll(cx);
    }

    fn shutdown(&mut self, ack: Option<oneshot::Sender<()>>) -> Poll<()> {
        trace!("pool destroyed");
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(Error::pool_closed()));
        }
        self.idle.clear();
        self.draining.clear();
        self.closing.clear();
        self.opening.clear();
        self.open = 0;
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        Poll::Ready(())
    }
}

impl Future for WorkerFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        // 1. collect all requests upfront
        loop {
            match me.recv.poll_recv(cx) {
                Poll::Ready(Some(WorkerMessage::Acquire(send))) => match me.idle.pop() {
                    Some(idle) => {
                        // the requester may have cancelled already; any
                        // other waiter takes the connection
                        if let Err(Ok(conn)) = send.send(Ok(idle.conn)) {
                            me.offer(conn);
                        }
                    }
                    None => me.waiters.push_back(send),
                },
                Poll::Ready(Some(WorkerMessage::Release(mut conn))) => {
                    if conn.is_broken() {
                        me.open -= 1;
                        trace!("released connection is broken, dropping");
                        continue;
                    }
                    // drain frames owed to a failed phase before reuse
                    match conn.poll_ready(cx) {
                        Poll::Ready(Ok(())) => me.offer(conn),
                        Poll::Ready(Err(_)) => me.open -= 1,
                        Poll::Pending => me.draining.push(conn),
                    }
                }
                Poll::Ready(Some(WorkerMessage::Destroy(ack))) => return me.shutdown(Some(ack)),
                // every handle dropped: implicit destroy
                Poll::Ready(None) => return me.shutdown(None),
                Poll::Pending => break,
            }
        }

        // 2. released connections still draining
        let mut i = 0;
        while i < me.draining.len() {
            match me.draining[i].poll_ready(cx) {
                Poll::Ready(Ok(())) => {
                    let conn = me.draining.swap_remove(i);
                    me.offer(conn);
                }
                Poll::Ready(Err(_)) => {
                    me.draining.swap_remove(i);
                    me.open -= 1;
                }
                Poll::Pending => i += 1,
            }
        }

        // 3. idle deadline reaper
        if me.reaper.as_mut().poll(cx).is_ready() {
            me.reap_idle();
            me.reset_reaper(cx);
        }

        // 4. backoff window elapsed, the minimum may recover
        if let Some(retry) = me.retry.as_mut() {
            if retry.as_mut().poll(cx).is_ready() {
                me.retry = None;
            }
        }

        // 5. demand-driven attempts, then the configured minimum
        me.spawn_for_demand(cx);
        me.ensure_min(cx);

        // 6. in-flight connection attempts
        let mut i = 0;
        while i < me.opening.len() {
            match me.opening[i].as_mut().poll(cx) {
                Poll::Ready(result) => {
                    me.opening.swap_remove(i);
                    let failed = result.is_err();
                    me.connect_finished(result);
                    if failed && me.open + me.opening.len() < me.config.min_connections {
                        me.schedule_retry(cx);
                    }
                }
                Poll::Pending => i += 1,
            }
        }

        // 7. graceful shutdowns
        let mut i = 0;
        while i < me.closing.len() {
            match me.closing[i].poll_shutdown(cx) {
                Poll::Ready(_) => {
                    me.closing.swap_remove(i);
                }
                Poll::Pending => i += 1,
            }
        }

        trace!(
            open = me.open,
            opening = me.opening.len(),
            idle = me.idle.len(),
            waiters = me.waiters.len(),
            "pool cycle",
        );

        Poll::Pending
    }
}
