//! Buffered read and write socket.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::Socket;
use crate::postgres;

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Buffered read and write socket.
///
/// Writers assemble complete frames into the write buffer; the read side
/// keeps partial frames as leftover until enough bytes arrive.
#[derive(Debug)]
pub(crate) struct BufferedSocket {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl BufferedSocket {
    pub fn new(socket: Socket) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
        }
    }

    /// Mutable reference to the write buffer, for message encoders.
    pub fn write_buf_mut(&mut self) -> &mut BytesMut {
        &mut self.write_buf
    }

    pub fn write_is_empty(&self) -> bool {
        self.write_buf.is_empty()
    }

    /// Write the buffered messages to the underlying io.
    pub fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        while !self.write_buf.is_empty() {
            let n = ready!(Pin::new(&mut self.socket).poll_write(cx, &self.write_buf))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.write_buf.advance(n);
        }
        Pin::new(&mut self.socket).poll_flush(cx)
    }

    /// Read once into the buffer; zero means the peer closed the socket.
    pub fn poll_fill(&mut self, cx: &mut Context) -> Poll<io::Result<usize>> {
        if self.read_buf.capacity() == self.read_buf.len() {
            self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
        }

        // read into the spare capacity, then commit the filled length
        let spare = self.read_buf.chunk_mut();
        let mut uninit = unsafe { ReadBuf::uninit(spare.as_uninit_slice_mut()) };
        ready!(Pin::new(&mut self.socket).poll_read(cx, &mut uninit))?;
        let n = uninit.filled().len();
        unsafe { self.read_buf.advance_mut(n) };

        Poll::Ready(Ok(n))
    }

    /// Split the next complete `(type, payload)` frame off the buffer,
    /// reading as needed.
    pub fn poll_frame(&mut self, cx: &mut Context) -> Poll<crate::Result<(u8, Bytes)>> {
        loop {
            if let Some(frame) = postgres::next_frame(&mut self.read_buf)? {
                return Poll::Ready(Ok(frame));
            }
            if ready!(self.poll_fill(cx))? == 0 {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()));
            }
        }
    }

    /// Future form of [`poll_frame`][Self::poll_frame], for the startup
    /// phase.
    pub async fn frame(&mut self) -> crate::Result<(u8, Bytes)> {
        std::future::poll_fn(|cx| self.poll_frame(cx)).await
    }

    /// Future form of [`poll_flush`][Self::poll_flush].
    pub async fn flush(&mut self) -> io::Result<()> {
        std::future::poll_fn(|cx| self.poll_flush(cx)).await
    }

    /// Shut down the underlying socket.
    pub fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.socket).poll_shutdown(cx)
    }
}
