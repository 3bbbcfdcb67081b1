//! Socket layer: TCP, optional TLS upgrade, buffered framing.
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::TcpStream,
};

mod buffered;
#[cfg(feature = "tls")]
mod tls;

pub(crate) use buffered::BufferedSocket;

use crate::{
    common::general,
    connection::SslMode,
    error::{Error, Result},
    postgres::frontend,
};

/// One server connection, plain or TLS-upgraded.
#[derive(Debug)]
pub(crate) enum Socket {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Socket {
    /// TCP connect, then negotiate TLS per `ssl`.
    ///
    /// When TLS is attempted the `SSLRequest` frame is written first; the
    /// server answers a single byte, `'S'` to proceed with the handshake
    /// on the same socket. Anything else fails when TLS is required.
    pub async fn connect(host: &str, port: u16, ssl: SslMode) -> Result<Socket> {
        let mut tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;

        if !ssl.should_try() {
            return Ok(Socket::Tcp(tcp));
        }

        tcp.write_all(&frontend::ssl_request()).await?;
        let mut answer = [0u8; 1];
        tcp.read_exact(&mut answer).await?;

        match answer[0] {
            b'S' => {
                #[cfg(feature = "tls")]
                {
                    let stream = tls::upgrade(tcp, host, ssl).await?;
                    Ok(Socket::Tls(Box::new(stream)))
                }
                #[cfg(not(feature = "tls"))]
                {
                    Err(Error::tls(general!(
                        "server accepted TLS but postgate was built without the `tls` feature"
                    )))
                }
            }
            _ if ssl.is_required() => {
                Err(Error::tls(general!("server refused the TLS upgrade")))
            }
            _ => Ok(Socket::Tcp(tcp)),
        }
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Write a prebuilt `CancelRequest` frame over a fresh plain connection.
///
/// The cancel is advisory and out of band: open, write, close.
pub(crate) async fn send_cancel(host: &str, port: u16, frame: bytes::Bytes) -> io::Result<()> {
    let mut tcp = TcpStream::connect((host, port)).await?;
    tcp.write_all(&frame).await?;
    tcp.shutdown().await
}
