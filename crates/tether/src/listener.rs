//! Transport listeners for the callback server.
//!
//! The serving loop accepts connections from a [`Listener`], which is either
//! a passive TCP socket or a single connection the process dialed out itself.
//! In the dialed-out case the listener yields that connection exactly once
//! and reports itself exhausted afterwards, so both origins share the same
//! serving code path and the transport never sees the difference.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::Stream;

/// Source of inbound callback connections.
pub enum Listener {
    /// Passive socket bound to a local address; accepts until closed.
    Bound(TcpListener),
    /// Single pre-established connection; accepts exactly once.
    Connected(ConnectedListener),
}

/// Single-use listener wrapped around an already established connection.
pub struct ConnectedListener {
    conn: Mutex<Option<TcpStream>>,
    remote: SocketAddr,
}

impl Listener {
    /// Binds a passive listening socket on `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self::Bound(TcpListener::bind(addr).await?))
    }

    /// Wraps one established connection as a single-use listener.
    pub fn from_connection(conn: TcpStream) -> io::Result<Self> {
        let remote = conn.peer_addr()?;
        Ok(Self::Connected(ConnectedListener {
            conn: Mutex::new(Some(conn)),
            remote,
        }))
    }

    /// Accepts the next inbound connection. For a wrapped connection the
    /// first call yields it and every later call fails with
    /// [`io::ErrorKind::BrokenPipe`].
    pub async fn accept(&self) -> io::Result<TcpStream> {
        match self {
            Self::Bound(listener) => {
                let (conn, _) = listener.accept().await?;
                Ok(conn)
            }
            Self::Connected(single) => single.take().ok_or_else(exhausted),
        }
    }

    /// The local address of a bound listener, or the remote peer address of a
    /// wrapped connection (there is no local bind in that mode).
    pub fn addr(&self) -> io::Result<SocketAddr> {
        match self {
            Self::Bound(listener) => listener.local_addr(),
            Self::Connected(single) => Ok(single.remote),
        }
    }

    /// Closes the listener. For a wrapped connection this shuts the
    /// underlying socket down.
    pub async fn close(self) -> io::Result<()> {
        match self {
            Self::Bound(listener) => {
                drop(listener);
                Ok(())
            }
            Self::Connected(single) => {
                if let Some(mut conn) = single.take() {
                    conn.shutdown().await?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn into_incoming(self) -> Incoming {
        Incoming { listener: self }
    }
}

impl ConnectedListener {
    fn take(&self) -> Option<TcpStream> {
        self.conn
            .lock()
            .expect("connected listener lock poisoned")
            .take()
    }
}

fn exhausted() -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        "single-use listener already yielded its connection",
    )
}

/// Connection stream handed to the tonic transport. Ends after the single
/// connection for the wrapped variant, which makes the transport drain and
/// shut down once that connection closes.
pub(crate) struct Incoming {
    listener: Listener,
}

impl Stream for Incoming {
    type Item = io::Result<TcpStream>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &self.get_mut().listener {
            Listener::Bound(listener) => match listener.poll_accept(cx) {
                Poll::Ready(Ok((conn, _))) => Poll::Ready(Some(Ok(conn))),
                Poll::Ready(Err(err)) => Poll::Ready(Some(Err(err))),
                Poll::Pending => Poll::Pending,
            },
            Listener::Connected(single) => Poll::Ready(single.take().map(Ok)),
        }
    }
}
