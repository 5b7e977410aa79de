use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced by server construction and lifecycle operations.
///
/// Dispatch-time failures (unknown method, bad token, handler errors) are
/// reported to the transport as [`tonic::Status`] responses instead and never
/// tear down the serving loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad construction input, e.g. an empty or unparseable address.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Binding the passive listening socket failed.
    #[error("failed to bind callback listener on {addr}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A previous `start` call already won the lifecycle transition.
    #[error("callback server can only be started once")]
    AlreadyStarted,

    /// Dialing the orchestrator for the inverted-connection mode failed.
    #[error("failed to connect to orchestrator at {addr}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The orchestrator rejected the connect-app-callback handshake.
    #[error("connect app callback handshake failed")]
    HandshakeFailed(#[source] tonic::Status),

    /// The serving transport failed while the server was running.
    #[error("callback transport failed")]
    Transport(#[source] tonic::transport::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
