//! Outbound orchestrator client used to negotiate the inverted-connection
//! handshake.

use tether_proto::ConnectAppCallbackRequest;
use tether_proto::orchestrator_client::OrchestratorClient;
use tokio::net::TcpStream;
use tonic::transport::{Channel, Endpoint};

use crate::error::ServerError;

/// Client for a remote orchestrator, paired with a raw connection reserved as
/// the callback channel. Once the handshake succeeds the reserved connection
/// is handed to the server and the stub must not be reused.
pub struct OutboundClient {
    stub: OrchestratorClient<Channel>,
    conn: TcpStream,
}

impl OutboundClient {
    /// Dials the orchestrator at `addr` (host:port): one gRPC channel for the
    /// handshake and one raw connection the orchestrator will address
    /// callbacks to.
    pub async fn connect(addr: &str) -> Result<Self, ServerError> {
        if addr.is_empty() {
            return Err(ServerError::InvalidArgument(
                "empty orchestrator address".to_string(),
            ));
        }
        let endpoint = Endpoint::from_shared(format!("http://{addr}")).map_err(|err| {
            ServerError::InvalidArgument(format!("orchestrator address {addr}: {err}"))
        })?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|source| ServerError::ConnectFailed {
                addr: addr.to_string(),
                source: Box::new(source),
            })?;
        let conn = TcpStream::connect(addr)
            .await
            .map_err(|source| ServerError::ConnectFailed {
                addr: addr.to_string(),
                source: Box::new(source),
            })?;
        Ok(Self::from_parts(OrchestratorClient::new(channel), conn))
    }

    /// Builds a client from an existing stub and reserved connection, for
    /// composition and tests.
    pub fn from_parts(stub: OrchestratorClient<Channel>, conn: TcpStream) -> Self {
        Self { stub, conn }
    }

    /// Announces callback availability to the orchestrator and yields the
    /// reserved connection on success.
    pub(crate) async fn connect_app_callback(mut self) -> Result<TcpStream, ServerError> {
        self.stub
            .connect_app_callback(ConnectAppCallbackRequest::default())
            .await
            .map_err(ServerError::HandshakeFailed)?;
        tracing::debug!("app callback handshake accepted");
        Ok(self.conn)
    }
}
