//! Inbound app callback server.
//!
//! Exposes an application's business logic (service invocation handlers,
//! pub/sub topic handlers, input binding handlers and health checks) to a
//! remote orchestrator over gRPC. A server binds exactly once to either a
//! passive listening socket or a single connection the process dialed out
//! itself; both origins share the same serving path.
//!
//! ```no_run
//! use tether::CallbackServer;
//! use tether_proto::{InvokeRequest, InvokeResponse};
//!
//! # async fn run() -> Result<(), tether::ServerError> {
//! let server = CallbackServer::from_address("127.0.0.1:50052").await?;
//! server.add_invocation_handler("echo", |request: InvokeRequest| async move {
//!     Ok::<_, tonic::Status>(InvokeResponse {
//!         data: request.data,
//!         content_type: request.content_type,
//!     })
//! });
//! // Blocks until stop() or graceful_stop() is called from another task.
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod handler;
pub mod listener;
pub mod server;
mod service;
mod shutdown;

pub use client::OutboundClient;
pub use error::ServerError;
pub use handler::{BindingHandler, HealthCheckHandler, InvocationHandler, TopicHandler};
pub use listener::Listener;
pub use server::{APP_TOKEN_ENV_VAR, CallbackServer};
pub use service::APP_TOKEN_METADATA_KEY;
