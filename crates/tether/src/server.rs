//! Callback server lifecycle: construction, start-once serving and teardown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tether_proto::app_callback_health_check_server::AppCallbackHealthCheckServer;
use tether_proto::app_callback_server::AppCallbackServer;
use tonic::transport::Server as TransportServer;

use crate::client::OutboundClient;
use crate::error::ServerError;
use crate::handler::{
    BindingHandler, HealthCheckHandler, InvocationHandler, Registry, TopicHandler,
};
use crate::listener::Listener;
use crate::service::Dispatcher;
use crate::shutdown::Signal;

/// Environment variable supplying the shared app token. When set and
/// non-empty at construction time, every inbound call must present the token
/// in its metadata.
pub const APP_TOKEN_ENV_VAR: &str = "APP_API_TOKEN";

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Serves an application's callback handlers to a remote orchestrator.
///
/// A server is created once per endpoint, populated with handlers, started at
/// most once and stopped at most once; stop calls are always safe to repeat.
/// `start` blocks its caller for the lifetime of the serve loop, so hosts
/// that need to keep going spawn it on a separate task and drive shutdown
/// through [`stop`](Self::stop) or [`graceful_stop`](Self::graceful_stop).
pub struct CallbackServer {
    listener: Mutex<Option<Listener>>,
    registry: Mutex<Registry>,
    auth_token: Option<String>,
    transport: Mutex<Option<TransportServer>>,
    state: AtomicU8,
    graceful: Signal,
    forced: Signal,
    finished: Signal,
}

impl std::fmt::Debug for CallbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackServer").finish_non_exhaustive()
    }
}

impl CallbackServer {
    /// Binds a passive listening socket on `addr` and wraps it in a callback
    /// server.
    pub async fn from_address(addr: &str) -> Result<Self, ServerError> {
        if addr.is_empty() {
            return Err(ServerError::InvalidArgument(
                "empty listen address".to_string(),
            ));
        }
        let addr: SocketAddr = addr.parse().map_err(|_| {
            ServerError::InvalidArgument(format!("unparseable listen address {addr}"))
        })?;
        let listener = Listener::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailed { addr, source })?;
        Ok(Self::from_listener(listener))
    }

    /// Announces callback availability over an outbound orchestrator
    /// connection, then treats that connection as the inbound channel. The
    /// client is consumed and must not be used for further calls.
    pub async fn from_outbound(client: OutboundClient) -> Result<Self, ServerError> {
        let conn = client.connect_app_callback().await?;
        let listener = Listener::from_connection(conn)?;
        Ok(Self::from_listener(listener))
    }

    /// Wraps a pre-built listener; the auth token is read from
    /// [`APP_TOKEN_ENV_VAR`].
    pub fn from_listener(listener: Listener) -> Self {
        let auth_token = std::env::var(APP_TOKEN_ENV_VAR)
            .ok()
            .filter(|token| !token.is_empty());
        Self::with_auth_token(listener, auth_token)
    }

    /// Like [`from_listener`](Self::from_listener) but with an explicit token
    /// instead of the environment lookup. `None` disables authentication.
    pub fn with_auth_token(listener: Listener, auth_token: Option<String>) -> Self {
        Self {
            listener: Mutex::new(Some(listener)),
            registry: Mutex::new(Registry::default()),
            auth_token,
            transport: Mutex::new(Some(TransportServer::builder())),
            state: AtomicU8::new(NOT_STARTED),
            graceful: Signal::default(),
            forced: Signal::default(),
            finished: Signal::default(),
        }
    }

    /// Registers a service invocation handler for `method`. Registering the
    /// same method again replaces the previous handler.
    pub fn add_invocation_handler(
        &self,
        method: impl Into<String>,
        handler: impl InvocationHandler + 'static,
    ) {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .invocation
            .insert(method.into(), Arc::new(handler));
    }

    /// Registers a pub/sub handler for `topic`. Last registration wins.
    pub fn add_topic_handler(&self, topic: impl Into<String>, handler: impl TopicHandler + 'static) {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .topics
            .insert(topic.into(), Arc::new(handler));
    }

    /// Registers an input binding handler for `name`. Last registration wins.
    pub fn add_binding_handler(
        &self,
        name: impl Into<String>,
        handler: impl BindingHandler + 'static,
    ) {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .bindings
            .insert(name.into(), Arc::new(handler));
    }

    /// Registers the health check handler. Without one, health probes report
    /// healthy.
    pub fn set_health_check_handler(&self, handler: impl HealthCheckHandler + 'static) {
        self.registry.lock().expect("registry lock poisoned").health = Some(Arc::new(handler));
    }

    /// Actors need a runtime integration this transport does not provide;
    /// calling this is a fatal misuse of the callback server, not a
    /// recoverable error.
    pub fn register_actor_factory(&self, actor_type: &str) -> ! {
        panic!("actor type {actor_type}: actors are not supported by the callback server");
    }

    /// Address the server accepts connections on: the bound local address, or
    /// the remote peer address in outbound-connection mode. `None` once the
    /// listener has been handed to the serve loop.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .expect("listener lock poisoned")
            .as_ref()
            .and_then(|listener| listener.addr().ok())
    }

    /// Applies `configure` to the underlying tonic transport builder, e.g. to
    /// tune HTTP/2 settings or attach interceptors before `start`. Returns
    /// false once the builder has been consumed by `start` or released by a
    /// stop call.
    pub fn configure_transport<F>(&self, configure: F) -> bool
    where
        F: FnOnce(TransportServer) -> TransportServer,
    {
        let mut slot = self.transport.lock().expect("transport lock poisoned");
        match slot.take() {
            Some(transport) => {
                *slot = Some(configure(transport));
                true
            }
            None => false,
        }
    }

    /// Serves inbound callback calls until the server is stopped or the
    /// listener fails, blocking the calling task for the whole time. Only one
    /// caller ever gets to serve; every later call fails with
    /// [`ServerError::AlreadyStarted`] and has no side effects.
    pub async fn start(&self) -> Result<(), ServerError> {
        if self
            .state
            .compare_exchange(NOT_STARTED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = self
            .listener
            .lock()
            .expect("listener lock poisoned")
            .take()
            .expect("listener present until first start");
        let mut transport = self
            .transport
            .lock()
            .expect("transport lock poisoned")
            .take()
            .expect("transport present until first start");
        let dispatcher = Arc::new(Dispatcher::new(
            self.registry.lock().expect("registry lock poisoned").clone(),
            self.auth_token.clone(),
        ));

        match listener.addr() {
            Ok(addr) => tracing::info!(%addr, "callback server serving"),
            Err(_) => tracing::info!("callback server serving"),
        }

        let serve = transport
            .add_service(AppCallbackServer::from_arc(Arc::clone(&dispatcher)))
            .add_service(AppCallbackHealthCheckServer::from_arc(dispatcher))
            .serve_with_incoming_shutdown(listener.into_incoming(), self.graceful.wait());

        let result = tokio::select! {
            result = serve => result.map_err(ServerError::Transport),
            _ = self.forced.wait() => {
                tracing::info!("callback server stopped, in-flight calls aborted");
                Ok(())
            }
        };

        self.state.store(STOPPED, Ordering::SeqCst);
        self.finished.set();
        tracing::info!("callback serve loop exited");
        result
    }

    /// Forcibly stops the server: aborts in-flight calls and closes the
    /// listener. No-op returning success unless the server is currently
    /// running; always safe to call repeatedly.
    pub fn stop(&self) -> Result<(), ServerError> {
        if self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        tracing::info!("stopping callback server");
        self.release_transport();
        self.forced.set();
        Ok(())
    }

    /// Stops accepting new connections and waits for in-flight calls to
    /// complete before returning. Same no-op behavior as
    /// [`stop`](Self::stop) when the server is not running.
    pub async fn graceful_stop(&self) -> Result<(), ServerError> {
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return Ok(());
        }
        tracing::info!("draining callback server");
        self.release_transport();
        self.graceful.set();
        self.finished.wait().await;
        Ok(())
    }

    fn release_transport(&self) {
        self.transport
            .lock()
            .expect("transport lock poisoned")
            .take();
    }
}
