use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tether::{CallbackServer, Listener, OutboundClient, ServerError};
use tether_proto::app_callback_client::AppCallbackClient;
use tether_proto::app_callback_health_check_client::AppCallbackHealthCheckClient;
use tether_proto::orchestrator_server::{Orchestrator, OrchestratorServer};
use tether_proto::{
    ConnectAppCallbackRequest, ConnectAppCallbackResponse, HealthCheckRequest, InvokeRequest,
    InvokeResponse,
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};

fn endpoint_for(addr: SocketAddr) -> Endpoint {
    Endpoint::from_shared(format!("http://{addr}")).expect("endpoint")
}

async fn connect(addr: SocketAddr) -> Channel {
    let endpoint = endpoint_for(addr);
    for _ in 0..50 {
        if let Ok(channel) = endpoint.connect().await {
            return channel;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("failed to connect to {addr}");
}

async fn start_echo_server() -> (
    Arc<CallbackServer>,
    SocketAddr,
    tokio::task::JoinHandle<Result<(), ServerError>>,
) {
    let server = Arc::new(
        CallbackServer::from_address("127.0.0.1:0")
            .await
            .expect("bind server"),
    );
    server.add_invocation_handler("echo", |request: InvokeRequest| async move {
        Ok::<_, Status>(InvokeResponse {
            data: request.data,
            content_type: request.content_type,
        })
    });
    let addr = server.local_addr().expect("server addr");
    let serving = Arc::clone(&server);
    let handle = tokio::spawn(async move { serving.start().await });
    (server, addr, handle)
}

fn invoke_request(method: &str, data: &[u8]) -> InvokeRequest {
    InvokeRequest {
        method: method.to_string(),
        data: data.to_vec(),
        content_type: "text/plain".to_string(),
    }
}

#[tokio::test]
async fn echo_roundtrip_then_graceful_stop_closes_the_address() {
    let (server, addr, handle) = start_echo_server().await;

    let mut client = AppCallbackClient::new(connect(addr).await);
    let response = client
        .on_invoke(invoke_request("echo", b"hi"))
        .await
        .expect("invoke echo")
        .into_inner();
    assert_eq!(response.data, b"hi");

    server.graceful_stop().await.expect("graceful stop");
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("serve loop exit")
        .expect("join");
    result.expect("serve result");

    let err = endpoint_for(addr).connect().await;
    assert!(err.is_err(), "stopped server should refuse connections");
}

#[tokio::test]
async fn unregistered_method_yields_not_found() {
    let (server, addr, handle) = start_echo_server().await;

    let mut client = AppCallbackClient::new(connect(addr).await);
    let err = client
        .on_invoke(invoke_request("missing", b""))
        .await
        .expect_err("invoke unregistered method");
    assert_eq!(err.code(), tonic::Code::NotFound);

    server.stop().expect("stop");
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn second_start_fails_while_first_is_serving() {
    let (server, addr, handle) = start_echo_server().await;
    // Make sure the first start owns the serve loop before racing it.
    connect(addr).await;

    let err = server.start().await.expect_err("second start");
    assert!(matches!(err, ServerError::AlreadyStarted));

    server.stop().expect("stop");
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn health_check_defaults_to_healthy() {
    let (server, addr, handle) = start_echo_server().await;

    let mut client = AppCallbackHealthCheckClient::new(connect(addr).await);
    client
        .health_check(HealthCheckRequest {})
        .await
        .expect("health check");

    server.stop().expect("stop");
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn auth_token_guards_every_inbound_call() {
    let listener = Listener::bind("127.0.0.1:0".parse().expect("addr"))
        .await
        .expect("bind");
    let addr = listener.addr().expect("addr");
    let server = Arc::new(CallbackServer::with_auth_token(
        listener,
        Some("secret".to_string()),
    ));
    server.add_invocation_handler("echo", |request: InvokeRequest| async move {
        Ok::<_, Status>(InvokeResponse {
            data: request.data,
            content_type: request.content_type,
        })
    });
    let serving = Arc::clone(&server);
    let handle = tokio::spawn(async move { serving.start().await });

    let mut client = AppCallbackClient::new(connect(addr).await);

    let err = client
        .on_invoke(invoke_request("echo", b"hi"))
        .await
        .expect_err("invoke without token");
    assert_eq!(err.code(), tonic::Code::Unauthenticated);

    let mut request = Request::new(invoke_request("echo", b"hi"));
    request.metadata_mut().insert(
        tether::APP_TOKEN_METADATA_KEY,
        "secret".parse().expect("metadata value"),
    );
    let response = client
        .on_invoke(request)
        .await
        .expect("invoke with token")
        .into_inner();
    assert_eq!(response.data, b"hi");

    server.stop().expect("stop");
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

struct FakeOrchestrator {
    accepted: Arc<AtomicUsize>,
    reject: bool,
}

#[tonic::async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn connect_app_callback(
        &self,
        _request: Request<ConnectAppCallbackRequest>,
    ) -> Result<Response<ConnectAppCallbackResponse>, Status> {
        if self.reject {
            return Err(Status::permission_denied("callback channel refused"));
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(ConnectAppCallbackResponse {}))
    }
}

async fn start_orchestrator(reject: bool) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let accepted = Arc::new(AtomicUsize::new(0));
    let orchestrator = FakeOrchestrator {
        accepted: Arc::clone(&accepted),
        reject,
    };
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(OrchestratorServer::new(orchestrator))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("serve orchestrator");
    });
    (addr, accepted)
}

#[tokio::test]
async fn outbound_constructor_announces_callback_availability() {
    let (addr, accepted) = start_orchestrator(false).await;

    let client = OutboundClient::connect(&addr.to_string())
        .await
        .expect("connect orchestrator");
    let server = CallbackServer::from_outbound(client)
        .await
        .expect("outbound server");

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    // In outbound mode the listener reports the remote peer address.
    assert_eq!(server.local_addr(), Some(addr));
}

#[tokio::test]
async fn outbound_constructor_wraps_handshake_rejection() {
    let (addr, accepted) = start_orchestrator(true).await;

    let client = OutboundClient::connect(&addr.to_string())
        .await
        .expect("connect orchestrator");
    let err = CallbackServer::from_outbound(client)
        .await
        .expect_err("outbound server");
    match err {
        ServerError::HandshakeFailed(status) => {
            assert_eq!(status.code(), tonic::Code::PermissionDenied);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
}
