//! Application handler traits and the pre-start handler registry.
//!
//! Handlers run concurrently once serving starts, so every trait requires
//! `Send + Sync`. Async closures get blanket implementations, which keeps
//! simple handlers free of boilerplate.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tether_proto::{
    BindingEventRequest, BindingEventResponse, InvokeRequest, InvokeResponse, TopicEventRequest,
    TopicEventResponse,
};
use tonic::Status;

/// Handles service invocation calls addressed to one method name.
#[tonic::async_trait]
pub trait InvocationHandler: Send + Sync {
    async fn handle(&self, request: InvokeRequest) -> Result<InvokeResponse, Status>;
}

#[tonic::async_trait]
impl<F, Fut> InvocationHandler for F
where
    F: Fn(InvokeRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<InvokeResponse, Status>> + Send,
{
    async fn handle(&self, request: InvokeRequest) -> Result<InvokeResponse, Status> {
        self(request).await
    }
}

/// Handles pub/sub events delivered for one subscribed topic.
#[tonic::async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, event: TopicEventRequest) -> Result<TopicEventResponse, Status>;
}

#[tonic::async_trait]
impl<F, Fut> TopicHandler for F
where
    F: Fn(TopicEventRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TopicEventResponse, Status>> + Send,
{
    async fn handle(&self, event: TopicEventRequest) -> Result<TopicEventResponse, Status> {
        self(event).await
    }
}

/// Handles input binding events addressed to one binding name.
#[tonic::async_trait]
pub trait BindingHandler: Send + Sync {
    async fn handle(&self, event: BindingEventRequest) -> Result<BindingEventResponse, Status>;
}

#[tonic::async_trait]
impl<F, Fut> BindingHandler for F
where
    F: Fn(BindingEventRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<BindingEventResponse, Status>> + Send,
{
    async fn handle(&self, event: BindingEventRequest) -> Result<BindingEventResponse, Status> {
        self(event).await
    }
}

/// Reports whether the application is healthy. Returning an error marks the
/// app unhealthy and the error is surfaced to the probe verbatim.
#[tonic::async_trait]
pub trait HealthCheckHandler: Send + Sync {
    async fn check(&self) -> Result<(), Status>;
}

#[tonic::async_trait]
impl<F, Fut> HealthCheckHandler for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Status>> + Send,
{
    async fn check(&self) -> Result<(), Status> {
        self().await
    }
}

/// Handler registry populated before `start` and cloned into the dispatch
/// facade once serving begins.
///
/// Keys are case sensitive and the three namespaces are independent.
/// Re-registering an existing key overwrites the previous handler; the last
/// write wins. Registration while the server is already serving is not
/// synchronized with dispatch and is documented as a caller error rather
/// than enforced.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    pub(crate) invocation: HashMap<String, Arc<dyn InvocationHandler>>,
    pub(crate) topics: HashMap<String, Arc<dyn TopicHandler>>,
    pub(crate) bindings: HashMap<String, Arc<dyn BindingHandler>>,
    pub(crate) health: Option<Arc<dyn HealthCheckHandler>>,
}
