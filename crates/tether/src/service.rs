//! gRPC-facing dispatch for inbound callback calls.
//!
//! The [`Dispatcher`] receives decoded requests from the transport and routes
//! them to the registered application handlers. Lookup misses and token
//! mismatches become error responses on the failing call only; the serving
//! loop itself is never affected.

use tether_proto::app_callback_health_check_server::AppCallbackHealthCheck;
use tether_proto::app_callback_server::AppCallback;
use tether_proto::{
    BindingEventRequest, BindingEventResponse, HealthCheckRequest, HealthCheckResponse,
    InvokeRequest, InvokeResponse, ListInputBindingsRequest, ListInputBindingsResponse,
    ListTopicSubscriptionsRequest, ListTopicSubscriptionsResponse, TopicEventRequest,
    TopicEventResponse, TopicSubscription,
};
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use crate::handler::Registry;

/// Metadata key that must carry the shared app token on every inbound call
/// when token authentication is configured.
pub const APP_TOKEN_METADATA_KEY: &str = "app-api-token";

/// Routes decoded inbound calls to the registered application handlers.
pub(crate) struct Dispatcher {
    registry: Registry,
    auth_token: Option<String>,
}

impl Dispatcher {
    pub(crate) fn new(registry: Registry, auth_token: Option<String>) -> Self {
        Self {
            registry,
            auth_token,
        }
    }

    fn authorize(&self, metadata: &MetadataMap) -> Result<(), Status> {
        let Some(expected) = self.auth_token.as_deref() else {
            return Ok(());
        };
        let presented = metadata
            .get(APP_TOKEN_METADATA_KEY)
            .and_then(|value| value.to_str().ok());
        if presented == Some(expected) {
            Ok(())
        } else {
            Err(Status::unauthenticated("invalid or missing app api token"))
        }
    }
}

#[tonic::async_trait]
impl AppCallback for Dispatcher {
    async fn on_invoke(
        &self,
        request: Request<InvokeRequest>,
    ) -> Result<Response<InvokeResponse>, Status> {
        self.authorize(request.metadata())?;
        let request = request.into_inner();
        let handler = self
            .registry
            .invocation
            .get(&request.method)
            .cloned()
            .ok_or_else(|| {
                tracing::debug!(method = %request.method, "invocation method not registered");
                Status::not_found(format!(
                    "no invocation handler registered for method {}",
                    request.method
                ))
            })?;
        let response = handler.handle(request).await?;
        Ok(Response::new(response))
    }

    async fn list_topic_subscriptions(
        &self,
        request: Request<ListTopicSubscriptionsRequest>,
    ) -> Result<Response<ListTopicSubscriptionsResponse>, Status> {
        self.authorize(request.metadata())?;
        let mut subscriptions: Vec<TopicSubscription> = self
            .registry
            .topics
            .keys()
            .map(|topic| TopicSubscription {
                topic: topic.clone(),
                ..Default::default()
            })
            .collect();
        subscriptions.sort_by(|a, b| a.topic.cmp(&b.topic));
        Ok(Response::new(ListTopicSubscriptionsResponse {
            subscriptions,
        }))
    }

    async fn on_topic_event(
        &self,
        request: Request<TopicEventRequest>,
    ) -> Result<Response<TopicEventResponse>, Status> {
        self.authorize(request.metadata())?;
        let event = request.into_inner();
        let handler = self
            .registry
            .topics
            .get(&event.topic)
            .cloned()
            .ok_or_else(|| {
                tracing::debug!(topic = %event.topic, "topic not subscribed");
                Status::not_found(format!(
                    "no topic handler registered for topic {}",
                    event.topic
                ))
            })?;
        let response = handler.handle(event).await?;
        Ok(Response::new(response))
    }

    async fn list_input_bindings(
        &self,
        request: Request<ListInputBindingsRequest>,
    ) -> Result<Response<ListInputBindingsResponse>, Status> {
        self.authorize(request.metadata())?;
        let mut bindings: Vec<String> = self.registry.bindings.keys().cloned().collect();
        bindings.sort();
        Ok(Response::new(ListInputBindingsResponse { bindings }))
    }

    async fn on_binding_event(
        &self,
        request: Request<BindingEventRequest>,
    ) -> Result<Response<BindingEventResponse>, Status> {
        self.authorize(request.metadata())?;
        let event = request.into_inner();
        let handler = self
            .registry
            .bindings
            .get(&event.name)
            .cloned()
            .ok_or_else(|| {
                tracing::debug!(binding = %event.name, "binding not registered");
                Status::not_found(format!(
                    "no binding handler registered for binding {}",
                    event.name
                ))
            })?;
        let response = handler.handle(event).await?;
        Ok(Response::new(response))
    }
}

#[tonic::async_trait]
impl AppCallbackHealthCheck for Dispatcher {
    async fn health_check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        self.authorize(request.metadata())?;
        if let Some(handler) = &self.registry.health {
            handler.check().await?;
        }
        // No registered handler means the application is considered healthy.
        Ok(Response::new(HealthCheckResponse {}))
    }
}
