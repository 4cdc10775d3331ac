// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Proxy Request Handler
//!
//! Orchestrates one proxy request: checks the shared secret, resolves the
//! action, opens a broker session when the action needs one, and turns the
//! outcome into a `ResponseEnvelope`. Every failure is caught here, logged,
//! and rendered into the same envelope shape as a success.
//!
//! A broker session is only opened after authentication and request
//! validation pass, and it is always closed before the response is built.

use crate::{
    channel::{BrokerClient, BrokerConnector, BrokerSession},
    config::ProxyConfig,
    errors::ProxyError,
    publisher::RabbitMQPublisher,
    queue::QueueSnapshot,
    topology::AmqpTopology,
};
use opentelemetry::Context;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info};

/// Sentinel reported when the body carries no usable `message_id`.
pub const UNKNOWN_MESSAGE_ID: &str = "unknown";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Actions accepted on POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TestConnection,
    PublishMessage,
}

impl FromStr for Action {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test_connection" => Ok(Action::TestConnection),
            "publish_message" => Ok(Action::PublishMessage),
            _ => Err(ProxyError::InvalidActionError),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::TestConnection => write!(f, "test_connection"),
            Action::PublishMessage => write!(f, "publish_message"),
        }
    }
}

/// The decoded POST form. Every field is optional at this stage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyRequest {
    pub secret_key: Option<String>,
    pub action: Option<String>,
    pub exchange: Option<String>,
    pub routing_key: Option<String>,
    pub message: Option<String>,
}

/// A publish request whose three fields are known to be present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub exchange: String,
    pub routing_key: String,
    pub body: String,
}

impl TryFrom<&ProxyRequest> for PublishRequest {
    type Error = ProxyError;

    fn try_from(req: &ProxyRequest) -> Result<Self, Self::Error> {
        let field = |value: &Option<String>| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .ok_or(ProxyError::ValidationError)
        };

        Ok(PublishRequest {
            exchange: field(&req.exchange)?,
            routing_key: field(&req.routing_key)?,
            body: field(&req.message)?,
        })
    }
}

/// The single response shape for every outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub timestamp: String,
}

impl ResponseEnvelope {
    fn new(success: bool) -> ResponseEnvelope {
        ResponseEnvelope {
            success,
            message: None,
            error: None,
            message_id: None,
            queue_count: None,
            service: None,
            version: None,
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn success(message: &str) -> ResponseEnvelope {
        ResponseEnvelope {
            message: Some(message.to_owned()),
            ..ResponseEnvelope::new(true)
        }
    }

    pub fn failure(err: &ProxyError) -> ResponseEnvelope {
        ResponseEnvelope {
            error: Some(err.to_string()),
            ..ResponseEnvelope::new(false)
        }
    }

    fn published(message_id: String, snapshot: &QueueSnapshot) -> ResponseEnvelope {
        ResponseEnvelope {
            message_id: Some(message_id),
            queue_count: Some(snapshot.message_count),
            ..ResponseEnvelope::success("Message published successfully via HTTP proxy")
        }
    }
}

/// Pulls a top-level `message_id` out of a JSON body.
///
/// Anything that is not a JSON object with that key yields `"unknown"`;
/// non-string ids are rendered as their JSON text.
pub fn extract_message_id(body: &str) -> String {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body)
    else {
        return UNKNOWN_MESSAGE_ID.to_owned();
    };

    match map.get("message_id") {
        Some(serde_json::Value::String(id)) => id.clone(),
        None | Some(serde_json::Value::Null) => UNKNOWN_MESSAGE_ID.to_owned(),
        Some(other) => other.to_string(),
    }
}

/// Compares the shared secret in constant time for equal-length inputs.
fn secret_matches(expected: &str, given: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(given.as_bytes()))
}

/// Stateless orchestrator shared by all requests.
#[derive(Clone)]
pub struct ProxyHandler {
    config: Arc<ProxyConfig>,
    connector: Arc<dyn BrokerConnector>,
}

impl ProxyHandler {
    pub fn new(config: Arc<ProxyConfig>, connector: Arc<dyn BrokerConnector>) -> ProxyHandler {
        ProxyHandler { config, connector }
    }

    /// Liveness report for GET. Never touches the broker.
    pub fn status(&self) -> ResponseEnvelope {
        ResponseEnvelope {
            service: Some(env!("CARGO_PKG_NAME").to_owned()),
            version: Some(env!("CARGO_PKG_VERSION").to_owned()),
            ..ResponseEnvelope::success("RabbitMQ HTTP Proxy is running")
        }
    }

    /// Runs a POST request to completion. Always yields an envelope.
    pub async fn handle(&self, req: &ProxyRequest, ctx: &Context) -> ResponseEnvelope {
        match self.dispatch(req, ctx).await {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(kind = err.kind(), error = err.to_string(), "request failed");
                ResponseEnvelope::failure(&err)
            }
        }
    }

    async fn dispatch(
        &self,
        req: &ProxyRequest,
        ctx: &Context,
    ) -> Result<ResponseEnvelope, ProxyError> {
        self.authenticate(req)?;

        let action: Action = req.action.as_deref().unwrap_or_default().parse()?;
        info!(%action, "action dispatched");

        match action {
            Action::TestConnection => self.test_connection().await,
            Action::PublishMessage => self.publish_message(req, ctx).await,
        }
    }

    fn authenticate(&self, req: &ProxyRequest) -> Result<(), ProxyError> {
        match req.secret_key.as_deref() {
            Some(key) if secret_matches(&self.config.auth.secret_key, key) => Ok(()),
            _ => Err(ProxyError::AuthError),
        }
    }

    async fn test_connection(&self) -> Result<ResponseEnvelope, ProxyError> {
        debug!("testing RabbitMQ connection...");
        BrokerClient::with_session(self.connector.as_ref(), &self.config.broker, |_session| {
            async { Ok(()) }
        })
        .await?;
        info!("RabbitMQ connection successful");

        Ok(ResponseEnvelope::success(
            "RabbitMQ connection test successful via HTTP proxy",
        ))
    }

    async fn publish_message(
        &self,
        req: &ProxyRequest,
        ctx: &Context,
    ) -> Result<ResponseEnvelope, ProxyError> {
        let publish = PublishRequest::try_from(req)?;
        debug!(
            exchange = publish.exchange,
            routing_key = publish.routing_key,
            "publishing message to RabbitMQ..."
        );

        let request = &publish;
        let snapshot =
            BrokerClient::with_session(self.connector.as_ref(), &self.config.broker, |session| {
                async move { self.declare_and_publish(session.as_ref(), request, ctx).await }
            })
            .await?;

        let message_id = extract_message_id(&publish.body);
        info!(
            message_id,
            queue_count = snapshot.message_count,
            "message published successfully"
        );

        Ok(ResponseEnvelope::published(message_id, &snapshot))
    }

    async fn declare_and_publish(
        &self,
        session: &dyn BrokerSession,
        publish: &PublishRequest,
        ctx: &Context,
    ) -> Result<QueueSnapshot, ProxyError> {
        let queue = self.config.broker.queue.as_str();

        AmqpTopology::proxy(session, &publish.exchange, &publish.routing_key, queue)
            .install()
            .await?;

        RabbitMQPublisher::new(session, queue)
            .publish(&publish.exchange, &publish.routing_key, &publish.body, ctx)
            .await
    }
}
