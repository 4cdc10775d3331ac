// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Proxy
//!
//! Two layers of errors live here. `AmqpError` describes a failure of a single
//! broker primitive (connect, declare, bind, publish, close) and keeps the
//! broker's own reason text. `ProxyError` is the request-level taxonomy the
//! handler reports back to the HTTP caller; the broker-facing kinds wrap the
//! `AmqpError` that caused them.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Each variant names the primitive that failed and carries the reason
/// reported by the broker client library.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare exchange `{0}`: {1}")]
    DeclareExchangeError(String, String),

    /// Error declaring a queue with the given name
    #[error("failure to declare queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{queue}` to exchange `{exchange}` with key `{routing_key}`: {reason}")]
    BindingExchangeToQueueError {
        exchange: String,
        queue: String,
        routing_key: String,
        reason: String,
    },

    /// Error publishing a message
    #[error("failure to publish to exchange `{0}`: {1}")]
    PublishingError(String, String),

    /// Error closing the channel or the connection
    #[error("failure to close: {0}")]
    CloseError(String),
}

/// Request-level failures reported by the proxy.
///
/// Every variant ends the request and is rendered into the failure envelope.
/// Callers tell them apart by the error text only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// The shared secret was missing or did not match
    #[error("Invalid secret key")]
    AuthError,

    /// The requested action is not one the proxy knows
    #[error("Invalid action. Supported: test_connection, publish_message")]
    InvalidActionError,

    /// A publish request is missing one of its required fields
    #[error("Missing required parameters: exchange, routing_key, message")]
    ValidationError,

    /// The HTTP method is neither GET nor POST
    #[error("Only GET and POST requests allowed")]
    MethodNotAllowed,

    /// The broker could not be reached or refused the session
    #[error("{0}")]
    ConnectionError(#[source] AmqpError),

    /// Declaring the exchange, queue or binding failed
    #[error("{0}")]
    TopologyError(#[source] AmqpError),

    /// Publishing or reading back the queue depth failed
    #[error("{0}")]
    PublishError(#[source] AmqpError),
}

impl ProxyError {
    /// Short name of the failure class, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::AuthError => "auth",
            ProxyError::InvalidActionError => "invalid_action",
            ProxyError::ValidationError => "validation",
            ProxyError::MethodNotAllowed => "method_not_allowed",
            ProxyError::ConnectionError(_) => "connection",
            ProxyError::TopologyError(_) => "topology",
            ProxyError::PublishError(_) => "publish",
        }
    }
}
