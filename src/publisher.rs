// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! Builds the outgoing message envelope, publishes it through the request's
//! broker session and reads back the depth of the proxy queue.
//!
//! Publishing is fire-and-forget: no publisher confirm is awaited, so a
//! successful publish means the channel accepted the message, not that the
//! broker stored it. The depth read-back happens after the publish, and a
//! failure there fails the whole call even though the message is already out.

use crate::{
    channel::BrokerSession,
    errors::ProxyError,
    otel,
    queue::{QueueDefinition, QueueSnapshot},
};
use lapin::{
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties,
};
use opentelemetry::Context;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode for messages that survive a broker restart
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// The message handed to the broker. Built fresh for every publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub(crate) payload: String,
    pub(crate) content_type: &'static str,
    pub(crate) delivery_mode: u8,
    /// Seconds since the Unix epoch at build time.
    pub(crate) timestamp: u64,
    pub(crate) headers: BTreeMap<String, String>,
}

impl MessageEnvelope {
    /// Creates a persistent JSON envelope stamped with the current time and
    /// carrying the trace context of `ctx`.
    pub fn new(payload: &str, ctx: &Context) -> MessageEnvelope {
        let mut headers = BTreeMap::new();
        otel::inject_context(ctx, &mut headers);

        MessageEnvelope {
            payload: payload.to_owned(),
            content_type: JSON_CONTENT_TYPE,
            delivery_mode: DELIVERY_MODE_PERSISTENT,
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            headers,
        }
    }

    pub(crate) fn properties(&self) -> BasicProperties {
        let headers = self
            .headers
            .iter()
            .map(|(key, value)| {
                (
                    ShortString::from(key.clone()),
                    AMQPValue::LongString(LongString::from(value.clone())),
                )
            })
            .collect::<BTreeMap<_, _>>();

        BasicProperties::default()
            .with_content_type(ShortString::from(self.content_type))
            .with_delivery_mode(self.delivery_mode)
            .with_timestamp(self.timestamp)
            .with_headers(FieldTable::from(headers))
    }
}

/// Publishes through one broker session onto the proxy queue's exchange.
pub struct RabbitMQPublisher<'p> {
    session: &'p dyn BrokerSession,
    queue: &'p str,
}

impl<'p> RabbitMQPublisher<'p> {
    /// # Parameters
    /// * `session` - The request's open broker session
    /// * `queue` - The well-known queue whose depth is reported after publishing
    pub fn new(session: &'p dyn BrokerSession, queue: &'p str) -> RabbitMQPublisher<'p> {
        RabbitMQPublisher { session, queue }
    }

    /// Publishes `body` to `exchange` with `routing_key`, then passively
    /// declares the proxy queue to read its message count.
    ///
    /// # Returns
    /// The queue snapshot taken after the publish, or `ProxyError::PublishError`
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &str,
        ctx: &Context,
    ) -> Result<QueueSnapshot, ProxyError> {
        let envelope = MessageEnvelope::new(body, ctx);

        if let Err(err) = self.session.publish(exchange, routing_key, &envelope).await {
            error!(error = err.to_string(), exchange, routing_key, "error publishing message");
            return Err(ProxyError::PublishError(err));
        }
        debug!(exchange, routing_key, "message published");

        match self
            .session
            .declare_queue(&QueueDefinition::new(self.queue).passive())
            .await
        {
            Ok(snapshot) => {
                debug!(queue = self.queue, count = snapshot.message_count, "queue depth read");
                Ok(snapshot)
            }
            Err(err) => {
                error!(
                    error = err.to_string(),
                    queue = self.queue,
                    "message published but queue depth read-back failed"
                );
                Err(ProxyError::PublishError(err))
            }
        }
    }
}
