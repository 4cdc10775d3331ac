// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Session Management
//!
//! This module owns the connection and channel used by a single proxy request.
//! `BrokerConnector` opens a `BrokerSession`; `BrokerClient` wraps the open
//! session so that it is closed exactly once and close failures never reach
//! the caller. The lapin-backed implementations are `AmqpConnector` and
//! `AmqpSession`.

use crate::{
    config::BrokerConfig,
    errors::{AmqpError, ProxyError},
    exchange::ExchangeDefinition,
    publisher::MessageEnvelope,
    queue::{QueueBinding, QueueDefinition, QueueSnapshot},
};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, QueueBindOptions},
    types::{FieldTable, LongString},
    uri::{AMQPAuthority, AMQPUri, AMQPUserInfo},
    Channel, Connection, ConnectionProperties,
};
#[cfg(test)]
use mockall::automock;
use std::{future::Future, sync::Arc};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

/// Opens broker sessions.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connects with the full credential/vhost tuple and opens one channel.
    async fn open(&self, cfg: &BrokerConfig) -> Result<Box<dyn BrokerSession>, AmqpError>;
}

/// The broker primitives used by the proxy, bound to one channel.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Declares a direct exchange. Redeclaring with the same flags is a no-op.
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares (or passively inspects) a queue and reports its depth.
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<QueueSnapshot, AmqpError>;

    /// Binds a queue to an exchange on one routing key.
    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    /// Hands a message to the channel without waiting for a broker confirm.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), AmqpError>;

    /// Closes the channel and then the connection.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// A session scoped to one request.
///
/// `close` consumes the client, so a session cannot be used after release. A
/// client dropped without `close` (for example when the request future is
/// cancelled) releases its session on a background task.
pub struct BrokerClient {
    session: Arc<dyn BrokerSession>,
    released: bool,
}

impl BrokerClient {
    /// Opens a session, classifying every failure as a connection error.
    pub async fn open(
        connector: &dyn BrokerConnector,
        cfg: &BrokerConfig,
    ) -> Result<BrokerClient, ProxyError> {
        match connector.open(cfg).await {
            Ok(session) => Ok(BrokerClient {
                session: Arc::from(session),
                released: false,
            }),
            Err(err) => {
                error!(error = err.to_string(), host = cfg.host, "failure to open broker session");
                Err(ProxyError::ConnectionError(err))
            }
        }
    }

    /// Opens a session, runs `work` on it and closes it before returning the
    /// work's result.
    ///
    /// # Parameters
    /// * `connector` - Opens the session
    /// * `cfg` - Broker address, credentials and vhost
    /// * `work` - Receives a handle to the open session
    ///
    /// # Returns
    /// `ProxyError::ConnectionError` when the session cannot be opened,
    /// otherwise whatever `work` returned
    pub async fn with_session<T, F, Fut>(
        connector: &dyn BrokerConnector,
        cfg: &BrokerConfig,
        work: F,
    ) -> Result<T, ProxyError>
    where
        F: FnOnce(Arc<dyn BrokerSession>) -> Fut,
        Fut: Future<Output = Result<T, ProxyError>>,
    {
        let client = BrokerClient::open(connector, cfg).await?;
        let result = work(client.session()).await;
        client.close().await;

        result
    }

    /// A handle to the open session.
    pub fn session(&self) -> Arc<dyn BrokerSession> {
        self.session.clone()
    }

    /// Best-effort release. Failures are logged and swallowed.
    pub async fn close(mut self) {
        release(self.session.as_ref()).await;
        self.released = true;
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        match Handle::try_current() {
            Ok(runtime) => {
                warn!("broker session dropped before close, releasing in background");
                let session = self.session.clone();
                runtime.spawn(async move { release(session.as_ref()).await });
            }
            Err(_) => warn!("broker session dropped outside a runtime, leaving it to the broker"),
        }
    }
}

async fn release(session: &dyn BrokerSession) {
    if let Err(err) = session.close().await {
        warn!(error = err.to_string(), "failure to close broker session");
    } else {
        debug!("broker session closed");
    }
}

/// lapin implementation of `BrokerConnector`.
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> AmqpConnector {
        AmqpConnector
    }
}

/// Builds the AMQP URI from structured parts so credentials and vhost need no
/// percent-encoding.
pub(crate) fn amqp_uri(cfg: &BrokerConfig) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: cfg.username.clone(),
                password: cfg.password.clone(),
            },
            host: cfg.host.clone(),
            port: cfg.port,
        },
        vhost: cfg.vhost.clone(),
        ..AMQPUri::default()
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn open(&self, cfg: &BrokerConfig) -> Result<Box<dyn BrokerSession>, AmqpError> {
        debug!(host = cfg.host, port = cfg.port, vhost = cfg.vhost, "creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.connection_name.clone()));

        let connection = Connection::connect_uri(amqp_uri(cfg), options)
            .await
            .map_err(|err| AmqpError::ConnectionError(err.to_string()))?;
        debug!("amqp connected");

        debug!("creating amqp channel...");
        match connection.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(Box::new(AmqpSession {
                    connection,
                    channel,
                }))
            }
            Err(err) => {
                // the connection is already up, release it before reporting
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "channel failure").await {
                    warn!(error = close_err.to_string(), "failure to close connection");
                }
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }
}

/// A lapin connection with the single channel opened on it.
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(
                &def.name,
                lapin::ExchangeKind::Direct,
                def.declare_options(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| AmqpError::DeclareExchangeError(def.name.clone(), err.to_string()))
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<QueueSnapshot, AmqpError> {
        let queue = self
            .channel
            .queue_declare(&def.name, def.declare_options(), FieldTable::default())
            .await
            .map_err(|err| AmqpError::DeclareQueueError(def.name.clone(), err.to_string()))?;

        Ok(QueueSnapshot {
            queue: queue.name().as_str().to_owned(),
            message_count: queue.message_count(),
        })
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| AmqpError::BindingExchangeToQueueError {
                exchange: binding.exchange_name.clone(),
                queue: binding.queue_name.clone(),
                routing_key: binding.routing_key.clone(),
                reason: err.to_string(),
            })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), AmqpError> {
        // the returned confirm is dropped: the channel is not in confirm mode
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                envelope.payload.as_bytes(),
                envelope.properties(),
            )
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::PublishingError(exchange.to_owned(), err.to_string()))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let channel = self.channel.close(REPLY_SUCCESS, "OK").await;
        let connection = self.connection.close(REPLY_SUCCESS, "OK").await;

        channel
            .and(connection)
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}
