// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! Declares the exchanges, queues and bindings a publish depends on. Every
//! declaration is idempotent on the broker side: repeating one with the same
//! properties is a no-op, while a property conflict on an existing entity is
//! reported as a topology error.
//!
//! The proxy topology is deliberately fixed: the caller's exchange (direct,
//! durable), one well-known durable queue, and a binding between them on the
//! caller's routing key. The routing key selects messages; it never names the
//! queue.

use crate::{
    channel::BrokerSession,
    errors::ProxyError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use tracing::{debug, error};

/// A set of exchanges, queues and bindings installed through one session.
pub struct AmqpTopology<'tp> {
    session: &'tp dyn BrokerSession,
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl<'tp> AmqpTopology<'tp> {
    /// Creates an empty topology that installs through `session`.
    ///
    /// # Parameters
    /// * `session` - The request's open broker session
    pub fn new(session: &'tp dyn BrokerSession) -> AmqpTopology<'tp> {
        AmqpTopology {
            session,
            exchanges: vec![],
            queues: vec![],
            queues_binding: vec![],
        }
    }

    /// The proxy topology for one publish: `exchange` as a durable direct
    /// exchange, `queue` as a durable shared queue, bound with `routing_key`.
    pub fn proxy(
        session: &'tp dyn BrokerSession,
        exchange: &str,
        routing_key: &str,
        queue: &str,
    ) -> AmqpTopology<'tp> {
        AmqpTopology::new(session)
            .exchange(ExchangeDefinition::new(exchange).durable())
            .queue(QueueDefinition::new(queue).durable())
            .queue_binding(
                QueueBinding::new(queue)
                    .exchange(exchange)
                    .routing_key(routing_key),
            )
    }

    /// Adds an exchange to declare.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue to declare.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue-to-exchange binding.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology in a fixed order: exchanges, then queues, then
    /// bindings. The first failure stops the install.
    pub async fn install(&self) -> Result<(), ProxyError> {
        self.install_exchange().await?;
        self.install_queue().await?;
        self.binding_queues().await
    }

    async fn install_exchange(&self) -> Result<(), ProxyError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            if let Err(err) = self.session.declare_exchange(exch).await {
                error!(
                    error = err.to_string(),
                    name = exch.name,
                    "error to declare the exchange"
                );
                return Err(ProxyError::TopologyError(err));
            }

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queue(&self) -> Result<(), ProxyError> {
        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            match self.session.declare_queue(def).await {
                Err(err) => {
                    error!(error = err.to_string(), name = def.name, "error to declare the queue");
                    return Err(ProxyError::TopologyError(err));
                }
                Ok(snapshot) => {
                    debug!(messages = snapshot.message_count, "queue: {} was created", def.name)
                }
            }
        }

        Ok(())
    }

    async fn binding_queues(&self) -> Result<(), ProxyError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            if let Err(err) = self.session.bind_queue(binding).await {
                error!(error = err.to_string(), "error to bind queue to exchange");
                return Err(ProxyError::TopologyError(err));
            }
        }

        debug!("queue was bounded");

        Ok(())
    }
}
