// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Shared test fixtures: configuration builders and an in-memory broker that
//! behaves like RabbitMQ for the primitives the proxy uses.

use crate::{
    channel::{BrokerConnector, BrokerSession},
    config::{AuthConfig, BrokerConfig, LogConfig, ProxyConfig, ServerConfig, DEFAULT_QUEUE},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    publisher::MessageEnvelope,
    queue::{QueueBinding, QueueDefinition, QueueSnapshot},
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

pub(crate) const SECRET: &str = "dealership_rabbitmq_proxy_2025";

pub(crate) fn broker_config() -> BrokerConfig {
    BrokerConfig {
        host: "localhost".to_owned(),
        port: 5672,
        username: "guest".to_owned(),
        password: "guest".to_owned(),
        vhost: "/".to_owned(),
        queue: DEFAULT_QUEUE.to_owned(),
        connection_name: "rabbitmq-proxy-test".to_owned(),
    }
}

pub(crate) fn proxy_config() -> ProxyConfig {
    ProxyConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 8080,
        },
        broker: broker_config(),
        auth: AuthConfig {
            secret_key: SECRET.to_owned(),
        },
        log: LogConfig::default(),
    }
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeDefinition>,
    queues: HashMap<String, (QueueDefinition, u32)>,
    bindings: HashSet<(String, String, String)>,
    published: Vec<MessageEnvelope>,
    opened: usize,
    closed: usize,
    refuse_connection: bool,
    fail_publish: bool,
    stall_publish: bool,
    fail_read_back: bool,
}

/// In-memory broker. Clones share state, so a test can keep a handle while
/// the handler owns another.
#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<Mutex<State>>,
}

impl FakeBroker {
    pub(crate) fn session(&self) -> FakeSession {
        FakeSession {
            state: self.state.clone(),
        }
    }

    pub(crate) fn refuse_connection(&self) {
        self.state.lock().unwrap().refuse_connection = true;
    }

    pub(crate) fn fail_publish(&self) {
        self.state.lock().unwrap().fail_publish = true;
    }

    /// Makes every publish hang forever, as on a blocked connection.
    pub(crate) fn stall_publish(&self) {
        self.state.lock().unwrap().stall_publish = true;
    }

    pub(crate) fn fail_read_back(&self) {
        self.state.lock().unwrap().fail_read_back = true;
    }

    pub(crate) fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub(crate) fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub(crate) fn exchange_count(&self) -> usize {
        self.state.lock().unwrap().exchanges.len()
    }

    pub(crate) fn binding_count(&self) -> usize {
        self.state.lock().unwrap().bindings.len()
    }

    pub(crate) fn published(&self) -> Vec<MessageEnvelope> {
        self.state.lock().unwrap().published.clone()
    }

    /// Number of messages waiting on `queue`.
    pub(crate) fn depth(&self, queue: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|(_, count)| *count)
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerConnector for FakeBroker {
    async fn open(&self, _cfg: &BrokerConfig) -> Result<Box<dyn BrokerSession>, AmqpError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connection {
            return Err(AmqpError::ConnectionError(
                "Connection refused (os error 111)".to_owned(),
            ));
        }
        state.opened += 1;

        Ok(Box::new(self.session()))
    }
}

pub(crate) struct FakeSession {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl BrokerSession for FakeSession {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();

        match state.exchanges.get(&def.name) {
            Some(existing) if existing.durable != def.durable => {
                Err(AmqpError::DeclareExchangeError(
                    def.name.clone(),
                    "PRECONDITION_FAILED - inequivalent arg".to_owned(),
                ))
            }
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(def.name.clone(), def.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<QueueSnapshot, AmqpError> {
        let mut state = self.state.lock().unwrap();

        if def.passive && state.fail_read_back {
            return Err(AmqpError::DeclareQueueError(
                def.name.clone(),
                "channel closed".to_owned(),
            ));
        }

        match state.queues.get(&def.name) {
            Some((existing, count)) => {
                if !def.passive && existing.durable != def.durable {
                    return Err(AmqpError::DeclareQueueError(
                        def.name.clone(),
                        "PRECONDITION_FAILED - inequivalent arg".to_owned(),
                    ));
                }
                Ok(QueueSnapshot {
                    queue: def.name.clone(),
                    message_count: *count,
                })
            }
            None if def.passive => Err(AmqpError::DeclareQueueError(
                def.name.clone(),
                "NOT_FOUND - no queue".to_owned(),
            )),
            None => {
                state.queues.insert(def.name.clone(), (def.clone(), 0));
                Ok(QueueSnapshot {
                    queue: def.name.clone(),
                    message_count: 0,
                })
            }
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.bindings.insert((
            binding.queue_name.clone(),
            binding.exchange_name.clone(),
            binding.routing_key.clone(),
        ));
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), AmqpError> {
        let stalled = self.state.lock().unwrap().stall_publish;
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_publish {
            return Err(AmqpError::PublishingError(
                exchange.to_owned(),
                "channel closed".to_owned(),
            ));
        }

        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|(_, ex, key)| ex == exchange && key == routing_key)
            .map(|(queue, _, _)| queue.clone())
            .collect();
        for queue in targets {
            if let Some((_, count)) = state.queues.get_mut(&queue) {
                *count += 1;
            }
        }
        state.published.push(envelope.clone());

        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}
