// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use rabbitmq_proxy::{
    channel::AmqpConnector, config::ProxyConfig, handler::ProxyHandler, server, telemetry,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ProxyConfig::load()?;
    telemetry::init(&config.log)?;

    info!(
        broker = config.broker.host,
        vhost = config.broker.vhost,
        queue = config.broker.queue,
        "starting rabbitmq proxy"
    );

    let addr = config.listen_addr();
    let handler = ProxyHandler::new(Arc::new(config), Arc::new(AmqpConnector::new()));

    server::serve(&addr, handler).await?;

    Ok(())
}
