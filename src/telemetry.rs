// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Process-wide logging and trace propagation setup for the binary.

use crate::config::{LogConfig, LOG_ENV_VAR};
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::{fs::OpenOptions, sync::Mutex};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the tracing subscriber and the W3C trace context propagator.
///
/// The filter comes from `RABBITMQ_PROXY_LOG` and defaults to `info`. When
/// `log.file` is set, timestamped lines are appended to that file instead of
/// stdout.
pub fn init(log: &LogConfig) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match &log.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry.with(fmt::layer()).init(),
    }

    global::set_text_map_propagator(TraceContextPropagator::new());

    Ok(())
}
