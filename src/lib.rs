// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod channel;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod publisher;
pub mod queue;
pub mod server;
pub mod telemetry;
pub mod topology;

#[cfg(test)]
pub(crate) mod test_utils;
