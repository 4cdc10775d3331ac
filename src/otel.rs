// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Context Propagation
//!
//! Carries W3C trace context from the inbound HTTP request into the headers of
//! the message published to RabbitMQ, so consumers can continue the caller's
//! trace. Both directions go through the globally installed text map
//! propagator; with the default no-op propagator nothing is copied.

use axum::http::HeaderMap;
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    Context,
};
use std::collections::BTreeMap;

/// Reads trace context keys from HTTP request headers.
pub(crate) struct HttpHeaderExtractor<'a> {
    headers: &'a HeaderMap,
}

impl<'a> HttpHeaderExtractor<'a> {
    pub(crate) fn new(headers: &'a HeaderMap) -> Self {
        Self { headers }
    }
}

impl Extractor for HttpHeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|name| name.as_str()).collect()
    }
}

/// Writes trace context keys into the header table of an outgoing message.
pub(crate) struct MessageHeaderInjector<'a> {
    headers: &'a mut BTreeMap<String, String>,
}

impl<'a> MessageHeaderInjector<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<String, String>) -> Self {
        Self { headers }
    }
}

impl Injector for MessageHeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_lowercase(), value);
    }
}

/// Extracts the caller's trace context from request headers.
pub fn extract_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| {
        propagator.extract(&HttpHeaderExtractor::new(headers))
    })
}

/// Injects `ctx` into a message header table.
pub(crate) fn inject_context(ctx: &Context, headers: &mut BTreeMap<String, String>) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut MessageHeaderInjector::new(headers))
    });
}
