// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # HTTP Endpoint
//!
//! A single route, `/`:
//! - `GET` returns the liveness envelope and never touches the broker
//! - `POST` takes a form-urlencoded body and runs it through `ProxyHandler`
//! - any other method gets the failure envelope
//!
//! Success envelopes are sent with 200, failures with 500. CORS allows any
//! origin for `GET` and `POST`.

use crate::{
    errors::ProxyError,
    handler::{ProxyHandler, ProxyRequest, ResponseEnvelope},
    otel,
};
use axum::{
    extract::{rejection::FormRejection, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Binds `addr` and serves the proxy until ctrl-c.
pub async fn serve(addr: &str, handler: ProxyHandler) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "rabbitmq proxy listening");

    axum::serve(listener, router(handler))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Build the axum router (separated for testing).
pub fn router(handler: ProxyHandler) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route(
            "/",
            get(status).post(dispatch).fallback(method_not_allowed),
        )
        .layer(cors)
        .with_state(handler)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = err.to_string(), "failure to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn respond(envelope: ResponseEnvelope) -> Response {
    let status = if envelope.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(envelope)).into_response()
}

async fn status(State(handler): State<ProxyHandler>) -> Response {
    info!("status requested");
    respond(handler.status())
}

async fn dispatch(
    State(handler): State<ProxyHandler>,
    headers: HeaderMap,
    form: Result<Form<ProxyRequest>, FormRejection>,
) -> Response {
    let span = info_span!("proxy_request", request_id = %Uuid::new_v4(), method = "POST");

    async move {
        // an undecodable body counts as an empty form and fails authentication
        let req = match form {
            Ok(Form(req)) => req,
            Err(rejection) => {
                warn!(error = rejection.to_string(), "undecodable form body");
                ProxyRequest::default()
            }
        };

        let ctx = otel::extract_context(&headers);
        let envelope = handler.handle(&req, &ctx).await;
        info!(success = envelope.success, "request completed");

        respond(envelope)
    }
    .instrument(span)
    .await
}

async fn method_not_allowed(method: Method) -> Response {
    warn!(%method, "unsupported method");
    respond(ResponseEnvelope::failure(&ProxyError::MethodNotAllowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockBrokerConnector;
    use crate::test_utils::{proxy_config, FakeBroker, SECRET};
    use axum::body::Body;
    use axum::http::{header, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(connector: impl crate::channel::BrokerConnector + 'static) -> Router {
        router(ProxyHandler::new(Arc::new(proxy_config()), Arc::new(connector)))
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn get_reports_liveness_without_touching_the_broker() {
        let mut connector = MockBrokerConnector::new();
        connector.expect_open().never();

        let response = app(connector)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let body = json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "RabbitMQ HTTP Proxy is running");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn get_after_a_broker_request_does_not_open_a_session() {
        let broker = FakeBroker::default();
        let app = app(broker.clone());

        let response = app
            .clone()
            .oneshot(post(&format!("secret_key={}&action=test_connection", SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(broker.opened(), 1);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["message"], "RabbitMQ HTTP Proxy is running");
        assert_eq!((broker.opened(), broker.closed()), (1, 1));
    }

    #[tokio::test]
    async fn wrong_secret_is_a_500_failure_envelope() {
        let mut connector = MockBrokerConnector::new();
        connector.expect_open().never();

        let response = app(connector)
            .oneshot(post("secret_key=nope&action=test_connection"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Invalid secret key");
        assert!(body["timestamp"].is_string());
        assert!(body.get("message").is_none());
    }

    #[tokio::test]
    async fn undecodable_body_fails_authentication() {
        let mut connector = MockBrokerConnector::new();
        connector.expect_open().never();

        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"secret_key":"x"}"#))
            .unwrap();
        let response = app(connector).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json(response).await["error"], "Invalid secret key");
    }

    #[tokio::test]
    async fn publish_over_http_returns_id_and_depth() {
        let broker = FakeBroker::default();
        let form = format!(
            "secret_key={}&action=publish_message&exchange=orders&routing_key=new&message=%7B%22message_id%22%3A%22abc123%22%7D",
            SECRET
        );

        let response = app(broker.clone()).oneshot(post(&form)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Message published successfully via HTTP proxy");
        assert_eq!(body["message_id"], "abc123");
        assert_eq!(body["queue_count"], 1);
        assert_eq!((broker.opened(), broker.closed()), (1, 1));
    }

    #[tokio::test]
    async fn other_methods_get_the_failure_envelope() {
        let mut connector = MockBrokerConnector::new();
        connector.expect_open().never();

        let response = app(connector)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json(response).await["error"],
            "Only GET and POST requests allowed"
        );
    }

    #[tokio::test]
    async fn responses_allow_any_origin() {
        let response = app(MockBrokerConnector::new())
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::ORIGIN, "https://dealer.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }
}
