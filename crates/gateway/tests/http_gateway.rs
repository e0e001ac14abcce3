//! SnapGateway tests against a local HTTP server.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use common::TopupId;
use gateway::{GatewayConfig, GatewayError, PaymentGateway, SnapGateway};
use serde_json::{Value, json};

#[derive(Clone, Default)]
struct Recorded {
    hits: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<(HeaderMap, Value)>>>,
}

/// Serves a charge endpoint that answers with `responses[n]` on the n-th hit,
/// repeating the last response once exhausted.
async fn serve(responses: Vec<(StatusCode, String)>) -> (String, Recorded) {
    let recorded = Recorded::default();
    let handler_state = recorded.clone();
    let responses = Arc::new(responses);

    let app = Router::new().route(
        "/snap/v1/transactions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let state = handler_state.clone();
            let responses = responses.clone();
            async move {
                let n = state.hits.fetch_add(1, Ordering::SeqCst);
                *state.last.lock().unwrap() = Some((headers, body));
                let (status, body) = responses[n.min(responses.len() - 1)].clone();
                (status, body)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/snap/v1/transactions"), recorded)
}

fn config(url: &str) -> GatewayConfig {
    GatewayConfig {
        retry_backoff: Duration::from_millis(10),
        ..GatewayConfig::new(url, "SB-Mid-server-key")
    }
}

fn created() -> (StatusCode, String) {
    (
        StatusCode::CREATED,
        json!({ "token": "tok-123", "redirect_url": "https://pay.example/tok-123" }).to_string(),
    )
}

#[tokio::test]
async fn sends_contract_body_and_basic_auth() {
    let (url, recorded) = serve(vec![created()]).await;
    let gateway = SnapGateway::new(config(&url)).unwrap();
    let order_id = TopupId::new();

    let charge = gateway.create_charge(order_id, 10_000).await.unwrap();
    assert_eq!(charge.token, "tok-123");
    assert_eq!(charge.redirect_url, "https://pay.example/tok-123");

    let (headers, body) = recorded.last.lock().unwrap().clone().unwrap();
    assert_eq!(
        headers.get("authorization").unwrap(),
        "Basic U0ItTWlkLXNlcnZlci1rZXk6"
    );
    assert_eq!(headers.get("accept").unwrap(), "application/json");
    assert_eq!(
        body,
        json!({ "transaction_details": { "order_id": order_id.to_string(), "gross_amount": 10_000 } })
    );
}

#[tokio::test]
async fn non_created_success_code_is_an_error() {
    let (url, recorded) = serve(vec![(StatusCode::OK, "{}".to_string())]).await;
    let gateway = SnapGateway::new(config(&url)).unwrap();

    let result = gateway.create_charge(TopupId::new(), 10_000).await;
    assert!(matches!(
        result,
        Err(GatewayError::UnexpectedStatus { status: 200, .. })
    ));
    assert_eq!(recorded.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let (url, recorded) = serve(vec![(
        StatusCode::BAD_REQUEST,
        r#"{"error_messages":["gross_amount is required"]}"#.to_string(),
    )])
    .await;
    let gateway = SnapGateway::new(config(&url)).unwrap();

    match gateway.create_charge(TopupId::new(), 10_000).await {
        Err(GatewayError::UnexpectedStatus { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("gross_amount is required"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(recorded.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let (url, recorded) = serve(vec![
        (StatusCode::SERVICE_UNAVAILABLE, String::new()),
        (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
        created(),
    ])
    .await;
    let gateway = SnapGateway::new(config(&url)).unwrap();

    let charge = gateway.create_charge(TopupId::new(), 10_000).await.unwrap();
    assert_eq!(charge.token, "tok-123");
    assert_eq!(recorded.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let (url, recorded) = serve(vec![(StatusCode::BAD_GATEWAY, String::new())]).await;
    let gateway = SnapGateway::new(config(&url)).unwrap();

    let result = gateway.create_charge(TopupId::new(), 10_000).await;
    assert!(matches!(
        result,
        Err(GatewayError::UnexpectedStatus { status: 502, .. })
    ));
    assert_eq!(recorded.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let (url, _) = serve(vec![(StatusCode::CREATED, "not json".to_string())]).await;
    let gateway = SnapGateway::new(config(&url)).unwrap();

    let result = gateway.create_charge(TopupId::new(), 10_000).await;
    assert!(matches!(result, Err(GatewayError::Decode(_))));
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway = SnapGateway::new(GatewayConfig {
        max_retries: 1,
        ..config(&format!("http://{addr}/snap/v1/transactions"))
    })
    .unwrap();

    let result = gateway.create_charge(TopupId::new(), 10_000).await;
    assert!(matches!(result, Err(GatewayError::Transport(_))));
}
