mod common;

use common::*;
use hypocost::explain::ExplainFormat;
use hypocost::server::{Request, ServerState, start_server};
use hypocost::session::Session;
use hypocost::config::OptimizerConfig;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

async fn spawn_server() -> TestResult<TcpStream> {
    let address = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?;
    let state = Arc::new(Mutex::new(ServerState::new(Session::new(
        OptimizerConfig::default(),
        create_enabled_settings(),
    ))));
    let listen_on = address.to_string();
    tokio::spawn(async move { start_server(state, &listen_on).await });

    let mut last_error = None;
    for _ in 0..1000 {
        match TcpStream::connect(address).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
        tokio::task::yield_now().await;
    }
    Err(last_error.map_or_else(|| "server did not start".into(), Into::into))
}

#[tokio::test]
async fn test_register_record_and_explain() {
    let mut stream = spawn_server()
        .await
        .expect("Failed to connect to the test server");

    let registered = send_request(
        &mut stream,
        &Request::Register {
            search: Some("orders_customer".to_string()),
            index: Some(2),
        },
    )
    .await
    .expect("Failed to send register request");
    assert_eq!(
        response_field(&registered, "registered").and_then(rmpv::Value::as_u64),
        Some(1)
    );

    let recorded = send_request(
        &mut stream,
        &Request::Record {
            name: "orders_by_customer".to_string(),
            plan: create_index_scan_query(),
        },
    )
    .await
    .expect("Failed to send record request");
    assert_eq!(
        response_field(&recorded, "recorded").and_then(rmpv::Value::as_str),
        Some("orders_by_customer")
    );

    let explained = send_request(
        &mut stream,
        &Request::Explain {
            name: "orders_by_customer".to_string(),
            format: ExplainFormat::Text,
        },
    )
    .await
    .expect("Failed to send explain request");
    let text = response_field(&explained, "explanation")
        .and_then(rmpv::Value::as_str)
        .expect("explain response carries no text");
    assert!(text.contains("Index: orders_customer_idx"));
    assert!(text.contains("Index: <16384>btree_orders_customer_id_placed_at"));
}

#[tokio::test]
async fn test_errors_are_reported_in_band() {
    let mut stream = spawn_server()
        .await
        .expect("Failed to connect to the test server");

    let response = send_request(
        &mut stream,
        &Request::Register {
            search: None,
            index: Some(2),
        },
    )
    .await
    .expect("Failed to send register request");
    assert!(response_field(&response, "error").is_some());

    // The connection stays usable after an error.
    let response = send_request(&mut stream, &Request::Reset)
        .await
        .expect("Failed to send reset request");
    assert_eq!(
        response_field(&response, "reset").and_then(rmpv::Value::as_bool),
        Some(true)
    );
}
