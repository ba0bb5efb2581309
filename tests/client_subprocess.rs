use serde_json::json;
use std::time::Duration;
use toolrpc::errors::ClientError;
use toolrpc::{Arguments, ClientOptions, RpcClient};

fn args(v: serde_json::Value) -> Arguments {
    v.as_object().cloned().unwrap()
}

fn quick_options() -> ClientOptions {
    ClientOptions {
        call_timeout: Duration::from_millis(500),
        init_timeout: Duration::from_secs(10),
        shutdown_timeout: Duration::from_secs(2),
        ..ClientOptions::default()
    }
}

async fn own_binary() -> RpcClient {
    let client = RpcClient::new("self", ClientOptions::default());
    let started = client
        .start(env!("CARGO_BIN_EXE_toolrpc"), &["--transport".to_string(), "stdio".to_string()])
        .await;
    assert!(started, "toolrpc should start as a stdio provider");
    client
}

/// Runs a scripted provider via `sh -c`.
#[cfg(unix)]
async fn scripted(script: &str, options: ClientOptions) -> RpcClient {
    let client = RpcClient::new("scripted", options);
    assert!(client.start("sh", &["-c".to_string(), script.to_string()]).await);
    client
}

#[cfg(unix)]
const HANDSHAKE: &str = r#"read a; echo '{"jsonrpc":"2.0","id":1,"result":{}}'; read b; echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo"}]}}';"#;

#[tokio::test]
async fn handshake_caches_the_catalogue() {
    let client = own_binary().await;
    assert!(client.is_initialized());
    assert!(client.is_alive().await);
    let names: Vec<String> = client.list_cached_tools().into_iter().map(|t| t.name).collect();
    assert!(names.contains(&"calculator".to_string()));
    assert!(names.contains(&"divide".to_string()));
    assert!(client.is_tool_available("add"));
    assert!(!client.is_tool_available("search"));
    assert_eq!(client.refresh_tools().await.unwrap(), names.len());
    client.close().await;
}

#[tokio::test]
async fn calls_round_trip_through_the_subprocess() {
    let client = own_binary().await;

    let sum = client.call("add", args(json!({"a": 2, "b": 3}))).await;
    assert!(!sum.is_error);
    assert!(sum.text_content().contains('5'));

    let div = client.call("divide", args(json!({"a": 10, "b": 0}))).await;
    assert!(div.is_error);
    assert!(div.text_content().contains("division by zero"));

    let unknown = client.call("nonexistent", Arguments::new()).await;
    assert!(unknown.is_error);
    assert!(unknown.text_content().contains("nonexistent"));

    match client.request("bogus", None).await {
        Err(ClientError::Server { code, .. }) => assert_eq!(code, -32601),
        other => panic!("expected a method-not-found error, got {other:?}"),
    }
    // protocol errors leave the channel usable
    assert!(client.is_initialized());
    client.close().await;
}

#[tokio::test]
async fn close_is_idempotent() {
    let client = own_binary().await;
    client.close().await;
    client.close().await;
    assert!(!client.is_initialized());
    assert!(!client.is_alive().await);
    assert!(client.list_cached_tools().is_empty());

    let after = client.call("add", args(json!({"a": 1, "b": 1}))).await;
    assert!(after.is_error);
    assert!(after.text_content().contains("not started"));
}

#[tokio::test]
async fn never_started_client_is_inert() {
    let client = RpcClient::new("idle", ClientOptions::default());
    client.close().await;
    assert!(!client.is_initialized());
    assert!(matches!(client.try_call("add", Arguments::new()).await, Err(ClientError::NotStarted)));
}

#[tokio::test]
async fn missing_command_fails_to_start() {
    let client = RpcClient::new("ghost", quick_options());
    assert!(!client.start("definitely-not-a-real-command-xyz", &[]).await);
    assert!(!client.is_initialized());
    assert!(client.list_cached_tools().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn silent_provider_times_out_during_handshake() {
    let options = ClientOptions { init_timeout: Duration::from_millis(300), ..quick_options() };
    let client = RpcClient::new("silent", options);
    assert!(!client.start("sh", &["-c".to_string(), "cat > /dev/null".to_string()]).await);
    assert!(!client.is_initialized());
}

#[cfg(unix)]
#[tokio::test]
async fn provider_exit_is_terminal() {
    let client = scripted(&format!("{HANDSHAKE} read c"), quick_options()).await;
    assert!(client.is_tool_available("echo"));
    let err = client.try_call("echo", Arguments::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::Closed), "got {err:?}");
    assert!(!client.is_initialized());
    client.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn malformed_line_fails_one_call_only() {
    let script = format!(
        r#"{HANDSHAKE} read c; echo 'garbage'; read d; echo '{{"jsonrpc":"2.0","id":4,"result":{{"content":[{{"type":"text","text":"ok"}}]}}}}'; read e"#
    );
    let client = scripted(&script, quick_options()).await;
    let err = client.try_call("echo", Arguments::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::MalformedResponse(_)), "got {err:?}");
    assert!(client.is_initialized());
    let ok = client.try_call("echo", Arguments::new()).await.unwrap();
    assert_eq!(ok.text_content(), "ok");
    client.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn late_response_is_skipped_after_timeout() {
    let script = format!(
        r#"{HANDSHAKE} read c; sleep 1; echo '{{"jsonrpc":"2.0","id":3,"result":{{"content":[{{"type":"text","text":"late"}}]}}}}'; read d; echo '{{"jsonrpc":"2.0","id":4,"result":{{"content":[{{"type":"text","text":"fresh"}}]}}}}'; read e"#
    );
    let options = ClientOptions { call_timeout: Duration::from_millis(300), ..quick_options() };
    let client = scripted(&script, options).await;
    let err = client.try_call("echo", Arguments::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)), "got {err:?}");

    // let the stale line land in the pipe before the next exchange
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let fresh = client.try_call("echo", Arguments::new()).await.unwrap();
    assert_eq!(fresh.text_content(), "fresh");
    client.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn non_standard_result_is_wrapped_as_text() {
    let script = format!(r#"{HANDSHAKE} read c; echo '{{"jsonrpc":"2.0","id":3,"result":{{"answer":42}}}}'; read d"#);
    let client = scripted(&script, quick_options()).await;
    let result = client.call("echo", Arguments::new()).await;
    assert!(!result.is_error);
    assert_eq!(result.text_content(), r#"{"answer":42}"#);
    client.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn stalled_reader_bounds_the_write() {
    let options = ClientOptions { call_timeout: Duration::from_millis(300), ..quick_options() };
    let client = scripted(&format!("{HANDSHAKE} sleep 30"), options).await;
    let big = "x".repeat(1024 * 1024);

    let outcome = tokio::time::timeout(Duration::from_secs(5), client.try_call("echo", args(json!({"blob": big}))))
        .await
        .expect("a wedged provider must not block the caller");
    let err = outcome.unwrap_err();
    assert!(matches!(err, ClientError::WriteTimeout(_)), "got {err:?}");
    assert!(!client.is_initialized());
    assert!(!client.is_alive().await);

    tokio::time::timeout(Duration::from_secs(5), client.close())
        .await
        .expect("close must not wait on the wedged write");
    assert!(matches!(client.try_call("echo", Arguments::new()).await, Err(ClientError::NotStarted)));
}

#[cfg(unix)]
#[tokio::test]
async fn late_error_without_id_is_not_pinned_on_the_next_call() {
    let script = format!(
        r#"{HANDSHAKE} read c; sleep 1; echo '{{"jsonrpc":"2.0","id":null,"error":{{"code":-32700,"message":"Parse error"}}}}'; read d; echo '{{"jsonrpc":"2.0","id":4,"result":{{"content":[{{"type":"text","text":"fresh"}}]}}}}'; read e"#
    );
    let options = ClientOptions { call_timeout: Duration::from_millis(300), ..quick_options() };
    let client = scripted(&script, options).await;
    let err = client.try_call("echo", Arguments::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)), "got {err:?}");
    assert!(client.is_initialized());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let fresh = client.try_call("echo", Arguments::new()).await.unwrap();
    assert_eq!(fresh.text_content(), "fresh");
    client.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn error_without_id_answers_the_current_call() {
    let script = format!(
        r#"{HANDSHAKE} read c; echo '{{"jsonrpc":"2.0","id":null,"error":{{"code":-32700,"message":"Parse error"}}}}'; read d"#
    );
    let client = scripted(&script, quick_options()).await;
    match client.try_call("echo", Arguments::new()).await {
        Err(ClientError::Server { code, .. }) => assert_eq!(code, -32700),
        other => panic!("expected the peer's parse error, got {other:?}"),
    }
    client.close().await;
}
