//! Request/response correlation against real child processes.

mod common;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use common::{fast_settings, service_with, service_with_settings, stub_spec};
use serde_json::{Value, json};
use toolwire_mcp::{McpClientSettings, McpError, RawArgumentWrapping, ToolArguments};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_echo_end_to_end() {
    let service = service_with(vec![stub_spec("echo-srv", "echo")]);

    let result = service
        .call_tool("echo-srv", "echo", json!({"text": "hi"}))
        .await
        .unwrap();
    assert_eq!(result, json!({"text": "hi"}));

    // Started on demand by the call
    assert_eq!(service.list_running_servers().await, vec!["echo-srv"]);
    service.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_get_distinct_ids_and_own_responses() {
    const CALLS: usize = 16;

    let service = service_with(vec![stub_spec("echo-srv", "echo")]);
    service.start_server("echo-srv").await.unwrap();

    let handles: Vec<_> = (0..CALLS)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let result = service
                    .call_tool("echo-srv", "whoami", json!({"caller": i}))
                    .await
                    .unwrap();
                (i, result)
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert_eq!(result["arguments"], json!({"caller": i}));
        let id = result["id"].as_u64().unwrap();
        assert!(ids.insert(id), "id {id} assigned twice");
    }
    assert_eq!(ids.len(), CALLS);
    assert_eq!(service.outstanding_requests("echo-srv").await, 0);
    service.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_out_of_order_responses_correlate_by_id() {
    let spec = stub_spec("rev", "reverse").with_env("STUB_BATCH", "3");
    let service = service_with(vec![spec]);
    service.start_server("rev").await.unwrap();

    let (a, b, c) = tokio::join!(
        service.call_tool("rev", "echo", json!({"n": 1})),
        service.call_tool("rev", "echo", json!({"n": 2})),
        service.call_tool("rev", "echo", json!({"n": 3})),
    );
    assert_eq!(a.unwrap(), json!({"n": 1}));
    assert_eq!(b.unwrap(), json!({"n": 2}));
    assert_eq!(c.unwrap(), json!({"n": 3}));
    service.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_call_does_not_block_fast_call() {
    let service = service_with(vec![stub_spec("echo-srv", "echo")]);
    service.start_server("echo-srv").await.unwrap();

    let slow = service.call_tool("echo-srv", "delay", json!({"ms": 400}));
    let fast = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        let result = service.call_tool("echo-srv", "echo", json!({"fast": true})).await;
        (result, started.elapsed())
    };

    let (slow, (fast, fast_elapsed)) = tokio::join!(slow, fast);
    assert_eq!(slow.unwrap()["slept_ms"], 400);
    assert_eq!(fast.unwrap(), json!({"fast": true}));
    assert!(fast_elapsed < Duration::from_millis(300));
    service.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_leaves_no_pending_request() {
    let service = service_with(vec![stub_spec("echo-srv", "echo")]);
    service.start_server("echo-srv").await.unwrap();

    let started = Instant::now();
    let err = service
        .call_tool_with_timeout(
            "echo-srv",
            "block",
            json!({}),
            Some(Duration::from_millis(300)),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        matches!(&err, McpError::Timeout { timeout_ms: 300, .. }),
        "got {err}"
    );
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(service.outstanding_requests("echo-srv").await, 0);
    service.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_response_is_dropped() {
    let service = service_with(vec![stub_spec("echo-srv", "echo")]);
    service.start_server("echo-srv").await.unwrap();

    let err = service
        .call_tool_with_timeout(
            "echo-srv",
            "delay",
            json!({"ms": 300}),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Timeout { .. }));

    // Let the late response arrive, then make sure it does not leak into the next call
    tokio::time::sleep(Duration::from_millis(400)).await;
    let result = service
        .call_tool("echo-srv", "echo", json!({"next": true}))
        .await
        .unwrap();
    assert_eq!(result, json!({"next": true}));
    assert_eq!(service.list_running_servers().await, vec!["echo-srv"]);
    service.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_lines_do_not_break_correlation() {
    let service = service_with(vec![stub_spec("noisy", "garbage")]);
    service.start_server("noisy").await.unwrap();
    assert_eq!(service.list_tools("noisy").await.len(), 1);

    for i in 0..3 {
        let result = service
            .call_tool("noisy", "echo", json!({"i": i}))
            .await
            .unwrap();
        assert_eq!(result, json!({"i": i}));
    }
    assert_eq!(service.list_running_servers().await, vec!["noisy"]);
    service.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_persistent_protocol_errors_can_escalate() {
    let settings = McpClientSettings {
        max_consecutive_protocol_errors: 1,
        ..fast_settings()
    };
    let service = service_with_settings(vec![stub_spec("noisy", "garbage")], settings);

    let err = service.start_server("noisy").await.unwrap_err();
    assert!(matches!(err, McpError::ServerCrashed { .. }));
    assert!(service.list_running_servers().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_provider_error_is_propagated_verbatim() {
    let service = service_with(vec![stub_spec("broken", "error")]);

    let err = service
        .call_tool("broken", "read_file", json!({"path": "/tmp/x"}))
        .await
        .unwrap_err();

    match err {
        McpError::ToolInvocation {
            server,
            tool,
            code,
            message,
            data,
        } => {
            assert_eq!(server, "broken");
            assert_eq!(tool, "read_file");
            assert_eq!(code, -32001);
            assert_eq!(message, "file not found: /tmp/x");
            assert_eq!(data, Some(json!({"path": "/tmp/x"})));
        }
        other => panic!("expected ToolInvocation, got {other}"),
    }
    // A tool error leaves the server up
    assert_eq!(service.list_running_servers().await, vec!["broken"]);
    service.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_tool_name_rejected() {
    let service = service_with(vec![stub_spec("echo-srv", "echo")]);

    let err = service
        .call_tool("echo-srv", "  ", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::InvalidArgument(_)));
    service.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_raw_string_arguments_are_wrapped() {
    let positional = service_with(vec![stub_spec("echo-srv", "echo")]);
    let result = positional
        .call_tool("echo-srv", "echo", "hello")
        .await
        .unwrap();
    assert_eq!(result, json!(["hello"]));
    positional.shutdown_all().await;

    let keyed_settings = McpClientSettings {
        raw_argument_wrapping: RawArgumentWrapping::Keyed("input".to_string()),
        ..fast_settings()
    };
    let keyed = service_with_settings(vec![stub_spec("echo-srv", "echo")], keyed_settings);
    let result = keyed
        .call_tool("echo-srv", "echo", ToolArguments::Raw("hello".to_string()))
        .await
        .unwrap();
    assert_eq!(result, json!({"input": "hello"}));
    keyed.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_result_payload_is_not_reinterpreted() {
    let service = service_with(vec![stub_spec("echo-srv", "echo")]);
    let payload = json!({
        "content": [{"type": "text", "text": "x"}],
        "isError": true,
        "nested": {"n": [1, 2, null]}
    });

    let result: Value = service
        .call_tool("echo-srv", "echo", payload.clone())
        .await
        .unwrap();
    assert_eq!(result, payload);
    service.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tool_host_port_surface() {
    use toolwire_mcp::ToolHostPort;

    let service = service_with(vec![stub_spec("echo-srv", "echo")]);
    let host: &dyn ToolHostPort = &service;

    host.start_server("echo-srv").await.unwrap();
    let result = host
        .call_tool("echo-srv", "echo", ToolArguments::from(json!({"via": "port"})))
        .await
        .unwrap();
    assert_eq!(result, json!({"via": "port"}));
    assert_eq!(host.list_tools("echo-srv").await.len(), 1);

    host.shutdown_all().await;
    assert!(host.list_running_servers().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[cfg(unix)]
async fn test_provider_that_stops_reading_cannot_hang_calls_or_stop() {
    use toolwire_mcp::ServerSpec;

    // Answers discovery, then never reads stdin again
    let deaf = ServerSpec::new("deaf", "sh")
        .with_args(["-c", r#"read l; echo '{"id":1,"result":[]}'; sleep 30"#]);
    let service = service_with(vec![deaf]);
    service.start_server("deaf").await.unwrap();

    let payload = json!({"blob": "x".repeat(1024 * 1024)});
    let started = Instant::now();
    let err = tokio::time::timeout(
        Duration::from_secs(4),
        service.call_tool_with_timeout("deaf", "echo", payload.clone(), Some(Duration::from_millis(300))),
    )
    .await
    .expect("call must honour its timeout")
    .unwrap_err();
    assert!(matches!(err, McpError::Timeout { .. }), "got {err}");
    assert!(started.elapsed() < Duration::from_secs(2));

    // Same again with the stalled call still in flight while stopping
    service.start_server("deaf").await.unwrap();
    let caller = service.clone();
    let call = tokio::spawn(async move {
        caller
            .call_tool_with_timeout("deaf", "echo", payload, Some(Duration::from_secs(30)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), service.stop_server("deaf"))
        .await
        .expect("stop must be bounded")
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(call.await.unwrap().is_err());
    assert!(service.list_running_servers().await.is_empty());
}
