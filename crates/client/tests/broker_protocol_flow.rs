#![cfg(unix)]

//! Drives `ProtocolClient` against a fake broker — a tiny `/bin/sh` script
//! standing in for a real broker binary, driven the same way a fake CLI
//! binary would be. Each script only understands the handful of request
//! kinds its scenario needs.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_relay_client::{AgentSpec, BrokerEvent, ClientError, ClientOptions, ProtocolClient};
use tempfile::TempDir;

fn write_script(dir: &TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, body).expect("write fake broker script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path.to_string_lossy().into_owned()
}

/// Shared shell preamble: extracts a request's `request_id` via parameter
/// expansion so scripts never depend on `sed`/`jq` being on PATH.
const EXTRACT_RID: &str = r#"
extract_rid() {
  case "$1" in
    *'"request_id":"'*)
      rest=${1#*\"request_id\":\"}
      printf '%s' "${rest%%\"*}"
      ;;
  esac
}
"#;

fn options_for(binary: &str) -> ClientOptions {
    ClientOptions {
        binary_path: Some(binary.to_string()),
        request_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_millis(500),
        ..ClientOptions::default()
    }
}

#[tokio::test]
async fn hello_handshake_and_spawn_ready_flow() {
    let dir = TempDir::new().expect("temp dir");
    let script = format!(
        r#"#!/bin/sh
{extract_rid}
while IFS= read -r line; do
  case "$line" in
    *'"type":"hello"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"hello_ack","payload":{{"workspace_key":"ws-test-1"}},"request_id":"%s"}}\n' "$rid"
      printf '{{"v":1,"type":"event","payload":{{"kind":"worker_ready","name":"worker-1"}}}}\n'
      ;;
    *'"type":"spawn_agent"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"ok","payload":{{"result":{{"name":"worker-1","runtime":"headless_claude"}}}},"request_id":"%s"}}\n' "$rid"
      ;;
    *'"type":"shutdown"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"ok","payload":{{}},"request_id":"%s"}}\n' "$rid"
      exit 0
      ;;
  esac
done
"#,
        extract_rid = EXTRACT_RID
    );
    let binary = write_script(&dir, "fake-broker", &script);

    let client = ProtocolClient::new(options_for(&binary));

    let received: Arc<Mutex<Vec<BrokerEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let received_for_listener = received.clone();
    let _unsub = client.on_event(move |event| {
        received_for_listener.lock().unwrap().push(event.clone());
    });

    client.start().await.expect("hello handshake should succeed");
    assert!(client.is_running());
    assert_eq!(client.workspace_key().as_deref(), Some("ws-test-1"));

    let result = client
        .spawn_agent(AgentSpec::new("worker-1"), None, None, None)
        .await
        .expect("spawn_agent should succeed");
    assert_eq!(result.name, "worker-1");
    assert_eq!(result.runtime.as_deref(), Some("headless_claude"));

    // The unsolicited `worker_ready` event line should have reached the
    // listener registered before `start()` resolved.
    for _ in 0..50 {
        if !received.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let events = received.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "worker_ready");
    assert_eq!(events[0].name(), "worker-1");
    drop(events);

    client.shutdown().await.expect("shutdown should succeed");
    assert!(!client.is_running());
}

#[tokio::test]
async fn responses_arriving_in_reversed_order_resolve_to_their_own_caller() {
    let dir = TempDir::new().expect("temp dir");
    // Buffers the first `send_input` request it sees and only replies once
    // the second arrives, answering the second request before the first —
    // deliberately reversed relative to send order.
    let script = format!(
        r#"#!/bin/sh
{extract_rid}
first_line=""
while IFS= read -r line; do
  case "$line" in
    *'"type":"hello"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"hello_ack","payload":{{"workspace_key":"ws-test-2"}},"request_id":"%s"}}\n' "$rid"
      ;;
    *'"type":"send_input"'*)
      if [ -z "$first_line" ]; then
        first_line="$line"
      else
        rid2=$(extract_rid "$line")
        rid1=$(extract_rid "$first_line")
        printf '{{"v":1,"type":"ok","payload":{{"result":{{"order":"second"}}}},"request_id":"%s"}}\n' "$rid2"
        printf '{{"v":1,"type":"ok","payload":{{"result":{{"order":"first"}}}},"request_id":"%s"}}\n' "$rid1"
      fi
      ;;
  esac
done
"#,
        extract_rid = EXTRACT_RID
    );
    let binary = write_script(&dir, "fake-broker", &script);

    let client = ProtocolClient::new(options_for(&binary));
    client.start().await.expect("hello handshake should succeed");

    let (first, second) = tokio::join!(
        client.send_input("agent-a", "task a"),
        client.send_input("agent-b", "task b"),
    );

    assert_eq!(first.expect("first request should resolve")["order"], "first");
    assert_eq!(second.expect("second request should resolve")["order"], "second");
}

#[tokio::test]
async fn unexpected_broker_exit_fails_pending_request_and_then_running_requests() {
    let dir = TempDir::new().expect("temp dir");
    let script = format!(
        r#"#!/bin/sh
{extract_rid}
while IFS= read -r line; do
  case "$line" in
    *'"type":"hello"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"hello_ack","payload":{{"workspace_key":"ws-test-3"}},"request_id":"%s"}}\n' "$rid"
      ;;
    *'"type":"get_status"'*)
      echo "fatal: broker crashed" >&2
      exit 7
      ;;
  esac
done
"#,
        extract_rid = EXTRACT_RID
    );
    let binary = write_script(&dir, "fake-broker", &script);

    let client = ProtocolClient::new(options_for(&binary));

    let stderr_lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let stderr_for_listener = stderr_lines.clone();
    let _unsub = client.on_broker_stderr(move |line| {
        stderr_for_listener.lock().unwrap().push(line.to_string());
    });

    client.start().await.expect("hello handshake should succeed");

    let err = client
        .get_status()
        .await
        .expect_err("request in flight when the broker exits should fail");
    assert!(err.is_process_error());
    if let ClientError::ProcessExited { last_stderr_line, .. } = &err {
        assert_eq!(last_stderr_line.as_deref(), Some("fatal: broker crashed"));
    } else {
        panic!("expected ProcessExited, got {err:?}");
    }

    client.wait_for_exit().await;
    assert!(!client.is_running());

    for _ in 0..50 {
        if !stderr_lines.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        stderr_lines.lock().unwrap().as_slice(),
        &["fatal: broker crashed".to_string()]
    );

    // A request made after the broker is known to have exited fails fast
    // rather than hanging for the full request timeout.
    let err = client
        .get_status()
        .await
        .expect_err("request after exit should fail immediately");
    assert!(matches!(err, ClientError::NotRunning));
}

#[tokio::test]
async fn explicit_binary_path_that_does_not_exist_is_rejected_before_spawning() {
    let dir = TempDir::new().expect("temp dir");
    let missing = dir.path().join("does-not-exist");
    let client = ProtocolClient::new(options_for(&missing.to_string_lossy()));

    let err = client.start().await.expect_err("missing binary should fail fast");
    assert!(matches!(err, ClientError::BinaryNotFound { .. }));
    assert!(!client.is_running());
}
