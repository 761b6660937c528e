#![cfg(unix)]

//! Drives the `AgentRelay` facade against a fake broker script, the same
//! fake-subprocess pattern the protocol client's own integration tests use.
//! These tests exercise the event-dispatch table in `relay.rs`, including
//! the restart/death kinds, and the wait primitives built on top of it.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_relay::{AgentRelay, AgentStatus, ClientOptions, WaitOutcome};
use agent_relay_client::AgentSpec;
use tempfile::TempDir;

fn write_script(dir: &TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, body).expect("write fake broker script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path.to_string_lossy().into_owned()
}

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

async fn poll_until<F: Fn() -> bool>(check: F, attempts: u32) -> bool {
    for _ in 0..attempts {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn spawn_then_ready_and_first_message_resolve_and_exit_clears_the_handle() {
    let dir = TempDir::new().expect("temp dir");
    let script = format!(
        r#"#!/bin/sh
{extract_rid}
while IFS= read -r line; do
  case "$line" in
    *'"type":"hello"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"hello_ack","payload":{{"workspace_key":"ws-relay-1"}},"request_id":"%s"}}\n' "$rid"
      ;;
    *'"type":"spawn_agent"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"ok","payload":{{"result":{{"name":"Analyst"}}}},"request_id":"%s"}}\n' "$rid"
      (
        sleep 0.05
        printf '{{"v":1,"type":"event","payload":{{"kind":"worker_ready","name":"Analyst"}}}}\n'
        sleep 0.05
        printf '{{"v":1,"type":"event","payload":{{"kind":"relay_inbound","from":"Analyst","to":"human","text":"done"}}}}\n'
      ) &
      ;;
    *'"type":"release_agent"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"event","payload":{{"kind":"agent_exited","name":"Analyst","exit_code":0}}}}\n'
      printf '{{"v":1,"type":"ok","payload":{{"result":{{}}}},"request_id":"%s"}}\n' "$rid"
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

    let relay = AgentRelay::new(options_for(&binary));
    relay.start().await.expect("relay should start");

    let agent = relay
        .spawn_agent(AgentSpec::new("Analyst"), None, None, None)
        .await
        .expect("spawn_agent should succeed");

    relay
        .wait_for_agent_ready("Analyst", Some(Duration::from_secs(2)))
        .await
        .expect("agent should become ready");
    assert_eq!(agent.status(), Some(AgentStatus::Ready));

    relay
        .wait_for_agent_message("Analyst", Some(Duration::from_secs(2)))
        .await
        .expect("agent should send its first message");

    // Resolving a second time must hit the "already satisfied" fast path
    // rather than waiting on a fresh event.
    relay
        .wait_for_agent_ready("Analyst", Some(Duration::from_millis(50)))
        .await
        .expect("already-ready wait should resolve synchronously");

    let outcome = relay.client().release_agent("Analyst").await;
    outcome.expect("release_agent should succeed");

    let exited = poll_until(|| agent.status().is_none(), 50).await;
    assert!(exited, "agent handle should be removed once agent_exited dispatches");
    assert!(relay.known_agents().is_empty());

    relay.shutdown().await.expect("shutdown should succeed");
}

#[tokio::test]
async fn wait_for_agent_message_fails_if_the_agent_exits_first() {
    let dir = TempDir::new().expect("temp dir");
    let script = format!(
        r#"#!/bin/sh
{extract_rid}
while IFS= read -r line; do
  case "$line" in
    *'"type":"hello"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"hello_ack","payload":{{"workspace_key":"ws-relay-2"}},"request_id":"%s"}}\n' "$rid"
      ;;
    *'"type":"spawn_agent"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"ok","payload":{{"result":{{"name":"Ghost"}}}},"request_id":"%s"}}\n' "$rid"
      (
        sleep 0.05
        printf '{{"v":1,"type":"event","payload":{{"kind":"agent_exited","name":"Ghost","exit_code":1}}}}\n'
      ) &
      ;;
  esac
done
"#,
        extract_rid = EXTRACT_RID
    );
    let binary = write_script(&dir, "fake-broker", &script);

    let relay = AgentRelay::new(options_for(&binary));
    relay.start().await.expect("relay should start");
    relay
        .spawn_agent(AgentSpec::new("Ghost"), None, None, None)
        .await
        .expect("spawn_agent should succeed");

    let err = relay
        .wait_for_agent_message("Ghost", Some(Duration::from_secs(2)))
        .await
        .expect_err("agent exiting before a message should fail the wait");
    assert!(matches!(err, agent_relay::RelayError::ExitedBeforeMessage { name } if name == "Ghost"));
}

#[tokio::test]
async fn shutdown_resolves_outstanding_exit_waiters_as_released() {
    let dir = TempDir::new().expect("temp dir");
    let script = format!(
        r#"#!/bin/sh
{extract_rid}
while IFS= read -r line; do
  case "$line" in
    *'"type":"hello"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"hello_ack","payload":{{"workspace_key":"ws-relay-3"}},"request_id":"%s"}}\n' "$rid"
      ;;
    *'"type":"spawn_agent"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"ok","payload":{{"result":{{"name":"Lingering"}}}},"request_id":"%s"}}\n' "$rid"
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

    let relay = Arc::new(AgentRelay::new(options_for(&binary)));
    relay.start().await.expect("relay should start");
    relay
        .spawn_agent(AgentSpec::new("Lingering"), None, None, None)
        .await
        .expect("spawn_agent should succeed");

    let agent = relay.agent("Lingering");
    let relay_for_shutdown = relay.clone();
    let (wait_outcome, shutdown_result) = tokio::join!(
        agent.wait_for_exit(Some(Duration::from_secs(2))),
        async move { relay_for_shutdown.shutdown().await }
    );

    shutdown_result.expect("shutdown should succeed");
    assert_eq!(wait_outcome, WaitOutcome::Released);
}

#[tokio::test]
async fn restart_and_death_event_kinds_route_to_their_own_hooks() {
    let dir = TempDir::new().expect("temp dir");
    let script = format!(
        r#"#!/bin/sh
{extract_rid}
while IFS= read -r line; do
  case "$line" in
    *'"type":"hello"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"hello_ack","payload":{{"workspace_key":"ws-relay-4"}},"request_id":"%s"}}\n' "$rid"
      (
        sleep 0.05
        printf '{{"v":1,"type":"event","payload":{{"kind":"worker_error","name":"Flaky","message":"connection reset"}}}}\n'
        printf '{{"v":1,"type":"event","payload":{{"kind":"agent_restarting","name":"Flaky","attempt":2}}}}\n'
        printf '{{"v":1,"type":"event","payload":{{"kind":"agent_restarted","name":"Flaky"}}}}\n'
        printf '{{"v":1,"type":"event","payload":{{"kind":"agent_permanently_dead","name":"Flaky","reason":"max_restarts_exceeded"}}}}\n'
      ) &
      ;;
  esac
done
"#,
        extract_rid = EXTRACT_RID
    );
    let binary = write_script(&dir, "fake-broker", &script);

    let relay = AgentRelay::new(options_for(&binary));

    let worker_errors: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let restarting: Arc<Mutex<Vec<(String, Option<u64>)>>> = Arc::new(Mutex::new(Vec::new()));
    let restarted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let dead: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let we = worker_errors.clone();
    let _u1 = relay.on_worker_error(move |name, message| {
        we.lock().unwrap().push((name.to_string(), message.to_string()));
    });
    let rs = restarting.clone();
    let _u2 = relay.on_agent_restarting(move |name, attempt| {
        rs.lock().unwrap().push((name.to_string(), attempt));
    });
    let rd = restarted.clone();
    let _u3 = relay.on_agent_restarted(move |handle| {
        rd.lock().unwrap().push(handle.name.clone());
    });
    let de = dead.clone();
    let _u4 = relay.on_agent_permanently_dead(move |handle| {
        de.lock().unwrap().push(handle.name.clone());
    });

    relay.start().await.expect("relay should start");

    let all_fired = poll_until(
        || {
            !worker_errors.lock().unwrap().is_empty()
                && !restarting.lock().unwrap().is_empty()
                && !restarted.lock().unwrap().is_empty()
                && !dead.lock().unwrap().is_empty()
        },
        100,
    )
    .await;
    assert!(all_fired, "all four new event kinds should have dispatched");

    assert_eq!(
        worker_errors.lock().unwrap().as_slice(),
        &[("Flaky".to_string(), "connection reset".to_string())]
    );
    assert_eq!(restarting.lock().unwrap().as_slice(), &[("Flaky".to_string(), Some(2))]);
    assert_eq!(restarted.lock().unwrap().as_slice(), &["Flaky".to_string()]);
    assert_eq!(dead.lock().unwrap().as_slice(), &["Flaky".to_string()]);

    // `agent_permanently_dead` is a terminal removal, like `agent_exited`.
    assert!(relay.known_agents().is_empty());
}

#[tokio::test]
async fn per_agent_output_listener_only_sees_its_own_agent_and_stops_after_unsubscribe() {
    let dir = TempDir::new().expect("temp dir");
    let script = format!(
        r#"#!/bin/sh
{extract_rid}
while IFS= read -r line; do
  case "$line" in
    *'"type":"hello"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"hello_ack","payload":{{"workspace_key":"ws-relay-5"}},"request_id":"%s"}}\n' "$rid"
      ;;
    *'"type":"spawn_agent"'*)
      rid=$(extract_rid "$line")
      name=Analyst
      case "$line" in *'"name":"Other"'*) name=Other ;; esac
      printf '{{"v":1,"type":"ok","payload":{{"result":{{"name":"%s"}}}},"request_id":"%s"}}\n' "$name" "$rid"
      ;;
    *'"type":"send_input"'*)
      rid=$(extract_rid "$line")
      printf '{{"v":1,"type":"event","payload":{{"kind":"worker_stream","name":"Analyst","stream":"stdout","chunk":"hello"}}}}\n'
      printf '{{"v":1,"type":"event","payload":{{"kind":"worker_stream","name":"Other","stream":"stdout","chunk":"ignored"}}}}\n'
      printf '{{"v":1,"type":"ok","payload":{{}},"request_id":"%s"}}\n' "$rid"
      ;;
  esac
done
"#,
        extract_rid = EXTRACT_RID
    );
    let binary = write_script(&dir, "fake-broker", &script);

    let relay = AgentRelay::new(options_for(&binary));
    relay.start().await.expect("relay should start");
    relay
        .spawn_agent(AgentSpec::new("Analyst"), None, None, None)
        .await
        .expect("spawn_agent should succeed");
    relay
        .spawn_agent(AgentSpec::new("Other"), None, None, None)
        .await
        .expect("spawn_agent should succeed");

    let agent = relay.agent("Analyst");
    let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_for_listener = seen.clone();
    let unsubscribe = agent.on_output(move |stream, chunk| {
        seen_for_listener
            .lock()
            .unwrap()
            .push((stream.to_string(), chunk.to_string()));
    });

    relay
        .client()
        .send_input("Analyst", "go")
        .await
        .expect("send_input should succeed");

    let fired = poll_until(|| !seen.lock().unwrap().is_empty(), 100).await;
    assert!(fired, "per-agent listener should have seen its agent's chunk");
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[("stdout".to_string(), "hello".to_string())]
    );

    unsubscribe();
    seen.lock().unwrap().clear();

    relay
        .client()
        .send_input("Analyst", "go again")
        .await
        .expect("send_input should succeed");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        seen.lock().unwrap().is_empty(),
        "unsubscribed listener must not see further chunks"
    );
}
