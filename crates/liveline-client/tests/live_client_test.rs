use chrono::Utc;
use liveline_client::{ClientConfig, ClientError, ConnectionStatus, Event, LiveClient, TransportMode};
use liveline_transport::testing::{poll_with, server_metrics, ApiCall, MockLiveApi, StreamEnd, StreamScript};
use liveline_transport::{CreateSessionResponse, ErrorKind, TransportError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const BASE_URL: &str = "http://events.test";

fn pull_only() -> ClientConfig {
    ClientConfig::new(BASE_URL).with_push(false)
}

fn client(config: ClientConfig, api: &Arc<MockLiveApi>) -> LiveClient {
    LiveClient::with_api(config, api.clone()).unwrap()
}

fn event(id: &str) -> Event {
    Event::new(id, "task.updated").with_field("id_echo", json!(id))
}

fn record_ids(client: &LiveClient, topic: &str) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.on(topic, move |payload: &Value| {
        let id = payload["id_echo"].as_str().or(payload["id"].as_str()).unwrap_or_default();
        sink.lock().unwrap().push(id.to_string());
    });
    seen
}

fn record_statuses(client: &LiveClient) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for topic in ["connecting", "connected", "reconnecting", "disconnected", "error"] {
        let sink = seen.clone();
        client.on(topic, move |payload: &Value| {
            sink.lock().unwrap().push(payload["status"].as_str().unwrap_or_default().to_string());
        });
    }
    seen
}

async fn wait_for_status(client: &LiveClient, status: ConnectionStatus) {
    for _ in 0..2_000 {
        if client.connection_state().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!(
        "Expected status {}, still {}",
        status,
        client.connection_state().status
    );
}

fn network_error() -> TransportError {
    TransportError::network("connection refused")
}

fn count(api: &MockLiveApi, matches: impl Fn(&ApiCall) -> bool) -> usize {
    api.count(matches)
}

#[tokio::test(start_paused = true)]
async fn test_clean_pull_connect() {
    let api = Arc::new(MockLiveApi::new());
    let client = client(pull_only(), &api);

    assert!(client.connect().await.unwrap());

    let state = client.connection_state();
    assert_eq!(state.mode, TransportMode::Pull);
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.session_id.as_deref(), Some("pull-1"));
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_push_disabled_never_touches_stream_endpoint() {
    let api = Arc::new(MockLiveApi::new());
    let client = client(pull_only(), &api);

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(count(&api, |c| *c == ApiCall::ConnectStream), 0);
    assert_eq!(count(&api, |c| matches!(c, ApiCall::OpenStream(_))), 0);
    assert_eq!(api.calls()[0], ApiCall::CreateSession);
}

#[tokio::test(start_paused = true)]
async fn test_push_connect_preferred() {
    let api = Arc::new(MockLiveApi::new());
    let client = client(ClientConfig::new(BASE_URL), &api);

    assert!(client.connect().await.unwrap());
    assert_eq!(client.connection_state().mode, TransportMode::Push);
    assert_eq!(count(&api, |c| *c == ApiCall::CreateSession), 0);
}

#[tokio::test(start_paused = true)]
async fn test_push_failure_falls_back_to_pull() {
    let api = Arc::new(MockLiveApi::new());
    api.fail_stream_connect(network_error());
    let client = client(ClientConfig::new(BASE_URL), &api);
    let statuses = record_statuses(&client);

    assert!(client.connect().await.unwrap());
    assert_eq!(client.connection_state().mode, TransportMode::Pull);
    assert_eq!(*statuses.lock().unwrap(), vec!["connecting", "connected"]);
}

#[tokio::test(start_paused = true)]
async fn test_push_failure_without_fallback_is_error() {
    let api = Arc::new(MockLiveApi::new());
    api.fail_stream_connect(network_error());
    let client = client(ClientConfig::new(BASE_URL).with_auto_fallback(false), &api);

    assert!(!client.connect().await.unwrap());
    assert_eq!(client.connection_state().status, ConnectionStatus::Error);
    assert_eq!(count(&api, |c| *c == ApiCall::CreateSession), 0);
}

#[tokio::test(start_paused = true)]
async fn test_both_transports_failing_returns_false() {
    let api = Arc::new(MockLiveApi::new());
    api.fail_stream_connect(network_error());
    api.fail_create_session(TransportError::new(ErrorKind::ServerError, "HTTP 503"));
    let client = client(ClientConfig::new(BASE_URL), &api);
    let statuses = record_statuses(&client);

    assert!(!client.connect().await.unwrap());
    assert_eq!(client.connection_state().status, ConnectionStatus::Error);
    assert_eq!(*statuses.lock().unwrap(), vec!["connecting", "error"]);
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failure_is_returned() {
    let api = Arc::new(MockLiveApi::new());
    api.fail_create_session(TransportError::new(ErrorKind::AuthenticationError, "HTTP 401"));
    let client = client(pull_only(), &api);

    match client.connect().await {
        Err(ClientError::Transport(e)) => assert_eq!(e.kind, ErrorKind::AuthenticationError),
        other => panic!("Expected authentication error, got {:?}", other),
    }
    assert_eq!(client.connection_state().status, ConnectionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_poll_batch_delivered_in_order() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_poll_events(vec![event("A"), event("B"), event("C")]);
    let client = client(pull_only(), &api);
    let seen = record_ids(&client, "task.updated");

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["A", "B", "C"]);
    let buffered: Vec<String> = client.buffered_events(10).into_iter().map(|e| e.id).collect();
    assert_eq!(buffered, vec!["A", "B", "C"]);
}

#[tokio::test(start_paused = true)]
async fn test_handlers_receive_connection_state() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_poll_events(vec![event("A").with_field("progress", json!(40))]);
    let client = client(pull_only(), &api);

    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = payloads.clone();
    client.on("task.updated", move |payload: &Value| sink.lock().unwrap().push(payload.clone()));

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let payloads = payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["progress"], 40);
    assert_eq!(payloads[0]["connection_state"]["status"], "connected");
    assert_eq!(payloads[0]["connection_state"]["mode"], "pull");
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_events_reach_subscribers_once() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_poll_events(vec![event("A")]);
    api.queue_poll_events(vec![event("A"), event("B")]);
    let client = client(pull_only(), &api);
    let seen = record_ids(&client, "*");

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["A", "B"]);
    assert_eq!(client.buffered_events(10).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_buffer_keeps_most_recent() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_poll_events(vec![event("1"), event("2"), event("3"), event("4")]);
    let client = client(pull_only().with_max_buffer_size(3), &api);

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let ids: Vec<String> = client.buffered_events(10).into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["2", "3", "4"]);
}

#[tokio::test(start_paused = true)]
async fn test_push_stream_batches_delivered() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_stream(Ok(StreamScript::batches(
        vec![vec![event("s1"), event("s2")], vec![event("s2"), event("s3")]],
        StreamEnd::Pending,
    )));
    let client = client(ClientConfig::new(BASE_URL), &api);
    let seen = record_ids(&client, "task.updated");

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["s1", "s2", "s3"]);
    assert_eq!(client.connection_state().consecutive_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stream_end_reopens_without_error() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_stream(Ok(StreamScript::batches(vec![vec![event("a")]], StreamEnd::Close)));
    api.queue_stream(Ok(StreamScript::batches(vec![vec![event("b")]], StreamEnd::Pending)));
    let client = client(ClientConfig::new(BASE_URL), &api);
    let seen = record_ids(&client, "task.updated");

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    assert_eq!(count(&api, |c| matches!(c, ApiCall::OpenStream(_))), 2);
    let state = client.connection_state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.consecutive_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_sweeps_stale_events() {
    let api = Arc::new(MockLiveApi::new());
    let stale = event("old").with_created_at(Utc::now() - chrono::Duration::hours(2));
    api.queue_poll_events(vec![stale, event("fresh")]);
    let config = pull_only()
        .with_cleanup_interval(Duration::from_secs(10))
        .with_max_event_age(Duration::from_secs(3_600));
    let client = client(config, &api);

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.buffered_events(10).len(), 2);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let ids: Vec<String> = client.buffered_events(10).into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["fresh"]);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_isolated_failures_retry_in_place() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_poll(Err(network_error()));
    api.queue_poll(Err(network_error()));
    let client = client(pull_only(), &api);

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = client.connection_state();
    assert_eq!(state.consecutive_errors, 1);
    assert!(state.backoff_factor > 1.0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let state = client.connection_state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.consecutive_errors, 0);
    assert_eq!(state.session_id.as_deref(), Some("pull-1"));
    assert_eq!(count(&api, |c| *c == ApiCall::CreateSession), 1);
}

#[tokio::test(start_paused = true)]
async fn test_error_ceiling() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_create_session(Ok(CreateSessionResponse {
        success: true,
        session_id: Some("first".to_string()),
        error: None,
    }));
    api.fail_create_session(network_error());
    api.set_poll_fallback(Err(network_error()));

    let config = pull_only().with_fallback_threshold(3).with_max_retries(5);
    let client = client(config, &api);
    let statuses = record_statuses(&client);

    assert!(client.connect().await.unwrap());
    wait_for_status(&client, ConnectionStatus::Reconnecting).await;
    assert_eq!(count(&api, |c| matches!(c, ApiCall::Poll(_))), 3);

    wait_for_status(&client, ConnectionStatus::Error).await;
    assert_eq!(count(&api, |c| *c == ApiCall::CreateSession), 6);
    assert_eq!(client.connection_state().retry_count, 5);
    assert_eq!(
        *statuses.lock().unwrap(),
        vec!["connecting", "connected", "reconnecting", "error"]
    );

    // No further automatic attempts
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(count(&api, |c| *c == ApiCall::CreateSession), 6);
    assert_eq!(client.connection_state().status, ConnectionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_recovers_on_pull() {
    let api = Arc::new(MockLiveApi::new());
    for _ in 0..3 {
        api.queue_poll(Err(network_error()));
    }
    let client = client(pull_only(), &api);
    let statuses = record_statuses(&client);

    client.connect().await.unwrap();
    wait_for_status(&client, ConnectionStatus::Reconnecting).await;
    wait_for_status(&client, ConnectionStatus::Connected).await;

    let state = client.connection_state();
    assert_eq!(state.session_id.as_deref(), Some("pull-2"));
    assert_eq!(state.retry_count, 1);
    assert_eq!(
        *statuses.lock().unwrap(),
        vec!["connecting", "connected", "reconnecting", "connected"]
    );
    // The abandoned session is deleted
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(api.calls().contains(&ApiCall::DeleteSession("pull-1".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_pull_reconnect_does_not_retry_push() {
    let api = Arc::new(MockLiveApi::new());
    api.fail_stream_connect(network_error());
    for _ in 0..3 {
        api.queue_poll(Err(network_error()));
    }
    let client = client(ClientConfig::new(BASE_URL), &api);

    client.connect().await.unwrap();
    assert_eq!(count(&api, |c| *c == ApiCall::ConnectStream), 1);

    wait_for_status(&client, ConnectionStatus::Reconnecting).await;
    wait_for_status(&client, ConnectionStatus::Connected).await;
    assert_eq!(client.connection_state().mode, TransportMode::Pull);
    assert_eq!(count(&api, |c| *c == ApiCall::ConnectStream), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_poll_error_skips_reconnect() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_poll(Err(TransportError::new(ErrorKind::AuthenticationError, "HTTP 403")));
    let client = client(pull_only(), &api);

    client.connect().await.unwrap();
    wait_for_status(&client, ConnectionStatus::Error).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(count(&api, |c| *c == ApiCall::CreateSession), 1);
    let state = client.connection_state();
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.consecutive_errors, 0);
    assert_eq!(state.backoff_factor, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_error_resets_counters() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_create_session(Err(network_error()));
    let client = client(pull_only(), &api);

    assert!(!client.connect().await.unwrap());
    assert_eq!(client.connection_state().status, ConnectionStatus::Error);

    assert!(client.connect().await.unwrap());
    let state = client.connection_state();
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.consecutive_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_polling_and_tolerates_slow_delete() {
    let api = Arc::new(MockLiveApi::new());
    api.delay_delete_session(Duration::from_secs(600));
    let client = client(pull_only(), &api);
    let statuses = record_statuses(&client);

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let started = tokio::time::Instant::now();
    client.disconnect().await;
    assert!(started.elapsed() <= Duration::from_secs(6));

    let polls = count(&api, |c| matches!(c, ApiCall::Poll(_)));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(count(&api, |c| matches!(c, ApiCall::Poll(_))), polls);
    assert_eq!(count(&api, |c| matches!(c, ApiCall::Heartbeat(_))), 0);

    let state = client.connection_state();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert!(state.session_id.is_none());
    assert_eq!(statuses.lock().unwrap().last().map(String::as_str), Some("disconnected"));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_swallows_delete_failure() {
    let api = Arc::new(MockLiveApi::new());
    api.fail_delete_session(network_error());
    let client = client(pull_only(), &api);

    client.connect().await.unwrap();
    client.disconnect().await;

    assert_eq!(client.connection_state().status, ConnectionStatus::Disconnected);
    assert_eq!(count(&api, |c| matches!(c, ApiCall::DeleteSession(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_is_terminal() {
    let api = Arc::new(MockLiveApi::new());
    api.queue_poll_events(vec![event("A")]);
    let client = client(pull_only(), &api);
    record_ids(&client, "task.updated");

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.buffered_events(10).len(), 1);

    client.destroy().await;

    assert!(client.buffered_events(10).is_empty());
    assert_eq!(client.subscriber_count(), 0);
    assert!(matches!(client.connect().await, Err(ClientError::Destroyed)));
    assert!(matches!(client.send_heartbeat().await, Err(ClientError::Destroyed)));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_failures_are_advisory() {
    let api = Arc::new(MockLiveApi::new());
    api.fail_heartbeats(network_error());
    let client = client(pull_only(), &api);

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(95)).await;

    assert_eq!(count(&api, |c| matches!(c, ApiCall::Heartbeat(_))), 3);
    let state = client.connection_state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.consecutive_errors, 0);

    let err = assert_err!(client.send_heartbeat().await);
    assert!(matches!(err, ClientError::Transport(ref e) if e.kind == ErrorKind::NetworkError));
}

#[tokio::test(start_paused = true)]
async fn test_send_heartbeat_without_session() {
    let api = Arc::new(MockLiveApi::new());
    let client = client(pull_only(), &api);

    assert!(!assert_ok!(client.send_heartbeat().await));
    assert_ok!(client.connect().await);
    assert!(assert_ok!(client.send_heartbeat().await));
    assert!(api.calls().contains(&ApiCall::Heartbeat("pull-1".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_health_check_and_local_snapshot() {
    let api = Arc::new(MockLiveApi::new());
    let client = client(pull_only(), &api);

    let remote = client.health_check().await.unwrap();
    assert_eq!(remote.status, "healthy");

    api.fail_health(network_error());
    assert!(client.health_check().await.is_none());

    assert_eq!(client.health_snapshot().status, "disconnected");
    client.connect().await.unwrap();
    let local = client.health_snapshot();
    assert_eq!(local.status, "healthy");
    assert_eq!(local.connected_consumers, 1);
    assert_eq!(local.buffer_stats.capacity, 1000);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_and_server_metrics() {
    let api = Arc::new(MockLiveApi::new());
    let mut response = poll_with(vec![event("A")]);
    response.metrics = Some(server_metrics(2));
    api.queue_poll(Ok(response));
    api.queue_poll(Err(network_error()));
    let client = client(pull_only().with_include_metrics(true), &api);

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let metrics = client.service_metrics();
    assert_eq!(metrics.requests_count, 3);
    assert_eq!(metrics.success_count, 2);
    assert_eq!(metrics.error_count, 1);
    assert_eq!(client.server_metrics(), Some(json!({"active_sessions": 2})));

    client.reset_metrics();
    assert_eq!(client.service_metrics().requests_count, 0);
}
