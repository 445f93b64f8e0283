//! End-to-end behavior of the live stream: HTTP connector, transport,
//! router and supervisor together.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rollcall_core::{EventKind, LiveEvent, StreamError};
use rollcall_live::mock::MockConnector;
use rollcall_live::{
    ConnectionState, ConnectionSupervisor, HttpConnector, Topic, TransportConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Seen = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

fn record(seen: &Seen) -> impl Fn(&LiveEvent) -> anyhow::Result<()> + Send + Sync + 'static {
    let seen = Arc::clone(seen);
    move |e: &LiveEvent| {
        seen.lock().push((e.event_type().to_string(), e.data().clone()));
        Ok(())
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

const SSE_BODY: &str = concat!(
    ": connected\n\n",
    "data: {\"type\":\"attendance_scan\",\"data\":{\"employee_id\":\"E001\",\"action\":\"check_in\"}}\n\n",
    "data: {not json}\n\n",
    "data: {\"type\":\"employee_added\",\"data\":{\"employee_id\":\"E002\",\"name\":\"Ada\"}}\n\n",
    "data: {\"type\":\"device_offline\",\"data\":{}}\n\n",
);

#[tokio::test]
async fn http_stream_reaches_subscribers_and_reconnects_after_close() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(SSE_BODY),
        )
        .mount(&server)
        .await;

    let connector = HttpConnector::new(Duration::from_secs(2)).unwrap();
    let supervisor = ConnectionSupervisor::new(
        format!("{}/api/events/stream", server.uri()),
        Arc::new(connector),
        TransportConfig {
            reconnect_delay: Duration::from_millis(100),
            ..Default::default()
        },
    );
    let handle = supervisor.handle();

    let scans: Seen = Arc::default();
    let everything: Seen = Arc::default();
    let _a = handle.subscribe(Topic::Kind(EventKind::AttendanceScan), record(&scans));
    let _w = handle.subscribe(Topic::Any, record(&everything));
    handle.connect();

    eventually(|| everything.lock().len() >= 3).await;
    {
        let all = everything.lock();
        let types: Vec<&str> = all.iter().take(3).map(|(t, _)| t.as_str()).collect();
        assert_eq!(types, vec!["attendance_scan", "employee_added", "device_offline"]);
    }
    assert_eq!(scans.lock()[0].1["employee_id"], "E001");

    // Body ends, the server "closes", the transport comes back on its own.
    eventually(|| supervisor.stats().attempts >= 2).await;
    assert!(supervisor.stats().frames_malformed >= 1);
    assert!(server.received_requests().await.unwrap().len() >= 2);

    supervisor.shutdown();
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn server_error_keeps_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let supervisor = ConnectionSupervisor::new(
        format!("{}/api/events/stream", server.uri()),
        Arc::new(HttpConnector::new(Duration::from_secs(2)).unwrap()),
        TransportConfig {
            reconnect_delay: Duration::from_millis(50),
            ..Default::default()
        },
    );
    supervisor.handle().connect();

    eventually(|| supervisor.stats().reconnects_scheduled >= 3).await;
    assert_ne!(supervisor.handle().state(), ConnectionState::Open);
    supervisor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn scan_scenario_fires_only_matching_subscriber() {
    let mock = MockConnector::new();
    let feed = mock.push_live();
    let supervisor =
        ConnectionSupervisor::new("http://test/stream", Arc::new(mock.clone()), TransportConfig::default());
    let handle = supervisor.handle();

    let seen: Seen = Arc::default();
    let _a = handle.subscribe(Topic::Kind(EventKind::AttendanceScan), record(&seen));
    handle.connect();
    settle().await;

    feed.frame(r#"{"type":"attendance_scan","data":{"employee_id":"E001","action":"check_in"}}"#);
    feed.frame(r#"{"type":"employee_added","data":{"employee_id":"E002"}}"#);
    settle().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "attendance_scan");
    assert_eq!(
        seen[0].1,
        serde_json::json!({"employee_id": "E001", "action": "check_in"})
    );
}

#[tokio::test(start_paused = true)]
async fn two_views_on_employee_deleted() {
    let mock = MockConnector::new();
    let feed = mock.push_live();
    let supervisor =
        ConnectionSupervisor::new("http://test/stream", Arc::new(mock.clone()), TransportConfig::default());
    let roster = supervisor.handle();
    let audit = supervisor.handle();

    let roster_seen: Seen = Arc::default();
    let audit_seen: Seen = Arc::default();
    let roster_sub =
        roster.subscribe(Topic::Kind(EventKind::EmployeeDeleted), record(&roster_seen));
    let _audit_sub = audit.subscribe(Topic::Kind(EventKind::EmployeeDeleted), record(&audit_seen));
    roster.connect();
    audit.connect();
    settle().await;

    feed.frame(r#"{"type":"employee_deleted","data":{"employee_id":"E9"}}"#);
    settle().await;
    assert_eq!(roster_seen.lock().len(), 1);
    assert_eq!(audit_seen.lock().len(), 1);

    drop(roster_sub);
    feed.frame(r#"{"type":"employee_deleted","data":{"employee_id":"E10"}}"#);
    settle().await;
    assert_eq!(roster_seen.lock().len(), 1);
    assert_eq!(audit_seen.lock().len(), 2);
    assert_eq!(mock.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_then_recovery_without_duplicate_connections() {
    let mock = MockConnector::new();
    let first = mock.push_live();
    let second = mock.push_live();
    let supervisor = ConnectionSupervisor::new(
        "http://test/stream",
        Arc::new(mock.clone()),
        TransportConfig {
            reconnect_delay: Duration::from_secs(3),
            ..Default::default()
        },
    );
    let handle = supervisor.handle();
    let seen: Seen = Arc::default();
    let _w = handle.subscribe(Topic::Any, record(&seen));
    let mut states = handle.watch_state();
    handle.connect();
    settle().await;
    assert_eq!(*states.borrow_and_update(), ConnectionState::Open);

    first.frame(r#"{"type":"manual_checkout","data":{"employee_id":"E1"}}"#);
    first.fail(StreamError::Interrupted("connection reset".into()));
    settle().await;
    assert_eq!(*states.borrow_and_update(), ConnectionState::Failed);
    assert_eq!(mock.live_streams(), 0);

    // Nobody calls connect(); the transport retries by itself, once.
    tokio::time::advance(Duration::from_secs(3)).await;
    settle().await;
    assert_eq!(*states.borrow_and_update(), ConnectionState::Open);
    assert_eq!(mock.open_count(), 2);
    assert_eq!(mock.max_concurrent(), 1);

    second.frame(r#"{"type":"employee_added","data":{"employee_id":"E2"}}"#);
    settle().await;
    let types: Vec<String> = seen.lock().iter().map(|(t, _)| t.clone()).collect();
    assert_eq!(types, vec!["manual_checkout", "employee_added"]);
    assert_eq!(supervisor.stats().reconnects_scheduled, 1);
}
