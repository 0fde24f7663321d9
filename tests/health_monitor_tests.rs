//! Health monitor and notification dispatcher tests against a mocked
//! remote layer. Probe cycles are driven by calling `tick` directly; the
//! interval loop shares that code path.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use switchboard::config::{HealthMonitorConfig, NotificationsConfig, RpcConfig};
use switchboard::health::HealthMonitor;
use switchboard::models::{HealthResult, HealthStatus};
use switchboard::notify::{DesktopNotifier, LogDesktopNotifier, NotificationDispatcher};
use switchboard::prefs::PreferenceStore;
use switchboard::rpc::HttpRpcClient;
use chrono::Utc;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rpc_for(server: &MockServer) -> Arc<HttpRpcClient> {
    let base = Url::parse(&server.uri()).unwrap();
    let mut rpc_config = RpcConfig::default();
    // Keep failed-probe tests fast.
    rpc_config.retry_max_attempts = 1;
    Arc::new(HttpRpcClient::with_base(&base, &rpc_config, Uuid::new_v4()).unwrap())
}

fn dispatcher_for(
    rpc: Arc<HttpRpcClient>,
    dir: &std::path::Path,
    desktop: Box<dyn DesktopNotifier>,
) -> Arc<NotificationDispatcher> {
    let prefs = PreferenceStore::new(&NotificationsConfig {
        preferences_path: Some(dir.join("prefs.json")),
        recipient_email: Some("ops@example.com".to_string()),
    });
    Arc::new(NotificationDispatcher::new(
        rpc,
        prefs,
        desktop,
        Some("ops@example.com".to_string()),
    ))
}

fn probe_body(connector_id: Uuid, status: &str) -> serde_json::Value {
    let (healthy, degraded, unhealthy) = match status {
        "healthy" => (1, 0, 0),
        "degraded" => (0, 1, 0),
        _ => (0, 0, 1),
    };
    json!({
        "success": true,
        "summary": {"total": 1, "healthy": healthy, "degraded": degraded, "unhealthy": unhealthy},
        "results": [{
            "connectorId": connector_id,
            "connectorSlug": "github",
            "connectorName": "GitHub",
            "status": status,
            "latencyMs": 42,
            "checkedAt": Utc::now(),
        }],
    })
}

/// Mount a probe response that is served exactly once, in mount order.
async fn mount_probe_once(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/rpc/health-probe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

fn result(connector_id: Uuid, status: HealthStatus) -> HealthResult {
    HealthResult {
        connector_id,
        connector_slug: "github".to_string(),
        connector_name: "GitHub".to_string(),
        status,
        latency_ms: Some(42),
        error: None,
        checked_at: Utc::now(),
    }
}

#[tokio::test]
async fn hysteresis_notifies_only_on_degradation() {
    let server = MockServer::start().await;
    let connector_id = Uuid::new_v4();
    for status in ["healthy", "degraded", "unhealthy", "degraded", "healthy"] {
        mount_probe_once(&server, probe_body(connector_id, status)).await;
    }
    let alert_mock = Mock::given(method("POST"))
        .and(path("/rpc/dispatch-alert"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"sent": 1, "results": []})),
        )
        // healthy→degraded and degraded→unhealthy; nothing else.
        .expect(2)
        .mount_as_scoped(&server)
        .await;

    let rpc = rpc_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_for(rpc.clone(), dir.path(), Box::new(LogDesktopNotifier));
    let monitor = HealthMonitor::new(rpc, dispatcher, &HealthMonitorConfig::default());

    for _ in 0..5 {
        monitor.tick().await;
    }

    drop(alert_mock);
}

#[tokio::test]
async fn first_observation_is_never_a_transition() {
    let server = MockServer::start().await;
    let connector_id = Uuid::new_v4();
    // First cycle observes an already-unhealthy connector.
    mount_probe_once(&server, probe_body(connector_id, "unhealthy")).await;
    Mock::given(method("POST"))
        .and(path("/rpc/dispatch-alert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sent": 0, "results": []})))
        .expect(0)
        .mount(&server)
        .await;

    let rpc = rpc_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_for(rpc.clone(), dir.path(), Box::new(LogDesktopNotifier));
    let monitor = HealthMonitor::new(rpc, dispatcher, &HealthMonitorConfig::default());

    monitor.tick().await;
    assert_eq!(monitor.latest().await.len(), 1);
}

#[tokio::test]
async fn failed_probe_retains_previous_results() {
    let server = MockServer::start().await;
    let connector_id = Uuid::new_v4();
    mount_probe_once(&server, probe_body(connector_id, "healthy")).await;
    // Every later probe fails.
    Mock::given(method("POST"))
        .and(path("/rpc/health-probe"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let rpc = rpc_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_for(rpc.clone(), dir.path(), Box::new(LogDesktopNotifier));
    let monitor = HealthMonitor::new(rpc, dispatcher, &HealthMonitorConfig::default());

    monitor.tick().await;
    assert_eq!(monitor.latest().await.len(), 1);

    monitor.tick().await;
    // One missed poll never empties the board.
    let latest = monitor.latest().await;
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].status, HealthStatus::Healthy);
}

#[tokio::test]
async fn all_healthy_input_short_circuits_dispatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc/dispatch-alert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sent": 1, "results": []})))
        .expect(0)
        .mount(&server)
        .await;

    let rpc = rpc_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_for(rpc, dir.path(), Box::new(LogDesktopNotifier));

    let outcome = dispatcher
        .send_health_alerts(&[
            result(Uuid::new_v4(), HealthStatus::Healthy),
            result(Uuid::new_v4(), HealthStatus::Unknown),
        ])
        .await;

    assert_eq!(outcome.sent, 0);
    assert_eq!(outcome.failed, 0);
}

#[tokio::test]
async fn alerts_go_out_as_one_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc/dispatch-alert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sent": 2, "results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let rpc = rpc_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_for(rpc, dir.path(), Box::new(LogDesktopNotifier));

    let outcome = dispatcher
        .send_health_alerts(&[
            result(Uuid::new_v4(), HealthStatus::Degraded),
            result(Uuid::new_v4(), HealthStatus::Unhealthy),
            result(Uuid::new_v4(), HealthStatus::Healthy),
        ])
        .await;

    assert_eq!(outcome.sent, 2);
    assert_eq!(outcome.failed, 0);

    // The healthy entry was filtered out of the single batched request.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let batch: Vec<serde_json::Value> = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0]["recipientEmail"], "ops@example.com");
}

#[tokio::test]
async fn dispatch_failure_is_reported_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc/dispatch-alert"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let rpc = rpc_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_for(rpc, dir.path(), Box::new(LogDesktopNotifier));

    let outcome = dispatcher
        .send_health_alerts(&[result(Uuid::new_v4(), HealthStatus::Unhealthy)])
        .await;

    assert_eq!(outcome.sent, 0);
    assert_eq!(outcome.failed, 1);
}

struct CountingNotifier {
    grant: bool,
    permission_requests: AtomicUsize,
    shown: AtomicUsize,
}

impl DesktopNotifier for CountingNotifier {
    fn request_permission(&self) -> bool {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        self.grant
    }

    fn notify(&self, _title: &str, _body: &str) {
        self.shown.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn desktop_notifications_are_gated_by_opt_in() {
    let server = MockServer::start().await;
    let rpc = rpc_for(&server);
    let dir = tempfile::tempdir().unwrap();

    let notifier = Arc::new(CountingNotifier {
        grant: true,
        permission_requests: AtomicUsize::new(0),
        shown: AtomicUsize::new(0),
    });

    struct Forward(Arc<CountingNotifier>);
    impl DesktopNotifier for Forward {
        fn request_permission(&self) -> bool {
            self.0.request_permission()
        }
        fn notify(&self, title: &str, body: &str) {
            self.0.notify(title, body);
        }
    }

    let dispatcher = dispatcher_for(rpc, dir.path(), Box::new(Forward(Arc::clone(&notifier))));
    let degraded = [result(Uuid::new_v4(), HealthStatus::Degraded)];

    // Off by default: nothing shown, no permission requested at startup.
    dispatcher.notify_desktop(&degraded);
    assert_eq!(notifier.shown.load(Ordering::SeqCst), 0);
    assert_eq!(notifier.permission_requests.load(Ordering::SeqCst), 0);

    // Permission is requested lazily on the first opt-in.
    assert!(dispatcher.set_desktop_opt_in(true).unwrap());
    assert_eq!(notifier.permission_requests.load(Ordering::SeqCst), 1);

    dispatcher.notify_desktop(&degraded);
    assert_eq!(notifier.shown.load(Ordering::SeqCst), 1);

    // The opt-in persisted for the next session.
    let prefs = PreferenceStore::new(&NotificationsConfig {
        preferences_path: Some(dir.path().join("prefs.json")),
        recipient_email: None,
    });
    assert!(prefs.load().desktop_health_alerts);
}

#[tokio::test]
async fn denied_permission_leaves_opt_in_off() {
    let server = MockServer::start().await;
    let rpc = rpc_for(&server);
    let dir = tempfile::tempdir().unwrap();

    let dispatcher = dispatcher_for(
        rpc,
        dir.path(),
        Box::new(CountingNotifier {
            grant: false,
            permission_requests: AtomicUsize::new(0),
            shown: AtomicUsize::new(0),
        }),
    );

    assert!(!dispatcher.set_desktop_opt_in(true).unwrap());
    assert!(!dispatcher.desktop_opt_in());
}
