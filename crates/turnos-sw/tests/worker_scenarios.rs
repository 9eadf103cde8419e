//! End-to-end scenarios for the Turnos worker over in-memory hosts.

use std::sync::Arc;

use http::{Method, StatusCode};
use serde_json::json;
use turnos_common::FixedClock;
use turnos_sw::fetch::ResponseSource;
use turnos_sw::{
    CachePolicy, CacheProvider, Capabilities, ClickOutcome, Client, EventOutcome, FetchEvent,
    FetchOutcome, LifecycleEvent, MemoryCacheStorage, MemoryClients, MemoryNetwork,
    MemoryNotifications, MessageEvent, MessageOutcome, NotificationClickEvent, PushEvent,
    ReplyPort, Request, ServiceWorker, ServiceWorkerError, WorkerConfig, WorkerEvent,
    WorkerState,
};
use url::Url;

const ORIGIN: &str = "http://localhost:9000";

fn url(path: &str) -> Url {
    Url::parse(&format!("{ORIGIN}{path}")).unwrap()
}

struct Host {
    caches: Arc<MemoryCacheStorage>,
    network: Arc<MemoryNetwork>,
    notifications: Arc<MemoryNotifications>,
    clients: Arc<MemoryClients>,
    worker: ServiceWorker,
    events: tokio::sync::mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl Host {
    fn new(config: WorkerConfig) -> Self {
        Self::with_clients(config, MemoryClients::new())
    }

    fn with_clients(config: WorkerConfig, clients: MemoryClients) -> Self {
        let clock = Arc::new(FixedClock::new(1_700_000_000_000));
        let caches = Arc::new(MemoryCacheStorage::with_clock(clock.clone()));
        let network = Arc::new(MemoryNetwork::new());
        let notifications = Arc::new(MemoryNotifications::new());
        let clients = Arc::new(clients);

        for precached in config.precache_requests().unwrap() {
            network.route(precached.as_str(), format!("precached {}", precached.path()));
        }

        let caps = Capabilities::new(
            caches.clone(),
            network.clone(),
            notifications.clone(),
            clients.clone(),
        )
        .with_clock(clock);
        let (worker, events) = ServiceWorker::new(config, caps).unwrap();

        Self {
            caches,
            network,
            notifications,
            clients,
            worker,
            events,
        }
    }

    async fn started(config: WorkerConfig) -> Self {
        let host = Self::new(config);
        host.worker.start().await.unwrap();
        host
    }

    async fn fetch(&self, request: Request) -> FetchOutcome {
        match self
            .worker
            .dispatch(WorkerEvent::Fetch(FetchEvent::new(request)))
            .await
            .unwrap()
        {
            EventOutcome::Fetch(outcome) => outcome,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}

// ==================== install / activate ====================

#[tokio::test]
async fn install_precaches_every_url() {
    let host = Host::new(WorkerConfig::default());

    let outcome = host.worker.dispatch(WorkerEvent::Install).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Installed));
    assert_eq!(host.worker.state().await, WorkerState::Installed);

    let urls = host.caches.urls("turnos-admin-v2.0").await.unwrap();
    assert_eq!(
        urls,
        vec![
            url("/api/turnos_semana").to_string(),
            url("/manifest.json").to_string(),
            url("/mobile").to_string(),
            url("/static/icon-192.png").to_string(),
            url("/static/icon-512.png").to_string(),
        ]
    );
}

#[tokio::test]
async fn install_requests_skip_waiting() {
    let mut host = Host::new(WorkerConfig::default());
    host.worker.dispatch(WorkerEvent::Install).await.unwrap();

    let mut saw_skip = false;
    while let Ok(event) = host.events.try_recv() {
        if matches!(event, LifecycleEvent::SkipWaiting { .. }) {
            saw_skip = true;
        }
    }
    assert!(saw_skip);
}

#[tokio::test]
async fn install_is_all_or_nothing() {
    let host = Host::new(WorkerConfig::default());
    host.network
        .route_status(url("/static/icon-512.png").as_str(), StatusCode::NOT_FOUND);

    let result = host.worker.dispatch(WorkerEvent::Install).await;
    match result {
        Err(ServiceWorkerError::InstallFailed { url: failed, reason }) => {
            assert_eq!(failed, url("/static/icon-512.png").to_string());
            assert_eq!(reason, "status 404");
        }
        other => panic!("expected install failure, got {other:?}"),
    }

    assert!(host.caches.urls("turnos-admin-v2.0").await.unwrap().is_empty());
    assert_eq!(host.worker.state().await, WorkerState::Redundant);
    assert!(host.worker.dispatch(WorkerEvent::Activate).await.is_err());
}

#[tokio::test]
async fn install_fails_when_offline() {
    let host = Host::new(WorkerConfig::default());
    host.network.set_offline(true);

    let result = host.worker.start().await;
    assert!(matches!(result, Err(ServiceWorkerError::InstallFailed { .. })));
    assert!(!host.worker.is_active().await);
}

#[tokio::test]
async fn activate_deletes_only_stale_caches() {
    let host = Host::new(WorkerConfig::default());
    host.caches.open("turnos-admin-v1.2").await.unwrap();
    host.caches.open("turnos-admin-v1.0").await.unwrap();

    host.clients
        .add(Client::window("page-1", url("/mobile")))
        .await;

    host.worker.dispatch(WorkerEvent::Install).await.unwrap();
    let outcome = host.worker.dispatch(WorkerEvent::Activate).await.unwrap();

    let EventOutcome::Activated(report) = outcome else {
        panic!("expected activation report");
    };
    assert_eq!(report.deleted, vec!["turnos-admin-v1.0", "turnos-admin-v1.2"]);
    assert_eq!(host.caches.keys().await.unwrap(), vec!["turnos-admin-v2.0"]);
    assert!(host.worker.is_active().await);
    assert!(host.clients.get("page-1").await.unwrap().controlled);
}

// ==================== fetch ====================

#[tokio::test]
async fn cached_get_skips_network() {
    let host = Host::started(WorkerConfig::default()).await;
    let before = host.network.request_count();

    let outcome = host.fetch(Request::get(url("/manifest.json"))).await;
    assert_eq!(outcome.source(), Some(ResponseSource::Cache));

    let mut response = outcome.response().unwrap();
    assert_eq!(response.text().unwrap(), "precached /manifest.json");
    assert_eq!(host.network.request_count(), before);
}

#[tokio::test]
async fn non_get_is_not_intercepted() {
    let host = Host::started(WorkerConfig::default()).await;
    let before = host.network.request_count();

    for method in [Method::POST, Method::PUT, Method::DELETE] {
        let request = Request::get(url("/api/turnos")).with_method(method);
        assert!(matches!(host.fetch(request).await, FetchOutcome::NotIntercepted));
    }
    assert_eq!(host.network.request_count(), before);
}

#[tokio::test]
async fn fetch_before_activation_is_not_intercepted() {
    let host = Host::new(WorkerConfig::default());
    host.worker.dispatch(WorkerEvent::Install).await.unwrap();

    let outcome = host.fetch(Request::get(url("/manifest.json"))).await;
    assert!(matches!(outcome, FetchOutcome::NotIntercepted));
}

#[tokio::test]
async fn selective_write_through_for_cacheable_paths() {
    let host = Host::started(WorkerConfig::default()).await;
    host.network
        .route_json(url("/api/turnos_hoy").as_str(), &json!({"turnos": []}));
    host.network.route(url("/static/app.css").as_str(), "body {}");
    host.network.route(url("/login").as_str(), "<form>");

    for path in ["/api/turnos_hoy", "/static/app.css", "/login"] {
        let outcome = host.fetch(Request::get(url(path))).await;
        assert_eq!(outcome.source(), Some(ResponseSource::Network));
        let mut response = outcome.response().unwrap();
        assert!(!response.text().unwrap().is_empty());
    }

    let cached = host.caches.urls("turnos-admin-v2.0").await.unwrap();
    assert!(cached.contains(&url("/api/turnos_hoy").to_string()));
    assert!(cached.contains(&url("/static/app.css").to_string()));
    assert!(!cached.contains(&url("/login").to_string()));

    // Second request is served from cache even while offline.
    host.network.set_offline(true);
    let outcome = host.fetch(Request::get(url("/api/turnos_hoy"))).await;
    assert_eq!(outcome.source(), Some(ResponseSource::Cache));
    let mut response = outcome.response().unwrap();
    assert_eq!(
        response.json_body::<serde_json::Value>().unwrap(),
        json!({"turnos": []})
    );
}

#[tokio::test]
async fn write_through_skips_errors_and_cross_origin() {
    let host = Host::started(WorkerConfig::default()).await;
    host.network
        .route_status(url("/api/roto").as_str(), StatusCode::INTERNAL_SERVER_ERROR);
    host.network
        .route_cross_origin(url("/static/cdn.js").as_str(), "cdn");

    let outcome = host.fetch(Request::get(url("/api/roto"))).await;
    assert_eq!(
        outcome.response().unwrap().status,
        StatusCode::INTERNAL_SERVER_ERROR
    );
    host.fetch(Request::get(url("/static/cdn.js"))).await;

    let cached = host.caches.urls("turnos-admin-v2.0").await.unwrap();
    assert!(!cached.contains(&url("/api/roto").to_string()));
    assert!(!cached.contains(&url("/static/cdn.js").to_string()));
}

#[tokio::test]
async fn pass_through_policy_never_writes() {
    let config = WorkerConfig::default().with_policy(CachePolicy::PassThrough);
    let host = Host::started(config).await;
    host.network
        .route_json(url("/api/turnos_hoy").as_str(), &json!({"turnos": []}));

    let outcome = host.fetch(Request::get(url("/api/turnos_hoy"))).await;
    assert_eq!(outcome.response().unwrap().status, StatusCode::OK);

    let cached = host.caches.urls("turnos-admin-v2.0").await.unwrap();
    assert!(!cached.contains(&url("/api/turnos_hoy").to_string()));
}

#[tokio::test]
async fn offline_navigation_serves_offline_page() {
    let host = Host::started(WorkerConfig::default()).await;
    host.network.set_offline(true);

    let outcome = host.fetch(Request::navigate(url("/admin/turnos"))).await;
    assert_eq!(outcome.source(), Some(ResponseSource::OfflinePage));
    let mut response = outcome.response().unwrap();
    assert_eq!(response.text().unwrap(), "precached /mobile");
}

#[tokio::test]
async fn offline_navigation_without_offline_page_is_network_error() {
    let host = Host::started(WorkerConfig::default()).await;
    assert!(host.caches.delete("turnos-admin-v2.0").await.unwrap());
    host.network.set_offline(true);

    let outcome = host.fetch(Request::navigate(url("/admin/turnos"))).await;
    assert!(matches!(outcome, FetchOutcome::NetworkError));
}

#[tokio::test]
async fn offline_api_gets_503_json() {
    let host = Host::started(WorkerConfig::default()).await;
    host.network.set_offline(true);

    let outcome = host.fetch(Request::get(url("/api/turnos_hoy?fecha=2024-05-01"))).await;
    assert_eq!(outcome.source(), Some(ResponseSource::OfflineApi));

    let mut response = outcome.response().unwrap();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.content_type(), Some("application/json"));
    assert_eq!(
        response.text().unwrap(),
        r#"{"success":false,"error":"Sin conexión","offline":true}"#
    );
}

#[tokio::test]
async fn offline_other_request_is_network_error() {
    let host = Host::started(WorkerConfig::default()).await;
    host.network.set_offline(true);

    let outcome = host.fetch(Request::get(url("/static/nuevo.js"))).await;
    assert!(matches!(outcome, FetchOutcome::NetworkError));
}

// ==================== push / click ====================

#[tokio::test]
async fn push_without_payload_shows_defaults() {
    let host = Host::started(WorkerConfig::default()).await;

    let outcome = host
        .worker
        .dispatch(WorkerEvent::Push(PushEvent::empty()))
        .await
        .unwrap();
    let EventOutcome::Push(descriptor) = outcome else {
        panic!("expected push outcome");
    };

    assert_eq!(descriptor.title, "🔔 TurnosBot Admin");
    let actions: Vec<_> = descriptor.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec!["view", "dismiss"]);
    assert_eq!(host.notifications.displayed().await, vec![descriptor]);
}

#[tokio::test]
async fn push_with_payload_uses_its_fields() {
    let host = Host::started(WorkerConfig::default()).await;

    host.worker
        .dispatch(WorkerEvent::Push(PushEvent::with_json(
            &json!({"title": "X", "body": "Y", "url": "/z"}),
        )))
        .await
        .unwrap();

    let displayed = host.notifications.displayed().await;
    assert_eq!(displayed.len(), 1);
    assert_eq!(displayed[0].title, "X");
    assert_eq!(displayed[0].body, "Y");
    assert_eq!(displayed[0].data.url, "/z");
    assert_eq!(displayed[0].data.timestamp, Some(1_700_000_000_000));
}

#[tokio::test]
async fn push_with_garbage_still_shows_notification() {
    let host = Host::started(WorkerConfig::default()).await;

    let outcome = host
        .worker
        .dispatch(WorkerEvent::Push(PushEvent::with_data("\u{0}\u{1}garbage")))
        .await;
    assert!(outcome.is_ok());
    assert_eq!(host.notifications.displayed().await.len(), 1);
}

async fn shown_notification(host: &Host, payload: serde_json::Value) -> NotificationClickEvent {
    let EventOutcome::Push(descriptor) = host
        .worker
        .dispatch(WorkerEvent::Push(PushEvent::with_json(&payload)))
        .await
        .unwrap()
    else {
        panic!("expected push outcome");
    };
    NotificationClickEvent {
        notification: descriptor,
        action: None,
    }
}

#[tokio::test]
async fn click_dismiss_only_closes() {
    let host = Host::started(WorkerConfig::default()).await;
    let mut click = shown_notification(&host, json!({"url": "/mobile"})).await;
    click.action = Some("dismiss".to_string());

    let outcome = host
        .worker
        .dispatch(WorkerEvent::NotificationClick(click))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::NotificationClick(ClickOutcome::Dismissed)
    ));
    assert!(host.notifications.displayed().await.is_empty());
    assert!(host.clients.is_empty().await);
}

#[tokio::test]
async fn click_focuses_existing_panel_window() {
    let host = Host::started(WorkerConfig::default()).await;
    host.clients
        .add(Client::window("other", Url::parse("https://example.com/").unwrap()))
        .await;
    host.clients
        .add(Client::window("panel", url("/mobile")))
        .await;

    let click = shown_notification(&host, json!({"url": "/mobile#turnos"})).await;
    let outcome = host
        .worker
        .dispatch(WorkerEvent::NotificationClick(click))
        .await
        .unwrap();

    match outcome {
        EventOutcome::NotificationClick(ClickOutcome::Focused(client)) => {
            assert_eq!(client.id, "panel");
            assert!(client.focused);
        }
        other => panic!("expected focus, got {other:?}"),
    }
    assert_eq!(host.clients.len().await, 2);
    assert!(host.notifications.displayed().await.is_empty());
}

#[tokio::test]
async fn click_opens_window_at_notification_url() {
    let host = Host::started(WorkerConfig::default()).await;
    let mut click = shown_notification(&host, json!({"url": "/mobile#turno-17"})).await;
    click.action = Some("view".to_string());

    let outcome = host
        .worker
        .dispatch(WorkerEvent::NotificationClick(click))
        .await
        .unwrap();

    match outcome {
        EventOutcome::NotificationClick(ClickOutcome::Opened(client)) => {
            assert_eq!(client.url, url("/mobile#turno-17"));
        }
        other => panic!("expected new window, got {other:?}"),
    }
}

#[tokio::test]
async fn click_without_window_support_opens_nothing() {
    let host = Host::with_clients(
        WorkerConfig::default(),
        MemoryClients::without_window_opening(),
    );
    host.worker.start().await.unwrap();
    let click = shown_notification(&host, json!({})).await;

    let outcome = host
        .worker
        .dispatch(WorkerEvent::NotificationClick(click))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::NotificationClick(ClickOutcome::NothingOpened)
    ));
}

// ==================== message ====================

#[tokio::test]
async fn get_version_replies_on_port() {
    let host = Host::started(WorkerConfig::default()).await;
    let (port, mut rx) = ReplyPort::channel();

    let outcome = host
        .worker
        .dispatch(WorkerEvent::Message(
            MessageEvent::new(json!({"type": "GET_VERSION"})).with_port(port),
        ))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        EventOutcome::Message(MessageOutcome::VersionSent(ref v)) if v == "turnos-admin-v2.0"
    ));
    assert_eq!(rx.recv().await, Some(json!({"version": "turnos-admin-v2.0"})));
}

#[tokio::test]
async fn get_version_to_closed_port_still_succeeds() {
    let host = Host::started(WorkerConfig::default()).await;
    let (port, rx) = ReplyPort::channel();
    drop(rx);

    let outcome = host
        .worker
        .dispatch(WorkerEvent::Message(
            MessageEvent::new(json!({"type": "GET_VERSION"})).with_port(port),
        ))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::Message(MessageOutcome::VersionSent(_))
    ));
}

#[tokio::test]
async fn get_version_without_port_is_ignored() {
    let host = Host::started(WorkerConfig::default()).await;
    let outcome = host
        .worker
        .dispatch(WorkerEvent::Message(MessageEvent::new(
            json!({"type": "GET_VERSION"}),
        )))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::Message(MessageOutcome::Ignored)
    ));
}

#[tokio::test]
async fn skip_waiting_message_promotes_installed_worker() {
    let host = Host::new(WorkerConfig::default().with_cache_name("turnos-admin-v2.1"));
    host.caches.open("turnos-admin-v2.0").await.unwrap();
    host.worker.dispatch(WorkerEvent::Install).await.unwrap();

    let outcome = host
        .worker
        .dispatch(WorkerEvent::Message(MessageEvent::new(
            json!({"type": "SKIP_WAITING"}),
        )))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        EventOutcome::Message(MessageOutcome::SkippedWaiting)
    ));
    assert!(host.worker.is_active().await);
    assert_eq!(host.caches.keys().await.unwrap(), vec!["turnos-admin-v2.1"]);
}

#[tokio::test]
async fn unknown_messages_are_ignored() {
    let host = Host::started(WorkerConfig::default()).await;
    for data in [json!({"type": "CLEAR"}), json!(null), json!([1, 2])] {
        let outcome = host
            .worker
            .dispatch(WorkerEvent::Message(MessageEvent::new(data)))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EventOutcome::Message(MessageOutcome::Ignored)
        ));
    }
    assert_eq!(host.worker.state().await, WorkerState::Activated);
}

#[tokio::test]
async fn skip_waiting_after_activation_is_a_noop() {
    let host = Host::started(WorkerConfig::default()).await;

    let outcome = host
        .worker
        .dispatch(WorkerEvent::Message(MessageEvent::new(
            json!({"type": "SKIP_WAITING"}),
        )))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::Message(MessageOutcome::SkippedWaiting)
    ));
    assert_eq!(host.worker.state().await, WorkerState::Activated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn skip_waiting_racing_activate_never_fails() {
    for _ in 0..20 {
        let host = Host::new(WorkerConfig::default());
        host.worker.dispatch(WorkerEvent::Install).await.unwrap();

        let (activate, message) = tokio::join!(
            host.worker.dispatch(WorkerEvent::Activate),
            host.worker.dispatch(WorkerEvent::Message(MessageEvent::new(
                json!({"type": "SKIP_WAITING"}),
            ))),
        );

        assert!(matches!(
            message,
            Ok(EventOutcome::Message(MessageOutcome::SkippedWaiting))
        ));
        // Whichever side lost the race sees a state error; the worker still activates once.
        if let Err(e) = activate {
            assert!(matches!(e, ServiceWorkerError::State(_)));
        }
        assert!(host.worker.is_active().await);
    }
}
