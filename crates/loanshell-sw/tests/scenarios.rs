//! End-to-end scenarios driven through the event dispatcher.

use std::collections::BTreeSet;
use std::sync::Arc;

use loanshell_net::{Request, ResponseType, ScriptedFetcher, Url};
use loanshell_sw::{
    EventOutcome, LifecycleState, MemoryRegistry, MessageOutcome, Registry, ReplyPort,
    RequestKey, ResponseSource, ServiceWorker, SqliteRegistry, WorkerConfig, WorkerError,
    WorkerEvent,
};
use serde_json::json;

const ORIGIN: &str = "http://localhost:3000";

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn abs(path: &str) -> String {
    url(path).to_string()
}

fn shell_config(version: &str) -> WorkerConfig {
    WorkerConfig {
        version: version.to_string(),
        precache: vec![
            "/".to_string(),
            "/index.html".to_string(),
            "/manifest.json".to_string(),
        ],
        ..Default::default()
    }
}

fn serve_shell(fetcher: &ScriptedFetcher) {
    fetcher.respond(&abs("/"), 200, "A");
    fetcher.respond(&abs("/index.html"), 200, "B");
    fetcher.respond(&abs("/manifest.json"), 200, "C");
}

fn worker(
    config: WorkerConfig,
    registry: &Arc<MemoryRegistry>,
    fetcher: &Arc<ScriptedFetcher>,
) -> ServiceWorker {
    ServiceWorker::new(config, registry.clone(), fetcher.clone()).unwrap()
}

async fn fetch(worker: &ServiceWorker, request: Request) -> Result<EventOutcome, WorkerError> {
    worker.dispatch(WorkerEvent::Fetch(request)).await
}

fn routed(outcome: EventOutcome) -> loanshell_sw::RoutedResponse {
    match outcome {
        EventOutcome::Responded(routed) => routed,
        other => panic!("Expected a response, got {:?}", other),
    }
}

#[tokio::test]
async fn install_stores_every_manifest_entry() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    let worker = worker(shell_config("v1.0.0"), &registry, &fetcher);

    worker.dispatch(WorkerEvent::Install).await.unwrap();
    assert_eq!(worker.state(), LifecycleState::Active);

    let shell = registry.open("family-loan-tracker-v1.0.0").await.unwrap();
    for (path, body) in [("/", "A"), ("/index.html", "B"), ("/manifest.json", "C")] {
        let key = RequestKey::url_only(&url(path));
        let stored = registry.get(&shell, &key).await.unwrap().unwrap();
        assert_eq!(stored.text(), body, "{path}");
    }
}

#[tokio::test]
async fn failed_install_leaves_registry_untouched() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    fetcher.respond(&abs("/manifest.json"), 404, "not found");
    let worker = worker(shell_config("v1.0.0"), &registry, &fetcher);

    let err = worker.dispatch(WorkerEvent::Install).await.unwrap_err();
    match err {
        WorkerError::InstallFetchFailure { url, .. } => assert_eq!(url, abs("/manifest.json")),
        other => panic!("Expected install failure, got {:?}", other),
    }
    assert_eq!(worker.state(), LifecycleState::Failed);
    assert!(registry.list_generation_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn fetch_after_failed_install_publishes_nothing() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    fetcher.respond(&abs("/manifest.json"), 404, "not found");
    fetcher.respond(&abs("/app.js"), 200, "console.log('loans')");
    let worker = worker(shell_config("v1.0.0"), &registry, &fetcher);

    assert!(worker.dispatch(WorkerEvent::Install).await.is_err());
    assert_eq!(worker.state(), LifecycleState::Failed);

    let routed = routed(fetch(&worker, Request::get(url("/app.js"))).await.unwrap());
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.text(), "console.log('loans')");
    assert!(!routed.stored);
    assert!(registry.list_generation_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn precached_cdn_asset_served_without_network() {
    let cdn = "https://cdn.tailwindcss.com/3.4.0";
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(&abs("/"), 200, "A");
    fetcher.respond_with_type(cdn, 200, "tailwind", ResponseType::Cors);
    let config = WorkerConfig {
        precache: vec!["/".to_string(), cdn.to_string()],
        ..shell_config("v1.0.0")
    };
    let worker = worker(config, &registry, &fetcher);

    worker.dispatch(WorkerEvent::Install).await.unwrap();
    let shell = registry.open("family-loan-tracker-v1.0.0").await.unwrap();
    let cdn_url = Url::parse(cdn).unwrap();
    let stored = registry
        .get(&shell, &RequestKey::url_only(&cdn_url))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.text(), "tailwind");
    assert_eq!(stored.kind(), ResponseType::Cors);

    let before = fetcher.calls();
    let routed = routed(fetch(&worker, Request::get(cdn_url)).await.unwrap());
    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.text(), "tailwind");
    assert_eq!(fetcher.calls(), before);
    assert_eq!(fetcher.calls_for(cdn), 1);
}

#[tokio::test]
async fn failed_upgrade_keeps_previous_generation() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    worker(shell_config("v1.0.0"), &registry, &fetcher)
        .dispatch(WorkerEvent::Install)
        .await
        .unwrap();

    fetcher.fail(&abs("/index.html"));
    let next = worker(shell_config("v1.1.0"), &registry, &fetcher);
    assert!(next.dispatch(WorkerEvent::Install).await.is_err());

    assert_eq!(
        registry.list_generation_names().await.unwrap(),
        BTreeSet::from(["family-loan-tracker-v1.0.0".to_string()])
    );
}

#[tokio::test]
async fn activation_keeps_only_current_generations() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    fetcher.respond(&abs("/api/loans"), 200, "[]");

    let old = worker(shell_config("v1.0.0"), &registry, &fetcher);
    old.dispatch(WorkerEvent::Install).await.unwrap();
    fetch(&old, Request::get(url("/api/loans"))).await.unwrap();
    registry.open("someone-elses-cache").await.unwrap();

    let new = worker(shell_config("v2.0.0"), &registry, &fetcher);
    let outcome = new.dispatch(WorkerEvent::Install).await.unwrap();
    let report = match outcome {
        EventOutcome::Installed(report) => report,
        other => panic!("Expected install report, got {:?}", other),
    };
    let activation = report.activation.unwrap();
    assert_eq!(activation.deleted.len(), 3);

    assert_eq!(
        registry.list_generation_names().await.unwrap(),
        BTreeSet::from(["family-loan-tracker-v2.0.0".to_string()])
    );
}

#[tokio::test]
async fn data_fallback_returns_last_network_response() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let body = r#"[{"id":1,"borrower":"Sam","amount":250.0}]"#;
    serve_shell(&fetcher);
    fetcher.respond(&abs("/api/loans"), 200, body);
    let worker = worker(shell_config("v1.0.0"), &registry, &fetcher);
    worker.dispatch(WorkerEvent::Install).await.unwrap();

    let live = routed(fetch(&worker, Request::get(url("/api/loans"))).await.unwrap());
    assert_eq!(live.source, ResponseSource::Network);

    fetcher.go_offline();
    let cached = routed(fetch(&worker, Request::get(url("/api/loans"))).await.unwrap());
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.response.body(), live.response.body());
    assert_eq!(cached.response.body().as_ref(), body.as_bytes());
}

#[tokio::test]
async fn ping_is_served_from_cache_after_network_failure() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    fetcher.respond(&abs("/api/ping"), 200, "pong");
    let worker = worker(shell_config("v1.0.0"), &registry, &fetcher);
    worker.dispatch(WorkerEvent::Install).await.unwrap();

    fetch(&worker, Request::get(url("/api/ping"))).await.unwrap();
    fetcher.fail(&abs("/api/ping"));

    let routed = routed(fetch(&worker, Request::get(url("/api/ping"))).await.unwrap());
    assert_eq!(routed.response.text(), "pong");
    assert_eq!(routed.source, ResponseSource::Cache);
}

#[tokio::test]
async fn cached_shell_asset_skips_network() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    let worker = worker(shell_config("v1.0.0"), &registry, &fetcher);
    worker.dispatch(WorkerEvent::Install).await.unwrap();

    let before = fetcher.calls();
    let routed = routed(fetch(&worker, Request::get(url("/index.html"))).await.unwrap());
    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.text(), "B");

    // Query strings on the root document hit the same entry.
    let routed = crate::routed(
        fetch(&worker, Request::navigate(url("/?utm_source=homescreen")))
            .await
            .unwrap(),
    );
    assert_eq!(routed.response.text(), "A");
    assert_eq!(fetcher.calls(), before);
}

#[tokio::test]
async fn reinstall_is_idempotent() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    let config = WorkerConfig {
        skip_waiting_on_install: false,
        ..shell_config("v1.0.0")
    };
    let worker = worker(config, &registry, &fetcher);

    worker.dispatch(WorkerEvent::Install).await.unwrap();
    let shell = registry.open("family-loan-tracker-v1.0.0").await.unwrap();
    let first = registry.keys(&shell).await.unwrap();

    worker.dispatch(WorkerEvent::Install).await.unwrap();
    assert_eq!(worker.state(), LifecycleState::Waiting);
    assert_eq!(registry.keys(&shell).await.unwrap(), first);
    assert_eq!(first.len(), 3);
}

#[tokio::test]
async fn offline_navigation_gets_root_document() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    let worker = worker(shell_config("v1.0.0"), &registry, &fetcher);
    worker.dispatch(WorkerEvent::Install).await.unwrap();
    fetcher.go_offline();

    let routed = routed(
        fetch(&worker, Request::navigate(url("/loans/7")))
            .await
            .unwrap(),
    );
    assert_eq!(routed.source, ResponseSource::OfflineFallback);
    assert_eq!(routed.response.text(), "A");
}

#[tokio::test]
async fn get_version_replies_with_generation_name() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    let config = WorkerConfig {
        shell_cache_prefix: String::new(),
        data_cache_prefix: "data".to_string(),
        ..shell_config("v2")
    };
    let worker = worker(config, &registry, &fetcher);
    worker.dispatch(WorkerEvent::Install).await.unwrap();

    let (port, mut replies) = ReplyPort::channel();
    let outcome = worker
        .dispatch(WorkerEvent::Message {
            data: json!({"type": "GET_VERSION"}),
            ports: vec![port],
        })
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        EventOutcome::Message(MessageOutcome::Version { delivered: true, .. })
    ));
    assert_eq!(replies.recv().await, Some(json!({"version": "v2"})));
}

#[tokio::test]
async fn skip_waiting_message_activates() {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);
    let config = WorkerConfig {
        skip_waiting_on_install: false,
        ..shell_config("v1.0.0")
    };
    let worker = worker(config, &registry, &fetcher);
    worker.dispatch(WorkerEvent::Install).await.unwrap();
    assert_eq!(worker.state(), LifecycleState::Waiting);

    worker
        .dispatch(WorkerEvent::Message {
            data: json!({"type": "SKIP_WAITING"}),
            ports: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(worker.state(), LifecycleState::Active);

    let outcome = worker
        .dispatch(WorkerEvent::Message {
            data: json!({"type": "PING"}),
            ports: Vec::new(),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, EventOutcome::Message(MessageOutcome::Ignored)));
}

#[tokio::test]
async fn sqlite_registry_serves_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("caches.db");
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_shell(&fetcher);

    {
        let registry = Arc::new(SqliteRegistry::open_path(&path).unwrap());
        let worker = ServiceWorker::new(shell_config("v1.0.0"), registry, fetcher.clone()).unwrap();
        worker.dispatch(WorkerEvent::Install).await.unwrap();
    }

    fetcher.go_offline();
    let registry = Arc::new(SqliteRegistry::open_path(&path).unwrap());
    let worker = ServiceWorker::new(shell_config("v1.0.0"), registry, fetcher.clone()).unwrap();
    assert!(worker.resume().await.unwrap());
    assert_eq!(worker.state(), LifecycleState::Active);
    let routed = routed(fetch(&worker, Request::get(url("/manifest.json"))).await.unwrap());
    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.text(), "C");
}
