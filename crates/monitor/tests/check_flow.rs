use async_trait::async_trait;
use pretty_assertions::assert_eq;
use scriptwatch_diff::Strategy;
use scriptwatch_monitor::{
    cancellation, ChannelSink, CheckOrchestrator, CheckStage, ConfigError, FetchError,
    FetchedContent, Fetcher, MonitorConfig, MonitoredResource, RecordPolicy, StaticRegistry,
};
use scriptwatch_store::{ResourceId, Store, StoreOptions};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Response {
    Body(String),
    Status(u16),
    Hang,
}

/// Per-URL queue of responses; the last one repeats.
#[derive(Default)]
struct ScriptedFetcher {
    responses: Mutex<HashMap<String, VecDeque<Response>>>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedFetcher {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn script(self, id: &str, responses: Vec<Response>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url_of(id), responses.into());
        self
    }

    fn next(&self, url: &str) -> Response {
        let mut map = self.responses.lock().unwrap();
        let queue = map.get_mut(url).expect("unscripted url");
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self.next(url);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            Response::Body(text) => Ok(FetchedContent {
                bytes: text.into_bytes(),
                content_type: Some("application/javascript; charset=utf-8".into()),
            }),
            Response::Status(status) => Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
            Response::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(FetchError::Client("hang elapsed".into()))
            }
        }
    }
}

fn url_of(id: &str) -> String {
    format!("https://cdn.example/{id}.js")
}

fn body(text: &str) -> Response {
    Response::Body(text.to_string())
}

fn rid(id: &str) -> ResourceId {
    ResourceId::new(id).unwrap()
}

fn test_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.fetch.max_retries = 0;
    config.fetch.timeout_ms = 2_000;
    config
}

struct Harness {
    temp: TempDir,
    orchestrator: CheckOrchestrator,
    fetcher: Arc<ScriptedFetcher>,
}

async fn harness(resources: &[(&str, bool)], config: MonitorConfig, fetcher: ScriptedFetcher) -> Harness {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open(temp.path(), config.store_options()).await.unwrap();
    let registry = StaticRegistry::new(
        resources
            .iter()
            .map(|(id, active)| MonitoredResource {
                id: rid(id),
                url: url_of(id),
                active: *active,
            })
            .collect(),
    );
    let fetcher = Arc::new(fetcher);
    let orchestrator =
        CheckOrchestrator::new(config, store, Arc::new(registry), fetcher.clone()).unwrap();
    Harness {
        temp,
        orchestrator,
        fetcher,
    }
}

#[tokio::test]
async fn first_check_stores_a_baseline() {
    let fetcher = ScriptedFetcher::default().script("main", vec![body("var a=1;")]);
    let h = harness(&[("main", true)], test_config(), fetcher).await;

    let result = h.orchestrator.run_check(&rid("main")).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert!(!result.changed);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.diff_id, None);
    assert_eq!(result.version_sequence, Some(1));
    assert_eq!(result.stage, CheckStage::Done);

    let store = h.orchestrator.store();
    assert_eq!(store.versions.list_versions(&rid("main")).await.unwrap().len(), 1);
    assert!(store.changes.list(&rid("main")).await.unwrap().is_empty());

    let status = store.status.read(&rid("main")).await.unwrap().unwrap();
    assert_eq!(status.last_outcome.unwrap().version_sequence, Some(1));
    assert!(status.last_error.is_none());
    assert!(status.last_success_at_unix_ms.is_some());
}

#[tokio::test]
async fn byte_identical_checks_are_idempotent() {
    let fetcher = ScriptedFetcher::default().script("main", vec![body("function f(){return 1;}")]);
    let h = harness(&[("main", true)], test_config(), fetcher).await;

    for _ in 0..3 {
        let result = h.orchestrator.run_check(&rid("main")).await;
        assert!(result.is_ok());
        assert!(!result.changed);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.version_sequence, Some(1));
    }

    let store = h.orchestrator.store();
    assert_eq!(store.versions.list_versions(&rid("main")).await.unwrap().len(), 1);
    assert!(store.changes.list(&rid("main")).await.unwrap().is_empty());
}

#[tokio::test]
async fn modified_literal_is_reported_and_notified() {
    let fetcher =
        ScriptedFetcher::default().script("main", vec![body("var a=1;"), body("var a=2;")]);
    let h = harness(&[("main", true)], test_config(), fetcher).await;
    let (sink, mut events) = ChannelSink::channel(8);
    let orchestrator = h.orchestrator.clone().with_sink(Arc::new(sink));

    orchestrator.run_check(&rid("main")).await;
    let result = orchestrator.run_check(&rid("main")).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert!(result.changed);
    assert!(result.confidence > 0.0);
    assert_eq!(result.strategy, Some(Strategy::Structural));
    assert_eq!(result.stats.unwrap().modified, 1);
    assert_eq!(result.version_sequence, Some(2));
    let diff_id = result.diff_id.clone().unwrap();
    assert_eq!(diff_id.to_string(), "main-1-2");

    let store = orchestrator.store();
    let record = store.changes.get(&diff_id).await.unwrap();
    assert!(record.changed);
    assert_eq!((record.base_version, record.new_version), (1, 2));
    let artifact = store.changes.artifact(&diff_id).await.unwrap();
    assert!(artifact.content_type.starts_with("text/html"));
    assert_eq!(artifact.content_hash(), record.artifact.sha256);

    let event = events.try_recv().unwrap();
    assert_eq!(event.diff_id, diff_id);
    assert_eq!(event.url, url_of("main"));
    assert_eq!(event.summary.modified, 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn trailing_newline_is_recorded_as_unchanged() {
    let fetcher =
        ScriptedFetcher::default().script("main", vec![body("var a=1;"), body("var a=1;\n")]);
    let h = harness(&[("main", true)], test_config(), fetcher).await;
    let (sink, mut events) = ChannelSink::channel(8);
    let orchestrator = h.orchestrator.clone().with_sink(Arc::new(sink));

    orchestrator.run_check(&rid("main")).await;
    let result = orchestrator.run_check(&rid("main")).await;
    assert!(result.is_ok());
    assert!(!result.changed);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.version_sequence, Some(2));

    let diff_id = result.diff_id.unwrap();
    let record = orchestrator.store().changes.get(&diff_id).await.unwrap();
    assert!(!record.changed);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn changed_only_policy_skips_unchanged_records() {
    let mut config = test_config();
    config.record_policy = RecordPolicy::ChangedOnly;
    let fetcher = ScriptedFetcher::default().script(
        "main",
        vec![body("var a=1;"), body("var a=1;\n"), body("var a=3;\n")],
    );
    let h = harness(&[("main", true)], config, fetcher).await;

    h.orchestrator.run_check(&rid("main")).await;
    let unchanged = h.orchestrator.run_check(&rid("main")).await;
    assert!(!unchanged.changed);
    assert_eq!(unchanged.diff_id, None);
    assert!(h.orchestrator.store().changes.list(&rid("main")).await.unwrap().is_empty());

    let changed = h.orchestrator.run_check(&rid("main")).await;
    assert!(changed.changed);
    assert_eq!(changed.diff_id.unwrap().to_string(), "main-2-3");
}

#[tokio::test]
async fn fetch_timeout_writes_no_version() {
    let mut config = test_config();
    config.fetch.timeout_ms = 30;
    let fetcher = ScriptedFetcher::default().script("slow", vec![Response::Hang]);
    let h = harness(&[("slow", true)], config, fetcher).await;

    let result = h.orchestrator.run_check(&rid("slow")).await;
    assert_eq!(result.stage, CheckStage::Errored);
    assert_eq!(result.failed_stage, Some(CheckStage::Fetching));
    assert_eq!(result.error_kind.as_deref(), Some("fetch_timeout"));
    assert!(!result.changed);

    let store = h.orchestrator.store();
    assert!(store.versions.list_versions(&rid("slow")).await.unwrap().is_empty());
    let status = store.status.read(&rid("slow")).await.unwrap().unwrap();
    assert_eq!(status.last_error.unwrap().stage, "fetching");
    assert!(status.last_outcome.is_none());
}

#[tokio::test]
async fn failed_check_keeps_last_outcome() {
    let fetcher =
        ScriptedFetcher::default().script("main", vec![body("var a=1;"), Response::Status(503)]);
    let h = harness(&[("main", true)], test_config(), fetcher).await;

    assert!(h.orchestrator.run_check(&rid("main")).await.is_ok());
    let failed = h.orchestrator.run_check(&rid("main")).await;
    assert_eq!(failed.error_kind.as_deref(), Some("fetch"));

    let status = h
        .orchestrator
        .store()
        .status
        .read(&rid("main"))
        .await
        .unwrap()
        .unwrap();
    assert!(status.last_error.unwrap().message.contains("503"));
    assert_eq!(status.last_outcome.unwrap().version_sequence, Some(1));
    assert!(status.last_success_at_unix_ms.is_some());
}

#[tokio::test]
async fn batch_isolates_failures_and_skips_inactive() {
    let fetcher = ScriptedFetcher::default()
        .script("a", vec![body("var a=1;")])
        .script("b", vec![Response::Status(404)])
        .script("c", vec![body("var c=1;")]);
    let h = harness(
        &[("a", true), ("b", true), ("c", true), ("d", false)],
        test_config(),
        fetcher,
    )
    .await;

    let results = h.orchestrator.run_check_all().await.unwrap();
    let ids: Vec<String> = results.iter().map(|r| r.resource_id.to_string()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(results[0].is_ok());
    assert_eq!(results[1].error_kind.as_deref(), Some("fetch"));
    assert!(results[2].is_ok());
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn batch_respects_max_concurrency() {
    let mut config = test_config();
    config.max_concurrency = 2;
    let names: Vec<String> = (0..8).map(|i| format!("r{i}")).collect();
    let mut fetcher = ScriptedFetcher::with_delay(Duration::from_millis(20));
    for name in &names {
        fetcher = fetcher.script(name, vec![body(&format!("var {name}=1;"))]);
    }
    let resources: Vec<(&str, bool)> = names.iter().map(|n| (n.as_str(), true)).collect();
    let h = harness(&resources, config, fetcher).await;

    let results = h.orchestrator.run_check_all().await.unwrap();
    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(h.fetcher.peak.load(Ordering::SeqCst) <= 2);

    let snapshot = h.orchestrator.concurrency();
    assert_eq!(snapshot.limit, 2);
    assert!(snapshot.peak_in_flight <= 2);
    assert_eq!(snapshot.in_flight, 0);
}

#[tokio::test]
async fn cancelled_checks_write_nothing() {
    let fetcher = ScriptedFetcher::default().script("main", vec![body("var a=1;")]);
    let h = harness(&[("main", true)], test_config(), fetcher).await;
    let (handle, token) = cancellation();
    handle.cancel();
    let orchestrator = h.orchestrator.clone().with_cancel(token);

    let result = orchestrator.run_check(&rid("main")).await;
    assert_eq!(result.error_kind.as_deref(), Some("cancelled"));
    assert!(orchestrator
        .store()
        .versions
        .list_versions(&rid("main"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unknown_resources_are_rejected_without_side_effects() {
    let fetcher = ScriptedFetcher::default();
    let h = harness(&[("main", true)], test_config(), fetcher).await;

    let result = h.orchestrator.run_check(&rid("ghost")).await;
    assert_eq!(result.error_kind.as_deref(), Some("registry"));
    assert_eq!(result.failed_stage, None);
    assert!(h.orchestrator.store().resources().await.unwrap().is_empty());
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retention_applies_through_checks() {
    let mut config = test_config();
    config.retention.max_versions_per_resource = 2;
    let bodies = (1..=4).map(|i| body(&format!("var a={i};"))).collect();
    let fetcher = ScriptedFetcher::default().script("main", bodies);
    let h = harness(&[("main", true)], config, fetcher).await;

    for _ in 0..4 {
        assert!(h.orchestrator.run_check(&rid("main")).await.is_ok());
    }
    let sequences: Vec<u64> = h
        .orchestrator
        .store()
        .versions
        .list_versions(&rid("main"))
        .await
        .unwrap()
        .iter()
        .map(|v| v.sequence)
        .collect();
    assert_eq!(sequences, vec![4, 3]);
    assert_eq!(h.orchestrator.store().changes.list(&rid("main")).await.unwrap().len(), 3);
}

#[tokio::test]
async fn mismatched_store_retention_fails_fast() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open(temp.path(), StoreOptions::default()).await.unwrap();
    let mut config = test_config();
    config.retention.max_versions_per_resource = 2;
    let err = CheckOrchestrator::new(
        config,
        store,
        Arc::new(StaticRegistry::default()),
        Arc::new(ScriptedFetcher::default()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[tokio::test]
async fn change_survives_a_failed_record_write() {
    let fetcher =
        ScriptedFetcher::default().script("main", vec![body("var a=1;"), body("var a=2;")]);
    let h = harness(&[("main", true)], test_config(), fetcher).await;
    let (sink, mut events) = ChannelSink::channel(8);
    let orchestrator = h.orchestrator.clone().with_sink(Arc::new(sink));
    assert!(orchestrator.run_check(&rid("main")).await.is_ok());

    // A plain file where the change log directory belongs
    let changes_dir = h.temp.path().join("resources").join("main").join("changes");
    std::fs::write(&changes_dir, b"blocked").unwrap();

    let failed = orchestrator.run_check(&rid("main")).await;
    assert_eq!(failed.error_kind.as_deref(), Some("storage"));
    assert_eq!(failed.failed_stage, Some(CheckStage::Persisting));
    assert!(!failed.changed);
    let sequences: Vec<u64> = orchestrator
        .store()
        .versions
        .list_versions(&rid("main"))
        .await
        .unwrap()
        .iter()
        .map(|meta| meta.sequence)
        .collect();
    assert_eq!(sequences, vec![1]);
    assert!(events.try_recv().is_err());

    std::fs::remove_file(&changes_dir).unwrap();
    let retried = orchestrator.run_check(&rid("main")).await;
    assert!(retried.is_ok(), "{:?}", retried.error);
    assert!(retried.changed);
    assert!(retried.confidence > 0.0);
    assert_eq!(retried.diff_id.as_ref().unwrap().to_string(), "main-1-3");

    let event = events.try_recv().unwrap();
    assert_eq!(event.diff_id.to_string(), "main-1-3");
    let record = orchestrator
        .store()
        .changes
        .get(retried.diff_id.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!((record.base_version, record.new_version), (1, 3));
}
