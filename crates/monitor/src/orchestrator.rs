use crate::cancel::CancelToken;
use crate::config::MonitorConfig;
use crate::error::{CheckError, ConfigError, Result};
use crate::events::{ChangeEvent, EventSink, LogSink};
use crate::fetch::{fetch_with_retry, Fetcher};
use crate::limiter::{CheckLimiter, ConcurrencySnapshot};
use crate::registry::{MonitoredResource, ResourceRegistry};
use scriptwatch_diff::{sha256_hex, ContentHint, DiffEngine, DiffError, DiffStats, Strategy};
use scriptwatch_store::{
    unix_now_ms, ArtifactRef, ChangeRecord, DiffId, LastError, LastOutcome, NewVersion,
    ResourceId, ResourceLocks, ResourceStatus, Store,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

const ARTIFACT_STEM: &str = "artifact";

/// Stages of one check, in order. `Errored` is reachable from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStage {
    Fetching,
    Normalizing,
    Parsing,
    Diffing,
    Scoring,
    Rendering,
    Persisting,
    Done,
    Errored,
}

impl CheckStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Normalizing => "normalizing",
            Self::Parsing => "parsing",
            Self::Diffing => "diffing",
            Self::Scoring => "scoring",
            Self::Rendering => "rendering",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check. `stage` is `Done` or `Errored`; on error
/// `failed_stage` names where it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub resource_id: ResourceId,
    pub changed: bool,
    pub confidence: f64,
    pub diff_id: Option<DiffId>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub strategy: Option<Strategy>,
    /// Node or line counts of the comparison, when one ran
    pub stats: Option<DiffStats>,
    pub version_sequence: Option<u64>,
    pub stage: CheckStage,
    pub failed_stage: Option<CheckStage>,
    pub duration_ms: u64,
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(
        resource_id: ResourceId,
        at: Option<CheckStage>,
        err: &CheckError,
        duration_ms: u64,
    ) -> Self {
        Self {
            resource_id,
            changed: false,
            confidence: 0.0,
            diff_id: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            strategy: None,
            stats: None,
            version_sequence: None,
            stage: CheckStage::Errored,
            failed_stage: at,
            duration_ms,
        }
    }
}

struct Completed {
    changed: bool,
    confidence: f64,
    diff_id: Option<DiffId>,
    strategy: Option<Strategy>,
    stats: Option<DiffStats>,
    version_sequence: u64,
}

impl Completed {
    fn unchanged(version_sequence: u64) -> Self {
        Self {
            changed: false,
            confidence: 0.0,
            diff_id: None,
            strategy: None,
            stats: None,
            version_sequence,
        }
    }
}

/// Logs transitions and observes cancellation between stages.
struct StageTracker<'a> {
    resource: &'a ResourceId,
    cancel: &'a CancelToken,
    stage: CheckStage,
}

impl<'a> StageTracker<'a> {
    fn start(resource: &'a ResourceId, cancel: &'a CancelToken) -> Self {
        log::debug!("{resource}: -> {}", CheckStage::Fetching);
        Self {
            resource,
            cancel,
            stage: CheckStage::Fetching,
        }
    }

    fn enter(&mut self, next: CheckStage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }
        log::debug!("{}: {} -> {}", self.resource, self.stage, next);
        self.stage = next;
        Ok(())
    }
}

/// Runs checks: fetch, compare against the latest stored version, persist,
/// notify. Holds its own concurrency limit and cancellation token; cloning
/// shares both.
#[derive(Clone)]
pub struct CheckOrchestrator {
    config: Arc<MonitorConfig>,
    engine: Arc<DiffEngine>,
    store: Store,
    registry: Arc<dyn ResourceRegistry>,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn EventSink>,
    limiter: CheckLimiter,
    check_locks: Arc<ResourceLocks>,
    cancel: CancelToken,
}

impl CheckOrchestrator {
    /// Validates the configuration and builds the diff engine. Fails before
    /// any check runs.
    pub fn new(
        config: MonitorConfig,
        store: Store,
        registry: Arc<dyn ResourceRegistry>,
        fetcher: Arc<dyn Fetcher>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        if store.versions.max_versions() != config.retention.max_versions_per_resource {
            return Err(ConfigError::Invalid(format!(
                "store keeps {} versions but retention asks for {}",
                store.versions.max_versions(),
                config.retention.max_versions_per_resource
            )));
        }
        let engine = DiffEngine::new(config.engine.clone())
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(Self {
            limiter: CheckLimiter::new(config.max_concurrency),
            config: Arc::new(config),
            engine: Arc::new(engine),
            store,
            registry,
            fetcher,
            sink: Arc::new(LogSink),
            check_locks: Arc::new(ResourceLocks::new()),
            cancel: CancelToken::never(),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn concurrency(&self) -> ConcurrencySnapshot {
        self.limiter.snapshot()
    }

    /// Check one registered resource.
    pub async fn run_check(&self, id: &ResourceId) -> CheckResult {
        let resource = match self.registry.get(id).await {
            Ok(Some(resource)) if resource.active => resource,
            Ok(Some(_)) => return self.rejected(id, CheckError::Inactive(id.to_string())),
            Ok(None) => return self.rejected(id, CheckError::UnknownResource(id.to_string())),
            Err(err) => return self.rejected(id, err.into()),
        };
        self.check_resource(resource).await
    }

    /// Check every active resource, at most `max_concurrency` at a time.
    /// Results follow registry order; one failure never aborts the batch.
    pub async fn run_check_all(&self) -> Result<Vec<CheckResult>> {
        let resources: Vec<MonitoredResource> = self
            .registry
            .list()
            .await?
            .into_iter()
            .filter(|r| r.active)
            .collect();
        log::info!(
            "Checking {} active resources (max {} at once)",
            resources.len(),
            self.config.max_concurrency
        );

        let mut tasks = JoinSet::new();
        for (idx, resource) in resources.iter().cloned().enumerate() {
            let this = self.clone();
            tasks.spawn(async move { (idx, this.check_resource(resource).await) });
        }

        let mut results: Vec<Option<CheckResult>> = (0..resources.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(err) => log::error!("Check task failed: {err}"),
            }
        }

        let results = resources
            .into_iter()
            .zip(results)
            .map(|(resource, result)| {
                result.unwrap_or_else(|| {
                    let err = CheckError::Task("check task did not complete".into());
                    CheckResult::failed(resource.id, None, &err, 0)
                })
            })
            .collect::<Vec<_>>();

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        let changed = results.iter().filter(|r| r.changed).count();
        log::info!(
            "Batch finished: {} checked, {changed} changed, {failed} failed",
            results.len()
        );
        Ok(results)
    }

    fn rejected(&self, id: &ResourceId, err: CheckError) -> CheckResult {
        log::warn!("{id}: {err}");
        CheckResult::failed(id.clone(), None, &err, 0)
    }

    async fn check_resource(&self, resource: MonitoredResource) -> CheckResult {
        let started = Instant::now();
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(err) => return self.rejected(&resource.id, err),
        };
        // Held for the whole read-compare-write so the stored base is always
        // the immediate predecessor of the version written here.
        let _guard = self.check_locks.lock(&resource.id).await;

        let mut tracker = StageTracker::start(&resource.id, &self.cancel);
        let outcome = self.execute(&resource, &mut tracker).await;
        let last_stage = tracker.stage;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match outcome {
            Ok(done) => {
                log::debug!("{}: {} -> {}", resource.id, last_stage, CheckStage::Done);
                log::info!(
                    "{}: changed={} confidence={:.3} version={} ({duration_ms}ms)",
                    resource.id,
                    done.changed,
                    done.confidence,
                    done.version_sequence
                );
                CheckResult {
                    resource_id: resource.id.clone(),
                    changed: done.changed,
                    confidence: done.confidence,
                    diff_id: done.diff_id,
                    error: None,
                    error_kind: None,
                    strategy: done.strategy,
                    stats: done.stats,
                    version_sequence: Some(done.version_sequence),
                    stage: CheckStage::Done,
                    failed_stage: None,
                    duration_ms,
                }
            }
            Err(err) => {
                log::debug!("{}: {} -> {}", resource.id, last_stage, CheckStage::Errored);
                if matches!(err, CheckError::Cancelled) {
                    log::info!("{}: cancelled during {last_stage}", resource.id);
                } else {
                    log::warn!("{}: check failed during {last_stage}: {err}", resource.id);
                }
                CheckResult::failed(resource.id.clone(), Some(last_stage), &err, duration_ms)
            }
        };

        self.record_status(&result).await;
        if let (true, Some(diff_id)) = (result.changed, &result.diff_id) {
            let event = ChangeEvent {
                resource_id: resource.id.clone(),
                url: resource.url.clone(),
                confidence: result.confidence,
                diff_id: diff_id.clone(),
                strategy: result.strategy.unwrap_or(Strategy::Fallback),
                summary: result.stats.unwrap_or_default(),
            };
            if let Err(err) = self.sink.emit(&event).await {
                log::warn!("{}: {err}", resource.id);
            }
        }
        result
    }

    async fn execute(
        &self,
        resource: &MonitoredResource,
        tracker: &mut StageTracker<'_>,
    ) -> Result<Completed> {
        let id = &resource.id;
        let fetched = fetch_with_retry(
            self.fetcher.as_ref(),
            &resource.url,
            &self.config.fetch,
            &self.cancel,
        )
        .await?;
        let fetched_at = unix_now_ms();

        tracker.enter(CheckStage::Normalizing)?;
        let raw_hash = sha256_hex(&fetched.bytes);
        if let Some(latest) = self.store.versions.latest_meta(id).await? {
            if latest.raw_hash == raw_hash {
                log::debug!("{id}: raw bytes match version {}", latest.sequence);
                return Ok(Completed::unchanged(latest.sequence));
            }
        }
        let previous = self.store.versions.get_latest(id).await?;

        let hint = ContentHint::from_content_type(fetched.content_type.as_deref());
        let new_text = String::from_utf8_lossy(&fetched.bytes).into_owned();
        let old_input = previous
            .as_ref()
            .map(|version| (version.text().into_owned(), version.meta.hint));
        let engine = Arc::clone(&self.engine);
        let (new_normalized, old_normalized) = blocking(move || {
            let new = engine.normalize(&new_text, hint);
            let old = old_input.map(|(text, old_hint)| (engine.normalize(&text, old_hint), old_hint));
            (new, old)
        })
        .await?;

        tracker.enter(CheckStage::Parsing)?;
        let engine = Arc::clone(&self.engine);
        let (new_payload, old_payload) = blocking(move || {
            let new = engine.analyze(new_normalized, hint)?;
            let old = match old_normalized {
                Some((normalized, old_hint)) => Some(engine.analyze(normalized, old_hint)?),
                None => None,
            };
            Ok::<_, DiffError>((new, old))
        })
        .await??;

        let new_version = NewVersion {
            raw_content: fetched.bytes,
            normalized_hash: new_payload.normalized_hash.clone(),
            hint,
            fetched_at_unix_ms: fetched_at,
        };

        let (Some(previous), Some(old_payload)) = (previous, old_payload) else {
            tracker.enter(CheckStage::Persisting)?;
            let stored = self.store.versions.put_version(id, new_version).await?;
            log::info!("{id}: stored baseline version {}", stored.sequence());
            return Ok(Completed::unchanged(stored.sequence()));
        };

        tracker.enter(CheckStage::Diffing)?;
        let engine = Arc::clone(&self.engine);
        let (old_payload, new_payload, diff) = blocking(move || {
            let diff = engine.diff(&old_payload, &new_payload);
            (old_payload, new_payload, diff)
        })
        .await?;

        tracker.enter(CheckStage::Scoring)?;
        let engine = Arc::clone(&self.engine);
        let (old_payload, new_payload, comparison) = blocking(move || {
            let comparison = engine.score(&old_payload, &new_payload, diff);
            (old_payload, new_payload, comparison)
        })
        .await?;
        let changed = comparison.score.changed;
        let record_this = self.config.record_policy.should_record(changed);

        tracker.enter(CheckStage::Rendering)?;
        let engine = Arc::clone(&self.engine);
        let (comparison, artifact) = blocking(move || {
            let artifact = if record_this {
                Some(engine.render(&comparison, &old_payload, &new_payload)?)
            } else {
                None
            };
            Ok::<_, DiffError>((comparison, artifact))
        })
        .await??;

        tracker.enter(CheckStage::Persisting)?;
        let stored = self.store.versions.put_version(id, new_version).await?;
        let diff_id = match artifact {
            Some(artifact) => {
                let diff_id = DiffId::new(id.clone(), previous.sequence(), stored.sequence());
                let record = ChangeRecord {
                    id: diff_id.clone(),
                    resource_id: id.clone(),
                    base_version: previous.sequence(),
                    new_version: stored.sequence(),
                    strategy: comparison.strategy,
                    basis: comparison.score.basis,
                    confidence: comparison.score.confidence,
                    changed,
                    obfuscated: comparison.obfuscated,
                    stats: comparison.stats,
                    artifact: ArtifactRef {
                        file_name: format!("{ARTIFACT_STEM}.{}", artifact.file_extension()),
                        content_type: artifact.content_type.clone(),
                        byte_size: artifact.bytes.len() as u64,
                        sha256: artifact.content_hash(),
                    },
                    created_at_unix_ms: unix_now_ms(),
                };
                if let Err(err) = self.store.changes.append(&record, &artifact).await {
                    // Without its record the version would hide this change
                    // from every later check.
                    if let Err(discard_err) =
                        self.store.versions.discard_version(id, stored.sequence()).await
                    {
                        log::error!(
                            "{id}: failed to discard version {}: {discard_err}",
                            stored.sequence()
                        );
                    }
                    return Err(err.into());
                }
                Some(diff_id)
            }
            None => None,
        };

        if let Err(err) = self
            .store
            .changes
            .prune_older_than(id, self.config.retention.max_diff_age_days, unix_now_ms())
            .await
        {
            log::warn!("{id}: failed to prune old change records: {err}");
        }

        Ok(Completed {
            changed,
            confidence: comparison.score.confidence,
            diff_id,
            strategy: Some(comparison.strategy),
            stats: Some(comparison.stats),
            version_sequence: stored.sequence(),
        })
    }

    async fn record_status(&self, result: &CheckResult) {
        let id = &result.resource_id;
        let previous = match self.store.status.read(id).await {
            Ok(previous) => previous,
            Err(err) => {
                log::warn!("{id}: unreadable status, replacing it: {err}");
                None
            }
        };
        let now = unix_now_ms();
        let status = match &result.error {
            None => ResourceStatus {
                resource_id: id.clone(),
                last_checked_at_unix_ms: now,
                last_outcome: Some(LastOutcome {
                    changed: result.changed,
                    confidence: result.confidence,
                    diff_id: result.diff_id.clone(),
                    version_sequence: result.version_sequence,
                }),
                last_error: None,
                last_success_at_unix_ms: Some(now),
            },
            Some(message) => ResourceStatus {
                resource_id: id.clone(),
                last_checked_at_unix_ms: now,
                last_outcome: previous.as_ref().and_then(|s| s.last_outcome.clone()),
                last_error: Some(LastError {
                    stage: result
                        .failed_stage
                        .unwrap_or(CheckStage::Errored)
                        .as_str()
                        .to_string(),
                    message: message.clone(),
                    at_unix_ms: now,
                }),
                last_success_at_unix_ms: previous.and_then(|s| s.last_success_at_unix_ms),
            },
        };
        if let Err(err) = self.store.status.write(&status).await {
            log::error!("{id}: failed to write status: {err}");
        }
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| CheckError::Task(err.to_string()))
}
