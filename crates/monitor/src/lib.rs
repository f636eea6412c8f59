//! # Scriptwatch Monitor
//!
//! Runs checks of monitored script URLs. Each check moves through
//! `Fetching → Normalizing → Parsing → Diffing → Scoring → Rendering →
//! Persisting → Done`, with `Errored` reachable from any stage.
//!
//! ## Architecture
//!
//! ```text
//! ResourceRegistry ──► CheckOrchestrator ──► Fetcher (retry, timeout)
//!                          │    │
//!                          │    ├──► DiffEngine (spawn_blocking)
//!                          │    └──► Store (versions, changes, status)
//!                          └──► EventSink (changed = true only)
//! ```
//!
//! Concurrency is bounded per orchestrator; checks of the same resource are
//! serialized so every comparison uses the immediately preceding version.
//!
//! ## Example
//!
//! ```no_run
//! use scriptwatch_monitor::{CheckOrchestrator, HttpFetcher, JsonFileRegistry, MonitorConfig};
//! use scriptwatch_store::Store;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MonitorConfig::default();
//! let store = Store::open(&config.data_dir, config.store_options()).await?;
//! let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
//! let registry = Arc::new(JsonFileRegistry::new("resources.json"));
//! let orchestrator = CheckOrchestrator::new(config, store, registry, fetcher)?;
//! for result in orchestrator.run_check_all().await? {
//!     println!("{} changed={}", result.resource_id, result.changed);
//! }
//! # Ok(())
//! # }
//! ```

mod cancel;
mod config;
mod error;
mod events;
mod fetch;
mod limiter;
mod orchestrator;
mod registry;

pub use cancel::{cancellation, CancelHandle, CancelToken};
pub use config::{FetchConfig, MonitorConfig, RecordPolicy, RetentionPolicy};
pub use error::{CheckError, ConfigError, FetchError, RegistryError, Result, SinkError};
pub use events::{ChangeEvent, ChannelSink, EventSink, LogSink};
pub use fetch::{fetch_with_retry, FetchedContent, Fetcher, HttpFetcher};
pub use limiter::{CheckLimiter, CheckPermit, ConcurrencySnapshot};
pub use orchestrator::{CheckOrchestrator, CheckResult, CheckStage};
pub use registry::{JsonFileRegistry, MonitoredResource, ResourceRegistry, StaticRegistry};
