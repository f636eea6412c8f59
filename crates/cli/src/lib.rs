use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use scriptwatch_diff::{
    ArtifactFormat, ChangeScore, Comparison, ContentHint, DiffEngine, DiffStats,
    ObfuscationTechnique, SideSummary, Strategy,
};
use scriptwatch_monitor::{
    cancellation, CancelHandle, CheckOrchestrator, HttpFetcher, JsonFileRegistry, LogSink,
    MonitorConfig,
};
use scriptwatch_store::{unix_now_ms, DiffId, ResourceId, Store};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "scriptwatch")]
#[command(about = "Detect meaningful changes in third-party JavaScript", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// JSON or TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root (overrides `data_dir` from the configuration)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one resource now
    Check(CheckArgs),

    /// Check every active resource in the registry
    #[command(name = "check-all")]
    CheckAll(RegistryArgs),

    /// List stored versions of a resource, newest first
    Versions(ResourceArgs),

    /// List change records of a resource, newest first
    Changes(ResourceArgs),

    /// Print or save the rendered artifact of a change record
    Artifact(ArtifactArgs),

    /// Show the last check status of a resource
    Status(ResourceArgs),

    /// Compare two local files without touching the store
    Compare(CompareArgs),

    /// Delete change records older than the retention age
    Prune(PruneArgs),
}

#[derive(Args)]
struct RegistryArgs {
    /// JSON array of `{id, url, active}` records
    #[arg(long, default_value = "resources.json")]
    registry: PathBuf,

    /// Override `max_concurrency` from the configuration
    #[arg(long)]
    max_concurrency: Option<usize>,
}

#[derive(Args)]
struct CheckArgs {
    /// Resource id
    id: String,

    #[command(flatten)]
    registry: RegistryArgs,
}

#[derive(Args)]
struct ResourceArgs {
    /// Resource id
    id: String,
}

#[derive(Args)]
struct ArtifactArgs {
    /// Diff id (`<resource>-<base>-<new>`)
    diff_id: String,

    /// Write the artifact here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Html,
    Json,
}

impl From<FormatArg> for ArtifactFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Html => ArtifactFormat::Html,
            FormatArg::Json => ArtifactFormat::Json,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum HintArg {
    Javascript,
    Json,
    Other,
}

impl From<HintArg> for ContentHint {
    fn from(value: HintArg) -> Self {
        match value {
            HintArg::Javascript => ContentHint::JavaScript,
            HintArg::Json => ContentHint::Json,
            HintArg::Other => ContentHint::Other,
        }
    }
}

#[derive(Args)]
struct CompareArgs {
    /// Previous payload
    old: PathBuf,

    /// Current payload
    new: PathBuf,

    /// Write the rendered artifact here
    #[arg(long)]
    out: Option<PathBuf>,

    /// Artifact format (overrides the configuration)
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// How to treat both payloads
    #[arg(long, value_enum, default_value = "javascript")]
    hint: HintArg,
}

#[derive(Args)]
struct PruneArgs {
    /// Override `retention.max_diff_age_days`
    #[arg(long)]
    max_age_days: Option<u32>,
}

#[derive(Serialize)]
struct ArtifactSummary {
    content_type: String,
    byte_size: usize,
    sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

#[derive(Serialize)]
struct CompareOutput {
    strategy: Strategy,
    changed: bool,
    confidence: f64,
    score: ChangeScore,
    stats: DiffStats,
    line_similarity: f64,
    obfuscated: bool,
    obfuscation_score: f64,
    techniques: Vec<ObfuscationTechnique>,
    old: SideSummary,
    new: SideSummary,
    artifact: ArtifactSummary,
}

impl CompareOutput {
    fn new(comparison: &Comparison, artifact: ArtifactSummary) -> Self {
        Self {
            strategy: comparison.strategy,
            changed: comparison.score.changed,
            confidence: comparison.score.confidence,
            score: comparison.score,
            stats: comparison.stats,
            line_similarity: comparison.lines.similarity,
            obfuscated: comparison.obfuscated,
            obfuscation_score: comparison.obfuscation_score(),
            techniques: comparison.techniques(),
            old: comparison.old.clone(),
            new: comparison.new.clone(),
            artifact,
        }
    }
}

fn print_stdout(bytes: &[u8]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(bytes)
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    print_stdout(text.as_bytes())
}

fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn load_config(cli: &Cli) -> Result<MonitorConfig> {
    let mut config = match &cli.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn open_store(config: &MonitorConfig) -> Result<Store> {
    Store::open(&config.data_dir, config.store_options())
        .await
        .with_context(|| format!("Failed to open store at {}", config.data_dir.display()))
}

fn parse_resource_id(raw: &str) -> Result<ResourceId> {
    ResourceId::new(raw).with_context(|| format!("Invalid resource id '{raw}'"))
}

fn spawn_interrupt_handler(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; cancelling running checks");
            handle.cancel();
        }
    });
}

async fn build_orchestrator(
    mut config: MonitorConfig,
    args: &RegistryArgs,
) -> Result<CheckOrchestrator> {
    if let Some(limit) = args.max_concurrency {
        config.max_concurrency = limit;
    }
    let store = open_store(&config).await?;
    let fetcher = HttpFetcher::new(&config.fetch).context("Failed to build HTTP client")?;
    let registry = JsonFileRegistry::new(&args.registry);

    let (handle, token) = cancellation();
    spawn_interrupt_handler(handle);

    let orchestrator =
        CheckOrchestrator::new(config, store, Arc::new(registry), Arc::new(fetcher))
            .context("Invalid configuration")?
            .with_sink(Arc::new(LogSink))
            .with_cancel(token);
    Ok(orchestrator)
}

async fn run_check(config: MonitorConfig, args: CheckArgs) -> Result<()> {
    let id = parse_resource_id(&args.id)?;
    let orchestrator = build_orchestrator(config, &args.registry).await?;
    let result = orchestrator.run_check(&id).await;
    print_json(&result)?;
    if let Some(error) = &result.error {
        bail!("Check of {id} failed: {error}");
    }
    Ok(())
}

async fn run_check_all(config: MonitorConfig, args: RegistryArgs) -> Result<()> {
    let orchestrator = build_orchestrator(config, &args).await?;
    let results = orchestrator
        .run_check_all()
        .await
        .context("Failed to read the registry")?;
    print_json(&results)
}

async fn run_versions(config: MonitorConfig, args: ResourceArgs) -> Result<()> {
    let id = parse_resource_id(&args.id)?;
    let store = open_store(&config).await?;
    let versions = store
        .versions
        .list_versions(&id)
        .await
        .with_context(|| format!("Failed to list versions of {id}"))?;
    print_json(&versions)
}

async fn run_changes(config: MonitorConfig, args: ResourceArgs) -> Result<()> {
    let id = parse_resource_id(&args.id)?;
    let store = open_store(&config).await?;
    let records = store
        .changes
        .list(&id)
        .await
        .with_context(|| format!("Failed to list change records of {id}"))?;
    print_json(&records)
}

async fn run_artifact(config: MonitorConfig, args: ArtifactArgs) -> Result<()> {
    let diff_id: DiffId = args
        .diff_id
        .parse()
        .with_context(|| format!("Invalid diff id '{}'", args.diff_id))?;
    let store = open_store(&config).await?;
    let artifact = store
        .changes
        .artifact(&diff_id)
        .await
        .with_context(|| format!("Failed to read artifact {diff_id}"))?;

    match args.out {
        Some(path) => {
            write_file(&path, &artifact.bytes)?;
            print_json(&ArtifactSummary {
                content_type: artifact.content_type.clone(),
                byte_size: artifact.bytes.len(),
                sha256: artifact.content_hash(),
                path: Some(path.display().to_string()),
            })
        }
        None => print_stdout(&artifact.bytes),
    }
}

async fn run_status(config: MonitorConfig, args: ResourceArgs) -> Result<()> {
    let id = parse_resource_id(&args.id)?;
    let store = open_store(&config).await?;
    let status = store
        .status
        .read(&id)
        .await
        .with_context(|| format!("Failed to read status of {id}"))?;
    print_json(&status)
}

fn read_payload(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

fn run_compare(mut config: MonitorConfig, args: CompareArgs) -> Result<()> {
    if let Some(format) = args.format {
        config.engine.render.format = format.into();
    }
    let engine = DiffEngine::new(config.engine).context("Invalid engine configuration")?;
    let old = read_payload(&args.old)?;
    let new = read_payload(&args.new)?;

    let outcome = engine
        .compare_raw(&old, &new, args.hint.into())
        .context("Comparison failed")?;

    let path = match &args.out {
        Some(path) => {
            write_file(path, &outcome.artifact.bytes)?;
            Some(path.display().to_string())
        }
        None => None,
    };
    let artifact = ArtifactSummary {
        content_type: outcome.artifact.content_type.clone(),
        byte_size: outcome.artifact.bytes.len(),
        sha256: outcome.artifact.content_hash(),
        path,
    };
    print_json(&CompareOutput::new(&outcome.comparison, artifact))
}

async fn run_prune(config: MonitorConfig, args: PruneArgs) -> Result<()> {
    let days = args
        .max_age_days
        .unwrap_or(config.retention.max_diff_age_days);
    let store = open_store(&config).await?;
    let removed = store
        .changes
        .prune_all(days, unix_now_ms())
        .await
        .context("Failed to prune change records")?;
    print_json(&serde_json::json!({ "removed": removed, "max_age_days": days }))
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Check(args) => run_check(config, args).await,
        Commands::CheckAll(args) => run_check_all(config, args).await,
        Commands::Versions(args) => run_versions(config, args).await,
        Commands::Changes(args) => run_changes(config, args).await,
        Commands::Artifact(args) => run_artifact(config, args).await,
        Commands::Status(args) => run_status(config, args).await,
        Commands::Compare(args) => run_compare(config, args),
        Commands::Prune(args) => run_prune(config, args).await,
    }
}
