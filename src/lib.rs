// src/lib.rs

//! rundag: run a graph of tasks in dependency order, with content-addressed
//! caching, retries, and multi-region cache routing.

pub mod cache;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fingerprint;
pub mod fs;
pub mod logging;
pub mod region;
pub mod report;
pub mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use cache::{ArtifactCache, CompressionChoice, HttpObjectStore, LocalStore, ObjectStore};
use cli::{CliArgs, Command, ExportFormat, GraphFormat, RunArgs};
use config::load_and_validate;
use config::model::{GraphFile, RetryConfig};
use dag::Scheduler;
use engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions};
use errors::Result;
use exec::{ExecContext, RealExecutorBackend};
use fingerprint::FingerprintEngine;
use fs::RealFileSystem;
use region::probe::HttpProber;
use region::{Region, RegionRouter, TransferManager, sync_regions};
use report::RunSummary;
use types::{CacheBackendKind, Platform};

/// Entry point after CLI parsing. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let graph_path = PathBuf::from(&args.graph);

    match args.command {
        Command::Run(run_args) => run_tasks(&graph_path, run_args).await,
        Command::Graph { task, format } => {
            let cfg = load_and_validate(&graph_path)?;
            let rendered = match format {
                GraphFormat::Dot => report::render_dot(&cfg, &task)?,
                GraphFormat::Json => report::render_graph_json(&cfg, &task)?,
            };
            print!("{rendered}");
            Ok(0)
        }
        Command::List => {
            let cfg = load_and_validate(&graph_path)?;
            print!("{}", report::render_list(&cfg));
            Ok(0)
        }
        Command::Export { format } => {
            let cfg = load_and_validate(&graph_path)?;
            let rendered = match format {
                ExportFormat::Makefile => report::render_makefile(&cfg),
                ExportFormat::GithubActions => report::render_github_actions(&cfg),
            };
            print!("{rendered}");
            Ok(0)
        }
        Command::DetectConcurrency => {
            println!("{}", types::detect_concurrency());
            Ok(0)
        }
    }
}

fn workspace_root_for(graph_path: &Path, args: &RunArgs) -> PathBuf {
    if let Some(root) = &args.workspace_root {
        return root.clone();
    }
    match graph_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Remote region table: config regions paired with HTTP stores. Empty for
/// the local backend.
fn build_regions(
    cfg: &GraphFile,
    backend: CacheBackendKind,
) -> Result<Vec<(Region, Arc<dyn ObjectStore>)>> {
    if backend == CacheBackendKind::Local {
        if !cfg.region.is_empty() {
            debug!("regions configured but cache backend is local; ignoring them");
        }
        return Ok(Vec::new());
    }

    let mut regions: Vec<(Region, Arc<dyn ObjectStore>)> = Vec::new();
    for (name, region_cfg) in &cfg.region {
        let store = HttpObjectStore::new(&region_cfg.endpoint, &region_cfg.bucket, backend)?;
        regions.push((Region::from_config(name, region_cfg), Arc::new(store)));
    }
    Ok(regions)
}

async fn run_tasks(graph_path: &Path, args: RunArgs) -> Result<i32> {
    let cfg = load_and_validate(graph_path)?;
    let workspace_root = workspace_root_for(graph_path, &args);

    let mut default_retry = RetryConfig::default();
    if let Some(attempts) = args.retry {
        default_retry.max_attempts = attempts.max(1);
    }
    let on_failure = args.on_failure.unwrap_or(cfg.config.on_failure);

    let scheduler = Scheduler::new(&cfg, &args.tasks, default_retry, on_failure)?;

    if args.dry_run {
        print!("{}", report::render_plan(&cfg, &scheduler.plan()));
        return Ok(0);
    }

    // Cache plumbing: local store, remote regions, router, artifact cache.
    let fs: Arc<dyn fs::FileSystem> = Arc::new(RealFileSystem);
    let cache_dir = args
        .cache_dir
        .clone()
        .unwrap_or_else(|| LocalStore::default_dir(&workspace_root));
    let local: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(cache_dir));

    let backend = CacheBackendKind::from_env_or(args.cache_backend);
    let regions = build_regions(&cfg, backend)?;
    let region_stores: HashMap<String, Arc<dyn ObjectStore>> = regions
        .iter()
        .map(|(r, s)| (r.name.clone(), Arc::clone(s)))
        .collect();

    let router = Arc::new(RegionRouter::new(regions, Arc::clone(&local)));
    if !region_stores.is_empty() {
        let prober = HttpProber::new()?;
        router.refresh(&prober).await;
    }

    let (region_name, compression) = match router.primary() {
        Some(primary) => (
            primary.name.clone(),
            CompressionChoice::for_bandwidth(primary.bandwidth_mbps),
        ),
        None => ("local".to_string(), CompressionChoice::None),
    };

    let fingerprints = Arc::new(FingerprintEngine::new(
        workspace_root.clone(),
        Arc::clone(&fs),
        args.cache,
    ));
    let artifact_cache = Arc::new(ArtifactCache::new(
        Arc::clone(&router) as Arc<dyn ObjectStore>,
        Arc::clone(&fs),
        workspace_root.clone(),
        region_name,
        compression,
    ));

    let ctx = Arc::new(ExecContext {
        host: Platform::current(),
        workspace_root: workspace_root.clone(),
        graph_env: cfg.env.clone(),
        fingerprints,
        cache: artifact_cache,
    });

    // Runtime wiring: executor pool, Ctrl-C handler, event loop.
    let (event_tx, event_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executor = RealExecutorBackend::new(event_tx.clone(), ctx, args.jobs);

    let signal_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = signal_tx.send(RuntimeEvent::ShutdownRequested).await;
        }
    });
    drop(event_tx);

    let options = RuntimeOptions {
        signal_mode: args.signal_mode,
        ..RuntimeOptions::default()
    };
    let core = CoreRuntime::new(scheduler, options);

    let started = Instant::now();
    let core = Runtime::new(core, event_rx, executor).run().await?;
    let summary = RunSummary::from_core(&core, started.elapsed());

    if cfg.config.replicate_regions && !summary.interrupted {
        replicate(&cfg, &router, &region_stores, &workspace_root).await;
    }

    report::print_summary(&summary);
    Ok(summary.exit_code())
}

/// Post-run cross-region replication: primary to every other configured
/// region. Best-effort; failures only warn.
async fn replicate(
    cfg: &GraphFile,
    router: &RegionRouter,
    region_stores: &HashMap<String, Arc<dyn ObjectStore>>,
    workspace_root: &Path,
) {
    let Some(primary) = router.primary() else {
        debug!("no healthy primary region; skipping replication");
        return;
    };
    let Some(primary_store) = region_stores.get(&primary.name) else {
        return;
    };

    let secondaries: Vec<(String, Arc<dyn ObjectStore>)> = cfg
        .region
        .keys()
        .filter(|name| **name != primary.name)
        .filter_map(|name| {
            region_stores
                .get(name)
                .map(|store| (name.clone(), Arc::clone(store)))
        })
        .collect();
    if secondaries.is_empty() {
        return;
    }

    let transfers = TransferManager::new(workspace_root.join(".rundag").join("transfers"));
    let sync_report = sync_regions(primary_store.as_ref(), &secondaries, &transfers).await;
    if sync_report.failed > 0 {
        warn!(
            copied = sync_report.copied,
            failed = sync_report.failed,
            "replication finished with failures"
        );
    } else {
        info!(
            copied = sync_report.copied,
            skipped = sync_report.skipped,
            "replication finished"
        );
    }
}
