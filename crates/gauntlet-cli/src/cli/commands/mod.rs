pub mod serve;
pub mod status;
pub mod submit;
pub mod worker;

use crate::cli::args::{AbortArgs, Cli, Command, ReapArgs, RetryArgs};
use anyhow::Context;
use gauntlet_core::config::EngineSettings;
use gauntlet_core::engine::Engine;
use gauntlet_core::providers::agent::HttpAgentRuntime;
use gauntlet_core::providers::judge::SubstringJudge;
use gauntlet_core::storage::Store;
use gauntlet_core::webhook::WebhookConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Submit(args) => submit::run(args).await,
        Command::Worker(args) => worker::run(args).await,
        Command::Serve(args) => serve::run(args).await,
        Command::Status(args) => status::run(args),
        Command::Abort(args) => abort(args),
        Command::Retry(args) => retry(args),
        Command::Reap(args) => reap(args),
    }
}

pub(crate) fn open_store(db: &Path) -> anyhow::Result<Store> {
    if let Some(parent) = db.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let store = Store::open(db)?;
    store.init_schema()?;
    Ok(store)
}

pub(crate) struct EngineOptions {
    pub db: PathBuf,
    pub runtime_url: Option<String>,
    pub webhook_base: String,
    pub webhook_secret: Option<String>,
    pub settings: Option<PathBuf>,
}

impl EngineOptions {
    pub fn local(db: PathBuf) -> Self {
        Self {
            db,
            runtime_url: None,
            webhook_base: "http://127.0.0.1:8700".into(),
            webhook_secret: None,
            settings: None,
        }
    }
}

pub(crate) fn build_engine(opts: EngineOptions) -> anyhow::Result<Engine> {
    let store = open_store(&opts.db)?;
    let settings = match &opts.settings {
        Some(path) => EngineSettings::from_yaml_file(path)?,
        None => EngineSettings::default(),
    };
    let runtime_url = opts
        .runtime_url
        .unwrap_or_else(|| "http://127.0.0.1:9800/trials".into());
    Ok(Engine::new(
        store,
        Arc::new(HttpAgentRuntime::new(runtime_url)),
        Arc::new(SubstringJudge),
        settings,
        WebhookConfig::new(opts.webhook_base, opts.webhook_secret),
    ))
}

fn abort(args: AbortArgs) -> anyhow::Result<i32> {
    let engine = build_engine(EngineOptions::local(args.db))?;
    if engine.abort_run(&args.user, args.run)? {
        println!("run {} aborted", args.run);
        Ok(0)
    } else {
        println!("run {} not found or already terminal", args.run);
        Ok(1)
    }
}

fn retry(args: RetryArgs) -> anyhow::Result<i32> {
    let engine = build_engine(EngineOptions::local(args.db))?;
    let retried = engine.retry_failures(&args.user, args.run)?;
    println!("run {}: {} failed case(s) re-dispatched", args.run, retried);
    Ok(0)
}

fn reap(args: ReapArgs) -> anyhow::Result<i32> {
    let engine = build_engine(EngineOptions::local(args.db))?;
    let threshold = match args.threshold_ms {
        Some(t) => t,
        None => engine.reap_threshold(args.run)?,
    };
    let swept = engine.reap(args.run, threshold)?;
    println!(
        "run {}: {} stale trial(s) marked timeout (threshold {}ms)",
        args.run,
        swept.len(),
        threshold
    );
    Ok(0)
}
