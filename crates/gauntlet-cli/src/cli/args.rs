use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gauntlet",
    version,
    about = "Agent evaluation run engine: batch agent trials into one trustworthy aggregate"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a run (and its dataset cases) from a YAML spec and start it
    Submit(SubmitArgs),
    /// Consume the durable queue and drive trials against the runtime
    Worker(WorkerArgs),
    /// Listen for completion webhooks from the agent runtime
    Serve(ServeArgs),
    /// Show a run's status, metrics and per-case breakdown
    Status(StatusArgs),
    /// Abort a run: stop new dispatch, ignore stale completions
    Abort(AbortArgs),
    /// Delete error/timeout cases and re-dispatch them
    Retry(RetryArgs),
    /// Sweep stale running trials into terminal timeout
    Reap(ReapArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct SubmitArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,

    /// Run spec: dataset id, cases, k, aggregation policy
    #[arg(long, default_value = "run.yaml")]
    pub file: PathBuf,

    #[arg(long, env = "GAUNTLET_USER", default_value = "local")]
    pub user: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct WorkerArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,

    /// Agent runtime endpoint trials are posted to
    #[arg(long, env = "GAUNTLET_RUNTIME_URL")]
    pub runtime_url: String,

    /// Base URL the runtime posts completions back to (the `serve` listener)
    #[arg(long, env = "GAUNTLET_WEBHOOK_BASE", default_value = "http://127.0.0.1:8700")]
    pub webhook_base: String,

    #[arg(long, env = "GAUNTLET_WEBHOOK_SECRET")]
    pub webhook_secret: Option<String>,

    /// Engine settings yaml (page/chunk sizes, parallelism, timeouts)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// How often running runs are swept for stale trials
    #[arg(long, default_value_t = 60_000)]
    pub reap_interval_ms: u64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,

    #[arg(long, default_value = "127.0.0.1:8700")]
    pub addr: String,

    #[arg(long, env = "GAUNTLET_WEBHOOK_SECRET")]
    pub webhook_secret: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub run: i64,

    #[arg(long, env = "GAUNTLET_USER", default_value = "local")]
    pub user: String,

    /// Output format: text|json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AbortArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub run: i64,

    #[arg(long, env = "GAUNTLET_USER", default_value = "local")]
    pub user: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RetryArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub run: i64,

    #[arg(long, env = "GAUNTLET_USER", default_value = "local")]
    pub user: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ReapArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub run: i64,

    /// Stale threshold; defaults to the run's config, then engine default
    #[arg(long)]
    pub threshold_ms: Option<i64>,
}
