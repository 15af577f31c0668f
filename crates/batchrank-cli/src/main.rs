//! batchrank - scores batches of resumes against a job description.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use batchrank::BatchAction;

#[derive(Parser)]
#[command(name = "batchrank", version, about = "Durable resume scoring batches")]
pub struct Cli {
    /// Configuration file (defaults to ~/.batchrank/config.json)
    #[arg(short, long, global = true, env = "BATCHRANK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a batch from resume files and process it
    Create {
        #[arg(short, long)]
        user: String,

        /// Job description text, or @path to read it from a file
        #[arg(short, long)]
        description: String,

        /// Only create the batch; leave processing to `run` or `serve`
        #[arg(long)]
        no_run: bool,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Pause, resume or cancel a batch
    Control {
        #[arg(short, long)]
        user: String,

        batch_id: String,

        /// pause | resume | cancel
        action: BatchAction,

        /// Do not process a resumed batch in this process
        #[arg(long)]
        no_run: bool,
    },

    /// List a user's batches, newest first
    List {
        #[arg(short, long)]
        user: String,
    },

    /// Show one batch with its jobs
    Show {
        #[arg(short, long)]
        user: String,

        batch_id: String,
    },

    /// Reap expired leases once
    Watchdog {
        /// Process the re-dispatched batches afterwards
        #[arg(long)]
        run: bool,
    },

    /// Pick up every running batch and process until nothing is left
    Run,

    /// Run workers and the periodic watchdog until interrupted
    Serve {
        /// Overrides workers.count from the configuration
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let default_filter = if verbose { "batchrank=debug" } else { "batchrank=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let subscriber = Registry::default()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)));

    // Route `log` records from the library through the same subscriber.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    log::debug!("Starting batchrank v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = commands::run(cli) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
