//! # Parser Performance Suite - Main Entry Point
//!
//! The `parser-perf` binary measures parsing performance at different levels
//! of the pipeline and ships the results to a metric sink.
//!
//! ## Lifecycle
//!
//! 1. **Parse arguments** with clap
//! 2. **Initialize logging**; `--verbose` lowers the default level to debug
//!    and `RUST_LOG` overrides both
//! 3. **Build the storage registry** and snapshot the environment
//! 4. **Install a Ctrl-C handler** that cancels a running benchmark between
//!    fixture files
//! 5. **Run the subcommand**; any error is logged and the process exits
//!    with status 1
//!
//! The counting allocator is installed here so the runner can report
//! allocations per operation.

use clap::Parser;
use parser_perf::{
    alloc::CountingAllocator,
    cli::Args,
    commands::{self, CommandContext},
    logging,
    storage::{Settings, StorageRegistry},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(args.verbose);

    debug!("parser-perf {}", parser_perf::VERSION);
    debug!("Configuration: {:?}", args);

    let registry = StorageRegistry::with_default_sinks();
    let settings = Settings::from_env();

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    warn!("interrupted, stopping after the current file");
                    signal_token.cancel();
                }
                Err(e) => warn!("cannot listen for interrupts: {}", e),
            },
            _ = signal_token.cancelled() => {}
        }
    });

    let ctx = CommandContext {
        registry: &registry,
        settings: &settings,
        cancel: cancel.clone(),
    };
    let result = commands::run(args.command, &ctx).await;
    cancel.cancel();

    match result {
        Ok(()) => info!("done"),
        Err(e) => {
            error!("run failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
