//! Command-line flags. Target and workload come from `INPUT_*` variables;
//! the flags only tune the run around them.

use crate::engine::orchestrator::{DEFAULT_REQUESTS_PER_WORKER, DEFAULT_WARMUP_REQUESTS};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "trialbench")]
#[command(about = "Trial-based HTTP benchmark driven by INPUT_* environment variables")]
#[command(version)]
pub struct Cli {
    /// Validate the environment and exit without sending traffic
    #[arg(long)]
    pub check: bool,

    /// Requests each worker issues per trial
    #[arg(long, default_value_t = DEFAULT_REQUESTS_PER_WORKER)]
    pub requests_per_worker: u32,

    /// Requests sent before the first trial and discarded
    #[arg(long, default_value_t = DEFAULT_WARMUP_REQUESTS)]
    pub warmup_requests: u32,

    /// Overrides INPUT_REPORT_DIR
    #[arg(long)]
    pub report_dir: Option<PathBuf>,
}
