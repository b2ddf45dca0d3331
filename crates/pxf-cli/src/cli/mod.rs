//! CLI for the pxf grid fetcher.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use pxf_core::config::{self, PxfConfig};
use pxf_core::export::DirSink;
use pxf_core::grid::Corner;
use pxf_core::job::JobConfig;
use pxf_core::job_store::JobStore;
use pxf_core::scheduler::JobController;
use pxf_core::transport::CurlTransport;
use std::sync::Arc;

use commands::{run_completions, run_scheduler, run_start, run_status, run_stop};

/// Top-level CLI for pxf.
#[derive(Debug, Parser)]
#[command(name = "pxf")]
#[command(about = "pxf: resumable, rate-limited grid sampling over HTTP", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Create a job over a grid rectangle and run it (unless --detach).
    Start(StartArgs),

    /// Resume the persisted job (e.g. after a restart) and run it to the end.
    Run,

    /// Stop the current job, exporting a snapshot of what was collected.
    Stop {
        /// Label recorded in progress and in the snapshot file name.
        #[arg(long, default_value = "stop")]
        reason: String,
    },

    /// Show progress of the current (or last) job.
    Status {
        /// Print the raw run-state and progress records as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Grid and pacing for `pxf start`. Unset limits come from config.toml.
#[derive(Debug, Args)]
pub struct StartArgs {
    /// First corner as BLOCK_X,BLOCK_Y,PX_X,PX_Y (offsets may exceed the block).
    #[arg(long, value_name = "BX,BY,PX,PY", allow_hyphen_values = true)]
    pub start: Corner,

    /// Opposite corner, same format.
    #[arg(long, value_name = "BX,BY,PX,PY", allow_hyphen_values = true)]
    pub end: Corner,

    /// Horizontal stride in pixels.
    #[arg(long, default_value = "1")]
    pub step_x: i64,

    /// Vertical stride in pixels.
    #[arg(long, default_value = "1")]
    pub step_y: i64,

    /// Points per tick.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Delay between ticks, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub batch_delay_ms: Option<u64>,

    /// Request rate cap across all workers.
    #[arg(long)]
    pub max_rps: Option<u32>,

    /// Concurrent fetch workers.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Pixels per block along each axis.
    #[arg(long)]
    pub block_size: Option<i64>,

    /// Request URL template (placeholders, path base, or query base).
    #[arg(long)]
    pub template: Option<String>,

    /// Dotted path of the identifier inside each response.
    #[arg(long)]
    pub id_field: Option<String>,

    /// Only create the job; run it later with `pxf run`.
    #[arg(long)]
    pub detach: bool,
}

impl StartArgs {
    /// Job config: config.toml defaults overridden by flags.
    pub fn job_config(&self, cfg: &PxfConfig) -> JobConfig {
        let mut job = cfg.job_template();
        job.start = self.start;
        job.end = self.end;
        job.step_x = self.step_x;
        job.step_y = self.step_y;
        if let Some(v) = self.batch_size {
            job.batch_size = v;
        }
        if let Some(v) = self.batch_delay_ms {
            job.batch_delay_ms = v;
        }
        if let Some(v) = self.max_rps {
            job.max_rps = v;
        }
        if let Some(v) = self.concurrency {
            job.concurrency = v;
        }
        if let Some(v) = self.block_size {
            job.block_size = v;
        }
        if let Some(v) = &self.template {
            job.url_template = v.clone();
        }
        if let Some(v) = &self.id_field {
            job.id_field = v.clone();
        }
        job
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        if let CliCommand::Completions { shell } = cli.command {
            return run_completions(shell, &mut Cli::command());
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let controller = open_controller(&cfg).await?;

        match cli.command {
            CliCommand::Start(args) => {
                let job = args.job_config(&cfg);
                run_start(&controller, job, args.detach).await?;
            }
            CliCommand::Run => run_scheduler(&controller).await?,
            CliCommand::Stop { reason } => run_stop(&controller, &reason).await?,
            CliCommand::Status { json } => run_status(&controller, json).await?,
            CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}

async fn open_controller(cfg: &PxfConfig) -> Result<JobController> {
    let store = JobStore::open_default().await?;
    let sink = DirSink::new(cfg.resolved_export_dir()?);
    Ok(JobController::new(
        store,
        Arc::new(sink),
        Arc::new(CurlTransport::default()),
        cfg.scheduler_config(),
    ))
}

#[cfg(test)]
mod tests;
