use anyhow::Result;
use pxf_core::control::default_control_socket_path;
use pxf_core::scheduler::{JobController, TickOutcome};
use std::time::Duration;

use crate::cli::control_socket::{runner_active, spawn_control_listener};

/// Drive the persisted job until it finishes, is stopped, or the user interrupts.
/// An interrupted job stays persisted and resumes with the next `pxf run`.
pub async fn run_scheduler(controller: &JobController) -> Result<()> {
    let Some(run) = controller.run_state().await? else {
        println!("No active job.");
        return Ok(());
    };

    let socket_path = default_control_socket_path()?;
    if runner_active(&socket_path).await {
        anyhow::bail!(
            "job {} is already being run by another pxf process ({})",
            run.job_id,
            socket_path.display()
        );
    }
    let listener = match spawn_control_listener(controller.clone(), &socket_path) {
        Ok(h) => Some(h),
        Err(e) => {
            tracing::warn!("control socket unavailable, `pxf stop` will use the state db: {:#}", e);
            None
        }
    };

    println!("Running job {} ({} points).", run.job_id, run.total);
    let reporter = tokio::spawn(report_progress(controller.clone()));

    // On Ctrl-C the runner is interrupted, not dropped: the in-flight batch
    // winds down and is checkpointed before `run` returns.
    let run_fut = controller.run();
    tokio::pin!(run_fut);
    let result = tokio::select! {
        res = &mut run_fut => res,
        _ = tokio::signal::ctrl_c() => {
            controller.interrupt();
            run_fut.await
        }
    };

    reporter.abort();
    if let Some(h) = listener {
        h.abort();
        let _ = std::fs::remove_file(&socket_path);
    }

    match result? {
        TickOutcome::Interrupted => {
            tracing::info!(job_id = run.job_id, "interrupted; job left persisted");
            println!("\nInterrupted. Job {} is saved; resume with `pxf run`.", run.job_id);
        }
        TickOutcome::Finished { export } => {
            println!("\nDone. Exported to {}", export.display());
        }
        TickOutcome::Cancelled => {
            let progress = controller.get_progress().await?;
            match progress.and_then(|p| p.filename) {
                Some(name) => println!("\nStopped. Snapshot: {}", name),
                None => println!("\nStopped."),
            }
        }
        other => println!("\nRunner exited: {:?}", other),
    }
    Ok(())
}

async fn report_progress(controller: JobController) {
    let mut last_done = usize::MAX;
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let Ok(Some(p)) = controller.get_progress().await else {
            continue;
        };
        if p.done == last_done {
            continue;
        }
        last_done = p.done;
        let s = p.stats;
        println!(
            "{}/{}  ok {}  fail {}  429 {}  403 {}  err {}",
            p.done, p.total, s.ok, s.fail, s.rate_limited, s.forbidden, s.err
        );
    }
}
