use anyhow::Result;
use pxf_core::scheduler::JobController;

pub async fn run_status(controller: &JobController, json: bool) -> Result<()> {
    let run = controller.run_state().await?;
    let progress = controller.get_progress().await?;

    if json {
        let out = serde_json::json!({ "runState": run, "progress": progress });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match &run {
        Some(r) => println!("Job {}: running, {} points", r.job_id, r.total),
        None => println!("No active job."),
    }

    let Some(p) = progress else {
        return Ok(());
    };
    let pct = if p.total == 0 {
        100.0
    } else {
        p.done as f64 * 100.0 / p.total as f64
    };
    let label = if p.finished {
        "finished"
    } else if p.stopped {
        "stopped"
    } else {
        "progress"
    };
    println!("  {}: {}/{} ({:.1}%), {} identifiers", label, p.done, p.total, pct, p.records.len());
    let s = p.stats;
    println!(
        "  ok {}  fail {}  429 {}  403 {}  err {}",
        s.ok, s.fail, s.rate_limited, s.forbidden, s.err
    );
    if let Some(b) = p.last_batch {
        println!(
            "  last batch: {}..{} ({} points, {} ms)",
            b.start_index, b.end_index, b.count, b.duration_ms
        );
    }
    if let Some(reason) = &p.reason {
        println!("  reason: {}", reason);
    }
    if let Some(name) = &p.filename {
        println!("  export: {}", name);
    }
    Ok(())
}
