use anyhow::Result;
use pxf_core::job::JobConfig;
use pxf_core::scheduler::JobController;

use super::run::run_scheduler;

/// Create the job and, unless detached, keep running it in this process.
pub async fn run_start(controller: &JobController, config: JobConfig, detach: bool) -> Result<()> {
    let resp = controller.start(config).await?;
    println!("{}", serde_json::to_string(&resp)?);

    if !resp.ok {
        if let Some(id) = resp.job_id {
            eprintln!("Job {} is still running; stop it first with `pxf stop`.", id);
        }
        return Ok(());
    }
    if detach {
        println!("Job created. Run it with `pxf run`.");
        return Ok(());
    }
    run_scheduler(controller).await
}
