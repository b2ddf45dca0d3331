use anyhow::Result;
use pxf_core::control::default_control_socket_path;
use pxf_core::scheduler::JobController;
use std::time::{Duration, Instant};

use crate::cli::control_socket::send_stop;

const RUNNER_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ask a live runner to stop first so it settles with its in-memory results;
/// then finish (or repeat) the stop locally. Safe to run more than once.
pub async fn run_stop(controller: &JobController, reason: &str) -> Result<()> {
    let sent = match default_control_socket_path() {
        Ok(path) => send_stop(&path, reason).await.unwrap_or(false),
        Err(_) => false,
    };

    if sent {
        let deadline = Instant::now() + RUNNER_SETTLE_TIMEOUT;
        while controller.run_state().await?.is_some() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    let resp = controller.stop(reason).await?;
    println!("{}", serde_json::to_string(&resp)?);

    let filename = match resp.filename {
        Some(f) => Some(f),
        None => controller
            .get_progress()
            .await?
            .filter(|p| p.stopped)
            .and_then(|p| p.filename),
    };
    if let Some(name) = filename {
        println!("Snapshot: {}", name);
    }
    Ok(())
}
