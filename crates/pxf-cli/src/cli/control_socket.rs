//! Control socket: server (during `pxf run`) and client (for `pxf stop`).
//! Protocol: one line per command: "stop <reason>".

use anyhow::Result;
use pxf_core::scheduler::JobController;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Spawns a task that listens on `path` and signals a stop for each "stop" line.
/// Ignores malformed lines.
pub fn spawn_control_listener(
    controller: JobController,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let controller = controller.clone();
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            let Some(reason) = parse_stop(&line) else {
                                continue;
                            };
                            match controller.signal_stop(reason).await {
                                Ok(reason) => tracing::info!(%reason, "stop received on control socket"),
                                Err(e) => tracing::warn!("control socket stop: {:#}", e),
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// `Some(reason)` for a "stop" line ("" when no reason was given).
pub fn parse_stop(line: &str) -> Option<&str> {
    let line = line.trim();
    let rest = line.strip_prefix("stop")?;
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some(rest.trim())
}

/// Sends "stop <reason>\n" to a running `pxf run`. Returns false if nobody is listening.
pub async fn send_stop(socket_path: &Path, reason: &str) -> Result<bool> {
    if !socket_path.exists() {
        return Ok(false);
    }
    let mut stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(_) => return Ok(false),
    };
    stream
        .write_all(format!("stop {}\n", reason.trim()).as_bytes())
        .await?;
    Ok(true)
}

/// True if a runner is accepting connections on `socket_path`.
pub async fn runner_active(socket_path: &Path) -> bool {
    socket_path.exists() && UnixStream::connect(socket_path).await.is_ok()
}
