//! Spawned interpreter processes.
//!
//! `spawn` launches the interpreter as a child process. It is not a data
//! transport: the socket to the same logical interpreter is acquired by a
//! separate connect or listen. This module only observes the child — exit
//! status (code and signal) is logged and surfaced as an event, wait
//! failures go to the session's error handler. There is no restart policy.

use std::path::PathBuf;

use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::TransportEvent;
use crate::error::Result;

/// Options forwarded to the spawned interpreter.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

/// Launch the interpreter and spawn its watch task.
///
/// Spawn failures (missing executable, permissions) surface here as an
/// error; everything after a successful spawn arrives as events.
pub(crate) fn spawn_interpreter(
    session_id: u64,
    exe: &str,
    args: &[String],
    options: SpawnOptions,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<Option<u32>> {
    let mut command = Command::new(exe);
    command.args(args).kill_on_drop(true);
    if let Some(cwd) = &options.cwd {
        command.current_dir(cwd);
    }
    command.envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let mut child = command.spawn()?;
    let pid = child.id();
    info!(session = session_id, exe, ?pid, "spawned interpreter");

    tokio::spawn(async move {
        tokio::select! {
            res = child.wait() => match res {
                Ok(status) => {
                    let code = status.code();
                    let signal = exit_signal(&status);
                    info!(session = session_id, ?code, ?signal, "interpreter exited");
                    let _ = events.send(TransportEvent::ProcessExit { code, signal }).await;
                }
                Err(e) => {
                    warn!(session = session_id, error = %e, "interpreter wait failed");
                    let _ = events.send(TransportEvent::ProcessError(e)).await;
                }
            },
            _ = shutdown.changed() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    });

    Ok(pid)
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
