//! Deploy script invocation.
//!
//! Every deploy runs on its own tokio task, detached from the webhook request
//! that triggered it. Deploys of the same project overlap freely unless the
//! project is marked `exclusive`, in which case they queue on a per-project lock.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::error::HookError;
use crate::project::Project;

/// Maximum size for captured script output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Outcome of one deploy script run
#[derive(Debug)]
pub struct DeployReport {
    pub id: Uuid,
    pub project_name: String,
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Everything the script wrote to stdout, followed by everything it wrote
    /// to stderr. Lines are not interleaved in the order they were written.
    pub output: String,
    pub output_truncated: bool,
    pub error: Option<HookError>,
}

impl DeployReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A deploy that has been handed off to its own task
#[derive(Debug)]
pub struct Launched {
    pub id: Uuid,
    pub args: Vec<String>,
    pub handle: JoinHandle<DeployReport>,
}

/// Spawns deploy tasks
#[derive(Debug, Clone, Default)]
pub struct Deployer {
    timeout: Option<Duration>,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Deployer {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            locks: Arc::default(),
        }
    }

    /// Starts the deploy in the background and returns immediately.
    /// Dropping the returned handle does not cancel the deploy.
    pub fn spawn(&self, project: Project, args: Vec<String>) -> Launched {
        let id = Uuid::now_v7();
        let lock = project.exclusive.then(|| self.lock_for(&project.name));
        let timeout = self.timeout;
        let span = info_span!("deploy", %id, project = %project.name);

        let task_args = args.clone();
        let handle = tokio::spawn(
            async move {
                let _guard = match lock {
                    Some(lock) => Some(lock.lock_owned().await),
                    None => None,
                };
                invoke(id, &project, task_args, timeout).await
            }
            .instrument(span),
        );

        Launched { id, args, handle }
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }
}

/// Runs the project's script with `args` (`args[0]` being the script itself)
/// from the script's directory, logging the outcome. Failures end up in the
/// report, never in a panic.
pub async fn invoke(
    id: Uuid,
    project: &Project,
    args: Vec<String>,
    timeout: Option<Duration>,
) -> DeployReport {
    let started_at = Utc::now();
    let script = executable_path(Path::new(&project.script));
    let cwd = working_directory(&script);

    let mut command = Command::new(&script);
    #[cfg(unix)]
    {
        if let Some(argv0) = args.first() {
            command.arg0(argv0);
        }
        // own group, so a timeout can take down whatever the script started
        command.process_group(0);
    }
    command
        .args(args.iter().skip(1))
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let rest = args.get(1..).unwrap_or_default();
    if Path::new(&project.script) != script.as_path() {
        info!(
            "Executing {} ({}) with arguments {:?} using {} as cwd",
            project.script,
            script.display(),
            rest,
            cwd.display()
        );
    } else {
        info!(
            "Executing {} with arguments {:?} using {} as cwd",
            project.script,
            rest,
            cwd.display()
        );
    }

    let (output, error) = match run(command, timeout).await {
        Ok((output, status)) if status.success() => (output, None),
        Ok((output, status)) => (output, Some(HookError::ScriptFailed(status))),
        Err(e) => (String::new(), Some(e)),
    };
    let (output, output_truncated) = truncate_output(output);

    info!("Command output: {}", output);
    if let Some(e) = &error {
        error!("Error occurred: {}", e);
    }
    info!("Finished handling '{}'", project.name);

    DeployReport {
        id,
        project_name: project.name.clone(),
        args,
        started_at,
        completed_at: Utc::now(),
        output,
        output_truncated,
        error,
    }
}

async fn run(
    mut command: Command,
    timeout: Option<Duration>,
) -> Result<(String, std::process::ExitStatus), HookError> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let child = command.spawn().map_err(HookError::ScriptLaunch)?;
    let pid = child.id();

    let output = child.wait_with_output();
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, output).await {
            Ok(output) => output,
            Err(_) => {
                // kill_on_drop only reaches the script itself
                kill_process_group(pid);
                return Err(HookError::ScriptTimeout(limit));
            }
        },
        None => output.await,
    }
    .map_err(HookError::ScriptLaunch)?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((combined, output.status))
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        debug!(
            "Couldn't kill process group {}: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Relative script paths are resolved against the server's working directory,
/// not the script's own directory the child starts in.
fn executable_path(script: &Path) -> PathBuf {
    std::path::absolute(script).unwrap_or_else(|_| script.to_path_buf())
}

/// Parent directory of the script, `.` when it has none.
pub fn working_directory(script: &Path) -> PathBuf {
    match script.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn truncate_output(mut output: String) -> (String, bool) {
    if output.len() <= MAX_OUTPUT_SIZE {
        return (output, false);
    }
    let mut cut = MAX_OUTPUT_SIZE;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n... (output truncated)");
    (output, true)
}
