//! Hot reload of the projects file.

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::Result;
use crate::project::Registry;

/// Watches `path` and reloads `registry` every time the file is written.
///
/// The parent directory is watched rather than the file itself so that
/// editors replacing the file through a rename keep triggering reloads.
/// The returned task owns the watcher and runs until aborted.
pub fn spawn_watcher(registry: Arc<Registry>, path: PathBuf) -> Result<JoinHandle<()>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| {
            // receiver gone means the task was aborted
            let _ = tx.send(res);
        })?;

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher.watch(&directory, RecursiveMode::NonRecursive)?;
    info!("Watching {} for changes", path.display());

    Ok(tokio::spawn(async move {
        let _watcher = watcher;
        let file_name = path.file_name().map(OsStr::to_os_string);

        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) if is_write_to(&event, file_name.as_deref()) => {
                    info!("Projects file modified");
                    let registry = Arc::clone(&registry);
                    let path = path.clone();
                    // reading the file blocks
                    let reload = tokio::task::spawn_blocking(move || registry.reload(&path));
                    if let Err(e) = reload.await {
                        error!("Projects reload task failed: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => error!("Watcher error: {}", e),
            }
        }
    }))
}

fn is_write_to(event: &Event, file_name: Option<&OsStr>) -> bool {
    let is_write = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any)
    );
    is_write
        && file_name.is_some()
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == file_name)
}
