use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Custom error type for push_deploy operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Couldn't read projects file '{}': {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't parse projects file '{}': {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    #[error("The project '{0}' has already been loaded, check the projects file for duplicate names")]
    DuplicateProject(String),

    #[error("Invalid setting {name}: {message}")]
    InvalidSetting { name: &'static str, message: String },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Deploy script failed to start: {0}")]
    ScriptLaunch(#[source] io::Error),

    #[error("Deploy script exited with {0}")]
    ScriptFailed(ExitStatus),

    #[error("Deploy script timed out after {0:?}")]
    ScriptTimeout(Duration),
}

/// Helper type for Results that use HookError
pub type Result<T> = std::result::Result<T, HookError>;
