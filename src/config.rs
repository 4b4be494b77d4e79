//! Process settings, read from the environment (optionally seeded by a `.env` file).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HookError, Result};

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:9000";
const DEFAULT_PROJECTS_FILE: &str = "projects.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// `ip:port` the webhook server listens on
    pub bind_address: String,
    /// URL prefix in front of the project name, without surrounding slashes
    pub base_url: String,
    pub projects_file: PathBuf,
    /// Reload the projects file whenever it is written
    pub hot_reload: bool,
    /// Directory for daily rotated log files, console only when unset
    pub log_dir: Option<PathBuf>,
    /// Deadline for a single deploy script run, none when unset
    pub deploy_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            base_url: String::new(),
            projects_file: PathBuf::from(DEFAULT_PROJECTS_FILE),
            hot_reload: false,
            log_dir: None,
            deploy_timeout: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key/value source; unset or empty keys take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Settings::default();

        let deploy_timeout = match get("DEPLOY_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    return Err(HookError::InvalidSetting {
                        name: "DEPLOY_TIMEOUT_SECS",
                        message: format!("expected a positive number of seconds, got '{}'", raw),
                    });
                }
            },
            None => None,
        };

        let hot_reload = match get("HOT_RELOAD") {
            Some(raw) => parse_bool("HOT_RELOAD", &raw)?,
            None => defaults.hot_reload,
        };

        Ok(Self {
            bind_address: get("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            base_url: get("BASE_URL")
                .map(|url| url.trim_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            projects_file: get("PROJECTS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.projects_file),
            hot_reload,
            log_dir: get("LOG_DIR").map(PathBuf::from),
            deploy_timeout,
        })
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HookError::InvalidSetting {
            name,
            message: format!("expected a boolean, got '{}'", raw),
        }),
    }
}
