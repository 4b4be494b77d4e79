pub mod api;
pub mod config;
pub mod deploy;
pub mod error;
pub mod extract;
pub mod logging;
pub mod project;
pub mod utils;
pub mod watcher;

use std::sync::Arc;

use deploy::Deployer;
use project::Registry;

pub struct AppState {
    pub registry: Arc<Registry>,
    pub deployer: Deployer,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, deployer: Deployer) -> Self {
        Self { registry, deployer }
    }
}

pub type SharedState = Arc<AppState>;
