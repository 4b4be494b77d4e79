use push_deploy::config::Settings;
use push_deploy::deploy::Deployer;
use push_deploy::project::Registry;
use push_deploy::utils::generate_secret;
use push_deploy::{AppState, api, logging, watcher};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    if std::env::args().nth(1).as_deref() == Some("secret") {
        println!("Generated secret: {}", generate_secret());
        return;
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = logging::setup_logging(settings.log_dir.as_deref());

    let registry = Arc::new(Registry::new());
    registry.reload(&settings.projects_file);

    let _watcher = if settings.hot_reload {
        match watcher::spawn_watcher(Arc::clone(&registry), settings.projects_file.clone()) {
            Ok(task) => Some(task),
            Err(e) => {
                error!("Couldn't watch {}: {}", settings.projects_file.display(), e);
                None
            }
        }
    } else {
        None
    };

    let state = Arc::new(AppState::new(
        registry,
        Deployer::new(settings.deploy_timeout),
    ));
    let app = api::build_router(state, &settings.base_url);

    let listener = match tokio::net::TcpListener::bind(&settings.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Couldn't bind {}: {}", settings.bind_address, e);
            std::process::exit(1);
        }
    };
    info!(
        "Serving webhooks on http://{}{}",
        settings.bind_address,
        api::webhook_route(&settings.base_url)
    );

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
