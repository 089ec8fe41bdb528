//! Dara match server binary.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dara_api::config::Config;
use dara_api::routes::{self, AppStateInner};
use dara_api::session::SessionManager;
use dara_api::store::{Credentials, Rankings};
use dara_api::timer::TokioScheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dara_api=info")))
        .init();

    let config = Config::parse();
    let credentials = Credentials::open(config.users_file())?;
    let rankings = Arc::new(Rankings::new(&config.data_dir));

    let (timers, fired) = TokioScheduler::new();
    let session = SessionManager::new(timers, config.session(), Box::new(rankings.clone()));
    let state = Arc::new(AppStateInner::new(session, credentials, rankings));
    routes::spawn_timers(state.clone(), fired);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(bind = %config.bind, data = %config.data_dir.display(), "dara server listening");
    axum::serve(listener, routes::router(state)).await?;
    Ok(())
}
