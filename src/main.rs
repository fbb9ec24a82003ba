mod app;
mod auth;
mod cache;
mod config;
mod db;
mod error;
mod extract;
mod state;
mod users;
mod validation;

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "accountd=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    tracing::info!(mode = %config.app_mode, "starting accountd");

    let db = db::connect(&config).await?;
    db::migrate(&db).await?;

    let (host, port) = (config.host.clone(), config.port);
    let state = AppState::init(config, db)?;
    let app = app::build_app(state);

    app::serve(app, &host, port).await
}
