//! JX query server
//!
//! HTTP front end over a DuckDB-backed snowflake store: JSON documents go in
//! through `/insert/:fact`, JX queries come out through `/query`.

use anyhow::Context;
use jx_duck::Database;
use tracing::info;

mod config;
mod logging;
mod metrics;
mod routes;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match std::env::var("JX_CONFIG") {
        Ok(path) => Config::load(&path).with_context(|| format!("loading {path}"))?,
        Err(_) if std::path::Path::new("config.yaml").exists() => Config::load("config.yaml")?,
        Err(_) => Config::from_env()?,
    };
    logging::init(&config.logging)?;

    let db = Database::open(config.database.options()).context("opening database")?;
    let state = routes::AppState {
        db: db.clone(),
        metrics: metrics::Metrics::new()?,
    };
    let app = routes::router(state);

    let address = config.address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(address = %address, database = ?config.database.path, "JX server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    let flushed = db.flush_catalog().await?;
    info!(columns = flushed, "Shut down");
    Ok(())
}
