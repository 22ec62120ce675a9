mod db;
mod routes;
mod services;
mod state;

use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("database init failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("server io failed: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    // Missing .env is fine; the process environment is authoritative.
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("ignoring unreadable .env: {e}");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = services::persistence::env_parse("PORT", DEFAULT_PORT);

    let pool = match std::env::var("DATABASE_URL") {
        Ok(url) => Some(db::init_pool(&url).await?),
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; boards live in memory only");
            None
        }
    };

    let mut state = state::AppState::new(pool.clone(), state::BoardConfig::from_env());
    if let Some(pool) = pool {
        state = state.with_paint_persistence(services::persistence::spawn_paint_persistence_worker(pool));
        // Spawn background snapshot flushes.
        let _flush = services::persistence::spawn_snapshot_flush_task(state.clone());
    }

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;

    tracing::info!(%port, "pixelboard listening");
    axum::serve(listener, app).await?;
    Ok(())
}
