use pairchat::{AppState, config::Config, cors_layer, db, router};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    match &config.mirror {
        None => warn!("FIREBASE_PROJECT_ID not set, mirror store disabled"),
        Some(mirror) if mirror.service_account.is_none() => {
            warn!("no service account configured, mirror requests are unauthenticated")
        }
        Some(_) => {}
    }

    let db_pool = db::connect(&config.database_url).await?;
    let app = router(AppState::from_config(&config, db_pool)?)
        .layer(cors_layer(&config.cors_origin)?);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
