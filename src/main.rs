use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod model;
mod preprocess;
mod routes;
mod utils;

use config::Settings;
use model::{load_labels, Model};
use routes::AppState;
use utils::ensure_files_exist;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .with_target(false)
        .compact()
        .init();

    let settings = Settings::from_env()?;
    ensure_files_exist(&settings).await?;

    let labels = load_labels(settings.class_list_path.as_deref())?;
    let model = Model::load(&settings.model, labels)?;

    let state = Arc::new(AppState {
        classifier: Arc::new(model),
        resize_filter: settings.resize_filter,
    });
    let app = routes::router(state, settings.body_limit_bytes);

    let addr = SocketAddr::new(settings.host, settings.port);
    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
