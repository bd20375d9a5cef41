use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shipstream::config::Config;
use shipstream::http;
use shipstream::store::{MongoStore, Store};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        uri = %config.mongodb_uri,
        db = %config.mongodb_db,
        port = config.port,
        "Starting shipstream.",
    );

    let store = match MongoStore::connect(&config).await {
        Ok(store) => Arc::new(store) as Arc<dyn Store>,
        Err(error) => {
            error!(%error, "Store initialization failed.");
            std::process::exit(1);
        }
    };
    if !store.ping().await {
        warn!("Document store is not reachable yet; serving anyway.");
    }

    http::serve(store, config.port).await;
}
