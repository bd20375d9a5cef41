//! Process configuration, resolved once at startup from the environment.

use std::env;

const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";
const DEFAULT_MONGODB_DB: &str = "logistics";
const DEFAULT_PORT: u16 = 8080;

/// Runtime settings for the service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection string for the document store (`MONGODB_URI`).
    pub mongodb_uri: String,
    /// Database holding the `shipments`, `errors` and `batches` collections
    /// (`MONGODB_DB`).
    pub mongodb_db: String,
    /// TCP port the HTTP surface binds to (`PORT`).
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Ignoring unparseable PORT value.");
                DEFAULT_PORT
            }),
            Err(_) => DEFAULT_PORT,
        };

        Config {
            mongodb_uri: env::var("MONGODB_URI")
                .unwrap_or_else(|_| DEFAULT_MONGODB_URI.to_owned()),
            mongodb_db: env::var("MONGODB_DB").unwrap_or_else(|_| DEFAULT_MONGODB_DB.to_owned()),
            port,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mongodb_uri: DEFAULT_MONGODB_URI.to_owned(),
            mongodb_db: DEFAULT_MONGODB_DB.to_owned(),
            port: DEFAULT_PORT,
        }
    }
}
