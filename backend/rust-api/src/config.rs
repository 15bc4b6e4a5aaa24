use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub bind_addr: String,
    pub catalog_dir: String,
    /// Shared secret expected in the X-Api-Key header. None disables the guard.
    pub api_key: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(
                config::File::with_name(&format!("config/{}", env)).required(false), // Allow missing config file, fallback to ENV
            )
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "hint_engine".to_string());

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let catalog_dir = settings
            .get_string("hints.catalog_dir")
            .or_else(|_| env::var("HINT_CATALOG_DIR"))
            .unwrap_or_else(|_| "catalog".to_string());

        let api_key = settings
            .get_string("auth.api_key")
            .or_else(|_| env::var("HINT_ENGINE_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());

        Ok(Config {
            mongo_uri,
            mongo_database,
            bind_addr,
            catalog_dir,
            api_key,
        })
    }
}
