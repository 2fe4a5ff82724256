use thiserror::Error;

/// Connection settings for [`SqliteStore`](crate::SqliteStore), from the
/// environment (`.env` works too) or assembled by hand.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
}

impl Config {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 16,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = dotenv::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;
        Ok(Self::new(database_url))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
}
