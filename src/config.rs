/// Process configuration, resolved once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Scopes every room and message record, so several deployments can
    /// share one database file.
    pub namespace: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            database_url: dotenv::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:quickroom.db".to_owned()),
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            namespace: dotenv::var("NAMESPACE").unwrap_or_else(|_| "quickroom".to_owned()),
        }
    }
}
