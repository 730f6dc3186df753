use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

pub struct Env {
    pub jwt_secret: String,
    pub database_url: String,
    pub redis_url: String,
    pub frontend_url: String,
    pub ip: String,
    pub port: u16,
    pub relationship_store: StoreBackend,
    pub store_timeout: Duration,
    pub fanout_max_attempts: u32,
    pub fanout_retry_backoff: Duration,
}

impl Env {
    fn new() -> Self {
        let jwt_secret = std::env::var("SECRET_KEY")
            .expect("SECRET_KEY must be set in .env file or environment variable");

        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set in .env file or environment variable");
        let redis_url = std::env::var("REDIS_URL")
            .expect("REDIS_URL must be set in .env file or environment variable");

        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());
        let ip = std::env::var("IP").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .expect("PORT must be a valid u16 integer");

        let relationship_store = match std::env::var("RELATIONSHIP_STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => panic!("RELATIONSHIP_STORE must be `postgres` or `memory`, got `{other}`"),
        };

        let store_timeout = std::env::var("STORE_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u64>()
            .map(Duration::from_millis)
            .expect("STORE_TIMEOUT_MS must be a valid u64 integer");
        let fanout_max_attempts = std::env::var("FANOUT_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .expect("FANOUT_MAX_ATTEMPTS must be a valid u32 integer");
        let fanout_retry_backoff = std::env::var("FANOUT_RETRY_BACKOFF_MS")
            .unwrap_or_else(|_| "250".to_string())
            .parse::<u64>()
            .map(Duration::from_millis)
            .expect("FANOUT_RETRY_BACKOFF_MS must be a valid u64 integer");

        Env {
            jwt_secret,
            database_url,
            redis_url,
            frontend_url,
            ip,
            port,
            relationship_store,
            store_timeout,
            fanout_max_attempts,
            fanout_retry_backoff,
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}
