use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    /// Hex-encoded 32-byte key for secrets at rest and download tokens
    pub master_key_hex: Option<String>,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    /// Enable/disable audit logging of admin mutations
    pub audit_log_enabled: bool,
    /// Requests per minute per client (public) or per API key (v1)
    pub rate_limit_per_minute: u32,
    /// Accept plain http:// webhook endpoints (https is always accepted)
    pub allow_http_webhooks: bool,
    /// Allowed CORS origins (empty = any)
    pub cors_origins: Vec<String>,
    /// Days to keep webhook delivery logs (0 = keep forever)
    pub webhook_log_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("GATEFLOW_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let audit_log_enabled = env::var("AUDIT_LOG_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let rate_limit_per_minute: u32 = env::var("RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(120);

        let allow_http_webhooks = env::var("ALLOW_HTTP_WEBHOOKS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(dev_mode);

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let webhook_log_retention_days: i64 = env::var("WEBHOOK_LOG_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "gateflow.db".to_string()),
            base_url,
            dev_mode,
            master_key_hex: env::var("GATEFLOW_MASTER_KEY").ok(),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok().filter(|s| !s.is_empty()),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            audit_log_enabled,
            rate_limit_per_minute,
            allow_http_webhooks,
            cors_origins,
            webhook_log_retention_days,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
