use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gateflow::config::Config;
use gateflow::crypto::MasterKey;
use gateflow::db::{self, AppState, queries};
use gateflow::dispatch::WebhookDispatcher;
use gateflow::middleware::build_rate_limiter;
use gateflow::models::{ApiScope, CreateUser};
use gateflow::payments::{PaymentProcessor, StripeClient, UnconfiguredProcessor};

const SECS_PER_DAY: i64 = 86_400;

#[derive(Parser, Debug)]
#[command(name = "gateflow", version, about = "Sell and gate access to digital products")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create an admin user and print a full-access API key
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "admin")]
        key_name: String,
    },
    /// Delete webhook delivery logs older than the given number of days
    PurgeWebhookLogs {
        #[arg(long)]
        older_than_days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gateflow=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::CreateAdmin {
            email,
            name,
            key_name,
        } => create_admin(&config, &email, name, &key_name),
        Command::PurgeWebhookLogs { older_than_days } => {
            let days = older_than_days.unwrap_or(config.webhook_log_retention_days);
            purge_webhook_logs(&config, days)
        }
    }
}

fn load_master_key(config: &Config) -> anyhow::Result<MasterKey> {
    match &config.master_key_hex {
        Some(hex) => MasterKey::from_hex(hex).context("GATEFLOW_MASTER_KEY is invalid"),
        None if config.dev_mode => {
            tracing::warn!(
                "GATEFLOW_MASTER_KEY not set, using a random key. Webhook secrets and download links will not survive a restart"
            );
            Ok(MasterKey::generate())
        }
        None => bail!("GATEFLOW_MASTER_KEY must be set outside dev mode"),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::open_pool(&config.database_path, 16)
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;
    tracing::info!("Database ready at {}", config.database_path);

    let master_key = load_master_key(&config)?;

    let payments: Arc<dyn PaymentProcessor> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeClient::new(key)),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, checkouts and refunds will fail");
            Arc::new(UnconfiguredProcessor)
        }
    };
    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set, Stripe events will be rejected");
    }

    let rate_limiter = build_rate_limiter(config.rate_limit_per_minute);
    let state = AppState {
        db: pool.clone(),
        base_url: config.base_url.clone(),
        audit_log_enabled: config.audit_log_enabled,
        allow_http_webhooks: config.allow_http_webhooks,
        dispatcher: WebhookDispatcher::new(pool.clone(), master_key.clone()),
        master_key,
        stripe_webhook_secret: config.stripe_webhook_secret.clone(),
        payments,
        rate_limiter: rate_limiter.clone(),
    };

    // Keep the limiter's key map from growing without bound
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            rate_limiter.retain_recent();
        }
    });

    if config.webhook_log_retention_days > 0 {
        let retention = config.webhook_log_retention_days;
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(SECS_PER_DAY as u64));
            loop {
                interval.tick().await;
                let cutoff = chrono::Utc::now().timestamp() - retention * SECS_PER_DAY;
                let purged = pool
                    .get()
                    .map_err(gateflow::error::AppError::from)
                    .and_then(|conn| queries::purge_webhook_logs(&conn, cutoff));
                match purged {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Purged {} webhook logs older than {} days", n, retention),
                    Err(e) => tracing::error!("Webhook log purge failed: {}", e),
                }
            }
        });
    }

    let app = gateflow::app(state, &config.cors_origins);
    let listener = tokio::net::TcpListener::bind(config.addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.addr()))?;
    tracing::info!("GateFlow listening on {}", config.addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

fn create_admin(config: &Config, email: &str, name: Option<String>, key_name: &str) -> anyhow::Result<()> {
    let pool = db::open_pool(&config.database_path, 1)?;
    let conn = pool.get()?;

    let user = match queries::get_user_by_email(&conn, email)? {
        Some(user) if user.is_admin => user,
        Some(_) => bail!("{} exists but is not an admin", email),
        None => {
            let input = CreateUser {
                email: email.to_string(),
                full_name: name,
                is_admin: true,
            };
            input.validate()?;
            queries::create_user(&conn, &input)?
        }
    };

    let (key, full_key) = queries::create_api_key(&conn, &user.id, key_name, &[ApiScope::Full], None)?;
    tracing::info!("Admin key created: user={}, key={}", user.id, key.id);
    println!("Admin: {} ({})", user.email, user.id);
    println!("API key (shown once): {}", full_key);
    Ok(())
}

fn purge_webhook_logs(config: &Config, days: i64) -> anyhow::Result<()> {
    if days <= 0 {
        bail!("--older-than-days must be positive");
    }
    let pool = db::open_pool(&config.database_path, 1)?;
    let conn = pool.get()?;
    let cutoff = chrono::Utc::now().timestamp() - days * SECS_PER_DAY;
    let purged = queries::purge_webhook_logs(&conn, cutoff)?;
    println!("Purged {} webhook logs older than {} days", purged, days);
    Ok(())
}
