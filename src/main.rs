use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;

use rust_decimal::Decimal;

use webpay_ledger::buyer::SolitudeClient;
use webpay_ledger::config::Config;
use webpay_ledger::db::{AppState, create_pool, init_db, queries};
use webpay_ledger::handlers;
use webpay_ledger::jwt::TokenKeys;
use webpay_ledger::models::{CreateInAppProduct, CreateUser, CreateWebapp, UserSource};
use webpay_ledger::notify::WebhookNotifier;

#[derive(Parser, Debug)]
#[command(name = "webpay-ledger")]
#[command(about = "Payment confirmation protocol and contribution ledger")]
struct Cli {
    /// Seed the database with dev data (a buyer, a paid app, in-app products)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let user = queries::create_user(
        &conn,
        &CreateUser {
            email: "buyer@example.com".to_string(),
            display_name: Some("Dev Buyer".to_string()),
            source: UserSource::Unknown,
        },
    )
    .expect("Failed to create dev user");

    let app = queries::create_webapp(
        &conn,
        &CreateWebapp {
            name: "Dev Paid App".to_string(),
            description: "<p>A paid app for <b>local</b> testing</p>".to_string(),
            default_locale: "en-US".to_string(),
            solitude_public_id: Some("dev-public-id".to_string()),
            application_size: Some(388_096),
            price_point: Some("1".to_string()),
            price_amount: Some(Decimal::new(99, 2)),
            currency: "USD".to_string(),
            has_icon: false,
            support_email: Some("support@example.com".to_string()),
            developer_email: Some("dev@example.com".to_string()),
        },
    )
    .expect("Failed to create dev app");

    let sword = queries::create_inapp_product(
        &conn,
        &CreateInAppProduct {
            webapp_id: Some(app.id.clone()),
            name: "Magic Sword".to_string(),
            logo_url: None,
            price_point: "1".to_string(),
            price_amount: Decimal::new(99, 2),
            currency: "USD".to_string(),
            simulate: None,
        },
    )
    .expect("Failed to create dev in-app product");

    let simulated = queries::create_inapp_product(
        &conn,
        &CreateInAppProduct {
            webapp_id: None,
            name: "Simulated Purchase".to_string(),
            logo_url: None,
            price_point: "0".to_string(),
            price_amount: Decimal::ZERO,
            currency: "USD".to_string(),
            simulate: Some(serde_json::json!({"result": "postback"})),
        },
    )
    .expect("Failed to create simulated in-app product");

    println!();
    println!("============================================");
    println!("DEV SEED DATA CREATED");
    println!("============================================");
    println!("Buyer:              {} ({})", user.email, user.id);
    println!("Paid app:           {}", app.id);
    println!("In-app product:     {}", sword.id);
    println!("Simulated product:  {}", simulated.id);
    println!("============================================");
    println!();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webpay_ledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let keys = TokenKeys::from_config(&config.purchase).expect("Invalid purchase token config");
    tracing::info!(
        "Accepting notices signed with: {}",
        config
            .purchase
            .allowed_algorithms
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let payments = SolitudeClient::new(&config.solitude_url, config.solitude_timeout)
        .expect("Failed to create processor client");
    let notifier = WebhookNotifier::new(
        reqwest::Client::new(),
        config.notification_webhook_url.clone(),
    );

    let state = AppState {
        db: db_pool,
        config: Arc::new(config.clone()),
        keys: Arc::new(keys),
        payments: Arc::new(payments),
        notifier: Arc::new(notifier),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set WEBPAY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let app = Router::new()
        .merge(handlers::webpay::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Webpay ledger listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
