use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use portal_auth::NewAccount;
use portal_backend_runtime::{telemetry, BackendServices};
use portal_config::{load as load_config, AppConfig};
use portal_database::{prepare_database, run_migrations, UserRole};
use portal_gateway::{create_router, GatewayState};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "portal-backend")]
#[command(about = "Client portal backend (serves HTTP by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Provision an admin account
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// Generated and printed when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Purge old read notifications, expire overdue contracts and flag overdue invoices
    Cleanup {
        /// Age in days of read notifications to purge
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing().context("failed to initialise tracing")?;
    let config = load_config().context("failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config).await,
        Commands::Migrate => migrate(&config).await,
        Commands::CreateAdmin {
            email,
            first_name,
            last_name,
            password,
        } => create_admin(&config, email, first_name, last_name, password).await,
        Commands::Cleanup { days } => cleanup(&config, days).await,
    }
}

async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    info!("starting client portal backend");

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let address = format!("{}:{}", config.http.address, config.http.port);
    let state = GatewayState::new(services.services.clone(), Arc::new(config));
    let app = create_router(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(portal_backend_runtime::shutdown_signal())
    .await
    .context("http server error")?;

    info!("backend shut down");
    Ok(())
}

async fn migrate(config: &AppConfig) -> anyhow::Result<()> {
    let pool = prepare_database(&config.database)
        .await
        .context("failed to open database")?;
    run_migrations(&pool).await?;
    pool.close().await;

    println!("Migrations applied to {}", config.database.url);
    Ok(())
}

async fn create_admin(
    config: &AppConfig,
    email: String,
    first_name: String,
    last_name: String,
    password: Option<String>,
) -> anyhow::Result<()> {
    let services = BackendServices::initialise(config)
        .await
        .context("failed to initialise backend services")?;

    let account = services
        .services
        .auth
        .create_account(NewAccount {
            email,
            password,
            first_name,
            last_name,
            company: None,
            phone: None,
            role: UserRole::Admin,
        })
        .await
        .context("failed to create admin account")?;

    info!(user_id = %account.user.id, email = %account.user.email, "admin account created");
    println!("Admin account created: {}", account.user.email);
    if let Some(generated) = account.generated_password {
        println!("Generated password: {generated}");
    }
    Ok(())
}

async fn cleanup(config: &AppConfig, days: Option<i64>) -> anyhow::Result<()> {
    let services = BackendServices::initialise(config)
        .await
        .context("failed to initialise backend services")?;

    let report = services
        .services
        .admin
        .maintenance(days)
        .await
        .context("maintenance failed")?;

    println!("Maintenance finished:");
    println!(
        "- {} read notifications removed",
        report.notifications_removed.unwrap_or_default()
    );
    println!(
        "- {} contracts expired",
        report.contracts_expired.unwrap_or_default()
    );
    println!(
        "- {} invoices marked overdue",
        report.invoices_overdue.unwrap_or_default()
    );
    Ok(())
}
