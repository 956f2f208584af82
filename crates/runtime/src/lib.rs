use std::sync::Arc;

use anyhow::{Context, Result};
use portal_config::{AppConfig, PaymentsConfig, StorageBackend, StorageConfig};
use portal_database::initialize_database;
use portal_services::{
    DisabledGateway, FileStorage, LocalStorage, ObjectStorage, PaymentGateway, Services,
    StripeGateway,
};
use sqlx::SqlitePool;
use tracing::{info, warn};

pub mod telemetry {
    use anyhow::Result;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    /// Install the global subscriber. `RUST_LOG` overrides the `info` default.
    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_env_filter(env_filter)
            .with_target(true)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub services: Services,
    pub storage: Arc<dyn FileStorage>,
    pub payment_gateway: Arc<dyn PaymentGateway>,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to initialise database")?;

        let storage = build_storage(&config.storage).context("failed to configure file storage")?;
        let payment_gateway = build_payment_gateway(&config.payments);
        let services = Services::new(
            db_pool.clone(),
            config,
            storage.clone(),
            payment_gateway.clone(),
        );

        info!(
            storage = storage.backend_name(),
            payments = payment_gateway.name(),
            "backend services ready"
        );

        Ok(Self {
            db_pool,
            services,
            storage,
            payment_gateway,
        })
    }
}

/// Select the storage backend named in the configuration.
pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn FileStorage>> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalStorage::new(&config.upload_dir))),
        StorageBackend::S3 => {
            let store = ObjectStorage::s3(&config.s3).context("failed to build S3 client")?;
            Ok(Arc::new(store))
        }
    }
}

/// Stripe when a secret key is configured; otherwise payment calls answer 503.
pub fn build_payment_gateway(config: &PaymentsConfig) -> Arc<dyn PaymentGateway> {
    match StripeGateway::from_config(config) {
        Some(gateway) => {
            if config.stripe_webhook_secret.is_none() {
                warn!("stripe webhook secret missing, webhooks will be rejected");
            }
            Arc::new(gateway)
        }
        None => {
            warn!("no stripe secret key configured, payment processing disabled");
            Arc::new(DisabledGateway)
        }
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(?error, "failed to listen for shutdown signal");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(?error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
