use std::path::Path;

use anyhow::{Context, Result};
use portal_backend_runtime::{build_payment_gateway, build_storage, BackendServices};
use portal_config::{AppConfig, PaymentsConfig, StorageBackend, StorageConfig};
use sqlx::Row;
use tempfile::TempDir;

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}", path.to_string_lossy())
}

fn build_config(temp_dir: &TempDir, database_url: String, max_connections: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = database_url;
    config.database.max_connections = max_connections;
    config.storage.upload_dir = temp_dir.path().join("uploads").to_string_lossy().into_owned();
    config
}

async fn initialise(config: &AppConfig) -> Result<BackendServices> {
    BackendServices::initialise(config)
        .await
        .context("failed to initialise backend services")
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_runs_migrations_and_seeds_catalogue() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("runtime/init.db");
    let config = build_config(&temp_dir, sqlite_url(&db_path), 4);

    let services = initialise(&config).await?;
    let table: String = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'users'",
    )
    .fetch_one(&services.db_pool)
    .await?;
    let types = services.services.projects.list_types(false).await?;

    assert_eq!("users", table);
    assert!(!types.is_empty(), "project types should be seeded");
    assert_eq!("local", services.storage.backend_name());
    assert_eq!("disabled", services.payment_gateway.name());

    drop(services);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_creates_sqlite_directory_if_missing() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_dir = temp_dir.path().join("nested");
    let config = build_config(&temp_dir, sqlite_url(&db_dir.join("prepared.db")), 2);

    assert!(!db_dir.exists());

    let services = initialise(&config).await?;
    assert!(db_dir.exists(), "database directory should be created");
    drop(services);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_enables_sqlite_foreign_keys() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("runtime/foreign_keys.db");
    let config = build_config(&temp_dir, sqlite_url(&db_path), 2);

    let services = initialise(&config).await?;

    let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&services.db_pool)
        .await?;
    assert_eq!(1, enabled, "foreign key enforcement must be enabled");

    drop(services);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_applies_max_connections_setting() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("runtime/max_conn.db");
    let max_connections = 3;
    let config = build_config(&temp_dir, sqlite_url(&db_path), max_connections);

    let services = initialise(&config).await?;
    assert_eq!(
        max_connections,
        services.db_pool.options().get_max_connections()
    );

    drop(services);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn memory_database_creates_no_files() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = build_config(&temp_dir, "sqlite://:memory:".into(), 1);
    let services = initialise(&config).await?;

    let databases = sqlx::query("PRAGMA database_list")
        .fetch_all(&services.db_pool)
        .await?;
    let main_db = databases
        .into_iter()
        .find(|row| {
            row.try_get::<String, _>("name")
                .map(|name| name == "main")
                .unwrap_or(false)
        })
        .context("expected main in PRAGMA database_list")?;
    let file: String = main_db.try_get("file")?;
    assert!(
        file.is_empty(),
        "in-memory sqlite database should not create filesystem entries"
    );

    drop(services);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn s3_storage_without_bucket_fails_with_context() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut config = build_config(&temp_dir, "sqlite://:memory:".into(), 1);
    config.storage.backend = StorageBackend::S3;
    config.storage.s3.bucket = None;

    let error = match BackendServices::initialise(&config).await {
        Ok(_) => panic!("expected storage configuration to fail without a bucket"),
        Err(error) => error,
    };
    let message = format!("{error:#}");
    assert!(
        message.contains("failed to configure file storage"),
        "expected storage context, got {message}"
    );
    Ok(())
}

#[test]
fn local_storage_is_the_default_backend() -> Result<()> {
    let storage = build_storage(&StorageConfig::default())?;
    assert_eq!("local", storage.backend_name());
    Ok(())
}

#[test]
fn stripe_is_selected_when_a_secret_key_is_present() {
    let disabled = build_payment_gateway(&PaymentsConfig::default());
    assert_eq!("disabled", disabled.name());

    let configured = build_payment_gateway(&PaymentsConfig {
        stripe_secret_key: Some("sk_test_runtime".into()),
        stripe_webhook_secret: Some("whsec_runtime".into()),
        ..PaymentsConfig::default()
    });
    assert_eq!("stripe", configured.name());
}

#[test]
fn telemetry_init_tracing_sets_global_subscriber() {
    portal_backend_runtime::telemetry::init_tracing()
        .expect("first initialisation should succeed");

    let second = portal_backend_runtime::telemetry::init_tracing();
    assert!(
        second.is_err(),
        "initialising telemetry twice should fail with global subscriber already set"
    );
}
