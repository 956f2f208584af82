//! Loader tests for `portal-config`: defaults, file discovery and environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::TempDir;

use portal_config::{load, AppConfig, StorageBackend};

const ENV_VARS_TO_RESET: &[&str] = &[
    "PORTAL_CONFIG",
    "PORTAL__AUTH__JWT_SECRET",
    "PORTAL__AUTH__ACCESS_TOKEN_TTL_SECONDS",
    "PORTAL__AUTH__SESSION_TTL_SECONDS",
    "PORTAL__BUSINESS__DEFAULT_CURRENCY",
    "PORTAL__CORS__ALLOWED_ORIGINS",
    "PORTAL__DATABASE__MAX_CONNECTIONS",
    "PORTAL__DATABASE__URL",
    "PORTAL__HTTP__ADDRESS",
    "PORTAL__HTTP__PORT",
    "PORTAL__PAYMENTS__STRIPE_SECRET_KEY",
    "PORTAL__STORAGE__ALLOWED_EXTENSIONS",
    "PORTAL__STORAGE__BACKEND",
];

struct TestContext {
    vars: Vec<(String, Option<String>)>,
    original_dir: Option<PathBuf>,
}

impl TestContext {
    fn new() -> Self {
        Self {
            vars: Vec::new(),
            original_dir: None,
        }
    }

    fn reset_environment(&mut self) {
        for key in ENV_VARS_TO_RESET {
            self.remove_var(key);
        }
    }

    fn set_var(&mut self, key: &str, value: impl AsRef<str>) {
        let previous = std::env::var(key).ok();
        std::env::set_var(key, value.as_ref());
        self.vars.push((key.to_string(), previous));
    }

    fn remove_var(&mut self, key: &str) {
        let previous = std::env::var(key).ok();
        std::env::remove_var(key);
        self.vars.push((key.to_string(), previous));
    }

    fn set_current_dir(&mut self, dir: &Path) {
        if self.original_dir.is_none() {
            self.original_dir =
                Some(std::env::current_dir().expect("failed to capture current directory"));
        }
        std::env::set_current_dir(dir).expect("failed to set current directory");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(original) = self.original_dir.take() {
            let _ = std::env::set_current_dir(original);
        }

        while let Some((key, value)) = self.vars.pop() {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }
    }
}

fn write_config_file(root: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create config directories");
    }
    fs::write(&path, contents).expect("failed to write config file");
    path
}

#[test]
#[serial]
fn load_uses_default_values_when_no_files_found() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    let config = load().expect("configuration load should succeed without files");
    let defaults = AppConfig::default();

    assert_eq!(config.http.address, defaults.http.address);
    assert_eq!(config.http.port, defaults.http.port);
    assert_eq!(config.database.url, defaults.database.url);
    assert_eq!(config.auth.access_token_ttl_seconds, 86_400);
    assert_eq!(config.auth.refresh_token_ttl_seconds, 2_592_000);
    assert_eq!(config.storage.backend, StorageBackend::Local);
    assert_eq!(config.storage.max_upload_bytes, 16 * 1024 * 1024);
    assert!(config.storage.allowed_extensions.contains(&"pdf".to_string()));
    assert_eq!(config.business.default_currency, "OMR");
    assert_eq!(config.business.contract_expiry_days, 180);
    assert_eq!(config.payments.due_days, 30);
    assert!(config.cors.allows_any_origin());
}

#[test]
#[serial]
fn load_discovers_config_file_in_working_directory() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "config/portal.toml",
        r#"
[http]
address = "0.0.0.0"
port = 9090

[storage]
backend = "s3"

[storage.s3]
bucket = "portal-uploads"
region = "eu-central-1"
"#,
    );

    let config = load().expect("configuration should load from discovered file");
    assert_eq!(config.http.address, "0.0.0.0");
    assert_eq!(config.http.port, 9090);
    assert_eq!(config.storage.backend, StorageBackend::S3);
    assert_eq!(config.storage.s3.bucket.as_deref(), Some("portal-uploads"));
    assert_eq!(config.storage.s3.region, "eu-central-1");
    assert_eq!(config.database.url, AppConfig::default().database.url);
}

#[test]
#[serial]
fn explicit_config_path_takes_precedence_over_discovery() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(temp_dir.path(), "portal.toml", "[http]\naddress = \"10.0.0.1\"\nport = 1000\n");
    let explicit = write_config_file(
        temp_dir.path(),
        "custom/settings.toml",
        "[http]\naddress = \"10.0.0.2\"\nport = 2000\n",
    );
    ctx.set_var("PORTAL_CONFIG", explicit.display().to_string());

    let config = load().expect("explicit configuration should load");
    assert_eq!(config.http.address, "10.0.0.2");
    assert_eq!(config.http.port, 2000);
}

#[test]
#[serial]
fn environment_overrides_files_and_defaults() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(temp_dir.path(), "portal.toml", "[http]\nport = 1111\n");
    ctx.set_var("PORTAL__HTTP__PORT", "4242");
    ctx.set_var("PORTAL__DATABASE__URL", "sqlite://override.db");
    ctx.set_var("PORTAL__AUTH__JWT_SECRET", "super-secret");
    ctx.set_var("PORTAL__PAYMENTS__STRIPE_SECRET_KEY", "sk_test_123");

    let config = load().expect("configuration should load with overrides");
    assert_eq!(config.http.port, 4242);
    assert_eq!(config.database.url, "sqlite://override.db");
    assert_eq!(config.auth.jwt_secret, "super-secret");
    assert_eq!(
        config.payments.stripe_secret_key.as_deref(),
        Some("sk_test_123")
    );
}

#[test]
#[serial]
fn comma_separated_lists_are_split_from_environment() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    ctx.set_var(
        "PORTAL__CORS__ALLOWED_ORIGINS",
        "https://app.example.com,https://admin.example.com",
    );
    ctx.set_var("PORTAL__STORAGE__ALLOWED_EXTENSIONS", "PDF,.png");

    let config = load().expect("configuration should load list overrides");
    assert_eq!(
        config.cors.allowed_origins,
        vec![
            "https://app.example.com".to_string(),
            "https://admin.example.com".to_string()
        ]
    );
    assert!(!config.cors.allows_any_origin());
    assert_eq!(
        config.storage.allowed_extensions,
        vec!["pdf".to_string(), "png".to_string()]
    );
}

#[test]
#[serial]
fn invalid_values_are_rejected() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    ctx.set_var("PORTAL__HTTP__PORT", "not-a-port");

    assert!(load().is_err());
}
