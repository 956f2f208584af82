use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "portal.toml",
    "config/portal.toml",
    "crates/config/portal.toml",
    "../portal.toml",
    "../config/portal.toml",
    "../crates/config/portal.toml",
];

/// Keys whose environment values are comma separated lists.
const LIST_KEYS: &[&str] = &["cors.allowed_origins", "storage.allowed_extensions"];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub business: BusinessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
    #[serde(default = "HttpConfig::default_frontend_url")]
    pub frontend_url: String,
}

impl HttpConfig {
    fn default_frontend_url() -> String {
        "http://localhost:3000".to_string()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
            frontend_url: Self::default_frontend_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://portal.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Token and session lifetimes plus the JWT signing material.
///
/// ```
/// use portal_config::AuthConfig;
///
/// let auth = AuthConfig::default();
/// assert_eq!(auth.access_token_ttl_seconds, 86_400);
/// assert_eq!(auth.reset_token_ttl_seconds, 3_600);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "AuthConfig::default_issuer")]
    pub issuer: String,
    #[serde(default = "AuthConfig::default_audience")]
    pub audience: String,
    #[serde(default = "AuthConfig::default_access_ttl")]
    pub access_token_ttl_seconds: u64,
    #[serde(default = "AuthConfig::default_refresh_ttl")]
    pub refresh_token_ttl_seconds: u64,
    #[serde(default = "AuthConfig::default_session_ttl")]
    pub session_ttl_seconds: u64,
    #[serde(default = "AuthConfig::default_reset_ttl")]
    pub reset_token_ttl_seconds: u64,
}

impl AuthConfig {
    fn default_issuer() -> String {
        "client-portal".to_string()
    }

    fn default_audience() -> String {
        "client-portal-api".to_string()
    }

    const fn default_access_ttl() -> u64 {
        86_400
    }

    const fn default_refresh_ttl() -> u64 {
        2_592_000
    }

    const fn default_session_ttl() -> u64 {
        2_592_000
    }

    const fn default_reset_ttl() -> u64 {
        3_600
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production".to_string(),
            issuer: Self::default_issuer(),
            audience: Self::default_audience(),
            access_token_ttl_seconds: Self::default_access_ttl(),
            refresh_token_ttl_seconds: Self::default_refresh_ttl(),
            session_ttl_seconds: Self::default_session_ttl(),
            reset_token_ttl_seconds: Self::default_reset_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "StorageConfig::default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "StorageConfig::default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "StorageConfig::default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub s3: S3Config,
}

impl StorageConfig {
    fn default_upload_dir() -> String {
        "uploads".to_string()
    }

    const fn default_max_upload_bytes() -> usize {
        16 * 1024 * 1024
    }

    fn default_allowed_extensions() -> Vec<String> {
        [
            "txt", "pdf", "png", "jpg", "jpeg", "gif", "doc", "docx", "zip", "rar",
        ]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            upload_dir: Self::default_upload_dir(),
            max_upload_bytes: Self::default_max_upload_bytes(),
            allowed_extensions: Self::default_allowed_extensions(),
            s3: S3Config::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "S3Config::default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Custom endpoint for S3 compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl S3Config {
    fn default_region() -> String {
        "us-east-1".to_string()
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: Self::default_region(),
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    #[serde(default)]
    pub stripe_secret_key: Option<String>,
    #[serde(default)]
    pub stripe_publishable_key: Option<String>,
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,
    #[serde(default = "PaymentsConfig::default_api_base")]
    pub api_base: String,
    #[serde(default = "PaymentsConfig::default_webhook_tolerance")]
    pub webhook_tolerance_seconds: i64,
    #[serde(default = "PaymentsConfig::default_due_days")]
    pub due_days: i64,
    #[serde(default = "PaymentsConfig::default_tax_rate")]
    pub tax_rate: f64,
}

impl PaymentsConfig {
    fn default_api_base() -> String {
        "https://api.stripe.com/v1".to_string()
    }

    const fn default_webhook_tolerance() -> i64 {
        300
    }

    const fn default_due_days() -> i64 {
        30
    }

    const fn default_tax_rate() -> f64 {
        0.05
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: None,
            stripe_publishable_key: None,
            stripe_webhook_secret: None,
            api_base: Self::default_api_base(),
            webhook_tolerance_seconds: Self::default_webhook_tolerance(),
            due_days: Self::default_due_days(),
            tax_rate: Self::default_tax_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default = "MailConfig::default_port")]
    pub port: u16,
    #[serde(default = "MailConfig::default_use_tls")]
    pub use_tls: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "MailConfig::default_sender")]
    pub default_sender: String,
}

impl MailConfig {
    const fn default_port() -> u16 {
        587
    }

    const fn default_use_tls() -> bool {
        true
    }

    fn default_sender() -> String {
        "noreply@client-portal.local".to_string()
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            server: None,
            port: Self::default_port(),
            use_tls: Self::default_use_tls(),
            username: None,
            password: None,
            default_sender: Self::default_sender(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "CorsConfig::default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    fn default_allowed_origins() -> Vec<String> {
        vec!["*".to_string()]
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|origin| origin == "*")
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Self::default_allowed_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessConfig {
    #[serde(default = "BusinessConfig::default_currency")]
    pub default_currency: String,
    #[serde(default = "BusinessConfig::default_contract_expiry_days")]
    pub contract_expiry_days: i64,
    #[serde(default = "BusinessConfig::default_page_size")]
    pub default_page_size: u32,
}

impl BusinessConfig {
    fn default_currency() -> String {
        "OMR".to_string()
    }

    const fn default_contract_expiry_days() -> i64 {
        180
    }

    const fn default_page_size() -> u32 {
        20
    }
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            default_currency: Self::default_currency(),
            contract_expiry_days: Self::default_contract_expiry_days(),
            default_page_size: Self::default_page_size(),
        }
    }
}

fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use portal_config::load;
///
/// std::env::remove_var("PORTAL_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("auth.jwt_secret", defaults.auth.jwt_secret.clone())?
        .set_default(
            "auth.access_token_ttl_seconds",
            clamp_to_i64(defaults.auth.access_token_ttl_seconds),
        )?
        .set_default(
            "auth.refresh_token_ttl_seconds",
            clamp_to_i64(defaults.auth.refresh_token_ttl_seconds),
        )?
        .set_default(
            "auth.session_ttl_seconds",
            clamp_to_i64(defaults.auth.session_ttl_seconds),
        )?;

    let mut environment_overrides = config::Environment::with_prefix("PORTAL")
        .separator("__")
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        environment_overrides = environment_overrides.with_list_parse_key(key);
    }

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("PORTAL_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via PORTAL_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    for extension in &mut config.storage.allowed_extensions {
        *extension = extension.trim().trim_start_matches('.').to_ascii_lowercase();
    }
    config
        .cors
        .allowed_origins
        .retain(|origin| !origin.trim().is_empty());

    debug!(
        address = %config.http.address,
        port = config.http.port,
        database = %config.database.url,
        storage = ?config.storage.backend,
        "loaded backend configuration"
    );
    Ok(config)
}
