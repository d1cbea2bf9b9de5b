//! Configuration loading and types for thumbforge.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs one collaborator: the HTTP
//! listener, object storage, the document database, the identity directory,
//! the push gateway, and the two handlers themselves.  Every field has a
//! default, so an empty file (or no file at all) yields a working local
//! development setup.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Document database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Push gateway settings.
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// User directory settings.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Thumbnail pipeline settings.
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,

    /// Follow notification settings.
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local`, `memory`, `gcp`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// GCP Cloud Storage configuration.
    #[serde(default)]
    pub gcp: Option<GcpStorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            gcp: None,
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory; objects live at `{root_dir}/{bucket}/{path}`.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,

    /// HMAC key used to sign read URLs.
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,

    /// Base URL that signed links are issued against.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
            signing_secret: default_signing_secret(),
            public_base_url: default_public_base_url(),
        }
    }
}

/// GCP Cloud Storage configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GcpStorageConfig {
    /// GCP project ID.
    #[serde(default)]
    pub project: String,
    /// Path to a service account JSON file.
    #[serde(default)]
    pub credentials_file: String,
    /// Service account used to sign URLs through the IAM API when no
    /// private key is available locally.
    #[serde(default)]
    pub signing_service_account: String,
}

/// Document database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Engine: `sqlite`, `memory`, `firestore`.
    #[serde(default = "default_database_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// Firestore-specific configuration.
    #[serde(default)]
    pub firestore: Option<FirestoreConfig>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: default_database_engine(),
            sqlite: SqliteConfig::default(),
            firestore: None,
        }
    }
}

/// SQLite-specific database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

/// Firestore configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FirestoreConfig {
    /// GCP project ID.
    pub project: String,
    /// Firestore database ID.
    #[serde(default = "default_firestore_database")]
    pub database: String,
    /// Path to a service account JSON file.
    #[serde(default)]
    pub credentials_file: String,
}

/// Push gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    /// Backend: `log` or `fcm`.
    #[serde(default = "default_messaging_backend")]
    pub backend: String,

    /// Firebase Cloud Messaging configuration.
    #[serde(default)]
    pub fcm: Option<FirebaseProjectConfig>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            backend: default_messaging_backend(),
            fcm: None,
        }
    }
}

/// User directory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Backend: `memory` or `firebase`.
    #[serde(default = "default_identity_backend")]
    pub backend: String,

    /// Firebase Authentication configuration.
    #[serde(default)]
    pub firebase: Option<FirebaseProjectConfig>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            backend: default_identity_backend(),
            firebase: None,
        }
    }
}

/// Project + credentials pair shared by the Firebase-hosted services.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FirebaseProjectConfig {
    /// GCP/Firebase project ID.
    pub project: String,
    /// Path to a service account JSON file.
    #[serde(default)]
    pub credentials_file: String,
}

/// Thumbnail pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    /// Maximum thumbnail width in pixels.
    #[serde(default = "default_thumb_bound")]
    pub max_width: u32,

    /// Maximum thumbnail height in pixels.
    #[serde(default = "default_thumb_bound")]
    pub max_height: u32,

    /// Basename prefix marking generated thumbnails.
    #[serde(default = "default_thumb_prefix")]
    pub prefix: String,

    /// Converter: `imagemagick` or `native`.
    #[serde(default = "default_converter")]
    pub converter: String,

    /// ImageMagick program name or path.
    #[serde(default = "default_convert_program")]
    pub convert_program: String,

    /// Local staging root. Defaults to `<tmp>/thumbforge`.
    #[serde(default)]
    pub staging_dir: Option<String>,

    /// Lifetime of issued signed links, in seconds.
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,

    /// Append-only list that receives `{path, thumbnail}` records.
    #[serde(default = "default_records_list")]
    pub records_list: String,
}

impl ThumbnailConfig {
    /// Resolved staging root.
    pub fn staging_root(&self) -> PathBuf {
        match &self.staging_dir {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::temp_dir().join("thumbforge"),
        }
    }

    /// Signed link lifetime as a [`Duration`].
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: default_thumb_bound(),
            max_height: default_thumb_bound(),
            prefix: default_thumb_prefix(),
            converter: default_converter(),
            convert_program: default_convert_program(),
            staging_dir: None,
            signed_url_ttl_secs: default_signed_url_ttl(),
            records_list: default_records_list(),
        }
    }
}

/// Follow notification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// Collection whose document creations trigger the notifier.
    #[serde(default = "default_follow_collection")]
    pub follow_collection: String,

    /// Collection holding associated profiles.
    #[serde(default = "default_profile_collection")]
    pub profile_collection: String,

    /// Collection holding device registrations.
    #[serde(default = "default_devices_collection")]
    pub devices_collection: String,

    /// Notification title.
    #[serde(default = "default_notification_title")]
    pub title: String,

    /// Notification body; `{displayName}` is replaced by the follower's name.
    #[serde(default = "default_notification_body")]
    pub body_template: String,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            follow_collection: default_follow_collection(),
            profile_collection: default_profile_collection(),
            devices_collection: default_devices_collection(),
            title: default_notification_title(),
            body_template: default_notification_body(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_signing_secret() -> String {
    "thumbforge-local-secret".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080/objects".to_string()
}

fn default_database_engine() -> String {
    "sqlite".to_string()
}

fn default_sqlite_path() -> String {
    "./data/documents.db".to_string()
}

fn default_firestore_database() -> String {
    "(default)".to_string()
}

fn default_messaging_backend() -> String {
    "log".to_string()
}

fn default_identity_backend() -> String {
    "memory".to_string()
}

fn default_thumb_bound() -> u32 {
    200
}

fn default_thumb_prefix() -> String {
    "thumb_".to_string()
}

fn default_converter() -> String {
    "imagemagick".to_string()
}

fn default_convert_program() -> String {
    "convert".to_string()
}

fn default_signed_url_ttl() -> u64 {
    15_778_800_000 // 500 years
}

fn default_records_list() -> String {
    "images".to_string()
}

fn default_follow_collection() -> String {
    "ProfileAssociatedFollow".to_string()
}

fn default_profile_collection() -> String {
    "ProfileAssociated".to_string()
}

fn default_devices_collection() -> String {
    "InfoDevice".to_string()
}

fn default_notification_title() -> String {
    "Tienes un nuevo seguidor!".to_string()
}

fn default_notification_body() -> String {
    "{displayName} es ahora tu seguidor.".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text. An empty document yields defaults.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.database.engine, "sqlite");
        assert_eq!(config.thumbnail.max_width, 200);
        assert_eq!(config.thumbnail.max_height, 200);
        assert_eq!(config.thumbnail.prefix, "thumb_");
        assert_eq!(config.thumbnail.records_list, "images");
        assert_eq!(config.notifications.devices_collection, "InfoDevice");
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let yaml = r#"
thumbnail:
  max_width: 320
  converter: native
storage:
  backend: gcp
  gcp:
    project: demo
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.thumbnail.max_width, 320);
        assert_eq!(config.thumbnail.max_height, 200);
        assert_eq!(config.thumbnail.converter, "native");
        let gcp = config.storage.gcp.unwrap();
        assert_eq!(gcp.project, "demo");
        assert!(gcp.credentials_file.is_empty());
    }

    #[test]
    fn test_firestore_database_default() {
        let yaml = r#"
database:
  engine: firestore
  firestore:
    project: demo
"#;
        let config = parse_config(yaml).unwrap();
        let fs = config.database.firestore.unwrap();
        assert_eq!(fs.database, "(default)");
    }

    #[test]
    fn test_staging_root_default_under_tmp() {
        let config = ThumbnailConfig::default();
        assert!(config.staging_root().starts_with(std::env::temp_dir()));

        let config = ThumbnailConfig {
            staging_dir: Some("/var/stage".to_string()),
            ..ThumbnailConfig::default()
        };
        assert_eq!(config.staging_root(), PathBuf::from("/var/stage"));
    }

    #[test]
    fn test_signed_url_ttl_is_centuries() {
        let ttl = ThumbnailConfig::default().signed_url_ttl();
        assert!(ttl.as_secs() > 400 * 365 * 86_400);
    }

    #[test]
    fn test_load_config_missing_file_errors() {
        assert!(load_config("/definitely/not/here.yaml").is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../thumbforge.example.yaml")).unwrap();
        assert_eq!(config.storage.local.public_base_url, "http://localhost:8080/objects");
        assert_eq!(config.messaging.backend, "log");
        assert_eq!(config.logging.format, "text");
        assert_eq!(
            config.notifications.body_template,
            "{displayName} es ahora tu seguidor."
        );
    }
}
