//! Collaborator wiring.
//!
//! Turns a [`Config`] into concrete backends and the shared [`AppState`].
//! Each `build_*` function selects a backend by its config string, the same
//! way for the server and for one-shot CLI runs.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::converter::imagemagick::ImageMagickConverter;
use crate::converter::native::NativeConverter;
use crate::converter::{Bounds, ImageConverter};
use crate::credentials::GoogleCredentials;
use crate::identity::directory::UserDirectory;
use crate::identity::firebase::FirebaseUserDirectory;
use crate::identity::memory::MemoryUserDirectory;
use crate::messaging::fcm::FcmMessenger;
use crate::messaging::gateway::Messenger;
use crate::messaging::log::LogMessenger;
use crate::metadata::firestore::FirestoreDocumentStore;
use crate::metadata::memory::MemoryDocumentStore;
use crate::metadata::sqlite::SqliteDocumentStore;
use crate::metadata::store::DocumentStore;
use crate::pipeline::follow::FollowNotifier;
use crate::pipeline::thumbnail::{ThumbnailPipeline, ThumbnailSettings};
use crate::staging::Staging;
use crate::storage::backend::ObjectStorage;
use crate::storage::gcp::GcsBackend;
use crate::storage::local::LocalBackend;
use crate::storage::memory::MemoryBackend;
use crate::AppState;

/// Storage backend plus, for `local`, the concrete handle that serves links.
pub struct StorageHandles {
    pub storage: Arc<dyn ObjectStorage>,
    pub local: Option<Arc<LocalBackend>>,
}

fn google_credentials(
    client: &reqwest::Client,
    credentials_file: &str,
    signing_account: &str,
) -> Arc<GoogleCredentials> {
    Arc::new(GoogleCredentials::new(
        client.clone(),
        credentials_file,
        signing_account,
    ))
}

/// Resolve the config section a selected backend needs.
fn require<'a, T>(
    section: &'a Option<T>,
    selector: &str,
    value: &str,
    name: &str,
) -> anyhow::Result<&'a T> {
    section.as_ref().ok_or_else(|| {
        anyhow::anyhow!("{selector} is '{value}' but {name} config section is missing")
    })
}

pub fn build_storage(config: &Config, client: &reqwest::Client) -> anyhow::Result<StorageHandles> {
    match config.storage.backend.as_str() {
        "gcp" => {
            let gcp = require(&config.storage.gcp, "storage.backend", "gcp", "storage.gcp")?;
            let creds = google_credentials(
                client,
                &gcp.credentials_file,
                &gcp.signing_service_account,
            );
            info!("GCS storage backend initialized: project={}", gcp.project);
            Ok(StorageHandles {
                storage: Arc::new(GcsBackend::new(creds)),
                local: None,
            })
        }
        "memory" => {
            info!("In-memory storage backend initialized");
            Ok(StorageHandles {
                storage: Arc::new(MemoryBackend::new()),
                local: None,
            })
        }
        "local" => {
            let local = &config.storage.local;
            let backend = Arc::new(LocalBackend::new(
                &local.root_dir,
                &local.signing_secret,
                &local.public_base_url,
            )?);
            info!("Local storage backend initialized at {}", local.root_dir);
            Ok(StorageHandles {
                storage: backend.clone(),
                local: Some(backend),
            })
        }
        other => anyhow::bail!("unknown storage.backend '{other}'"),
    }
}

pub fn build_document_store(
    config: &Config,
    client: &reqwest::Client,
) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.database.engine.as_str() {
        "firestore" => {
            let fs = require(
                &config.database.firestore,
                "database.engine",
                "firestore",
                "database.firestore",
            )?;
            let creds = google_credentials(client, &fs.credentials_file, "");
            info!(
                "Firestore document store initialized: project={} database={}",
                fs.project, fs.database
            );
            Ok(Arc::new(FirestoreDocumentStore::new(fs, creds)))
        }
        "memory" => {
            info!("In-memory document store initialized");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        "sqlite" => {
            let path = &config.database.sqlite.path;
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteDocumentStore::new(path)?;
            info!("SQLite document store initialized at {}", path);
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown database.engine '{other}'"),
    }
}

pub fn build_converter(config: &Config) -> anyhow::Result<Arc<dyn ImageConverter>> {
    let thumb = &config.thumbnail;
    match thumb.converter.as_str() {
        "imagemagick" => {
            let converter = ImageMagickConverter::new(&thumb.convert_program)?;
            info!("ImageMagick converter using '{}'", thumb.convert_program);
            Ok(Arc::new(converter))
        }
        "native" => {
            info!("Native image converter initialized");
            Ok(Arc::new(NativeConverter::new()))
        }
        other => anyhow::bail!("unknown thumbnail.converter '{other}'"),
    }
}

pub fn build_messenger(
    config: &Config,
    client: &reqwest::Client,
) -> anyhow::Result<Arc<dyn Messenger>> {
    match config.messaging.backend.as_str() {
        "fcm" => {
            let fcm = require(&config.messaging.fcm, "messaging.backend", "fcm", "messaging.fcm")?;
            let creds = google_credentials(client, &fcm.credentials_file, "");
            info!("FCM messenger initialized: project={}", fcm.project);
            Ok(Arc::new(FcmMessenger::new(&fcm.project, creds)))
        }
        "log" => Ok(Arc::new(LogMessenger)),
        other => anyhow::bail!("unknown messaging.backend '{other}'"),
    }
}

pub fn build_user_directory(
    config: &Config,
    client: &reqwest::Client,
) -> anyhow::Result<Arc<dyn UserDirectory>> {
    match config.identity.backend.as_str() {
        "firebase" => {
            let fb = require(
                &config.identity.firebase,
                "identity.backend",
                "firebase",
                "identity.firebase",
            )?;
            let creds = google_credentials(client, &fb.credentials_file, "");
            info!("Firebase user directory initialized: project={}", fb.project);
            Ok(Arc::new(FirebaseUserDirectory::new(&fb.project, creds)))
        }
        "memory" => Ok(Arc::new(MemoryUserDirectory::new())),
        other => anyhow::bail!("unknown identity.backend '{other}'"),
    }
}

/// Pipeline tunables from the `thumbnail` section.
pub fn thumbnail_settings(config: &Config) -> ThumbnailSettings {
    let thumb = &config.thumbnail;
    ThumbnailSettings {
        bounds: Bounds::new(thumb.max_width, thumb.max_height),
        prefix: thumb.prefix.clone(),
        signed_url_ttl: thumb.signed_url_ttl(),
        records_list: thumb.records_list.clone(),
    }
}

/// Build every collaborator and the shared application state.
pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let client = GoogleCredentials::http_client()?;

    let StorageHandles { storage, local } = build_storage(&config, &client)?;
    let store = build_document_store(&config, &client)?;
    let converter = build_converter(&config)?;
    let messenger = build_messenger(&config, &client)?;
    let directory = build_user_directory(&config, &client)?;

    let staging = Staging::new(config.thumbnail.staging_root());
    info!("Staging files under {}", staging.root().display());

    let pipeline = ThumbnailPipeline::new(
        storage,
        converter,
        store.clone(),
        staging,
        thumbnail_settings(&config),
    );
    let notifier = FollowNotifier::new(
        store,
        directory,
        messenger,
        config.notifications,
    );

    Ok(AppState {
        pipeline: Arc::new(pipeline),
        notifier: Arc::new(notifier),
        local_objects: local,
    })
}
