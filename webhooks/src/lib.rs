//! Webhook relay: stores webhook definitions and, when one is triggered, runs
//! the hosting platform action it describes.

pub mod api;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod metrics_defs;
pub mod storage;
pub mod store;
pub mod types;

use api::{ApiServerError, AppState};
use auth::SharedSecret;
use config::{Config, StoreType, ValidationError};
use dispatcher::Dispatcher;
use platform::errors::PlatformError;
use platform::{BackupPoller, CredentialUnwrapper, PlatformClient};
use std::sync::Arc;
use storage::{FilesystemBackend, MemoryBackend, StorageBackend, StoreError};
use store::WebhookStore;

#[derive(thiserror::Error, Debug)]
pub enum WebhooksError {
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),

    #[error("could not open storage: {0}")]
    Storage(#[from] StoreError),

    #[error("could not build platform client: {0}")]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Server(#[from] ApiServerError),
}

pub async fn get_backend(store: &StoreType) -> Result<Arc<dyn StorageBackend>, StoreError> {
    match store {
        StoreType::Filesystem { path } => {
            tracing::info!(path = %path.display(), "Using filesystem storage");
            Ok(Arc::new(FilesystemBackend::open(path).await?))
        }
        StoreType::Memory => {
            tracing::warn!("Using in-memory storage. Webhooks are lost on restart.");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

pub async fn build_state(config: &Config) -> Result<AppState, WebhooksError> {
    let backend = get_backend(&config.store).await?;
    let store = WebhookStore::new(backend);

    let platform = Arc::new(PlatformClient::new(&config.platform)?);
    let unwrapper = Arc::new(CredentialUnwrapper::new(config.api_secret.clone()));
    let poller = BackupPoller::from(&config.backup);
    let dispatcher = Dispatcher::new(store.clone(), platform, unwrapper, poller);

    Ok(AppState {
        store,
        dispatcher,
        secret: SharedSecret::new(config.secret_key.clone()),
    })
}

pub async fn run(config: Config) -> Result<(), WebhooksError> {
    config.validate()?;
    let state = build_state(&config).await?;
    api::serve(config.listener, state).await?;
    Ok(())
}
