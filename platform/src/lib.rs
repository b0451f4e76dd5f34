//! Client side of the hosting platform: REST calls, API key unwrapping and
//! backup polling.

pub mod backup;
pub mod client;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod metrics_defs;
pub mod types;

use async_trait::async_trait;
use errors::PlatformError;
use serde_json::Value;
use types::{AccessToken, AppTarget, BackupStatus, OperationId, SyncDirection};

pub use backup::BackupPoller;
pub use client::PlatformClient;
pub use credentials::{CredentialUnwrapper, EncryptedApiKey};

/// The remote operations the relay performs on a customer's behalf.
///
/// `PlatformClient` is the real implementation; tests substitute fakes that
/// record which calls were made.
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    async fn request_access_token(
        &self,
        email: &str,
        api_key: &str,
    ) -> Result<AccessToken, PlatformError>;

    async fn request_backup(
        &self,
        target: &AppTarget,
        token: &AccessToken,
    ) -> Result<OperationId, PlatformError>;

    async fn poll_backup_status(
        &self,
        operation: &OperationId,
        token: &AccessToken,
    ) -> Result<BackupStatus, PlatformError>;

    async fn pull_git(
        &self,
        target: &AppTarget,
        branch_name: &str,
        deploy_path: &str,
        token: &AccessToken,
    ) -> Result<Value, PlatformError>;

    async fn sync_app(
        &self,
        target: &AppTarget,
        source: &AppTarget,
        direction: SyncDirection,
        token: &AccessToken,
    ) -> Result<Value, PlatformError>;
}
