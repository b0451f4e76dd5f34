use crate::metrics_defs::{TRIGGER_DURATION, TRIGGER_OUTCOME};
use crate::store::{WebhookError, WebhookStore};
use crate::types::{Action, ID_FIELD, LogEntry, RecordError, RequestInfo, TYPE_FIELD, WebhookRecord};
use platform::errors::{BackupError, DecryptionError, PlatformError};
use platform::types::{AppTarget, SyncDirection};
use platform::{BackupPoller, CredentialUnwrapper, HostingPlatform};
use serde_json::Value;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;

#[derive(thiserror::Error, Debug)]
pub enum TriggerError {
    #[error("webhook not found")]
    NotFound,

    #[error("invalid action type: {0}")]
    InvalidType(#[source] RecordError),

    #[error("stored webhook is malformed: {0}")]
    InvalidRecord(#[source] RecordError),

    #[error("could not decrypt API key: {0}")]
    Decryption(#[from] DecryptionError),

    #[error("backup failed: {0}")]
    BackupFailed(#[source] BackupError),

    #[error("backup did not complete: {0}")]
    BackupTimeout(#[source] BackupError),

    #[error("remote call failed: {0}")]
    RemoteCall(#[from] PlatformError),

    #[error("storage failure: {0}")]
    Storage(#[source] WebhookError),
}

impl TriggerError {
    /// Short outcome label used in audit entries and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            TriggerError::NotFound => "not_found",
            TriggerError::InvalidType(_) => "invalid_type",
            TriggerError::InvalidRecord(_) => "invalid_record",
            TriggerError::Decryption(_) => "decryption_failed",
            TriggerError::BackupFailed(_) => "backup_failed",
            TriggerError::BackupTimeout(_) => "backup_timeout",
            TriggerError::RemoteCall(_) => "remote_call_failed",
            TriggerError::Storage(_) => "storage_failed",
        }
    }
}

impl From<RecordError> for TriggerError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::MissingType | RecordError::UnknownType(_) => TriggerError::InvalidType(e),
            RecordError::Invalid(_) => TriggerError::InvalidRecord(e),
        }
    }
}

impl From<BackupError> for TriggerError {
    fn from(e: BackupError) -> Self {
        if e.is_timeout() {
            TriggerError::BackupTimeout(e)
        } else {
            TriggerError::BackupFailed(e)
        }
    }
}

/// Runs a stored webhook: optional backup first, then the one remote action
/// the record names.
#[derive(Clone)]
pub struct Dispatcher {
    store: WebhookStore,
    platform: Arc<dyn HostingPlatform>,
    unwrapper: Arc<CredentialUnwrapper>,
    poller: BackupPoller,
}

impl Dispatcher {
    pub fn new(
        store: WebhookStore,
        platform: Arc<dyn HostingPlatform>,
        unwrapper: Arc<CredentialUnwrapper>,
        poller: BackupPoller,
    ) -> Self {
        Dispatcher {
            store,
            platform,
            unwrapper,
            poller,
        }
    }

    /// Triggers the webhook `id` and returns the platform's response to the
    /// dispatched action.
    ///
    /// Once the record is found an audit entry is written whatever the
    /// outcome. Audit failures are logged and do not change the result.
    pub async fn trigger(&self, id: &str, request: RequestInfo) -> Result<Value, TriggerError> {
        let started = Instant::now();

        let document = match self.store.read(id).await {
            Ok(document) => document,
            Err(WebhookError::NotFound) => {
                counter!(TRIGGER_OUTCOME, "action" => "unknown", "outcome" => "not_found")
                    .increment(1);
                return Err(TriggerError::NotFound);
            }
            Err(e) => return Err(TriggerError::Storage(e)),
        };

        let type_label = document
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let (action, result) = match WebhookRecord::from_document(&document) {
            Ok(record) => (record.action.name(), self.execute(&record).await),
            Err(e) => ("unknown", Err(e.into())),
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        match &result {
            Ok(_) => tracing::info!(webhook_id = %id, action, "Webhook triggered"),
            Err(e) => {
                tracing::warn!(webhook_id = %id, action, error = %e, "Webhook trigger failed")
            }
        }

        let entry = LogEntry::new(request, format!("trigger {type_label} action"))
            .with_field(ID_FIELD, id)
            .with_field("outcome", outcome);
        if let Err(e) = self.store.append_log(&entry).await {
            tracing::error!(webhook_id = %id, error = %e, "Failed to write audit entry");
        }

        counter!(TRIGGER_OUTCOME, "action" => action, "outcome" => outcome).increment(1);
        histogram!(TRIGGER_DURATION, "action" => action).record(started.elapsed().as_secs_f64());

        result
    }

    async fn execute(&self, record: &WebhookRecord) -> Result<Value, TriggerError> {
        let api_key = self.unwrapper.unwrap(&record.api_key)?;
        let token = self
            .platform
            .request_access_token(&record.email, &api_key)
            .await?;

        let target = record.target();
        if record.backup {
            self.poller
                .await_backup_completion(self.platform.as_ref(), &target, &token)
                .await?;
        }

        let result = match &record.action {
            Action::Deploy {
                branch_name,
                deploy_path,
            } => {
                self.platform
                    .pull_git(&target, branch_name, deploy_path, &token)
                    .await?
            }
            Action::CopyToLive {
                staging_server_id,
                staging_app_id,
            } => {
                let source = AppTarget::new(staging_server_id, staging_app_id);
                self.platform
                    .sync_app(&target, &source, SyncDirection::Push, &token)
                    .await?
            }
            Action::CopyToStaging {
                staging_server_id,
                staging_app_id,
            } => {
                let source = AppTarget::new(staging_server_id, staging_app_id);
                self.platform
                    .sync_app(&target, &source, SyncDirection::Pull, &token)
                    .await?
            }
        };
        Ok(result)
    }
}
