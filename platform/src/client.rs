use crate::HostingPlatform;
use crate::config::PlatformConfig;
use crate::errors::PlatformError;
use crate::metrics_defs::REMOTE_CALL_FAILURES;
use crate::types::{AccessToken, AppTarget, BackupStatus, OperationId, SyncDirection};
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::counter;
use std::time::Duration;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: AccessToken,
}

#[derive(Deserialize)]
struct BackupResponse {
    operation_id: OperationId,
}

/// HTTP client for the hosting platform REST API.
///
/// Every call is a single request: no retries, and any non-2xx status is
/// returned as `PlatformError::Status` with the response body attached.
#[derive(Clone)]
pub struct PlatformClient {
    client: reqwest::Client,
    base_url: String,
}

impl PlatformClient {
    pub fn new(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(PlatformError::ClientBuild)?;

        // Validate once so per-call URL building only fails on bad path input.
        Url::parse(&config.base_url).map_err(|e| PlatformError::InvalidUrl(e.to_string()))?;

        Ok(PlatformClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, PlatformError> {
        let full = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&full).map_err(|e| PlatformError::InvalidUrl(e.to_string()))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        token: Option<&AccessToken>,
    ) -> Result<T, PlatformError> {
        let result = self.send(operation, method, path, query, token).await;
        if let Err(e) = &result {
            counter!(REMOTE_CALL_FAILURES, "operation" => operation).increment(1);
            tracing::warn!(operation, error = %e, "Hosting platform call failed");
        }
        result
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        token: Option<&AccessToken>,
    ) -> Result<T, PlatformError> {
        let url = self.endpoint(path)?;
        let mut request = self.client.request(method, url).query(query);
        if let Some(token) = token {
            request = request.bearer_auth(token.as_str());
        }

        let transport = |source| PlatformError::Transport { operation, source };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Status {
                operation,
                status,
                body,
            });
        }

        let bytes = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&bytes).map_err(|e| PlatformError::InvalidResponse {
            operation,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl HostingPlatform for PlatformClient {
    async fn request_access_token(
        &self,
        email: &str,
        api_key: &str,
    ) -> Result<AccessToken, PlatformError> {
        let response: TokenResponse = self
            .call(
                "access_token",
                Method::POST,
                "oauth/access_token",
                &[("email", email), ("api_key", api_key)],
                None,
            )
            .await?;
        Ok(response.access_token)
    }

    async fn request_backup(
        &self,
        target: &AppTarget,
        token: &AccessToken,
    ) -> Result<OperationId, PlatformError> {
        let response: BackupResponse = self
            .call(
                "take_backup",
                Method::POST,
                "app/manage/takeBackup",
                &[
                    ("server_id", target.server_id.as_str()),
                    ("app_id", target.app_id.as_str()),
                ],
                Some(token),
            )
            .await?;
        Ok(response.operation_id)
    }

    async fn poll_backup_status(
        &self,
        operation: &OperationId,
        token: &AccessToken,
    ) -> Result<BackupStatus, PlatformError> {
        let path = format!("operation/{}", operation.as_str());
        let raw: Value = self
            .call("operation_status", Method::GET, &path, &[], Some(token))
            .await?;
        BackupStatus::from_response(raw).ok_or(PlatformError::InvalidResponse {
            operation: "operation_status",
            reason: "missing is_completed flag".into(),
        })
    }

    async fn pull_git(
        &self,
        target: &AppTarget,
        branch_name: &str,
        deploy_path: &str,
        token: &AccessToken,
    ) -> Result<Value, PlatformError> {
        self.call(
            "git_pull",
            Method::POST,
            "git/pull",
            &[
                ("server_id", target.server_id.as_str()),
                ("app_id", target.app_id.as_str()),
                ("branch_name", branch_name),
                ("deploy_path", deploy_path),
            ],
            Some(token),
        )
        .await
    }

    async fn sync_app(
        &self,
        target: &AppTarget,
        source: &AppTarget,
        direction: SyncDirection,
        token: &AccessToken,
    ) -> Result<Value, PlatformError> {
        self.call(
            "sync_app",
            Method::POST,
            "sync/app",
            &[
                ("server_id", target.server_id.as_str()),
                ("app_id", target.app_id.as_str()),
                ("source_server_id", source.server_id.as_str()),
                ("source_app_id", source.app_id.as_str()),
                ("action", direction.as_str()),
            ],
            Some(token),
        )
        .await
    }
}
