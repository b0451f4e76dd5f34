use crate::HostingPlatform;
use crate::config::BackupConfig;
use crate::errors::BackupError;
use crate::metrics_defs::{BACKUP_DURATION, BACKUP_POLLS};
use crate::types::{AccessToken, AppTarget, BackupStatus, OperationId};
use shared::{counter, histogram};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

#[derive(Debug)]
enum PollState {
    Requesting,
    Polling { operation: OperationId },
    Waiting { operation: OperationId },
    Complete(BackupStatus),
}

/// Requests a backup of an application and waits for the platform to report
/// it complete.
///
/// The backup is requested exactly once. The status endpoint is then polled
/// with a fixed delay between attempts until it reports completion, the
/// attempt budget runs out, or the overall timeout elapses.
#[derive(Clone, Debug)]
pub struct BackupPoller {
    interval: Duration,
    max_attempts: u32,
    timeout: Duration,
}

impl BackupPoller {
    pub fn new(interval: Duration, max_attempts: u32, timeout: Duration) -> Self {
        BackupPoller {
            interval,
            max_attempts,
            timeout,
        }
    }

    pub async fn await_backup_completion(
        &self,
        platform: &dyn HostingPlatform,
        target: &AppTarget,
        token: &AccessToken,
    ) -> Result<BackupStatus, BackupError> {
        let started = Instant::now();
        let mut attempts = 0;

        let polled = timeout(
            self.timeout,
            self.drive(platform, target, token, &mut attempts),
        )
        .await;
        let result = match polled {
            Ok(result) => result,
            Err(_elapsed) => Err(BackupError::TimedOut {
                attempts,
                timeout_secs: self.timeout.as_secs(),
            }),
        };

        let outcome = match &result {
            Ok(_) => "complete",
            Err(e) if e.is_timeout() => "timeout",
            Err(_) => "failed",
        };
        histogram!(BACKUP_DURATION, "outcome" => outcome)
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn drive(
        &self,
        platform: &dyn HostingPlatform,
        target: &AppTarget,
        token: &AccessToken,
        attempts: &mut u32,
    ) -> Result<BackupStatus, BackupError> {
        let mut state = PollState::Requesting;

        loop {
            state = match state {
                PollState::Requesting => {
                    let operation = platform.request_backup(target, token).await?;
                    tracing::info!(%target, %operation, "Backup requested");
                    PollState::Polling { operation }
                }
                PollState::Polling { operation } => {
                    *attempts += 1;
                    counter!(BACKUP_POLLS).increment(1);
                    let status = platform.poll_backup_status(&operation, token).await?;
                    if status.complete {
                        PollState::Complete(status)
                    } else if *attempts >= self.max_attempts {
                        return Err(BackupError::AttemptsExhausted {
                            attempts: *attempts,
                        });
                    } else {
                        PollState::Waiting { operation }
                    }
                }
                PollState::Waiting { operation } => {
                    tracing::debug!(%operation, attempts = *attempts, "Backup still running");
                    sleep(self.interval).await;
                    PollState::Polling { operation }
                }
                PollState::Complete(status) => {
                    tracing::info!(%target, attempts = *attempts, "Backup complete");
                    return Ok(status);
                }
            };
        }
    }
}

impl From<&BackupConfig> for BackupPoller {
    fn from(config: &BackupConfig) -> Self {
        BackupPoller::new(
            config.poll_interval(),
            config.max_attempts,
            config.timeout(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PlatformClient;
    use crate::config::PlatformConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_backup_request(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/app/manage/takeBackup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"operation_id": 99})))
            .expect(1)
            .mount(server)
            .await;
    }

    fn client_for(server: &MockServer) -> PlatformClient {
        PlatformClient::new(&PlatformConfig {
            base_url: server.uri(),
            request_timeout_secs: Some(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_polls_until_complete() {
        let server = MockServer::start().await;
        mount_backup_request(&server).await;

        // Mocks are matched in mount order, so the first two polls see an
        // incomplete operation and the third sees it finished.
        Mock::given(method("GET"))
            .and(path("/operation/99"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_completed": "0"})))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operation/99"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"is_completed": "1", "id": 99})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let poller = BackupPoller::new(Duration::from_millis(10), 10, Duration::from_secs(5));
        let status = poller
            .await_backup_completion(
                &client_for(&server),
                &AppTarget::new("s1", "a1"),
                &AccessToken::new("tok"),
            )
            .await
            .unwrap();

        assert!(status.complete);
        assert_eq!(status.raw["id"], 99);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        mount_backup_request(&server).await;
        Mock::given(method("GET"))
            .and(path("/operation/99"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_completed": 0})))
            .expect(3)
            .mount(&server)
            .await;

        let poller = BackupPoller::new(Duration::from_millis(5), 3, Duration::from_secs(5));
        let err = poller
            .await_backup_completion(
                &client_for(&server),
                &AppTarget::new("s1", "a1"),
                &AccessToken::new("tok"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::AttemptsExhausted { attempts: 3 }));
        assert!(err.is_timeout());
        server.verify().await;
    }

    #[tokio::test]
    async fn test_overall_timeout() {
        let server = MockServer::start().await;
        mount_backup_request(&server).await;
        Mock::given(method("GET"))
            .and(path("/operation/99"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_completed": false})))
            .mount(&server)
            .await;

        let poller = BackupPoller::new(Duration::from_millis(50), 1000, Duration::from_millis(200));
        let err = poller
            .await_backup_completion(
                &client_for(&server),
                &AppTarget::new("s1", "a1"),
                &AccessToken::new("tok"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::TimedOut { .. }));
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_status_error_aborts() {
        let server = MockServer::start().await;
        mount_backup_request(&server).await;
        Mock::given(method("GET"))
            .and(path("/operation/99"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let poller = BackupPoller::new(Duration::from_millis(5), 10, Duration::from_secs(5));
        let err = poller
            .await_backup_completion(
                &client_for(&server),
                &AppTarget::new("s1", "a1"),
                &AccessToken::new("tok"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Platform(_)));
        assert!(!err.is_timeout());
        server.verify().await;
    }
}
