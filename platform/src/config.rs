use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.cloudways.com/api/v1";

/// Hosting platform API settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PlatformConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout. The transport default applies when unset.
    pub request_timeout_secs: Option<u64>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            base_url: default_base_url(),
            request_timeout_secs: None,
        }
    }
}

/// Bounds for waiting on a backup operation.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackupConfig {
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            poll_interval_secs: 5,
            max_attempts: 120,
            timeout_secs: 900,
        }
    }
}

impl BackupConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
