use reqwest::StatusCode;

/// Errors returned by calls to the hosting platform API.
#[derive(thiserror::Error, Debug)]
pub enum PlatformError {
    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned an unexpected response: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("could not build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl PlatformError {
    /// The HTTP status returned by the platform, if the call got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PlatformError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors while unwrapping a stored API key.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DecryptionError {
    #[error("field {field} is not valid base64")]
    InvalidEncoding { field: &'static str },

    #[error("field {field} has length {actual}, expected {expected}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("authentication tag did not verify")]
    TagMismatch,

    #[error("decrypted key is not valid UTF-8")]
    InvalidPlaintext,

    #[error("encryption failed")]
    Encryption,
}

/// Errors produced while waiting for a backup to finish.
#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error("backup call failed: {0}")]
    Platform(#[from] PlatformError),

    #[error("backup still incomplete after {attempts} status polls")]
    AttemptsExhausted { attempts: u32 },

    #[error("backup did not complete within {timeout_secs}s ({attempts} status polls)")]
    TimedOut { attempts: u32, timeout_secs: u64 },
}

impl BackupError {
    /// True when the backup was abandoned because it exceeded the poll bounds
    /// rather than because a call failed.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BackupError::AttemptsExhausted { .. } | BackupError::TimedOut { .. }
        )
    }
}
