use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// A server/application pair on the hosting platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTarget {
    pub server_id: String,
    pub app_id: String,
}

impl AppTarget {
    pub fn new<S, A>(server_id: S, app_id: A) -> Self
    where
        S: Into<String>,
        A: Into<String>,
    {
        AppTarget {
            server_id: server_id.into(),
            app_id: app_id.into(),
        }
    }
}

impl fmt::Display for AppTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server_id, self.app_id)
    }
}

/// Bearer credential issued by the platform. Never logged.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        AccessToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Identifier of an asynchronous platform operation. The platform returns it
/// as a number, but it is only ever used as a path segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        OperationId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for OperationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) if !s.is_empty() => Ok(OperationId(s)),
            Value::Number(n) => Ok(OperationId(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "expected operation id, got {other}"
            ))),
        }
    }
}

/// Snapshot of a backup operation as reported by the status endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct BackupStatus {
    pub complete: bool,
    pub raw: Value,
}

impl BackupStatus {
    /// Reads the completion flag from a status response.
    ///
    /// The flag is `is_completed`, either at the top level or nested under
    /// `operation`, and may be a bool, a number or a numeric string.
    pub fn from_response(raw: Value) -> Option<Self> {
        let flag = raw
            .get("is_completed")
            .or_else(|| raw.get("operation").and_then(|op| op.get("is_completed")))?;

        let complete = match flag {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            Value::String(s) => match s.trim() {
                "true" => true,
                "false" | "" => false,
                other => other.parse::<f64>().is_ok_and(|v| v != 0.0),
            },
            _ => return None,
        };

        Some(BackupStatus { complete, raw })
    }
}

/// Direction of a staging/live sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncDirection {
    /// Copy the source application into the target (copy to staging).
    Pull,
    /// Push the source application over the target (copy to live).
    Push,
}

impl SyncDirection {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Pull => "pull",
            SyncDirection::Push => "push",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
