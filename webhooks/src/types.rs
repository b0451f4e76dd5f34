use chrono::{DateTime, Utc};
use platform::EncryptedApiKey;
use platform::types::AppTarget;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A webhook record or log entry as stored: a JSON object that may carry
/// fields beyond the ones the relay understands.
pub type Document = serde_json::Map<String, Value>;

pub const ID_FIELD: &str = "webhookId";
pub const TYPE_FIELD: &str = "type";
pub const SECRET_FIELD: &str = "secretKey";

const KNOWN_TYPES: &[&str] = &[
    "deploy",
    "copy-to-live",
    "copy-to-staging",
    "copytolive",
    "copytostaging",
];

#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    #[error("webhook type is missing")]
    MissingType,

    #[error("unknown webhook type: {0}")]
    UnknownType(String),

    #[error("{0}")]
    Invalid(#[from] serde_json::Error),
}

/// What a webhook does when triggered. Each variant carries exactly the fields
/// that action needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Action {
    Deploy {
        branch_name: String,
        deploy_path: String,
    },
    #[serde(alias = "copytolive")]
    CopyToLive {
        #[serde(deserialize_with = "platform_id")]
        staging_server_id: String,
        #[serde(deserialize_with = "platform_id")]
        staging_app_id: String,
    },
    #[serde(alias = "copytostaging")]
    CopyToStaging {
        #[serde(deserialize_with = "platform_id")]
        staging_server_id: String,
        #[serde(deserialize_with = "platform_id")]
        staging_app_id: String,
    },
}

/// Platform server and application ids arrive as numbers or strings. They
/// only ever end up in a query string, so both read as text.
fn platform_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected server or application id, got {other}"
        ))),
    }
}

impl Action {
    pub const fn name(&self) -> &'static str {
        match self {
            Action::Deploy { .. } => "deploy",
            Action::CopyToLive { .. } => "copy-to-live",
            Action::CopyToStaging { .. } => "copy-to-staging",
        }
    }
}

/// Typed view of a stored webhook document.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRecord {
    pub webhook_id: String,
    #[serde(deserialize_with = "platform_id")]
    pub server_id: String,
    #[serde(deserialize_with = "platform_id")]
    pub app_id: String,
    pub email: String,
    pub api_key: EncryptedApiKey,
    #[serde(default)]
    pub backup: bool,
    #[serde(flatten)]
    pub action: Action,
}

impl WebhookRecord {
    pub fn from_document(document: &Document) -> Result<Self, RecordError> {
        match document.get(TYPE_FIELD) {
            None | Some(Value::Null) => return Err(RecordError::MissingType),
            Some(Value::String(tag)) if KNOWN_TYPES.contains(&tag.as_str()) => {}
            Some(Value::String(tag)) => return Err(RecordError::UnknownType(tag.clone())),
            Some(other) => return Err(RecordError::UnknownType(other.to_string())),
        }

        Ok(serde_json::from_value(Value::Object(document.clone()))?)
    }

    pub fn target(&self) -> AppTarget {
        AppTarget::new(&self.server_id, &self.app_id)
    }
}

/// The parts of an inbound request that are kept in the audit log.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestInfo {
    pub hostname: String,
    pub path: String,
    pub body: Document,
}

/// One audit log line: the request body merged with request metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(flatten)]
    pub body: Document,
    pub hostname: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub request_type: String,
}

impl LogEntry {
    pub fn new(request: RequestInfo, request_type: impl Into<String>) -> Self {
        let mut body = request.body;
        body.remove(SECRET_FIELD);
        for reserved in ["hostname", "path", "timestamp", "request_type"] {
            body.remove(reserved);
        }

        LogEntry {
            body,
            hostname: request.hostname,
            path: request.path,
            timestamp: Utc::now(),
            request_type: request_type.into(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }
}
