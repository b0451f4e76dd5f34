use platform::config::{BackupConfig, PlatformConfig};
use serde::Deserialize;
use std::path::PathBuf;
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Invalid port value: {0}")]
    InvalidPortValue(String),

    #[error("secret_key must be set")]
    EmptySecretKey,

    #[error("api_secret must be set")]
    EmptyApiSecret,

    #[error("backup.max_attempts must be at least 1")]
    ZeroPollAttempts,

    #[error("Unsupported storage connection string: {0}")]
    InvalidConnectionString(String),
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreType {
    Filesystem { path: PathBuf },
    Memory,
}

impl Default for StoreType {
    fn default() -> Self {
        StoreType::Filesystem {
            path: PathBuf::from("data"),
        }
    }
}

impl StoreType {
    /// Parses a storage connection string.
    ///
    /// `memory:` selects the in-memory store, `file:///some/dir` or a bare
    /// path selects the filesystem store.
    pub fn from_connection_string(value: &str) -> Result<Self, ValidationError> {
        let value = value.trim();
        let invalid = || ValidationError::InvalidConnectionString(value.to_string());

        if value.is_empty() {
            return Err(invalid());
        }
        if value == "memory:" || value == "memory://" {
            return Ok(StoreType::Memory);
        }
        if value.starts_with("file:") {
            let url = Url::parse(value).map_err(|_| invalid())?;
            let path = url.to_file_path().map_err(|_| invalid())?;
            return Ok(StoreType::Filesystem { path });
        }
        if value.contains("://") {
            return Err(invalid());
        }
        Ok(StoreType::Filesystem {
            path: PathBuf::from(value),
        })
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    /// Shared secret required in the body of every management request.
    #[serde(default)]
    pub secret_key: String,
    /// Secret the per-record API key encryption keys are derived from.
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub store: StoreType,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if self.secret_key.is_empty() {
            return Err(ValidationError::EmptySecretKey);
        }
        if self.api_secret.is_empty() {
            return Err(ValidationError::EmptyApiSecret);
        }
        if self.backup.max_attempts == 0 {
            return Err(ValidationError::ZeroPollAttempts);
        }

        Ok(())
    }

    /// Applies the environment variables the service has always been deployed
    /// with: `PORT`, `SECRET_KEY`, `API_SECRET` and `DATABASE_URL`.
    pub fn apply_env_overrides<F>(&mut self, var: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("PORT") {
            self.listener.port = port
                .trim()
                .parse()
                .map_err(|_| ValidationError::InvalidPortValue(port))?;
        }
        if let Some(secret_key) = var("SECRET_KEY") {
            self.secret_key = secret_key;
        }
        if let Some(api_secret) = var("API_SECRET") {
            self.api_secret = api_secret;
        }
        if let Some(url) = var("DATABASE_URL") {
            self.store = StoreType::from_connection_string(&url)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> Config {
        Config {
            secret_key: "s3cret".into(),
            api_secret: "api".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_config() {
        let yaml = r#"
listener:
    host: 0.0.0.0
    port: 8080
secret_key: s3cret
api_secret: api
store:
    type: filesystem
    path: /var/lib/relay
platform:
    base_url: http://platform.internal/api/v1
backup:
    poll_interval_secs: 2
    max_attempts: 10
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listener.port, 8080);
        assert_eq!(
            config.store,
            StoreType::Filesystem {
                path: "/var/lib/relay".into()
            }
        );
        assert_eq!(config.platform.base_url, "http://platform.internal/api/v1");
        assert_eq!(config.backup.max_attempts, 10);
        assert_eq!(config.backup.timeout_secs, 900);
    }

    #[test]
    fn test_memory_store() {
        let config: Config = serde_yaml::from_str("store:\n    type: memory\n").unwrap();
        assert_eq!(config.store, StoreType::Memory);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = valid_config();
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = valid_config();
        config.secret_key.clear();
        assert_eq!(config.validate(), Err(ValidationError::EmptySecretKey));

        let mut config = valid_config();
        config.api_secret.clear();
        assert_eq!(config.validate(), Err(ValidationError::EmptyApiSecret));

        let mut config = valid_config();
        config.backup.max_attempts = 0;
        assert_eq!(config.validate(), Err(ValidationError::ZeroPollAttempts));
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("PORT", "4000"),
            ("SECRET_KEY", "from-env"),
            ("API_SECRET", "api-from-env"),
            ("DATABASE_URL", "file:///srv/relay"),
        ]);
        let mut config = Config::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.listener.port, 4000);
        assert_eq!(config.secret_key, "from-env");
        assert_eq!(config.api_secret, "api-from-env");
        assert_eq!(
            config.store,
            StoreType::Filesystem {
                path: "/srv/relay".into()
            }
        );

        let mut config = Config::default();
        let err = config
            .apply_env_overrides(|k| (k == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidPortValue("http".into()));
    }

    #[test]
    fn test_connection_strings() {
        assert_eq!(
            StoreType::from_connection_string("memory:"),
            Ok(StoreType::Memory)
        );
        assert_eq!(
            StoreType::from_connection_string("./data"),
            Ok(StoreType::Filesystem {
                path: "./data".into()
            })
        );
        assert!(matches!(
            StoreType::from_connection_string("postgres://localhost:5432/relay"),
            Err(ValidationError::InvalidConnectionString(_))
        ));
        assert!(StoreType::from_connection_string("").is_err());
    }
}
