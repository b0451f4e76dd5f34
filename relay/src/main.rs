use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError};
use platform::CredentialUnwrapper;
use platform::errors::DecryptionError;
use std::path::PathBuf;
use std::process::ExitCode;
use telemetry::TelemetryError;
use webhooks::WebhooksError;

mod config;
mod telemetry;

#[derive(Parser)]
#[command(name = "relay", version, about = "Webhook relay for hosting platform actions")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the webhook API.
    Run(RunArgs),
    /// Encrypt a platform API key into the form stored in webhook records.
    EncryptKey(EncryptKeyArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, default_value = "relay.yaml")]
    config_path: PathBuf,
}

#[derive(Args)]
struct EncryptKeyArgs {
    api_key: String,
    /// Read `api_secret` from this config file instead of `API_SECRET`.
    #[arg(long)]
    config_path: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Webhooks(#[from] WebhooksError),
    #[error("could not encrypt key: {0}")]
    Encrypt(#[from] DecryptionError),
    #[error("could not serialize key: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no api_secret configured; set API_SECRET or pass --config-path")]
    MissingApiSecret,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Run(args) => run(args),
        CliCommand::EncryptKey(args) => encrypt_key(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: RunArgs) -> Result<(), CliError> {
    let config = Config::load(&args.config_path, |k| std::env::var(k).ok())?;
    let _telemetry = telemetry::init(&config.common)?;

    tracing::info!(config = %args.config_path.display(), "Starting webhook relay");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(webhooks::run(config.webhooks))?;
    Ok(())
}

fn encrypt_key(args: EncryptKeyArgs) -> Result<(), CliError> {
    let api_secret = match &args.config_path {
        Some(path) => Config::from_file(path)?.webhooks.api_secret,
        None => std::env::var("API_SECRET").unwrap_or_default(),
    };
    if api_secret.is_empty() {
        return Err(CliError::MissingApiSecret);
    }

    let encrypted = CredentialUnwrapper::new(api_secret).wrap(&args.api_key)?;
    println!("{}", serde_json::to_string_pretty(&encrypted)?);
    Ok(())
}
