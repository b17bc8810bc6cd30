//! Configuration for Keyward
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

/// Keyward - local WebCrypto service
#[derive(Parser, Debug, Clone)]
#[command(name = "keyward")]
#[command(about = "Local WebCrypto service backed by software and token providers")]
pub struct Args {
    /// Unique identifier for this server instance
    #[arg(long, env = "KEYWARD_SERVER_ID", default_value_t = Uuid::new_v4())]
    pub server_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "KEYWARD_LISTEN", default_value = "127.0.0.1:31337")]
    pub listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Register the software provider
    #[arg(long, env = "KEYWARD_SOFTWARE_PROVIDER", default_value = "true", action = clap::ArgAction::Set)]
    pub software_provider: bool,

    /// Register the hardware token provider
    #[arg(long, env = "KEYWARD_TOKEN_PROVIDER", default_value = "true", action = clap::ArgAction::Set)]
    pub token_provider: bool,

    /// Register the hybrid provider (software compute, labelled storage)
    #[arg(long, env = "KEYWARD_HYBRID_PROVIDER", default_value = "false", action = clap::ArgAction::Set)]
    pub hybrid_provider: bool,

    /// Token login PIN
    #[arg(long, env = "KEYWARD_TOKEN_PIN", hide_env_values = true)]
    pub token_pin: Option<String>,

    /// Token label shown as the provider display name
    #[arg(long, env = "KEYWARD_TOKEN_LABEL", default_value = "Keyward Token")]
    pub token_label: String,

    /// Token serial number
    #[arg(long, env = "KEYWARD_TOKEN_SERIAL", default_value = "0000000000000001")]
    pub token_serial: String,

    /// Reader (slot) name the token is attached to
    #[arg(long, env = "KEYWARD_TOKEN_READER", default_value = "Keyward Virtual Reader 0")]
    pub token_reader: String,

    /// Directory for sealed software/hybrid storage (in-memory when unset)
    #[arg(long, env = "KEYWARD_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Passphrase sealing the storage files
    #[arg(long, env = "KEYWARD_STORAGE_PASSPHRASE", hide_env_values = true)]
    pub storage_passphrase: Option<String>,

    /// Maximum number of live handles across all sessions
    #[arg(long, env = "KEYWARD_MAX_HANDLES", default_value = "100000")]
    pub max_handles: usize,

    /// JSONL usage log path (disabled when unset)
    #[arg(long, env = "KEYWARD_USAGE_LOG")]
    pub usage_log: Option<PathBuf>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.software_provider && !self.token_provider && !self.hybrid_provider {
            return Err("At least one provider must be enabled".to_string());
        }

        if self.token_provider && self.token_pin.as_deref().unwrap_or("").is_empty() {
            return Err("KEYWARD_TOKEN_PIN is required when the token provider is enabled".to_string());
        }

        if self.storage_dir.is_some() && self.storage_passphrase.is_none() {
            return Err("KEYWARD_STORAGE_PASSPHRASE is required with KEYWARD_STORAGE_DIR".to_string());
        }

        if self.max_handles == 0 {
            return Err("KEYWARD_MAX_HANDLES must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Defaults with only the software provider, for tests and embedding.
    pub fn software_only() -> Self {
        Self {
            server_id: Uuid::new_v4(),
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "info".to_string(),
            software_provider: true,
            token_provider: false,
            hybrid_provider: false,
            token_pin: None,
            token_label: "Keyward Token".to_string(),
            token_serial: "0000000000000001".to_string(),
            token_reader: "Keyward Virtual Reader 0".to_string(),
            storage_dir: None,
            storage_passphrase: None,
            max_handles: 100_000,
            usage_log: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        let args = Args::parse_from(["keyward", "--token-pin", "1234"]);
        assert_eq!(args.listen.port(), 31337);
        assert!(args.software_provider);
        assert!(args.token_provider);
        assert!(!args.hybrid_provider);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_token_requires_pin() {
        let mut args = Args::software_only();
        args.token_provider = true;
        assert!(args.validate().is_err());
        args.token_pin = Some("1234".into());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_storage_requires_passphrase() {
        let mut args = Args::software_only();
        args.storage_dir = Some(PathBuf::from("/tmp/keyward"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_some_provider_required() {
        let mut args = Args::software_only();
        args.software_provider = false;
        assert!(args.validate().is_err());
    }
}
