//! Configuration management commands.

use clap::Args;
use pixelbridge_core::config::Config;
use pixelbridge_core::error::ConfigError;
use pixelbridge_core::paths;
use serde_json::Value;
use std::path::Path;

/// Config command arguments.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(clap::Subcommand)]
pub enum ConfigCommand {
    /// Show configuration (token redacted)
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key (dot-separated path)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Value to set
        value: String,
    },

    /// Initialize configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => paths::config_file()?,
    };

    match args.command {
        ConfigCommand::Show => {
            let config = load_or_default(&path)?.with_env_overrides();
            println!("{}", serde_json::to_string_pretty(&redacted(&config)?)?);
        }

        ConfigCommand::Get { key } => {
            let config = load_or_default(&path)?.with_env_overrides();
            let json = redacted(&config)?;
            match lookup(&json, &key) {
                Some(v) => println!("{}", serde_json::to_string_pretty(v)?),
                None => anyhow::bail!("Key not found: {}", key),
            }
        }

        ConfigCommand::Set { key, value } => {
            // Env overrides stay out of the file
            let config = load_or_default(&path)?;
            let updated = set_value(&config, &key, &value)?;
            updated.validate()?;
            updated.save(&path)?;

            println!("Set {} = {}", key, value);
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {:?}. Use --force to overwrite.",
                    path
                );
            }

            Config::default().save(&path)?;
            println!("Created config file: {:?}", path);
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
        }

        ConfigCommand::Validate => match Config::load(&path) {
            Ok(config) => match config.validate() {
                Ok(()) => println!("Configuration is valid"),
                Err(e) => anyhow::bail!("Configuration error: {}", e),
            },
            Err(e) => anyhow::bail!("Failed to load config: {}", e),
        },
    }

    Ok(())
}

fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    match Config::load(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => Ok(Config::default()),
        Err(e) => Err(e),
    }
}

/// JSON view of the config with the gateway token masked.
fn redacted(config: &Config) -> serde_json::Result<Value> {
    let mut json = serde_json::to_value(config)?;
    if let Some(token) = json.pointer_mut("/gateway/token") {
        if !token.is_null() {
            *token = Value::String("[REDACTED]".to_string());
        }
    }
    Ok(json)
}

fn lookup<'a>(json: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(json, |acc, k| acc.get(k))
}

/// Set a dot-separated key, creating intermediate objects as needed.
///
/// The raw value is parsed as JSON first (numbers, bools, arrays) and falls
/// back to a plain string.
fn set_value(config: &Config, key: &str, raw: &str) -> anyhow::Result<Config> {
    let mut json = serde_json::to_value(config)?;

    let parts: Vec<&str> = key.split('.').collect();
    let mut current = &mut json;
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            let parsed: Value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            current[part] = parsed;
        } else {
            if !current.get(part).map_or(false, |v| v.is_object()) {
                current[part] = serde_json::json!({});
            }
            current = &mut current[part];
        }
    }

    serde_json::from_value(json)
        .map_err(|e| anyhow::anyhow!("Invalid configuration after set: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelbridge_core::config::{BindMode, LogLevel};
    use std::path::PathBuf;

    #[test]
    fn test_lookup_dot_path() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(lookup(&json, "observer.port").unwrap().as_u64(), Some(3300));
        assert!(lookup(&json, "observer.nope").is_none());
    }

    #[test]
    fn test_set_number_and_enum() {
        let config = set_value(&Config::default(), "observer.port", "4400").unwrap();
        assert_eq!(config.observer.port, 4400);

        let config = set_value(&config, "observer.bind", "lan").unwrap();
        assert_eq!(config.observer.bind, BindMode::Lan);

        let config = set_value(&config, "logging.level", "debug").unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let config =
            set_value(&Config::default(), "assets.catalog_path", "/srv/catalog.json").unwrap();
        assert_eq!(
            config.assets.catalog_path,
            Some(PathBuf::from("/srv/catalog.json"))
        );
    }

    #[test]
    fn test_set_invalid_shape_fails() {
        assert!(set_value(&Config::default(), "gateway", "\"not-an-object\"").is_err());
        assert!(set_value(&Config::default(), "observer.port", "many").is_err());
    }

    #[test]
    fn test_show_redacts_token() {
        let mut config = Config::default();
        config.gateway.token = Some("gw-secret".into());
        let json = redacted(&config).unwrap();
        assert_eq!(json["gateway"]["token"], "[REDACTED]");
        assert!(!json.to_string().contains("gw-secret"));
    }

    #[test]
    fn test_set_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixelbridge.json5");

        let config = load_or_default(&path).unwrap();
        set_value(&config, "gateway.url", "wss://gw.example.com")
            .unwrap()
            .save(&path)
            .unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.gateway.url, "wss://gw.example.com");
    }
}
