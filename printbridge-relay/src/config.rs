use clap::Parser;
use printbridge_common::BridgeError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "printbridge-relay", about = "Cloud relay for the restaurant printer bridge")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/relay.toml")]
    pub config: PathBuf,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub relay: RelaySettings,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub host: String,
    pub port: u16,
    /// Shared secret the bridge must present when upgrading.
    pub secret: String,
    /// Bearer token for `POST /api/print`; the endpoint is open when unset.
    pub admin_token: Option<String>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            secret: String::new(),
            admin_token: None,
        }
    }
}

impl RelayConfig {
    /// Read the TOML file if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config: Self = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), BridgeError> {
        if let Some(secret) = var("PRINTER_BRIDGE_SECRET") {
            self.relay.secret = secret;
        }
        if let Some(host) = var("HOST") {
            self.relay.host = host;
        }
        if let Some(port) = var("PORT") {
            self.relay.port = port
                .parse()
                .map_err(|_| BridgeError::Config(format!("PORT must be a number, got '{port}'")))?;
        }
        if let Some(token) = var("PRINT_ADMIN_TOKEN") {
            self.relay.admin_token = Some(token).filter(|t| !t.is_empty());
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.relay.host, self.relay.port)
    }
}
