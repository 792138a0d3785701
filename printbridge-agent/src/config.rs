use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use printbridge_common::{BridgeError, PRINTER_WS_PATH, SECRET_QUERY_PARAM};
use serde::Deserialize;
use url::Url;

use crate::receipt::ReceiptLayout;

#[derive(Parser, Debug)]
#[command(name = "printbridge-agent", about = "Restaurant-side printer bridge")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/agent.toml")]
    pub config: PathBuf,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSettings,
    pub printer: PrinterSettings,
    pub receipt: ReceiptLayout,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Base URL of the relay, e.g. `wss://orders.example.com`.
    pub relay_url: String,
    pub secret: String,
    pub reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            relay_url: String::new(),
            secret: String::new(),
            reconnect_delay_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrinterSettings {
    pub interface: String,
    pub timeout_ms: u64,
}

impl Default for PrinterSettings {
    fn default() -> Self {
        Self {
            interface: "//./COM3".into(),
            timeout_ms: 5_000,
        }
    }
}

impl PrinterSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AgentConfig {
    /// Read the TOML file if it exists, apply environment overrides and validate.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config: Self = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.agent.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), BridgeError> {
        if let Some(url) = var("RELAY_URL") {
            self.agent.relay_url = url;
        }
        if let Some(secret) = var("PRINTER_BRIDGE_SECRET") {
            self.agent.secret = secret;
        }
        if let Some(interface) = var("PRINTER_INTERFACE") {
            self.printer.interface = interface;
        }
        if let Some(ms) = var("RECONNECT_DELAY_MS") {
            self.agent.reconnect_delay_ms = parse_ms("RECONNECT_DELAY_MS", &ms)?;
        }
        if let Some(ms) = var("HEARTBEAT_INTERVAL_MS") {
            self.agent.heartbeat_interval_ms = parse_ms("HEARTBEAT_INTERVAL_MS", &ms)?;
        }
        Ok(())
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64, BridgeError> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::Config(format!("{key} must be a number of milliseconds, got '{value}'")))
}

impl AgentSettings {
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.relay_url.trim().is_empty() || self.secret.is_empty() {
            return Err(BridgeError::Config(
                "missing RELAY_URL or PRINTER_BRIDGE_SECRET".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(BridgeError::Config("heartbeat_interval_ms must be positive".into()));
        }
        self.endpoint().map(|_| ())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Full upgrade URL, secret included. `http(s)` bases are mapped to `ws(s)`.
    pub fn endpoint(&self) -> Result<Url, BridgeError> {
        let mut url = self.display_endpoint()?;
        url.query_pairs_mut()
            .append_pair(SECRET_QUERY_PARAM, &self.secret);
        Ok(url)
    }

    /// Upgrade URL without the secret, safe to log.
    pub fn display_endpoint(&self) -> Result<Url, BridgeError> {
        let invalid = |reason: String| {
            BridgeError::Config(format!("invalid relay_url '{}': {reason}", self.relay_url))
        };
        let mut url = Url::parse(self.relay_url.trim()).map_err(|e| invalid(e.to_string()))?;

        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => return Err(invalid(format!("unsupported scheme '{other}'"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| invalid("cannot switch to a WebSocket scheme".into()))?;

        let path = format!("{}{}", url.path().trim_end_matches('/'), PRINTER_WS_PATH);
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(url: &str) -> AgentSettings {
        AgentSettings {
            relay_url: url.into(),
            secret: "p@ss word&x".into(),
            ..AgentSettings::default()
        }
    }

    #[test]
    fn test_endpoint() {
        let url = settings("wss://orders.example.com").endpoint().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://orders.example.com/printer-ws?secret=p%40ss+word%26x"
        );

        let url = settings("https://orders.example.com/app/").display_endpoint().unwrap();
        assert_eq!(url.as_str(), "wss://orders.example.com/app/printer-ws");

        let url = settings("http://127.0.0.1:3000").display_endpoint().unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:3000/printer-ws");
    }

    #[test]
    fn test_endpoint_errors() {
        assert!(settings("ftp://example.com").endpoint().is_err());
        assert!(settings("not a url").endpoint().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(settings("wss://orders.example.com").validate().is_ok());

        let mut s = settings("wss://orders.example.com");
        s.secret.clear();
        assert!(s.validate().is_err());

        let mut s = settings("");
        assert!(s.validate().is_err());
        s.relay_url = "ws://localhost:3000".into();
        s.heartbeat_interval_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_file_and_env() {
        let mut config: AgentConfig = toml::from_str(
            r#"
            [agent]
            relay_url = "wss://from-file.example.com"
            secret = "file-secret"

            [printer]
            interface = "tcp://192.168.1.50:9100"

            [receipt]
            restaurant_name = "SHIVANYA RESTAURANT"
            line_width = 32
            "#,
        )
        .unwrap();
        assert_eq!(config.agent.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.agent.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.printer.timeout(), Duration::from_secs(5));
        assert_eq!(config.receipt.line_width, 32);
        assert_eq!(config.receipt.currency, "Rs.");

        let env: HashMap<&str, &str> = HashMap::from([
            ("PRINTER_BRIDGE_SECRET", "env-secret"),
            ("RECONNECT_DELAY_MS", "2500"),
        ]);
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.agent.secret, "env-secret");
        assert_eq!(config.agent.relay_url, "wss://from-file.example.com");
        assert_eq!(config.agent.reconnect_delay(), Duration::from_millis(2500));
        assert_eq!(config.printer.interface, "tcp://192.168.1.50:9100");

        let err = config
            .apply_env(|k| (k == "HEARTBEAT_INTERVAL_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("HEARTBEAT_INTERVAL_MS"));
    }
}
