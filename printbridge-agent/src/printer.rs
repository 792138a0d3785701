//! Physical printer drivers.
//!
//! The interface string picks the driver: `tcp://host[:port]` talks to a raw
//! network printer (port 9100 unless given), anything else is treated as a
//! device path such as `/dev/usb/lp0` or `//./COM3`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const DEFAULT_RAW_PORT: u16 = 9100;

#[derive(Debug, Error)]
pub enum PrintError {
    #[error("printer unreachable at {0}")]
    Unreachable(String),
    #[error("printer I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("printer did not respond within {0:?}")]
    Timeout(Duration),
    #[error("invalid printer interface '{0}'")]
    InvalidInterface(String),
}

#[async_trait]
pub trait PrinterDevice: Send + Sync {
    /// Human readable location, for logs.
    fn describe(&self) -> String;

    /// Probe whether the device can currently be opened.
    async fn is_reachable(&self) -> bool;

    /// Send raw ESC/POS bytes to the printer.
    async fn write_all(&self, data: &[u8]) -> Result<(), PrintError>;
}

/// Raw TCP printer (JetDirect / port 9100).
pub struct NetworkPrinter {
    addr: String,
    timeout: Duration,
}

impl NetworkPrinter {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    async fn connect(&self) -> Result<TcpStream, PrintError> {
        match timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => {
                debug!("printer: connect to {} failed: {e}", self.addr);
                Err(PrintError::Unreachable(self.addr.clone()))
            }
            Err(_) => Err(PrintError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl PrinterDevice for NetworkPrinter {
    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    async fn is_reachable(&self) -> bool {
        self.connect().await.is_ok()
    }

    async fn write_all(&self, data: &[u8]) -> Result<(), PrintError> {
        let mut stream = self.connect().await?;
        let write = async {
            stream.write_all(data).await?;
            stream.flush().await?;
            stream.shutdown().await
        };
        timeout(self.timeout, write)
            .await
            .map_err(|_| PrintError::Timeout(self.timeout))??;
        Ok(())
    }
}

/// Printer exposed as a device file or serial port.
pub struct DevicePrinter {
    path: PathBuf,
    timeout: Duration,
}

impl DevicePrinter {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    async fn open(&self) -> Result<tokio::fs::File, PrintError> {
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true);
        timeout(self.timeout, opts.open(&self.path))
            .await
            .map_err(|_| PrintError::Timeout(self.timeout))?
            .map_err(PrintError::from)
    }
}

#[async_trait]
impl PrinterDevice for DevicePrinter {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn is_reachable(&self) -> bool {
        self.open().await.is_ok()
    }

    async fn write_all(&self, data: &[u8]) -> Result<(), PrintError> {
        let mut file = self.open().await?;
        let write = async {
            file.write_all(data).await?;
            file.flush().await
        };
        timeout(self.timeout, write)
            .await
            .map_err(|_| PrintError::Timeout(self.timeout))??;
        Ok(())
    }
}

/// Build the driver for an interface string.
pub fn open_printer(interface: &str, timeout: Duration) -> Result<Arc<dyn PrinterDevice>, PrintError> {
    let interface = interface.trim();
    if interface.is_empty() {
        return Err(PrintError::InvalidInterface(interface.to_string()));
    }

    if let Some(rest) = interface.strip_prefix("tcp://") {
        let rest = rest.trim_end_matches('/');
        let addr = match rest.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => rest.to_string(),
            Some(_) => return Err(PrintError::InvalidInterface(interface.to_string())),
            None if !rest.is_empty() => format!("{rest}:{DEFAULT_RAW_PORT}"),
            None => return Err(PrintError::InvalidInterface(interface.to_string())),
        };
        return Ok(Arc::new(NetworkPrinter::new(addr, timeout)));
    }

    Ok(Arc::new(DevicePrinter::new(interface, timeout)))
}

/// Startup self-check. Only logs; an unreachable printer never stops the bridge.
pub async fn check_printer(device: &dyn PrinterDevice) -> bool {
    let reachable = device.is_reachable().await;
    if reachable {
        info!("printer: thermal printer found on {}", device.describe());
    } else {
        warn!(
            "printer: cannot reach printer on {}. Check the cable and PRINTER_INTERFACE",
            device.describe()
        );
    }
    reachable
}
