pub mod error;
pub mod protocol;
pub mod secret;

pub use error::BridgeError;
pub use protocol::{
    BridgeMessage, LineItem, PrintJob, PrintOutcome, PrintStatusReport, ServiceType,
    PRINTER_WS_PATH, SECRET_HEADER, SECRET_QUERY_PARAM,
};
pub use secret::secrets_match;
