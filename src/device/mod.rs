//! Router and modem status page clients
//!
//! Each device is reached through a `DeviceClient`. The production
//! implementation, `DeviceSession`, scrapes an HTML admin page and logs in
//! when the page says so; the service loop only sees the trait.

pub mod session;

pub use session::DeviceSession;

use crate::models::DeviceReading;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Router,
    Modem,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Router => f.write_str("Router"),
            Self::Modem => f.write_str("Modem"),
        }
    }
}

/// Interface the service loop uses to poll one device
#[async_trait]
pub trait DeviceClient: Send {
    /// Human-readable device name for log lines
    fn name(&self) -> &str;

    /// Fetch the status page and extract the value of interest.
    ///
    /// Never fails outright: transport problems and unparseable pages come
    /// back as a reading with `ok == false`.
    async fn get_data(&mut self) -> DeviceReading;

    /// Release the underlying HTTP session. Later calls to `get_data` fail.
    fn close(&mut self) {}
}
