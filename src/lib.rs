//! Wanstatus - home internet outage and WAN IP change monitor
//!
//! Probes internet reachability, scrapes the router and modem admin pages,
//! and sends notices when an outage ends or the WAN IP changes.

pub mod config;
pub mod device;
pub mod error;
pub mod external_ip;
pub mod http;
pub mod models;
pub mod notify;
pub mod parser;
pub mod reachability;
pub mod report;
pub mod retry;
pub mod state;
pub mod supervisor;

#[cfg(test)]
mod testing;
