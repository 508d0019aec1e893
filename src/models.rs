//! Result types returned by the checkers
//!
//! None of these are errors: every probe reports an outcome flag plus a
//! human-readable message, and the service loop logs both outcomes.

/// Outcome of one internet reachability check
#[derive(Debug, Clone, PartialEq)]
pub struct ReachabilityResult {
    pub up: bool,
    /// Target and timing on success, the last error otherwise
    pub message: String,
}

impl ReachabilityResult {
    pub fn up(message: impl Into<String>) -> Self {
        Self {
            up: true,
            message: message.into(),
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            up: false,
            message: message.into(),
        }
    }
}

/// Value scraped from a router or modem status page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReading {
    pub ok: bool,
    /// WAN IP for the router, link state for the modem; empty on failure
    pub value: String,
    pub message: String,
}

impl DeviceReading {
    pub fn ok(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: true,
            value: value.into(),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: String::new(),
            message: message.into(),
        }
    }
}

/// WAN IP as reported by a third-party page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIpReading {
    pub ok: bool,
    pub ip: Option<String>,
    /// IP and timing on success, the last error otherwise
    pub message: String,
}

impl ExternalIpReading {
    pub fn found(ip: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: true,
            ip: Some(ip.into()),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            ip: None,
            message: message.into(),
        }
    }
}
