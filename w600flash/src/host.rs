//! Host-side utilities for serial port discovery.

use crate::port::{NativePortEnumerator, PortEnumerator, PortInfo};
use log::debug;

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<PortInfo> {
    NativePortEnumerator::list_ports().unwrap_or_default()
}

/// Pick a default serial port: the first enumerated one, with a
/// platform-specific fallback when enumeration turns up nothing.
#[must_use]
pub fn default_port() -> String {
    if let Some(first) = discover_ports().into_iter().next() {
        debug!("Auto-selected port {}", first.name);
        return first.name;
    }

    if cfg!(windows) {
        "COM1".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
