// CLASSIFICATION: COMMUNITY
// Filename: addr.rs v0.3
// Author: Lukas Bower
// Date Modified: 2029-04-02

//! Primary outbound address detection.
//!
//! Opens a throwaway UDP socket towards a well-known probe address and
//! reads back the local endpoint; no packet is ever sent. Containerized
//! hosts without a default route fall back to resolving their own
//! hostname. A total failure is a configuration error, surfaced at
//! listener start rather than at runtime.

use log::debug;
use std::env;
use std::net::{IpAddr, ToSocketAddrs, UdpSocket};
use thiserror::Error;

/// Probe target override; the value only needs to be routable, it is never
/// actually contacted.
const PROBE_ADDR_ENV: &str = "MDT_DIALOUT_PROBE_ADDR";
const DEFAULT_PROBE_ADDR: &str = "8.8.8.8:80";

/// Error raised when no primary address could be determined, neither via
/// the probe nor the hostname fallback.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("outbound probe failed ({probe}): {source}")]
    Probe {
        probe: String,
        source: std::io::Error,
    },
}

/// Detect the primary outbound IP of this host.
pub fn detect_primary_addr() -> Result<IpAddr, DetectError> {
    let probe = env::var(PROBE_ADDR_ENV).unwrap_or_else(|_| DEFAULT_PROBE_ADDR.into());
    match probe_outbound(&probe) {
        Ok(ip) => {
            debug!("primary address {ip} detected via probe {probe}");
            Ok(ip)
        }
        Err(err) => {
            debug!("outbound probe failed ({err}); trying hostname fallback");
            resolve_hostname().ok_or(err)
        }
    }
}

fn probe_outbound(probe: &str) -> Result<IpAddr, DetectError> {
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(|source| DetectError::Probe {
        probe: probe.into(),
        source,
    })?;
    socket.connect(probe).map_err(|source| DetectError::Probe {
        probe: probe.into(),
        source,
    })?;
    socket
        .local_addr()
        .map(|addr| addr.ip())
        .map_err(|source| DetectError::Probe {
            probe: probe.into(),
            source,
        })
}

fn resolve_hostname() -> Option<IpAddr> {
    let host = env::var("HOSTNAME").ok()?;
    let mut addrs = (host.as_str(), 0u16).to_socket_addrs().ok()?;
    addrs.next().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_against_loopback_yields_loopback() {
        // Connecting a UDP socket to loopback always resolves locally, so
        // this stays hermetic.
        let ip = probe_outbound("127.0.0.1:9").expect("probe");
        assert!(ip.is_loopback());
    }
}
