//! Host parsing, IPv4 resolution and multicast address rules.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tracing::debug;

use crate::{Result, StreamError};

/// Split `host[:port]`, falling back to `default_port`.
pub fn split_host_port(host: &str, default_port: u16) -> Result<(String, u16)> {
    let host = host.trim();
    if host.is_empty() {
        return Err(StreamError::connection_failed(host, "empty host name"));
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| StreamError::connection_failed(host, format!("invalid port '{}'", port)))?;
            Ok((name.to_string(), port))
        }
        Some(_) => Err(StreamError::connection_failed(host, "missing host name")),
        None => Ok((host.to_string(), default_port)),
    }
}

/// Resolve a host to its IPv4 candidates, in resolver order.
///
/// IPv6 results are dropped before any connection attempt.
pub async fn resolve_ipv4(host: &str, port: u16) -> Result<Vec<SocketAddrV4>> {
    let resolved = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        StreamError::connection_failed_with_source(host, "name resolution failed", Box::new(e))
    })?;

    let candidates: Vec<SocketAddrV4> = resolved
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(v6) => {
                debug!(%v6, "Skipping IPv6 candidate");
                None
            }
        })
        .collect();

    if candidates.is_empty() {
        return Err(StreamError::connection_failed(host, "no IPv4 address"));
    }
    Ok(candidates)
}

/// Accept true multicast addresses and the limited broadcast address only.
pub fn validate_multicast_address(address: Ipv4Addr) -> Result<()> {
    if address.is_multicast() || address.is_broadcast() {
        Ok(())
    } else {
        Err(StreamError::InvalidMulticastAddress { address })
    }
}
