// Access-control hook, consulted once at session start when enabled.
//
// Peers are matched against the configured CIDR allow lists. An empty list
// allows everything, so enabling the check without configuring networks is
// not a lockout.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use log::{debug, info};

use crate::config::ProxyConfig;
use crate::core_error::ProxyError;

pub fn check_session(
    config: &ProxyConfig,
    client: Ipv4Addr,
    server: Ipv4Addr,
) -> Result<(), ProxyError> {
    if !config.access_check {
        return Ok(());
    }
    check_one("client", client, &config.allowed_clients)?;
    check_one("server", server, &config.allowed_servers)?;
    info!("access check passed for client {client} server {server}");
    Ok(())
}

fn check_one(label: &str, addr: Ipv4Addr, allowed: &[Ipv4Net]) -> Result<(), ProxyError> {
    if allowed.is_empty() {
        debug!("no allowed_{label}s networks configured, allowing {addr}");
        return Ok(());
    }
    if allowed.iter().any(|net| net.contains(&addr)) {
        return Ok(());
    }
    Err(ProxyError::AccessDenied(format!("{label} {addr}")))
}
