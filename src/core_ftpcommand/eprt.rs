use std::net::{Ipv4Addr, SocketAddrV4};

use log::{info, warn};

use crate::core_error::ProxyError;
use crate::core_ftpcommand::Action;
use crate::core_network::allocator::PortAllocator;
use crate::core_network::datachan::{ConnectionMode, DataChannel};

/// Handles the RFC 2428 EPRT command.
///
/// Only network family 1 (IPv4) is supported. Family 2 gets the in-protocol
/// 522 steer back to IPv4, other families a 501, and parse failures a 500;
/// none of those are forwarded to the server. A well-formed IPv4 EPRT is
/// rewritten like PORT, with the proxy's address and a fresh listener.
pub fn handle_eprt_command(
    chan: &mut DataChannel,
    mode: &mut ConnectionMode,
    alloc: &mut PortAllocator,
    proxy_ip: Ipv4Addr,
    arg: &str,
) -> Result<Action, ProxyError> {
    let (family, addr, port) = match parse_eprt(arg) {
        Some(parts) => parts,
        None => {
            warn!("unparseable EPRT argument: {:?}", arg);
            return Ok(Action::Reject("500 Syntax error in EPRT command\r\n"));
        }
    };

    match family {
        "1" => {}
        "2" => {
            info!("rejecting IPv6 EPRT request");
            return Ok(Action::Reject("522 Protocol not supported, use (1)\r\n"));
        }
        other => {
            warn!("unknown EPRT network family {:?}", other);
            return Ok(Action::Reject("501 Protocol family not supported\r\n"));
        }
    }

    let (addr, port) = match (addr.parse::<Ipv4Addr>(), port.parse::<u16>()) {
        (Ok(addr), Ok(port)) => (addr, port),
        _ => {
            warn!("bad address or port in EPRT argument: {:?}", arg);
            return Ok(Action::Reject("500 Syntax error in EPRT command\r\n"));
        }
    };

    let listen_port = chan.open_server_listener(alloc, proxy_ip)?;
    chan.set_client_target(SocketAddrV4::new(addr, port));
    *mode = ConnectionMode::Eprt;

    info!("EPRT {addr}:{port} rewritten to {proxy_ip}:{listen_port}");
    let line = format!("EPRT |1|{}|{}|\r\n", proxy_ip, listen_port);
    Ok(Action::Forward(line.into_bytes()))
}

/// Splits `<d><family><d><addr><d><port><d>` where `<d>` is any non-digit
/// delimiter character (RFC 2428 allows any printable delimiter). The
/// closing delimiter is mandatory and nothing may follow it.
fn parse_eprt(arg: &str) -> Option<(&str, &str, &str)> {
    let delim = arg.chars().next()?;
    if delim.is_ascii_digit() {
        return None;
    }
    let mut fields = arg.split(delim);
    let lead = fields.next()?;
    if !lead.is_empty() {
        return None;
    }
    let family = fields.next()?;
    let addr = fields.next()?;
    let port = fields.next()?;
    if family.is_empty() || addr.is_empty() || port.is_empty() {
        return None;
    }
    if !fields.next()?.is_empty() || fields.next().is_some() {
        return None;
    }
    Some((family, addr, port))
}
