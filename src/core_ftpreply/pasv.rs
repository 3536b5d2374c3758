use std::net::{Ipv4Addr, SocketAddrV4};

use log::info;

use crate::core_error::ProxyError;
use crate::core_ftpcommand::utils::{format_host_port, parse_host_port};
use crate::core_network::allocator::PortAllocator;
use crate::core_network::datachan::{ConnectionMode, DataChannel};

/// Rewrites a `227 Entering Passive Mode` reply.
///
/// The server's advertised data address is recorded as the far leg of the
/// next data channel, a fresh client-facing listener is opened, and the
/// reply sent on to the client advertises the proxy instead. The host-port
/// tuple sits after the `(` when the server uses the canonical form, after
/// the last space otherwise. A 227 whose body does not parse is fatal.
pub fn rewrite_pasv_reply(
    chan: &mut DataChannel,
    mode: &mut ConnectionMode,
    alloc: &mut PortAllocator,
    advertise_ip: Ipv4Addr,
    listen_ip: Ipv4Addr,
    text: &str,
) -> Result<Vec<u8>, ProxyError> {
    let tail = match text.find('(') {
        Some(pos) => &text[pos + 1..],
        None => match text.trim_end().rfind(' ') {
            Some(pos) => &text[pos + 1..],
            None => {
                return Err(ProxyError::Protocol(format!(
                    "no host-port in 227 reply: {:?}",
                    text.trim_end()
                )))
            }
        },
    };
    let (addr, port) = parse_host_port(tail).ok_or_else(|| {
        ProxyError::Protocol(format!("malformed 227 reply: {:?}", text.trim_end()))
    })?;

    let listen_port = chan.open_client_listener(alloc, listen_ip)?;
    chan.set_server_target(SocketAddrV4::new(addr, port));
    *mode = ConnectionMode::Pasv;

    info!("PASV {addr}:{port} rewritten to {advertise_ip}:{listen_port}");
    let reply = format!(
        "227 Entering Passive Mode ({})\r\n",
        format_host_port(advertise_ip, listen_port)
    );
    Ok(reply.into_bytes())
}
