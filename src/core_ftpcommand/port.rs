use std::net::{Ipv4Addr, SocketAddrV4};

use log::info;

use crate::core_error::ProxyError;
use crate::core_ftpcommand::utils::{format_host_port, parse_host_port};
use crate::core_ftpcommand::Action;
use crate::core_network::allocator::PortAllocator;
use crate::core_network::datachan::{ConnectionMode, DataChannel};

/// Handles the PORT (Active Mode) FTP command.
///
/// The client's advertised address is recorded as the far leg of the next
/// data channel, a fresh server-facing listener is opened, and the command
/// forwarded to the server carries the proxy's own address instead. A
/// malformed PORT is fatal to the session: continuing with an inconsistent
/// data-channel handshake would splice the wrong peers together.
pub fn handle_port_command(
    chan: &mut DataChannel,
    mode: &mut ConnectionMode,
    alloc: &mut PortAllocator,
    proxy_ip: Ipv4Addr,
    arg: &str,
) -> Result<Action, ProxyError> {
    let (addr, port) = parse_host_port(arg)
        .ok_or_else(|| ProxyError::Protocol(format!("malformed PORT command: {:?}", arg)))?;

    let listen_port = chan.open_server_listener(alloc, proxy_ip)?;
    chan.set_client_target(SocketAddrV4::new(addr, port));
    *mode = ConnectionMode::Port;

    info!("PORT {addr}:{port} rewritten to {proxy_ip}:{listen_port}");
    let line = format!("PORT {}\r\n", format_host_port(proxy_ip, listen_port));
    Ok(Action::Forward(line.into_bytes()))
}
