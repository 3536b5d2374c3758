// Command rewriter: client -> server direction of the control channel.
//
// Each line read from the client is dispatched on its leading token. Most
// commands pass through verbatim; the addressing commands (PORT, EPRT,
// EPSV) and USER under anonymous-only mode are the ones the proxy
// intercepts. In NAT-passthrough mode the addressing commands are
// forwarded unmodified and only the observed mode is recorded.

pub mod eprt;
pub mod epsv;
pub mod port;
pub mod user;
pub mod utils;

use std::net::Ipv4Addr;

use log::debug;

use crate::config::ProxyConfig;
use crate::core_error::ProxyError;
use crate::core_network::allocator::PortAllocator;
use crate::core_network::datachan::{ConnectionMode, DataChannel};

/// Outcome of rewriting one client command.
#[derive(Debug)]
pub enum Action {
    /// Line to send to the server (rewritten or verbatim).
    Forward(Vec<u8>),
    /// In-band rejection sent back to the client; nothing reaches the
    /// server.
    Reject(&'static str),
}

pub fn rewrite_command(
    config: &ProxyConfig,
    chan: &mut DataChannel,
    mode: &mut ConnectionMode,
    alloc: &mut PortAllocator,
    proxy_ip: Ipv4Addr,
    line: &[u8],
) -> Result<Action, ProxyError> {
    let text = String::from_utf8_lossy(line);
    let (token, arg) = utils::split_command(&text);
    debug!("client command: {}", text.trim_end());

    match token.as_str() {
        "USER" => Ok(user::handle_user_command(config, arg, line)),
        "PORT" if config.nat_passthrough => {
            *mode = ConnectionMode::Port;
            Ok(Action::Forward(line.to_vec()))
        }
        "PORT" => port::handle_port_command(chan, mode, alloc, proxy_ip, arg),
        "EPRT" if config.nat_passthrough => {
            *mode = ConnectionMode::Eprt;
            Ok(Action::Forward(line.to_vec()))
        }
        "EPRT" => eprt::handle_eprt_command(chan, mode, alloc, proxy_ip, arg),
        "EPSV" if config.nat_passthrough => {
            *mode = ConnectionMode::Epsv;
            Ok(Action::Forward(line.to_vec()))
        }
        "EPSV" => Ok(epsv::handle_epsv_command()),
        _ => Ok(Action::Forward(line.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (ProxyConfig, DataChannel, ConnectionMode, PortAllocator) {
        (
            ProxyConfig::default(),
            DataChannel::new(),
            ConnectionMode::Unknown,
            PortAllocator::new(46100, 46199),
        )
    }

    #[tokio::test]
    async fn unknown_commands_pass_through_verbatim() {
        let (config, mut chan, mut mode, mut alloc) = fixtures();
        for raw in [&b"CWD /pub\r\n"[..], b"TYPE I\r\n", b"RETR x\r\n", b"\r\n"] {
            let action = rewrite_command(
                &config,
                &mut chan,
                &mut mode,
                &mut alloc,
                Ipv4Addr::LOCALHOST,
                raw,
            )
            .unwrap();
            assert!(matches!(action, Action::Forward(line) if line == raw));
        }
        assert_eq!(mode, ConnectionMode::Unknown);
    }

    #[tokio::test]
    async fn nat_passthrough_forwards_addressing_commands_unmodified() {
        let (mut config, mut chan, mut mode, mut alloc) = fixtures();
        config.nat_passthrough = true;

        let raw = b"PORT 127,0,0,1,4,210\r\n";
        let action = rewrite_command(
            &config,
            &mut chan,
            &mut mode,
            &mut alloc,
            Ipv4Addr::LOCALHOST,
            raw,
        )
        .unwrap();
        assert!(matches!(action, Action::Forward(line) if line == raw));
        assert_eq!(mode, ConnectionMode::Port);
        assert!(chan.server_listener().is_none());

        let raw = b"EPSV\r\n";
        let action = rewrite_command(
            &config,
            &mut chan,
            &mut mode,
            &mut alloc,
            Ipv4Addr::LOCALHOST,
            raw,
        )
        .unwrap();
        assert!(matches!(action, Action::Forward(line) if line == raw));
        assert_eq!(mode, ConnectionMode::Epsv);
    }

    #[tokio::test]
    async fn port_command_is_dispatched_to_the_rewriter() {
        let (config, mut chan, mut mode, mut alloc) = fixtures();
        let action = rewrite_command(
            &config,
            &mut chan,
            &mut mode,
            &mut alloc,
            Ipv4Addr::LOCALHOST,
            b"port 127,0,0,1,4,210\r\n",
        )
        .unwrap();
        assert_eq!(mode, ConnectionMode::Port);
        assert!(matches!(action, Action::Forward(line) if line.starts_with(b"PORT ")));
        assert!(chan.server_listener().is_some());
    }
}
