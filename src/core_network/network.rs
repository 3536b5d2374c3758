// Session bootstrap.
//
// The proxy is launched inetd-style: the accepted client control
// connection is already on fd 0 when the process starts. The real server
// is discovered either from the reverse-proxy target or, for a
// transparently redirected connection, from the local address the client
// was redirected onto. One process, one session.

use std::net::{SocketAddr, SocketAddrV4};
use std::os::fd::FromRawFd;

use log::{debug, info};
use tokio::net::{TcpSocket, TcpStream};

use crate::config::ProxyConfig;
use crate::core_access;
use crate::core_error::ProxyError;
use crate::session::{Session, SessionEnd};

pub async fn run_session(config: ProxyConfig) -> Result<SessionEnd, ProxyError> {
    let client = client_from_stdin()?;
    let client_addr = v4_of(client.peer_addr()?)?;
    let server_addr = original_destination(&client, &config)?;

    core_access::check_session(&config, *client_addr.ip(), *server_addr.ip())?;

    let server = connect_server(&config, server_addr).await?;
    info!("connected to server {server_addr} for client {client_addr}");

    Session::new(config, client, server)?.run().await
}

/// Takes over the client control connection from fd 0.
fn client_from_stdin() -> Result<TcpStream, ProxyError> {
    // fd 0 is the connection our inetd-style launcher accepted for us; it
    // stops being stdin the moment this process starts.
    let stream = unsafe { std::net::TcpStream::from_raw_fd(0) };
    stream.set_nonblocking(true)?;
    Ok(TcpStream::from_std(stream)?)
}

/// Where the client actually wanted to go. With a fixed reverse-proxy
/// target that is configuration; with a transparent redirect the original
/// destination is the local address the kernel rewrote the connection to.
fn original_destination(
    client: &TcpStream,
    config: &ProxyConfig,
) -> Result<SocketAddrV4, ProxyError> {
    if let Some(target) = config.reverse_target {
        debug!("reverse-proxy mode, fixed target {target}");
        return Ok(target);
    }
    let addr = v4_of(client.local_addr()?)?;
    debug!("transparent mode, redirected destination {addr}");
    Ok(addr)
}

async fn connect_server(
    config: &ProxyConfig,
    addr: SocketAddrV4,
) -> Result<TcpStream, ProxyError> {
    let socket = TcpSocket::new_v4()?;
    if let Some(src) = config.bind_address {
        socket.bind(SocketAddr::V4(SocketAddrV4::new(src, 0)))?;
    }
    socket
        .connect(SocketAddr::V4(addr))
        .await
        .map_err(ProxyError::Unreachable)
}

fn v4_of(addr: SocketAddr) -> Result<SocketAddrV4, ProxyError> {
    match addr {
        SocketAddr::V4(v4) => Ok(v4),
        SocketAddr::V6(v6) => Err(ProxyError::Config(format!(
            "IPv6 endpoint {v6} is not supported"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reverse_target_wins_over_redirect_lookup() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();

        let target = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 7), 21);
        let config = ProxyConfig {
            reverse_target: Some(target),
            ..ProxyConfig::default()
        };
        assert_eq!(original_destination(&client, &config).unwrap(), target);
    }

    #[tokio::test]
    async fn transparent_lookup_uses_the_redirected_local_address() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        // From the accepted side, the "original destination" is the address
        // the client connected to.
        let config = ProxyConfig::default();
        let dest = original_destination(&accepted, &config).unwrap();
        assert_eq!(SocketAddr::V4(dest), addr);
    }

    #[tokio::test]
    async fn unreachable_server_is_its_own_failure_class() {
        // A listener bound then dropped leaves a port nothing listens on.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = match listener.local_addr().unwrap() {
            SocketAddr::V4(a) => a,
            _ => unreachable!(),
        };
        drop(listener);

        let err = connect_server(&ProxyConfig::default(), addr)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Unreachable(_)));
        assert_eq!(err.exit_code(), crate::constants::EX_NOHOST);
    }
}
