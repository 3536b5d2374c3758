// Data-channel state machine.
//
// One data channel exists at a time, per RFC 959's sequential transfer
// model. Opening a new channel always goes through `reset()` first, so no
// listen socket, connected socket or advertised peer address can survive
// from an earlier transfer into a new one.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use chrono::{DateTime, Utc};
use log::{debug, trace};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::constants::FTP_DATA_PORT;
use crate::core_error::ProxyError;
use crate::core_network::allocator::PortAllocator;

/// Which addressing scheme negotiated the current data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    #[default]
    Unknown,
    Port,
    Pasv,
    Eprt,
    Epsv,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionMode::Unknown => "unknown",
            ConnectionMode::Port => "PORT",
            ConnectionMode::Pasv => "PASV",
            ConnectionMode::Eprt => "EPRT",
            ConnectionMode::Epsv => "EPSV",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// PASV: listening for the real client.
    ListenClient,
    /// PORT/EPRT: listening for the real server.
    ListenServer,
    /// Both legs connected, relaying.
    Active,
}

/// Statistics for one completed transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferStats {
    pub from_client: u64,
    pub from_server: u64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Default)]
pub struct DataChannel {
    phase: Phase,
    client_listener: Option<TcpListener>,
    server_listener: Option<TcpListener>,
    pub client_conn: Option<TcpStream>,
    pub server_conn: Option<TcpStream>,
    /// Where the client asked its peer to connect (PORT/EPRT payload).
    client_target: Option<SocketAddrV4>,
    /// Where the server asked its peer to connect (227 payload).
    server_target: Option<SocketAddrV4>,
    pub bytes_from_client: u64,
    pub bytes_from_server: u64,
    opened_at: Option<DateTime<Utc>>,
}

impl DataChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn client_listener(&self) -> Option<&TcpListener> {
        self.client_listener.as_ref()
    }

    pub fn server_listener(&self) -> Option<&TcpListener> {
        self.server_listener.as_ref()
    }

    /// Tears down all data-channel state: sockets, advertised targets,
    /// counters. Dropping the handles closes the descriptors.
    pub fn reset(&mut self) {
        if self.phase != Phase::Idle {
            debug!("discarding data-channel state in phase {:?}", self.phase);
        }
        self.client_listener = None;
        self.server_listener = None;
        self.client_conn = None;
        self.server_conn = None;
        self.client_target = None;
        self.server_target = None;
        self.bytes_from_client = 0;
        self.bytes_from_server = 0;
        self.opened_at = None;
        self.phase = Phase::Idle;
    }

    /// IDLE -> LISTEN_SERVER: a PORT/EPRT command was seen; listen for the
    /// real server's data connection. Returns the bound port.
    pub fn open_server_listener(
        &mut self,
        alloc: &mut PortAllocator,
        ip: Ipv4Addr,
    ) -> Result<u16, ProxyError> {
        self.reset();
        let listener = TcpListener::from_std(alloc.bind_listener(ip)?)?;
        let port = listener.local_addr()?.port();
        self.server_listener = Some(listener);
        self.phase = Phase::ListenServer;
        Ok(port)
    }

    /// IDLE -> LISTEN_CLIENT: a 227 reply was seen; listen for the real
    /// client's data connection. Returns the bound port.
    pub fn open_client_listener(
        &mut self,
        alloc: &mut PortAllocator,
        ip: Ipv4Addr,
    ) -> Result<u16, ProxyError> {
        self.reset();
        let listener = TcpListener::from_std(alloc.bind_listener(ip)?)?;
        let port = listener.local_addr()?.port();
        self.client_listener = Some(listener);
        self.phase = Phase::ListenClient;
        Ok(port)
    }

    pub fn set_client_target(&mut self, target: SocketAddrV4) {
        self.client_target = Some(target);
    }

    pub fn set_server_target(&mut self, target: SocketAddrV4) {
        self.server_target = Some(target);
    }

    /// LISTEN_CLIENT -> ACTIVE: the real client connected to our PASV
    /// listener; complete the far leg by connecting to the address the
    /// server advertised in its 227 reply.
    pub async fn bridge_client_leg(
        &mut self,
        conn: TcpStream,
        alloc: &mut PortAllocator,
        source: Option<Ipv4Addr>,
    ) -> Result<(), ProxyError> {
        self.client_listener = None;
        let target = self
            .server_target
            .ok_or_else(|| ProxyError::Protocol("no passive server target recorded".into()))?;
        let socket = alloc.bind_socket(source.unwrap_or(Ipv4Addr::UNSPECIFIED))?;
        let server_conn = socket.connect(SocketAddr::V4(target)).await?;
        trace!("connected server data leg to {target}");
        self.activate(conn, server_conn);
        Ok(())
    }

    /// LISTEN_SERVER -> ACTIVE: the real server connected to our PORT/EPRT
    /// listener; complete the far leg by connecting to the address the
    /// client advertised. The source port is 20 when the process may bind
    /// it (RFC 959), otherwise a port from the ephemeral range.
    pub async fn bridge_server_leg(
        &mut self,
        conn: TcpStream,
        alloc: &mut PortAllocator,
        source: Option<Ipv4Addr>,
    ) -> Result<(), ProxyError> {
        self.server_listener = None;
        let target = self
            .client_target
            .ok_or_else(|| ProxyError::Protocol("no active client target recorded".into()))?;
        let src = source.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let socket = match bind_ftp_data_port(src) {
            Ok(socket) => socket,
            Err(e)
                if e.kind() == std::io::ErrorKind::PermissionDenied
                    || e.kind() == std::io::ErrorKind::AddrInUse =>
            {
                debug!("cannot bind port {FTP_DATA_PORT} ({e}), using ephemeral range");
                alloc.bind_socket(src)?
            }
            Err(e) => return Err(e.into()),
        };
        let client_conn = socket.connect(SocketAddr::V4(target)).await?;
        trace!("connected client data leg to {target}");
        self.activate(conn, client_conn);
        Ok(())
    }

    fn activate(&mut self, near: TcpStream, far: TcpStream) {
        match self.phase {
            Phase::ListenClient => {
                self.client_conn = Some(near);
                self.server_conn = Some(far);
            }
            _ => {
                self.server_conn = Some(near);
                self.client_conn = Some(far);
            }
        }
        self.bytes_from_client = 0;
        self.bytes_from_server = 0;
        self.opened_at = Some(Utc::now());
        self.phase = Phase::Active;
    }

    /// ACTIVE -> IDLE: the relay saw end-of-stream or an error on either
    /// leg. Both data sockets are closed and the transfer is accounted.
    pub fn finish(&mut self) -> TransferStats {
        let stats = TransferStats {
            from_client: self.bytes_from_client,
            from_server: self.bytes_from_server,
            elapsed_secs: self
                .opened_at
                .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0),
        };
        self.reset();
        stats
    }
}

fn bind_ftp_data_port(ip: Ipv4Addr) -> std::io::Result<TcpSocket> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::V4(SocketAddrV4::new(ip, FTP_DATA_PORT)))?;
    Ok(socket)
}
