// One proxy session: one client, one real server, one event loop.
//
// The loop multiplexes the two control sockets, the backchannel listeners
// and the data sockets. Buffered control lines are always drained before
// blocking for new I/O, so pipelined commands get priority over data
// traffic. The session ends when both control endpoints are dead or the
// idle timeout fires; any protocol or resource error unwinds to `main`,
// which classifies it into the process exit status.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, log, trace, Level};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ProxyConfig;
use crate::core_error::ProxyError;
use crate::core_ftpcommand::{self, Action};
use crate::core_ftpreply::ReplyRewriter;
use crate::core_network::allocator::PortAllocator;
use crate::core_network::datachan::{ConnectionMode, DataChannel, Phase, TransferStats};
use crate::core_network::linebuf::LineBuffer;
use crate::core_network::relay::{xfer_data, RelayOutcome};

/// How a session reached its normal end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Both control endpoints closed.
    BothClosed,
    /// No I/O within the configured idle timeout.
    IdleTimeout,
}

#[derive(Debug)]
pub struct ControlEndpoint {
    stream: TcpStream,
    peer: SocketAddr,
    lines: LineBuffer,
    /// Read side still open; cleared when this peer's EOF is seen.
    live: bool,
    /// Write side still open; cleared by half-close propagation or a
    /// failed write.
    wr_open: bool,
    eof: bool,
}

impl ControlEndpoint {
    fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(ControlEndpoint {
            stream,
            peer,
            lines: LineBuffer::new(),
            live: true,
            wr_open: true,
            eof: false,
        })
    }

    /// Writes one control line, unless this direction is already closed.
    /// A failed write means the peer went away, which is a disconnection,
    /// not a session error.
    async fn send(&mut self, bytes: &[u8]) {
        if !self.wr_open {
            debug!("dropping control line, write side to {} is closed", self.peer);
            return;
        }
        if let Err(e) = self.stream.write_all(bytes).await {
            debug!("control write to {} failed: {e}", self.peer);
            self.wr_open = false;
        }
    }

    /// Pulls whatever the socket has ready into the line buffer; flags EOF
    /// when the peer closed its sending side.
    fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        match self.stream.try_read(&mut chunk) {
            Ok(0) => self.eof = true,
            Ok(n) => {
                self.lines.extend(&chunk[..n]);
                trace!(
                    "buffered {n} control bytes from {}, {} pending",
                    self.peer,
                    self.lines.pending()
                );
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                debug!("control read from {} failed: {e}", self.peer);
                self.eof = true;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Client,
    Server,
}

enum Event {
    IdleTimeout,
    CtrlReadable(Side, io::Result<()>),
    Accepted(Side, io::Result<(TcpStream, SocketAddr)>),
    DataReadable(Side, io::Result<()>),
}

pub struct Session {
    config: ProxyConfig,
    client: ControlEndpoint,
    server: ControlEndpoint,
    mode: ConnectionMode,
    chan: DataChannel,
    alloc: PortAllocator,
    replies: ReplyRewriter,
    /// Proxy's address on the server leg; what rewritten PORT/EPRT carry.
    proxy_ip: Ipv4Addr,
    /// Address advertised to the client in rewritten 227 replies.
    advertise_ip: Ipv4Addr,
    /// Where client-facing backchannel listeners bind.
    listen_ip: Ipv4Addr,
    started: DateTime<Utc>,
}

impl Session {
    pub fn new(
        config: ProxyConfig,
        client: TcpStream,
        server: TcpStream,
    ) -> Result<Self, ProxyError> {
        let client = ControlEndpoint::new(client)?;
        let server = ControlEndpoint::new(server)?;

        let proxy_ip = ipv4_of(server.stream.local_addr()?)?;
        let listen_ip = ipv4_of(client.stream.local_addr()?)?;
        let advertise_ip = if config.reverse_target.is_some() {
            config.bind_address.unwrap_or(listen_ip)
        } else {
            ipv4_of(server.peer)?
        };

        let alloc = PortAllocator::new(config.port_min, config.port_max);
        Ok(Session {
            config,
            client,
            server,
            mode: ConnectionMode::Unknown,
            chan: DataChannel::new(),
            alloc,
            replies: ReplyRewriter::new(),
            proxy_ip,
            advertise_ip,
            listen_ip,
            started: Utc::now(),
        })
    }

    pub async fn run(mut self) -> Result<SessionEnd, ProxyError> {
        info!(
            "FTP proxy session: client {} server {}",
            self.client.peer, self.server.peer
        );
        let end = self.event_loop().await?;
        let elapsed = (Utc::now() - self.started).num_milliseconds() as f64 / 1000.0;
        info!("session with {} finished after {:.1}s", self.client.peer, elapsed);
        Ok(end)
    }

    async fn event_loop(&mut self) -> Result<SessionEnd, ProxyError> {
        loop {
            if !self.client.live && !self.server.live {
                return Ok(SessionEnd::BothClosed);
            }

            // Already-buffered control lines take priority over new I/O.
            if self.client.live {
                if let Some(line) = self.client.lines.next_line()? {
                    self.handle_client_line(&line).await?;
                    continue;
                }
            }
            if self.server.live {
                if let Some(line) = self.server.lines.next_line()? {
                    self.handle_server_line(&line).await?;
                    continue;
                }
            }

            match self.wait_event().await {
                Event::IdleTimeout => {
                    info!("idle timeout, ending session with {}", self.client.peer);
                    return Ok(SessionEnd::IdleTimeout);
                }
                Event::CtrlReadable(side, result) => {
                    let endpoint = match side {
                        Side::Client => &mut self.client,
                        Side::Server => &mut self.server,
                    };
                    match result {
                        Ok(()) => endpoint.fill(),
                        Err(e) => {
                            debug!("control poll on {} failed: {e}", endpoint.peer);
                            endpoint.eof = true;
                        }
                    }
                }
                Event::Accepted(side, result) => {
                    let (conn, peer) = result?;
                    trace!("inbound data connection from {peer}");
                    match side {
                        Side::Client => {
                            self.chan
                                .bridge_client_leg(conn, &mut self.alloc, self.config.source_address)
                                .await?
                        }
                        Side::Server => {
                            self.chan
                                .bridge_server_leg(conn, &mut self.alloc, self.config.source_address)
                                .await?
                        }
                    }
                }
                Event::DataReadable(side, result) => match result {
                    Ok(()) => self.relay(side).await,
                    Err(e) => {
                        debug!("data poll failed: {e}");
                        self.finish_transfer();
                    }
                },
            }

            self.propagate_half_close().await;
        }
    }

    /// Waits for the next readiness event across everything the session
    /// owns: control sockets, backchannel listeners, data sockets, plus
    /// the idle timer. Closed or absent handles simply never fire.
    async fn wait_event(&self) -> Event {
        tokio::select! {
            _ = idle_wait(self.config.idle_timeout) => Event::IdleTimeout,
            r = readable_if(&self.client.stream, self.client.live) => {
                Event::CtrlReadable(Side::Client, r)
            }
            r = readable_if(&self.server.stream, self.server.live) => {
                Event::CtrlReadable(Side::Server, r)
            }
            r = accept_on(self.chan.client_listener()) => Event::Accepted(Side::Client, r),
            r = accept_on(self.chan.server_listener()) => Event::Accepted(Side::Server, r),
            r = readable_opt(self.chan.client_conn.as_ref()) => {
                Event::DataReadable(Side::Client, r)
            }
            r = readable_opt(self.chan.server_conn.as_ref()) => {
                Event::DataReadable(Side::Server, r)
            }
        }
    }

    async fn handle_client_line(&mut self, line: &[u8]) -> Result<(), ProxyError> {
        let action = core_ftpcommand::rewrite_command(
            &self.config,
            &mut self.chan,
            &mut self.mode,
            &mut self.alloc,
            self.proxy_ip,
            line,
        )?;
        match action {
            Action::Forward(bytes) => self.server.send(&bytes).await,
            Action::Reject(reply) => self.client.send(reply.as_bytes()).await,
        }
        Ok(())
    }

    async fn handle_server_line(&mut self, line: &[u8]) -> Result<(), ProxyError> {
        let reply = self.replies.rewrite_reply(
            &self.config,
            &mut self.chan,
            &mut self.mode,
            &mut self.alloc,
            self.advertise_ip,
            self.listen_ip,
            line,
        )?;
        self.client.send(&reply).await;
        Ok(())
    }

    async fn relay(&mut self, side: Side) {
        if self.chan.phase() != Phase::Active {
            return;
        }
        let outcome = match side {
            Side::Client => match (self.chan.client_conn.as_ref(), self.chan.server_conn.as_mut()) {
                (Some(from), Some(to)) => xfer_data("client->server", from, to).await,
                _ => return,
            },
            Side::Server => match (self.chan.server_conn.as_ref(), self.chan.client_conn.as_mut()) {
                (Some(from), Some(to)) => xfer_data("server->client", from, to).await,
                _ => return,
            },
        };
        match outcome {
            RelayOutcome::Transferred(n) => match side {
                Side::Client => self.chan.bytes_from_client += n,
                Side::Server => self.chan.bytes_from_server += n,
            },
            RelayOutcome::Ended => self.finish_transfer(),
        }
    }

    fn finish_transfer(&mut self) {
        let stats = self.chan.finish();
        self.log_transfer(stats);
    }

    fn log_transfer(&self, stats: TransferStats) {
        // Statistics are chatter unless -V asked for them.
        let level = if self.config.verbose {
            Level::Info
        } else {
            Level::Debug
        };
        log!(
            level,
            "{} transfer done: {} bytes client->server, {} bytes server->client in {:.1}s",
            self.mode,
            stats.from_client,
            stats.from_server,
            stats.elapsed_secs
        );
    }

    /// Control-channel EOF on one side becomes a write-shutdown on the
    /// other, keeping the untouched direction open until it also ends.
    async fn propagate_half_close(&mut self) {
        if self.client.eof && self.client.live {
            self.client.live = false;
            debug!("client control EOF, half-closing toward server");
            self.server.wr_open = false;
            let _ = self.server.stream.shutdown().await;
        }
        if self.server.eof && self.server.live {
            self.server.live = false;
            debug!("server control EOF, half-closing toward client");
            self.client.wr_open = false;
            let _ = self.client.stream.shutdown().await;
        }
    }
}

fn ipv4_of(addr: SocketAddr) -> Result<Ipv4Addr, ProxyError> {
    match addr.ip() {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(v6) => Err(ProxyError::Config(format!(
            "IPv6 control endpoint {} is not supported",
            v6
        ))),
    }
}

async fn idle_wait(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

async fn readable_if(stream: &TcpStream, live: bool) -> io::Result<()> {
    if live {
        stream.readable().await
    } else {
        std::future::pending().await
    }
}

async fn accept_on(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn readable_opt(stream: Option<&TcpStream>) -> io::Result<()> {
    match stream {
        Some(stream) => stream.readable().await,
        None => std::future::pending().await,
    }
}
