// src/constants.rs

/// Longest control-channel line either peer may send, CRLF included.
/// Anything longer is treated as a protocol violation.
pub const MAX_CONTROL_LINE: usize = 512;

/// Backlog for backchannel listen sockets.
pub const DATA_BACKLOG: i32 = 5;

/// Default ephemeral range for backchannel ports.
pub const PORT_MIN: u16 = 40000;
pub const PORT_MAX: u16 = 44999;

/// RFC 959 server data port, bound for the PORT-mode client leg when the
/// process is allowed to.
pub const FTP_DATA_PORT: u16 = 20;

pub const FTP_CONTROL_PORT: u16 = 21;

/// Relay chunk size for data-channel transfers.
pub const XFER_BUFSIZE: usize = 8192;

// sysexits(3)-style process exit codes, so an inetd-style launcher can log
// failure classes.
pub const EX_OK: i32 = 0;
pub const EX_USAGE: i32 = 64;
pub const EX_DATAERR: i32 = 65;
pub const EX_NOHOST: i32 = 68;
pub const EX_OSERR: i32 = 71;
pub const EX_NOPERM: i32 = 77;
pub const EX_CONFIG: i32 = 78;
