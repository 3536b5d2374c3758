// Error taxonomy for the proxy session.
//
// Components never terminate the process themselves; they return a
// `ProxyError` and `main` maps it onto a sysexits-style status after
// logging, so an inetd-style launcher can tell failure classes apart.

use thiserror::Error;

use crate::constants::{EX_CONFIG, EX_DATAERR, EX_NOHOST, EX_NOPERM, EX_OSERR};

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("server unreachable: {0}")]
    Unreachable(#[source] std::io::Error),

    #[error("network resource failure: {0}")]
    Os(#[from] std::io::Error),

    #[error("connection refused by access policy ({0})")]
    AccessDenied(String),
}

impl ProxyError {
    /// Process exit status for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProxyError::Config(_) => EX_CONFIG,
            ProxyError::Protocol(_) => EX_DATAERR,
            ProxyError::Unreachable(_) => EX_NOHOST,
            ProxyError::Os(_) => EX_OSERR,
            ProxyError::AccessDenied(_) => EX_NOPERM,
        }
    }
}
