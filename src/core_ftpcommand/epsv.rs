use log::info;

use crate::core_ftpcommand::Action;

/// Handles the RFC 2428 EPSV command.
///
/// EPSV is not supported: its reply carries only a port number, which
/// cannot be intercepted safely without dynamic filter-rule support. The
/// client gets a plain 500 so it falls back to PASV, and the server never
/// sees the command.
pub fn handle_epsv_command() -> Action {
    info!("refusing EPSV, steering the client back to PASV");
    Action::Reject("500 EPSV command not understood\r\n")
}
