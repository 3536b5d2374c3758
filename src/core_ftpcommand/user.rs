use log::{info, warn};

use crate::config::ProxyConfig;
use crate::core_ftpcommand::Action;

/// Handles the USER FTP command.
///
/// Under anonymous-only mode, any login other than `ftp` or `anonymous` is
/// rejected in-band; the command is never forwarded to the server in that
/// case, so the real server stays unaware of the attempt.
pub fn handle_user_command(config: &ProxyConfig, name: &str, raw: &[u8]) -> Action {
    if config.anonymous_only {
        let name = name.trim();
        if !name.eq_ignore_ascii_case("ftp") && !name.eq_ignore_ascii_case("anonymous") {
            warn!("refusing non-anonymous login for user {:?}", name);
            return Action::Reject("500 Only anonymous FTP is allowed\r\n");
        }
        info!("anonymous login initiated for user {:?}", name);
    }
    Action::Forward(raw.to_vec())
}
