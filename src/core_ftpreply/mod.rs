// Reply rewriter: server -> client direction of the control channel.
//
// Replies carry a 1-3 digit code followed by a space (final line) or a
// hyphen (continuation follows). Continuation bodies are free text and are
// forwarded untouched; a line that fails to parse outside a continuation
// means the proxy has lost protocol sync with the server and the session
// cannot continue. The only reply rewritten is 227.

pub mod pasv;

use std::net::Ipv4Addr;

use log::{debug, trace};

use crate::config::ProxyConfig;
use crate::core_error::ProxyError;
use crate::core_network::allocator::PortAllocator;
use crate::core_network::datachan::{ConnectionMode, DataChannel};

#[derive(Debug, Default)]
pub struct ReplyRewriter {
    continuing: bool,
}

impl ReplyRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one server reply line, returning the line to send to the
    /// client (exactly one line out per line in).
    pub fn rewrite_reply(
        &mut self,
        config: &ProxyConfig,
        chan: &mut DataChannel,
        mode: &mut ConnectionMode,
        alloc: &mut PortAllocator,
        advertise_ip: Ipv4Addr,
        listen_ip: Ipv4Addr,
        line: &[u8],
    ) -> Result<Vec<u8>, ProxyError> {
        let text = String::from_utf8_lossy(line);
        debug!("server reply: {}", text.trim_end());

        let code = match parse_code(&text) {
            Some((code, '-')) => {
                // Start (or restart) of a multi-line reply; everything up
                // to the `<code><space>` terminator passes verbatim.
                self.continuing = true;
                trace!("continuation reply {code} begins");
                return Ok(line.to_vec());
            }
            Some((code, _)) => {
                if self.continuing {
                    trace!("continuation reply {code} ends");
                    self.continuing = false;
                }
                code
            }
            None if self.continuing => {
                // Free-text continuation body, not re-validated.
                return Ok(line.to_vec());
            }
            None => {
                return Err(ProxyError::Protocol(format!(
                    "malformed server reply: {:?}",
                    text.trim_end()
                )))
            }
        };

        if code == 227 {
            if config.nat_passthrough {
                // The NAT engine handles the redirect; record the mode and
                // stay out of the way.
                *mode = ConnectionMode::Pasv;
            } else {
                return pasv::rewrite_pasv_reply(
                    chan,
                    mode,
                    alloc,
                    advertise_ip,
                    listen_ip,
                    &text,
                );
            }
        }
        Ok(line.to_vec())
    }
}

/// Leading reply code and its separator: 1-3 digits then space or hyphen.
fn parse_code(text: &str) -> Option<(u16, char)> {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || digits.len() > 3 {
        return None;
    }
    let sep = text[digits.len()..].chars().next()?;
    if sep != ' ' && sep != '-' {
        return None;
    }
    Some((digits.parse().ok()?, sep))
}
