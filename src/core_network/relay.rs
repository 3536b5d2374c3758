// Data-channel byte relay.
//
// Called once per readiness event on a data socket: one bounded read, one
// full write through to the far leg. EOF and errors both mean the transfer
// is over; a broken data connection is an end-of-stream condition, not a
// session failure.

use log::{debug, trace};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::constants::XFER_BUFSIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Bytes moved this round (0 when readiness was spurious).
    Transferred(u64),
    /// The stream ended or broke; tear the data channel down.
    Ended,
}

pub async fn xfer_data(label: &str, from: &TcpStream, to: &mut TcpStream) -> RelayOutcome {
    let mut buffer = [0u8; XFER_BUFSIZE];
    match from.try_read(&mut buffer) {
        Ok(0) => {
            debug!("{label}: end of stream");
            RelayOutcome::Ended
        }
        Ok(n) => match to.write_all(&buffer[..n]).await {
            Ok(()) => {
                trace!("{label}: relayed {n} bytes");
                RelayOutcome::Transferred(n as u64)
            }
            Err(e) => {
                debug!("{label}: write failed: {e}");
                RelayOutcome::Ended
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => RelayOutcome::Transferred(0),
        Err(e) => {
            debug!("{label}: read failed: {e}");
            RelayOutcome::Ended
        }
    }
}
