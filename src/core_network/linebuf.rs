// Control-channel line buffering.
//
// Raw bytes read off a control socket accumulate here until a complete
// LF-terminated line can be handed to a rewriter. The buffer grows on
// demand, but a line (or an unterminated prefix) longer than
// MAX_CONTROL_LINE is a protocol violation: well-behaved FTP peers never
// come close, and an oversized line is the signature of an overrun
// attempt.

use bytes::{Buf, BytesMut};

use crate::constants::MAX_CONTROL_LINE;
use crate::core_error::ProxyError;

#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer {
            buf: BytesMut::with_capacity(MAX_CONTROL_LINE),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Yields the next complete line, terminator included, or `None` when
    /// no full line is buffered yet.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>, ProxyError> {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let len = pos + 1;
                if len > MAX_CONTROL_LINE {
                    return Err(oversized(len));
                }
                let line = self.buf.split_to(len).to_vec();
                Ok(Some(line))
            }
            None => {
                if self.buf.len() > MAX_CONTROL_LINE {
                    return Err(oversized(self.buf.len()));
                }
                Ok(None)
            }
        }
    }

    /// Bytes buffered but not yet yielded as a line.
    pub fn pending(&self) -> usize {
        self.buf.remaining()
    }
}

fn oversized(len: usize) -> ProxyError {
    ProxyError::Protocol(format!(
        "control line of {} bytes exceeds the {} byte limit",
        len, MAX_CONTROL_LINE
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_lines_in_order() {
        let mut lines = LineBuffer::new();
        lines.extend(b"USER ftp\r\nPASS x@y\r\n");
        assert_eq!(lines.next_line().unwrap().unwrap(), b"USER ftp\r\n");
        assert_eq!(lines.next_line().unwrap().unwrap(), b"PASS x@y\r\n");
        assert_eq!(lines.next_line().unwrap(), None);
    }

    #[test]
    fn holds_partial_line_until_terminated() {
        let mut lines = LineBuffer::new();
        lines.extend(b"RETR file");
        assert_eq!(lines.next_line().unwrap(), None);
        assert_eq!(lines.pending(), 9);
        lines.extend(b"name\r\n");
        assert_eq!(lines.next_line().unwrap().unwrap(), b"RETR filename\r\n");
    }

    #[test]
    fn line_of_exactly_512_bytes_is_accepted() {
        let mut lines = LineBuffer::new();
        let mut line = vec![b'X'; MAX_CONTROL_LINE - 2];
        line.extend_from_slice(b"\r\n");
        lines.extend(&line);
        assert_eq!(lines.next_line().unwrap().unwrap().len(), MAX_CONTROL_LINE);
    }

    #[test]
    fn line_of_513_bytes_is_a_protocol_violation() {
        let mut lines = LineBuffer::new();
        let mut line = vec![b'X'; MAX_CONTROL_LINE - 1];
        line.extend_from_slice(b"\r\n");
        lines.extend(&line);
        assert!(matches!(
            lines.next_line().unwrap_err(),
            ProxyError::Protocol(_)
        ));
    }

    #[test]
    fn unterminated_overrun_is_caught_without_a_newline() {
        let mut lines = LineBuffer::new();
        lines.extend(&vec![b'A'; MAX_CONTROL_LINE + 1]);
        assert!(matches!(
            lines.next_line().unwrap_err(),
            ProxyError::Protocol(_)
        ));
    }
}
