use std::net::Ipv4Addr;

/// Parses the RFC 959 `h1,h2,h3,h4,p1,p2` host-port encoding. Each of the
/// six fields must be an unsigned decimal in [0,255]; trailing junk after
/// the last field (a closing parenthesis, punctuation, CRLF) is ignored.
pub fn parse_host_port(s: &str) -> Option<(Ipv4Addr, u16)> {
    let mut fields = [0u8; 6];
    let mut parts = s.trim_start().splitn(6, ',');
    for (i, slot) in fields.iter_mut().enumerate() {
        let mut raw = parts.next()?.trim();
        if i == 5 {
            // Strip anything after the digits of the final field.
            let end = raw
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(raw.len());
            raw = &raw[..end];
        }
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = raw.parse::<u8>().ok()?;
    }
    let addr = Ipv4Addr::new(fields[0], fields[1], fields[2], fields[3]);
    let port = u16::from(fields[4]) << 8 | u16::from(fields[5]);
    Some((addr, port))
}

/// Encodes an address and port back into `h1,h2,h3,h4,p1,p2`.
pub fn format_host_port(addr: Ipv4Addr, port: u16) -> String {
    let octets = addr.octets();
    format!(
        "{},{},{},{},{},{}",
        octets[0],
        octets[1],
        octets[2],
        octets[3],
        port >> 8,
        port & 0xff
    )
}

/// First whitespace-delimited token of a control line, uppercased, plus the
/// remainder with surrounding whitespace and line terminator removed.
pub fn split_command(line: &str) -> (String, &str) {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    match trimmed.split_once(char::is_whitespace) {
        Some((token, rest)) => (token.to_ascii_uppercase(), rest.trim()),
        None => (trimmed.trim().to_ascii_uppercase(), ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_host_port() {
        let (addr, port) = parse_host_port("127,0,0,1,4,210").unwrap();
        assert_eq!(addr, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(port, 1234);
    }

    #[test]
    fn tolerates_trailing_punctuation_on_the_last_field() {
        let (addr, port) = parse_host_port("10,0,0,5,19,136).\r\n").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(port, 5000);
    }

    #[test]
    fn field_of_255_is_accepted_256_is_not() {
        assert!(parse_host_port("255,255,255,255,255,255").is_some());
        assert!(parse_host_port("256,0,0,1,4,210").is_none());
        assert!(parse_host_port("127,0,0,1,256,0").is_none());
    }

    #[test]
    fn rejects_wrong_field_counts_and_signs() {
        assert!(parse_host_port("127,0,0,1,4").is_none());
        assert!(parse_host_port("127,0,0,1").is_none());
        assert!(parse_host_port("").is_none());
        assert!(parse_host_port("+127,0,0,1,4,210").is_none());
        assert!(parse_host_port("127,0,0,1,-4,210").is_none());
    }

    #[test]
    fn format_round_trips_through_parse() {
        let addr = Ipv4Addr::new(192, 0, 2, 7);
        let encoded = format_host_port(addr, 40001);
        assert_eq!(parse_host_port(&encoded).unwrap(), (addr, 40001));
    }

    #[test]
    fn splits_command_token_case_insensitively() {
        assert_eq!(split_command("user Anonymous\r\n"), ("USER".into(), "Anonymous"));
        assert_eq!(split_command("QUIT\r\n"), ("QUIT".into(), ""));
        assert_eq!(split_command("PoRt 1,2,3,4,5,6\r\n"), ("PORT".into(), "1,2,3,4,5,6"));
    }
}
