//! Passive mode reply parsing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PassiveReplyError {
    #[error("no parenthesized address in reply")]
    MissingAddress,
    #[error("expected 6 address fields, found {0}")]
    FieldCount(usize),
    #[error("invalid address field {0:?}")]
    InvalidField(String),
    #[error("invalid extended passive delimiters")]
    InvalidDelimiters,
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// Data connection endpoint announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveEndpoint {
    /// PASV: the server names address and port.
    V4(SocketAddrV4),
    /// EPSV: only the port; the host is the control connection peer.
    V6(u16),
}

impl PassiveEndpoint {
    pub fn socket_addr(&self, control_peer: IpAddr) -> SocketAddr {
        match self {
            PassiveEndpoint::V4(addr) => SocketAddr::V4(*addr),
            PassiveEndpoint::V6(port) => SocketAddr::new(control_peer, *port),
        }
    }
}

fn parenthesized(text: &str) -> Result<&str, PassiveReplyError> {
    let start = memchr::memchr(b'(', text.as_bytes()).ok_or(PassiveReplyError::MissingAddress)?;
    let len = memchr::memchr(b')', &text.as_bytes()[start..])
        .ok_or(PassiveReplyError::MissingAddress)?;
    text.get(start + 1..start + len)
        .ok_or(PassiveReplyError::MissingAddress)
}

/// Parses the text of a 227 reply, e.g.
/// `Entering Passive Mode (192,168,1,10,19,136).`
pub fn parse_pasv_reply(text: &str) -> Result<SocketAddrV4, PassiveReplyError> {
    let inner = parenthesized(text)?;
    let fields = inner
        .split(',')
        .map(|f| {
            let f = f.trim();
            f.parse::<u8>()
                .map_err(|_| PassiveReplyError::InvalidField(f.to_string()))
        })
        .collect::<Result<Vec<u8>, _>>()?;

    match fields.as_slice() {
        &[a, b, c, d, p1, p2] => Ok(SocketAddrV4::new(
            Ipv4Addr::new(a, b, c, d),
            u16::from_be_bytes([p1, p2]),
        )),
        other => Err(PassiveReplyError::FieldCount(other.len())),
    }
}

/// Parses the text of a 229 reply, e.g.
/// `Entering Extended Passive Mode (|||6446|)`.
///
/// Any printable delimiter is accepted as long as it is used consistently.
pub fn parse_epsv_reply(text: &str) -> Result<u16, PassiveReplyError> {
    let inner = parenthesized(text)?.as_bytes();
    let (&delim, rest) = inner
        .split_first()
        .ok_or(PassiveReplyError::InvalidDelimiters)?;
    if !delim.is_ascii_graphic() || delim.is_ascii_digit() {
        return Err(PassiveReplyError::InvalidDelimiters);
    }
    let port = match rest {
        [d1, d2, port @ .., d3] if *d1 == delim && *d2 == delim && *d3 == delim => port,
        _ => return Err(PassiveReplyError::InvalidDelimiters),
    };

    let port = String::from_utf8_lossy(port);
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(PassiveReplyError::InvalidPort(port.into_owned())),
    }
}
