//! Stream transport used by the control and data channels.
//!
//! The engine only talks to the [`Transport`] and [`Connector`] traits so the
//! protocol code can run over plain TCP, TLS, or a scripted stream in tests.

pub mod tcp;
pub mod tls;

#[cfg(test)]
pub(crate) mod mock;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub use tcp::{TcpConnector, TcpTransport};
pub use tls::SecureConfig;

/// A connected byte stream with adjustable timeouts.
pub trait Transport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
    /// Pushes out anything `send` accepted but could not write yet.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// `None` blocks forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    fn write_timeout(&self) -> io::Result<Option<Duration>>;
    fn shutdown_read(&mut self) -> io::Result<()>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;
    /// Releases the connection. Later calls fail with `NotConnected`.
    fn close(&mut self);
}

/// TLS parameters for one connection attempt.
pub struct TlsTarget<'a> {
    pub config: &'a SecureConfig,
    pub server_name: &'a str,
}

/// Where a connector should connect to.
pub struct ConnectTarget<'a> {
    pub host: &'a str,
    pub port: u16,
    pub tls: Option<TlsTarget<'a>>,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unable to resolve {0}: {1}")]
    Resolve(String, #[source] io::Error),
    #[error("tcp connect failed: {0}")]
    Connect(#[source] io::Error),
    #[error("tls handshake failed: {0}")]
    Handshake(#[source] io::Error),
}

/// Opens transports. Control and data connections go through the same
/// connector so both share one TLS setup.
pub trait Connector {
    type Conn: Transport;

    fn connect(
        &self,
        target: &ConnectTarget<'_>,
        timeout: Option<Duration>,
    ) -> Result<Self::Conn, ConnectError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt after a delay.
    Transient,
    Fatal,
}

pub fn classify(err: &io::Error) -> ErrorClass {
    match err.kind() {
        io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut
        | io::ErrorKind::Interrupted
        | io::ErrorKind::AddrNotAvailable => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::V4,
            SocketAddr::V6(v6) if v6.ip().to_ipv4_mapped().is_some() => AddressFamily::V4,
            SocketAddr::V6(_) => AddressFamily::V6,
        }
    }
}
