use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;
use rustls::pki_types::ServerName;
use rustls::ClientConnection;

use super::{ConnectError, ConnectTarget, Connector, TlsTarget, Transport};

/// Upper bound for delivering close_notify to a peer that stopped reading.
const CLOSE_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

enum Stream {
    Plain(TcpStream),
    Tls {
        conn: Box<ClientConnection>,
        sock: TcpStream,
    },
    Closed,
}

/// A TCP connection, optionally wrapped in TLS
///
/// TLS records are moved with `write_tls` and `read_tls` directly, so a send
/// only ever writes to the socket and a receive only ever reads from it.
/// Each is bounded by the matching socket timeout.
pub struct TcpTransport {
    stream: Stream,
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

/// Writes queued TLS records until none are left.
fn drain_tls<S: Write>(conn: &mut ClientConnection, sock: &mut S) -> io::Result<()> {
    while conn.wants_write() {
        if conn.write_tls(sock)? == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
    }
    Ok(())
}

/// Encrypts `buf` and pushes the records out.
///
/// Records left over from an earlier call go first; if they cannot be written
/// nothing new is accepted. Once plaintext is accepted its length is
/// returned even when the records are still queued. They go out with the
/// next send or [`Transport::flush`].
fn send_tls<S: Write>(conn: &mut ClientConnection, sock: &mut S, buf: &[u8]) -> io::Result<usize> {
    drain_tls(conn, sock)?;
    let n = conn.writer().write(buf)?;
    if let Err(e) = drain_tls(conn, sock) {
        debug!("{} bytes accepted, records still queued: {}", n, e);
    }
    Ok(n)
}

fn recv_tls<S: Read>(
    conn: &mut ClientConnection,
    sock: &mut S,
    buf: &mut [u8],
) -> io::Result<usize> {
    loop {
        match conn.reader().read(buf) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            result => return result,
        }
        conn.read_tls(sock)?;
        conn.process_new_packets()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    }
}

impl TcpTransport {
    fn socket(&self) -> io::Result<&TcpStream> {
        match &self.stream {
            Stream::Plain(sock) | Stream::Tls { sock, .. } => Ok(sock),
            Stream::Closed => Err(not_connected()),
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.stream, Stream::Tls { .. })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Plain(sock) => sock.write(buf),
            Stream::Tls { conn, sock } => send_tls(conn, sock, buf),
            Stream::Closed => Err(not_connected()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stream {
            Stream::Plain(_) => Ok(()),
            Stream::Tls { conn, sock } => drain_tls(conn, sock),
            Stream::Closed => Err(not_connected()),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Plain(sock) => sock.read(buf),
            Stream::Tls { conn, sock } => recv_tls(conn, sock, buf),
            Stream::Closed => Err(not_connected()),
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket()?.set_read_timeout(timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket()?.set_write_timeout(timeout)
    }

    fn write_timeout(&self) -> io::Result<Option<Duration>> {
        self.socket()?.write_timeout()
    }

    fn shutdown_read(&mut self) -> io::Result<()> {
        self.socket()?.shutdown(Shutdown::Read)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.peer_addr()
    }

    fn close(&mut self) {
        match std::mem::replace(&mut self.stream, Stream::Closed) {
            Stream::Plain(sock) => {
                let _ = sock.shutdown(Shutdown::Both);
            }
            Stream::Tls { mut conn, mut sock } => {
                conn.send_close_notify();
                let _ = sock.set_write_timeout(Some(CLOSE_NOTIFY_TIMEOUT));
                if let Err(e) = drain_tls(&mut conn, &mut sock) {
                    debug!("close_notify not delivered: {}", e);
                }
                let _ = sock.shutdown(Shutdown::Both);
            }
            Stream::Closed => {}
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connects over TCP, performing the TLS handshake when asked to.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<TcpStream, ConnectError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| ConnectError::Resolve(host.to_string(), e))?
            .collect();

        if addrs.is_empty() {
            return Err(ConnectError::Resolve(
                host.to_string(),
                io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
            ));
        }

        // Try each address until one succeeds
        let mut last_error = None;
        for addr in addrs {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    debug!("connected to {}", addr);
                    stream.set_nodelay(true).map_err(ConnectError::Connect)?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(ConnectError::Connect(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no addresses available")
        })))
    }

    fn handshake(
        &self,
        mut sock: TcpStream,
        tls: &TlsTarget<'_>,
        timeout: Option<Duration>,
    ) -> io::Result<(ClientConnection, TcpStream)> {
        let server_name = ServerName::try_from(tls.server_name.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut conn = ClientConnection::new(tls.config.client_config(), server_name)
            .map_err(io::Error::other)?;

        sock.set_read_timeout(timeout)?;
        sock.set_write_timeout(timeout)?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock)?;
        }
        sock.set_read_timeout(None)?;
        sock.set_write_timeout(None)?;

        Ok((conn, sock))
    }
}

impl Connector for TcpConnector {
    type Conn = TcpTransport;

    fn connect(
        &self,
        target: &ConnectTarget<'_>,
        timeout: Option<Duration>,
    ) -> Result<TcpTransport, ConnectError> {
        let sock = self.connect_tcp(target.host, target.port, timeout)?;
        match &target.tls {
            None => Ok(TcpTransport {
                stream: Stream::Plain(sock),
            }),
            Some(tls) => {
                let (conn, sock) = self
                    .handshake(sock, tls, timeout)
                    .map_err(ConnectError::Handshake)?;
                debug!("tls established with {}", tls.server_name);
                Ok(TcpTransport {
                    stream: Stream::Tls {
                        conn: Box::new(conn),
                        sock,
                    },
                })
            }
        }
    }
}
