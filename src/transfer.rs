//! Passive data channel and file transfer operations.

use std::io::{self, Read, Write};

use log::{debug, info};

use crate::config::FtpcConfig;
use crate::error::FtpcError;
use crate::protocol::{
    parse_epsv_reply, parse_pasv_reply, FtpCommand, PassiveEndpoint, ReplyCode, DATA_CHUNK_SIZE,
};
use crate::session::{connect_error, unexpected, Session};
use crate::storage::Storage;
use crate::transmit::{self, TransmitError, TransmitPolicy};
use crate::transport::{
    classify, AddressFamily, ConnectTarget, Connector, ErrorClass, TlsTarget, Transport,
};

/// A passive mode data connection, open for a single transfer.
pub(crate) struct DataChannel<T: Transport> {
    conn: Option<T>,
}

impl<T: Transport> DataChannel<T> {
    fn new(conn: T) -> Self {
        DataChannel { conn: Some(conn) }
    }

    fn conn(&mut self) -> Result<&mut T, FtpcError> {
        self.conn.as_mut().ok_or(FtpcError::NotConnected)
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
            debug!("data connection closed");
        }
    }
}

impl<T: Transport> Drop for DataChannel<T> {
    fn drop(&mut self) {
        self.close();
    }
}

enum Received {
    Data(usize),
    End,
}

/// A receive timeout or end of stream ends the transfer.
fn recv_chunk<T: Transport>(conn: &mut T, buf: &mut [u8]) -> Result<Received, FtpcError> {
    loop {
        match conn.recv(buf) {
            Ok(0) => return Ok(Received::End),
            Ok(n) => return Ok(Received::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // TLS servers often skip close_notify
            Err(e)
                if classify(&e) == ErrorClass::Transient
                    || e.kind() == io::ErrorKind::UnexpectedEof =>
            {
                debug!("data stream ended: {}", e);
                return Ok(Received::End);
            }
            Err(e) => return Err(FtpcError::DataReceive(e)),
        }
    }
}

fn receive_into<T: Transport>(
    data: &mut DataChannel<T>,
    dest: &mut [u8],
    config: &FtpcConfig,
) -> Result<usize, FtpcError> {
    let conn = data.conn()?;
    conn.set_read_timeout(config.dtp_rx_timeout())
        .map_err(FtpcError::DataReceive)?;

    let mut received = 0;
    while received < dest.len() {
        let end = dest.len().min(received + DATA_CHUNK_SIZE);
        match recv_chunk(conn, &mut dest[received..end])? {
            Received::Data(n) => {
                received += n;
                debug!("received {} bytes, {} total", n, received);
            }
            Received::End => break,
        }
    }
    Ok(received)
}

fn download<T: Transport, W: Write>(
    data: &mut DataChannel<T>,
    writer: &mut W,
    config: &FtpcConfig,
) -> Result<u64, FtpcError> {
    let conn = data.conn()?;
    conn.set_read_timeout(config.dtp_rx_timeout())
        .map_err(FtpcError::DataReceive)?;

    let mut buf = [0u8; DATA_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        match recv_chunk(conn, &mut buf)? {
            Received::Data(n) => {
                let chunk = buf.get(..n).ok_or_else(|| {
                    FtpcError::DataReceive(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "receive overran buffer",
                    ))
                })?;
                writer.write_all(chunk).map_err(FtpcError::LocalStorageIo)?;
                total += n as u64;
                debug!("received {} bytes, {} total", n, total);
            }
            Received::End => break,
        }
    }
    writer.flush().map_err(FtpcError::LocalStorageIo)?;
    Ok(total)
}

fn upload<T: Transport, R: Read>(
    data: &mut DataChannel<T>,
    reader: &mut R,
    config: &FtpcConfig,
) -> Result<u64, FtpcError> {
    let conn = data.conn()?;
    conn.set_write_timeout(config.dtp_tx_timeout())
        .map_err(|e| FtpcError::DataSend(TransmitError::Timeout(e)))?;
    let policy = TransmitPolicy::data(config);

    let mut buf = [0u8; DATA_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FtpcError::LocalStorageIo(e)),
        };
        let chunk = buf.get(..n).ok_or_else(|| {
            FtpcError::LocalStorageIo(io::Error::new(
                io::ErrorKind::InvalidData,
                "read overran buffer",
            ))
        })?;
        transmit::send_all(conn, chunk, &policy).map_err(FtpcError::DataSend)?;
        total += n as u64;
        debug!("sent {} bytes, {} total", n, total);
    }
    Ok(total)
}

fn store_command(append: bool) -> FtpCommand {
    if append {
        FtpCommand::APPE
    } else {
        FtpCommand::STOR
    }
}

impl<C: Connector> Session<C> {
    /// Negotiates a passive data connection: PASV on IPv4 sessions, EPSV on
    /// IPv6 ones. TLS sessions get a TLS data connection.
    pub(crate) fn open_passive(&mut self) -> Result<DataChannel<C::Conn>, FtpcError> {
        let endpoint = match self.family {
            AddressFamily::V4 => {
                let reply = self.expect(FtpCommand::PASV, None, &[ReplyCode::EnterPassiveMode])?;
                parse_pasv_reply(reply.text())
                    .map(PassiveEndpoint::V4)
                    .map_err(|e| FtpcError::InvalidPassiveReply(FtpCommand::PASV, e))?
            }
            AddressFamily::V6 => {
                let reply = self.expect(
                    FtpCommand::EPSV,
                    None,
                    &[ReplyCode::EnterExtendedPassiveMode],
                )?;
                parse_epsv_reply(reply.text())
                    .map(PassiveEndpoint::V6)
                    .map_err(|e| FtpcError::InvalidPassiveReply(FtpCommand::EPSV, e))?
            }
        };

        let addr = endpoint.socket_addr(self.peer.ip());
        debug!("opening data connection to {}", addr);
        let host = addr.ip().to_string();
        let target = ConnectTarget {
            host: &host,
            port: addr.port(),
            tls: self.secure.as_ref().map(|s| TlsTarget {
                config: s,
                server_name: s.server_name(&self.host),
            }),
        };
        let conn = self
            .connector
            .connect(&target, self.config.dtp_conn_timeout())
            .map_err(|e| connect_error(addr.to_string(), e))?;
        Ok(DataChannel::new(conn))
    }

    /// Downloads `remote` into `dest` and returns its size.
    ///
    /// The size is asked for first; a file that does not fit fails with
    /// [`FtpcError::BufferTooSmall`] before any data connection is opened.
    pub fn receive_to_buffer(&mut self, remote: &str, dest: &mut [u8]) -> Result<usize, FtpcError> {
        self.set_binary_type()?;
        let size = self.remote_size(remote)?;
        let capacity = dest.len();
        let dest = match usize::try_from(size) {
            Ok(n) if n <= capacity => &mut dest[..n],
            _ => return Err(FtpcError::BufferTooSmall { size, capacity }),
        };
        let expected = dest.len();

        let mut data = self.open_passive()?;
        if let Err(e) = self.start_transfer(FtpCommand::RETR, remote) {
            data.close();
            return Err(e);
        }

        let outcome = receive_into(&mut data, dest, &self.config).and_then(|received| {
            if received == expected {
                Ok(received)
            } else {
                Err(FtpcError::TransferIncomplete {
                    expected: size,
                    received: received as u64,
                })
            }
        });
        data.close();
        let received = self.finish_transfer(FtpCommand::RETR, outcome)?;
        info!("received {} ({} bytes)", remote, received);
        Ok(received)
    }

    /// Uploads `src` as `remote`, appending to it when `append` is set.
    pub fn send_from_buffer(
        &mut self,
        remote: &str,
        src: &[u8],
        append: bool,
    ) -> Result<(), FtpcError> {
        let command = store_command(append);
        self.set_binary_type()?;
        let mut data = self.open_passive()?;
        if let Err(e) = self.start_transfer(command, remote) {
            data.close();
            return Err(e);
        }

        let mut reader = src;
        let outcome = upload(&mut data, &mut reader, &self.config);
        data.close();
        let sent = self.finish_transfer(command, outcome)?;
        info!("sent {} ({} bytes)", remote, sent);
        Ok(())
    }

    /// Downloads `remote` into the local file `local` and returns the byte
    /// count. The local file is only created once the server has accepted
    /// RETR.
    pub fn receive_to_storage<S: Storage>(
        &mut self,
        remote: &str,
        storage: &S,
        local: &str,
    ) -> Result<u64, FtpcError> {
        self.set_binary_type()?;
        let mut data = self.open_passive()?;
        if let Err(e) = self.start_transfer(FtpCommand::RETR, remote) {
            data.close();
            return Err(e);
        }

        let outcome = match storage.create(local) {
            Ok(mut writer) => download(&mut data, &mut writer, &self.config),
            Err(source) => Err(FtpcError::LocalStorageOpen {
                name: local.to_string(),
                source,
            }),
        };
        data.close();
        let received = self.finish_transfer(FtpCommand::RETR, outcome)?;
        info!("received {} -> {} ({} bytes)", remote, local, received);
        Ok(received)
    }

    /// Uploads the local file `local` as `remote` and returns the byte count.
    pub fn send_from_storage<S: Storage>(
        &mut self,
        remote: &str,
        storage: &S,
        local: &str,
        append: bool,
    ) -> Result<u64, FtpcError> {
        let mut reader = storage
            .open_read(local)
            .map_err(|source| FtpcError::LocalStorageOpen {
                name: local.to_string(),
                source,
            })?;

        let command = store_command(append);
        self.set_binary_type()?;
        let mut data = self.open_passive()?;
        if let Err(e) = self.start_transfer(command, remote) {
            data.close();
            return Err(e);
        }

        let outcome = upload(&mut data, &mut reader, &self.config);
        data.close();
        let sent = self.finish_transfer(command, outcome)?;
        info!("sent {} -> {} ({} bytes)", local, remote, sent);
        Ok(sent)
    }

    fn set_binary_type(&mut self) -> Result<(), FtpcError> {
        self.expect(FtpCommand::TYPE, Some("I"), &[ReplyCode::Okay])
            .map(|_| ())
    }

    fn remote_size(&mut self, remote: &str) -> Result<u64, FtpcError> {
        let reply = self.command(FtpCommand::SIZE, Some(remote))?;
        match reply.code() {
            ReplyCode::FileStatus => reply
                .text()
                .trim()
                .parse::<u64>()
                .map_err(|_| FtpcError::InvalidSizeReply(reply.line().to_string())),
            ReplyCode::FileUnavailable => Err(FtpcError::FileNotFoundRemote(remote.to_string())),
            _ => Err(unexpected(FtpCommand::SIZE, &reply)),
        }
    }

    /// Sends RETR/STOR/APPE and waits for the data connection go-ahead.
    fn start_transfer(&mut self, command: FtpCommand, remote: &str) -> Result<(), FtpcError> {
        let reply = self.command(command, Some(remote))?;
        match reply.code() {
            ReplyCode::AlreadyOpen | ReplyCode::OkayOpening => Ok(()),
            ReplyCode::FileUnavailable if command == FtpCommand::RETR => {
                Err(FtpcError::FileNotFoundRemote(remote.to_string()))
            }
            _ => Err(unexpected(command, &reply)),
        }
    }

    /// Collects the final reply of a started transfer. The data connection
    /// must already be closed. The reply is read even when the transfer
    /// failed, so the control connection stays in step.
    fn finish_transfer<V>(
        &mut self,
        command: FtpCommand,
        outcome: Result<V, FtpcError>,
    ) -> Result<V, FtpcError> {
        let reply = self.read_reply(command);
        let value = outcome?;
        let reply = reply?;
        match reply.code() {
            ReplyCode::ClosingDataConnection | ReplyCode::ActionComplete => Ok(value),
            _ => Err(unexpected(command, &reply)),
        }
    }
}
