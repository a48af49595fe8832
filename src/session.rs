//! Control connection state machine.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::config::FtpcConfig;
use crate::error::FtpcError;
use crate::protocol::{FtpCommand, Reply, ReplyCode, ReplyReader, CTRL_BUF_SIZE};
use crate::transmit::{self, TransmitPolicy};
use crate::transport::{
    AddressFamily, ConnectError, ConnectTarget, Connector, SecureConfig, TlsTarget, Transport,
};

/// Login name and password for a session
pub struct Credentials {
    pub user: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(user: &str, password: SecretString) -> Self {
        Credentials {
            user: user.to_string(),
            password,
        }
    }

    pub fn anonymous() -> Self {
        Credentials::new("anonymous", SecretString::new("anonymous@".to_string()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

pub(crate) fn unexpected(command: FtpCommand, reply: &Reply) -> FtpcError {
    FtpcError::UnexpectedReply {
        command,
        line: reply.line().to_string(),
    }
}

pub(crate) fn connect_error(target: String, err: ConnectError) -> FtpcError {
    match err {
        ConnectError::Handshake(e) => FtpcError::SecureChannel {
            target,
            reason: e.to_string(),
        },
        ConnectError::Resolve(_, source) | ConnectError::Connect(source) => {
            FtpcError::Connect { target, source }
        }
    }
}

/// One logged-in control connection
///
/// Commands are strictly sequential: every operation sends one command and
/// waits for its reply before the next. When the control connection breaks
/// (a send fails or no valid reply arrives) it is closed and every later
/// operation fails with [`FtpcError::NotConnected`].
pub struct Session<C: Connector> {
    pub(crate) connector: C,
    pub(crate) conn: Option<C::Conn>,
    pub(crate) host: String,
    pub(crate) peer: SocketAddr,
    pub(crate) family: AddressFamily,
    pub(crate) reader: ReplyReader,
    pub(crate) config: Arc<FtpcConfig>,
    pub(crate) secure: Option<SecureConfig>,
}

impl<C: Connector> Session<C> {
    /// Connects, waits for the greeting and logs in.
    ///
    /// With a secure configuration the control connection is TLS from the
    /// start and the data channel is protected with `PBSZ 0` / `PROT P`.
    /// The transport is closed on any failure.
    pub fn open(
        connector: C,
        host: &str,
        port: u16,
        credentials: &Credentials,
        config: Arc<FtpcConfig>,
        secure: Option<SecureConfig>,
    ) -> Result<Self, FtpcError> {
        let target_name = format!("{}:{}", host, port);
        let mut conn = {
            let target = ConnectTarget {
                host,
                port,
                tls: secure.as_ref().map(|s| TlsTarget {
                    config: s,
                    server_name: s.server_name(host),
                }),
            };
            connector
                .connect(&target, config.ctrl_conn_timeout())
                .map_err(|e| connect_error(target_name.clone(), e))?
        };

        let peer = match conn.peer_addr() {
            Ok(peer) => peer,
            Err(source) => {
                conn.close();
                return Err(FtpcError::Connect {
                    target: target_name,
                    source,
                });
            }
        };
        info!("connected to {} ({})", target_name, peer);

        let mut session = Session {
            connector,
            conn: Some(conn),
            host: host.to_string(),
            peer,
            family: AddressFamily::of(&peer),
            reader: ReplyReader::new(CTRL_BUF_SIZE),
            config,
            secure,
        };
        if let Err(e) = session.login(credentials) {
            warn!("login to {} failed: {}", target_name, e);
            session.abort();
            return Err(e);
        }
        Ok(session)
    }

    /// Sends QUIT and closes the control connection whatever the reply.
    pub fn close(mut self) -> Result<(), FtpcError> {
        let result = self
            .expect(FtpCommand::QUIT, None, &[ReplyCode::ServiceClosing])
            .map(|_| ());
        self.abort();
        result
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn address_family(&self) -> AddressFamily {
        self.family
    }

    pub fn config(&self) -> &FtpcConfig {
        &self.config
    }

    fn login(&mut self, credentials: &Credentials) -> Result<(), FtpcError> {
        self.await_greeting()?;

        let reply = self.command(FtpCommand::USER, Some(&credentials.user))?;
        match reply.code() {
            ReplyCode::LoggedIn => {}
            ReplyCode::NeedPassword => {
                let reply = self.command(
                    FtpCommand::PASS,
                    Some(credentials.password.expose_secret().as_str()),
                )?;
                if reply.code() != ReplyCode::LoggedIn {
                    return Err(FtpcError::NotLoggedIn(reply.line().to_string()));
                }
            }
            ReplyCode::NotLoggedIn => {
                return Err(FtpcError::NotLoggedIn(reply.line().to_string()));
            }
            _ => return Err(unexpected(FtpCommand::USER, &reply)),
        }
        info!("logged in as {}", credentials.user);

        if self.secure.is_some() {
            self.protect_data_channel()?;
        }
        Ok(())
    }

    fn await_greeting(&mut self) -> Result<(), FtpcError> {
        loop {
            let reply = self.read_reply(FtpCommand::GREETING)?;
            match reply.code() {
                ReplyCode::ServiceReady => return Ok(()),
                code if code.is_negative() => {
                    return Err(unexpected(FtpCommand::GREETING, &reply));
                }
                _ => debug!("waiting for service ready: {}", reply),
            }
        }
    }

    fn protect_data_channel(&mut self) -> Result<(), FtpcError> {
        for (command, arg) in [(FtpCommand::PBSZ, "0"), (FtpCommand::PROT, "P")] {
            let reply = self.command(command, Some(arg))?;
            if reply.code() != ReplyCode::Okay {
                return Err(FtpcError::SecureChannel {
                    target: self.host.clone(),
                    reason: format!("{} refused: {}", command, reply),
                });
            }
        }
        Ok(())
    }

    /// Sends a command and requires one of `expected` in the reply.
    pub(crate) fn expect(
        &mut self,
        command: FtpCommand,
        arg: Option<&str>,
        expected: &[ReplyCode],
    ) -> Result<Reply, FtpcError> {
        let reply = self.command(command, arg)?;
        if expected.contains(&reply.code()) {
            Ok(reply)
        } else {
            Err(unexpected(command, &reply))
        }
    }

    pub(crate) fn command(
        &mut self,
        command: FtpCommand,
        arg: Option<&str>,
    ) -> Result<Reply, FtpcError> {
        self.send_command(command, arg)?;
        self.read_reply(command)
    }

    fn send_command(&mut self, command: FtpCommand, arg: Option<&str>) -> Result<(), FtpcError> {
        let line = command
            .line(arg)
            .map_err(|e| FtpcError::CommandCompose(command, e))?;
        let conn = self.conn.as_mut().ok_or(FtpcError::NotConnected)?;

        info!("> {}", line);
        let policy = TransmitPolicy::control(&self.config);
        if let Err(e) = transmit::send_all(conn, line.as_bytes(), &policy) {
            self.abort();
            return Err(FtpcError::CommandSend(command, e));
        }
        Ok(())
    }

    /// Waits for the reply to `command`; a failure breaks the session.
    pub(crate) fn read_reply(&mut self, command: FtpCommand) -> Result<Reply, FtpcError> {
        let conn = self.conn.as_mut().ok_or(FtpcError::NotConnected)?;
        match self.reader.await_reply(conn, &self.config) {
            Ok(reply) => {
                info!("< {}", reply);
                Ok(reply)
            }
            Err(e) => {
                self.abort();
                Err(FtpcError::ReplyReceive(command, e))
            }
        }
    }

    /// Closes the control transport without QUIT.
    pub(crate) fn abort(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
            info!("control connection to {} closed", self.host);
        }
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::error::FtpcErrorKind;
    use crate::transport::mock::{ScriptedConnector, ScriptedTransport, SendStep};
    use std::io;

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    fn open(
        ctrl: &ScriptedTransport,
        secure: Option<SecureConfig>,
    ) -> (Result<Session<ScriptedConnector>, FtpcError>, ScriptedConnector) {
        let connector = ScriptedConnector::new(vec![ctrl.clone()]);
        let session = Session::open(
            connector.clone(),
            "ftp.example.com",
            21,
            &Credentials::new("alice", secret("s3cret")),
            Arc::new(test_config()),
            secure,
        );
        (session, connector)
    }

    #[test]
    fn test_open_with_password() {
        let ctrl = ScriptedTransport::new();
        ctrl.push_data(b"220-Welcome\r\n220 Ready\r\n")
            .push_data(b"331 Password required\r\n")
            .push_data(b"230 Logged in\r\n");

        let (session, connector) = open(&ctrl, None);
        let session = session.unwrap();
        assert!(session.is_connected());
        assert_eq!(session.address_family(), AddressFamily::V4);
        assert_eq!(ctrl.sent_lines(), vec!["USER alice", "PASS s3cret"]);
        assert_eq!(
            connector.targets(),
            vec![("ftp.example.com".to_string(), 21, false)]
        );
    }

    #[test]
    fn test_open_skips_preliminary_greeting() {
        let ctrl = ScriptedTransport::new();
        ctrl.push_data(b"120 Ready in 1 minute\r\n")
            .push_data(b"220 Ready\r\n")
            .push_data(b"230 No password needed\r\n");

        let (session, _) = open(&ctrl, None);
        assert!(session.is_ok());
        assert_eq!(ctrl.sent_lines(), vec!["USER alice"]);
    }

    #[test]
    fn test_wrong_password_closes_connection() {
        let ctrl = ScriptedTransport::new();
        ctrl.push_data(b"220 Ready\r\n")
            .push_data(b"331 Password required\r\n")
            .push_data(b"530 Login incorrect\r\n");

        let (session, _) = open(&ctrl, None);
        let err = session.err().unwrap();
        assert_eq!(err.kind(), FtpcErrorKind::NotLoggedIn);
        assert!(ctrl.is_closed());
    }

    #[test]
    fn test_service_unavailable_greeting() {
        let ctrl = ScriptedTransport::new();
        ctrl.push_data(b"421 Too many connections\r\n");

        let (session, _) = open(&ctrl, None);
        assert_eq!(
            session.err().unwrap().kind(),
            FtpcErrorKind::UnexpectedReplyCode
        );
        assert!(ctrl.is_closed());
        assert!(ctrl.sent_lines().is_empty());
    }

    #[test]
    fn test_connect_failure() {
        let connector = ScriptedConnector::new(Vec::new());
        let err = Session::open(
            connector,
            "ftp.example.com",
            21,
            &Credentials::anonymous(),
            Arc::new(test_config()),
            None,
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), FtpcErrorKind::ConnectFailure);
    }

    #[test]
    fn test_handshake_failure_is_secure_channel_error() {
        let connector = ScriptedConnector::new(Vec::new());
        connector.fail_next(ConnectError::Handshake(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid peer certificate",
        )));
        let secure = SecureConfig::new(None, true).unwrap();

        let err = Session::open(
            connector.clone(),
            "ftp.example.com",
            990,
            &Credentials::anonymous(),
            Arc::new(test_config()),
            Some(secure),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), FtpcErrorKind::SecureChannelUnavailable);
        assert!(err.to_string().contains("invalid peer certificate"));
        assert_eq!(
            connector.targets(),
            vec![("ftp.example.com".to_string(), 990, true)]
        );
    }

    #[test]
    fn test_connect_error_kinds() {
        let target = || "ftp.example.com:21".to_string();
        let cases = [
            (
                ConnectError::Resolve(
                    "ftp.example.com".to_string(),
                    io::ErrorKind::NotFound.into(),
                ),
                FtpcErrorKind::ConnectFailure,
            ),
            (
                ConnectError::Connect(io::ErrorKind::ConnectionRefused.into()),
                FtpcErrorKind::ConnectFailure,
            ),
            (
                ConnectError::Handshake(io::ErrorKind::UnexpectedEof.into()),
                FtpcErrorKind::SecureChannelUnavailable,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(connect_error(target(), err).kind(), kind);
        }
    }

    #[test]
    fn test_silent_server_times_out() {
        let ctrl = ScriptedTransport::new();
        let (session, _) = open(&ctrl, None);
        let err = session.err().unwrap();
        assert_eq!(err.kind(), FtpcErrorKind::ReplyReceiveFailure);
        assert!(ctrl.is_closed());
    }

    #[test]
    fn test_secure_login_protects_data_channel() {
        let ctrl = ScriptedTransport::new();
        ctrl.push_data(b"220 Ready\r\n")
            .push_data(b"331 Password required\r\n")
            .push_data(b"230 Logged in\r\n")
            .push_data(b"200 PBSZ=0\r\n")
            .push_data(b"200 Protection level set to P\r\n");
        let secure = SecureConfig::new(None, true).unwrap();

        let (session, connector) = open(&ctrl, Some(secure));
        assert!(session.is_ok());
        assert_eq!(
            ctrl.sent_lines(),
            vec!["USER alice", "PASS s3cret", "PBSZ 0", "PROT P"]
        );
        assert!(connector.targets()[0].2);
    }

    #[test]
    fn test_secure_login_prot_refused() {
        let ctrl = ScriptedTransport::new();
        ctrl.push_data(b"220 Ready\r\n")
            .push_data(b"230 Logged in\r\n")
            .push_data(b"200 PBSZ=0\r\n")
            .push_data(b"536 Protection level not supported\r\n");
        let secure = SecureConfig::new(None, true).unwrap();

        let (session, _) = open(&ctrl, Some(secure));
        assert_eq!(
            session.err().unwrap().kind(),
            FtpcErrorKind::SecureChannelUnavailable
        );
        assert!(ctrl.is_closed());
    }

    #[test]
    fn test_close_sends_quit() {
        let ctrl = ScriptedTransport::new();
        ctrl.push_data(b"220 Ready\r\n")
            .push_data(b"230 Logged in\r\n")
            .push_data(b"221 Goodbye\r\n");

        let (session, _) = open(&ctrl, None);
        session.unwrap().close().unwrap();
        assert_eq!(ctrl.sent_lines(), vec!["USER alice", "QUIT"]);
        assert!(ctrl.is_closed());
    }

    #[test]
    fn test_close_always_closes_transport() {
        let ctrl = ScriptedTransport::new();
        ctrl.push_data(b"220 Ready\r\n")
            .push_data(b"230 Logged in\r\n")
            .push_data(b"500 What?\r\n");

        let (session, _) = open(&ctrl, None);
        let err = session.unwrap().close().unwrap_err();
        assert_eq!(err.kind(), FtpcErrorKind::UnexpectedReplyCode);
        assert!(ctrl.is_closed());
    }

    #[test]
    fn test_send_failure_breaks_session() {
        let ctrl = ScriptedTransport::new();
        ctrl.push_data(b"220 Ready\r\n").push_data(b"230 Logged in\r\n");
        let (session, _) = open(&ctrl, None);
        let mut session = session.unwrap();

        ctrl.push_send(SendStep::Error(io::ErrorKind::ConnectionReset));
        let err = session.command(FtpCommand::NOOP, None).unwrap_err();
        assert_eq!(err.kind(), FtpcErrorKind::CommandSendFailure);
        assert!(!session.is_connected());
        assert!(ctrl.is_closed());

        let err = session.command(FtpCommand::NOOP, None).unwrap_err();
        assert!(matches!(err, FtpcError::NotConnected));
    }

    #[test]
    fn test_drop_closes_transport() {
        let ctrl = ScriptedTransport::new();
        ctrl.push_data(b"220 Ready\r\n").push_data(b"230 Logged in\r\n");
        let (session, _) = open(&ctrl, None);
        drop(session);
        assert!(ctrl.is_closed());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("bob", secret("topsecret"));
        let debug = format!("{:?}", creds);
        assert!(debug.contains("bob"));
        assert!(!debug.contains("topsecret"));
    }
}
