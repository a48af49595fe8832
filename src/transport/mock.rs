//! Scripted in-memory transport for unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use super::{ConnectError, ConnectTarget, Connector, Transport};

pub(crate) enum Inbound {
    Data(Vec<u8>),
    Error(io::ErrorKind),
    Eof,
}

pub(crate) enum SendStep {
    /// Accept at most this many bytes.
    Accept(usize),
    Error(io::ErrorKind),
}

pub(crate) struct Script {
    pub inbound: VecDeque<Inbound>,
    pub send_steps: VecDeque<SendStep>,
    pub flush_errors: VecDeque<io::ErrorKind>,
    pub flush_calls: usize,
    pub sent: Vec<u8>,
    pub send_calls: usize,
    pub recv_calls: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub write_timeouts_seen: Vec<Option<Duration>>,
    pub read_shut: bool,
    pub closed: bool,
    pub peer: SocketAddr,
}

/// Cheap handle; clones share the same script so tests can inspect a
/// transport after handing it to the code under test.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    script: Rc<RefCell<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::with_peer("127.0.0.1:21".parse().unwrap())
    }

    pub fn with_peer(peer: SocketAddr) -> Self {
        ScriptedTransport {
            script: Rc::new(RefCell::new(Script {
                inbound: VecDeque::new(),
                send_steps: VecDeque::new(),
                flush_errors: VecDeque::new(),
                flush_calls: 0,
                sent: Vec::new(),
                send_calls: 0,
                recv_calls: 0,
                read_timeout: None,
                write_timeout: None,
                write_timeouts_seen: Vec::new(),
                read_shut: false,
                closed: false,
                peer,
            })),
        }
    }

    pub fn push_data(&self, data: &[u8]) -> &Self {
        self.script
            .borrow_mut()
            .inbound
            .push_back(Inbound::Data(data.to_vec()));
        self
    }

    pub fn push_error(&self, kind: io::ErrorKind) -> &Self {
        self.script.borrow_mut().inbound.push_back(Inbound::Error(kind));
        self
    }

    pub fn push_eof(&self) -> &Self {
        self.script.borrow_mut().inbound.push_back(Inbound::Eof);
        self
    }

    pub fn push_send(&self, step: SendStep) -> &Self {
        self.script.borrow_mut().send_steps.push_back(step);
        self
    }

    pub fn push_flush_error(&self, kind: io::ErrorKind) -> &Self {
        self.script.borrow_mut().flush_errors.push_back(kind);
        self
    }

    pub fn script(&self) -> std::cell::Ref<'_, Script> {
        self.script.borrow()
    }

    pub fn sent_text(&self) -> String {
        String::from_utf8_lossy(&self.script.borrow().sent).into_owned()
    }

    pub fn sent_lines(&self) -> Vec<String> {
        self.sent_text()
            .split_terminator("\r\n")
            .map(str::to_string)
            .collect()
    }

    pub fn set_write_timeout_value(&self, timeout: Option<Duration>) {
        self.script.borrow_mut().write_timeout = timeout;
    }

    pub fn is_closed(&self) -> bool {
        self.script.borrow().closed
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut s = self.script.borrow_mut();
        if s.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        s.send_calls += 1;
        let timeout = s.write_timeout;
        s.write_timeouts_seen.push(timeout);
        let n = match s.send_steps.pop_front() {
            Some(SendStep::Error(kind)) => return Err(kind.into()),
            Some(SendStep::Accept(max)) => buf.len().min(max),
            None => buf.len(),
        };
        s.sent.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut s = self.script.borrow_mut();
        s.flush_calls += 1;
        match s.flush_errors.pop_front() {
            Some(kind) => Err(kind.into()),
            None => Ok(()),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut s = self.script.borrow_mut();
        if s.closed || s.read_shut {
            return Ok(0);
        }
        s.recv_calls += 1;
        match s.inbound.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Inbound::Eof) => Ok(0),
            Some(Inbound::Error(kind)) => Err(kind.into()),
            Some(Inbound::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    s.inbound.push_front(Inbound::Data(rest));
                }
                Ok(n)
            }
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.script.borrow_mut().read_timeout = timeout;
        Ok(())
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.script.borrow_mut().write_timeout = timeout;
        Ok(())
    }

    fn write_timeout(&self) -> io::Result<Option<Duration>> {
        Ok(self.script.borrow().write_timeout)
    }

    fn shutdown_read(&mut self) -> io::Result<()> {
        self.script.borrow_mut().read_shut = true;
        Ok(())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.script.borrow().peer)
    }

    fn close(&mut self) {
        self.script.borrow_mut().closed = true;
    }
}

/// Hands out prepared transports in order and records every target.
#[derive(Clone, Default)]
pub(crate) struct ScriptedConnector {
    conns: Rc<RefCell<VecDeque<ScriptedTransport>>>,
    failures: Rc<RefCell<VecDeque<ConnectError>>>,
    targets: Rc<RefCell<Vec<(String, u16, bool)>>>,
}

impl ScriptedConnector {
    pub fn new(conns: Vec<ScriptedTransport>) -> Self {
        ScriptedConnector {
            conns: Rc::new(RefCell::new(conns.into())),
            failures: Rc::default(),
            targets: Rc::default(),
        }
    }

    /// Makes the next connect call fail with `err`.
    pub fn fail_next(&self, err: ConnectError) -> &Self {
        self.failures.borrow_mut().push_back(err);
        self
    }

    /// `(host, port, tls)` per connect call.
    pub fn targets(&self) -> Vec<(String, u16, bool)> {
        self.targets.borrow().clone()
    }
}

impl Connector for ScriptedConnector {
    type Conn = ScriptedTransport;

    fn connect(
        &self,
        target: &ConnectTarget<'_>,
        _timeout: Option<Duration>,
    ) -> Result<ScriptedTransport, ConnectError> {
        self.targets.borrow_mut().push((
            target.host.to_string(),
            target.port,
            target.tls.is_some(),
        ));
        if let Some(err) = self.failures.borrow_mut().pop_front() {
            return Err(err);
        }
        self.conns
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ConnectError::Connect(io::ErrorKind::ConnectionRefused.into()))
    }
}
