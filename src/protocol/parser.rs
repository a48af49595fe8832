//! Incremental reply parser.
//!
//! Replies arrive in fragments of any size. [`ReplyAccumulator`] is a pure
//! state machine fed one fragment at a time; [`ReplyReader`] drives it from a
//! [`Transport`] and keeps whatever follows a completed reply for the next
//! wait.

use std::io;
use std::ops::Range;
use std::thread;

use log::{debug, warn};
use thiserror::Error;

use super::reply::Reply;
use crate::config::FtpcConfig;
use crate::transport::{classify, ErrorClass, Transport};

/// `CR LF d d d SP`
const END_MARKER_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),
    #[error("no reply after {0} receive attempts")]
    TimedOut(u32),
    #[error("reply exceeds the maximum length of {0} bytes")]
    TooLong(usize),
    #[error("invalid reply line format")]
    InvalidLineFormat,
    #[error("invalid reply code {0}")]
    InvalidReplyCode(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Looking for the end of the first line.
    Scanning,
    /// Inside a multi-line reply, hunting for the end marker.
    MultilineAccumulating,
    /// End marker seen, reading the rest of the last line.
    FinalLine,
    Done,
}

/// Result of feeding one fragment.
#[derive(Debug, PartialEq, Eq)]
pub enum Feed {
    NeedMore,
    /// `consumed` bytes of the fragment belonged to the reply.
    Done { reply: Reply, consumed: usize },
}

/// Holds at most `capacity` bytes of the current line; the rest of an
/// over-long line is dropped while scanning goes on.
struct LineBuffer {
    data: Vec<u8>,
    capacity: usize,
    overflowed: bool,
}

impl LineBuffer {
    fn new(capacity: usize) -> Self {
        LineBuffer {
            data: Vec::with_capacity(capacity),
            capacity,
            overflowed: false,
        }
    }

    fn extend(&mut self, bytes: &[u8]) {
        let room = self.capacity.saturating_sub(self.data.len());
        let keep = bytes.len().min(room);
        self.data
            .extend_from_slice(bytes.get(..keep).unwrap_or_default());
        if keep < bytes.len() {
            self.overflowed = true;
        }
    }

    fn clear(&mut self) {
        self.data.clear();
        self.overflowed = false;
    }

    /// Line content without its LF or CR LF terminator.
    fn content(&self) -> &[u8] {
        let line = self.data.strip_suffix(b"\n").unwrap_or(&self.data);
        line.strip_suffix(b"\r").unwrap_or(line)
    }
}

#[derive(Debug, Clone, Copy)]
struct EndMarker {
    bytes: [u8; END_MARKER_LEN],
    matched: usize,
}

impl EndMarker {
    fn idle() -> Self {
        EndMarker {
            bytes: [b'\r', b'\n', b'0', b'0', b'0', b' '],
            matched: 0,
        }
    }

    /// Marker for a reply whose opening line just ended, so the next byte
    /// starts a line.
    fn opened(code: [u8; 3]) -> Self {
        EndMarker {
            bytes: [b'\r', b'\n', code[0], code[1], code[2], b' '],
            matched: 2,
        }
    }

    /// Returns true once the whole marker has been seen.
    fn advance(&mut self, b: u8) -> bool {
        if b == self.bytes[self.matched] {
            self.matched += 1;
        } else if b == b'\r' {
            self.matched = 1;
        } else if b == b'\n' {
            // bare LF still starts a new line
            self.matched = 2;
        } else {
            self.matched = 0;
        }

        if self.matched == END_MARKER_LEN {
            self.matched = 0;
            true
        } else {
            false
        }
    }

    fn carried(&self) -> &[u8] {
        &self.bytes[..self.matched]
    }
}

/// Parser state for one reply.
pub struct ReplyAccumulator {
    state: ScanState,
    line: LineBuffer,
    code: [u8; 3],
    marker: EndMarker,
    multiline: bool,
    truncated: bool,
}

impl ReplyAccumulator {
    /// `line_capacity` bounds the length of any single reply line.
    pub fn new(line_capacity: usize) -> Self {
        ReplyAccumulator {
            state: ScanState::Scanning,
            line: LineBuffer::new(line_capacity),
            code: [b'0'; 3],
            marker: EndMarker::idle(),
            multiline: false,
            truncated: false,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_multiline(&self) -> bool {
        self.multiline
    }

    /// Whether the last fragment stopped in the middle of a line.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Prefix of the end marker matched so far, carried into the next fragment.
    pub fn carried_marker(&self) -> &[u8] {
        if self.state == ScanState::MultilineAccumulating {
            self.marker.carried()
        } else {
            &[]
        }
    }

    pub fn feed(&mut self, fragment: &[u8]) -> Result<Feed, ReplyError> {
        let mut pos = 0;
        while pos < fragment.len() && self.state != ScanState::Done {
            let input = &fragment[pos..];
            pos += match self.state {
                ScanState::Scanning => self.scan_first_line(input)?,
                ScanState::MultilineAccumulating => self.scan_multiline(input)?,
                ScanState::FinalLine => self.scan_final_line(input)?,
                ScanState::Done => 0,
            };
        }

        if self.state == ScanState::Done {
            self.truncated = false;
            return Ok(Feed::Done {
                reply: self.reply(),
                consumed: pos,
            });
        }

        self.truncated = fragment.last().is_some_and(|&b| b != b'\n');
        Ok(Feed::NeedMore)
    }

    fn scan_first_line(&mut self, input: &[u8]) -> Result<usize, ReplyError> {
        let Some(end) = memchr::memchr(b'\n', input) else {
            self.line.extend(input);
            return Ok(input.len());
        };
        self.line.extend(&input[..=end]);

        let content = self.line.content();
        if content.is_empty() {
            // stray blank line between replies
            self.line.clear();
            return Ok(end + 1);
        }
        let code = parse_code(content)?;
        let separator = content.get(3).copied();
        self.code = code;

        match separator {
            None | Some(b' ') => self.state = ScanState::Done,
            Some(b'-') => {
                self.multiline = true;
                self.marker = EndMarker::opened(code);
                self.line.clear();
                self.state = ScanState::MultilineAccumulating;
            }
            Some(_) => return Err(ReplyError::InvalidLineFormat),
        }
        Ok(end + 1)
    }

    fn scan_multiline(&mut self, input: &[u8]) -> Result<usize, ReplyError> {
        let mut pos = 0;
        while pos < input.len() {
            if self.marker.matched == 0 {
                match memchr::memchr2(b'\r', b'\n', &input[pos..]) {
                    Some(offset) => pos += offset,
                    None => return Ok(input.len()),
                }
            }
            let b = input[pos];
            pos += 1;
            if self.marker.advance(b) {
                self.line.clear();
                self.line.extend(&self.code);
                self.line.extend(b" ");
                self.state = ScanState::FinalLine;
                return Ok(pos);
            }
        }
        Ok(input.len())
    }

    fn scan_final_line(&mut self, input: &[u8]) -> Result<usize, ReplyError> {
        match memchr::memchr(b'\n', input) {
            Some(end) => {
                self.line.extend(&input[..=end]);
                self.state = ScanState::Done;
                Ok(end + 1)
            }
            None => {
                self.line.extend(input);
                Ok(input.len())
            }
        }
    }

    fn reply(&self) -> Reply {
        let code = self
            .code
            .iter()
            .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
        if self.line.overflowed {
            debug!("reply line cut to {} bytes", self.line.capacity);
        }
        let line = String::from_utf8_lossy(self.line.content()).into_owned();
        Reply::new(code, line)
    }
}

fn parse_code(line: &[u8]) -> Result<[u8; 3], ReplyError> {
    match line.get(..3) {
        Some(&[a, b, c]) if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() => {
            if (b'1'..=b'5').contains(&a) {
                Ok([a, b, c])
            } else {
                let value = [a, b, c]
                    .iter()
                    .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
                Err(ReplyError::InvalidReplyCode(value))
            }
        }
        _ => Err(ReplyError::InvalidLineFormat),
    }
}

/// Receives replies from a control connection.
///
/// Owns the fixed-capacity receive buffer. Bytes that follow a completed
/// reply in the same receive are a secondary reply and are scanned before the
/// next receive.
pub struct ReplyReader {
    buf: Box<[u8]>,
    secondary: Range<usize>,
}

impl ReplyReader {
    pub fn new(capacity: usize) -> Self {
        ReplyReader {
            buf: vec![0u8; capacity].into_boxed_slice(),
            secondary: 0..0,
        }
    }

    pub fn has_secondary(&self) -> bool {
        !self.secondary.is_empty()
    }

    /// Waits for one complete reply.
    ///
    /// The receive timeout is set to the control receive timeout for the
    /// duration of the call and reset to infinite on every exit path.
    pub fn await_reply<T: Transport + ?Sized>(
        &mut self,
        conn: &mut T,
        config: &FtpcConfig,
    ) -> Result<Reply, ReplyError> {
        let mut conn = scopeguard::guard(conn, |conn| {
            if let Err(e) = conn.set_read_timeout(None) {
                debug!("unable to reset receive timeout: {}", e);
            }
        });
        conn.set_read_timeout(config.ctrl_rx_timeout())
            .map_err(ReplyError::Receive)?;

        let mut acc = ReplyAccumulator::new(self.buf.len());
        if let Some(reply) = self.scan_secondary(&mut acc)? {
            return Ok(reply);
        }
        self.receive(&mut **conn, &mut acc, config)
    }

    /// Idle: buffered secondary reply bytes are consumed without a receive.
    fn scan_secondary(&mut self, acc: &mut ReplyAccumulator) -> Result<Option<Reply>, ReplyError> {
        if self.secondary.is_empty() {
            return Ok(None);
        }
        let pending = std::mem::replace(&mut self.secondary, 0..0);
        let fragment = self.buf.get(pending.clone()).unwrap_or(&[]);
        debug!("scanning {} buffered bytes of a secondary reply", fragment.len());

        match acc.feed(fragment)? {
            Feed::Done { reply, consumed } => {
                self.secondary = pending.start + consumed..pending.end;
                Ok(Some(reply))
            }
            Feed::NeedMore => Ok(None),
        }
    }

    /// Receiving: loops until the accumulator completes a reply.
    fn receive<T: Transport + ?Sized>(
        &mut self,
        conn: &mut T,
        acc: &mut ReplyAccumulator,
        config: &FtpcConfig,
    ) -> Result<Reply, ReplyError> {
        let max_len = config.ctrl_rx_max_reply_len;
        let mut total = 0usize;
        let mut attempts = 0u32;

        loop {
            if total >= max_len {
                warn!("reply exceeds {} bytes, closing receive side", max_len);
                if let Err(e) = conn.shutdown_read() {
                    debug!("shutdown of receive side failed: {}", e);
                }
                return Err(ReplyError::TooLong(max_len));
            }

            let n = match conn.recv(&mut self.buf) {
                Ok(0) => return Err(ReplyError::ConnectionClosed),
                Ok(n) => n,
                Err(e) => match classify(&e) {
                    ErrorClass::Transient => {
                        attempts += 1;
                        if attempts >= config.ctrl_rx_max_retry {
                            return Err(ReplyError::TimedOut(attempts));
                        }
                        debug!(
                            "receive attempt {}/{} failed: {}",
                            attempts, config.ctrl_rx_max_retry, e
                        );
                        thread::sleep(config.ctrl_rx_retry_delay());
                        continue;
                    }
                    ErrorClass::Fatal => return Err(ReplyError::Receive(e)),
                },
            };
            attempts = 0;
            total = total.saturating_add(n);

            let fragment = self.buf.get(..n).ok_or_else(|| {
                ReplyError::Receive(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "receive overran buffer",
                ))
            })?;
            match acc.feed(fragment)? {
                Feed::Done { reply, consumed } => {
                    self.secondary = consumed..n;
                    return Ok(reply);
                }
                Feed::NeedMore => {
                    debug!(
                        "reply incomplete after {} bytes (truncated: {})",
                        total,
                        acc.is_truncated()
                    );
                }
            }
        }
    }
}
