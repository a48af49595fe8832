use std::fmt;

use thiserror::Error;

use super::CTRL_BUF_SIZE;

/// A command verb understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FtpCommand(&'static str);

macro_rules! ftp_commands {
    ($($name:ident),+ $(,)?) => {
        impl FtpCommand {
            $(pub const $name: FtpCommand = FtpCommand(stringify!($name));)+
        }
    };
}

ftp_commands! {
    NOOP, QUIT, USER, PASS, TYPE, SIZE, PASV, EPSV, RETR, STOR, APPE, REST, PBSZ, PROT,
}

impl FtpCommand {
    /// Pseudo command naming the unsolicited greeting wait.
    pub const GREETING: FtpCommand = FtpCommand("<greeting>");

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Composes the CRLF terminated line for this verb.
    ///
    /// The line never exceeds the control buffer capacity and the argument
    /// may not smuggle a second command through CR or LF.
    pub fn line(self, arg: Option<&str>) -> Result<CommandLine, CommandError> {
        let arg_len = arg.map(|a| a.len() + 1).unwrap_or(0);
        let len = self.0.len() + arg_len + 2;
        if len > CTRL_BUF_SIZE {
            return Err(CommandError::LineTooLong {
                len,
                capacity: CTRL_BUF_SIZE,
            });
        }

        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(self.0.as_bytes());
        if let Some(arg) = arg {
            if arg.bytes().any(|b| b == b'\r' || b == b'\n') {
                return Err(CommandError::InvalidArgument);
            }
            buf.push(b' ');
            buf.extend_from_slice(arg.as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        Ok(CommandLine { command: self, buf })
    }
}

impl fmt::Display for FtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("command line of {len} bytes exceeds capacity {capacity}")]
    LineTooLong { len: usize, capacity: usize },
    #[error("argument contains a line terminator")]
    InvalidArgument,
}

/// A composed command line ready for the transmitter.
pub struct CommandLine {
    command: FtpCommand,
    buf: Vec<u8>,
}

impl CommandLine {
    pub fn command(&self) -> FtpCommand {
        self.command
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

// Display is what ends up in the log, so the password never does.
impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.command == FtpCommand::PASS {
            return f.write_str("PASS ****");
        }
        let text = String::from_utf8_lossy(&self.buf);
        f.write_str(text.trim_end_matches(['\r', '\n']))
    }
}

impl fmt::Debug for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandLine({})", self)
    }
}
