//! FTP wire protocol: command lines, reply codes, the incremental reply
//! parser and passive-mode endpoint parsing.

pub mod command;
pub mod parser;
pub mod passive;
pub mod reply;

pub use command::{CommandError, CommandLine, FtpCommand};
pub use parser::{Feed, ReplyAccumulator, ReplyError, ReplyReader, ScanState};
pub use passive::{parse_epsv_reply, parse_pasv_reply, PassiveEndpoint, PassiveReplyError};
pub use reply::{Reply, ReplyCode};

/// Capacity of the control channel buffer, one TCP segment on a 1500 MTU link.
pub const CTRL_BUF_SIZE: usize = 1460;

/// Largest payload moved per data channel iteration.
pub const DATA_CHUNK_SIZE: usize = 1460;
