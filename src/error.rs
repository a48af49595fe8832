//! Errors returned by session operations.

use std::io;

use thiserror::Error;

use crate::protocol::{CommandError, FtpCommand, PassiveReplyError, ReplyError};
use crate::transmit::TransmitError;

/// Coarse failure category of an [`FtpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FtpcErrorKind {
    ConnectFailure,
    CommandSendFailure,
    ReplyReceiveFailure,
    UnexpectedReplyCode,
    NotLoggedIn,
    FileNotFoundRemote,
    LocalStorageOpenFailure,
    LocalStorageIo,
    BufferTooSmall,
    TransferIncomplete,
    SecureChannelUnavailable,
    GenericFault,
}

#[derive(Debug, Error)]
pub enum FtpcError {
    #[error("unable to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("secure channel to {target} unavailable: {reason}")]
    SecureChannel { target: String, reason: String },
    #[error("unable to compose {0} command: {1}")]
    CommandCompose(FtpCommand, #[source] CommandError),
    #[error("unable to send {0} command: {1}")]
    CommandSend(FtpCommand, #[source] TransmitError),
    #[error("no valid reply to {0}: {1}")]
    ReplyReceive(FtpCommand, #[source] ReplyError),
    #[error("unparseable {0} reply: {1}")]
    InvalidPassiveReply(FtpCommand, #[source] PassiveReplyError),
    #[error("unparseable SIZE reply {0:?}")]
    InvalidSizeReply(String),
    #[error("unexpected reply to {command}: {line}")]
    UnexpectedReply { command: FtpCommand, line: String },
    #[error("login rejected: {0}")]
    NotLoggedIn(String),
    #[error("remote file {0} not found")]
    FileNotFoundRemote(String),
    #[error("unable to open local file {name}: {source}")]
    LocalStorageOpen {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("local file i/o failed: {0}")]
    LocalStorageIo(#[source] io::Error),
    #[error("remote file has {size} bytes but the buffer holds {capacity}")]
    BufferTooSmall { size: u64, capacity: usize },
    #[error("transfer incomplete: {received} of {expected} bytes")]
    TransferIncomplete { expected: u64, received: u64 },
    #[error("data connection failed: {0}")]
    DataReceive(#[source] io::Error),
    #[error("data connection send failed: {0}")]
    DataSend(#[source] TransmitError),
    #[error("session not connected")]
    NotConnected,
}

impl FtpcError {
    pub fn kind(&self) -> FtpcErrorKind {
        match self {
            FtpcError::Connect { .. } => FtpcErrorKind::ConnectFailure,
            FtpcError::SecureChannel { .. } => FtpcErrorKind::SecureChannelUnavailable,
            FtpcError::CommandCompose(..) | FtpcError::CommandSend(..) => {
                FtpcErrorKind::CommandSendFailure
            }
            FtpcError::ReplyReceive(..)
            | FtpcError::InvalidPassiveReply(..)
            | FtpcError::InvalidSizeReply(_) => FtpcErrorKind::ReplyReceiveFailure,
            FtpcError::UnexpectedReply { .. } => FtpcErrorKind::UnexpectedReplyCode,
            FtpcError::NotLoggedIn(_) => FtpcErrorKind::NotLoggedIn,
            FtpcError::FileNotFoundRemote(_) => FtpcErrorKind::FileNotFoundRemote,
            FtpcError::LocalStorageOpen { .. } => FtpcErrorKind::LocalStorageOpenFailure,
            FtpcError::LocalStorageIo(_) => FtpcErrorKind::LocalStorageIo,
            FtpcError::BufferTooSmall { .. } => FtpcErrorKind::BufferTooSmall,
            FtpcError::TransferIncomplete { .. } => FtpcErrorKind::TransferIncomplete,
            FtpcError::DataReceive(_) | FtpcError::DataSend(_) | FtpcError::NotConnected => {
                FtpcErrorKind::GenericFault
            }
        }
    }
}
