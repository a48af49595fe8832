use std::fmt;

macro_rules! reply_codes {
    ($(($variant:ident, $code:literal)),+ $(,)?) => {
        /// Reply codes the client acts upon. Anything else is kept verbatim.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ReplyCode {
            $($variant,)+
            Other(u16),
        }

        impl ReplyCode {
            pub fn from_u16(code: u16) -> Self {
                match code {
                    $($code => ReplyCode::$variant,)+
                    n => ReplyCode::Other(n),
                }
            }

            pub fn as_u16(&self) -> u16 {
                match self {
                    $(ReplyCode::$variant => $code,)+
                    ReplyCode::Other(n) => *n,
                }
            }
        }
    };
}

reply_codes! {
    (AlreadyOpen, 125),
    (OkayOpening, 150),
    (Okay, 200),
    (SystemStatus, 211),
    (FileStatus, 213),
    (HelpMessage, 214),
    (SystemType, 215),
    (ServiceReady, 220),
    (ServiceClosing, 221),
    (ClosingDataConnection, 226),
    (EnterPassiveMode, 227),
    (EnterExtendedPassiveMode, 229),
    (LoggedIn, 230),
    (ActionComplete, 250),
    (PathCreated, 257),
    (NeedPassword, 331),
    (PendingFurtherInfo, 350),
    (ServiceNotAvailable, 421),
    (CantOpenDataConnection, 425),
    (TransferAborted, 426),
    (SyntaxErrorInParameters, 501),
    (CommandNotImplemented, 502),
    (BadCommandSequence, 503),
    (ParameterNotImplemented, 504),
    (NotLoggedIn, 530),
    (FileUnavailable, 550),
    (PageTypeUnknown, 551),
    (StorageExceeded, 552),
    (FileNameNotAllowed, 553),
}

impl ReplyCode {
    /// Positive preliminary (1yz) replies.
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.as_u16())
    }

    /// Transient or permanent negative (4yz, 5yz) replies.
    pub fn is_negative(&self) -> bool {
        self.as_u16() >= 400
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A completed reply: its code plus the terminating line without CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: ReplyCode,
    line: String,
}

impl Reply {
    pub(crate) fn new(code: u16, line: String) -> Self {
        Reply {
            code: ReplyCode::from_u16(code),
            line,
        }
    }

    pub fn code(&self) -> ReplyCode {
        self.code
    }

    pub fn raw_code(&self) -> u16 {
        self.code.as_u16()
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    /// The text after the code and its separator.
    pub fn text(&self) -> &str {
        self.line.get(4..).unwrap_or("")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}
