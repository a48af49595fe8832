//! Blocking FTP/FTPS client engine
//!
//! A control session logs in over plain TCP or TLS, negotiates a passive
//! data channel per transfer and moves files between the server and either
//! memory buffers or local storage. Replies are parsed incrementally so
//! fragmented and multi-line server output is handled the same way as
//! single-packet replies.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod transfer;
pub mod transmit;
pub mod transport;

pub use cli::parse_args;
pub use config::{load_config, FtpcConfig};
pub use error::{FtpcError, FtpcErrorKind};
pub use logging::set_log_file;
pub use session::{Credentials, Session};
pub use storage::{LocalStorage, Storage};
pub use transport::tcp::{TcpConnector, TcpTransport};
pub use transport::tls::SecureConfig;

/// Name of the program, used in usage and version output
pub const PROGRAM_NAME: &str = "ftpc";

/// Current version of the program (from Cargo.toml)
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");
