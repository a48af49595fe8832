//! Bounded-retry sender shared by command lines and data chunks.

use std::io;
use std::thread;
use std::time::Duration;

use log::debug;
use thiserror::Error;

use crate::config::FtpcConfig;
use crate::transport::{classify, ErrorClass, Transport};

#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("unable to adjust send timeout: {0}")]
    Timeout(#[source] io::Error),
    #[error("gave up after {retries} retries, {sent} of {total} bytes sent")]
    RetriesExhausted {
        sent: usize,
        total: usize,
        retries: u32,
    },
}

/// Timeout and retry settings for one [`send_all`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitPolicy {
    /// Overrides the send timeout for the call when set.
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl TransmitPolicy {
    pub fn control(config: &FtpcConfig) -> Self {
        TransmitPolicy {
            timeout: config.ctrl_tx_timeout(),
            max_retries: config.ctrl_tx_max_retry,
            retry_delay: config.ctrl_tx_retry_delay(),
        }
    }

    /// The data channel timeout is set once per transfer, not per chunk.
    pub fn data(config: &FtpcConfig) -> Self {
        TransmitPolicy {
            timeout: None,
            max_retries: config.dtp_tx_max_retry,
            retry_delay: config.dtp_tx_retry_delay(),
        }
    }
}

/// Sends all of `data`, retrying stalled or transiently failing writes.
///
/// The retry counter counts consecutive attempts that moved no bytes; any
/// progress resets it. A fatal transport error ends the call at once.
pub fn send_all<T: Transport + ?Sized>(
    conn: &mut T,
    data: &[u8],
    policy: &TransmitPolicy,
) -> Result<(), TransmitError> {
    let previous = match policy.timeout {
        Some(timeout) => {
            let previous = conn.write_timeout().map_err(TransmitError::Timeout)?;
            conn.set_write_timeout(Some(timeout))
                .map_err(TransmitError::Timeout)?;
            Some(previous)
        }
        None => None,
    };
    let mut conn = scopeguard::guard(conn, move |conn| {
        if let Some(previous) = previous {
            if let Err(e) = conn.set_write_timeout(previous) {
                debug!("unable to restore send timeout: {}", e);
            }
        }
    });

    let mut sent = 0usize;
    let mut retries = 0u32;
    while sent < data.len() && retries < policy.max_retries {
        let pending = data.get(sent..).unwrap_or_default();
        match conn.send(pending) {
            Ok(0) => {
                retries += 1;
                debug!("send moved no bytes, retry {}/{}", retries, policy.max_retries);
            }
            Ok(n) => {
                sent += n;
                retries = 0;
                continue;
            }
            Err(e) => match classify(&e) {
                ErrorClass::Transient => {
                    retries += 1;
                    debug!(
                        "transient send error ({}), retry {}/{}",
                        e, retries, policy.max_retries
                    );
                }
                ErrorClass::Fatal => return Err(TransmitError::Send(e)),
            },
        }
        if retries < policy.max_retries {
            thread::sleep(policy.retry_delay);
        }
    }

    if sent < data.len() {
        return Err(TransmitError::RetriesExhausted {
            sent,
            total: data.len(),
            retries,
        });
    }

    // Accepted bytes may still sit in the transport, e.g. as TLS records
    loop {
        match conn.flush() {
            Ok(()) => return Ok(()),
            Err(e) => match classify(&e) {
                ErrorClass::Transient => {
                    retries += 1;
                    if retries >= policy.max_retries {
                        return Err(TransmitError::RetriesExhausted {
                            sent,
                            total: data.len(),
                            retries,
                        });
                    }
                    debug!(
                        "transient flush error ({}), retry {}/{}",
                        e, retries, policy.max_retries
                    );
                    thread::sleep(policy.retry_delay);
                }
                ErrorClass::Fatal => return Err(TransmitError::Send(e)),
            },
        }
    }
}
