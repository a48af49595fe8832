use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind};
use std::time::Duration;

use crate::protocol::CTRL_BUF_SIZE;

/// Timeouts, retry counts and limits for one session
///
/// Every duration is in milliseconds; a zero timeout means "block forever".
/// Missing JSON fields take the compiled-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FtpcConfig {
    /// Control connection connect timeout
    pub ctrl_conn_timeout_ms: u64,
    /// Control connection receive timeout, per receive attempt
    pub ctrl_rx_timeout_ms: u64,
    /// Control connection send timeout
    pub ctrl_tx_timeout_ms: u64,
    /// Pause between receive attempts after a transient error
    pub ctrl_rx_retry_delay_ms: u64,
    /// Consecutive transient receive errors tolerated while awaiting a reply
    pub ctrl_rx_max_retry: u32,
    /// Upper bound on bytes received while awaiting one reply
    pub ctrl_rx_max_reply_len: usize,
    /// Consecutive failed sends tolerated for one command line
    pub ctrl_tx_max_retry: u32,
    pub ctrl_tx_retry_delay_ms: u64,
    /// Data connection connect timeout
    pub dtp_conn_timeout_ms: u64,
    /// Data connection receive timeout; expiry ends a download
    pub dtp_rx_timeout_ms: u64,
    pub dtp_tx_timeout_ms: u64,
    pub dtp_tx_max_retry: u32,
    pub dtp_tx_retry_delay_ms: u64,
}

impl Default for FtpcConfig {
    fn default() -> Self {
        FtpcConfig {
            ctrl_conn_timeout_ms: 5000,
            ctrl_rx_timeout_ms: 5000,
            ctrl_tx_timeout_ms: 5000,
            ctrl_rx_retry_delay_ms: 100,
            ctrl_rx_max_retry: 3,
            ctrl_rx_max_reply_len: 9196,
            ctrl_tx_max_retry: 3,
            ctrl_tx_retry_delay_ms: 100,
            dtp_conn_timeout_ms: 5000,
            dtp_rx_timeout_ms: 5000,
            dtp_tx_timeout_ms: 5000,
            dtp_tx_max_retry: 3,
            dtp_tx_retry_delay_ms: 100,
        }
    }
}

fn timeout(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl FtpcConfig {
    pub fn ctrl_conn_timeout(&self) -> Option<Duration> {
        timeout(self.ctrl_conn_timeout_ms)
    }

    pub fn ctrl_rx_timeout(&self) -> Option<Duration> {
        timeout(self.ctrl_rx_timeout_ms)
    }

    pub fn ctrl_tx_timeout(&self) -> Option<Duration> {
        timeout(self.ctrl_tx_timeout_ms)
    }

    pub fn ctrl_rx_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ctrl_rx_retry_delay_ms)
    }

    pub fn ctrl_tx_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ctrl_tx_retry_delay_ms)
    }

    pub fn dtp_conn_timeout(&self) -> Option<Duration> {
        timeout(self.dtp_conn_timeout_ms)
    }

    pub fn dtp_rx_timeout(&self) -> Option<Duration> {
        timeout(self.dtp_rx_timeout_ms)
    }

    pub fn dtp_tx_timeout(&self) -> Option<Duration> {
        timeout(self.dtp_tx_timeout_ms)
    }

    pub fn dtp_tx_retry_delay(&self) -> Duration {
        Duration::from_millis(self.dtp_tx_retry_delay_ms)
    }

    /// Checks the limits the engine relies on
    pub fn validate(&self) -> Result<(), String> {
        if self.ctrl_rx_max_retry == 0 {
            return Err("ctrl_rx_max_retry must be at least 1".to_string());
        }
        if self.ctrl_tx_max_retry == 0 {
            return Err("ctrl_tx_max_retry must be at least 1".to_string());
        }
        if self.dtp_tx_max_retry == 0 {
            return Err("dtp_tx_max_retry must be at least 1".to_string());
        }
        if self.ctrl_rx_max_reply_len < CTRL_BUF_SIZE {
            return Err(format!(
                "ctrl_rx_max_reply_len must be at least {} bytes",
                CTRL_BUF_SIZE
            ));
        }
        Ok(())
    }
}

/// Loads a session configuration from a JSON file
///
/// Lines whose first non-blank character is `#` are comments and are dropped
/// before the remaining text is parsed as a single JSON object.
///
/// # Errors
/// - File not found or unreadable
/// - Invalid JSON or unknown field
/// - Limits rejected by [`FtpcConfig::validate`]
///
/// # Example
/// ```text
/// # tighter control timeouts for a LAN server
/// { "ctrl_rx_timeout_ms": 1000, "dtp_tx_max_retry": 5 }
/// ```
pub fn load_config(filename: &str) -> Result<FtpcConfig, Error> {
    let file = File::open(filename)?;
    let reader = BufReader::new(file);

    let mut json = String::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim_start().starts_with('#') {
            // Keep line numbers in serde errors aligned with the file
            json.push('\n');
            continue;
        }
        json.push_str(&line);
        json.push('\n');
    }

    let config: FtpcConfig = serde_json::from_str(&json).map_err(|e| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("invalid config {}: {}", filename, e),
        )
    })?;

    config.validate().map_err(|e| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("invalid config {}: {}", filename, e),
        )
    })?;

    Ok(config)
}

/// Defaults without retry pauses, so unit tests never sleep.
#[cfg(test)]
pub(crate) fn test_config() -> FtpcConfig {
    FtpcConfig {
        ctrl_rx_retry_delay_ms: 0,
        ctrl_tx_retry_delay_ms: 0,
        dtp_tx_retry_delay_ms: 0,
        ..FtpcConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = FtpcConfig::default();
        assert_eq!(config.ctrl_rx_max_reply_len, 9196);
        assert_eq!(config.ctrl_rx_timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(config.dtp_tx_retry_delay(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_blocks_forever() {
        let config = FtpcConfig {
            dtp_rx_timeout_ms: 0,
            ..FtpcConfig::default()
        };
        assert_eq!(config.dtp_rx_timeout(), None);
    }

    #[test]
    fn test_load_config_with_comments() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# LAN profile").unwrap();
        writeln!(file, "{{").unwrap();
        writeln!(file, "  \"ctrl_rx_timeout_ms\": 1000,").unwrap();
        writeln!(file, "    # comment inside the object").unwrap();
        writeln!(file, "  \"dtp_tx_max_retry\": 5").unwrap();
        writeln!(file, "}}").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.ctrl_rx_timeout_ms, 1000);
        assert_eq!(config.dtp_tx_max_retry, 5);
        assert_eq!(config.ctrl_tx_max_retry, 3);
    }

    #[test]
    fn test_load_config_unknown_field() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"ctrl_rx_timeout\": 1000}}").unwrap();

        let err = load_config(file.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_load_config_rejects_small_reply_limit() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"ctrl_rx_max_reply_len\": 100}}").unwrap();

        let err = load_config(file.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("ctrl_rx_max_reply_len"));
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/ftpc.json").is_err());
    }
}
