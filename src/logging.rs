use chrono::Local;
use once_cell::sync::Lazy;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Global log file path protected by Mutex
///
/// When None, log lines go to stdout.
pub static LOG_FILE: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Logs a message with timestamp to the configured output
///
/// # Arguments
/// * `message` - The message to log
///
/// # Returns
/// * `io::Result<()>` - Ok on success, Err if writing fails
///
/// # Example
/// ```text
/// // log("Starting transfer").unwrap();
/// ```
pub fn log(message: &str) -> io::Result<()> {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let log_message = format!("{} {}\n", timestamp, message);

    // A panic while holding the lock must not silence logging for good
    let guard = LOG_FILE.lock().unwrap_or_else(|e| e.into_inner());
    match &*guard {
        Some(log_file) => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)?;
            file.write_all(log_message.as_bytes())?;
        }
        None => {
            print!("{}", log_message);
        }
    }

    Ok(())
}

/// Sets the path for the log file
///
/// Subsequent log lines are appended to this file.
pub fn set_log_file<P: AsRef<Path>>(path: P) {
    let path_str = path.as_ref().to_string_lossy().into_owned();
    *LOG_FILE.lock().unwrap_or_else(|e| e.into_inner()) = Some(path_str);
}

/// Routes `log` records to [`log()`]
struct LineLogger;

impl ::log::Log for LineLogger {
    fn enabled(&self, metadata: &::log::Metadata) -> bool {
        metadata.level() <= ::log::max_level()
    }

    fn log(&self, record: &::log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = match record.level() {
            ::log::Level::Info => record.args().to_string(),
            level => format!("{} {}", level, record.args()),
        };
        if let Err(e) = log(&message) {
            eprintln!("Error writing to log: {}", e);
        }
    }

    fn flush(&self) {}
}

static LOGGER: LineLogger = LineLogger;

/// Installs the line logger as the `log` backend
///
/// Fails if another logger was installed first.
pub fn init(level: ::log::LevelFilter) -> Result<(), ::log::SetLoggerError> {
    ::log::set_logger(&LOGGER)?;
    ::log::set_max_level(level);
    Ok(())
}
