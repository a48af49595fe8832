use secrecy::SecretString;
use std::env;
use std::process;

/// Environment variable holding the login password.
pub const PASSWORD_ENV: &str = "FTPC_PASSWORD";

/// Transfer requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Download remote to local
    Get,
    /// Upload local to remote, replacing it
    Put,
    /// Upload local to remote, appending to it
    Append,
}

/// Options for one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub log_file: Option<String>,
    pub config_file: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub secure: bool,
    pub insecure_skip_verify: bool,
    /// Control connect timeout override in seconds
    pub connect_timeout: Option<u64>,
    /// Log data chunks and retries as well
    pub debug: bool,
    pub direction: Direction,
    pub remote: String,
    pub local: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Help,
    Version,
    Run(CliArgs),
}

/// Prints usage instructions for the program.
pub fn print_usage() {
    println!(
        "Usage: {} [-h] [-v] [-D] [-l logfile] [-c config.json] [-p port] [-u user] [-t connect_timeout] [-s] [--insecure-skip-verify] host get|put|append remote local",
        crate::PROGRAM_NAME
    );
    println!("The password is read from {}.", PASSWORD_ENV);
}

fn next_value<I: Iterator<Item = String>>(args: &mut I, what: &str) -> Result<String, String> {
    args.next()
        .ok_or_else(|| format!("Missing {} argument", what))
}

/// Parses command line arguments, without the program name
///
/// # Errors
/// A message describing the first invalid or missing argument.
///
/// # Example
/// ```text
/// // parse_args_from(["-s", "ftp.example.com", "get", "a.bin", "/tmp/a.bin"])
/// ```
pub fn parse_args_from<I>(args: I) -> Result<CliCommand, String>
where
    I: IntoIterator<Item = String>,
{
    let mut log_file = None;
    let mut config_file = None;
    let mut port = 21;
    let mut user = "anonymous".to_string();
    let mut secure = false;
    let mut insecure_skip_verify = false;
    let mut connect_timeout = None;
    let mut debug = false;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" => return Ok(CliCommand::Help),
            "-v" => return Ok(CliCommand::Version),
            "-D" => debug = true,
            "-l" => log_file = Some(next_value(&mut args, "log file")?),
            "-c" => config_file = Some(next_value(&mut args, "config file")?),
            "-u" => user = next_value(&mut args, "user")?,
            "-p" => {
                let value = next_value(&mut args, "port")?;
                port = match value.parse::<u16>() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(format!("Port must be between 1 and 65535, got {}", value)),
                };
            }
            "-t" => {
                let value = next_value(&mut args, "connect timeout")?;
                connect_timeout = match value.parse::<u64>() {
                    Ok(n) if n > 0 => Some(n),
                    _ => return Err("Connect timeout must be a positive number".to_string()),
                };
            }
            "-s" => secure = true,
            "--insecure-skip-verify" => insecure_skip_verify = true,
            _ if arg.starts_with('-') && arg.len() > 1 => {
                return Err(format!("Unexpected argument: {}", arg));
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let (Some(host), Some(direction), Some(remote), Some(local), None) = (
        positional.next(),
        positional.next(),
        positional.next(),
        positional.next(),
        positional.next(),
    ) else {
        return Err("Expected exactly: host get|put|append remote local".to_string());
    };

    let direction = match direction.as_str() {
        "get" => Direction::Get,
        "put" => Direction::Put,
        "append" => Direction::Append,
        other => return Err(format!("Unknown direction: {}", other)),
    };

    if insecure_skip_verify && !secure {
        return Err("--insecure-skip-verify requires -s".to_string());
    }

    Ok(CliCommand::Run(CliArgs {
        log_file,
        config_file,
        host,
        port,
        user,
        secure,
        insecure_skip_verify,
        connect_timeout,
        debug,
        direction,
        remote,
        local,
    }))
}

/// Parses the process arguments, exiting on `-h`, `-v` or bad input
pub fn parse_args() -> CliArgs {
    match parse_args_from(env::args().skip(1)) {
        Ok(CliCommand::Run(args)) => args,
        Ok(CliCommand::Help) => {
            print_usage();
            process::exit(0);
        }
        Ok(CliCommand::Version) => {
            println!("{} version {}", crate::PROGRAM_NAME, crate::PROGRAM_VERSION);
            process::exit(0);
        }
        Err(message) => {
            eprintln!("Error: {}", message);
            print_usage();
            process::exit(1);
        }
    }
}

/// Password from the environment, or the conventional anonymous one
pub fn password_from_env() -> SecretString {
    SecretString::new(env::var(PASSWORD_ENV).unwrap_or_else(|_| "anonymous@".to_string()))
}
