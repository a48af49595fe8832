use ftpc::cli::{self, CliArgs, Direction};
use ftpc::{
    load_config, logging, set_log_file, Credentials, FtpcConfig, FtpcError, LocalStorage,
    SecureConfig, Session, TcpConnector,
};
use log::{error, info, LevelFilter};
use std::process;
use std::sync::Arc;

fn run(args: &CliArgs) -> Result<u64, String> {
    let mut config = match &args.config_file {
        Some(path) => load_config(path).map_err(|e| e.to_string())?,
        None => FtpcConfig::default(),
    };
    if let Some(secs) = args.connect_timeout {
        config.ctrl_conn_timeout_ms = secs.saturating_mul(1000);
    }

    let secure = if args.secure {
        let secure = SecureConfig::new(None, args.insecure_skip_verify)
            .map_err(|e| format!("TLS setup failed: {}", e))?;
        Some(secure)
    } else {
        None
    };

    let credentials = Credentials::new(&args.user, cli::password_from_env());
    let mut session = Session::open(
        TcpConnector,
        &args.host,
        args.port,
        &credentials,
        Arc::new(config),
        secure,
    )
    .map_err(describe)?;

    let storage = LocalStorage::default();
    let result = match args.direction {
        Direction::Get => session.receive_to_storage(&args.remote, &storage, &args.local),
        Direction::Put => session.send_from_storage(&args.remote, &storage, &args.local, false),
        Direction::Append => session.send_from_storage(&args.remote, &storage, &args.local, true),
    };

    // QUIT failures after a finished transfer only get logged
    let bytes = result.map_err(describe)?;
    if let Err(e) = session.close() {
        error!("QUIT failed: {}", describe(e));
    }
    Ok(bytes)
}

fn describe(e: FtpcError) -> String {
    format!("{} ({:?})", e, e.kind())
}

fn main() {
    let args = cli::parse_args();
    if let Some(log_file) = &args.log_file {
        set_log_file(log_file);
    }
    let level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = logging::init(level) {
        eprintln!("Error installing logger: {}", e);
    }

    info!("{} {} starting", ftpc::PROGRAM_NAME, ftpc::PROGRAM_VERSION);
    match run(&args) {
        Ok(bytes) => {
            info!("done, {} bytes transferred", bytes);
        }
        Err(message) => {
            error!("{}", message);
            process::exit(1);
        }
    }
}
