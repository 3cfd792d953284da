//! Gibson - An In-Memory Key/Value Cache Server
//!
//! This is the main entry point for the Gibson server. It parses the
//! command line, loads the configuration file, sets up logging, and drives
//! the server on a single-threaded runtime.

use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use gibson::config::Config;
use gibson::server::Server;

/// Parsed command-line options
struct Options {
    /// Configuration file to load, if any
    config: Option<PathBuf>,
}

impl Options {
    /// Parse options from the command line
    fn from_args() -> Self {
        let mut options = Options { config: None };
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    if i + 1 < args.len() {
                        options.config = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    } else {
                        eprintln!("Error: --config requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" | "-h" => {
                    print_help(&args[0]);
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("Gibson cache server v{}", gibson::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help(&args[0]);
                    std::process::exit(1);
                }
            }
        }

        options
    }
}

fn print_help(program: &str) {
    println!(
        r#"
Gibson cache server v{}

USAGE:
    {} [-h|--help] [-c|--config FILE]

OPTIONS:
    -h, --help           Print this help and exit
    -c, --config FILE    Set configuration file to load
    -v, --version        Print version information

With no configuration file the server listens on {}:{} with the
built-in defaults. Recognized configuration keys include unix_socket,
address, port, max_idletime, max_clients, max_request_size,
max_response_size, max_key_size, max_value_size, max_memory,
max_item_ttl, compression, cron_period, gc_ratio and loglevel.
"#,
        gibson::VERSION,
        program,
        gibson::DEFAULT_HOST,
        gibson::DEFAULT_PORT,
    );
}

fn log_level(name: &str) -> Level {
    match name {
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn main() -> anyhow::Result<()> {
    let options = Options::from_args();

    let config = match &options.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    FmtSubscriber::builder()
        .with_max_level(log_level(&config.loglevel))
        .with_target(false)
        .init();

    info!("Gibson cache server v{}", gibson::VERSION);

    // everything runs on one thread: connection tasks, the cron, the store
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    let server = Server::new(config);
    local.block_on(&runtime, server.run())?;

    Ok(())
}
