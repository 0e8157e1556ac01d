use std::path::PathBuf;
use std::process::exit;

use tracing::Level;

use burrow::config::load_config;

fn usage() {
    eprintln!(
        "usage: burrow-server [-c|--config FILE] [-v|--verbose] [-l|--logfile FILE] [-h|--help]"
    );
}

fn main() {
    let mut config_file = None;
    let mut log_file: Option<PathBuf> = None;
    let mut verbose = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => match args.next() {
                Some(path) => config_file = Some(PathBuf::from(path)),
                None => {
                    usage();
                    exit(2);
                }
            },
            "-l" | "--logfile" => match args.next() {
                Some(path) => log_file = Some(PathBuf::from(path)),
                None => {
                    usage();
                    exit(2);
                }
            },
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                usage();
                exit(0);
            }
            _ => {
                usage();
                exit(2);
            }
        }
    }

    let max_level = if verbose { Level::DEBUG } else { Level::INFO };
    match &log_file {
        Some(path) => {
            if let Err(e) = burrow::init_tracing_to_file(max_level, path) {
                eprintln!("cannot open log file: {}", e);
                exit(2);
            }
        }
        None => burrow::init_tracing(max_level),
    }

    let settings = match load_config(config_file) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("cannot load config file: {}", e);
            exit(2);
        }
    };
    let config = match &settings.server {
        Some(config) => config,
        None => {
            eprintln!("cannot find server config");
            exit(1);
        }
    };

    let tokio = burrow::init_runtime().expect("could not create tokio runtime");
    if let Err(e) = tokio.block_on(burrow::run_server(config)) {
        eprintln!("{}", e);
        exit(1);
    }
}
