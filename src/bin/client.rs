use std::path::PathBuf;
use std::process::exit;

use tracing::Level;

use burrow::config::load_config;

fn usage() {
    eprintln!("usage: burrow-client [-c|--config FILE] [-v|--verbose] [-h|--help]");
}

fn main() {
    let mut config_file = None;
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

    burrow::init_tracing(if verbose { Level::DEBUG } else { Level::INFO });

    let settings = match load_config(config_file) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("cannot load config file: {}", e);
            exit(2);
        }
    };
    let config = match &settings.client {
        Some(config) => config,
        None => {
            eprintln!("cannot find client config");
            exit(1);
        }
    };

    let tokio = burrow::init_runtime().expect("could not create tokio runtime");
    if let Err(e) = tokio.block_on(burrow::run_client(config)) {
        eprintln!("{}", e);
        exit(1);
    }
}
