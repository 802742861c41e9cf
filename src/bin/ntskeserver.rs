//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

use ntstime::config::{self, ServerConfig};
use ntstime::logging;
use ntstime::server;
use std::fmt;
use std::path::Path;
use std::process;
use std::sync::Arc;
use tokio::io;
use tokio::net::TcpListener;

#[macro_use]
extern crate log;

#[derive(Debug)]
///Enumeration of errors that will make us terminate the program
enum FatalError {
    ArgumentError(clap::Error),
    ConfigErrors(config::ConfigError),
    TcpBindError(io::Error),
    ServeError(io::Error),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use FatalError::*;
        match self {
            ArgumentError(e) => e.fmt(f),
            ConfigErrors(e) => e.fmt(f),
            TcpBindError(e) => write!(f, "Binding NTS-KE server socket: {}", e),
            ServeError(e) => write!(f, "Serving NTS-KE: {}", e),
        }
    }
}

impl std::error::Error for FatalError {}

fn main() {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    if let Err(e) = runtime.block_on(async_main()) {
        eprintln!("{}", e);
        process::exit(1)
    }
}

async fn async_main() -> Result<(), FatalError> {
    /* Parse the command line */
    let matches = clap::App::new("ntskeserver")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Issue NTS cookies to clients over NTS-KE")
        .arg(
            clap::Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .default_value("./ntskeserver.toml")
                .help("Path to configuration file"),
        )
        .arg(
            clap::Arg::with_name("debug")
                .long("debug")
                .help("Be more verbose"),
        )
        .get_matches_safe()
        .map_err(FatalError::ArgumentError)?;

    /* Parse the configuration file */
    let cfg_path = Path::new(matches.value_of("config").unwrap());
    let cfg = ServerConfig::load(cfg_path).map_err(FatalError::ConfigErrors)?;

    /* Initialize logging */
    logging::init_logging(logging::level_from_flags(true, matches.is_present("debug")));

    /* Bind the server socket and serve forever */
    let listener = TcpListener::bind(&cfg.listen)
        .await
        .map_err(FatalError::TcpBindError)?;
    info!("server: listening on {}", cfg.listen);

    server::serve(listener, cfg.tls_acceptor.clone(), Arc::new(cfg.context))
        .await
        .map_err(FatalError::ServeError)
}
