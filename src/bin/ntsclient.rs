//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

use ntstime::client;
use ntstime::config::{self, ClientConfig, ClientSettings};
use ntstime::logging;
use std::env;
use std::fmt;
use std::num;
use std::path::Path;
use std::process;
use tokio::io;

const ABOUT: &str = "Query and set authenticated system time using NTS/NTP.

When running, ntsclient will by default attempt to set the system time.
This requires root or CAP_SYS_TIME.

The options can also be set using environment variables. For example,
--config can be set by the environment variable NTSCLIENT_CONFIG. For
boolean flags, use the values \"true\" or \"false\".

Options given on the command line take precedence over environment
variables, and both take precedence over the configuration file.";

#[derive(Debug)]
///Enumeration of errors that will make us terminate the program
enum FatalError {
    ArgumentError(clap::Error),
    IntervalNotANumber(num::ParseIntError),
    ConfigErrors(config::ConfigError),
    LoopError(io::Error),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use FatalError::*;
        match self {
            ArgumentError(e) => e.fmt(f),
            IntervalNotANumber(e) => write!(f, "--interval wants a number of seconds: {}", e),
            ConfigErrors(e) => e.fmt(f),
            LoopError(e) => write!(f, "In polling loop: {}", e),
        }
    }
}

impl std::error::Error for FatalError {}

///Read a boolean flag from the command line or its environment
/// variable. clap only wires environment variables to value-taking
/// arguments, so the boolean ones are handled here.
fn flag(matches: &clap::ArgMatches<'_>, name: &str, var: &str) -> bool {
    matches.is_present(name) || env::var(var).map(|v| v == "true" || v == "1").unwrap_or(false)
}

fn main() {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    if let Err(e) = runtime.block_on(async_main()) {
        eprintln!("{}", e);
        process::exit(1)
    }
}

async fn async_main() -> Result<(), FatalError> {
    /* Parse the command line */
    let matches = clap::App::new("ntsclient")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(ABOUT)
        .arg(
            clap::Arg::with_name("config")
                .short("c")
                .long("config")
                .env("NTSCLIENT_CONFIG")
                .value_name("FILE")
                .help("Path to a configuration file (TOML format)"),
        )
        .arg(
            clap::Arg::with_name("server")
                .short("s")
                .long("server")
                .env("NTSCLIENT_SERVER")
                .value_name("HOST:PORT")
                .help("Ask this server about time"),
        )
        .arg(
            clap::Arg::with_name("interval")
                .short("i")
                .long("interval")
                .env("NTSCLIENT_INTERVAL")
                .value_name("SECONDS")
                .help("Interval in seconds between queries, default: 1000"),
        )
        .arg(
            clap::Arg::with_name("cacert")
                .long("cacert")
                .env("NTSCLIENT_CACERT")
                .value_name("FILE")
                .help("Verify server using CA certificate(s) in file (PEM)"),
        )
        .arg(
            clap::Arg::with_name("insecure")
                .long("insecure")
                .help("Don't verify server certificate"),
        )
        .arg(
            clap::Arg::with_name("dry-run")
                .short("n")
                .long("dry-run")
                .help("Don't actually set system time"),
        )
        .arg(
            clap::Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Turn on verbose output"),
        )
        .arg(
            clap::Arg::with_name("debug")
                .long("debug")
                .help("Turn on debug output"),
        )
        .get_matches_safe()
        .map_err(FatalError::ArgumentError)?;

    /* Parse the configuration file, if one was named */
    let file = match matches.value_of("config") {
        Some(path) => {
            config::load_client_file(Path::new(path)).map_err(FatalError::ConfigErrors)?
        }
        None => config::RawClientConfig::default(),
    };

    let interval = match matches.value_of("interval") {
        Some(text) => Some(text.parse().map_err(FatalError::IntervalNotANumber)?),
        None => None,
    };

    /* Command line and environment (already merged by clap) beat the file */
    let settings = ClientSettings {
        server: matches
            .value_of("server")
            .map(String::from)
            .or(file.server),
        cacert: matches
            .value_of("cacert")
            .map(String::from)
            .or(file.cacert),
        interval: interval.or(file.interval),
        insecure: flag(&matches, "insecure", "NTSCLIENT_INSECURE"),
        dry_run: flag(&matches, "dry-run", "NTSCLIENT_DRY_RUN"),
        verbose: flag(&matches, "verbose", "NTSCLIENT_VERBOSE"),
        debug: flag(&matches, "debug", "NTSCLIENT_DEBUG"),
    };

    let cfg = ClientConfig::cook(settings).map_err(FatalError::ConfigErrors)?;

    /* Initialize logging. Dry runs report offsets, which is the whole
    point of a dry run, so they get verbose output too. */
    logging::init_logging(logging::level_from_flags(
        cfg.verbose || cfg.dry_run,
        cfg.debug,
    ));

    client::run(&cfg).await.map_err(FatalError::LoopError)
}
