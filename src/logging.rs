//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//! Configuration for log4rs
//!
//! log4rs is a much more flexible logging framework than we need it
//! to be. Both programs log to stderr at a level picked from their
//! flags; this module hides the builder boilerplate behind that.

use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

///Pick the log level implied by the output flags.
pub fn level_from_flags(verbose: bool, debug: bool) -> log::LevelFilter {
    if debug {
        log::LevelFilter::Trace
    } else if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    }
}

///Initialize logging to stderr at the given level.
pub fn init_logging(level: log::LevelFilter) {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {l} {t} - {m}{n}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .expect("While building log config");

    log4rs::init_config(config).expect("While initializing logging");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_beats_verbose() {
        assert_eq!(level_from_flags(true, true), log::LevelFilter::Trace);
        assert_eq!(level_from_flags(false, true), log::LevelFilter::Trace);
        assert_eq!(level_from_flags(true, false), log::LevelFilter::Info);
        assert_eq!(level_from_flags(false, false), log::LevelFilter::Warn);
    }
}
