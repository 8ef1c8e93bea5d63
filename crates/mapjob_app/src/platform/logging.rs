//! Where the binary's log records go.
//!
//! The file is the default so the in-place progress line is not interleaved
//! with log output.

use std::fs::{File, OpenOptions};

use clap::ValueEnum;
use mapjob_logging::level_for;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};

const LOG_FILE: &str = "mapjob.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogDestination {
    /// Append to mapjob.log in the working directory
    #[default]
    File,
    /// Log to stderr
    Terminal,
    Both,
}

impl LogDestination {
    fn to_terminal(self) -> bool {
        matches!(self, Self::Terminal | Self::Both)
    }

    fn to_file(self) -> bool {
        matches!(self, Self::File | Self::Both)
    }
}

pub fn initialize(destination: LogDestination, verbose: bool) {
    let level = level_for(verbose);
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::with_capacity(2);
    if destination.to_terminal() {
        loggers.push(TermLogger::new(
            level,
            config.clone(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));
    }
    if destination.to_file() {
        match open_log_file() {
            Ok(file) => loggers.push(WriteLogger::new(level, config, file)),
            Err(err) => eprintln!("mapjob: cannot open {LOG_FILE}: {err}"),
        }
    }
    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }
}

fn open_log_file() -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(LOG_FILE)
}
