#![deny(missing_docs)]
//! Logging facade shared by the map job crates.
//!
//! Library crates only ever call the `job_*` macros; the binary decides where
//! records go. Tests log to stderr through
//! [`initialize_for_tests`].

use log::LevelFilter;

#[doc(hidden)]
pub use log as __log;

#[doc(hidden)]
#[macro_export]
macro_rules! __job_log {
    ($level:ident, $($arg:tt)*) => {
        $crate::__log::log!($crate::__log::Level::$level, $($arg)*)
    };
}

/// Per-frame and per-tick detail.
#[macro_export]
macro_rules! job_trace {
    ($($arg:tt)*) => { $crate::__job_log!(Trace, $($arg)*) };
}

/// Dropped events, skipped frames and other expected noise.
#[macro_export]
macro_rules! job_debug {
    ($($arg:tt)*) => { $crate::__job_log!(Debug, $($arg)*) };
}

/// Lifecycle transitions: submissions, outcomes, claims.
#[macro_export]
macro_rules! job_info {
    ($($arg:tt)*) => { $crate::__job_log!(Info, $($arg)*) };
}

/// Recoverable trouble such as storage failures or truncated streams.
#[macro_export]
macro_rules! job_warn {
    ($($arg:tt)*) => { $crate::__job_log!(Warn, $($arg)*) };
}

/// Failures the user will see.
#[macro_export]
macro_rules! job_error {
    ($($arg:tt)*) => { $crate::__job_log!(Error, $($arg)*) };
}

/// First eight characters of a job or user id, cut on a char boundary.
pub fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(idx, _)| &id[..idx])
}

/// Verbosity used by the binary and by tests.
pub fn level_for(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Terminal logger for tests. Only the first call in a process installs it.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

    let _ = TermLogger::init(
        level_for(cfg!(debug_assertions)),
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Never,
    );
}
