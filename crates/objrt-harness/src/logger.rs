//! Log output for the harness binary.

use log::LevelFilter;

/// Level for a `-v` count: warnings by default, then info, debug, trace.
#[must_use]
pub const fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Builder for the harness logger: `level` for everything, `RUST_LOG`
/// overrides, plain lines on stderr.
#[must_use]
pub fn builder(level: LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None);
    builder
}

/// Install the logger. Fails if a logger is already installed.
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    builder(level).try_init()
}
