use std::error::Error;

use log::LevelFilter;
use simple_logger::SimpleLogger;

/// Maps the number of `-v` flags to the log level.
fn level(verbosity: usize) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the global logger.
///
/// Only this crate logs at the chosen level, dependencies stay at `warn`.
pub fn init(verbosity: usize) -> Result<(), Box<dyn Error>> {
    SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .with_module_level("volley", level(verbosity))
        .with_utc_timestamps()
        .init()?;

    Ok(())
}
