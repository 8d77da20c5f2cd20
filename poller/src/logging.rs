use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use common::TASK_ERROR_LOG_TARGET;
use std::str::FromStr;

/// Installs the global logger. Server-reported task errors go to their own
/// sink; everything else goes to the main one.
pub fn setup_logging(config: &LoggingConfig, verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => log::LevelFilter::from_str(&config.level)
            .with_context(|| format!("Invalid log level: {}", config.level))?,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let base_config = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .level_for("reqwest", log::LevelFilter::Warn)
        .level_for("hyper", log::LevelFilter::Warn);

    // Main log: filter OUT task errors
    let mut main_log = fern::Dispatch::new()
        .filter(|metadata| metadata.target() != TASK_ERROR_LOG_TARGET);
    main_log = match &config.output {
        Some(path) => main_log.chain(fern::log_file(path)?),
        None => main_log.chain(std::io::stderr()),
    };

    // Task error log: filter IN task errors
    let mut task_log = fern::Dispatch::new()
        .filter(|metadata| metadata.target() == TASK_ERROR_LOG_TARGET);
    task_log = match &config.task_errors {
        Some(path) => task_log.chain(fern::log_file(path)?),
        None => task_log.chain(std::io::stderr()),
    };

    base_config
        .chain(main_log)
        .chain(task_log)
        .apply()?;

    Ok(())
}
