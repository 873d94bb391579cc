use std::env;
use crate::app::{run_application, Args};
use crate::error::AppRunError;

pub mod app;
pub mod config;
pub mod device;
pub mod entities;
pub mod error;

pub use crate::config::types::ScaleConfig;
pub use crate::device::Scale;

pub fn init_logging(level: log::LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // btleplug logs every notification at debug
        .level_for("btleplug", log::LevelFilter::Info)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        match fern::log_file(&log_file) {
            Ok(file) => dispatch = dispatch.chain(file),
            Err(err) => eprintln!("Failed to open LOG_FILE {}: {}", log_file, err),
        }
    }

    if let Err(err) = dispatch.apply() {
        eprintln!("Failed to initialize logger: {}", err);
    }
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    run_application(args)?;
    Ok(())
}
