use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;
use std::path::Path;

const LOG_FILE: &str = "rescore.log";

/// Initializes the global logger.
///
/// Log level is controlled by the `RUST_LOG` environment variable and
/// defaults to `info`. Records go to stderr (colored) and, when `log_dir`
/// is given, to `<log_dir>/rescore.log`.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init(log_dir: Option<&Path>) {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level_filter = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

    let base_config = Dispatch::new()
        .level(log_level_filter)
        .level_for("actix", LevelFilter::Warn)
        .level_for("actix_rt", LevelFilter::Warn)
        .level_for("mio", LevelFilter::Warn);

    let console_config = Dispatch::new()
        .format(|out, message, record| {
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let mut dispatch = base_config.chain(console_config);

    if let Some(dir) = log_dir {
        if let Err(e) = fs::create_dir_all(dir) {
            eprintln!("Failed to create log directory at '{}': {}", dir.display(), e);
        } else {
            let log_file_path = dir.join(LOG_FILE);
            match fern::log_file(&log_file_path) {
                Ok(file) => {
                    let file_config = Dispatch::new()
                        .format(|out, message, record| {
                            out.finish(format_args!(
                                "[{} {} {}] {}",
                                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                                record.level(),
                                record.target(),
                                message
                            ))
                        })
                        .chain(file);
                    dispatch = dispatch.chain(file_config);
                }
                Err(e) => eprintln!("Failed to open log file '{}': {}", log_file_path.display(), e),
            }
        }
    }

    if dispatch.apply().is_err() {
        log::debug!("Logger already initialized, keeping the existing one.");
        return;
    }

    log::info!("Logger initialized at level {}.", log_level_filter);
}
