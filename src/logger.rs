//! File-backed logger behind the `log` facade. The shell owns the terminal,
//! so diagnostics go to `$HOME/.aish_log` instead of stderr; the level comes
//! from `AISH_LOG` (off by default except warnings).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};

const LOG_FILE_NAME: &str = ".aish_log";

/// Install the global logger. Errors are ignored: a shell without a log
/// file is still a shell.
pub fn init() {
    let level = level_from_env();
    if level == LevelFilter::Off {
        return;
    }

    let Some(home) = dirs::home_dir() else {
        return;
    };
    let path = home.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&path).ok();
    let Some(file) = file else {
        return;
    };

    let logger = FileLogger {
        file: Mutex::new(file),
        level,
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }
}

fn level_from_env() -> LevelFilter {
    match std::env::var("AISH_LOG").unwrap_or_default().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "" | "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Warn,
    }
}

struct FileLogger {
    file: Mutex<File>,
    level: LevelFilter,
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!(
            "{timestamp} {:5} {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );

        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = file.write_all(line.as_bytes());
    }

    fn flush(&self) {
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = file.flush();
    }
}
