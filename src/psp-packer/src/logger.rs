// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logger of the packager binary.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use log::{Log, Metadata, Record};

/// Level used unless debug output is requested.
pub const DEFAULT_LEVEL: log::LevelFilter = log::LevelFilter::Warn;

/// The logger.
pub static LOGGER: Logger = Logger(Mutex::new(LoggerConfiguration {
    target: None,
    format: LogFormat {
        show_level: true,
        show_log_origin: false,
    },
}));

/// Error type for [`Logger::init`].
pub type LoggerInitError = log::SetLoggerError;

/// Error type for [`Logger::update`].
#[derive(Debug, thiserror::Error)]
#[error("Failed to open target file: {0}")]
pub struct LoggerUpdateError(pub std::io::Error);

#[derive(Debug)]
pub struct LogFormat {
    pub show_level: bool,
    pub show_log_origin: bool,
}

#[derive(Debug)]
pub struct LoggerConfiguration {
    /// Log file; standard error when unset.
    pub target: Option<std::fs::File>,
    pub format: LogFormat,
}

#[derive(Debug)]
pub struct Logger(pub Mutex<LoggerConfiguration>);

/// Changes applied by [`Logger::update`]. Unset fields are left as they are.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoggerConfig {
    pub log_path: Option<PathBuf>,
    pub level: Option<log::LevelFilter>,
    pub show_level: Option<bool>,
    pub show_log_origin: Option<bool>,
}

impl Logger {
    pub fn init(&'static self) -> Result<(), LoggerInitError> {
        log::set_logger(self)?;
        log::set_max_level(DEFAULT_LEVEL);
        Ok(())
    }

    pub fn update(&self, config: LoggerConfig) -> Result<(), LoggerUpdateError> {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        log::set_max_level(config.level.unwrap_or(DEFAULT_LEVEL));

        if let Some(log_path) = config.log_path {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .map_err(LoggerUpdateError)?;
            guard.target = Some(file);
        }
        if let Some(show_level) = config.show_level {
            guard.format.show_level = show_level;
        }
        if let Some(show_log_origin) = config.show_log_origin {
            guard.format.show_log_origin = show_log_origin;
        }
        Ok(())
    }
}

/// `[psp-packer:LEVEL:file:line] message`, leaving out the parts the format hides.
fn format_record(format: &LogFormat, record: &Record) -> String {
    let level = match format.show_level {
        true => format!(":{}", record.level()),
        false => String::new(),
    };
    let origin = match format.show_log_origin {
        true => {
            let file = record.file().unwrap_or("?");
            let line = record
                .line()
                .map_or_else(|| String::from("?"), |line| line.to_string());
            format!(":{file}:{line}")
        }
        false => String::new(),
    };
    format!("[psp-packer{level}{origin}] {}\n", record.args())
}

impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let message = format_record(&guard.format, record);
        // Nowhere left to report a failed write.
        let _ = match &mut guard.target {
            Some(file) => file.write_all(message.as_bytes()),
            None => std::io::stderr().write_all(message.as_bytes()),
        };
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use utils::tempfile::TempFile;

    use super::*;

    fn record_text(format: &LogFormat) -> String {
        format_record(
            format,
            &Record::builder()
                .args(format_args!("packed {} entries", 3))
                .level(log::Level::Warn)
                .file(Some("psp.rs"))
                .line(Some(42))
                .build(),
        )
    }

    #[test]
    fn test_format() {
        let mut format = LogFormat {
            show_level: true,
            show_log_origin: false,
        };
        assert_eq!(record_text(&format), "[psp-packer:WARN] packed 3 entries\n");
        format.show_log_origin = true;
        assert_eq!(
            record_text(&format),
            "[psp-packer:WARN:psp.rs:42] packed 3 entries\n"
        );
        format.show_level = false;
        format.show_log_origin = false;
        assert_eq!(record_text(&format), "[psp-packer] packed 3 entries\n");
    }

    #[test]
    fn test_logger_to_file() {
        let logger = Logger(Mutex::new(LoggerConfiguration {
            target: None,
            format: LogFormat {
                show_level: false,
                show_log_origin: false,
            },
        }));
        let file = TempFile::new().unwrap();
        logger
            .update(LoggerConfig {
                log_path: Some(file.as_path().to_path_buf()),
                level: Some(log::LevelFilter::Debug),
                show_level: Some(true),
                ..Default::default()
            })
            .unwrap();
        logger.log(
            &Record::builder()
                .args(format_args!("hello"))
                .level(log::Level::Info)
                .build(),
        );
        assert_eq!(
            std::fs::read_to_string(file.as_path()).unwrap(),
            "[psp-packer:INFO] hello\n"
        );

        let err = logger
            .update(LoggerConfig {
                log_path: Some(PathBuf::from("/nonexistent/dir/log")),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed to open target file"));
    }
}
