// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::collections::HashMap;
use std::str::FromStr;

use log::{LogLevel, LogLevelFilter, LogMetadata, LogRecord, SetLoggerError};

/// A minimal `log::Log` implementation: one default level plus per-target
/// overrides collected from repeated `-log target=level` flags.
pub struct Logger {
    level: LogLevel,
    targets: HashMap<String, LogLevel>,
}

impl Logger {
    pub fn build(level: &str, target_levels: &[(String, String)]) -> Result<Logger, String> {
        let level = LogLevel::from_str(level).map_err(|_| format!("invalid log level {}", level))?;
        let mut logger = Logger {
            level,
            targets: HashMap::new(),
        };
        for (target, level) in target_levels {
            logger.add_target(target.clone(), level)?;
        }
        Ok(logger)
    }

    pub fn enable(logger: Logger) -> Result<(), SetLoggerError> {
        log::set_logger(|max_level| {
            max_level.set(logger.max_level());
            Box::new(logger)
        })
    }

    fn add_target(&mut self, target: String, level: &str) -> Result<(), String> {
        let level = LogLevel::from_str(level).map_err(|_| format!("invalid log level {} for target {}", level, &target))?;
        self.targets.insert(target, level);
        Ok(())
    }

    fn max_level(&self) -> LogLevelFilter {
        self.targets
            .values()
            .fold(self.level, |acc, level| if *level > acc { *level } else { acc })
            .to_log_level_filter()
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &LogMetadata) -> bool {
        match self.targets.get(metadata.target()) {
            Some(target_level) => metadata.level() <= *target_level,
            None => metadata.level() <= self.level,
        }
    }

    fn log(&self, record: &LogRecord) {
        if self.enabled(record.metadata()) {
            println!("{} [{}] - {}", record.level(), record.target(), record.args());
        }
    }
}
