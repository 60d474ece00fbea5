//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

use std::str::FromStr;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};

use crate::support::error::Error;
use crate::support::system_config::LoggingConfig;

/// Install the process-wide logger described by `config`.
///
/// If `config.config_file` is set, it is handed to log4rs as-is. Otherwise,
/// everything at `config.level` or above is written to stderr.
///
/// This can only succeed once per process.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Error> {
    if let Some(ref config_file) = config.config_file {
        return log4rs::init_file(
            config_file,
            log4rs::file::Deserializers::new(),
        )
        .map_err(|e| Error::Logging(e.to_string()));
    }

    let level = parse_level(&config.level)?;
    let stderr = ConsoleAppender::builder().target(Target::Stderr).build();
    let log_config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| Error::Logging(e.to_string()))?;

    log4rs::init_config(log_config)
        .map(|_| ())
        .map_err(|e| Error::Logging(e.to_string()))
}

fn parse_level(level: &str) -> Result<LevelFilter, Error> {
    LevelFilter::from_str(level)
        .map_err(|_| Error::Logging(format!("Unknown log level '{}'", level)))
}
