// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

/// Overrides the default level. Accepts `env_logger` filter syntax, eg `KEYSTORE_LOG=keystore_client=debug`.
pub const LOG_LEVEL_ENV_VAR: &str = "KEYSTORE_LOG";

pub fn try_init() -> Result<(), log::SetLoggerError> {
    try_init_with_level(log::LevelFilter::Info)
}

/// Like [`try_init`], but with a caller-chosen default level for when `KEYSTORE_LOG` is unset.
pub fn try_init_with_level(default_level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .format(|fmt, record| {
            use std::io::Write;

            let timestamp = fmt.timestamp();
            let line = format_line(record.level(), record.target(), record.args());
            writeln!(
                fmt,
                "<{}>{} {}",
                to_syslog_level(record.level()),
                timestamp,
                line
            )
        })
        .filter_level(default_level)
        .parse_env(LOG_LEVEL_ENV_VAR)
        .try_init()
}

fn format_line(level: log::Level, target: &str, args: &std::fmt::Arguments<'_>) -> String {
    let level_name = match level {
        log::Level::Trace => "TRCE",
        log::Level::Debug => "DBUG",
        log::Level::Info => "INFO",
        log::Level::Warn => "WARN",
        log::Level::Error => "ERR!",
    };

    // Targets are only interesting when chasing a problem.
    if level >= log::Level::Debug {
        format!("[{}] - [{}] {}", level_name, target, args)
    } else {
        format!("[{}] - {}", level_name, args)
    }
}

fn to_syslog_level(level: log::Level) -> i8 {
    match level {
        log::Level::Error => 3,
        log::Level::Warn => 4,
        log::Level::Info => 6,
        log::Level::Debug | log::Level::Trace => 7,
    }
}
