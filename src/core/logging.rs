//! Logging setup on top of flexi_logger
//!
//! All crate code logs through the `log` facade; this module installs the
//! backend once per process and lets the level be changed at runtime.

use crate::core::config::{LogFormat, LoggingSettings};
use flexi_logger::{DeferredNow, FileSpec, FlexiLoggerError, Logger, LoggerHandle};
use std::sync::{Mutex, OnceLock};

static LOGGER_HANDLE: OnceLock<Mutex<LoggerHandle>> = OnceLock::new();

/// Install the process-wide logger
pub fn init_logging(settings: &LoggingSettings) -> Result<(), FlexiLoggerError> {
    let mut logger = Logger::try_with_str(&settings.level)?;

    logger = match (settings.format, settings.color) {
        (LogFormat::Json, _) => logger.format(json_format),
        (LogFormat::Ext, true) => logger.format(extended_color_format),
        (LogFormat::Ext, false) => logger.format(extended_format),
        (LogFormat::Text, true) => logger.format(simple_color_format),
        (LogFormat::Text, false) => logger.format(simple_format),
    };

    if let Some(file_path) = &settings.file {
        let file_spec = FileSpec::try_from(file_path.as_path())?;
        logger = logger.log_to_file(file_spec);
    }

    let handle = logger.start()?;
    let _ = LOGGER_HANDLE.set(Mutex::new(handle));

    Ok(())
}

/// Change the active log level
///
/// Only the level can change after startup; format and file output are
/// fixed when flexi_logger starts.
pub fn reconfigure_logging(level: &str) -> Result<(), String> {
    let handle_mutex = LOGGER_HANDLE
        .get()
        .ok_or_else(|| "Logger handle not initialised. Call init_logging first.".to_string())?;
    let mut handle = handle_mutex
        .lock()
        .map_err(|_| "Could not acquire logger handle lock".to_string())?;
    handle
        .parse_and_push_temp_spec(level)
        .map_err(|e| format!("Invalid log specification '{}': {}", level, e))
}

fn level_abbr(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERR",
        log::Level::Warn => "WRN",
        log::Level::Info => "INF",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRC",
    }
}

fn colored_level(level: log::Level) -> colored::ColoredString {
    use colored::*;

    match level {
        log::Level::Error => "ERR".red().bold(),
        log::Level::Warn => "WRN".yellow(),
        log::Level::Info => "INF".green(),
        log::Level::Debug => "DBG".blue(),
        log::Level::Trace => "TRC".magenta(),
    }
}

// "YYYY-MM-DD HH:mm:ss.fff INF message"
fn simple_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "{} {} {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        level_abbr(record.level()),
        record.args()
    )
}

fn simple_color_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    use colored::*;

    write!(
        w,
        "{} {} {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f").to_string().dimmed(),
        colored_level(record.level()),
        record.args()
    )
}

// "YYYY-MM-DD HH:mm:ss.fff INF message (plugin/manager.rs:42)"
fn extended_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "{} {} {} ({})",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        level_abbr(record.level()),
        record.args(),
        format_target_as_path(record.target(), record.line())
    )
}

fn extended_color_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    use colored::*;

    write!(
        w,
        "{} {} {} ({})",
        now.format("%Y-%m-%d %H:%M:%S%.3f").to_string().dimmed(),
        colored_level(record.level()),
        record.args(),
        format_target_as_path(record.target(), record.line()).dimmed()
    )
}

fn json_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    use serde_json::{json, to_string};

    let json_obj = json!({
        "timestamp": now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": level_abbr(record.level()),
        "message": record.args().to_string(),
        "target": format_target_as_path(record.target(), record.line())
    });

    match to_string(&json_obj) {
        Ok(json_string) => w.write_all(json_string.as_bytes()),
        Err(_) => w.write_all(b"{\"error\":\"Failed to serialize log message\"}"),
    }
}

// plugrack::plugin::manager -> plugin/manager.rs
fn format_target_as_path(target: &str, line: Option<u32>) -> String {
    let path_like = if let Some(without_prefix) = target.strip_prefix("plugrack::") {
        without_prefix.replace("::", "/") + ".rs"
    } else {
        target.replace("::", "/")
    };

    match line {
        Some(line_num) => format!("{}:{}", path_like, line_num),
        None => path_like,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn render(
        format: fn(&mut dyn std::io::Write, &mut DeferredNow, &log::Record) -> Result<(), std::io::Error>,
        level: log::Level,
        target: &str,
        line: Option<u32>,
    ) -> String {
        let mut buffer = Vec::new();
        let mut now = DeferredNow::new();
        let record = log::Record::builder()
            .level(level)
            .target(target)
            .line(line)
            .args(format_args!("Test message"))
            .build();

        format(&mut buffer, &mut now, &record).expect("format succeeds");
        String::from_utf8(buffer).expect("output is UTF-8")
    }

    #[test]
    fn test_target_formatting_strips_crate_prefix() {
        assert_eq!(
            format_target_as_path("plugrack::plugin::manager", Some(42)),
            "plugin/manager.rs:42"
        );
        assert_eq!(format_target_as_path("tokio::runtime", None), "tokio/runtime");
    }

    #[test]
    fn test_simple_format_layout() {
        let output = render(simple_format, log::Level::Info, "plugrack::core", None);
        assert!(output.contains("INF Test message"), "got: {}", output);
        assert!(!output.contains("core.rs"));
    }

    #[test]
    fn test_extended_format_includes_target() {
        let output = render(
            extended_format,
            log::Level::Warn,
            "plugrack::scheduler::manager",
            Some(7),
        );
        assert!(output.contains("WRN Test message"), "got: {}", output);
        assert!(output.ends_with("(scheduler/manager.rs:7)"), "got: {}", output);
    }

    #[test]
    fn test_json_format_is_single_object() {
        let output = render(json_format, log::Level::Error, "plugrack::store", Some(1));
        let value: serde_json::Value = serde_json::from_str(&output).expect("valid JSON");
        assert_eq!(value["level"], "ERR");
        assert_eq!(value["message"], "Test message");
        assert_eq!(value["target"], "store.rs:1");
    }

    #[test]
    #[serial]
    fn test_reconfigure_requires_initialised_logger_or_accepts_level() {
        // Another test binary may have installed the logger; either outcome
        // must be a clean Result rather than a panic.
        let _ = init_logging(&LoggingSettings::default());
        match reconfigure_logging("debug") {
            Ok(()) => log::debug!("level switched to debug"),
            Err(message) => assert!(message.contains("Logger"), "got: {}", message),
        }
    }
}
