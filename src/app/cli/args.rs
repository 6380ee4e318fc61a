//! Command line arguments
//!
//! Flags given on the command line override the matching `[logging]`
//! settings from the configuration file.

use crate::core::config::{LogFormat, LoggingSettings};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "plugrack")]
#[command(about = "Plugin host with scheduled plugin commands")]
#[command(version)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error", "off"])]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", value_parser = ["text", "ext", "json"])]
    pub log_format: Option<String>,

    /// Log file path (use 'none' to disable file logging)
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Bootstrap, report what loaded, unload and exit
    #[arg(long = "check")]
    pub check: bool,
}

impl Args {
    /// Logging settings with command line overrides applied
    pub fn logging_settings(&self, configured: &LoggingSettings) -> LoggingSettings {
        let mut settings = configured.clone();

        if let Some(level) = &self.log_level {
            settings.level = level.clone();
        }
        if let Some(format) = self
            .log_format
            .as_deref()
            .and_then(|f| LogFormat::from_str(f).ok())
        {
            settings.format = format;
        }
        match self.log_file.as_deref() {
            Some(path) if path.as_os_str() == "none" => settings.file = None,
            Some(path) => settings.file = Some(path.to_path_buf()),
            None => {}
        }

        let use_color = settings.color && !self.no_color;
        settings.color = use_color && settings.file.is_none() && std::io::stderr().is_terminal();
        settings
    }
}
