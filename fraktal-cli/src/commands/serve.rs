//! `fraktal serve`: run the HTTP service in the foreground.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use fraktal_core::Settings;
use fraktal_daemon::{start_blocking, LogFormat};

use crate::Paths;

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum LogFormatArg {
    #[default]
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address, overriding `bind` in the settings file.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Log line format on stderr.
    #[arg(long, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

impl ServeArgs {
    pub fn run(self, paths: &Paths) -> Result<()> {
        let mut settings = Settings::load_at(&paths.settings_path).with_context(|| {
            format!("failed to load settings from {}", paths.settings_path.display())
        })?;
        if let Some(bind) = self.bind {
            settings.bind = bind;
        }
        start_blocking(settings, &paths.home, self.log_format.into())
            .context("fraktal service exited with error")
    }
}
