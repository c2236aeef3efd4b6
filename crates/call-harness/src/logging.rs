//! Tracing subscriber setup driven by the `[logging]` config section
//!
//! `RUST_LOG` wins over the configured level when it is set.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{HarnessError, Result};

/// `[logging]` section of the harness config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default level, e.g. `info` or `debug`
    pub level: String,
    /// One JSON object per line instead of the human format
    pub json: bool,
    /// Include source file and line
    pub file_info: bool,
    /// Emit span enter/exit events
    pub spans: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            spans: false,
        }
    }
}

impl LogSettings {
    pub fn level(&self) -> Result<Level> {
        parse_log_level(&self.level)
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    fn filter(&self) -> Result<EnvFilter> {
        let level = self.level()?;
        Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::default().add_directive(level.into())))
    }
}

/// Install the global subscriber
///
/// Fails with `HarnessError::Config` on a bad level or if a subscriber is
/// already installed.
pub fn setup_logging(settings: &LogSettings) -> Result<()> {
    let span_events = if settings.spans { FmtSpan::ACTIVE } else { FmtSpan::NONE };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(settings.filter()?)
        .with_span_events(span_events)
        .with_file(settings.file_info)
        .with_line_number(settings.file_info);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| HarnessError::config(format!("failed to install subscriber: {}", e)))?;

    tracing::info!("Logging initialised at {}", settings.level);
    Ok(())
}

pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| HarnessError::config(format!("Invalid log level: {}", level)))
}
