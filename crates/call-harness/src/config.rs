//! Harness configuration
//!
//! Every field has a default matching the stock test connection service, so
//! an empty TOML document is a valid configuration:
//!
//! ```toml
//! account_id = "rvoip-call-harness"
//! test_number_prefix = "555"
//! crash_number = "5550340"
//! dial_delay_ms = 4000
//!
//! [tone]
//! beep_hz = 880.0
//! boop_hz = 440.0
//!
//! [logging]
//! level = "debug"
//! json = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{HarnessError, Result};
use crate::logging::{setup_logging, LogSettings};
use crate::media::ToneConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Account incoming and unknown connection requests must name
    pub account_id: String,
    /// Outgoing numbers with this prefix are placed by the harness
    pub test_number_prefix: String,
    /// Dialing this number simulates a provider crash
    pub crash_number: String,
    /// Simulated network latency before an outgoing call connects
    pub dial_delay_ms: u64,
    pub tone: ToneConfig,
    pub logging: LogSettings,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            account_id: "rvoip-call-harness".to_string(),
            test_number_prefix: "555".to_string(),
            crash_number: "5550340".to_string(),
            dial_delay_ms: 4000,
            tone: ToneConfig::default(),
            logging: LogSettings::default(),
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| HarnessError::config(format!("invalid harness config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            return Err(HarnessError::config("account_id must not be empty"));
        }
        if self.test_number_prefix.is_empty()
            || !self.test_number_prefix.chars().all(|c| c.is_ascii_digit())
        {
            return Err(HarnessError::config("test_number_prefix must be digits"));
        }
        if self.tone.sample_rate == 0 {
            return Err(HarnessError::config("tone.sample_rate must be non-zero"));
        }
        self.logging.level()?;
        Ok(())
    }

    /// Install the global tracing subscriber from the `[logging]` section
    pub fn init_logging(&self) -> Result<()> {
        setup_logging(&self.logging)
    }

    pub fn dial_delay(&self) -> Duration {
        Duration::from_millis(self.dial_delay_ms)
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_test_number_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.test_number_prefix = prefix.into();
        self
    }

    pub fn with_tone(mut self, tone: ToneConfig) -> Self {
        self.tone = tone;
        self
    }
}
