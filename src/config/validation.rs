use super::AppConfig;
use anyhow::{bail, Result};
use clap::Parser;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize the recording name.
    pub fn validate(&mut self) -> Result<()> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            bail!(
                "--sample-rate must be between 8000 and 192000 Hz, got {}",
                self.sample_rate
            );
        }
        if !(1..=8).contains(&self.channels) {
            bail!("--channels must be between 1 and 8, got {}", self.channels);
        }
        if !(1..=3_600).contains(&self.flush_interval_secs) {
            bail!(
                "--flush-interval-secs must be between 1 and 3600, got {}",
                self.flush_interval_secs
            );
        }
        if !(1.0..=120.0).contains(&self.batch_seconds) {
            bail!(
                "--batch-seconds must be between 1 and 120, got {}",
                self.batch_seconds
            );
        }
        if self.name.trim().is_empty() {
            bail!("--name must not be empty");
        }
        // Spaces would leak into filenames.
        self.name = self.name.trim().replace(' ', "_");
        if let Some(lang) = non_empty(&self.lang) {
            self.lang = lang.to_ascii_lowercase();
        } else {
            bail!("--lang must not be empty (use \"auto\" to detect)");
        }
        Ok(())
    }

    /// Language hint for the speech engine; `None` requests detection.
    pub fn language_hint(&self) -> Option<&str> {
        if self.lang.eq_ignore_ascii_case("auto") {
            None
        } else {
            Some(&self.lang)
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
