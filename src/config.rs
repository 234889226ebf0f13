//! Counting parameters, adjustable through a JSON file.

use std::fs;
use std::path::Path;

use crate::detection::{BICYCLE_CLASS, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::error::{Error, Result};

use serde_derive::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CounterConfig {
    /// Detections at or below this confidence never reach the tracker.
    pub confidence_threshold: f32,
    /// Seconds a track must wait after a counted crossing before it may
    /// register another one. Absorbs tracker jitter near the line.
    pub cooldown_secs: f64,
    /// Seconds a track may go unreported before its state is purged.
    pub lost_track_timeout_secs: f64,
    /// Width of a metrics window in seconds.
    pub window_secs: f64,
    /// Closed windows kept for the rate series.
    pub max_closed_windows: usize,
    /// Process every n-th frame only.
    pub frame_stride: u32,
    /// Detector classes that are counted. Empty counts every class.
    pub classes: Vec<i32>,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            cooldown_secs: 2.0,
            lost_track_timeout_secs: 1.0,
            window_secs: 60.0,
            max_closed_windows: 24 * 60,
            frame_stride: 1,
            classes: vec![BICYCLE_CLASS],
        }
    }
}

impl CounterConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;

        info!(path = %path.display(), "config loaded");

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::InvalidConfig(format!(
                "confidence threshold {} is outside [0, 1]",
                self.confidence_threshold
            )));
        }

        if [self.cooldown_secs, self.lost_track_timeout_secs]
            .iter()
            .any(|v| v.is_nan() || *v < 0.0)
        {
            return Err(Error::InvalidConfig(
                "cooldown and lost-track timeout must be non-negative".into(),
            ));
        }

        if !self.window_secs.is_finite() || self.window_secs <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "window width {} must be positive",
                self.window_secs
            )));
        }

        if self.frame_stride == 0 {
            return Err(Error::InvalidConfig("frame stride must be at least 1".into()));
        }

        Ok(())
    }
}
