//! Low shelf bass boost

use serde::{Deserialize, Serialize};

use super::{check_range, AudioEffect, FilterArgs};
use crate::error::{OscillateError, OscillateResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BassBoost {
    /// Boost in dB, 0-20
    pub gain: f64,
    /// Shelf frequency in Hz, 20-500
    pub frequency: f64,
}

impl Default for BassBoost {
    fn default() -> Self {
        Self {
            gain: 8.0,
            frequency: 100.0,
        }
    }
}

impl BassBoost {
    pub fn new(gain: f64, frequency: f64) -> OscillateResult<Self> {
        let boost = Self { gain, frequency };
        boost.validate()?;
        Ok(boost)
    }

    /// `light`, `medium`, `heavy` or `extreme`
    pub fn preset(level: &str) -> OscillateResult<Self> {
        let (gain, frequency) = match level {
            "light" => (4.0, 110.0),
            "medium" => (8.0, 100.0),
            "heavy" => (12.0, 80.0),
            "extreme" => (18.0, 60.0),
            other => {
                return Err(OscillateError::Filter(format!(
                    "Unknown bass boost preset: {}",
                    other
                )))
            }
        };
        Self::new(gain, frequency)
    }

    pub fn set_gain(&mut self, gain: f64) -> OscillateResult<()> {
        check_range("Gain", gain, 0.0, 20.0, " dB")?;
        self.gain = gain;
        Ok(())
    }
}

impl AudioEffect for BassBoost {
    fn default_priority(&self) -> i32 {
        15
    }

    fn validate(&self) -> OscillateResult<()> {
        check_range("Gain", self.gain, 0.0, 20.0, " dB")?;
        check_range("Frequency", self.frequency, 20.0, 500.0, " Hz")
    }

    fn ffmpeg_args(&self) -> FilterArgs {
        if self.gain <= 0.01 {
            return FilterArgs::default();
        }
        FilterArgs::af(format!("bass=g={}:f={}:w=0.5", self.gain, self.frequency))
    }

    fn describe(&self) -> String {
        format!("Bass boost (+{:.1} dB at {:.0} Hz)", self.gain, self.frequency)
    }
}
