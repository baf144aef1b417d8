use serde::{Deserialize, Serialize};

use super::{check_range, AudioEffect, FilterArgs};
use crate::error::OscillateResult;

/// Centre channel (vocal) suppression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Karaoke {
    /// How much of the centre channel to remove, 0.0-1.0
    pub level: f64,
}

impl Default for Karaoke {
    fn default() -> Self {
        Self { level: 1.0 }
    }
}

impl Karaoke {
    pub fn new(level: f64) -> OscillateResult<Self> {
        let karaoke = Self { level };
        karaoke.validate()?;
        Ok(karaoke)
    }
}

impl AudioEffect for Karaoke {
    fn default_priority(&self) -> i32 {
        50
    }

    fn validate(&self) -> OscillateResult<()> {
        check_range("Level", self.level, 0.0, 1.0, "")
    }

    fn ffmpeg_args(&self) -> FilterArgs {
        FilterArgs::af(format!("stereotools=mlev={:.2}", 1.0 - self.level))
    }

    fn describe(&self) -> String {
        format!("Karaoke ({:.0}% vocal removal)", self.level * 100.0)
    }
}
