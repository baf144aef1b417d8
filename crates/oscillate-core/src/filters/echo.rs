use serde::{Deserialize, Serialize};

use super::{check_range, AudioEffect, FilterArgs};
use crate::error::OscillateResult;

/// Single tap echo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    /// Delay in milliseconds, 1-5000
    pub delay_ms: u32,
    /// Echo volume relative to the input, 0.0-1.0
    pub decay: f64,
}

impl Default for Echo {
    fn default() -> Self {
        Self {
            delay_ms: 300,
            decay: 0.4,
        }
    }
}

impl Echo {
    pub fn new(delay_ms: u32, decay: f64) -> OscillateResult<Self> {
        let echo = Self { delay_ms, decay };
        echo.validate()?;
        Ok(echo)
    }
}

impl AudioEffect for Echo {
    fn default_priority(&self) -> i32 {
        40
    }

    fn validate(&self) -> OscillateResult<()> {
        check_range("Delay", f64::from(self.delay_ms), 1.0, 5000.0, " ms")?;
        check_range("Decay", self.decay, 0.0, 1.0, "")
    }

    fn ffmpeg_args(&self) -> FilterArgs {
        FilterArgs::af(format!("aecho=0.8:0.9:{}:{}", self.delay_ms, self.decay))
    }

    fn describe(&self) -> String {
        format!("Echo ({} ms, decay {:.2})", self.delay_ms, self.decay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo() {
        let echo = Echo::new(250, 0.4).unwrap();
        assert_eq!(echo.ffmpeg_args().af.as_deref(), Some("aecho=0.8:0.9:250:0.4"));
        assert!(Echo::new(0, 0.4).is_err());
        assert!(Echo::new(6000, 0.4).is_err());
        assert!(Echo::new(100, 1.5).is_err());
    }
}
