//! Pitch and tempo shifting (nightcore / daycore)

use serde::{Deserialize, Serialize};

use super::{check_range, AudioEffect, FilterArgs};
use crate::error::{OscillateError, OscillateResult};

/// Output sample rate of the decode pipeline
const SAMPLE_RATE: u32 = 48_000;
const NEUTRAL_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nightcore {
    /// Pitch multiplier, 0.5-2.0
    pub pitch: f64,
    /// Tempo multiplier, 0.5-2.0
    pub tempo: f64,
    #[serde(default = "default_preserve_formants")]
    pub preserve_formants: bool,
}

fn default_preserve_formants() -> bool {
    true
}

impl Default for Nightcore {
    fn default() -> Self {
        Self {
            pitch: 1.2,
            tempo: 1.15,
            preserve_formants: true,
        }
    }
}

impl Nightcore {
    pub fn new(pitch: f64, tempo: f64) -> OscillateResult<Self> {
        let effect = Self {
            pitch,
            tempo,
            preserve_formants: true,
        };
        effect.validate()?;
        Ok(effect)
    }

    /// Faster and higher: `light`, `medium`, `heavy`, `extreme`
    pub fn nightcore(intensity: &str) -> OscillateResult<Self> {
        let (pitch, tempo) = match intensity {
            "light" => (1.1, 1.05),
            "medium" => (1.2, 1.15),
            "heavy" => (1.35, 1.3),
            "extreme" => (1.5, 1.45),
            other => {
                return Err(OscillateError::Filter(format!(
                    "Unknown nightcore preset: {}",
                    other
                )))
            }
        };
        Self::new(pitch, tempo)
    }

    /// Slower and lower: `light`, `medium`, `heavy`, `extreme`
    pub fn daycore(intensity: &str) -> OscillateResult<Self> {
        let (pitch, tempo) = match intensity {
            "light" => (0.95, 0.9),
            "medium" => (0.85, 0.8),
            "heavy" => (0.75, 0.7),
            "extreme" => (0.65, 0.6),
            other => {
                return Err(OscillateError::Filter(format!(
                    "Unknown daycore preset: {}",
                    other
                )))
            }
        };
        Self::new(pitch, tempo)
    }

    pub fn pitch_only(pitch: f64) -> OscillateResult<Self> {
        Self::new(pitch, 1.0)
    }

    pub fn tempo_only(tempo: f64) -> OscillateResult<Self> {
        Self::new(1.0, tempo)
    }

    pub fn set_pitch(&mut self, pitch: f64) -> OscillateResult<()> {
        check_range("Pitch", pitch, 0.5, 2.0, "")?;
        self.pitch = pitch;
        Ok(())
    }

    pub fn set_tempo(&mut self, tempo: f64) -> OscillateResult<()> {
        check_range("Tempo", tempo, 0.5, 2.0, "")?;
        self.tempo = tempo;
        Ok(())
    }
}

impl AudioEffect for Nightcore {
    fn default_priority(&self) -> i32 {
        20
    }

    fn validate(&self) -> OscillateResult<()> {
        check_range("Pitch", self.pitch, 0.5, 2.0, "")?;
        check_range("Tempo", self.tempo, 0.5, 2.0, "")
    }

    fn ffmpeg_args(&self) -> FilterArgs {
        let mut graph = Vec::new();
        if (self.tempo - 1.0).abs() > NEUTRAL_THRESHOLD {
            graph.push(format!("atempo={}", self.tempo));
        }
        if (self.pitch - 1.0).abs() > NEUTRAL_THRESHOLD {
            graph.push(format!(
                "asetrate={rate}*{},aresample={rate}",
                self.pitch,
                rate = SAMPLE_RATE
            ));
        }
        if graph.is_empty() {
            return FilterArgs::default();
        }
        FilterArgs::af(graph.join(","))
    }

    fn describe(&self) -> String {
        let description = if self.pitch > 1.05 && self.tempo > 1.05 {
            "Nightcore (faster, higher pitch)"
        } else if self.pitch < 0.95 && self.tempo < 0.95 {
            "Daycore (slower, lower pitch)"
        } else if self.pitch > 1.05 {
            "Higher pitch"
        } else if self.pitch < 0.95 {
            "Lower pitch"
        } else if self.tempo > 1.05 {
            "Faster tempo"
        } else if self.tempo < 0.95 {
            "Slower tempo"
        } else {
            "No significant change"
        };
        description.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_args() {
        let effect = Nightcore::nightcore("medium").unwrap();
        assert_eq!(
            effect.ffmpeg_args().af.as_deref(),
            Some("atempo=1.15,asetrate=48000*1.2,aresample=48000")
        );

        let tempo = Nightcore::tempo_only(1.5).unwrap();
        assert_eq!(tempo.ffmpeg_args().af.as_deref(), Some("atempo=1.5"));

        assert!(Nightcore::new(1.0, 1.005).unwrap().ffmpeg_args().is_empty());
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(
            Nightcore::nightcore("light").unwrap().describe(),
            "Nightcore (faster, higher pitch)"
        );
        assert_eq!(
            Nightcore::daycore("heavy").unwrap().describe(),
            "Daycore (slower, lower pitch)"
        );
        assert_eq!(Nightcore::pitch_only(0.8).unwrap().describe(), "Lower pitch");
    }

    #[test]
    fn test_validation() {
        assert!(Nightcore::new(2.5, 1.0).is_err());
        assert!(Nightcore::new(1.0, 0.4).is_err());
        assert!(Nightcore::daycore("ultra").is_err());

        let mut effect = Nightcore::default();
        assert!(effect.set_pitch(3.0).is_err());
        assert_eq!(effect.pitch, 1.2);
    }
}
