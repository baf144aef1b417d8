//! Rotating "8D" stereo effect

use serde::{Deserialize, Serialize};

use super::{check_range, AudioEffect, FilterArgs};
use crate::error::{OscillateError, OscillateResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audio8D {
    /// 0.1-1.0
    pub strength: f64,
    /// Rotation speed in Hz, 0.5-5.0
    pub speed: f64,
    /// 0.1-1.0
    pub radius: f64,
    /// 0.0-1.0
    pub reverb_amount: f64,
}

impl Default for Audio8D {
    fn default() -> Self {
        Self {
            strength: 0.8,
            speed: 2.0,
            radius: 0.7,
            reverb_amount: 0.3,
        }
    }
}

impl Audio8D {
    pub fn new(strength: f64, speed: f64, radius: f64, reverb_amount: f64) -> OscillateResult<Self> {
        let effect = Self {
            strength,
            speed,
            radius,
            reverb_amount,
        };
        effect.validate()?;
        Ok(effect)
    }

    /// `subtle`, `normal`, `intense` or `hypnotic`
    pub fn preset(name: &str) -> OscillateResult<Self> {
        let (strength, speed, radius, reverb) = match name {
            "subtle" => (0.4, 1.0, 0.5, 0.1),
            "normal" => (0.7, 2.0, 0.7, 0.3),
            "intense" => (0.9, 3.0, 0.8, 0.4),
            "hypnotic" => (1.0, 4.0, 0.9, 0.5),
            other => {
                return Err(OscillateError::Filter(format!(
                    "Unknown 8D preset: {}",
                    other
                )))
            }
        };
        Self::new(strength, speed, radius, reverb)
    }

    pub fn set_strength(&mut self, strength: f64) -> OscillateResult<()> {
        check_range("Strength", strength, 0.1, 1.0, "")?;
        self.strength = strength;
        Ok(())
    }

    pub fn set_speed(&mut self, speed: f64) -> OscillateResult<()> {
        check_range("Speed", speed, 0.5, 5.0, " Hz")?;
        self.speed = speed;
        Ok(())
    }
}

impl AudioEffect for Audio8D {
    fn default_priority(&self) -> i32 {
        30
    }

    fn validate(&self) -> OscillateResult<()> {
        check_range("Strength", self.strength, 0.1, 1.0, "")?;
        check_range("Speed", self.speed, 0.5, 5.0, " Hz")?;
        check_range("Radius", self.radius, 0.1, 1.0, "")?;
        check_range("Reverb amount", self.reverb_amount, 0.0, 1.0, "")
    }

    fn ffmpeg_args(&self) -> FilterArgs {
        let depth = self.strength * self.radius;
        let phase_delay = ((self.radius * 10.0) as i64).max(1);

        let mut graph = vec![
            format!("apulsator=hz={}:amount={}", self.speed, depth * 0.5),
            format!("extrastereo=m={:.2}", self.strength * 2.0),
            format!(
                "aphaser=in_gain=0.4:out_gain=0.74:delay={}:decay=0.4:speed={}",
                phase_delay, self.speed
            ),
        ];

        if self.reverb_amount > 0.01 {
            let mix = self.reverb_amount.min(0.5);
            let delay = (50.0 * self.reverb_amount) as i64;
            graph.push(format!("aecho=0.8:0.9:{}:{}", delay, mix));
        }

        graph.push("chorus=0.5:0.9:50:0.4:0.25:2".to_string());
        FilterArgs::af(graph.join(","))
    }

    fn describe(&self) -> String {
        format!(
            "8D Audio (strength={:.1}, speed={:.1}Hz)",
            self.strength, self.speed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_graph() {
        let effect = Audio8D::new(1.0, 2.0, 0.5, 0.0).unwrap();
        assert_eq!(
            effect.ffmpeg_args().af.as_deref(),
            Some(
                "apulsator=hz=2:amount=0.25,extrastereo=m=2.00,\
                 aphaser=in_gain=0.4:out_gain=0.74:delay=5:decay=0.4:speed=2,\
                 chorus=0.5:0.9:50:0.4:0.25:2"
            )
        );
    }

    #[test]
    fn test_reverb_adds_echo() {
        let effect = Audio8D::preset("hypnotic").unwrap();
        let graph = effect.ffmpeg_args().af.unwrap();
        assert!(graph.contains("aecho=0.8:0.9:25:0.5"));
    }

    #[test]
    fn test_validation() {
        assert!(Audio8D::new(0.05, 2.0, 0.5, 0.1).is_err());
        assert!(Audio8D::new(0.5, 6.0, 0.5, 0.1).is_err());
        assert!(Audio8D::new(0.5, 2.0, 1.5, 0.1).is_err());
        assert!(Audio8D::new(0.5, 2.0, 0.5, 1.1).is_err());
        assert!(Audio8D::preset("dizzy").is_err());
    }
}
