//! Multi-band equalizer

use serde::{Deserialize, Serialize};

use super::{check_range, AudioEffect, FilterArgs};
use crate::error::{OscillateError, OscillateResult};

/// Centre frequencies (Hz) that list-form gains map onto
pub const STANDARD_BANDS: [u32; 10] = [32, 64, 125, 250, 500, 1000, 2000, 4000, 8000, 16000];

const MAX_GAIN_DB: f64 = 20.0;
const ACTIVE_THRESHOLD: f64 = 0.01;

/// Gain applied around one centre frequency
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub frequency: u32,
    pub gain: f64,
}

/// Equalizer with any number of bands, kept sorted by frequency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Equalizer {
    pub bands: Vec<Band>,
}

impl Equalizer {
    /// Map `gains` onto [`STANDARD_BANDS`] in order
    pub fn from_gains(gains: &[f64]) -> OscillateResult<Self> {
        if gains.len() > STANDARD_BANDS.len() {
            return Err(OscillateError::Filter(format!(
                "Too many bands provided (max {})",
                STANDARD_BANDS.len()
            )));
        }
        let eq = Self {
            bands: STANDARD_BANDS
                .iter()
                .zip(gains)
                .map(|(&frequency, &gain)| Band { frequency, gain })
                .collect(),
        };
        eq.validate()?;
        Ok(eq)
    }

    /// Build from explicit `(frequency, gain)` pairs
    pub fn from_bands(bands: impl IntoIterator<Item = (u32, f64)>) -> OscillateResult<Self> {
        let mut eq = Self::default();
        for (frequency, gain) in bands {
            eq.upsert(frequency, gain);
        }
        eq.validate()?;
        Ok(eq)
    }

    pub fn preset(name: &str) -> OscillateResult<Self> {
        let gains = preset_gains(name)
            .ok_or_else(|| OscillateError::Filter(format!("Unknown preset: {}", name)))?;
        Self::from_gains(gains)
    }

    pub fn preset_names() -> &'static [&'static str] {
        &PRESET_NAMES
    }

    /// Replace all bands with a preset
    pub fn apply_preset(&mut self, name: &str) -> OscillateResult<()> {
        *self = Self::preset(name)?;
        Ok(())
    }

    fn upsert(&mut self, frequency: u32, gain: f64) {
        match self.bands.binary_search_by_key(&frequency, |b| b.frequency) {
            Ok(i) => self.bands[i].gain = gain,
            Err(i) => self.bands.insert(i, Band { frequency, gain }),
        }
    }

    /// Set one band; the equalizer is unchanged when the gain is invalid
    pub fn set_band(&mut self, frequency: u32, gain: f64) -> OscillateResult<()> {
        validate_band(frequency, gain)?;
        self.upsert(frequency, gain);
        Ok(())
    }

    pub fn band(&self, frequency: u32) -> f64 {
        self.bands
            .iter()
            .find(|b| b.frequency == frequency)
            .map(|b| b.gain)
            .unwrap_or(0.0)
    }

    pub fn reset_band(&mut self, frequency: u32) {
        if let Some(band) = self.bands.iter_mut().find(|b| b.frequency == frequency) {
            band.gain = 0.0;
        }
    }

    pub fn reset_all(&mut self) {
        for band in &mut self.bands {
            band.gain = 0.0;
        }
    }

    /// Bands with a non-negligible gain
    pub fn active_bands(&self) -> Vec<Band> {
        self.bands
            .iter()
            .filter(|b| b.gain.abs() > ACTIVE_THRESHOLD)
            .copied()
            .collect()
    }
}

fn validate_band(frequency: u32, gain: f64) -> OscillateResult<()> {
    if frequency == 0 {
        return Err(OscillateError::Filter(format!("Invalid frequency: {}", frequency)));
    }
    check_range("Gain", gain, -MAX_GAIN_DB, MAX_GAIN_DB, " dB")
}

impl AudioEffect for Equalizer {
    fn default_priority(&self) -> i32 {
        10
    }

    fn validate(&self) -> OscillateResult<()> {
        self.bands
            .iter()
            .try_for_each(|b| validate_band(b.frequency, b.gain))
    }

    fn ffmpeg_args(&self) -> FilterArgs {
        let mut bands = self.active_bands();
        bands.sort_by_key(|b| b.frequency);
        if bands.is_empty() {
            return FilterArgs::default();
        }
        let graph = bands
            .iter()
            .map(|b| format!("equalizer=f={}:width_type=o:width=1:g={}", b.frequency, b.gain))
            .collect::<Vec<_>>()
            .join(",");
        FilterArgs::af(graph)
    }

    fn describe(&self) -> String {
        format!(
            "Equalizer ({}/{} bands active)",
            self.active_bands().len(),
            self.bands.len()
        )
    }
}

const PRESET_NAMES: [&str; 9] = [
    "flat",
    "rock",
    "pop",
    "jazz",
    "classical",
    "electronic",
    "vocal",
    "bass_boost",
    "treble_boost",
];

fn preset_gains(name: &str) -> Option<&'static [f64]> {
    let gains: &'static [f64] = match name {
        "flat" => &[0.0; 10],
        "rock" => &[0.5, 0.3, -0.5, -0.8, -0.3, 0.4, 0.9, 1.1, 1.1, 1.1],
        "pop" => &[-0.2, -0.1, 0.0, 0.2, 0.5, 0.7, 0.7, 0.5, 0.0, -0.2],
        "jazz" => &[0.4, 0.2, 0.1, 0.2, -0.2, -0.2, 0.0, 0.1, 0.3, 0.5],
        "classical" => &[0.5, 0.3, 0.2, 0.0, -0.2, -0.2, 0.0, 0.2, 0.3, 0.4],
        "electronic" => &[0.8, 0.5, 0.0, -0.5, -0.2, 0.0, 0.3, 0.8, 1.0, 1.2],
        "vocal" => &[-0.5, -0.3, -0.2, 0.1, 0.4, 0.6, 0.6, 0.4, 0.1, -0.1],
        "bass_boost" => &[1.2, 1.0, 0.8, 0.5, 0.0, -0.2, -0.3, -0.2, 0.0, 0.2],
        "treble_boost" => &[-0.2, 0.0, 0.2, 0.3, 0.5, 0.8, 1.0, 1.2, 1.4, 1.6],
        _ => return None,
    };
    Some(gains)
}
