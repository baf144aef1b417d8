//! Audio filters rendered as ffmpeg arguments
//!
//! A [`Filter`] pairs an [`Effect`] with a name, an enabled flag and a
//! priority. Filters are collected in a [`FilterChain`], which orders them
//! by priority and merges their arguments into a single ffmpeg invocation.

mod audio_8d;
mod bass_boost;
mod chain;
mod custom;
mod echo;
mod equalizer;
mod karaoke;
mod nightcore;

pub use audio_8d::Audio8D;
pub use bass_boost::BassBoost;
pub use chain::{ChainState, FilterChain};
pub use custom::Custom;
pub use echo::Echo;
pub use equalizer::{Band, Equalizer, STANDARD_BANDS};
pub use karaoke::Karaoke;
pub use nightcore::Nightcore;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OscillateError, OscillateResult};

/// ffmpeg fragments contributed by one filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterArgs {
    /// Placed before `-i`
    pub before_options: Option<String>,
    /// Output options
    pub options: Option<String>,
    /// Entries for the `-af` filter graph
    pub af: Option<String>,
}

impl FilterArgs {
    pub fn af(graph: impl Into<String>) -> Self {
        Self {
            af: Some(graph.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before_options.is_none() && self.options.is_none() && self.af.is_none()
    }
}

/// Behaviour shared by every effect
pub trait AudioEffect {
    /// Priority a new filter of this effect gets
    fn default_priority(&self) -> i32;

    /// Check parameter ranges
    fn validate(&self) -> OscillateResult<()>;

    /// ffmpeg arguments for the effect in its current state
    fn ffmpeg_args(&self) -> FilterArgs;

    /// Human readable summary
    fn describe(&self) -> String;
}

/// Every effect the engine knows how to render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Equalizer(Equalizer),
    BassBoost(BassBoost),
    Nightcore(Nightcore),
    #[serde(rename = "audio_8d")]
    Audio8D(Audio8D),
    Echo(Echo),
    Karaoke(Karaoke),
    Custom(Custom),
}

impl Effect {
    fn inner(&self) -> &dyn AudioEffect {
        match self {
            Effect::Equalizer(e) => e,
            Effect::BassBoost(e) => e,
            Effect::Nightcore(e) => e,
            Effect::Audio8D(e) => e,
            Effect::Echo(e) => e,
            Effect::Karaoke(e) => e,
            Effect::Custom(e) => e,
        }
    }

    /// Name a filter gets when none is given
    pub fn default_name(&self) -> &'static str {
        match self {
            Effect::Equalizer(_) => "equalizer",
            Effect::BassBoost(_) => "bass_boost",
            Effect::Nightcore(_) => "nightcore",
            Effect::Audio8D(_) => "audio_8d",
            Effect::Echo(_) => "echo",
            Effect::Karaoke(_) => "karaoke",
            Effect::Custom(_) => "custom",
        }
    }
}

impl AudioEffect for Effect {
    fn default_priority(&self) -> i32 {
        self.inner().default_priority()
    }

    fn validate(&self) -> OscillateResult<()> {
        self.inner().validate()
    }

    fn ffmpeg_args(&self) -> FilterArgs {
        self.inner().ffmpeg_args()
    }

    fn describe(&self) -> String {
        self.inner().describe()
    }
}

macro_rules! effect_from {
    ($($ty:ident),*) => {
        $(impl From<$ty> for Effect {
            fn from(effect: $ty) -> Self {
                Effect::$ty(effect)
            }
        })*
    };
}

effect_from!(Equalizer, BassBoost, Nightcore, Audio8D, Echo, Karaoke, Custom);

/// A named, prioritised effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub priority: i32,
    pub effect: Effect,
}

fn default_enabled() -> bool {
    true
}

impl Filter {
    /// Create an enabled filter with the effect's default priority
    pub fn new(name: impl Into<String>, effect: impl Into<Effect>) -> OscillateResult<Self> {
        let effect = effect.into();
        effect.validate()?;
        Ok(Self {
            name: name.into(),
            enabled: true,
            priority: effect.default_priority(),
            effect,
        })
    }

    /// Create a filter named after its effect
    pub fn from_effect(effect: impl Into<Effect>) -> OscillateResult<Self> {
        let effect = effect.into();
        Self::new(effect.default_name(), effect)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    pub fn validate(&self) -> OscillateResult<()> {
        if self.name.is_empty() {
            return Err(OscillateError::Filter("Filter name must not be empty".to_string()));
        }
        self.effect.validate()
    }

    /// Arguments this filter contributes; empty while disabled
    pub fn ffmpeg_args(&self) -> FilterArgs {
        if !self.enabled {
            return FilterArgs::default();
        }
        self.effect.ffmpeg_args()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.enabled { "enabled" } else { "disabled" };
        write!(f, "{} ({}, {})", self.name, self.effect.describe(), status)
    }
}

pub(crate) fn check_range(label: &str, value: f64, min: f64, max: f64, unit: &str) -> OscillateResult<()> {
    if value.is_nan() || value < min || value > max {
        return Err(OscillateError::Filter(format!(
            "{} {} out of range ({}-{}{})",
            label, value, min, max, unit
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_defaults_from_effect() {
        let filter = Filter::from_effect(Echo::new(250, 0.4).unwrap()).unwrap();
        assert_eq!(filter.name, "echo");
        assert_eq!(filter.priority, 40);
        assert!(filter.enabled);
    }

    #[test]
    fn test_disabled_filter_has_no_args() {
        let mut filter = Filter::from_effect(Karaoke::new(0.8).unwrap()).unwrap();
        assert!(!filter.ffmpeg_args().is_empty());
        filter.toggle();
        assert!(filter.ffmpeg_args().is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let filter = Filter::from_effect(Nightcore::nightcore("medium").unwrap()).unwrap();
        let value = serde_json::to_value(&filter).unwrap();
        assert_eq!(value["name"], json!("nightcore"));
        assert_eq!(value["priority"], json!(20));
        assert_eq!(value["effect"]["type"], json!("nightcore"));
        assert_eq!(value["effect"]["pitch"], json!(1.2));

        let eight_d = Filter::from_effect(Audio8D::default()).unwrap();
        let value = serde_json::to_value(&eight_d).unwrap();
        assert_eq!(value["effect"]["type"], json!("audio_8d"));
    }

    #[test]
    fn test_deserialize_filter() {
        let filter: Filter = serde_json::from_value(json!({
            "name": "low end",
            "priority": 5,
            "effect": {"type": "bass_boost", "gain": 6.0, "frequency": 90.0}
        }))
        .unwrap();
        assert!(filter.enabled);
        assert_eq!(filter.priority, 5);
        assert!(matches!(filter.effect, Effect::BassBoost(_)));
    }
}
