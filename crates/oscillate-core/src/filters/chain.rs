//! Ordered collection of filters

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Filter;
use crate::error::{OscillateError, OscillateResult};
use crate::ffmpeg::FfmpegArgs;

/// Serialised form of a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainState {
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub filter_count: usize,
    #[serde(default)]
    pub enabled_count: usize,
}

/// Filters kept in ascending priority order; names are unique
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter, replacing any filter with the same name
    pub fn add(&mut self, filter: Filter) -> OscillateResult<()> {
        filter.validate()?;
        self.remove(&filter.name);
        self.filters.push(filter);
        self.sort();
        Ok(())
    }

    /// Returns whether a filter was removed
    pub fn remove(&mut self, name: &str) -> bool {
        match self.filters.iter().position(|f| f.name == name) {
            Some(i) => {
                self.filters.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.name == name)
    }

    /// Mutable access for in-place parameter changes.
    ///
    /// Use [`FilterChain::set_priority`] to reorder.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Filter> {
        self.filters.iter_mut().find(|f| f.name == name)
    }

    pub fn set_priority(&mut self, name: &str, priority: i32) -> bool {
        let Some(filter) = self.get_mut(name) else {
            return false;
        };
        filter.priority = priority;
        self.sort();
        true
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn enable(&mut self, name: &str) -> bool {
        self.get_mut(name).map(Filter::enable).is_some()
    }

    pub fn disable(&mut self, name: &str) -> bool {
        self.get_mut(name).map(Filter::disable).is_some()
    }

    pub fn toggle(&mut self, name: &str) -> bool {
        self.get_mut(name).map(Filter::toggle).is_some()
    }

    fn sort(&mut self) {
        self.filters.sort_by_key(|f| f.priority);
    }

    /// Merge the arguments of every enabled filter.
    ///
    /// Before-options are joined with spaces. Output options come next,
    /// followed by a single `-af` with all audio filters joined by commas.
    pub fn combined_args(&self) -> FfmpegArgs {
        let mut before_options = Vec::new();
        let mut options = Vec::new();
        let mut audio_filters = Vec::new();

        for filter in self.filters.iter().filter(|f| f.enabled) {
            let args = filter.ffmpeg_args();
            before_options.extend(args.before_options);
            options.extend(args.options);
            audio_filters.extend(args.af);
        }

        if !audio_filters.is_empty() {
            options.push(format!("-af {}", audio_filters.join(",")));
        }

        FfmpegArgs {
            before_options: before_options.join(" "),
            options: options.join(" "),
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.filters.iter().filter(|f| f.enabled).count()
    }

    /// Whether any filter is enabled
    pub fn is_active(&self) -> bool {
        self.enabled_count() > 0
    }

    pub fn names(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.name.clone()).collect()
    }

    pub fn enabled_names(&self) -> Vec<String> {
        self.filters
            .iter()
            .filter(|f| f.enabled)
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }

    pub fn to_state(&self) -> ChainState {
        ChainState {
            filters: self.filters.clone(),
            filter_count: self.len(),
            enabled_count: self.enabled_count(),
        }
    }

    /// Rebuild a chain, validating every filter
    pub fn from_state(state: ChainState) -> OscillateResult<Self> {
        let mut chain = Self::new();
        for filter in state.filters {
            let name = filter.name.clone();
            chain.add(filter).map_err(|e| {
                OscillateError::Filter(format!("Cannot restore filter '{}': {}", name, e))
            })?;
        }
        Ok(chain)
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filters.is_empty() {
            return f.write_str("FilterChain(empty)");
        }
        let enabled = self.enabled_names();
        write!(f, "FilterChain({} enabled: {})", enabled.len(), enabled.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{BassBoost, Custom, Echo, Equalizer, Karaoke, Nightcore};
    use pretty_assertions::assert_eq;

    fn sample_chain() -> FilterChain {
        let mut chain = FilterChain::new();
        chain
            .add(Filter::from_effect(Echo::new(200, 0.5).unwrap()).unwrap())
            .unwrap();
        chain
            .add(Filter::from_effect(Nightcore::tempo_only(1.25).unwrap()).unwrap())
            .unwrap();
        chain
            .add(Filter::from_effect(Equalizer::from_gains(&[2.0]).unwrap()).unwrap())
            .unwrap();
        chain
    }

    #[test]
    fn test_sorted_by_priority() {
        let chain = sample_chain();
        assert_eq!(chain.names(), vec!["equalizer", "nightcore", "echo"]);
    }

    #[test]
    fn test_same_name_replaces() {
        let mut chain = sample_chain();
        chain
            .add(Filter::new("echo", Karaoke::new(1.0).unwrap()).unwrap())
            .unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.names(), vec!["equalizer", "nightcore", "echo"]);
        assert!(chain
            .combined_args()
            .options
            .contains("stereotools=mlev=0.00"));
    }

    #[test]
    fn test_stable_for_equal_priorities() {
        let mut chain = FilterChain::new();
        chain
            .add(Filter::new("b", Custom::graph("volume=2").unwrap()).unwrap())
            .unwrap();
        chain
            .add(Filter::new("a", Custom::graph("volume=0.5").unwrap()).unwrap())
            .unwrap();
        assert_eq!(chain.names(), vec!["b", "a"]);
    }

    #[test]
    fn test_combined_args() {
        let mut chain = sample_chain();
        chain
            .add(
                Filter::new(
                    "seek",
                    Custom {
                        before_options: Some("-ss 30".to_string()),
                        options: Some("-t 60".to_string()),
                        af: None,
                    },
                )
                .unwrap(),
            )
            .unwrap();

        let args = chain.combined_args();
        assert_eq!(args.before_options, "-ss 30");
        assert_eq!(
            args.options,
            "-t 60 -af equalizer=f=32:width_type=o:width=1:g=2,atempo=1.25,aecho=0.8:0.9:200:0.5"
        );
    }

    #[test]
    fn test_enable_disable_toggle() {
        let mut chain = sample_chain();
        assert!(chain.disable("echo"));
        assert!(!chain.disable("missing"));
        assert_eq!(chain.enabled_names(), vec!["equalizer", "nightcore"]);
        assert!(!chain.combined_args().options.contains("aecho"));

        chain.toggle("echo");
        chain.toggle("equalizer");
        chain.disable("nightcore");
        assert_eq!(chain.enabled_names(), vec!["echo"]);
        assert!(chain.is_active());

        chain.disable("echo");
        assert!(!chain.is_active());
        assert!(chain.combined_args().is_empty());
    }

    #[test]
    fn test_set_priority_reorders() {
        let mut chain = sample_chain();
        assert!(chain.set_priority("echo", 1));
        assert_eq!(chain.names(), vec!["echo", "equalizer", "nightcore"]);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let mut chain = FilterChain::new();
        let mut filter = Filter::from_effect(BassBoost::default()).unwrap();
        if let crate::filters::Effect::BassBoost(b) = &mut filter.effect {
            b.gain = 40.0;
        }
        assert!(chain.add(filter).is_err());
        assert!(chain.is_empty());
    }

    #[test]
    fn test_state_round_trip() {
        let mut chain = sample_chain();
        chain.disable("nightcore");

        let json = serde_json::to_value(chain.to_state()).unwrap();
        assert_eq!(json["filter_count"], 3);
        assert_eq!(json["enabled_count"], 2);

        let restored = FilterChain::from_state(serde_json::from_value(json).unwrap()).unwrap();
        assert_eq!(restored.names(), chain.names());
        assert_eq!(restored.combined_args(), chain.combined_args());
        assert_eq!(restored.to_string(), "FilterChain(2 enabled: equalizer, echo)");
    }
}
