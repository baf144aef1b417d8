use serde::{Deserialize, Serialize};

use super::{AudioEffect, FilterArgs};
use crate::error::{OscillateError, OscillateResult};

/// Raw ffmpeg fragments supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Custom {
    #[serde(default)]
    pub before_options: Option<String>,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default)]
    pub af: Option<String>,
}

impl Custom {
    /// A custom effect consisting only of an `-af` graph
    pub fn graph(af: impl Into<String>) -> OscillateResult<Self> {
        let custom = Self {
            af: Some(af.into()),
            ..Default::default()
        };
        custom.validate()?;
        Ok(custom)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl AudioEffect for Custom {
    fn default_priority(&self) -> i32 {
        100
    }

    fn validate(&self) -> OscillateResult<()> {
        if non_empty(&self.before_options).is_none()
            && non_empty(&self.options).is_none()
            && non_empty(&self.af).is_none()
        {
            return Err(OscillateError::Filter(
                "Custom filter needs at least one of before_options, options or af".to_string(),
            ));
        }
        Ok(())
    }

    fn ffmpeg_args(&self) -> FilterArgs {
        FilterArgs {
            before_options: non_empty(&self.before_options),
            options: non_empty(&self.options),
            af: non_empty(&self.af),
        }
    }

    fn describe(&self) -> String {
        "Custom ffmpeg arguments".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let custom = Custom {
            options: Some(" -ss 10 ".to_string()),
            af: Some("volume=0.5".to_string()),
            ..Default::default()
        };
        let args = custom.ffmpeg_args();
        assert_eq!(args.options.as_deref(), Some("-ss 10"));
        assert_eq!(args.af.as_deref(), Some("volume=0.5"));
        assert_eq!(args.before_options, None);
    }

    #[test]
    fn test_empty_custom_rejected() {
        assert!(Custom::default().validate().is_err());
        assert!(Custom::graph("  ").is_err());
    }
}
