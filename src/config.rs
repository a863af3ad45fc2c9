use crate::class::ClassMap;
use crate::counter::CounterConfig;
use crate::error::{Error, Result};
use crate::pipeline::FlushMode;
use crate::runtime::DEFAULT_QUEUE_SIZE;
use crate::tracker::TrackerConfig;

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClassPreset {
    Identity,
    Coco,
}

/// Either a preset name or an explicit `{ "<id>": "<class name>" }` map.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ClassesConfig {
    Preset(ClassPreset),
    Custom(BTreeMap<String, String>),
}

impl Default for ClassesConfig {
    fn default() -> Self {
        ClassesConfig::Preset(ClassPreset::Identity)
    }
}

impl ClassesConfig {
    pub fn build(&self) -> Result<ClassMap> {
        match self {
            ClassesConfig::Preset(ClassPreset::Identity) => Ok(ClassMap::identity()),
            ClassesConfig::Preset(ClassPreset::Coco) => Ok(ClassMap::coco()),
            ClassesConfig::Custom(names) => ClassMap::from_names(names.clone()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    pub counter: CounterConfig,
    pub classes: ClassesConfig,
    pub flush_mode: FlushMode,
    pub queue_size: Option<usize>,
}

impl AppConfig {
    pub fn parse(src: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(src)
            .map_err(|e| Error::config(format!("malformed configuration: {}", e)))?;

        config.tracker.validate()?;
        config.classes.build()?;

        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config `{}`: {}", path.display(), e))
        })?;

        Self::parse(&src)
    }

    #[inline]
    pub fn queue_size(&self) -> usize {
        self.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ObjectClass;
    use crate::matching::Matcher;

    #[test]
    fn empty_object_gives_defaults() {
        let config = AppConfig::parse("{}").unwrap();

        assert_eq!(config.tracker, TrackerConfig::default());
        assert_eq!(config.counter.flush_interval_secs, 10.0);
        assert_eq!(config.classes, ClassesConfig::default());
        assert_eq!(config.flush_mode, FlushMode::Detached);
        assert_eq!(config.queue_size(), DEFAULT_QUEUE_SIZE);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::parse(
            r#"{
                "tracker": { "min_hits": 3, "matcher": "hungarian" },
                "counter": { "location": "gate" },
                "classes": "coco",
                "flush_mode": "inline"
            }"#,
        )
        .unwrap();

        assert_eq!(config.tracker.min_hits, 3);
        assert_eq!(config.tracker.matcher, Matcher::Hungarian);
        assert_eq!(config.tracker.high_threshold, 0.5);
        assert_eq!(config.counter.location, "gate");
        assert_eq!(config.classes.build().unwrap().get(7), Some(ObjectClass::Truck));
        assert_eq!(config.flush_mode, FlushMode::Inline);
    }

    #[test]
    fn custom_class_map() {
        let config = AppConfig::parse(r#"{ "classes": { "9": "bus" } }"#).unwrap();
        let map = config.classes.build().unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(9), Some(ObjectClass::Bus));
    }

    #[test]
    fn invalid_values_are_fatal() {
        for src in [
            r#"{ "tracker": { "low_threshold": 0.9, "high_threshold": 0.5 } }"#,
            r#"{ "classes": { "0": "bicycle" } }"#,
            r#"{ "tracker": 5 }"#,
        ] {
            assert!(AppConfig::parse(src).unwrap_err().is_fatal(), "{}", src);
        }
    }
}
