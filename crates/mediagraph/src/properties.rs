//! String key/value properties attached to nodes, ports and globals

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Pause the node when it reaches idle. Defaults to true.
pub const NODE_PAUSE_ON_IDLE: &str = "node.pause-on-idle";
/// The node owns a graph and supplies the quantum for it.
pub const NODE_DRIVER: &str = "node.driver";
pub const NODE_NAME: &str = "node.name";
pub const NODE_SESSION: &str = "node.session";
pub const NODE_ID: &str = "node.id";
pub const MEDIA_CLASS: &str = "media.class";

/// Ordered property dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set a value, returning true when the stored value changed.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let value = value.into();
        match self.0.insert(key.into(), value.clone()) {
            Some(old) => old != value,
            None => true,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Copy every entry of `other` into self. Returns the number of keys
    /// whose value changed.
    pub fn update(&mut self, other: &Properties) -> usize {
        other
            .iter()
            .filter(|(k, v)| self.set(*k, *v))
            .count()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(parse_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// "true" or the integer 1 are true; anything else is false.
pub fn parse_bool(value: &str) -> bool {
    value == "true" || value.trim().parse::<i64>() == Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_set_reports_change() {
        let mut props = Properties::new();
        assert!(props.set(NODE_NAME, "sink"));
        assert!(!props.set(NODE_NAME, "sink"));
        assert!(props.set(NODE_NAME, "source"));
        assert_eq!(props.get(NODE_NAME), Some("source"));
    }

    #[test]
    fn test_update_counts_changes() {
        let mut props: Properties = [(NODE_DRIVER, "true"), (MEDIA_CLASS, "Audio/Sink")]
            .into_iter()
            .collect();
        let overlay: Properties = [(NODE_DRIVER, "true"), (NODE_SESSION, "1")]
            .into_iter()
            .collect();

        assert_eq!(props.update(&overlay), 1);
        assert_eq!(props.len(), 3);
        assert_eq!(props.get_bool(NODE_DRIVER), Some(true));
    }
}
