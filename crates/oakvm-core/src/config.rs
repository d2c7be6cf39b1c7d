//! Garbage collector configuration

use serde::{Deserialize, Serialize};

/// Default class table bound
pub const DEFAULT_MAX_CLASSES: usize = 1024;

/// Default object table bound
pub const DEFAULT_MAX_OBJECTS: usize = 65536;

/// Garbage collector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Run sweeps when requested (accounting is kept either way)
    pub enabled: bool,
    /// Maximum number of class table slots (including the null slot)
    pub max_classes: usize,
    /// Maximum number of object table slots (including the null slot)
    pub max_objects: usize,
    /// Invoke finalizers on explicit collection requests
    pub finalize_on_collect: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_classes: DEFAULT_MAX_CLASSES,
            max_objects: DEFAULT_MAX_OBJECTS,
            finalize_on_collect: true,
        }
    }
}

impl GcConfig {
    /// Create a configuration with specific table bounds
    pub fn with_limits(max_classes: usize, max_objects: usize) -> Self {
        Self {
            max_classes,
            max_objects,
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables keep their default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(enabled) = lookup("OAKVM_GC_ENABLED").and_then(|v| parse_flag(&v)) {
            config.enabled = enabled;
        }

        if let Some(max) = lookup("OAKVM_GC_MAX_CLASSES").and_then(|v| v.parse().ok()) {
            config.max_classes = max;
        }

        if let Some(max) = lookup("OAKVM_GC_MAX_OBJECTS").and_then(|v| v.parse().ok()) {
            config.max_objects = max;
        }

        if let Some(finalize) = lookup("OAKVM_GC_FINALIZE").and_then(|v| parse_flag(&v)) {
            config.finalize_on_collect = finalize;
        }

        config
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = GcConfig::default();
        assert!(config.enabled);
        assert!(config.finalize_on_collect);
        assert_eq!(config.max_classes, DEFAULT_MAX_CLASSES);
        assert_eq!(config.max_objects, DEFAULT_MAX_OBJECTS);
    }

    #[test]
    fn test_from_lookup() {
        let config = GcConfig::from_lookup(lookup_from(&[
            ("OAKVM_GC_ENABLED", "off"),
            ("OAKVM_GC_MAX_CLASSES", "64"),
            ("OAKVM_GC_MAX_OBJECTS", "4096"),
            ("OAKVM_GC_FINALIZE", "false"),
        ]));
        assert!(!config.enabled);
        assert!(!config.finalize_on_collect);
        assert_eq!(config.max_classes, 64);
        assert_eq!(config.max_objects, 4096);
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = GcConfig::from_lookup(lookup_from(&[
            ("OAKVM_GC_ENABLED", "maybe"),
            ("OAKVM_GC_MAX_OBJECTS", "lots"),
        ]));
        assert_eq!(config, GcConfig::default());
    }

    #[test]
    fn test_serde_partial() {
        let config: GcConfig = serde_json::from_str(r#"{"max_objects": 16}"#).unwrap();
        assert_eq!(config.max_objects, 16);
        assert_eq!(config.max_classes, DEFAULT_MAX_CLASSES);
        assert!(config.enabled);
    }
}
