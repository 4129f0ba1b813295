//! Instance settings written into the server's configuration file.

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::Result;

/// An ordered key/value map serialized verbatim into `elasticsearch.yml`.
///
/// Keys are not validated; the server is the source of truth for what is
/// a legal setting.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct InstanceSettings {
    settings: IndexMap<String, serde_yaml::Value>,
}

impl InstanceSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with `key` set to `value`.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<serde_yaml::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Serialize to the YAML document the server reads at boot.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
