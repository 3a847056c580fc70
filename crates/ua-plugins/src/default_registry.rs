//! Default plugin set - the built-in information-model builders
//!
//! This module defines which factories are registered when the server starts
//! and how the set to load is configured.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ua_core::{config::get_config_opt, Error, Result};
use ua_model::AddressSpace;

use crate::builtin;
use crate::plugin::{PluginDescriptor, Services};
use crate::registry::PluginHost;

/// Plugin host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHostConfig {
    /// Factory names to load, in order; every registered factory if absent
    #[serde(default)]
    pub enabled: Option<Vec<String>>,

    /// Plugin-specific parameters
    #[serde(default)]
    pub plugin_configs: HashMap<String, serde_json::Value>,

    /// Treat a failed rollback as fatal to the whole server
    #[serde(default = "default_abort_on_rollback_failure")]
    pub abort_on_rollback_failure: bool,
}

fn default_abort_on_rollback_failure() -> bool {
    true
}

impl Default for PluginHostConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            plugin_configs: HashMap::new(),
            abort_on_rollback_failure: default_abort_on_rollback_failure(),
        }
    }
}

impl PluginHostConfig {
    /// Read `OPCUA_PLUGINS` (comma separated) if set
    pub fn from_env() -> Self {
        let enabled = get_config_opt("OPCUA_PLUGINS").map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        });
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Enabled names, or `all` when nothing was configured
    pub fn enabled_or(&self, all: Vec<&str>) -> Vec<String> {
        match &self.enabled {
            Some(names) => names.clone(),
            None => all.into_iter().map(str::to_string).collect(),
        }
    }
}

/// Factories compiled into the server
pub fn builtin_descriptors() -> Vec<PluginDescriptor> {
    vec![
        builtin::hello_world::DESCRIPTOR,
        builtin::simple_event::DESCRIPTOR,
        builtin::bdi::DESCRIPTOR,
        builtin::ioports::DESCRIPTOR,
        builtin::thermal::DESCRIPTOR,
        builtin::vinput::DESCRIPTOR,
    ]
}

/// Host with every built-in factory registered
pub fn default_host(engine: Arc<dyn AddressSpace>, services: Services) -> Result<PluginHost> {
    let mut host = PluginHost::new(engine, services);
    for descriptor in builtin_descriptors() {
        host.register_factory(descriptor)?;
    }
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_enables_everything() {
        let config = PluginHostConfig::default();
        assert!(config.abort_on_rollback_failure);
        assert_eq!(config.enabled_or(vec!["a", "b"]), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_custom_config() {
        let config: PluginHostConfig = serde_json::from_str(
            r#"{"enabled": ["opc-hello-world-plugin"], "plugin_configs": {"opc-thermal-plugin": {"poll_interval_ms": 500}}}"#,
        )
        .unwrap();

        assert_eq!(
            config.enabled_or(vec!["opc-hello-world-plugin", "opc-ioports-plugin"]),
            vec!["opc-hello-world-plugin".to_string()]
        );
        assert!(config.abort_on_rollback_failure);
        assert_eq!(config.plugin_configs["opc-thermal-plugin"]["poll_interval_ms"], 500);
    }

    #[test]
    fn test_builtin_names_are_unique() {
        let mut names: Vec<&str> = builtin_descriptors().iter().map(|d| d.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        std::fs::write(&path, r#"{"abort_on_rollback_failure": false}"#).unwrap();

        let config = PluginHostConfig::from_file(&path).unwrap();
        assert!(!config.abort_on_rollback_failure);
        assert!(config.enabled.is_none());
    }
}
