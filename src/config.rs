//! Factory configuration, loadable from JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::DEFAULT_CAPACITY;
use crate::component::ComponentSpec;
use crate::error::{ComponentError, Result};
use crate::template::TemplateSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FactoryConfig {
    /// Delimiters, variable mode and imports for every component template.
    pub template: TemplateSettings,
    /// Renderer for components that do not name one.
    pub default_renderer: String,
    /// Initial global table (`window.*` for expressions).
    pub globals: Map<String, Value>,
    /// Address of the hosting script; `@name` imports resolve next to it.
    pub script_src: Option<String>,
    /// Addresses imported by `boot`, comma / space / `+` separated.
    pub import: String,
    /// Compiled templates kept per component. Zero disables the cache.
    pub cache_capacity: usize,
    /// Registered when the factory is built.
    pub components: Vec<ComponentSpec>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            template: TemplateSettings::default(),
            default_renderer: "replace".to_string(),
            globals: Map::new(),
            script_src: None,
            import: String::new(),
            cache_capacity: DEFAULT_CAPACITY,
            components: Vec::new(),
        }
    }
}

impl FactoryConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ComponentError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = FactoryConfig::from_json(r#"{"defaultRenderer": "none", "globals": {"site": "x"}}"#).unwrap();
        assert_eq!(config.default_renderer, "none");
        assert_eq!(config.globals["site"], "x");
        assert_eq!(config.cache_capacity, DEFAULT_CAPACITY);
        assert_eq!(config.template.variable, "");
        assert!(config.components.is_empty());
    }

    #[test]
    fn test_template_settings_and_components() {
        let config = FactoryConfig::from_json(
            r#"{
                "template": {"variable": "data", "interpolate": null},
                "import": "@card, ./list.html",
                "components": [{"name": "x-a", "template": "<%= data.v %>"}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.template.variable, "data");
        assert_eq!(config.template.interpolate, None);
        assert_eq!(config.components[0].name, "x-a");
        assert_eq!(config.import, "@card, ./list.html");
    }

    #[test]
    fn test_invalid_json_is_a_config_error() {
        assert!(matches!(
            FactoryConfig::from_json("{"),
            Err(ComponentError::Config(_))
        ));
    }
}
