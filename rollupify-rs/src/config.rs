//! Transform options and bundler configuration.
//!
//! Configuration is either supplied in memory ([`ConfigSource::Inline`]) or
//! read from a JSON file for every session ([`ConfigSource::Path`]). Nothing
//! here is mutated by the transform.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::bundler::{InputOptions, SourceMapMode};
use crate::error::ConfigError;
use crate::plugin::{BannerPlugin, Plugin, ReplacePlugin, VirtualPlugin};

/// Options recognised by the transform.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformOptions {
    /// Request an inline source map. Only a literal `false` disables it.
    #[serde(deserialize_with = "deserialize_not_false")]
    pub source_maps: bool,
    /// Additional bundler configuration.
    pub config: Option<ConfigSource>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            source_maps: true,
            config: None,
        }
    }
}

impl TransformOptions {
    pub fn with_source_maps(mut self, source_maps: bool) -> Self {
        self.source_maps = source_maps;
        self
    }

    pub fn with_config(mut self, config: impl Into<ConfigSource>) -> Self {
        self.config = Some(config.into());
        self
    }
}

fn deserialize_not_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value != serde_json::Value::Bool(false))
}

/// Where the bundler configuration comes from.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawConfigSource")]
pub enum ConfigSource {
    /// A JSON configuration file, read when a session is finalized.
    Path(PathBuf),
    /// An in-memory configuration.
    Inline(BundlerConfig),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawConfigSource {
    Path(PathBuf),
    Inline(ConfigFile),
}

impl From<RawConfigSource> for ConfigSource {
    fn from(raw: RawConfigSource) -> Self {
        match raw {
            RawConfigSource::Path(path) => ConfigSource::Path(path),
            RawConfigSource::Inline(file) => ConfigSource::Inline(file.into()),
        }
    }
}

impl From<BundlerConfig> for ConfigSource {
    fn from(config: BundlerConfig) -> Self {
        ConfigSource::Inline(config)
    }
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        ConfigSource::Path(path)
    }
}

impl From<&Path> for ConfigSource {
    fn from(path: &Path) -> Self {
        ConfigSource::Path(path.to_path_buf())
    }
}

impl ConfigSource {
    /// Produces the configuration for one session.
    pub async fn load(&self) -> Result<BundlerConfig, ConfigError> {
        match self {
            ConfigSource::Inline(config) => Ok(config.clone()),
            ConfigSource::Path(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Read {
                        path: path.clone(),
                        source,
                    })?;
                let file: ConfigFile =
                    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                Ok(file.into())
            }
        }
    }
}

/// User-supplied bundler configuration.
#[derive(Debug, Clone, Default)]
pub struct BundlerConfig {
    /// Always replaced by the staged entry file.
    pub input: Option<PathBuf>,
    /// Always replaced by the mode derived from [`TransformOptions::source_maps`].
    pub source_map: Option<SourceMapMode>,
    pub minify: bool,
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl BundlerConfig {
    pub fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Merges this configuration under the transform's own settings.
    ///
    /// User fields are applied first; the staged entry and the source map
    /// mode always win.
    pub fn into_input_options(self, staged: &Path, source_maps: bool) -> InputOptions {
        let source_map = if source_maps {
            SourceMapMode::Inline
        } else {
            SourceMapMode::None
        };
        if let Some(input) = &self.input {
            log::debug!(
                "Configured input {} replaced by {}",
                input.display(),
                staged.display()
            );
        }
        if let Some(mode) = self.source_map.filter(|mode| *mode != source_map) {
            log::debug!("Configured source map {:?} replaced by {:?}", mode, source_map);
        }
        InputOptions {
            input: staged.to_path_buf(),
            source_map,
            minify: self.minify,
            plugins: self.plugins,
        }
    }
}

/// The on-disk form of [`BundlerConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigFile {
    pub input: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_source_map")]
    pub source_map: Option<SourceMapMode>,
    pub minify: bool,
    pub plugins: Vec<PluginSpec>,
}

fn deserialize_source_map<'de, D>(deserializer: D) -> Result<Option<SourceMapMode>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Setting {
        Flag(bool),
        Mode(SourceMapMode),
    }
    Ok(match Option::<Setting>::deserialize(deserializer)? {
        None => None,
        Some(Setting::Flag(false)) => Some(SourceMapMode::None),
        Some(Setting::Flag(true)) => Some(SourceMapMode::Inline),
        Some(Setting::Mode(mode)) => Some(mode),
    })
}

impl From<ConfigFile> for BundlerConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            input: file.input,
            source_map: file.source_map,
            minify: file.minify,
            plugins: file.plugins.into_iter().map(PluginSpec::instantiate).collect(),
        }
    }
}

/// A built-in plugin declared in a configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PluginSpec {
    Replace {
        values: BTreeMap<String, String>,
    },
    Banner {
        #[serde(default)]
        banner: Option<String>,
        #[serde(default)]
        footer: Option<String>,
    },
    Virtual {
        modules: BTreeMap<String, String>,
    },
}

impl PluginSpec {
    pub fn instantiate(self) -> Arc<dyn Plugin> {
        match self {
            PluginSpec::Replace { values } => Arc::new(ReplacePlugin::new(values)),
            PluginSpec::Banner { banner, footer } => Arc::new(BannerPlugin { banner, footer }),
            PluginSpec::Virtual { modules } => Arc::new(VirtualPlugin::new(modules)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_maps_default_on() {
        let opts: TransformOptions = serde_json::from_value(json!({})).unwrap();
        assert!(opts.source_maps);
        assert!(opts.config.is_none());
        assert!(TransformOptions::default().source_maps);
    }

    #[test]
    fn test_only_literal_false_disables_source_maps() {
        for value in [json!(true), json!(0), json!(null), json!("false"), json!({})] {
            let opts: TransformOptions =
                serde_json::from_value(json!({ "sourceMaps": value })).unwrap();
            assert!(opts.source_maps, "{} should request a source map", value);
        }
        let opts: TransformOptions =
            serde_json::from_value(json!({ "sourceMaps": false })).unwrap();
        assert!(!opts.source_maps);
    }

    #[test]
    fn test_config_string_is_path_and_object_is_inline() {
        let opts: TransformOptions =
            serde_json::from_value(json!({ "config": "rollup.config.json" })).unwrap();
        assert!(matches!(opts.config, Some(ConfigSource::Path(p)) if p == Path::new("rollup.config.json")));

        let opts: TransformOptions = serde_json::from_value(json!({
            "config": { "minify": true, "plugins": [{ "type": "replace", "values": { "A": "B" } }] }
        }))
        .unwrap();
        match opts.config {
            Some(ConfigSource::Inline(config)) => {
                assert!(config.minify);
                assert_eq!(config.plugins.len(), 1);
                assert_eq!(config.plugins[0].name(), "replace");
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_unknown_plugin_type_is_rejected() {
        let result: Result<ConfigFile, _> =
            serde_json::from_value(json!({ "plugins": [{ "type": "nope" }] }));
        assert!(result.is_err());
    }

    #[test]
    fn test_source_map_setting_forms() {
        let file: ConfigFile = serde_json::from_value(json!({ "sourceMap": false })).unwrap();
        assert_eq!(file.source_map, Some(SourceMapMode::None));
        let file: ConfigFile = serde_json::from_value(json!({ "sourceMap": "separate" })).unwrap();
        assert_eq!(file.source_map, Some(SourceMapMode::Separate));
        let file: ConfigFile = serde_json::from_value(json!({})).unwrap();
        assert_eq!(file.source_map, None);
    }

    #[test]
    fn test_transform_settings_win_over_user_config() {
        let user = BundlerConfig {
            input: Some(PathBuf::from("/elsewhere/main.js")),
            source_map: Some(SourceMapMode::Separate),
            minify: true,
            plugins: vec![],
        };
        let staged = Path::new("/pkg/index.js.tmp");

        let input = user.clone().into_input_options(staged, true);
        assert_eq!(input.input, staged);
        assert_eq!(input.source_map, SourceMapMode::Inline);
        assert!(input.minify);

        let input = user.into_input_options(staged, false);
        assert_eq!(input.source_map, SourceMapMode::None);
    }

    #[tokio::test]
    async fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollup.config.json");
        std::fs::write(
            &path,
            r#"{ "plugins": [{ "type": "banner", "banner": "/* hi */" }] }"#,
        )
        .unwrap();

        let config = ConfigSource::from(path.as_path()).load().await.unwrap();
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugins[0].name(), "banner");

        let missing = ConfigSource::from(dir.path().join("missing.json"));
        assert!(matches!(missing.load().await, Err(ConfigError::Read { .. })));
    }
}
