//! Module loader for the bundler's module graph.
//!
//! Implements deno_graph's Loader trait on top of the file system, giving
//! plugins the first chance to supply and rewrite every module.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use deno_ast::{EmitOptions, MediaType, SourceMapOption, TranspileModuleOptions, TranspileOptions};
use deno_error::JsErrorBox;
use deno_graph::source::{LoadError, LoadFuture, LoadOptions, LoadResponse, Loader};
use deno_graph::ModuleSpecifier;

use super::resolver::EXTERNAL_SCHEME;
use super::text::{strip_bom, transform_json_source};
use crate::plugin::Plugin;

/// Suffix of the staged entry file written by the transform adapter.
pub(crate) const STAGED_SUFFIX: &str = ".tmp";

/// Loader serving modules from disk or from plugins.
pub struct PluginGraphLoader {
    /// The staged entry file
    entry: ModuleSpecifier,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginGraphLoader {
    pub fn new(entry: ModuleSpecifier, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { entry, plugins }
    }

    /// Loads a module's source, or `None` when it does not exist.
    fn load_module(
        &self,
        specifier: &ModuleSpecifier,
    ) -> anyhow::Result<Option<(String, MediaType)>> {
        let Some(source) = self.read_source(specifier)? else {
            return Ok(None);
        };
        let mut source = strip_bom(&source).to_string();

        for plugin in &self.plugins {
            if let Some(code) = plugin.transform(&source, specifier).with_context(|| {
                format!("Plugin `{}` failed to transform {}", plugin.name(), specifier)
            })? {
                source = code;
            }
        }

        let media_type = media_type_for(specifier);
        match media_type {
            MediaType::JavaScript | MediaType::Mjs | MediaType::Cjs => Ok(Some((source, media_type))),
            // Served as a module so it can be imported without an import attribute
            MediaType::Json => Ok(Some((transform_json_source(&source), MediaType::JavaScript))),
            _ => {
                let code = transpile(specifier, source, media_type)?;
                Ok(Some((code, MediaType::JavaScript)))
            }
        }
    }

    fn read_source(&self, specifier: &ModuleSpecifier) -> anyhow::Result<Option<String>> {
        for plugin in &self.plugins {
            if let Some(code) = plugin.load(specifier).with_context(|| {
                format!("Plugin `{}` failed to load {}", plugin.name(), specifier)
            })? {
                return Ok(Some(code));
            }
        }

        if specifier.scheme() != "file" {
            return Ok(None);
        }
        let path = specifier
            .to_file_path()
            .map_err(|_| anyhow!("Invalid file URL: {}", specifier))?;
        match std::fs::read_to_string(&path) {
            Ok(source) => Ok(Some(source)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if *specifier == self.entry {
                    Err(anyhow!("Staged entry {} disappeared before bundling", path.display()))
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(e).with_context(|| format!("Unable to read {}", path.display())),
        }
    }
}

impl Loader for PluginGraphLoader {
    fn load(&self, specifier: &ModuleSpecifier, _options: LoadOptions) -> LoadFuture {
        let specifier = specifier.clone();
        if specifier.scheme() == EXTERNAL_SCHEME {
            return Box::pin(async move { Ok(Some(LoadResponse::External { specifier })) });
        }
        let result = self.load_module(&specifier);

        Box::pin(async move {
            match result {
                Ok(Some((content, media_type))) => {
                    // Provide content-type header so deno_graph does not guess from
                    // the staged entry's `.tmp` extension
                    let mut headers = HashMap::new();
                    headers.insert("content-type".to_string(), content_type(media_type).to_string());

                    Ok(Some(LoadResponse::Module {
                        specifier,
                        maybe_headers: Some(headers),
                        content: Arc::from(content.into_bytes()),
                        mtime: None,
                    }))
                }
                Ok(None) => Ok(None),
                Err(e) => Err(LoadError::Other(Arc::new(JsErrorBox::generic(format!(
                    "{:#}",
                    e
                ))))),
            }
        })
    }
}

/// Media type of a module, looking through the staged entry's `.tmp` suffix.
///
/// `.es` and `.es6` are JavaScript; anything unrecognised is treated as
/// JavaScript too.
pub fn media_type_for(specifier: &ModuleSpecifier) -> MediaType {
    let name = specifier.path().rsplit('/').next().unwrap_or("");
    let name = name.strip_suffix(STAGED_SUFFIX).unwrap_or(name);
    let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext {
        "jsx" => MediaType::Jsx,
        "mjs" => MediaType::Mjs,
        "cjs" => MediaType::Cjs,
        "json" => MediaType::Json,
        "ts" => MediaType::TypeScript,
        "mts" => MediaType::Mts,
        "cts" => MediaType::Cts,
        "tsx" => MediaType::Tsx,
        _ => MediaType::JavaScript,
    }
}

fn content_type(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Json => "application/json",
        _ => "application/javascript",
    }
}

/// Transpiles JSX and TypeScript sources down to JavaScript.
fn transpile(
    specifier: &ModuleSpecifier,
    source: String,
    media_type: MediaType,
) -> anyhow::Result<String> {
    let parsed = deno_ast::parse_module(deno_ast::ParseParams {
        specifier: specifier.clone(),
        text: source.into(),
        media_type,
        capture_tokens: false,
        scope_analysis: false,
        maybe_syntax: None,
    })
    .with_context(|| format!("Unable to parse {}", specifier))?;

    let emitted = parsed
        .transpile(
            &TranspileOptions::default(),
            &TranspileModuleOptions::default(),
            &EmitOptions {
                source_map: SourceMapOption::None,
                ..Default::default()
            },
        )
        .with_context(|| format!("Unable to transpile {}", specifier))?
        .into_source();

    Ok(emitted.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specifier(s: &str) -> ModuleSpecifier {
        ModuleSpecifier::parse(s).unwrap()
    }

    #[test]
    fn test_media_type_looks_through_staged_suffix() {
        assert_eq!(
            media_type_for(&specifier("file:///pkg/view.jsx.tmp")),
            MediaType::Jsx
        );
        assert_eq!(
            media_type_for(&specifier("file:///pkg/index.js.tmp")),
            MediaType::JavaScript
        );
    }

    #[test]
    fn test_media_type_es_extensions_are_javascript() {
        assert_eq!(media_type_for(&specifier("file:///pkg/a.es")), MediaType::JavaScript);
        assert_eq!(media_type_for(&specifier("file:///pkg/a.es6")), MediaType::JavaScript);
        assert_eq!(media_type_for(&specifier("file:///pkg/data.json")), MediaType::Json);
        assert_eq!(media_type_for(&specifier("virtual:answer")), MediaType::JavaScript);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let loader = PluginGraphLoader::new(specifier("file:///nonexistent/index.js.tmp"), vec![]);
        let loaded = loader
            .load_module(&specifier("file:///nonexistent/other.js"))
            .unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_json_is_served_as_javascript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{ "a": 1 }"#).unwrap();
        let entry = ModuleSpecifier::from_file_path(dir.path().join("index.js.tmp")).unwrap();
        let loader = PluginGraphLoader::new(entry, vec![]);

        let (code, media_type) = loader
            .load_module(&ModuleSpecifier::from_file_path(&path).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(media_type, MediaType::JavaScript);
        assert!(code.starts_with("export default JSON.parse("));
    }

    #[test]
    fn test_missing_entry_is_an_error() {
        let entry = specifier("file:///nonexistent/index.js.tmp");
        let loader = PluginGraphLoader::new(entry.clone(), vec![]);
        assert!(loader.load_module(&entry).is_err());
    }
}
