//! Import resolution for the bundler's module graph.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use deno_error::JsErrorBox;
use deno_graph::source::{ResolutionKind, ResolveError, Resolver};
use deno_graph::{ModuleSpecifier, Range, SpecifierError};

use crate::plugin::Plugin;

/// Scheme of package imports left for the host's `require` to resolve.
pub(crate) const EXTERNAL_SCHEME: &str = "external";

/// Extensions tried, in order, for an import written without one.
const PROBE_EXTENSIONS: &[&str] = &["js", "es6", "es", "jsx", "mjs", "json"];

#[derive(Debug)]
pub struct PluginResolver {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginResolver {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn as_resolver(&self) -> &dyn Resolver {
        self
    }
}

impl Resolver for PluginResolver {
    fn resolve(
        &self,
        specifier: &str,
        referrer_range: &Range,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, ResolveError> {
        let referrer = &referrer_range.specifier;
        for plugin in &self.plugins {
            match plugin.resolve_id(specifier, referrer) {
                Ok(Some(resolved)) => return Ok(resolved),
                Ok(None) => {}
                Err(e) => {
                    return Err(ResolveError::Other(JsErrorBox::generic(format!(
                        "Plugin `{}` failed to resolve \"{}\" from \"{}\": {:#}",
                        plugin.name(),
                        specifier,
                        referrer,
                        e
                    ))))
                }
            }
        }

        let resolved = match deno_graph::resolve_import(specifier, referrer) {
            Ok(resolved) => resolved,
            Err(SpecifierError::ImportPrefixMissing { .. }) => {
                log::warn!(
                    "Treating \"{}\" imported from {} as an external dependency",
                    specifier,
                    referrer
                );
                return external_specifier(specifier);
            }
            Err(e) => return Err(e.into()),
        };
        if resolved.scheme() != "file" {
            return Ok(resolved);
        }
        let probed = resolved
            .to_file_path()
            .ok()
            .and_then(|path| probe(&path))
            .and_then(|path| ModuleSpecifier::from_file_path(path).ok());
        Ok(probed.unwrap_or(resolved))
    }
}

fn external_specifier(specifier: &str) -> Result<ModuleSpecifier, ResolveError> {
    ModuleSpecifier::parse(&format!("{}:{}", EXTERNAL_SCHEME, specifier))
        .map_err(|e| ResolveError::Specifier(SpecifierError::InvalidUrl(e)))
}

/// Finds the file an extensionless or directory import refers to.
fn probe(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let file_name = path.file_name()?.to_string_lossy().into_owned();
    PROBE_EXTENSIONS
        .iter()
        .map(|ext| path.with_file_name(format!("{}.{}", file_name, ext)))
        .chain(std::iter::once(path.join("index.js")))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deno_graph::PositionRange;

    fn range(referrer: &ModuleSpecifier) -> Range {
        Range {
            specifier: referrer.clone(),
            range: PositionRange::zeroed(),
            resolution_mode: None,
        }
    }

    #[test]
    fn test_bare_specifier_is_external() {
        let referrer = ModuleSpecifier::parse("file:///pkg/index.js.tmp").unwrap();
        let resolver = PluginResolver::new(vec![]);

        let resolved = resolver
            .resolve("lodash/fp", &range(&referrer), ResolutionKind::Execution)
            .unwrap();
        assert_eq!(resolved.as_str(), "external:lodash/fp");

        let relative = resolver
            .resolve("./missing", &range(&referrer), ResolutionKind::Execution)
            .unwrap();
        assert_eq!(relative.as_str(), "file:///pkg/missing");
    }

    #[test]
    fn test_probe_prefers_exact_then_extensions_then_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("foo.es6"), "").unwrap();
        std::fs::write(dir.path().join("foo.jsx"), "").unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib").join("index.js"), "").unwrap();

        assert_eq!(probe(&dir.path().join("foo")), Some(dir.path().join("foo.es6")));
        assert_eq!(
            probe(&dir.path().join("foo.jsx")),
            Some(dir.path().join("foo.jsx"))
        );
        assert_eq!(
            probe(&dir.path().join("lib")),
            Some(dir.path().join("lib").join("index.js"))
        );
        assert_eq!(probe(&dir.path().join("missing")), None);
    }
}
