//! Extension points forwarded to the sub-bundler.
//!
//! The transform adapter never looks inside a plugin; it only carries the
//! list from the user's configuration into [`crate::bundler::InputOptions`].

use std::collections::BTreeMap;
use std::fmt::Debug;

pub use deno_graph::ModuleSpecifier;

/// Scheme used for modules served by [`VirtualPlugin`].
pub const VIRTUAL_SCHEME: &str = "virtual";

/// A bundler plugin.
///
/// Every hook returns `Ok(None)` to defer to the next plugin, or to the
/// bundler's default behavior when no plugin handles it.
pub trait Plugin: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Resolves `specifier` imported from `referrer` to a module URL.
    fn resolve_id(
        &self,
        _specifier: &str,
        _referrer: &ModuleSpecifier,
    ) -> anyhow::Result<Option<ModuleSpecifier>> {
        Ok(None)
    }

    /// Supplies the source of a module instead of reading it from disk.
    fn load(&self, _specifier: &ModuleSpecifier) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    /// Rewrites the source of a loaded module.
    fn transform(
        &self,
        _code: &str,
        _specifier: &ModuleSpecifier,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    /// Rewrites the rendered chunk before its source map comment is attached.
    fn render_chunk(&self, _code: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Replaces literal strings in every module's source.
#[derive(Debug, Clone)]
pub struct ReplacePlugin {
    // Longest key first so that overlapping keys behave predictably.
    values: Vec<(String, String)>,
}

impl ReplacePlugin {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        let mut values: Vec<_> = values.into_iter().filter(|(k, _)| !k.is_empty()).collect();
        values.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self { values }
    }
}

impl Plugin for ReplacePlugin {
    fn name(&self) -> &str {
        "replace"
    }

    fn transform(&self, code: &str, _specifier: &ModuleSpecifier) -> anyhow::Result<Option<String>> {
        if !self.values.iter().any(|(from, _)| code.contains(from.as_str())) {
            return Ok(None);
        }
        let mut out = String::with_capacity(code.len());
        let mut rest = code;
        'outer: while !rest.is_empty() {
            for (from, to) in &self.values {
                if let Some(tail) = rest.strip_prefix(from.as_str()) {
                    out.push_str(to);
                    rest = tail;
                    continue 'outer;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
        Ok(Some(out))
    }
}

/// Adds fixed text before and after the rendered chunk.
#[derive(Debug, Clone, Default)]
pub struct BannerPlugin {
    pub banner: Option<String>,
    pub footer: Option<String>,
}

impl Plugin for BannerPlugin {
    fn name(&self) -> &str {
        "banner"
    }

    fn render_chunk(&self, code: &str) -> anyhow::Result<Option<String>> {
        if self.banner.is_none() && self.footer.is_none() {
            return Ok(None);
        }
        let mut out = String::new();
        if let Some(banner) = &self.banner {
            out.push_str(banner);
            out.push('\n');
        }
        out.push_str(code);
        if let Some(footer) = &self.footer {
            if !code.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(footer);
            out.push('\n');
        }
        Ok(Some(out))
    }
}

/// Serves in-memory modules under bare ids.
#[derive(Debug, Clone)]
pub struct VirtualPlugin {
    modules: BTreeMap<String, String>,
}

impl VirtualPlugin {
    pub fn new(modules: BTreeMap<String, String>) -> Self {
        Self { modules }
    }

    fn specifier_for(id: &str) -> anyhow::Result<ModuleSpecifier> {
        Ok(ModuleSpecifier::parse(&format!("{}:{}", VIRTUAL_SCHEME, id))?)
    }
}

impl Plugin for VirtualPlugin {
    fn name(&self) -> &str {
        "virtual"
    }

    fn resolve_id(
        &self,
        specifier: &str,
        _referrer: &ModuleSpecifier,
    ) -> anyhow::Result<Option<ModuleSpecifier>> {
        if self.modules.contains_key(specifier) {
            Self::specifier_for(specifier).map(Some)
        } else {
            Ok(None)
        }
    }

    fn load(&self, specifier: &ModuleSpecifier) -> anyhow::Result<Option<String>> {
        if specifier.scheme() != VIRTUAL_SCHEME {
            return Ok(None);
        }
        Ok(self.modules.get(specifier.path()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specifier() -> ModuleSpecifier {
        ModuleSpecifier::parse("file:///pkg/index.js").unwrap()
    }

    #[test]
    fn test_replace_prefers_longest_key() {
        let plugin = ReplacePlugin::new(BTreeMap::from([
            ("__A__".to_string(), "1".to_string()),
            ("__A__B".to_string(), "2".to_string()),
        ]));
        let out = plugin.transform("x(__A__B, __A__)", &specifier()).unwrap();
        assert_eq!(out.as_deref(), Some("x(2, 1)"));
    }

    #[test]
    fn test_replace_without_match_defers() {
        let plugin = ReplacePlugin::new(BTreeMap::from([(
            "__NOPE__".to_string(),
            "1".to_string(),
        )]));
        assert!(plugin.transform("let a = 1;", &specifier()).unwrap().is_none());
    }

    #[test]
    fn test_replace_handles_multibyte_text() {
        let plugin = ReplacePlugin::new(BTreeMap::from([("é".to_string(), "e".to_string())]));
        let out = plugin.transform("\"café ü\"", &specifier()).unwrap();
        assert_eq!(out.as_deref(), Some("\"cafe ü\""));
    }

    #[test]
    fn test_banner_wraps_chunk() {
        let plugin = BannerPlugin {
            banner: Some("/* top */".to_string()),
            footer: Some("/* bottom */".to_string()),
        };
        let out = plugin.render_chunk("a();").unwrap().unwrap();
        assert_eq!(out, "/* top */\na();\n/* bottom */\n");
    }

    #[test]
    fn test_virtual_resolves_and_loads() {
        let plugin = VirtualPlugin::new(BTreeMap::from([(
            "answer".to_string(),
            "export default 42;".to_string(),
        )]));
        let resolved = plugin.resolve_id("answer", &specifier()).unwrap().unwrap();
        assert_eq!(resolved.as_str(), "virtual:answer");
        assert_eq!(
            plugin.load(&resolved).unwrap().as_deref(),
            Some("export default 42;")
        );
        assert!(plugin.resolve_id("other", &specifier()).unwrap().is_none());
        assert!(plugin.load(&specifier()).unwrap().is_none());
    }
}
