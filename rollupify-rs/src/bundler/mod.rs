//! Sub-bundling operation used by the transform adapter.
//!
//! The adapter only talks to the [`Bundler`] trait. [`SwcBundler`] is the
//! default implementation:
//! 1. Building a module graph from the staged entry file with deno_graph
//! 2. Loading, transforming and (for JSX) transpiling modules through plugins
//! 3. Bundling into a single module with the SWC bundler and rendering it in
//!    the requested output format
//!
//! # Architecture
//!
//! - `loader`: Implements `deno_graph::source::Loader` on top of the file system and plugins
//! - `resolver`: Implements `deno_graph::source::Resolver` with extension probing;
//!   bare package imports are left external
//! - `bundle_hook`: Handles `import.meta` rewriting during bundling
//! - `cjs`: Rewrites the bundled ES module's imports and exports into CommonJS
//! - `emit`: Core bundling logic using SWC bundler
//! - `text`: Utility functions for text processing

mod bundle_hook;
mod cjs;
mod emit;
mod loader;
mod resolver;
mod text;

use std::path::PathBuf;
use std::sync::Arc;

use deno_graph::{ModuleGraph, ModuleSpecifier};
use serde::{Deserialize, Serialize};

use crate::plugin::Plugin;

pub use emit::bundle_graph;
pub use loader::media_type_for;
pub(crate) use loader::STAGED_SUFFIX;

/// How the source map of a bundle is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMapMode {
    /// No source map is generated.
    None,
    /// The map is appended to the code as a base64 `sourceMappingURL` comment.
    Inline,
    /// The map is returned next to the code in [`BundleEmit::maybe_map`].
    Separate,
}

/// The module format of the generated chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Synchronous `require`/`module.exports` module.
    #[default]
    Cjs,
    /// A single flattened ES module, external imports kept as they are.
    Es,
}

/// Options describing what to bundle.
#[derive(Clone)]
pub struct InputOptions {
    /// Entry point on disk.
    pub input: PathBuf,
    pub source_map: SourceMapMode,
    pub minify: bool,
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl std::fmt::Debug for InputOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputOptions")
            .field("input", &self.input)
            .field("source_map", &self.source_map)
            .field("minify", &self.minify)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Options describing how to render a bundle.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    pub format: OutputFormat,
}

/// The result of a bundle operation.
#[derive(Debug)]
pub struct BundleEmit {
    /// The bundled JavaScript code.
    pub code: String,
    /// The source map, only present for [`SourceMapMode::Separate`].
    pub maybe_map: Option<String>,
}

/// The sub-bundling operation.
///
/// Implementations are called from a blocking worker thread, one call per
/// transform session, and must not keep state between calls.
pub trait Bundler: Send + Sync {
    fn bundle(&self, input: InputOptions, output: &OutputOptions) -> anyhow::Result<BundleEmit>;
}

/// Default [`Bundler`] built on deno_graph and the SWC bundler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwcBundler;

impl Bundler for SwcBundler {
    fn bundle(&self, input: InputOptions, output: &OutputOptions) -> anyhow::Result<BundleEmit> {
        let entry = ModuleSpecifier::from_file_path(&input.input)
            .map_err(|_| anyhow::anyhow!("Entry is not an absolute path: {:?}", input.input))?;
        let graph = futures::executor::block_on(build_graph(entry, &input.plugins))?;
        bundle_graph(&graph, &input, output)
    }
}

/// Builds and validates the module graph rooted at `entry`.
async fn build_graph(
    entry: ModuleSpecifier,
    plugins: &[Arc<dyn Plugin>],
) -> anyhow::Result<ModuleGraph> {
    let loader = loader::PluginGraphLoader::new(entry.clone(), plugins.to_vec());
    let resolver = resolver::PluginResolver::new(plugins.to_vec());

    let mut graph = ModuleGraph::new(deno_graph::GraphKind::CodeOnly);
    graph
        .build(
            vec![entry.clone()],
            vec![], // No additional imports
            &loader,
            deno_graph::BuildOptions {
                resolver: Some(resolver.as_resolver()),
                ..Default::default()
            },
        )
        .await;

    graph
        .valid()
        .map_err(|e| anyhow::anyhow!("Unable to build module graph for {}: {}", entry, e))?;
    Ok(graph)
}
