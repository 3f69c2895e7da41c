//! Core bundling logic using SWC bundler.
//!
//! Bundles a validated module graph into one module, renders it in the
//! requested [`OutputFormat`] and attaches the source map.

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context};
use base64::Engine;
use deno_ast::swc;
use deno_ast::swc::ast::{Expr, ExprStmt, Lit, ModuleItem, Stmt, Str};
use deno_ast::swc::atoms::Atom;
use deno_ast::swc::bundler::{
    Bundler, Config as BundlerConfig, Load, ModuleData, ModuleType, Resolve,
};
use deno_ast::swc::codegen::text_writer::JsWriter;
use deno_ast::swc::codegen::{Config as CodegenConfig, Emitter};
use deno_ast::swc::common::comments::SingleThreadedComments;
use deno_ast::swc::common::{FileName, Globals, DUMMY_SP, GLOBALS};
use deno_ast::swc::loader::resolve::Resolution;
use deno_ast::swc::parser::lexer::Lexer;
use deno_ast::swc::parser::{Parser, StringInput};
use deno_ast::{get_syntax, MediaType, SourceMap};
use deno_graph::{Module, ModuleGraph, ModuleSpecifier};

use super::bundle_hook::BundleHook;
use super::cjs;
use super::text::{strip_bom, transform_json_source};
use super::{BundleEmit, InputOptions, OutputFormat, OutputOptions, SourceMapMode};

/// Bundles a module graph into a single JavaScript chunk.
pub fn bundle_graph(
    graph: &ModuleGraph,
    input: &InputOptions,
    output: &OutputOptions,
) -> anyhow::Result<BundleEmit> {
    let globals = Globals::new();

    GLOBALS.set(&globals, || {
        let cm = SourceMap::default();

        let bundle_loader = SWCBundleLoader { graph, cm: &cm };
        let bundle_resolver = SWCBundleResolver { graph };

        // This hook rewrites `import.meta` so the chunk is valid outside an ES module.
        let hook = Box::new(BundleHook);

        let external_modules = external_imports(graph);

        let config = BundlerConfig {
            module: ModuleType::Es,
            external_modules,
            ..Default::default()
        };

        let mut bundler = Bundler::new(
            &globals,
            cm.inner().clone(),
            bundle_loader,
            bundle_resolver,
            config,
            hook,
        );

        let mut entries = HashMap::new();
        if let Some(root) = graph.roots.first() {
            entries.insert("bundle".to_string(), FileName::Url(root.clone()));
        } else {
            bail!("No root module in graph");
        }

        let mut bundles = bundler
            .bundle(entries)
            .context("Unable to output during bundling")?;
        if bundles.is_empty() {
            bail!("Bundler produced no output");
        }
        let mut module = bundles.swap_remove(0).module;

        let footer = if output.format == OutputFormat::Cjs {
            let footer = cjs::to_commonjs(&mut module)?;
            module.body.insert(0, use_strict());
            footer
        } else {
            cjs::Footer::default()
        };

        let mut buf = Vec::new();
        let mut srcmap = Vec::new();
        {
            let cfg = CodegenConfig::default()
                .with_minify(input.minify)
                .with_target(deno_ast::ES_VERSION)
                .with_omit_last_semi(false);

            let mut emitter = Emitter {
                cfg,
                cm: cm.inner().clone(),
                comments: None,
                wr: Box::new(JsWriter::new(
                    cm.inner().clone(),
                    "\n",
                    &mut buf,
                    Some(&mut srcmap),
                )),
            };
            emitter
                .emit_module(&module)
                .context("Unable to emit during bundling.")?;
        }

        let mut code = String::from_utf8(buf).context("Emitted code is an invalid string.")?;
        if !code.ends_with('\n') {
            code.push('\n');
        }
        code.push_str(&cjs::render_footer(&footer));

        for plugin in &input.plugins {
            if let Some(rendered) = plugin
                .render_chunk(&code)
                .with_context(|| format!("Plugin `{}` failed to render chunk", plugin.name()))?
            {
                code = rendered;
            }
        }

        let mut maybe_map = None;
        if input.source_map != SourceMapMode::None {
            let source_map_config = deno_ast::SourceMapConfig {
                inline_sources: true,
                maybe_base: None,
            };
            let mut map = Vec::new();
            cm.inner()
                .build_source_map(&srcmap, None, source_map_config)
                .to_writer(&mut map)?;
            match input.source_map {
                SourceMapMode::Inline => {
                    if !code.ends_with('\n') {
                        code.push('\n');
                    }
                    code.push_str("//# sourceMappingURL=data:application/json;base64,");
                    base64::prelude::BASE64_STANDARD.encode_string(map, &mut code);
                }
                SourceMapMode::Separate => {
                    maybe_map = Some(String::from_utf8(map)?);
                }
                SourceMapMode::None => {}
            }
        }

        Ok(BundleEmit { code, maybe_map })
    })
}

/// Import specifiers, as written, that resolved to external packages.
///
/// The SWC bundler keeps imports whose text matches one of these.
fn external_imports(graph: &ModuleGraph) -> Vec<Atom> {
    let mut names: Vec<Atom> = Vec::new();
    for module in graph.modules() {
        let Module::Js(module) = module else {
            continue;
        };
        for (text, dependency) in &module.dependencies {
            let is_external = dependency
                .maybe_code
                .maybe_specifier()
                .is_some_and(|s| matches!(graph.get(s), Some(Module::External(_))));
            if is_external && !names.iter().any(|name| name.as_str() == text.as_str()) {
                names.push(text.as_str().into());
            }
        }
    }
    names
}

/// `"use strict";` as the chunk's first statement.
fn use_strict() -> ModuleItem {
    ModuleItem::Stmt(Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(Expr::Lit(Lit::Str(Str {
            span: DUMMY_SP,
            value: "use strict".into(),
            raw: None,
        }))),
    }))
}

/// SWC bundler Load trait implementation that loads modules from the graph.
struct SWCBundleLoader<'a> {
    graph: &'a ModuleGraph,
    cm: &'a SourceMap,
}

impl Load for SWCBundleLoader<'_> {
    fn load(&self, file: &FileName) -> Result<ModuleData, anyhow::Error> {
        let specifier = match file {
            FileName::Url(url) => url,
            _ => bail!("Unsupported file name: {:?}", file),
        };

        let (source, media_type) = match self.graph.get(specifier) {
            Some(Module::Js(m)) => (m.source.text.as_ref(), m.media_type),
            Some(Module::Json(m)) => (m.source.text.as_ref(), m.media_type),
            Some(Module::Npm(_) | Module::Node(_) | Module::External(_) | Module::Wasm(_)) => {
                bail!("Module \"{}\" was an unsupported module kind.", specifier)
            }
            None => bail!("Module \"{}\" unexpectedly missing when bundling.", specifier),
        };

        let (fm, module) = parse_module(specifier, source, media_type, self.cm)?;

        Ok(ModuleData {
            fm,
            module,
            helpers: Default::default(),
        })
    }
}

/// SWC bundler Resolve trait implementation that resolves specifiers using the graph.
struct SWCBundleResolver<'a> {
    graph: &'a ModuleGraph,
}

impl Resolve for SWCBundleResolver<'_> {
    fn resolve(&self, base: &FileName, module_specifier: &str) -> Result<Resolution, anyhow::Error> {
        let base_specifier = match base {
            FileName::Url(url) => url,
            _ => bail!("Unsupported base file name: {:?}", base),
        };

        // The graph recorded what our resolver chose while it was built
        let resolved = self
            .graph
            .resolve_dependency(module_specifier, base_specifier, false)
            .ok_or_else(|| {
                anyhow!(
                    "Cannot resolve \"{}\" from \"{}\".",
                    module_specifier,
                    base_specifier
                )
            })?;

        Ok(Resolution {
            filename: FileName::Url(resolved.clone()),
            slug: None,
        })
    }
}

/// Parses a graph module into an SWC AST.
///
/// Sources in the graph are already JavaScript (or JSON); the loader
/// transpiled everything else.
fn parse_module(
    specifier: &ModuleSpecifier,
    source: &str,
    media_type: MediaType,
    cm: &SourceMap,
) -> anyhow::Result<(Rc<swc::common::SourceFile>, swc::ast::Module)> {
    let source = strip_bom(source);
    let source = if media_type == MediaType::Json {
        transform_json_source(source)
    } else {
        source.to_string()
    };

    let source_file = cm.new_source_file(specifier.clone(), source);
    let input = StringInput::from(&*source_file);
    let comments = SingleThreadedComments::default();
    let lexer = Lexer::new(
        get_syntax(MediaType::JavaScript),
        deno_ast::ES_VERSION,
        input,
        Some(&comments),
    );
    let mut parser = Parser::new_from(lexer);

    let module = parser
        .parse_module()
        .map_err(|e| anyhow!("Unable to parse \"{}\": {:?}", specifier, e.kind()))?;

    Ok((source_file, module))
}
