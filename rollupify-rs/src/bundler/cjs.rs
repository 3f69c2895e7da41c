//! Rewrites a flattened ES module into a CommonJS chunk.
//!
//! Export keywords are stripped from the module body and the exported
//! bindings are assigned in a footer rendered after code generation.
//! Imports of external packages become `require` calls.

use std::collections::HashSet;

use anyhow::bail;
use deno_ast::swc::ast::{
    BindingIdent, CallExpr, Callee, ClassDecl, ClassExpr, ComputedPropName, Decl, DefaultDecl,
    ExportDecl, ExportDefaultDecl, ExportDefaultExpr, ExportSpecifier, Expr, ExprOrSpread,
    ExprStmt, FnDecl, FnExpr, Ident, IdentName, ImportDecl, ImportSpecifier, Lit, MemberExpr,
    MemberProp, Module, ModuleDecl, ModuleExportName, ModuleItem, NamedExport, ObjectPatProp, Pat,
    Stmt, Str, VarDecl, VarDeclKind, VarDeclarator,
};
use deno_ast::swc::common::{Span, SyntaxContext};

use super::text::property_access;

const DEFAULT_EXPORT: &str = "default";
const DEFAULT_LOCAL: &str = "_default";
const INTEROP_HELPER: &str = "_interopDefault";

/// One exported binding: `exports[exported] = local`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub exported: String,
    pub local: String,
}

/// What has to be rendered after the module body.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Footer {
    pub exports: Vec<Export>,
    /// Name of the default-import interop helper, if any import needs it.
    pub interop: Option<String>,
}

/// Rewrites the module declarations of `module` into CommonJS.
pub fn to_commonjs(module: &mut Module) -> anyhow::Result<Footer> {
    let mut taken = top_level_names(module);
    let mut exports = Vec::new();
    let mut interop = None;
    let mut body = Vec::with_capacity(module.body.len());

    for item in std::mem::take(&mut module.body) {
        let decl = match item {
            ModuleItem::Stmt(stmt) => {
                body.push(ModuleItem::Stmt(stmt));
                continue;
            }
            ModuleItem::ModuleDecl(decl) => decl,
        };

        match decl {
            ModuleDecl::ExportDecl(ExportDecl { decl, .. }) => {
                let mut names = Vec::new();
                match &decl {
                    Decl::Fn(f) => names.push(f.ident.sym.to_string()),
                    Decl::Class(c) => names.push(c.ident.sym.to_string()),
                    Decl::Var(var) => {
                        for declarator in &var.decls {
                            collect_bindings(&declarator.name, &mut names);
                        }
                    }
                    _ => bail!("Unsupported export declaration in bundle"),
                }
                exports.extend(names.into_iter().map(|name| Export {
                    exported: name.clone(),
                    local: name,
                }));
                body.push(ModuleItem::Stmt(Stmt::Decl(decl)));
            }
            ModuleDecl::ExportNamed(NamedExport {
                specifiers, src, ..
            }) => {
                if src.is_some() {
                    bail!("Re-export from an external module cannot be converted to CommonJS");
                }
                for specifier in specifiers {
                    let ExportSpecifier::Named(named) = specifier else {
                        bail!("Unsupported export specifier in bundle");
                    };
                    let local = export_name(&named.orig)?;
                    let exported = match &named.exported {
                        Some(name) => export_name(name)?,
                        None => local.clone(),
                    };
                    exports.push(Export { exported, local });
                }
            }
            ModuleDecl::ExportDefaultExpr(ExportDefaultExpr { span, expr }) => {
                let local = match &*expr {
                    Expr::Ident(ident) => ident.sym.to_string(),
                    _ => {
                        let local = fresh_name(DEFAULT_LOCAL, &mut taken);
                        body.push(var_binding(&local, expr, span));
                        local
                    }
                };
                exports.push(Export {
                    exported: DEFAULT_EXPORT.to_string(),
                    local,
                });
            }
            ModuleDecl::ExportDefaultDecl(ExportDefaultDecl { span, decl }) => {
                let local = match decl {
                    DefaultDecl::Fn(FnExpr {
                        ident: Some(ident),
                        function,
                    }) => {
                        let local = ident.sym.to_string();
                        body.push(ModuleItem::Stmt(Stmt::Decl(Decl::Fn(FnDecl {
                            ident,
                            declare: false,
                            function,
                        }))));
                        local
                    }
                    DefaultDecl::Class(ClassExpr {
                        ident: Some(ident),
                        class,
                    }) => {
                        let local = ident.sym.to_string();
                        body.push(ModuleItem::Stmt(Stmt::Decl(Decl::Class(ClassDecl {
                            ident,
                            declare: false,
                            class,
                        }))));
                        local
                    }
                    DefaultDecl::Fn(fn_expr) => {
                        let local = fresh_name(DEFAULT_LOCAL, &mut taken);
                        body.push(var_binding(&local, Box::new(Expr::Fn(fn_expr)), span));
                        local
                    }
                    DefaultDecl::Class(class_expr) => {
                        let local = fresh_name(DEFAULT_LOCAL, &mut taken);
                        body.push(var_binding(&local, Box::new(Expr::Class(class_expr)), span));
                        local
                    }
                    _ => continue,
                };
                exports.push(Export {
                    exported: DEFAULT_EXPORT.to_string(),
                    local,
                });
            }
            ModuleDecl::ExportAll(_) => {
                bail!("`export *` from an external module cannot be converted to CommonJS")
            }
            ModuleDecl::Import(import) => {
                if !import.type_only {
                    body.extend(require_import(import, &mut interop, &mut taken));
                }
            }
            _ => bail!("Unsupported module declaration in bundle"),
        }
    }

    module.body = body;
    Ok(Footer { exports, interop })
}

/// Renders the helper and the statements assigning `exports`.
pub fn render_footer(footer: &Footer) -> String {
    let mut out = String::new();
    if let Some(helper) = &footer.interop {
        out.push_str(&format!(
            "function {}(e) {{ return e && typeof e === 'object' && 'default' in e ? e['default'] : e; }}\n",
            helper
        ));
    }
    match footer.exports.as_slice() {
        [] => {}
        [only] if only.exported == DEFAULT_EXPORT => {
            out.push_str(&format!("module.exports = {};\n", only.local));
        }
        exports => {
            out.push_str("Object.defineProperty(exports, '__esModule', { value: true });\n");
            for export in exports {
                out.push_str(&format!(
                    "{} = {};\n",
                    property_access("exports", &export.exported),
                    export.local
                ));
            }
        }
    }
    out
}

/// `import a, { b as c } from 'pkg'` becomes
/// `var a = _interopDefault(require('pkg')); var c = require('pkg').b;`.
fn require_import(
    import: ImportDecl,
    interop: &mut Option<String>,
    taken: &mut HashSet<String>,
) -> Vec<ModuleItem> {
    let span = import.span;
    let src = import.src.value.to_atom_lossy().to_string();

    if import.specifiers.is_empty() {
        return vec![ModuleItem::Stmt(Stmt::Expr(ExprStmt {
            span,
            expr: Box::new(require_call(&src, span)),
        }))];
    }

    let mut items = Vec::with_capacity(import.specifiers.len());
    for specifier in import.specifiers {
        let (local, init) = match specifier {
            ImportSpecifier::Default(default) => {
                let helper = interop
                    .get_or_insert_with(|| fresh_name(INTEROP_HELPER, taken))
                    .clone();
                (default.local, call(&helper, require_call(&src, span), span))
            }
            ImportSpecifier::Namespace(namespace) => (namespace.local, require_call(&src, span)),
            ImportSpecifier::Named(named) => {
                if named.is_type_only {
                    continue;
                }
                let prop = match named.imported {
                    Some(ModuleExportName::Str(name)) => MemberProp::Computed(ComputedPropName {
                        span,
                        expr: Box::new(Expr::Lit(Lit::Str(name))),
                    }),
                    Some(ModuleExportName::Ident(name)) => {
                        MemberProp::Ident(IdentName::new(name.sym, span))
                    }
                    None => MemberProp::Ident(IdentName::new(named.local.sym.clone(), span)),
                };
                let member = Expr::Member(MemberExpr {
                    span,
                    obj: Box::new(require_call(&src, span)),
                    prop,
                });
                (named.local, member)
            }
        };
        items.push(var_decl(
            Pat::Ident(BindingIdent::from(local)),
            Box::new(init),
            span,
        ));
    }
    items
}

fn require_call(src: &str, span: Span) -> Expr {
    let arg = Expr::Lit(Lit::Str(Str {
        span,
        value: src.into(),
        raw: None,
    }));
    call("require", arg, span)
}

fn call(callee: &str, arg: Expr, span: Span) -> Expr {
    Expr::Call(CallExpr {
        span,
        ctxt: SyntaxContext::empty(),
        callee: Callee::Expr(Box::new(Expr::Ident(Ident::new_no_ctxt(callee.into(), span)))),
        args: vec![ExprOrSpread {
            spread: None,
            expr: Box::new(arg),
        }],
        type_args: None,
    })
}

fn export_name(name: &ModuleExportName) -> anyhow::Result<String> {
    match name {
        ModuleExportName::Ident(ident) => Ok(ident.sym.to_string()),
        _ => bail!("String export names are not supported in CommonJS output"),
    }
}

fn collect_bindings(pat: &Pat, names: &mut Vec<String>) {
    match pat {
        Pat::Ident(binding) => names.push(binding.id.sym.to_string()),
        Pat::Array(array) => {
            for elem in array.elems.iter().flatten() {
                collect_bindings(elem, names);
            }
        }
        Pat::Object(object) => {
            for prop in &object.props {
                match prop {
                    ObjectPatProp::KeyValue(kv) => collect_bindings(&kv.value, names),
                    ObjectPatProp::Assign(assign) => names.push(assign.key.sym.to_string()),
                    ObjectPatProp::Rest(rest) => collect_bindings(&rest.arg, names),
                }
            }
        }
        Pat::Rest(rest) => collect_bindings(&rest.arg, names),
        Pat::Assign(assign) => collect_bindings(&assign.left, names),
        _ => {}
    }
}

fn top_level_names(module: &Module) -> HashSet<String> {
    let mut names = Vec::new();
    for item in &module.body {
        let decl = match item {
            ModuleItem::Stmt(Stmt::Decl(decl)) => decl,
            ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => &export.decl,
            ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
                names.extend(import.specifiers.iter().map(|s| s.local().sym.to_string()));
                continue;
            }
            _ => continue,
        };
        match decl {
            Decl::Fn(f) => names.push(f.ident.sym.to_string()),
            Decl::Class(c) => names.push(c.ident.sym.to_string()),
            Decl::Var(var) => {
                for declarator in &var.decls {
                    collect_bindings(&declarator.name, &mut names);
                }
            }
            _ => {}
        }
    }
    names.into_iter().collect()
}

fn fresh_name(base: &str, taken: &mut HashSet<String>) -> String {
    let mut name = base.to_string();
    let mut n = 1;
    while taken.contains(&name) {
        name = format!("{}${}", base, n);
        n += 1;
    }
    taken.insert(name.clone());
    name
}

fn var_binding(name: &str, init: Box<Expr>, span: Span) -> ModuleItem {
    let name = Pat::Ident(BindingIdent::from(Ident::new_no_ctxt(name.into(), span)));
    var_decl(name, init, span)
}

fn var_decl(name: Pat, init: Box<Expr>, span: Span) -> ModuleItem {
    ModuleItem::Stmt(Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span,
        ctxt: SyntaxContext::empty(),
        kind: VarDeclKind::Var,
        declare: false,
        decls: vec![VarDeclarator {
            span,
            name,
            init: Some(init),
            definite: false,
        }],
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(exported: &str, local: &str) -> Export {
        Export {
            exported: exported.to_string(),
            local: local.to_string(),
        }
    }

    fn footer(exports: Vec<Export>) -> Footer {
        Footer {
            exports,
            interop: None,
        }
    }

    #[test]
    fn test_default_only_replaces_module_exports() {
        assert_eq!(
            render_footer(&footer(vec![export("default", "_default")])),
            "module.exports = _default;\n"
        );
    }

    #[test]
    fn test_named_exports_mark_es_module() {
        let footer = render_footer(&footer(vec![export("default", "main"), export("a-b", "ab")]));
        assert_eq!(
            footer,
            "Object.defineProperty(exports, '__esModule', { value: true });\n\
             exports.default = main;\n\
             exports[\"a-b\"] = ab;\n"
        );
    }

    #[test]
    fn test_no_exports_no_footer() {
        assert_eq!(render_footer(&[]), "");
    }

    #[test]
    fn test_fresh_name_avoids_taken() {
        let mut taken = HashSet::from(["_default".to_string(), "_default$1".to_string()]);
        assert_eq!(fresh_name(DEFAULT_LOCAL, &mut taken), "_default$2");
        assert!(taken.contains("_default$2"));
    }
}
