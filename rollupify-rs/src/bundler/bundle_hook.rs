//! Bundle hook for import.meta rewriting.
//!
//! A CommonJS chunk cannot contain `import.meta`, so every property is
//! replaced with a literal.

use deno_ast::swc::ast::{Bool, Expr, KeyValueProp, Lit, PropName, Str};
use deno_ast::swc::bundler::{Hook, ModuleRecord};
use deno_ast::swc::common::Span;

pub struct BundleHook;

impl Hook for BundleHook {
    fn get_import_meta_props(
        &self,
        span: Span,
        module_record: &ModuleRecord,
    ) -> Result<Vec<KeyValueProp>, anyhow::Error> {
        Ok(vec![
            // import.meta.url = "<module file name>"
            KeyValueProp {
                key: PropName::Ident("url".into()),
                value: Box::new(Expr::Lit(Lit::Str(Str {
                    span,
                    value: module_record.file_name.to_string().into(),
                    raw: None,
                }))),
            },
            // import.meta.main = true only for the entry module
            KeyValueProp {
                key: PropName::Ident("main".into()),
                value: Box::new(Expr::Lit(Lit::Bool(Bool {
                    span,
                    value: module_record.is_entry,
                }))),
            },
        ])
    }
}
