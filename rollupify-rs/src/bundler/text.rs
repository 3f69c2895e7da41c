//! Text utilities for JavaScript bundling.

/// Strips the UTF-8 BOM (byte order mark) from the beginning of text if present.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{FEFF}').unwrap_or(text)
}

/// Transforms JSON source code into JavaScript that exports the parsed JSON.
///
/// ```ignore
/// // Input: {"key": "value"}
/// // Output: export default JSON.parse("{\"key\": \"value\"}");
/// ```
pub fn transform_json_source(source: &str) -> String {
    format!("export default JSON.parse({});", js_string(source))
}

/// Quotes `s` as a double-quoted JavaScript string literal.
pub fn js_string(s: &str) -> String {
    // JSON string syntax is a subset of JavaScript string syntax, apart from
    // the two line separators that older engines reject inside literals.
    serde_json::Value::String(s.to_string())
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Whether `name` can be written after a `.` in a member expression.
pub fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '$' || c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '$' || c == '_' || c.is_alphanumeric())
}

/// Renders a property access on `object`, e.g. `exports.foo` or `exports["a-b"]`.
pub fn property_access(object: &str, name: &str) -> String {
    if is_identifier_name(name) {
        format!("{}.{}", object, name)
    } else {
        format!("{}[{}]", object, js_string(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bom_with_bom() {
        assert_eq!(strip_bom("\u{FEFF}hello"), "hello");
        assert_eq!(strip_bom("hello"), "hello");
    }

    #[test]
    fn test_transform_json_source() {
        let result = transform_json_source(r#"{"key": "value"}"#);
        assert_eq!(
            result,
            r#"export default JSON.parse("{\"key\": \"value\"}");"#
        );
    }

    #[test]
    fn test_js_string_escapes_line_separators() {
        assert_eq!(js_string("a\u{2028}b"), "\"a\\u2028b\"");
        assert_eq!(js_string("line\nbreak"), "\"line\\nbreak\"");
    }

    #[test]
    fn test_property_access() {
        assert_eq!(property_access("exports", "foo"), "exports.foo");
        assert_eq!(property_access("exports", "$_1"), "exports.$_1");
        assert_eq!(property_access("exports", "a-b"), "exports[\"a-b\"]");
        assert_eq!(property_access("exports", "1a"), "exports[\"1a\"]");
    }
}
