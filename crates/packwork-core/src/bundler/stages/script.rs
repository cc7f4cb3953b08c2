//! Script stages: literal replacements, hot-refresh instrumentation and
//! JSON modules.

use crate::bundler::stage::{Artifact, Stage, StageContext, StageError};
use regex_lite::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Replace whole-expression occurrences of each key with its value.
///
/// Keys are tried in the given order at every position, so callers pass
/// them longest first. String literals and comments are left alone, and a
/// key only matches between identifier boundaries (`a.process.env.X` and
/// `process.env.XY` do not match `process.env.X`).
#[must_use]
pub fn replace_defines(code: &str, defines: &[(String, String)]) -> String {
    if defines.is_empty() || !defines.iter().any(|(k, _)| code.contains(k.as_str())) {
        return code.to_string();
    }

    let bytes = code.as_bytes();
    let mut out = String::with_capacity(code.len());
    let mut i = 0;
    let mut last = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += if bytes[i] == b'\\' { 2 } else { 1 };
                }
                i += 1;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
                continue;
            }
            _ => {}
        }

        let boundary_before = i == 0 || !is_ident_byte(bytes[i - 1]);
        if boundary_before {
            let matched = defines.iter().find(|(key, _)| {
                bytes[i..].starts_with(key.as_bytes())
                    && bytes
                        .get(i + key.len())
                        .map_or(true, |&b| !is_ident_byte(b))
            });
            if let Some((key, value)) = matched {
                out.push_str(&code[last..i]);
                out.push_str(value);
                i += key.len();
                last = i;
                continue;
            }
        }
        i += 1;
    }

    out.push_str(&code[last..]);
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'.' || b >= 0x80
}

/// `define`: replaces the build's `define` entries, plus any
/// `{ "KEY": "value" }` pairs given as options.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefineStage;

impl Stage for DefineStage {
    fn name(&self) -> &str {
        super::DEFINE
    }

    fn apply(
        &self,
        input: Artifact,
        options: &Value,
        cx: &StageContext<'_>,
    ) -> Result<Artifact, StageError> {
        let mut defines = cx.build.define.clone();
        if let Some(extra) = options.as_object() {
            for (key, value) in extra {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                defines.retain(|(k, _)| k != key);
                defines.push((key.clone(), value));
            }
            defines.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        }
        let code = replace_defines(&input.code, &defines);
        Ok(Artifact { code, ..input })
    }
}

fn component_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*(?:export\s+(?:default\s+)?)?(?:function\s*\*?\s*|class\s+|(?:const|let|var)\s+)[A-Z][A-Za-z0-9_$]*",
        )
        .unwrap_or_else(|_| unreachable!("component pattern is valid"))
    })
}

/// Whether the module looks like it defines UI components: a capitalized
/// top-level function/class/binding, or rendered elements.
fn has_components(code: &str) -> bool {
    code.contains("createElement(")
        || code.contains("jsx(")
        || code.contains("jsxs(")
        || component_pattern().is_match(code)
}

/// `refresh`: development-only instrumentation. Component modules get a
/// registration footer and accept their own updates, so editing one
/// component re-renders it without reloading its importers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RefreshStage;

impl Stage for RefreshStage {
    fn name(&self) -> &str {
        super::REFRESH
    }

    fn apply(
        &self,
        input: Artifact,
        _options: &Value,
        cx: &StageContext<'_>,
    ) -> Result<Artifact, StageError> {
        if cx.build.mode.is_production() || !has_components(&input.code) {
            return Ok(input);
        }

        let id = serde_json::to_string(cx.key).map_err(|e| StageError::new(e.to_string()))?;
        let mut code = input.code;
        if !code.ends_with('\n') {
            code.push('\n');
        }
        code.push_str(&format!(
            r#"
if (typeof window !== "undefined" && window.$RefreshReg$) {{
  window.$RefreshReg$(module.exports, {id});
}}
if (module.hot) {{
  module.hot.accept();
}}
"#
        ));

        Ok(Artifact {
            code,
            extracted_css: input.extracted_css,
            self_accepting: true,
        })
    }
}

/// `json`: JSON text → `module.exports = <value>;`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStage;

impl Stage for JsonStage {
    fn name(&self) -> &str {
        super::JSON
    }

    fn apply(
        &self,
        input: Artifact,
        _options: &Value,
        _cx: &StageContext<'_>,
    ) -> Result<Artifact, StageError> {
        let value: Value = serde_json::from_str(&input.code)
            .map_err(|e| StageError::new(format!("invalid JSON: {e}")))?;
        let json = serde_json::to_string(&value).map_err(|e| StageError::new(e.to_string()))?;
        Ok(Artifact {
            code: format!("module.exports = {json};\n"),
            ..input
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::stages::test_support::Fixture;
    use crate::config::Mode;

    fn defines(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_replace_defines() {
        let d = defines(&[("process.env.NODE_ENV", "\"production\""), ("__DEV__", "false")]);
        let code = "if (__DEV__) { log(process.env.NODE_ENV); }";
        assert_eq!(
            replace_defines(code, &d),
            "if (false) { log(\"production\"); }"
        );
    }

    #[test]
    fn test_replace_defines_respects_boundaries() {
        let d = defines(&[("__DEV__", "false"), ("process.env.X", "1")]);
        let code = "a.__DEV__; __DEV__X; process.env.XY; \"__DEV__\"; // __DEV__\n__DEV__";
        assert_eq!(
            replace_defines(code, &d),
            "a.__DEV__; __DEV__X; process.env.XY; \"__DEV__\"; // __DEV__\nfalse"
        );
    }

    #[test]
    fn test_define_stage_uses_context_and_options() {
        let fx = Fixture::new("src/main.js", Mode::Production);
        let out = DefineStage
            .apply(
                Artifact::new("const env = process.env.NODE_ENV; const api = API_URL;"),
                &serde_json::json!({ "API_URL": "\"/api\"" }),
                &fx.cx(),
            )
            .unwrap();
        assert_eq!(out.code, "const env = \"production\"; const api = \"/api\";");
    }

    #[test]
    fn test_refresh_marks_components() {
        let fx = Fixture::new("src/App.jsx", Mode::Development);
        let out = RefreshStage
            .apply(
                Artifact::new("export default function App() { return null; }"),
                &Value::Null,
                &fx.cx(),
            )
            .unwrap();
        assert!(out.self_accepting);
        assert!(out.code.contains("$RefreshReg$(module.exports, \"src/App.jsx\")"));
        assert!(out.code.contains("module.hot.accept()"));
    }

    #[test]
    fn test_refresh_skips_plain_modules() {
        let fx = Fixture::new("src/util.js", Mode::Development);
        let input = Artifact::new("export const add = (a, b) => a + b;");
        let out = RefreshStage
            .apply(input.clone(), &Value::Null, &fx.cx())
            .unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_refresh_is_inert_in_production() {
        let fx = Fixture::new("src/App.jsx", Mode::Production);
        let input = Artifact::new("export default function App() {}");
        let out = RefreshStage
            .apply(input.clone(), &Value::Null, &fx.cx())
            .unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_json_stage() {
        let fx = Fixture::new("src/data.json", Mode::Development);
        let out = JsonStage
            .apply(Artifact::new("{ \"a\": [1, 2] }"), &Value::Null, &fx.cx())
            .unwrap();
        assert_eq!(out.code, "module.exports = {\"a\":[1,2]};\n");

        let err = JsonStage
            .apply(Artifact::new("{ nope"), &Value::Null, &fx.cx())
            .unwrap_err();
        assert!(err.message.starts_with("invalid JSON"));
    }
}
