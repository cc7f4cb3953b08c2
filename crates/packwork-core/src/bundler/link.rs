//! Module linking: rewrite ESM import/export syntax into the registry's
//! `function (module, exports, require)` form.
//!
//! Rewriting is line based. Multi-line `import { ... }` and `export { ... }`
//! statements are joined first. Specifiers are replaced by the target's
//! module key:
//!
//! - `import a, { b as c } from './x'` → `var __m0 = require("src/x.js"); const a = require.i(__m0); const { b: c } = __m0;`
//! - `import('./page')` → `require.load("src/page.js")`
//! - `export const a = 1` → `const a = 1` + `exports.a = a;` at the end,
//!   for every name a declaration list or destructuring pattern binds
//! - `export function f()` → declaration + `exports.f = f;` at the top
//! - `export default expr` → `exports.default = expr`

use regex_lite::{Captures, Regex};
use rustc_hash::FxHashMap;
use std::sync::OnceLock;

/// Rewrite one module's code. `deps` maps each specifier the module uses to
/// the key of the module it resolved to; unknown specifiers are left as
/// written.
#[must_use]
pub fn link_module(code: &str, deps: &FxHashMap<String, String>) -> String {
    link_module_mapped(code, deps).code
}

/// Linked module code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linked {
    pub code: String,
    /// For each line of `code`, the 0-based input line it was written from.
    /// Export bookkeeping lines have none.
    pub lines: Vec<Option<usize>>,
}

/// [`link_module`], keeping track of where each output line came from.
#[must_use]
pub fn link_module_mapped(code: &str, deps: &FxHashMap<String, String>) -> Linked {
    let mut linker = Linker {
        deps,
        hoisted: Vec::new(),
        pending: Vec::new(),
        esm: false,
        temp: 0,
    };

    let mut body = String::with_capacity(code.len() + 128);
    let mut body_lines = Vec::new();
    for (line_no, statement) in join_statements(code) {
        let line = linker.rewrite_statement(&statement);
        body.push_str(&line);
        body.push('\n');
        body_lines.push(Some(line_no));
    }

    if !linker.esm {
        return Linked {
            code: body,
            lines: body_lines,
        };
    }

    let mut out = String::with_capacity(body.len() + 256);
    let mut lines = Vec::with_capacity(body_lines.len() + linker.hoisted.len() + linker.pending.len() + 1);
    out.push_str("Object.defineProperty(exports, \"__esModule\", { value: true });\n");
    lines.push(None);
    for stmt in &linker.hoisted {
        out.push_str(stmt);
        out.push('\n');
        lines.push(None);
    }
    out.push_str(&body);
    lines.extend(body_lines);
    for stmt in &linker.pending {
        out.push_str(stmt);
        out.push('\n');
        lines.push(None);
    }
    Linked { code: out, lines }
}

struct Linker<'a> {
    deps: &'a FxHashMap<String, String>,
    /// Exports safe to assign before the body runs (function declarations).
    hoisted: Vec<String>,
    /// Exports assigned after the body.
    pending: Vec<String>,
    esm: bool,
    temp: usize,
}

impl Linker<'_> {
    fn key_literal(&self, specifier: &str) -> String {
        let target = self.deps.get(specifier).map_or(specifier, String::as_str);
        json_string(target)
    }

    fn require(&self, specifier: &str) -> String {
        format!("require({})", self.key_literal(specifier))
    }

    fn temp_name(&mut self) -> String {
        let name = format!("__m{}", self.temp);
        self.temp += 1;
        name
    }

    fn rewrite_statement(&mut self, line: &str) -> String {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];

        if trimmed.starts_with("import ") || trimmed.starts_with("import{") {
            if let Some(rewritten) = self.rewrite_import(trimmed) {
                return format!("{indent}{rewritten}");
            }
        }
        if trimmed.starts_with("export ") || trimmed.starts_with("export{") {
            if let Some(rewritten) = self.rewrite_export(trimmed) {
                self.esm = true;
                return format!("{indent}{rewritten}");
            }
        }
        self.rewrite_calls(line)
    }

    /// Rewrite `require("x")` and `import("x")` calls inside a line.
    fn rewrite_calls(&self, line: &str) -> String {
        if !line.contains("require") && !line.contains("import") {
            return line.to_string();
        }
        call_pattern()
            .replace_all(line, |caps: &Captures<'_>| {
                let prefix = caps.get(1).map_or("", |m| m.as_str());
                let spec = caps.get(3).map_or("", |m| m.as_str());
                let key = self.key_literal(spec);
                if &caps[2] == "import" {
                    format!("{prefix}require.load({key})")
                } else {
                    format!("{prefix}require({key})")
                }
            })
            .into_owned()
    }

    fn rewrite_import(&mut self, stmt: &str) -> Option<String> {
        let rest = stmt.strip_prefix("import")?.trim_start();

        // import "./side-effect";
        if let Some((spec, _)) = quoted(rest) {
            return Some(format!("{};", self.require(&spec)));
        }

        let from_idx = find_from(rest)?;
        let clause = rest[..from_idx].trim();
        let (spec, _) = quoted(rest[from_idx + 4..].trim_start())?;
        let req = self.require(&spec);

        let (default, remainder) = split_default(clause);
        let remainder = remainder.trim();

        let mut parts = Vec::new();
        let source = if default.is_some() && !remainder.is_empty() {
            let tmp = self.temp_name();
            parts.push(format!("var {tmp} = {req};"));
            tmp
        } else {
            req
        };

        if let Some(name) = default {
            parts.push(format!("const {name} = require.i({source});"));
        }
        if let Some(ns) = remainder.strip_prefix("* as ") {
            parts.push(format!("const {} = {source};", ns.trim()));
        } else if remainder.starts_with('{') {
            let names = remainder.trim_start_matches('{').trim_end_matches('}');
            let destructure: Vec<String> = names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|n| n.replace(" as ", ": "))
                .collect();
            parts.push(format!("const {{ {} }} = {source};", destructure.join(", ")));
        }
        Some(parts.join(" "))
    }

    fn rewrite_export(&mut self, stmt: &str) -> Option<String> {
        let rest = stmt.strip_prefix("export")?.trim_start();

        if let Some(value) = rest.strip_prefix("default ") {
            let value = value.trim_start();
            for prefix in ["async function", "function", "class"] {
                if let Some(after) = value.strip_prefix(prefix) {
                    let name = leading_ident(after.trim_start_matches('*').trim_start());
                    if !name.is_empty() && after.starts_with([' ', '*']) {
                        let export = format!("exports.default = {name};");
                        if prefix == "class" {
                            self.pending.push(export);
                        } else {
                            self.hoisted.push(export);
                        }
                        return Some(value.to_string());
                    }
                }
            }
            return Some(format!("exports.default = {value}"));
        }

        for keyword in ["const ", "let ", "var "] {
            if let Some(after) = rest.strip_prefix(keyword) {
                let names = declared_names(after);
                if names.is_empty() {
                    return None;
                }
                for name in names {
                    self.pending.push(format!("exports.{name} = {name};"));
                }
                return Some(rest.to_string());
            }
        }

        for keyword in ["async function", "function"] {
            if let Some(after) = rest.strip_prefix(keyword) {
                let name = leading_ident(after.trim_start_matches('*').trim_start());
                if name.is_empty() {
                    return None;
                }
                self.hoisted.push(format!("exports.{name} = {name};"));
                return Some(rest.to_string());
            }
        }

        if let Some(after) = rest.strip_prefix("class ") {
            let name = leading_ident(after);
            if name.is_empty() {
                return None;
            }
            self.pending.push(format!("exports.{name} = {name};"));
            return Some(rest.to_string());
        }

        // export * from "x" / export * as ns from "x"
        if let Some(after) = rest.strip_prefix('*') {
            let after = after.trim_start();
            let from_idx = find_from(after)?;
            let (spec, _) = quoted(after[from_idx + 4..].trim_start())?;
            let req = self.require(&spec);
            if let Some(ns) = after[..from_idx].trim().strip_prefix("as ") {
                return Some(format!("exports.{} = {req};", ns.trim()));
            }
            return Some(format!(
                "(function (m) {{ for (var k in m) if (k !== \"default\" && !(k in exports)) exports[k] = m[k]; }})({req});"
            ));
        }

        // export { a, b as c } [from "x"]
        if rest.starts_with('{') {
            let close = rest.find('}')?;
            let names: Vec<(String, String)> = rest[1..close]
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|n| match n.split_once(" as ") {
                    Some((local, exported)) => {
                        (local.trim().to_string(), exported.trim().to_string())
                    }
                    None => (n.to_string(), n.to_string()),
                })
                .collect();

            let tail = rest[close + 1..].trim_start();
            if let Some(from_idx) = find_from(tail) {
                let (spec, _) = quoted(tail[from_idx + 4..].trim_start())?;
                let tmp = self.temp_name();
                let mut out = format!("var {tmp} = {};", self.require(&spec));
                for (local, exported) in names {
                    out.push_str(&format!(" exports.{exported} = {tmp}.{local};"));
                }
                return Some(out);
            }

            for (local, exported) in names {
                self.pending.push(format!("exports.{exported} = {local};"));
            }
            return Some(String::new());
        }

        None
    }
}

fn call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(^|[^\w$.])(require|import)\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
            .unwrap_or_else(|_| unreachable!("call pattern is valid"))
    })
}

/// Join statements that open a brace on one line and close it later. Each
/// statement comes with the 0-based line it starts on.
fn join_statements(code: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    let mut pending_lines = 0;

    for (line_no, line) in code.lines().enumerate() {
        if let Some((start, mut acc)) = pending.take() {
            acc.push(' ');
            acc.push_str(line.trim());
            pending_lines += 1;
            if statement_complete(&acc) || pending_lines > 64 {
                out.push((start, acc));
            } else {
                pending = Some((start, acc));
            }
            continue;
        }

        let trimmed = line.trim_start();
        let opens = (trimmed.starts_with("import ")
            || trimmed.starts_with("import{")
            || trimmed.starts_with("export {")
            || trimmed.starts_with("export{")
            || opens_binding_pattern(trimmed))
            && !statement_complete(trimmed);
        if opens {
            pending = Some((line_no, line.trim_end().to_string()));
            pending_lines = 0;
        } else {
            out.push((line_no, line.to_string()));
        }
    }
    out.extend(pending);
    out
}

fn statement_complete(stmt: &str) -> bool {
    if stmt.matches('{').count() != stmt.matches('}').count()
        || stmt.matches('[').count() != stmt.matches(']').count()
    {
        return false;
    }
    if stmt.trim_start().starts_with("import") && stmt.contains('}') {
        return find_from(stmt).is_some_and(|idx| quoted(stmt[idx + 4..].trim_start()).is_some());
    }
    true
}

/// `export const {` / `export let [` and the like: a destructured export
/// whose pattern may continue on the next lines.
fn opens_binding_pattern(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("export ") else {
        return false;
    };
    ["const ", "let ", "var "].iter().any(|keyword| {
        rest.strip_prefix(keyword)
            .is_some_and(|after| after.trim_start().starts_with(['{', '[']))
    })
}

/// Names bound by a declaration list such as `a = 1, b = 2` or
/// `{ a, b: [c, ...d] } = obj`.
fn declared_names(declarations: &str) -> Vec<String> {
    let mut names = Vec::new();
    for declarator in split_top_level(declarations, b',') {
        let target = split_top_level(declarator, b'=')
            .into_iter()
            .next()
            .unwrap_or_default();
        pattern_names(target, &mut names);
    }
    names
}

fn pattern_names(pattern: &str, names: &mut Vec<String>) {
    let pattern = pattern.trim().trim_start_matches("...").trim_start();
    let (inner, object) = if let Some(inner) = pattern.strip_prefix('{') {
        (inner.strip_suffix('}').unwrap_or(inner), true)
    } else if let Some(inner) = pattern.strip_prefix('[') {
        (inner.strip_suffix(']').unwrap_or(inner), false)
    } else {
        let name = leading_ident(pattern);
        if !name.is_empty() {
            names.push(name.to_string());
        }
        return;
    };

    for element in split_top_level(inner, b',') {
        // Defaults never bind names.
        let element = split_top_level(element, b'=')
            .into_iter()
            .next()
            .unwrap_or_default();
        if object {
            match split_top_level(element, b':').as_slice() {
                [_, value] => pattern_names(value, names),
                _ => pattern_names(element, names),
            }
        } else {
            pattern_names(element, names);
        }
    }
}

/// Split on `sep` outside brackets and string literals. An `=` separator
/// ignores `==`, `=>`, `<=`, `>=`, and `!=`.
fn split_top_level(s: &str, sep: u8) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 1;
            } else if b == q {
                quote = None;
            }
        } else {
            match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                _ if b == sep && depth == 0 => {
                    let operator = sep == b'='
                        && (bytes.get(i + 1).is_some_and(|&n| n == b'=' || n == b'>')
                            || (i > 0 && matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>')));
                    if !operator {
                        parts.push(&s[start..i]);
                        start = i + 1;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    parts.push(&s[start..]);
    parts
}

/// Position of the `from` keyword outside braces.
fn find_from(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            b'\'' | b'"' => return None,
            b'f' if depth == 0 && s[i..].starts_with("from") => {
                let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
                let after_ok = bytes.get(i + 4).map_or(true, |&b| !is_ident_byte(b));
                if before_ok && after_ok {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Leading quoted literal: returns its content and the remainder.
fn quoted(s: &str) -> Option<(String, &str)> {
    let quote = s.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let end = s[1..].find(quote)? + 1;
    Some((s[1..end].to_string(), &s[end + 1..]))
}

/// Split `a, { b }` / `a, * as ns` / `a` / `{ b }` into default name and the
/// rest.
fn split_default(clause: &str) -> (Option<&str>, &str) {
    if clause.starts_with('{') || clause.starts_with('*') {
        return (None, clause);
    }
    match clause.split_once(',') {
        Some((default, rest)) => (Some(default.trim()), rest),
        None => (Some(clause.trim()), ""),
    }
}

fn leading_ident(s: &str) -> &str {
    let end = s
        .char_indices()
        .find(|&(_, c)| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .map_or(s.len(), |(i, _)| i);
    &s[..end]
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(&str, &str)]) -> FxHashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_side_effect_import() {
        let out = link_module("import './app.css';", &deps(&[("./app.css", "src/app.css")]));
        assert_eq!(out, "require(\"src/app.css\");\n");
    }

    #[test]
    fn test_named_and_default_imports() {
        let d = deps(&[("react", "node_modules/react/index.js"), ("./a", "src/a.js")]);
        let out = link_module(
            "import React, { useState as useS } from 'react';\nimport a from './a';",
            &d,
        );
        assert!(out.contains("var __m0 = require(\"node_modules/react/index.js\");"));
        assert!(out.contains("const React = require.i(__m0);"));
        assert!(out.contains("const { useState: useS } = __m0;"));
        assert!(out.contains("const a = require.i(require(\"src/a.js\"));"));
        assert!(!out.contains("__esModule"));
    }

    #[test]
    fn test_namespace_import() {
        let out = link_module("import * as utils from './utils';", &deps(&[("./utils", "src/utils.js")]));
        assert_eq!(out, "const utils = require(\"src/utils.js\");\n");
    }

    #[test]
    fn test_multiline_import_is_joined() {
        let source = "import {\n  one,\n  two as deux,\n} from './nums';\nconsole.log(one);";
        let out = link_module(source, &deps(&[("./nums", "src/nums.js")]));
        assert!(out.contains("const { one, two: deux } = require(\"src/nums.js\");"));
        assert!(out.contains("console.log(one);"));
    }

    #[test]
    fn test_dynamic_import_and_require() {
        let d = deps(&[("./About", "src/About.jsx"), ("./legacy", "src/legacy.js")]);
        let out = link_module(
            "const About = lazy(() => import('./About'));\nconst l = require(\"./legacy\");\nobj.require('./legacy');",
            &d,
        );
        assert!(out.contains("lazy(() => require.load(\"src/About.jsx\"))"));
        assert!(out.contains("const l = require(\"src/legacy.js\");"));
        assert!(out.contains("obj.require('./legacy');"));
    }

    #[test]
    fn test_exports() {
        let source = "export const a = 1;\nexport function f() {}\nexport class C {}\nconst x = 2;\nexport { x as y };";
        let out = link_module(source, &FxHashMap::default());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Object.defineProperty(exports, \"__esModule\", { value: true });");
        assert_eq!(lines[1], "exports.f = f;");
        assert!(out.contains("\nconst a = 1;\n"));
        assert!(out.contains("\nfunction f() {}\n"));
        assert!(out.contains("\nclass C {}\n"));
        assert!(out.ends_with("exports.a = a;\nexports.C = C;\nexports.y = x;\n"));
    }

    #[test]
    fn test_export_declaration_lists() {
        let out = link_module(
            "export const a = f(1, 2), b = 'x,y';\nexport let { c, d: e, ...rest } = obj;\nexport var [g, , h = 1] = list;",
            &FxHashMap::default(),
        );
        assert!(out.contains("\nconst a = f(1, 2), b = 'x,y';\n"));
        assert!(out.contains("\nlet { c, d: e, ...rest } = obj;\n"));
        assert!(out.ends_with(
            "exports.a = a;\nexports.b = b;\nexports.c = c;\nexports.e = e;\nexports.rest = rest;\nexports.g = g;\nexports.h = h;\n"
        ));
    }

    #[test]
    fn test_multiline_destructured_export() {
        let out = link_module(
            "export const {\n  x,\n  y: { z },\n} = load();\nconsole.log(x);",
            &FxHashMap::default(),
        );
        assert!(out.contains("const { x, y: { z }, } = load();"));
        assert!(out.ends_with("console.log(x);\nexports.x = x;\nexports.z = z;\n"));
    }

    #[test]
    fn test_export_default_forms() {
        let named = link_module("export default function App() {\n  return 1;\n}", &FxHashMap::default());
        assert!(named.contains("exports.default = App;"));
        assert!(named.contains("function App() {"));

        let expr = link_module("export default {\n  a: 1,\n};", &FxHashMap::default());
        assert!(expr.contains("exports.default = {\n  a: 1,\n};"));
    }

    #[test]
    fn test_reexports() {
        let d = deps(&[("./x", "src/x.js"), ("./all", "src/all.js")]);
        let out = link_module(
            "export { a, b as c } from './x';\nexport * from './all';\nexport * as ns from './x';",
            &d,
        );
        assert!(out.contains("var __m0 = require(\"src/x.js\"); exports.a = __m0.a; exports.c = __m0.b;"));
        assert!(out.contains("})(require(\"src/all.js\"));"));
        assert!(out.contains("exports.ns = require(\"src/x.js\");"));
    }

    #[test]
    fn test_mapped_lines_follow_statements() {
        let source = "import {\n  a,\n} from './a';\nexport const b = a;\nexport function f() {}\nf();";
        let linked = link_module_mapped(source, &deps(&[("./a", "src/a.js")]));
        let lines: Vec<&str> = linked.code.lines().collect();
        assert_eq!(lines.len(), linked.lines.len());
        assert_eq!(
            linked.lines,
            vec![None, None, Some(0), Some(3), Some(4), Some(5), None]
        );
        assert_eq!(lines[2], "const { a } = require(\"src/a.js\");");
        assert_eq!(lines[5], "f();");
    }

    #[test]
    fn test_commonjs_passes_through() {
        let source = "module.exports = function () { return 1; };";
        assert_eq!(link_module(source, &FxHashMap::default()), format!("{source}\n"));
    }
}
