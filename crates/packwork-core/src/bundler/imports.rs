//! Import specifier scanner.
//!
//! Finds `import`/`export ... from`/`require()`/`import()` specifiers in
//! script code without a full parse. Comments and string literals are
//! skipped so commented-out imports are not followed.

use rustc_hash::FxHashMap;

/// One import found in a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    /// Specifier exactly as written.
    pub specifier: String,
    /// `import("...")` split point.
    pub dynamic: bool,
    /// 1-indexed line of the specifier.
    pub line: u32,
}

/// Scan source code for import specifiers.
///
/// Returns imports in first-appearance order, deduplicated by specifier. A
/// specifier imported both statically and dynamically counts as static.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ImportSpec> {
    let mut results: Vec<ImportSpec> = Vec::new();
    let mut seen: FxHashMap<String, usize> = FxHashMap::default();
    let mut push = |specifier: String, dynamic: bool, line: u32| {
        if specifier.is_empty() {
            return;
        }
        if let Some(&idx) = seen.get(&specifier) {
            if !dynamic {
                results[idx].dynamic = false;
            }
            return;
        }
        seen.insert(specifier.clone(), results.len());
        results.push(ImportSpec {
            specifier,
            dynamic,
            line,
        });
    };

    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut line: u32 = 1;
    let mut i = 0;

    while i < len {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }

        if c == '/' && i + 1 < len && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '/' && i + 1 < len && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                if chars[i] == '\n' {
                    line += 1;
                }
                i += 1;
            }
            i += 2;
            continue;
        }

        if c == '"' || c == '\'' || c == '`' {
            i = skip_string(&chars, i, &mut line);
            continue;
        }

        if matches_keyword(&chars, i, "import") {
            let mut cursor = i + 6;
            let start_line = line;
            let dynamic = next_non_ws(&chars, cursor) == Some('(');
            let found = if dynamic {
                cursor = skip_ws(&chars, cursor, &mut line) + 1;
                call_argument(&chars, cursor, &mut line)
            } else {
                from_clause(&chars, cursor, &mut line, true)
            };
            match found {
                Some((spec, end, spec_line)) => {
                    push(spec, dynamic, spec_line);
                    i = end;
                }
                None => {
                    line = start_line;
                    i += 6;
                }
            }
            continue;
        }

        if matches_keyword(&chars, i, "export") {
            let start_line = line;
            match from_clause(&chars, i + 6, &mut line, false) {
                Some((spec, end, spec_line)) => {
                    push(spec, false, spec_line);
                    i = end;
                }
                None => {
                    line = start_line;
                    i += 6;
                }
            }
            continue;
        }

        if matches_keyword(&chars, i, "require") && next_non_ws(&chars, i + 7) == Some('(') {
            let start_line = line;
            let cursor = skip_ws(&chars, i + 7, &mut line) + 1;
            match call_argument(&chars, cursor, &mut line) {
                Some((spec, end, spec_line)) => {
                    push(spec, false, spec_line);
                    i = end;
                }
                None => {
                    line = start_line;
                    i += 7;
                }
            }
            continue;
        }

        i += 1;
    }

    results
}

/// Check if chars at position match a keyword (with word boundary).
fn matches_keyword(chars: &[char], pos: usize, keyword: &str) -> bool {
    let kw: Vec<char> = keyword.chars().collect();
    let len = kw.len();

    if pos + len > chars.len() {
        return false;
    }
    if pos > 0 && is_ident(chars[pos - 1]) {
        return false;
    }
    if chars[pos..pos + len] != kw[..] {
        return false;
    }
    !(pos + len < chars.len() && is_ident(chars[pos + len]))
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}

fn next_non_ws(chars: &[char], mut pos: usize) -> Option<char> {
    while pos < chars.len() && chars[pos].is_whitespace() {
        pos += 1;
    }
    chars.get(pos).copied()
}

fn skip_ws(chars: &[char], mut pos: usize, line: &mut u32) -> usize {
    while pos < chars.len() && chars[pos].is_whitespace() {
        if chars[pos] == '\n' {
            *line += 1;
        }
        pos += 1;
    }
    pos
}

/// Skip a string literal starting at `pos` (the opening quote). Returns the
/// position after the closing quote.
fn skip_string(chars: &[char], pos: usize, line: &mut u32) -> usize {
    let quote = chars[pos];
    let mut i = pos + 1;
    while i < chars.len() && chars[i] != quote {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == '\n' {
            if quote != '`' {
                break;
            }
            *line += 1;
        }
        i += 1;
    }
    i + 1
}

/// Read a quoted literal at `pos`. Returns the content and the position
/// after the closing quote.
fn read_literal(chars: &[char], pos: usize) -> Option<(String, usize)> {
    let quote = *chars.get(pos)?;
    if quote != '"' && quote != '\'' && quote != '`' {
        return None;
    }
    let mut i = pos + 1;
    let start = i;
    while i < chars.len() && chars[i] != quote {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == '\n' || (quote == '`' && chars[i] == '$') {
            return None;
        }
        i += 1;
    }
    if i >= chars.len() {
        return None;
    }
    Some((chars[start..i].iter().collect(), i + 1))
}

/// `("spec")` argument of `import(` / `require(`; `pos` is after the paren.
fn call_argument(chars: &[char], pos: usize, line: &mut u32) -> Option<(String, usize, u32)> {
    let i = skip_ws(chars, pos, line);
    let spec_line = *line;
    let (spec, end) = read_literal(chars, i)?;
    let end = skip_ws(chars, end, line);
    if chars.get(end) != Some(&')') {
        return None;
    }
    Some((spec, end + 1, spec_line))
}

/// Find the `from "spec"` clause of an import/export statement. With
/// `bare_allowed`, a literal right after the keyword (`import "x"`) counts.
fn from_clause(
    chars: &[char],
    pos: usize,
    line: &mut u32,
    bare_allowed: bool,
) -> Option<(String, usize, u32)> {
    let len = chars.len();
    let mut i = skip_ws(chars, pos, line);

    if bare_allowed {
        if let Some((spec, end)) = read_literal(chars, i) {
            return Some((spec, end, *line));
        }
    }

    let limit = (i + 2000).min(len);
    while i < limit {
        match chars[i] {
            '\n' => *line += 1,
            ';' | '(' | '=' => return None,
            _ => {}
        }
        if matches_keyword(chars, i, "from") {
            let at = skip_ws(chars, i + 4, line);
            let (spec, end) = read_literal(chars, at)?;
            return Some((spec, end, *line));
        }
        i += 1;
    }
    None
}
