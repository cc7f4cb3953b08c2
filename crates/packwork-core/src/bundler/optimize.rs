//! Production optimization: minimizers run over rendered files before they
//! are fingerprinted, so hashes reflect the bytes actually written.

use super::sourcemap::LineOrigin;
use super::stages::process_css;
use crate::config::BuildContext;
use crate::error::MinifyError;
use std::sync::Arc;

/// Kind of rendered file a minimizer may handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Script,
    Style,
    Media,
}

/// A minimizer over one kind of output file.
///
/// Image optimizers plug in here with `AssetKind::Media`; none ship built in.
pub trait Minimizer: Send + Sync {
    fn name(&self) -> &str;

    fn applies_to(&self, kind: AssetKind) -> bool;

    /// Minimize `input`. `file` names the output for error messages.
    fn minimize(&self, file: &str, input: &[u8]) -> Result<Vec<u8>, MinifyError>;

    /// Minimize and carry line origins through. `lines[i]` is the origin of
    /// line `i` of `input`; the result holds the origins of the output
    /// lines. Minimizers that cannot follow lines leave them unmapped.
    fn minimize_mapped(
        &self,
        file: &str,
        input: &[u8],
        _lines: &[Option<LineOrigin>],
    ) -> Result<(Vec<u8>, Vec<Option<LineOrigin>>), MinifyError> {
        Ok((self.minimize(file, input)?, Vec::new()))
    }
}

/// Ordered minimizer pipeline.
#[derive(Clone, Default)]
pub struct Optimizer {
    minimizers: Vec<Arc<dyn Minimizer>>,
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.minimizers.iter().map(|m| m.name()))
            .finish()
    }
}

impl Optimizer {
    /// Empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in minimizers for production; nothing in development.
    #[must_use]
    pub fn for_context(ctx: &BuildContext) -> Self {
        let mut optimizer = Self::new();
        if ctx.mode.is_production() {
            optimizer.push(Arc::new(ScriptMinimizer));
            optimizer.push(Arc::new(CssMinimizer));
        }
        optimizer
    }

    pub fn push(&mut self, minimizer: Arc<dyn Minimizer>) {
        self.minimizers.push(minimizer);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.minimizers.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.minimizers.iter().map(|m| m.name()).collect()
    }

    /// Run every applicable minimizer in order. The first failure aborts.
    pub fn run(&self, kind: AssetKind, file: &str, bytes: Vec<u8>) -> Result<Vec<u8>, MinifyError> {
        let mut bytes = bytes;
        for minimizer in self.minimizers.iter().filter(|m| m.applies_to(kind)) {
            let before = bytes.len();
            bytes = minimizer.minimize(file, &bytes)?;
            tracing::debug!(minimizer = minimizer.name(), file, before, after = bytes.len(), "minimized");
        }
        Ok(bytes)
    }

    /// [`Optimizer::run`] for files with a source map.
    pub fn run_mapped(
        &self,
        kind: AssetKind,
        file: &str,
        bytes: Vec<u8>,
        lines: Vec<Option<LineOrigin>>,
    ) -> Result<(Vec<u8>, Vec<Option<LineOrigin>>), MinifyError> {
        let mut current = (bytes, lines);
        for minimizer in self.minimizers.iter().filter(|m| m.applies_to(kind)) {
            let before = current.0.len();
            current = minimizer.minimize_mapped(file, &current.0, &current.1)?;
            tracing::debug!(minimizer = minimizer.name(), file, before, after = current.0.len(), "minimized");
        }
        Ok(current)
    }
}

/// lightningcss minification.
#[derive(Debug, Default, Clone, Copy)]
pub struct CssMinimizer;

impl Minimizer for CssMinimizer {
    fn name(&self) -> &str {
        "css"
    }

    fn applies_to(&self, kind: AssetKind) -> bool {
        kind == AssetKind::Style
    }

    fn minimize(&self, file: &str, input: &[u8]) -> Result<Vec<u8>, MinifyError> {
        let source = String::from_utf8_lossy(input);
        self.minify(file, &source).map(String::into_bytes)
    }

    /// Each run of lines from one source is minified on its own and becomes
    /// one output line mapped to the run's first line.
    fn minimize_mapped(
        &self,
        file: &str,
        input: &[u8],
        lines: &[Option<LineOrigin>],
    ) -> Result<(Vec<u8>, Vec<Option<LineOrigin>>), MinifyError> {
        let source = String::from_utf8_lossy(input);
        let mut out = String::with_capacity(source.len());
        let mut origins = Vec::new();
        let mut block = String::new();
        let mut block_origin: Option<Option<LineOrigin>> = None;

        for (i, line) in source.lines().enumerate() {
            let origin = lines.get(i).copied().flatten();
            let same = block_origin.is_some_and(|o| o.map(|o| o.source) == origin.map(|o| o.source));
            if !same {
                if let Some(o) = block_origin.take() {
                    self.flush(file, &block, o, &mut out, &mut origins)?;
                }
                block.clear();
                block_origin = Some(origin);
            }
            block.push_str(line);
            block.push('\n');
        }
        if let Some(o) = block_origin {
            self.flush(file, &block, o, &mut out, &mut origins)?;
        }
        Ok((out.into_bytes(), origins))
    }
}

impl CssMinimizer {
    fn minify(&self, file: &str, source: &str) -> Result<String, MinifyError> {
        process_css(source, file, true, false).map_err(|cause| MinifyError {
            minimizer: self.name().to_string(),
            file: file.to_string(),
            cause,
        })
    }

    fn flush(
        &self,
        file: &str,
        block: &str,
        origin: Option<LineOrigin>,
        out: &mut String,
        origins: &mut Vec<Option<LineOrigin>>,
    ) -> Result<(), MinifyError> {
        let minified = self.minify(file, block)?;
        if minified.trim().is_empty() {
            return Ok(());
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(minified.trim_end());
        origins.push(origin);
        Ok(())
    }
}

/// Conservative script minimizer: drops comments, indentation, trailing
/// whitespace and blank lines. Line breaks between statements are kept so
/// automatic semicolon insertion still sees them. `/*! ... */` comments
/// survive.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptMinimizer;

impl Minimizer for ScriptMinimizer {
    fn name(&self) -> &str {
        "script"
    }

    fn applies_to(&self, kind: AssetKind) -> bool {
        kind == AssetKind::Script
    }

    fn minimize(&self, _file: &str, input: &[u8]) -> Result<Vec<u8>, MinifyError> {
        Ok(strip_script(input))
    }

    fn minimize_mapped(
        &self,
        _file: &str,
        input: &[u8],
        lines: &[Option<LineOrigin>],
    ) -> Result<(Vec<u8>, Vec<Option<LineOrigin>>), MinifyError> {
        let (out, from) = strip_script_lines(input);
        let origins = from.iter().map(|&i| lines.get(i).copied().flatten()).collect();
        Ok((out, origins))
    }
}

/// Strip comments and insignificant whitespace from script bytes.
#[must_use]
pub fn strip_script(b: &[u8]) -> Vec<u8> {
    strip_script_lines(b).0
}

/// Output bytes that remember which input line each output line started on.
struct LineWriter {
    out: Vec<u8>,
    from: Vec<usize>,
}

impl LineWriter {
    fn push(&mut self, byte: u8, input_line: usize) {
        if byte != b'\n' && matches!(self.out.last(), None | Some(b'\n')) {
            self.from.push(input_line);
        }
        self.out.push(byte);
    }

    /// Copy a span verbatim. Returns the input line after it.
    fn copy(&mut self, span: &[u8], mut input_line: usize) -> usize {
        for &byte in span {
            self.push(byte, input_line);
            if byte == b'\n' {
                input_line += 1;
            }
        }
        input_line
    }
}

/// [`strip_script`] plus, for every output line, the 0-based input line it
/// starts on.
#[must_use]
pub fn strip_script_lines(b: &[u8]) -> (Vec<u8>, Vec<usize>) {
    let len = b.len();
    let mut w = LineWriter {
        out: Vec::with_capacity(len),
        from: Vec::new(),
    };
    let mut line_start = true;
    let mut line = 0;
    let mut i = 0;

    while i < len {
        let c = b[i];
        match c {
            b'\'' | b'"' | b'`' => {
                let end = skip_string(b, i);
                line = w.copy(&b[i..end], line);
                line_start = false;
                i = end;
            }
            b'/' if b.get(i + 1) == Some(&b'/') => {
                while i < len && b[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if b.get(i + 1) == Some(&b'*') => {
                let end = find_comment_end(b, i + 2);
                let breaks = b[i..end].iter().filter(|&&c| c == b'\n').count();
                if b.get(i + 2) == Some(&b'!') {
                    w.copy(&b[i..end], line);
                    line_start = false;
                } else if breaks > 0 {
                    if !line_start {
                        trim_trailing(&mut w.out);
                        w.push(b'\n', line);
                        line_start = true;
                    }
                } else if !line_start && !w.out.last().is_some_and(u8::is_ascii_whitespace) {
                    w.push(b' ', line);
                }
                line += breaks;
                i = end;
            }
            b'/' if regex_allowed(&w.out) => {
                let end = skip_regex(b, i);
                line = w.copy(&b[i..end], line);
                line_start = false;
                i = end;
            }
            b'\n' => {
                trim_trailing(&mut w.out);
                if !line_start {
                    w.push(b'\n', line);
                    line_start = true;
                }
                line += 1;
                i += 1;
            }
            b' ' | b'\t' | b'\r' if line_start => i += 1,
            _ => {
                w.push(c, line);
                line_start = false;
                i += 1;
            }
        }
    }
    trim_trailing(&mut w.out);
    (w.out, w.from)
}

fn skip_string(b: &[u8], start: usize) -> usize {
    let quote = b[start];
    let mut j = start + 1;
    while j < b.len() {
        match b[j] {
            b'\\' => j += 2,
            c if c == quote => return j + 1,
            b'\n' if quote != b'`' => return j,
            _ => j += 1,
        }
    }
    b.len()
}

fn find_comment_end(b: &[u8], from: usize) -> usize {
    let mut j = from;
    while j + 1 < b.len() {
        if b[j] == b'*' && b[j + 1] == b'/' {
            return j + 2;
        }
        j += 1;
    }
    b.len()
}

fn skip_regex(b: &[u8], start: usize) -> usize {
    let mut j = start + 1;
    let mut in_class = false;
    while j < b.len() {
        match b[j] {
            b'\\' => {
                j += 2;
                continue;
            }
            b'[' => in_class = true,
            b']' => in_class = false,
            b'/' if !in_class => return j + 1,
            b'\n' => return j,
            _ => {}
        }
        j += 1;
    }
    b.len()
}

/// A `/` starts a regex literal after an operator, an opening bracket,
/// `return`/`typeof`, or at the very start.
fn regex_allowed(out: &[u8]) -> bool {
    let trimmed = out
        .iter()
        .rposition(|c| !c.is_ascii_whitespace())
        .map_or(&out[..0], |p| &out[..=p]);
    match trimmed.last() {
        None => true,
        Some(c) if b"(,=:[!&|?{};+-*%<>~^".contains(c) => true,
        Some(_) => trimmed.ends_with(b"return") || trimmed.ends_with(b"typeof"),
    }
}

fn trim_trailing(out: &mut Vec<u8>) {
    while matches!(out.last(), Some(b' ' | b'\t' | b'\r')) {
        out.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use std::path::Path;

    fn strip(s: &str) -> String {
        String::from_utf8(strip_script(s.as_bytes())).unwrap()
    }

    #[test]
    fn test_strips_comments_and_indentation() {
        let src = "// header\nfunction f() {\n    /* inline */ return 1; // trailing\n\n\n}\n";
        assert_eq!(strip(src), "function f() {\nreturn 1;\n}\n");
    }

    #[test]
    fn test_keeps_strings_regex_and_templates() {
        let src = "var a = \"// not a comment\";\nvar r = /\\/*[/]/g;\nvar t = `line\n    indented`;\n";
        assert_eq!(strip(src), src);
    }

    #[test]
    fn test_multiline_comment_keeps_statement_break() {
        assert_eq!(strip("a = 1 /*\n*/ b = 2"), "a = 1\nb = 2");
        assert_eq!(strip("a/* x */b"), "a b");
    }

    #[test]
    fn test_preserved_comment() {
        assert_eq!(strip("/*! license */\nx();"), "/*! license */\nx();");
    }

    #[test]
    fn test_division_is_not_regex() {
        assert_eq!(strip("var x = a / b / c; // d\n"), "var x = a / b / c;\n");
    }

    #[test]
    fn test_pipeline_membership_follows_mode() {
        let dev = BuildContext::new(Path::new("/p"), Mode::Development);
        assert!(Optimizer::for_context(&dev).is_empty());

        let prod = BuildContext::new(Path::new("/p"), Mode::Production);
        assert_eq!(Optimizer::for_context(&prod).names(), vec!["script", "css"]);
    }

    #[test]
    fn test_css_minimizer() {
        let out = CssMinimizer
            .minimize("main.css", b".a {\n  color: red;\n}\n")
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ".a{color:red}");
    }

    #[test]
    fn test_stripped_lines_remember_their_origin() {
        let src = "// header\nfunction f() {\n    /* a\n    b */ return `x\ny`;\n\n}\n";
        let (out, from) = strip_script_lines(src.as_bytes());
        assert_eq!(String::from_utf8(out).unwrap(), "function f() {\nreturn `x\ny`;\n}\n");
        assert_eq!(from, vec![1, 3, 4, 6]);
    }

    #[test]
    fn test_css_blocks_map_to_their_source() {
        let at = |source, line| Some(LineOrigin { source, line });
        let input = b".a {\n  color: red;\n}\n.b {\n  color: green;\n}\n";
        let lines = [at(0, 0), at(0, 1), at(0, 2), at(1, 0), at(1, 1), at(1, 2)];
        let (out, origins) = CssMinimizer.minimize_mapped("main.css", input, &lines).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ".a{color:red}\n.b{color:green}");
        assert_eq!(origins, vec![at(0, 0), at(1, 0)]);
    }

    struct Passthrough;

    impl Minimizer for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }

        fn applies_to(&self, kind: AssetKind) -> bool {
            kind == AssetKind::Style
        }

        fn minimize(&self, _file: &str, input: &[u8]) -> Result<Vec<u8>, MinifyError> {
            Ok(input.to_vec())
        }
    }

    #[test]
    fn test_unmapped_minimizers_drop_origins() {
        let lines = vec![Some(LineOrigin { source: 0, line: 0 })];
        let mut optimizer = Optimizer::new();
        optimizer.push(Arc::new(ScriptMinimizer));
        let (_, kept) = optimizer
            .run_mapped(AssetKind::Style, "a.css", b".a{}".to_vec(), lines.clone())
            .unwrap();
        assert_eq!(kept, lines);

        optimizer.push(Arc::new(Passthrough));
        let (css, dropped) = optimizer
            .run_mapped(AssetKind::Style, "a.css", b".a{}".to_vec(), lines)
            .unwrap();
        assert_eq!(css, b".a{}");
        assert!(dropped.is_empty());
    }

    struct Failing;

    impl Minimizer for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn applies_to(&self, kind: AssetKind) -> bool {
            kind == AssetKind::Script
        }

        fn minimize(&self, file: &str, _input: &[u8]) -> Result<Vec<u8>, MinifyError> {
            Err(MinifyError {
                minimizer: "failing".to_string(),
                file: file.to_string(),
                cause: "nope".to_string(),
            })
        }
    }

    #[test]
    fn test_failure_aborts_and_kinds_are_respected() {
        let mut optimizer = Optimizer::new();
        optimizer.push(Arc::new(Failing));

        let css = optimizer.run(AssetKind::Style, "a.css", b".a{}".to_vec()).unwrap();
        assert_eq!(css, b".a{}");

        let err = optimizer
            .run(AssetKind::Script, "a.js", b"x".to_vec())
            .unwrap_err();
        assert_eq!(err.minimizer, "failing");
        assert_eq!(err.file, "a.js");
    }
}
