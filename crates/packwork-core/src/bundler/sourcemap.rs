//! Line-level source maps (format version 3).
//!
//! Every generated line maps at most one segment: column 0 of the generated
//! line to column 0 of the line it was written from. Lines the bundler
//! wrote itself (chunk wrappers, export assignments) stay unmapped.

use serde::Serialize;

const BASE64_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const VLQ_BASE_SHIFT: u32 = 5;
const VLQ_BASE_MASK: i64 = (1 << VLQ_BASE_SHIFT) - 1;
const VLQ_CONTINUATION_BIT: i64 = 1 << VLQ_BASE_SHIFT;

/// Where a generated line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOrigin {
    /// Index into the map's `sources`.
    pub source: u32,
    /// 0-based line in that source.
    pub line: u32,
}

/// Serialized map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u32,
    pub file: String,
    pub sources: Vec<String>,
    pub sources_content: Vec<Option<String>>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMap {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Base64 VLQ. Bit 0 carries the sign, then 5-bit groups with bit 5 as the
/// continuation flag.
#[must_use]
pub fn vlq_encode(value: i64) -> String {
    let mut out = String::new();
    let mut vlq = if value < 0 {
        ((-value) << 1) + 1
    } else {
        value << 1
    };
    loop {
        let mut digit = vlq & VLQ_BASE_MASK;
        vlq >>= VLQ_BASE_SHIFT;
        if vlq > 0 {
            digit |= VLQ_CONTINUATION_BIT;
        }
        out.push(char::from(BASE64_CHARS[digit as usize]));
        if vlq == 0 {
            break;
        }
    }
    out
}

/// `mappings` for one origin per generated line. Source and original-line
/// fields are relative to the previous segment.
#[must_use]
pub fn encode_mappings(lines: &[Option<LineOrigin>]) -> String {
    let mut out = String::new();
    let mut prev_source = 0i64;
    let mut prev_line = 0i64;
    for (i, origin) in lines.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        let Some(origin) = origin else { continue };
        let source = i64::from(origin.source);
        let line = i64::from(origin.line);
        out.push_str(&vlq_encode(0));
        out.push_str(&vlq_encode(source - prev_source));
        out.push_str(&vlq_encode(line - prev_line));
        out.push_str(&vlq_encode(0));
        prev_source = source;
        prev_line = line;
    }
    out
}

/// Text being rendered along with each line's origin.
#[derive(Debug, Clone, Default)]
pub struct MappedText {
    text: String,
    lines: Vec<Option<LineOrigin>>,
    sources: Vec<String>,
    sources_content: Vec<Option<String>>,
}

impl MappedText {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source and return its index.
    pub fn add_source(&mut self, name: &str, content: Option<String>) -> u32 {
        if let Some(idx) = self.sources.iter().position(|s| s == name) {
            return u32::try_from(idx).unwrap_or(u32::MAX);
        }
        self.sources.push(name.to_string());
        self.sources_content.push(content);
        u32::try_from(self.sources.len() - 1).unwrap_or(u32::MAX)
    }

    /// Append text with no origin. Must end on a line boundary.
    pub fn push_unmapped(&mut self, text: &str) {
        self.text.push_str(text);
        self.lines
            .extend(std::iter::repeat(None).take(text.matches('\n').count()));
    }

    /// Append `code` (a newline is added if missing). `origins[i]` is the
    /// origin of line `i`; lines past the end are unmapped.
    pub fn push_mapped(&mut self, code: &str, origins: &[Option<LineOrigin>]) {
        self.text.push_str(code);
        if !code.ends_with('\n') {
            self.text.push('\n');
        }
        let count = code.matches('\n').count() + usize::from(!code.ends_with('\n'));
        self.lines
            .extend((0..count).map(|i| origins.get(i).copied().flatten()));
    }

    /// Split into the text and the map pieces.
    #[must_use]
    pub fn into_parts(self) -> (String, MapSources, Vec<Option<LineOrigin>>) {
        let sources = MapSources {
            sources: self.sources,
            sources_content: self.sources_content,
        };
        (self.text, sources, self.lines)
    }
}

/// Sources a rendered file's lines point into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapSources {
    pub sources: Vec<String>,
    pub sources_content: Vec<Option<String>>,
}

impl MapSources {
    /// Build the map for `file` from final line origins.
    #[must_use]
    pub fn into_map(self, file: &str, lines: &[Option<LineOrigin>]) -> SourceMap {
        SourceMap {
            version: 3,
            file: file.to_string(),
            sources: self.sources,
            sources_content: self.sources_content,
            names: Vec::new(),
            mappings: encode_mappings(lines),
        }
    }
}

/// Last line of a script or stylesheet, pointing at its map.
#[must_use]
pub fn mapping_url_comment(map_file: &str, css: bool) -> String {
    let name = map_file.rsplit('/').next().unwrap_or(map_file);
    if css {
        format!("/*# sourceMappingURL={name} */\n")
    } else {
        format!("//# sourceMappingURL={name}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(source: u32, line: u32) -> Option<LineOrigin> {
        Some(LineOrigin { source, line })
    }

    #[test]
    fn test_vlq() {
        assert_eq!(vlq_encode(0), "A");
        assert_eq!(vlq_encode(1), "C");
        assert_eq!(vlq_encode(-1), "D");
        assert_eq!(vlq_encode(16), "gB");
        assert_eq!(vlq_encode(123), "2H");
    }

    #[test]
    fn test_mappings_are_relative() {
        let lines = [at(0, 0), None, at(0, 2), at(1, 0)];
        assert_eq!(encode_mappings(&lines), "AAAA;;AAEA;ACFA");
    }

    #[test]
    fn test_mapped_text_tracks_lines() {
        let mut text = MappedText::new();
        text.push_unmapped("header {\n");
        let a = text.add_source("src/a.js", Some("one\ntwo\n".to_string()));
        text.push_mapped("one\ntwo", &[at(a, 0), at(a, 1)]);
        text.push_unmapped("}\n");
        assert_eq!(text.add_source("src/a.js", None), a);

        let (code, sources, lines) = text.into_parts();
        assert_eq!(code, "header {\none\ntwo\n}\n");
        assert_eq!(lines, vec![None, at(0, 0), at(0, 1), None]);

        let map = sources.into_map("main.js", &lines);
        let json: serde_json::Value = serde_json::from_slice(&map.to_json().unwrap()).unwrap();
        assert_eq!(json["version"], 3);
        assert_eq!(json["sources"][0], "src/a.js");
        assert_eq!(json["sourcesContent"][0], "one\ntwo\n");
        assert_eq!(json["mappings"], ";AAAA;AACA;");
    }

    #[test]
    fn test_url_comment_uses_file_name() {
        assert_eq!(
            mapping_url_comment("static/js/main.0123.js.map", false),
            "//# sourceMappingURL=main.0123.js.map\n"
        );
        assert_eq!(
            mapping_url_comment("static/css/main.css.map", true),
            "/*# sourceMappingURL=main.css.map */\n"
        );
    }
}
