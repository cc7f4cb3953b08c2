//! Stylesheet stages: lightningcss normalization and grass Sass compilation.

use crate::bundler::stage::{Artifact, Stage, StageContext, StageError};
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use serde_json::Value;

/// Parse, prefix and print CSS with lightningcss.
///
/// `prefix` lowers modern syntax and adds vendor prefixes for the default
/// browser targets. `minify` prints compressed output.
pub fn process_css(
    source: &str,
    filename: &str,
    minify: bool,
    prefix: bool,
) -> Result<String, String> {
    let parser_options = ParserOptions {
        filename: filename.to_string(),
        ..ParserOptions::default()
    };
    let mut stylesheet = StyleSheet::parse(source, parser_options)
        .map_err(|e| format!("CSS parse error in {filename}: {e}"))?;

    let targets = if prefix {
        default_browser_targets()
    } else {
        Browsers::default()
    };

    if minify || prefix {
        stylesheet
            .minify(MinifyOptions {
                targets: Targets::from(targets),
                ..Default::default()
            })
            .map_err(|e| format!("CSS minify error in {filename}: {e}"))?;
    }

    let output = stylesheet
        .to_css(PrinterOptions {
            minify,
            targets: Targets::from(targets),
            ..Default::default()
        })
        .map_err(|e| format!("CSS print error in {filename}: {e}"))?;

    Ok(output.code)
}

/// Chrome 80+, Firefox 75+, Safari 13+, Edge 80+.
fn default_browser_targets() -> Browsers {
    Browsers {
        chrome: Some(80 << 16),
        firefox: Some(75 << 16),
        safari: Some(13 << 16),
        edge: Some(80 << 16),
        ..Default::default()
    }
}

/// `css`: normalize and prefix. Options: `{ "autoprefixer": bool }`
/// (default `true`).
#[derive(Debug, Default, Clone, Copy)]
pub struct CssStage;

impl Stage for CssStage {
    fn name(&self) -> &str {
        super::CSS
    }

    fn apply(
        &self,
        input: Artifact,
        options: &Value,
        cx: &StageContext<'_>,
    ) -> Result<Artifact, StageError> {
        let prefix = options
            .get("autoprefixer")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let code = process_css(&input.code, cx.key, false, prefix).map_err(StageError::new)?;
        Ok(Artifact { code, ..input })
    }
}

/// `sass`: compile `.scss`/`.sass` with grass. The module's directory and
/// any `includePaths` (relative to the project root) are load paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct SassStage;

impl Stage for SassStage {
    fn name(&self) -> &str {
        super::SASS
    }

    fn apply(
        &self,
        input: Artifact,
        options: &Value,
        cx: &StageContext<'_>,
    ) -> Result<Artifact, StageError> {
        let mut grass_options = grass::Options::default().style(grass::OutputStyle::Expanded);

        if let Some(parent) = cx.path.parent() {
            grass_options = grass_options.load_path(parent);
        }
        let include_paths: Vec<_> = options
            .get("includePaths")
            .and_then(Value::as_array)
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|p| cx.build.root.join(p))
                    .collect()
            })
            .unwrap_or_default();
        for path in &include_paths {
            grass_options = grass_options.load_path(path);
        }

        let indented = cx
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sass"));
        if indented {
            grass_options = grass_options.input_syntax(grass::InputSyntax::Sass);
        }

        let code = grass::from_string(input.code.clone(), &grass_options)
            .map_err(|e| StageError::new(e.to_string()))?;
        Ok(Artifact { code, ..input })
    }
}
