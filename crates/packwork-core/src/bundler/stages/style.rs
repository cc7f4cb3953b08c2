//! Terminal stylesheet stages. Development injects a `<style>` tag at
//! runtime; production moves the CSS into the chunk stylesheet.

use crate::bundler::stage::{Artifact, Stage, StageContext, StageError};
use serde_json::Value;

/// `style-inject`: CSS → JS that appends a `<style>` element. The module
/// self-accepts so edits swap the sheet in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct StyleInjectStage;

impl Stage for StyleInjectStage {
    fn name(&self) -> &str {
        super::STYLE_INJECT
    }

    fn apply(
        &self,
        input: Artifact,
        _options: &Value,
        cx: &StageContext<'_>,
    ) -> Result<Artifact, StageError> {
        let css = serde_json::to_string(&input.code).map_err(|e| StageError::new(e.to_string()))?;
        let key = serde_json::to_string(cx.key).map_err(|e| StageError::new(e.to_string()))?;
        let code = format!(
            r#"var css = {css};
var style = document.createElement("style");
style.setAttribute("data-packwork", {key});
style.textContent = css;
document.head.appendChild(style);
if (module.hot) {{
  module.hot.accept();
  module.hot.dispose(function () {{
    style.remove();
  }});
}}
"#
        );
        Ok(Artifact {
            code,
            extracted_css: None,
            self_accepting: true,
        })
    }
}

/// `style-extract`: CSS → empty JS module; the CSS travels on the artifact
/// and ends up in `static/css/`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StyleExtractStage;

impl Stage for StyleExtractStage {
    fn name(&self) -> &str {
        super::STYLE_EXTRACT
    }

    fn apply(
        &self,
        input: Artifact,
        _options: &Value,
        _cx: &StageContext<'_>,
    ) -> Result<Artifact, StageError> {
        Ok(Artifact {
            code: "module.exports = {};\n".to_string(),
            extracted_css: Some(input.code),
            self_accepting: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::stages::test_support::Fixture;
    use crate::config::Mode;

    #[test]
    fn test_inject_escapes_css() {
        let fx = Fixture::new("src/app.css", Mode::Development);
        let out = StyleInjectStage
            .apply(
                Artifact::new(".a::before { content: \"\\\"\"; }\n"),
                &Value::Null,
                &fx.cx(),
            )
            .unwrap();
        assert!(out.code.starts_with("var css = \".a::before"));
        assert!(out.code.contains("\"src/app.css\""));
        assert!(out.code.contains("module.hot.accept()"));
        assert!(out.self_accepting);
        assert!(out.extracted_css.is_none());
    }

    #[test]
    fn test_extract_moves_css() {
        let fx = Fixture::new("src/app.css", Mode::Production);
        let out = StyleExtractStage
            .apply(Artifact::new(".a{color:red}"), &Value::Null, &fx.cx())
            .unwrap();
        assert_eq!(out.code, "module.exports = {};\n");
        assert_eq!(out.extracted_css.as_deref(), Some(".a{color:red}"));
        assert!(!out.self_accepting);
    }
}
