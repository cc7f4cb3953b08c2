//! Built-in transform stages.
//!
//! | name | input | output |
//! |---|---|---|
//! | `sass` | SCSS / indented Sass | CSS |
//! | `css` | CSS | normalized, prefixed CSS |
//! | `style-inject` | CSS | JS that adds a `<style>` tag |
//! | `style-extract` | CSS | empty JS module + extracted stylesheet |
//! | `define` | JS | JS with literal replacements |
//! | `refresh` | JS | JS with a hot-refresh registration footer |
//! | `json` | JSON | JS module exporting the value |

mod css;
mod script;
mod style;

pub use css::{process_css, CssStage, SassStage};
pub use script::{replace_defines, DefineStage, JsonStage, RefreshStage};
pub use style::{StyleExtractStage, StyleInjectStage};

pub const CSS: &str = "css";
pub const SASS: &str = "sass";
pub const STYLE_INJECT: &str = "style-inject";
pub const STYLE_EXTRACT: &str = "style-extract";
pub const DEFINE: &str = "define";
pub const REFRESH: &str = "refresh";
pub const JSON: &str = "json";

#[cfg(test)]
pub(crate) mod test_support {
    use crate::bundler::stage::StageContext;
    use crate::config::{BuildContext, Mode};
    use std::path::{Path, PathBuf};

    pub struct Fixture {
        pub build: BuildContext,
        pub path: PathBuf,
        pub key: String,
    }

    impl Fixture {
        pub fn new(file: &str, mode: Mode) -> Self {
            let build = BuildContext::new(Path::new("/project"), mode);
            let path = build.root.join(file);
            let key = build.module_key(&path);
            Self { build, path, key }
        }

        pub fn cx(&self) -> StageContext<'_> {
            StageContext {
                build: &self.build,
                path: &self.path,
                key: &self.key,
            }
        }
    }
}
