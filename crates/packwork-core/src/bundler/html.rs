//! HTML page generation: the project's `public/index.html` with the
//! initial stylesheets and scripts injected.

/// Tags for one page, as URLs in load order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageAssets {
    pub styles: Vec<String>,
    pub scripts: Vec<String>,
}

/// Inject `<link>` and deferred `<script>` tags before `</head>`.
///
/// `%PUBLIC_URL%` placeholders are replaced with the public path (without
/// its trailing slash). Templates without a `</head>` get the tags before
/// `</body>`, or appended when that is missing too.
#[must_use]
pub fn render_page(template: &str, assets: &PageAssets, public_path: &str) -> String {
    let public_url = public_path.trim_end_matches('/');
    let page = template.replace("%PUBLIC_URL%", public_url);

    let mut tags = String::new();
    for href in &assets.styles {
        tags.push_str(&format!("<link href=\"{}\" rel=\"stylesheet\">", escape_attr(href)));
    }
    for src in &assets.scripts {
        tags.push_str(&format!(
            "<script defer=\"defer\" src=\"{}\"></script>",
            escape_attr(src)
        ));
    }

    for anchor in ["</head>", "</body>"] {
        if let Some(pos) = find_ignore_case(&page, anchor) {
            let mut out = String::with_capacity(page.len() + tags.len());
            out.push_str(&page[..pos]);
            out.push_str(&tags);
            out.push_str(&page[pos..]);
            return out;
        }
    }
    page + &tags
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assets() -> PageAssets {
        PageAssets {
            styles: vec!["/static/css/main.abc.css".to_string()],
            scripts: vec![
                "/static/js/runtime~main.123.js".to_string(),
                "/static/js/main.456.js".to_string(),
            ],
        }
    }

    #[test]
    fn test_injects_before_head_close() {
        let template = "<html><head><title>x</title></HEAD><body></body></html>";
        let page = render_page(template, &assets(), "/");
        let runtime = page.find("runtime~main").unwrap();
        let main = page.find("main.456.js").unwrap();
        let head_close = page.find("</HEAD>").unwrap();
        assert!(runtime < main && main < head_close);
        assert!(page.contains("<link href=\"/static/css/main.abc.css\" rel=\"stylesheet\">"));
    }

    #[test]
    fn test_public_url_placeholder() {
        let page = render_page(
            "<link rel=\"icon\" href=\"%PUBLIC_URL%/favicon.ico\">",
            &PageAssets::default(),
            "/app/",
        );
        assert_eq!(page, "<link rel=\"icon\" href=\"/app/favicon.ico\">");
    }

    #[test]
    fn test_falls_back_to_body_then_end() {
        let page = render_page("<body></body>", &assets(), "/");
        assert!(page.ends_with("</script></body>"));

        let page = render_page("<div></div>", &assets(), "/");
        assert!(page.starts_with("<div></div><link"));
    }
}
