//! Fixed pieces of every synthesized document: theme stylesheets, the named
//! containers the bridge writes into, and the demonstration body used to
//! preview stylesheets.

use crate::synth::Theme;

/// Container ids shared with the bridge sink sources.
pub const OUTPUT_ID: &str = "preview-output";
pub const ERROR_ID: &str = "preview-error";
pub const ROOT_ID: &str = "preview-root";
pub const COMPONENT_ROOT_ID: &str = "root";

const BASE_CSS: &str = r#"
body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, Cantarell, 'Open Sans', 'Helvetica Neue', sans-serif;
  margin: 0;
  padding: 16px;
}
.preview-heading { margin: 0 0 8px; font-size: 14px; font-weight: 600; }
.preview-output {
  border-radius: 4px;
  padding: 12px;
  margin-top: 16px;
  min-height: 48px;
  font-family: ui-monospace, SFMono-Regular, Menlo, Consolas, monospace;
  font-size: 13px;
  white-space: pre-wrap;
}
.preview-line { padding: 2px 0; }
.preview-error-panel {
  border: 1px solid #dc2626;
  color: #dc2626;
  padding: 8px;
  border-radius: 4px;
  margin-top: 8px;
}
.preview-hint { font-size: 13px; font-style: italic; }
"#;

const LIGHT_CSS: &str = r#"
body { color: #333; background: #ffffff; }
.preview-output { border: 1px solid #e2e8f0; background-color: #f8f9fa; }
.preview-line.preview-warn { color: #b45309; }
.preview-line.preview-error { color: #dc2626; }
.preview-hint { color: #6b7280; }
"#;

const DARK_CSS: &str = r#"
body { color: #e5e7eb; background: #111827; }
.preview-output { border: 1px solid #374151; background-color: #1f2937; }
.preview-line.preview-warn { color: #fbbf24; }
.preview-line.preview-error { color: #f87171; }
.preview-hint { color: #9ca3af; }
"#;

/// Sample elements a stylesheet can act on, so CSS-only input has something
/// visible to style.
pub const STYLE_DEMO_BODY: &str = r#"<div class="container">
  <h1>Sample heading</h1>
  <p>This is a paragraph to try your CSS on.</p>
  <button class="button">Sample button</button>
  <div class="card">
    <h2 class="card-title">Card title</h2>
    <p class="card-text">Cards group related content.</p>
  </div>
  <div class="box">Demo box</div>
  <ul class="list">
    <li>First item</li>
    <li>Second item</li>
    <li>Third item</li>
  </ul>
</div>"#;

pub fn theme_stylesheet(theme: Theme) -> String {
    let palette = match theme {
        Theme::Light => LIGHT_CSS,
        Theme::Dark => DARK_CSS,
    };
    format!("{}{}", BASE_CSS, palette)
}

/// Output and error containers, initially hidden until the bridge writes.
pub fn output_area(visible: bool) -> String {
    format!(
        r#"<div id="{output}" class="preview-output"{hidden}></div>
<div id="{error}" class="preview-error-panel" role="alert" hidden></div>"#,
        output = OUTPUT_ID,
        error = ERROR_ID,
        hidden = if visible { "" } else { " hidden" },
    )
}

/// Wrap head extras and body content in the fixed document shell.
pub fn document_shell(theme: Theme, head_extra: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en" data-theme="{theme}">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Preview</title>
<style>{css}</style>
{head_extra}
</head>
<body>
{body}
</body>
</html>
"#,
        theme = theme.as_str(),
        css = theme_stylesheet(theme),
        head_extra = head_extra,
        body = body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_themes_differ() {
        assert_ne!(theme_stylesheet(Theme::Light), theme_stylesheet(Theme::Dark));
        assert!(theme_stylesheet(Theme::Dark).contains("#111827"));
    }

    #[test]
    fn test_shell_has_head_essentials() {
        let doc = document_shell(Theme::Light, "", "<p>x</p>");
        assert!(doc.starts_with("<!DOCTYPE html>"));
        assert!(doc.contains(r#"<meta charset="UTF-8">"#));
        assert!(doc.contains(r#"name="viewport""#));
        assert!(doc.contains(r#"data-theme="light""#));
        assert!(doc.contains("<body>\n<p>x</p>\n</body>"));
    }

    #[test]
    fn test_output_area_visibility() {
        assert!(output_area(false).contains(r#"class="preview-output" hidden"#));
        assert!(!output_area(true).contains(r#"class="preview-output" hidden"#));
    }
}
