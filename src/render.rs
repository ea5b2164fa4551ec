//! Sandbox Renderer - hosts a synthesized document in an isolated frame.
//!
//! The frame is an `<iframe srcdoc>` sandboxed with `allow-scripts` only. Without
//! `allow-same-origin` the document runs in an opaque origin: it cannot reach
//! the host's DOM, storage, or cookies, and the host never reads into it.
//! Each render produces a brand-new frame; callers replace the previous one.

use crate::config::SandboxConfig;
use crate::error::SynthesisError;
use crate::sanitize::escape_html;
use crate::synth::{Language, SynthesisResult};
use std::future::Future;
use tracing::debug;
use uuid::Uuid;

/// Sandbox tokens granted to the frame.
pub const FRAME_SANDBOX: &str = "allow-scripts";

/// A live preview frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedFrame {
    pub frame_id: Uuid,
    pub language: Language,
    /// Complete document loaded into the frame.
    pub document: String,
    pub height: String,
}

impl HostedFrame {
    /// Embed markup for the host page.
    pub fn to_html(&self) -> String {
        format!(
            r#"<iframe id="preview-frame-{id}" class="preview-frame" title="Code preview" sandbox="{sandbox}" style="width: 100%; height: {height}; border: 0;" srcdoc="{srcdoc}"></iframe>"#,
            id = self.frame_id,
            sandbox = FRAME_SANDBOX,
            height = escape_html(&self.height),
            srcdoc = escape_html(&self.document),
        )
    }
}

/// Shown in place of the frame when no document could be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPanel {
    pub summary: String,
    pub detail: String,
    dismissed: bool,
}

impl ErrorPanel {
    pub fn from_synthesis(err: &SynthesisError) -> Self {
        Self {
            summary: err.summary().to_string(),
            detail: err.to_string(),
            dismissed: false,
        }
    }

    /// Hide the panel until the next render.
    pub fn dismiss(&mut self) {
        self.dismissed = true;
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed
    }

    pub fn to_html(&self) -> String {
        format!(
            r#"<div class="preview-error-panel" role="alert"{hidden}>
<strong>{summary}</strong>
<details><summary>Details</summary><pre>{detail}</pre></details>
</div>"#,
            hidden = if self.dismissed { " hidden" } else { "" },
            summary = escape_html(&self.summary),
            detail = escape_html(&self.detail),
        )
    }
}

/// What the preview area shows after a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedView {
    Frame(HostedFrame),
    Error(ErrorPanel),
}

impl RenderedView {
    pub fn to_html(&self) -> String {
        match self {
            RenderedView::Frame(frame) => frame.to_html(),
            RenderedView::Error(panel) => panel.to_html(),
        }
    }

    pub fn frame_id(&self) -> Option<Uuid> {
        match self {
            RenderedView::Frame(frame) => Some(frame.frame_id),
            RenderedView::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RenderedView::Error(_))
    }
}

/// Anything able to show a synthesis result in the preview area.
pub trait FrameHost: Send + Sync + 'static {
    fn present(&self, result: SynthesisResult) -> impl Future<Output = RenderedView> + Send;
}

#[derive(Debug, Clone)]
pub struct SandboxRenderer {
    frame_height: String,
}

impl Default for SandboxRenderer {
    fn default() -> Self {
        Self::new(&SandboxConfig::default())
    }
}

impl SandboxRenderer {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            frame_height: config.frame_height.clone(),
        }
    }

    pub fn render(&self, result: &SynthesisResult) -> RenderedView {
        match result {
            Ok(document) => {
                let frame = HostedFrame {
                    frame_id: Uuid::new_v4(),
                    language: document.language,
                    document: document.markup.clone(),
                    height: self.frame_height.clone(),
                };
                debug!(frame_id = %frame.frame_id, language = %frame.language, "created preview frame");
                RenderedView::Frame(frame)
            }
            Err(err) => {
                debug!(error = %err, "showing synthesis error panel");
                RenderedView::Error(ErrorPanel::from_synthesis(err))
            }
        }
    }
}

impl FrameHost for SandboxRenderer {
    fn present(&self, result: SynthesisResult) -> impl Future<Output = RenderedView> + Send {
        let view = self.render(&result);
        async move { view }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{DocumentSynthesizer, SourceUnit, Synthesize};

    fn render(code: &str, language: Language) -> RenderedView {
        let result = DocumentSynthesizer::default().synthesize(&SourceUnit::new(code, language));
        SandboxRenderer::default().render(&result)
    }

    #[test]
    fn test_frame_is_sandboxed_without_same_origin() {
        let html = render("<p>hi</p>", Language::Markup).to_html();
        assert!(html.contains(r#"sandbox="allow-scripts""#));
        assert!(!html.contains("allow-same-origin"));
        assert!(html.contains("height: 300px"));
    }

    #[test]
    fn test_srcdoc_is_escaped() {
        let html = render(r#"<p title="x">a & b</p>"#, Language::Markup).to_html();
        assert!(html.contains("&lt;p title=&quot;x&quot;&gt;a &amp; b&lt;/p&gt;"));
        // the only raw tag is the iframe itself
        assert_eq!(html.matches('<').count(), 2);
    }

    #[test]
    fn test_every_render_is_a_new_frame() {
        let a = render("console.log(1)", Language::Script);
        let b = render("console.log(1)", Language::Script);
        assert!(a.frame_id().is_some());
        assert_ne!(a.frame_id(), b.frame_id());
    }

    #[test]
    fn test_synthesis_error_becomes_panel() {
        let view = render("a { } </style>", Language::Style);
        let RenderedView::Error(mut panel) = view else {
            panic!("expected an error panel");
        };
        assert_eq!(panel.summary, "The code cannot be embedded in the preview document");
        assert!(panel.detail.contains("</style"));
        assert!(panel.to_html().contains("<details>"));
        assert!(panel.to_html().contains("&lt;/style"));

        panel.dismiss();
        assert!(panel.is_dismissed());
        assert!(panel.to_html().contains(r#"role="alert" hidden"#));
    }

    #[tokio::test]
    async fn test_present_matches_render() {
        let result = DocumentSynthesizer::default().synthesize(&SourceUnit::new("<b>x</b>", Language::Markup));
        let view = SandboxRenderer::default().present(result).await;
        let RenderedView::Frame(frame) = view else {
            panic!("expected a frame");
        };
        assert_eq!(frame.language, Language::Markup);
        assert!(frame.document.contains("<b>x</b>"));
    }
}
