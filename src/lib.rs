//! # Preview Sandbox
//!
//! Live previews for lesson code (markup, stylesheets, scripts, and
//! components) rendered inside isolated frames.
//!
//! ## Isolation Guarantees
//!
//! - **Opaque origin**: browser frames are sandboxed with `allow-scripts` only,
//!   so previewed code cannot touch the host page's DOM, storage, or cookies
//! - **Fresh realm per render**: every render builds a new frame (or a new V8
//!   isolate when running headless), so timers and handlers never outlive it
//! - **Captured console**: logging calls are recorded inside the frame, never
//!   forwarded to the host's console
//! - **Contained errors**: exceptions from previewed code are caught in the
//!   frame and shown inline; they never reach the host's call stack
//!
//! ## Usage
//!
//! ```rust,ignore
//! use preview_sandbox::{DocumentSynthesizer, HeadlessFrame, Language, SandboxConfig, SourceUnit, Synthesize};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SandboxConfig::default();
//!     let synthesizer = DocumentSynthesizer::new(&config);
//!
//!     let unit = SourceUnit::new(r#"console.log("hi"); console.log(1 + 1);"#, Language::Script);
//!     let document = synthesizer.synthesize(&unit).unwrap();
//!
//!     let outcome = HeadlessFrame::new(config).execute(&document).await.unwrap();
//!     for record in &outcome.records {
//!         println!("{}", record);
//!     }
//! }
//! ```

mod analyze;
mod bridge;
mod config;
mod error;
mod exercise;
mod render;
mod runtime;
mod sanitize;
mod shell;
mod synth;
mod template;

pub use analyze::{analyze, AnalysisReport, Suggestion, SuggestionKind, Verdict, BEST_PRACTICES};
pub use bridge::{OutputRecord, Severity, UncaughtError};
pub use config::{ComponentRuntime, SandboxConfig};
pub use error::{SandboxError, SynthesisError};
pub use exercise::{normalize_whitespace, CheckReport, ExerciseSpec, Requirement};
pub use render::{ErrorPanel, FrameHost, HostedFrame, RenderedView, SandboxRenderer, FRAME_SANDBOX};
pub use runtime::{ExecutionOutcome, HeadlessFrame, Termination};
pub use sanitize::{
    escape_html, sanitize_input, sanitize_rich_content, validate_css_length, validate_email, validate_url,
    DEFAULT_INLINE_TAGS,
};
pub use shell::{CodeCallback, EditorShell, PreviewMode, PreviewOptions, ShellState, ShellView};
pub use synth::{
    detect_render_target, DetectionBasis, DocumentSynthesizer, Language, RenderTarget, ScriptProgram, SourceUnit,
    SynthesisResult, SynthesizedDocument, Synthesize, Theme, UnknownLanguage, UnknownTheme,
};
