//! Editor/Preview Shell - owns the code buffer and decides when to re-render.
//!
//! States: `Idle` → (edit) → `PendingRecompute` → (debounce elapsed) →
//! `Rendering` → (completion) → `Idle`.
//!
//! Every edit, run, reset, or theme change bumps a generation counter. A render
//! cycle only publishes its result if its generation is still current, so a
//! slow, superseded cycle can never overwrite a newer preview. Pending debounce
//! timers are aborted outright; a cycle already rendering is left to finish and
//! its result is dropped.

use crate::render::{FrameHost, RenderedView};
use crate::synth::{Language, SourceUnit, Synthesize, Theme};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type CodeCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ShellState {
    Idle,
    PendingRecompute,
    Rendering,
}

/// Layout of the editor and preview panes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PreviewMode {
    #[default]
    Split,
    PreviewOnly,
    CodeOnly,
}

impl PreviewMode {
    pub fn next(self) -> Self {
        match self {
            PreviewMode::Split => PreviewMode::PreviewOnly,
            PreviewMode::PreviewOnly => PreviewMode::CodeOnly,
            PreviewMode::CodeOnly => PreviewMode::Split,
        }
    }
}

/// What the host supplies when mounting a shell.
#[derive(Clone)]
pub struct PreviewOptions {
    pub code: String,
    pub language: Language,
    pub theme: Theme,
    /// Re-render after each edit settles. When off, only `run` and `reset` render.
    pub auto_preview: bool,
    pub read_only: bool,
    pub show_line_numbers: bool,
    pub on_code_change: Option<CodeCallback>,
    pub on_code_run: Option<CodeCallback>,
}

impl PreviewOptions {
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
            theme: Theme::default(),
            auto_preview: true,
            read_only: false,
            show_line_numbers: true,
            on_code_change: None,
            on_code_run: None,
        }
    }

    pub fn theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    pub fn auto_preview(mut self, enabled: bool) -> Self {
        self.auto_preview = enabled;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn on_code_change(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_code_change = Some(Arc::new(f));
        self
    }

    pub fn on_code_run(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_code_run = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for PreviewOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewOptions")
            .field("code_len", &self.code.len())
            .field("language", &self.language)
            .field("theme", &self.theme)
            .field("auto_preview", &self.auto_preview)
            .field("read_only", &self.read_only)
            .field("show_line_numbers", &self.show_line_numbers)
            .field("on_code_change", &self.on_code_change.is_some())
            .field("on_code_run", &self.on_code_run.is_some())
            .finish()
    }
}

/// Snapshot published to subscribers after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellView {
    pub state: ShellState,
    pub generation: u64,
    pub mode: PreviewMode,
    pub theme: Theme,
    pub show_line_numbers: bool,
    /// `None` before the first render and after unmount.
    pub view: Option<RenderedView>,
}

struct ShellCore {
    code: String,
    theme: Theme,
    mode: PreviewMode,
    show_line_numbers: bool,
    generation: u64,
    state: ShellState,
    view: Option<RenderedView>,
    debounce_task: Option<JoinHandle<()>>,
    mounted: bool,
}

impl ShellCore {
    fn snapshot(&self) -> ShellView {
        ShellView {
            state: self.state,
            generation: self.generation,
            mode: self.mode,
            theme: self.theme,
            show_line_numbers: self.show_line_numbers,
            view: self.view.clone(),
        }
    }

    /// Supersede whatever cycle is current. Only a timer that has not fired
    /// yet is aborted; a cycle that is rendering finishes and is dropped.
    fn supersede(&mut self) -> u64 {
        if let Some(task) = self.debounce_task.take() {
            if self.state == ShellState::PendingRecompute {
                task.abort();
            }
        }
        self.generation += 1;
        self.generation
    }
}

struct Inner<S, H> {
    synthesizer: Arc<S>,
    host: Arc<H>,
    debounce: Duration,
    language: Language,
    initial_code: String,
    auto_preview: bool,
    read_only: bool,
    on_code_change: Option<CodeCallback>,
    on_code_run: Option<CodeCallback>,
    core: Mutex<ShellCore>,
    view_tx: watch::Sender<ShellView>,
}

impl<S, H> Inner<S, H> {
    fn publish(&self, core: &ShellCore) {
        self.view_tx.send_replace(core.snapshot());
    }
}

/// Interactive editor + preview over one source unit.
pub struct EditorShell<S, H> {
    inner: Arc<Inner<S, H>>,
}

impl<S, H> EditorShell<S, H>
where
    S: Synthesize + 'static,
    H: FrameHost,
{
    /// Mount the shell and render the initial code once.
    pub async fn mount(options: PreviewOptions, synthesizer: Arc<S>, host: Arc<H>, debounce: Duration) -> Self {
        let core = ShellCore {
            code: options.code.clone(),
            theme: options.theme,
            mode: PreviewMode::default(),
            show_line_numbers: options.show_line_numbers,
            generation: 0,
            state: ShellState::Idle,
            view: None,
            debounce_task: None,
            mounted: true,
        };
        let (view_tx, _) = watch::channel(core.snapshot());
        let inner = Arc::new(Inner {
            synthesizer,
            host,
            debounce,
            language: options.language,
            initial_code: options.code,
            auto_preview: options.auto_preview,
            read_only: options.read_only,
            on_code_change: options.on_code_change,
            on_code_run: options.on_code_run,
            core: Mutex::new(core),
            view_tx,
        });
        info!(language = %inner.language, read_only = inner.read_only, auto_preview = inner.auto_preview, "mounted editor shell");

        render_cycle(inner.as_ref(), 0).await;
        Self { inner }
    }

    /// Replace the code buffer. With auto-preview on, (re)starts the debounce timer.
    pub async fn edit(&self, code: impl Into<String>) {
        if self.inner.read_only {
            debug!("ignoring edit on read-only shell");
            return;
        }
        let code = code.into();
        {
            let mut core = self.inner.core.lock().await;
            if !core.mounted {
                return;
            }
            core.code = code.clone();
            let generation = core.supersede();
            if self.inner.auto_preview {
                core.state = ShellState::PendingRecompute;
                let inner = self.inner.clone();
                core.debounce_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(inner.debounce).await;
                    render_cycle(inner.as_ref(), generation).await;
                }));
            } else {
                // a cycle still rendering is now stale and will not publish
                core.state = ShellState::Idle;
            }
            debug!(generation, "code edited");
            self.inner.publish(&core);
        }
        if let Some(callback) = &self.inner.on_code_change {
            callback(&code);
        }
    }

    /// Render now, skipping the debounce. Returns the view, or `None` if a
    /// newer cycle superseded this one before it completed.
    pub async fn run(&self) -> Option<RenderedView> {
        let (generation, code) = {
            let mut core = self.inner.core.lock().await;
            if !core.mounted {
                return None;
            }
            (core.supersede(), core.code.clone())
        };
        if let Some(callback) = &self.inner.on_code_run {
            callback(&code);
        }
        render_cycle(self.inner.as_ref(), generation).await
    }

    /// Restore the code captured at mount time and render it.
    pub async fn reset(&self) -> Option<RenderedView> {
        if self.inner.read_only {
            return None;
        }
        let generation = {
            let mut core = self.inner.core.lock().await;
            if !core.mounted {
                return None;
            }
            core.code = self.inner.initial_code.clone();
            core.supersede()
        };
        if let Some(callback) = &self.inner.on_code_change {
            callback(&self.inner.initial_code);
        }
        render_cycle(self.inner.as_ref(), generation).await
    }

    /// Dismiss the error panel currently shown, if any. The next render
    /// replaces it either way.
    pub async fn dismiss_error(&self) -> bool {
        let mut core = self.inner.core.lock().await;
        match core.view.as_mut() {
            Some(RenderedView::Error(panel)) if !panel.is_dismissed() => {
                panel.dismiss();
                self.inner.publish(&core);
                true
            }
            _ => false,
        }
    }

    pub async fn toggle_preview_mode(&self) -> PreviewMode {
        let mut core = self.inner.core.lock().await;
        core.mode = core.mode.next();
        self.inner.publish(&core);
        core.mode
    }

    /// Switch theme and re-render with the new stylesheet.
    pub async fn toggle_theme(&self) -> Theme {
        let (generation, theme) = {
            let mut core = self.inner.core.lock().await;
            if !core.mounted {
                return core.theme;
            }
            core.theme = core.theme.toggled();
            (core.supersede(), core.theme)
        };
        render_cycle(self.inner.as_ref(), generation).await;
        theme
    }

    pub async fn toggle_line_numbers(&self) -> bool {
        let mut core = self.inner.core.lock().await;
        core.show_line_numbers = !core.show_line_numbers;
        self.inner.publish(&core);
        core.show_line_numbers
    }

    /// Lines in the buffer, for the gutter. An empty buffer has one line.
    pub async fn line_count(&self) -> usize {
        self.inner.core.lock().await.code.split('\n').count()
    }

    pub async fn code(&self) -> String {
        self.inner.core.lock().await.code.clone()
    }

    pub async fn state(&self) -> ShellState {
        self.inner.core.lock().await.state
    }

    pub fn view(&self) -> ShellView {
        self.inner.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ShellView> {
        self.inner.view_tx.subscribe()
    }

    /// Tear down: cancel pending work, drop the frame, ignore further input.
    pub async fn unmount(&self) {
        let mut core = self.inner.core.lock().await;
        if !core.mounted {
            return;
        }
        core.supersede();
        if let Some(task) = core.debounce_task.take() {
            task.abort();
        }
        core.mounted = false;
        core.state = ShellState::Idle;
        core.view = None;
        self.inner.publish(&core);
        info!("unmounted editor shell");
    }
}

async fn render_cycle<S, H>(inner: &Inner<S, H>, generation: u64) -> Option<RenderedView>
where
    S: Synthesize,
    H: FrameHost,
{
    let unit = {
        let mut core = inner.core.lock().await;
        if !core.mounted || core.generation != generation {
            return None;
        }
        core.state = ShellState::Rendering;
        inner.publish(&core);
        SourceUnit {
            code: core.code.clone(),
            language: inner.language,
            theme: core.theme,
        }
    };

    let result = inner.synthesizer.synthesize(&unit);
    let view = inner.host.present(result).await;

    let mut core = inner.core.lock().await;
    if !core.mounted || core.generation != generation {
        debug!(generation, current = core.generation, "dropping stale render");
        return None;
    }
    core.state = ShellState::Idle;
    core.debounce_task = None;
    core.view = Some(view.clone());
    inner.publish(&core);
    debug!(generation, frame_id = ?view.frame_id(), "preview updated");
    Some(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SandboxRenderer;
    use crate::synth::{DocumentSynthesizer, SynthesisResult};
    use std::future::Future;
    use std::sync::Mutex as StdMutex;

    const DEBOUNCE: Duration = Duration::from_millis(1000);

    #[derive(Default)]
    struct SpySynthesizer {
        inner: DocumentSynthesizer,
        calls: StdMutex<Vec<String>>,
    }

    impl SpySynthesizer {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Synthesize for SpySynthesizer {
        fn synthesize(&self, unit: &SourceUnit) -> SynthesisResult {
            self.calls.lock().unwrap().push(unit.code.clone());
            self.inner.synthesize(unit)
        }
    }

    /// Takes five seconds to present any document mentioning "slow".
    #[derive(Default)]
    struct SlowHost {
        renderer: SandboxRenderer,
    }

    impl FrameHost for SlowHost {
        fn present(&self, result: SynthesisResult) -> impl Future<Output = RenderedView> + Send {
            let slow = matches!(&result, Ok(doc) if doc.markup.contains("slow"));
            let view = self.renderer.render(&result);
            async move {
                if slow {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                view
            }
        }
    }

    async fn mount(options: PreviewOptions) -> (EditorShell<SpySynthesizer, SandboxRenderer>, Arc<SpySynthesizer>) {
        let spy = Arc::new(SpySynthesizer::default());
        let shell = EditorShell::mount(options, spy.clone(), Arc::new(SandboxRenderer::default()), DEBOUNCE).await;
        (shell, spy)
    }

    fn frame_document(view: &ShellView) -> String {
        match &view.view {
            Some(RenderedView::Frame(frame)) => frame.document.clone(),
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_renders_initial_code() {
        let (shell, spy) = mount(PreviewOptions::new("<h1>Hi</h1>", Language::Markup)).await;
        assert_eq!(shell.state().await, ShellState::Idle);
        assert_eq!(spy.calls(), vec!["<h1>Hi</h1>"]);
        let view = shell.view();
        assert!(frame_document(&view).contains("<h1>Hi</h1>"));
        assert!(!view.view.unwrap().is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_render_only_the_last() {
        let (shell, spy) = mount(PreviewOptions::new("", Language::Script)).await;

        for code in ["c", "co", "con", "console.log(1)"] {
            shell.edit(code).await;
            assert_eq!(shell.state().await, ShellState::PendingRecompute);
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        assert_eq!(spy.calls().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(spy.calls(), vec!["", "console.log(1)"]);
        assert_eq!(shell.state().await, ShellState::Idle);
        assert!(frame_document(&shell.view()).contains("console.log(1)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_is_discarded() {
        let spy = Arc::new(SpySynthesizer::default());
        let shell = EditorShell::mount(
            PreviewOptions::new("<p>start</p>", Language::Markup),
            spy.clone(),
            Arc::new(SlowHost::default()),
            DEBOUNCE,
        )
        .await;

        shell.edit("<p>slow one</p>").await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(shell.state().await, ShellState::Rendering);

        shell.edit("<p>fast</p>").await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(frame_document(&shell.view()).contains("<p>fast</p>"));

        // the slow cycle completes here and must not win
        tokio::time::sleep(Duration::from_secs(10)).await;
        let view = shell.view();
        assert!(frame_document(&view).contains("<p>fast</p>"));
        assert!(!frame_document(&view).contains("slow one"));
        assert_eq!(view.state, ShellState::Idle);
        assert_eq!(spy.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_edit_during_run_returns_to_idle() {
        let shell = Arc::new(
            EditorShell::mount(
                PreviewOptions::new("<p>start</p>", Language::Markup).auto_preview(false),
                Arc::new(SpySynthesizer::default()),
                Arc::new(SlowHost::default()),
                DEBOUNCE,
            )
            .await,
        );

        shell.edit("<p>slow</p>").await;
        let running = {
            let shell = shell.clone();
            tokio::spawn(async move { shell.run().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(shell.state().await, ShellState::Rendering);

        shell.edit("<p>typing</p>").await;
        assert_eq!(shell.state().await, ShellState::Idle);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(running.await.unwrap().is_none());
        let view = shell.view();
        assert_eq!(view.state, ShellState::Idle);
        assert!(frame_document(&view).contains("<p>start</p>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_error_panel() {
        let (shell, _spy) = mount(PreviewOptions::new("p {}", Language::Style)).await;
        assert!(!shell.dismiss_error().await);

        shell.edit("p {} </style>").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(shell.dismiss_error().await);
        assert!(!shell.dismiss_error().await);
        match shell.view().view {
            Some(RenderedView::Error(panel)) => assert!(panel.is_dismissed()),
            other => panic!("expected an error panel, got {:?}", other),
        }

        shell.edit("p { color: teal }").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(frame_document(&shell.view()).contains("color: teal"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_initial_code_exactly() {
        let initial = "  <p>h\u{e9}llo</p>\r\n\t<!-- keep -->\n";
        let (shell, spy) = mount(PreviewOptions::new(initial, Language::Markup)).await;

        shell.edit("<p>changed</p>").await;
        shell.edit("").await;
        let view = shell.reset().await.unwrap();

        assert_eq!(shell.code().await, initial);
        assert_eq!(spy.calls().last().map(String::as_str), Some(initial));
        let RenderedView::Frame(frame) = view else {
            panic!("expected a frame");
        };
        assert!(frame.document.contains(initial));

        // the edits' pending timer was superseded by the reset
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(spy.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_only_ignores_edit_and_reset() {
        let changes = Arc::new(StdMutex::new(Vec::new()));
        let seen = changes.clone();
        let options = PreviewOptions::new("body {}", Language::Style)
            .read_only(true)
            .on_code_change(move |code| seen.lock().unwrap().push(code.to_string()));
        let (shell, spy) = mount(options).await;

        shell.edit("p { color: red }").await;
        assert!(shell.reset().await.is_none());
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(shell.code().await, "body {}");
        assert_eq!(spy.calls().len(), 1);
        assert!(changes.lock().unwrap().is_empty());

        // running is still allowed
        assert!(shell.run().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_preview_renders_on_run() {
        let runs = Arc::new(StdMutex::new(Vec::new()));
        let seen = runs.clone();
        let options = PreviewOptions::new("", Language::Script)
            .auto_preview(false)
            .on_code_run(move |code| seen.lock().unwrap().push(code.to_string()));
        let (shell, spy) = mount(options).await;

        shell.edit("console.log('later')").await;
        assert_eq!(shell.state().await, ShellState::Idle);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(spy.calls().len(), 1);

        shell.run().await;
        assert_eq!(spy.calls().last().map(String::as_str), Some("console.log('later')"));
        assert_eq!(*runs.lock().unwrap(), vec!["console.log('later')"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_skips_debounce() {
        let (shell, spy) = mount(PreviewOptions::new("", Language::Markup)).await;
        shell.edit("<b>now</b>").await;
        let view = shell.run().await.unwrap();
        assert!(view.to_html().contains("&lt;b&gt;now&lt;/b&gt;"));

        // the debounce timer from the edit was cancelled by run
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(spy.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_change_callback_sees_every_edit() {
        let changes = Arc::new(StdMutex::new(Vec::new()));
        let seen = changes.clone();
        let options = PreviewOptions::new("a", Language::Markup)
            .on_code_change(move |code| seen.lock().unwrap().push(code.to_string()));
        let (shell, _spy) = mount(options).await;

        shell.edit("ab").await;
        shell.edit("abc").await;
        shell.reset().await;
        assert_eq!(*changes.lock().unwrap(), vec!["ab", "abc", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesis_error_then_recovery() {
        let (shell, _spy) = mount(PreviewOptions::new("p {}", Language::Style)).await;

        shell.edit("p {} </style>").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(shell.view().view, Some(RenderedView::Error(_))));

        shell.edit("p { color: teal }").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(frame_document(&shell.view()).contains("color: teal"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_layout_controls() {
        let (shell, spy) = mount(PreviewOptions::new("one\ntwo\nthree", Language::Markup)).await;

        assert_eq!(shell.toggle_preview_mode().await, PreviewMode::PreviewOnly);
        assert_eq!(shell.toggle_preview_mode().await, PreviewMode::CodeOnly);
        assert_eq!(shell.toggle_preview_mode().await, PreviewMode::Split);
        assert!(!shell.toggle_line_numbers().await);
        assert_eq!(shell.line_count().await, 3);
        assert_eq!(spy.calls().len(), 1);

        assert_eq!(shell.toggle_theme().await, Theme::Dark);
        assert_eq!(spy.calls().len(), 2);
        assert!(frame_document(&shell.view()).contains(r#"data-theme="dark""#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_transitions() {
        let (shell, _spy) = mount(PreviewOptions::new("", Language::Markup)).await;
        let mut rx = shell.subscribe();

        shell.edit("<i>x</i>").await;
        assert_eq!(rx.borrow_and_update().state, ShellState::PendingRecompute);

        tokio::time::sleep(Duration::from_secs(2)).await;
        rx.changed().await.unwrap();
        let view = rx.borrow_and_update().clone();
        assert_eq!(view.state, ShellState::Idle);
        assert!(frame_document(&view).contains("<i>x</i>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_discards_pending_work() {
        let (shell, spy) = mount(PreviewOptions::new("", Language::Markup)).await;
        shell.edit("<p>never</p>").await;
        shell.unmount().await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(spy.calls().len(), 1);
        assert!(shell.view().view.is_none());
        shell.edit("<p>ignored</p>").await;
        assert!(shell.run().await.is_none());
        assert_eq!(shell.code().await, "<p>never</p>");
    }
}
