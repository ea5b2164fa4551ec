//! Headless frame - executes a synthesized script program in a sandboxed V8 isolate.
//!
//! This is the isolated realm without a DOM. Each execution gets:
//! - a fresh `JsRuntime` on its own thread (nothing survives between runs)
//! - the console bridge, with records captured into `OpState`
//! - `setTimeout`/`setInterval` and their `clear*` counterparts
//! - a heap limit and a wall-clock limit
//! - no `Deno` global, no fs, net, env, or module loading

use crate::bridge::{
    preview_bridge, BridgeOutput, OutputRecord, Severity, UncaughtError, BRIDGE_SOURCE, OP_SINK_SOURCE,
    USER_SCRIPT_URL,
};
use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::synth::{ScriptProgram, SynthesizedDocument};
use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Extra heap granted after the limit is hit so termination can propagate.
const HEAP_GRACE: usize = 1024 * 1024;

/// How a headless execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Termination {
    /// The program and every timer it scheduled ran to the end.
    Completed,
    TimedOut,
    HeapLimitExceeded,
    /// The document needs a DOM (markup, style, component).
    NotExecutable,
}

/// Everything observable from one headless execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub records: Vec<OutputRecord>,
    pub uncaught_error: Option<UncaughtError>,
    pub termination: Termination,
}

impl ExecutionOutcome {
    fn not_executable() -> Self {
        Self {
            records: Vec::new(),
            uncaught_error: None,
            termination: Termination::NotExecutable,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.records.iter().filter(|r| r.severity == severity).count()
    }
}

/// Runs synthesized script documents without a browser.
#[derive(Debug, Clone, Default)]
pub struct HeadlessFrame {
    config: SandboxConfig,
}

impl HeadlessFrame {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Execute the document's script program in a fresh isolate.
    ///
    /// Errors raised by user code (including syntax errors) are part of the
    /// outcome, not an `Err`. `Err` means the sandbox itself failed.
    pub async fn execute(&self, document: &SynthesizedDocument) -> Result<ExecutionOutcome> {
        let Some(program) = document.program.clone() else {
            debug!(language = %document.language, "document is not headless-executable");
            return Ok(ExecutionOutcome::not_executable());
        };
        let config = self.config.clone();

        // JsRuntime is !Send; give each execution its own thread and runtime.
        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    if tx.send(Err(SandboxError::Io(e))).is_err() {
                        warn!("headless frame receiver dropped");
                    }
                    return;
                }
            };
            let result = rt.block_on(run_program(&config, &program));
            if tx.send(result).is_err() {
                warn!("headless frame receiver dropped before the outcome was sent");
            }
        });

        rx.await
            .map_err(|_| SandboxError::Bridge("headless frame thread panicked".into()))?
    }
}

/// Create a fresh isolate with the bridge ops and V8 heap limits.
fn create_runtime(config: &SandboxConfig) -> JsRuntime {
    let create_params = deno_core::v8::Isolate::create_params().heap_limits(0, config.max_heap_size);

    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![preview_bridge::init_ops_and_esm()],
        create_params: Some(create_params),
        ..Default::default()
    });

    runtime.op_state().borrow_mut().put(BridgeOutput::default());
    runtime
}

fn install(runtime: &mut JsRuntime, name: &'static str, source: &'static str) -> Result<()> {
    runtime
        .execute_script(name, source)
        .map(|_| ())
        .map_err(|e| SandboxError::Bridge(format!("{}: {}", name, e)))
}

/// First line of a JS error, without the `Uncaught ` prefix V8 adds.
fn error_headline(err: &impl std::fmt::Display) -> String {
    let text = err.to_string();
    let first = text.lines().next().unwrap_or_default();
    first.strip_prefix("Uncaught ").unwrap_or(first).to_string()
}

async fn run_program(config: &SandboxConfig, program: &ScriptProgram) -> Result<ExecutionOutcome> {
    let mut runtime = create_runtime(config);

    // --- heap limit ---
    let heap_hit = Arc::new(AtomicBool::new(false));
    {
        let heap_hit = heap_hit.clone();
        let handle = runtime.v8_isolate().thread_safe_handle();
        runtime.add_near_heap_limit_callback(move |current, _initial| {
            if !heap_hit.swap(true, Ordering::SeqCst) {
                handle.terminate_execution();
            }
            current + HEAP_GRACE
        });
    }

    install(&mut runtime, "[preview:bridge]", BRIDGE_SOURCE)?;
    install(&mut runtime, "[preview:sink]", OP_SINK_SOURCE)?;

    // --- CPU watchdog ---
    let timed_out = Arc::new(AtomicBool::new(false));
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
    let watchdog = {
        let handle = runtime.v8_isolate().thread_safe_handle();
        let timed_out = timed_out.clone();
        let timeout = config.timeout();
        std::thread::spawn(move || {
            if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
                timed_out.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            }
        })
    };

    let mut user_error = None;
    if let Err(e) = runtime.execute_script("[preview:helpers]", program.helpers.clone()) {
        user_error = Some(error_headline(&e));
    } else if let Err(e) = runtime.execute_script(USER_SCRIPT_URL, program.user.clone()) {
        user_error = Some(error_headline(&e));
    } else {
        match tokio::time::timeout(config.timeout(), runtime.run_event_loop(PollEventLoopOptions::default())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => user_error = Some(error_headline(&e)),
            Err(_) => timed_out.store(true, Ordering::SeqCst),
        }
    }

    // The watchdog holds an isolate handle; it must finish before the runtime drops.
    let _ = cancel_tx.send(());
    let _ = watchdog.join();

    let termination = if heap_hit.load(Ordering::SeqCst) {
        Termination::HeapLimitExceeded
    } else if timed_out.load(Ordering::SeqCst) {
        Termination::TimedOut
    } else {
        Termination::Completed
    };

    let mut output = runtime
        .op_state()
        .borrow_mut()
        .try_take::<BridgeOutput>()
        .unwrap_or_default();
    if termination == Termination::Completed {
        if let Some(message) = user_error {
            output.push_host_error(message);
        }
    }

    debug!(
        records = output.records.len(),
        uncaught = output.uncaught_error.is_some(),
        ?termination,
        "headless execution finished"
    );

    Ok(ExecutionOutcome {
        records: output.records,
        uncaught_error: output.uncaught_error,
        termination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{DocumentSynthesizer, Language, SourceUnit, Synthesize};
    use std::time::Duration;

    async fn run(code: &str) -> ExecutionOutcome {
        run_with(SandboxConfig::default(), code).await
    }

    async fn run_with(config: SandboxConfig, code: &str) -> ExecutionOutcome {
        let document = DocumentSynthesizer::new(&config)
            .synthesize(&SourceUnit::new(code, Language::Script))
            .unwrap();
        HeadlessFrame::new(config).execute(&document).await.unwrap()
    }

    fn texts(outcome: &ExecutionOutcome) -> Vec<&str> {
        outcome.records.iter().map(|r| r.rendered_text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_logs_in_order() {
        let outcome = run(r#"console.log("hi"); console.log(1 + 1);"#).await;
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(texts(&outcome), vec!["hi", "2"]);
        assert_eq!(outcome.records[0].sequence, 0);
        assert_eq!(outcome.records[1].sequence, 1);
        assert!(outcome.records.iter().all(|r| r.severity == Severity::Log));
        assert!(outcome.uncaught_error.is_none());
    }

    #[tokio::test]
    async fn test_throw_stops_user_code() {
        let outcome = run(r#"throw new Error("boom"); console.log("after");"#).await;
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].severity, Severity::Error);
        assert!(outcome.records[0].rendered_text.contains("boom"));
        assert_eq!(outcome.count(Severity::Log), 0);

        let uncaught = outcome.uncaught_error.unwrap();
        assert_eq!(uncaught.message, "Error: boom");
        assert_eq!(uncaught.line_hint, Some(1));
    }

    #[tokio::test]
    async fn test_line_hint_points_into_user_code() {
        let outcome = run("const a = 1;\nconst b = 2;\nnull.x;").await;
        let uncaught = outcome.uncaught_error.unwrap();
        assert!(uncaught.message.starts_with("TypeError"));
        assert_eq!(uncaught.line_hint, Some(3));
    }

    #[tokio::test]
    async fn test_syntax_error_is_single_error_record() {
        let outcome = run("console.log('never';").await;
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].severity, Severity::Error);
        assert!(outcome.records[0].rendered_text.contains("SyntaxError"));
    }

    #[tokio::test]
    async fn test_each_run_starts_fresh() {
        let first = run("globalThis.counter = 41; console.log('one'); console.log('two');").await;
        assert_eq!(first.records.len(), 2);

        let second = run("console.log(typeof globalThis.counter);").await;
        assert_eq!(texts(&second), vec!["undefined"]);
        assert_eq!(second.records[0].sequence, 0);
    }

    #[tokio::test]
    async fn test_same_code_twice_restarts_sequence() {
        let frame = HeadlessFrame::new(SandboxConfig::default());
        let unit = SourceUnit::new("console.log('a'); console.log('b');", Language::Script);
        let document = DocumentSynthesizer::default().synthesize(&unit).unwrap();

        for _ in 0..2 {
            let outcome = frame.execute(&document).await.unwrap();
            let sequences: Vec<u32> = outcome.records.iter().map(|r| r.sequence).collect();
            assert_eq!(sequences, vec![0, 1]);
            assert_eq!(texts(&outcome), vec!["a", "b"]);
        }
    }

    #[tokio::test]
    async fn test_value_rendering() {
        let outcome = run(
            r#"
            const cyclic = { name: "loop" };
            cyclic.self = cyclic;
            console.log(cyclic);
            console.log({ a: 1 });
            console.log(function greet() {});
            console.warn("careful", 3, null, undefined);
            console.error(new RangeError("bad"));
            console.info(10n);
            "#,
        )
        .await;
        assert_eq!(outcome.termination, Termination::Completed);
        let t = texts(&outcome);
        assert_eq!(t[0], "[object Object]");
        assert_eq!(t[1], "{\n  \"a\": 1\n}");
        assert_eq!(t[2], "[Function: greet]");
        assert_eq!(t[3], "careful 3 null undefined");
        assert_eq!(outcome.records[3].severity, Severity::Warn);
        assert_eq!(t[4], "RangeError: bad");
        assert_eq!(outcome.records[4].severity, Severity::Error);
        assert_eq!(t[5], "10n");
        // a logged error is not an uncaught error
        assert!(outcome.uncaught_error.is_none());
    }

    #[tokio::test]
    async fn test_timers_run_in_order() {
        let outcome = run(
            r#"
            setTimeout(() => console.log("late"), 20);
            setTimeout(() => console.log("early"), 1);
            const id = setTimeout(() => console.log("cancelled"), 5);
            clearTimeout(id);
            let ticks = 0;
            const interval = setInterval(() => {
                ticks += 1;
                if (ticks === 3) { clearInterval(interval); console.log("ticks", ticks); }
            }, 2);
            "#,
        )
        .await;
        assert_eq!(outcome.termination, Termination::Completed);
        let t = texts(&outcome);
        assert!(!t.contains(&"cancelled"));
        assert!(t.contains(&"ticks 3"));
        let early = t.iter().position(|s| *s == "early").unwrap();
        let late = t.iter().position(|s| *s == "late").unwrap();
        assert!(early < late);
    }

    #[tokio::test]
    async fn test_async_rejection_is_reported() {
        let outcome = run("setTimeout(() => { throw new Error('tick failed'); }, 1);").await;
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].rendered_text.contains("tick failed"));
        assert!(outcome.uncaught_error.is_some());
    }

    #[tokio::test]
    async fn test_show_helper_returns_value() {
        let outcome = run("const x = show(6 * 7); console.log(x + 1);").await;
        assert_eq!(texts(&outcome), vec!["42", "43"]);
    }

    #[tokio::test]
    async fn test_deno_global_is_removed() {
        let outcome = run("console.log(typeof Deno);").await;
        assert_eq!(texts(&outcome), vec!["undefined"]);
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let config = SandboxConfig { timeout_ms: 300, ..Default::default() };
        let start = std::time::Instant::now();
        let outcome = run_with(config, "console.log('start'); while (true) {}").await;
        assert_eq!(outcome.termination, Termination::TimedOut);
        assert_eq!(texts(&outcome), vec!["start"]);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_pending_interval_times_out() {
        let config = SandboxConfig { timeout_ms: 200, ..Default::default() };
        let outcome = run_with(config, "setInterval(() => {}, 10);").await;
        assert_eq!(outcome.termination, Termination::TimedOut);
    }

    #[tokio::test]
    async fn test_heap_limit_terminates() {
        let config = SandboxConfig {
            max_heap_size: 16 * 1024 * 1024,
            timeout_ms: 30_000,
            ..Default::default()
        };
        let outcome = run_with(
            config,
            "const arr = []; while (true) { arr.push(new Array(100000).fill('x')); }",
        )
        .await;
        assert_ne!(outcome.termination, Termination::Completed);
    }

    #[tokio::test]
    async fn test_markup_is_not_executable() {
        let document = DocumentSynthesizer::default()
            .synthesize(&SourceUnit::new("<p>hi</p>", Language::Markup))
            .unwrap();
        let outcome = HeadlessFrame::default().execute(&document).await.unwrap();
        assert_eq!(outcome.termination, Termination::NotExecutable);
        assert!(outcome.records.is_empty());
    }
}
