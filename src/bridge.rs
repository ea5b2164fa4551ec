//! Console Bridge - makes logging calls inside a frame observable.
//!
//! The bridge is plain JavaScript that is installed into one realm's global
//! object (`__previewInstallBridge(realm, sink)`), never into the host's. The
//! same source runs in two places:
//! - inside a browser frame, where the sink paints lines into `#preview-output`
//! - inside a headless V8 isolate, where the sink calls the ops below and the
//!   records land in [`BridgeOutput`] in the isolate's `OpState`
//!
//! Sequence numbers are owned by the bridge instance, so every fresh realm
//! starts at zero.

use deno_core::{op2, OpState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name the user script reports in stack traces (via `//# sourceURL`).
pub const USER_SCRIPT_URL: &str = "preview-user.js";

/// Lines the guard adds in front of user code.
pub const USER_LINE_OFFSET: u32 = 1;

/// Installer and serializer, realm-agnostic. Defines
/// `globalThis.__previewInstallBridge`.
pub const BRIDGE_SOURCE: &str = r#"(function (host) {
  "use strict";

  function describeFunction(fn) {
    return fn.name ? "[Function: " + fn.name + "]" : "[Function (anonymous)]";
  }

  function serialize(value) {
    switch (typeof value) {
      case "string":
        return value;
      case "function":
        return describeFunction(value);
      case "symbol":
        return "[Symbol: " + (value.description || "") + "]";
      case "bigint":
        return value.toString() + "n";
      case "object":
        break;
      default:
        return String(value);
    }
    if (value === null) {
      return "null";
    }
    if (value instanceof Error) {
      return value.name + ": " + value.message;
    }
    try {
      const text = JSON.stringify(value, function (_key, v) {
        if (typeof v === "function") return describeFunction(v);
        if (typeof v === "bigint") return v.toString() + "n";
        if (typeof v === "symbol") return "[Symbol: " + (v.description || "") + "]";
        if (v === undefined) return "undefined";
        return v;
      }, 2);
      return text === undefined ? String(value) : text;
    } catch (_err) {
      try {
        return String(value);
      } catch (_err2) {
        return "[object]";
      }
    }
  }

  function lineHintOf(err, scriptUrl, lineOffset) {
    const stack = err && typeof err.stack === "string" ? err.stack : "";
    const marker = scriptUrl + ":";
    for (const line of stack.split("\n")) {
      const at = line.indexOf(marker);
      if (at === -1) continue;
      const digits = /^(\d+)/.exec(line.slice(at + marker.length));
      if (digits) {
        const hint = Number(digits[1]) - lineOffset;
        return hint > 0 ? hint : null;
      }
    }
    return null;
  }

  host.__previewInstallBridge = function (realm, sink, options) {
    const opts = options || {};
    const scriptUrl = opts.scriptUrl || "preview-user.js";
    const lineOffset = typeof opts.lineOffset === "number" ? opts.lineOffset : 0;
    const target = realm.console || {};
    const original = {};
    let sequence = 0;

    function emit(severity, args) {
      const record = {
        sequence: sequence++,
        severity: severity,
        renderedText: Array.prototype.map.call(args, serialize).join(" "),
      };
      try {
        sink.append(record);
      } catch (_err) {
        // a broken sink must not take user code down with it
      }
      return record;
    }

    function forward(method, severity) {
      original[method] = typeof target[method] === "function" ? target[method] : null;
      target[method] = function () {
        if (original[method]) {
          try {
            original[method].apply(target, arguments);
          } catch (_err) {}
        }
        emit(severity, arguments);
      };
    }

    forward("log", "log");
    forward("info", "log");
    forward("debug", "log");
    forward("warn", "warn");
    forward("error", "error");
    realm.console = target;

    function clearOutput() {
      sequence = 0;
      try {
        sink.clear();
      } catch (_err) {}
    }

    function reportError(err, lineHint) {
      const message = err instanceof Error
        ? err.name + ": " + err.message
        : "Uncaught " + serialize(err);
      const hint = typeof lineHint === "number" ? lineHint : lineHintOf(err, scriptUrl, lineOffset);
      emit("error", [message]);
      try {
        sink.uncaught({ message: message, lineHint: hint });
      } catch (_err) {}
    }

    const bridge = Object.freeze({
      emit: emit,
      clearOutput: clearOutput,
      reportError: reportError,
      show: function (value) {
        emit("log", [value]);
        return value;
      },
    });
    Object.defineProperty(realm, "__preview", { value: bridge, configurable: false, writable: false });

    if (typeof realm.addEventListener === "function") {
      realm.addEventListener("error", function (event) {
        const fromUser = typeof event.filename === "string" && event.filename.indexOf(scriptUrl) !== -1;
        reportError(event.error || new Error(event.message), fromUser ? event.lineno - lineOffset : undefined);
      });
      realm.addEventListener("unhandledrejection", function (event) {
        reportError(event.reason);
      });
    }

    clearOutput();
    return bridge;
  };
})(globalThis);
"#;

/// Sink that paints records into the frame's own document.
pub const DOM_SINK_SOURCE: &str = r#"__previewInstallBridge(window, {
  append: function (record) {
    const output = document.getElementById("preview-output");
    if (!output) return;
    output.hidden = false;
    const line = document.createElement("div");
    line.className = "preview-line preview-" + record.severity;
    line.dataset.sequence = String(record.sequence);
    line.textContent = record.renderedText;
    output.appendChild(line);
  },
  clear: function () {
    const output = document.getElementById("preview-output");
    if (output) output.textContent = "";
    const panel = document.getElementById("preview-error");
    if (panel) {
      panel.hidden = true;
      panel.textContent = "";
    }
  },
  uncaught: function (err) {
    const panel = document.getElementById("preview-error");
    if (!panel) return;
    panel.hidden = false;
    panel.textContent = err.lineHint ? err.message + " (line " + err.lineHint + ")" : err.message;
  },
}, { scriptUrl: "preview-user.js", lineOffset: 1 });
"#;

/// Sink backed by the bridge ops, for the headless isolate. Also provides
/// timers on top of `op_bridge_sleep` and removes `Deno` from the realm.
pub const OP_SINK_SOURCE: &str = r#"((ops) => {
  __previewInstallBridge(globalThis, {
    append: (record) => ops.op_bridge_record(record.sequence, record.severity, record.renderedText),
    clear: () => ops.op_bridge_clear(),
    uncaught: (err) => ops.op_bridge_uncaught(err.message, typeof err.lineHint === "number" ? err.lineHint : 0),
  }, { scriptUrl: "preview-user.js", lineOffset: 1 });

  const timers = new Set();
  let nextTimerId = 1;
  function schedule(repeat, callback, delay, args) {
    const id = nextTimerId++;
    const ms = Math.max(0, Math.min(Number(delay) || 0, 0x7fffffff)) >>> 0;
    timers.add(id);
    const tick = () => {
      ops.op_bridge_sleep(ms).then(() => {
        if (!timers.has(id)) return;
        if (!repeat) timers.delete(id);
        try {
          if (typeof callback === "function") callback(...args);
        } catch (err) {
          globalThis.__preview.reportError(err);
        }
        if (repeat && timers.has(id)) tick();
      });
    };
    tick();
    return id;
  }
  globalThis.setTimeout = (callback, delay, ...args) => schedule(false, callback, delay, args);
  globalThis.setInterval = (callback, delay, ...args) => schedule(true, callback, delay, args);
  globalThis.clearTimeout = (id) => { timers.delete(id); };
  globalThis.clearInterval = (id) => { timers.delete(id); };

  delete globalThis.Deno;
})(Deno.core.ops);
"#;

/// Severity of one output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Log,
    Warn,
    Error,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "log" => Some(Severity::Log),
            "warn" => Some(Severity::Warn),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Log => "LOG",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

/// One line of captured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub sequence: u32,
    pub severity: Severity,
    pub rendered_text: String,
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}#{}] {}", self.severity.label(), self.sequence, self.rendered_text)
    }
}

/// Error that escaped user code and was caught by the guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncaughtError {
    pub message: String,
    /// 1-based line in the user's code, when the stack trace allowed it.
    pub line_hint: Option<u32>,
}

/// Captured output of one headless realm.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BridgeOutput {
    pub records: Vec<OutputRecord>,
    pub uncaught_error: Option<UncaughtError>,
}

impl BridgeOutput {
    fn next_sequence(&self) -> u32 {
        self.records.last().map(|r| r.sequence + 1).unwrap_or(0)
    }

    /// Record an error the realm could not report itself (syntax errors,
    /// unhandled rejections surfacing from the event loop).
    pub fn push_host_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.records.push(OutputRecord {
            sequence: self.next_sequence(),
            severity: Severity::Error,
            rendered_text: message.clone(),
        });
        if self.uncaught_error.is_none() {
            self.uncaught_error = Some(UncaughtError { message, line_hint: None });
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.records.iter().filter(|r| r.severity == severity).count()
    }
}

// ============================================================================
// Bridge Ops
// ============================================================================

#[op2(fast)]
pub fn op_bridge_record(state: &mut OpState, sequence: u32, #[string] severity: &str, #[string] text: &str) {
    let Some(severity) = Severity::parse(severity) else {
        return;
    };
    if let Some(output) = state.try_borrow_mut::<BridgeOutput>() {
        output.records.push(OutputRecord {
            sequence,
            severity,
            rendered_text: text.to_string(),
        });
    }
}

#[op2(fast)]
pub fn op_bridge_clear(state: &mut OpState) {
    if let Some(output) = state.try_borrow_mut::<BridgeOutput>() {
        output.records.clear();
        output.uncaught_error = None;
    }
}

#[op2(fast)]
pub fn op_bridge_uncaught(state: &mut OpState, #[string] message: &str, line_hint: u32) {
    if let Some(output) = state.try_borrow_mut::<BridgeOutput>() {
        output.uncaught_error = Some(UncaughtError {
            message: message.to_string(),
            line_hint: (line_hint > 0).then_some(line_hint),
        });
    }
}

#[op2(async)]
pub async fn op_bridge_sleep(ms: u32) {
    tokio::time::sleep(std::time::Duration::from_millis(u64::from(ms))).await;
}

deno_core::extension!(
    preview_bridge,
    ops = [
        op_bridge_record,
        op_bridge_clear,
        op_bridge_uncaught,
        op_bridge_sleep,
    ],
);
