//! Document Synthesizer - turns a source unit into one self-contained document.
//!
//! Each language has its own strategy, selected by an exhaustive match:
//! - `Markup`: the code goes into the body unmodified
//! - `Style`: the code becomes a `<style>` block over a fixed demo body
//! - `Script`: bridge, helper namespace, then the user code in a guarded block
//! - `Component`: pinned React runtime + in-browser JSX transform, the user
//!   code, and a best-effort automatic render call
//!
//! Errors thrown by user code are not synthesis errors. They are caught inside
//! the generated document and reported through the bridge.

use crate::bridge::{BRIDGE_SOURCE, DOM_SINK_SOURCE, USER_SCRIPT_URL};
use crate::config::{ComponentRuntime, SandboxConfig};
use crate::error::SynthesisError;
use crate::sanitize::escape_html;
use crate::template::{self, COMPONENT_ROOT_ID, ROOT_ID};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Hooks made available to component code without an import.
const COMPONENT_GLOBALS: &str = "const { useState, useEffect, useLayoutEffect, useRef, useMemo, useCallback, useReducer, useContext, createContext, Fragment } = React;";

/// Helper namespace for script previews: `show(value)`, `h(tag, props, ...children)`
/// and `mount(...nodes)`.
const SCRIPT_HELPERS: &str = r#"(function (realm) {
  "use strict";
  realm.show = realm.__preview.show;
  realm.h = function (tag, props) {
    const el = document.createElement(tag);
    const attrs = props || {};
    for (const key of Object.keys(attrs)) {
      const value = attrs[key];
      if (key === "style" && value && typeof value === "object") {
        Object.assign(el.style, value);
      } else if (key.slice(0, 2) === "on" && typeof value === "function") {
        el.addEventListener(key.slice(2).toLowerCase(), value);
      } else if (key === "className") {
        el.className = String(value);
      } else {
        el.setAttribute(key, String(value));
      }
    }
    const children = Array.prototype.slice.call(arguments, 2).flat(Infinity);
    for (const child of children) {
      if (child === null || child === undefined || child === false) continue;
      el.append(child instanceof Node ? child : document.createTextNode(String(child)));
    }
    return el;
  };
  realm.mount = function () {
    const root = document.getElementById("preview-root");
    for (const node of arguments) root.append(node);
    return root;
  };
})(globalThis);
"#;

static SCRIPT_CLOSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</(script)").unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e))
});

static STYLE_CLOSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</style").unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e))
});

static IMPORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s+(?:[\w*${}\s,]+\s+from\s+)?['"][^'"\n]+['"][ \t]*;?[ \t]*$"#)
        .unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e))
});

static EXPORT_DEFAULT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*export[ \t]+default[ \t]+([A-Za-z_$][\w$]*)[ \t]*;?[ \t]*$")
        .unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e))
});

static EXPORT_DEFAULT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*export[ \t]+default[ \t]+(?:async[ \t]+)?(?:function|class)[ \t]*\*?[ \t]*([A-Z][\w$]*)")
        .unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e))
});

/// `export default` in front of a function or class, named or not.
static EXPORT_DEFAULT_DECL_ANY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export[ \t]+default[ \t]+((?:async[ \t]+)?(?:function\b[ \t]*\*?|class\b)[ \t]*([A-Za-z_$][\w$]*)?)")
        .unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e))
});

static EXPORT_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export[ \t]+(async|function|class|const|let|var)\b")
        .unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e))
});

static EXPORT_DEFAULT_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export[ \t]+default[ \t]+")
        .unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e))
});

static RENDER_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"ReactDOM\s*\.\s*(?:render|hydrate)\s*\(|\b(?:createRoot|hydrateRoot)\s*\(|\broot\s*\.\s*render\s*\(")
        .unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e))
});

/// Top-level (column zero) capitalized declarations that look like components.
static COMPONENT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?m)^(?:export[ \t]+(?:default[ \t]+)?)?(?:",
        r"(?:async[ \t]+)?function[ \t]*([A-Z][\w$]*)\s*\(",
        r"|class[ \t]+([A-Z][\w$]*)[ \t]+extends[ \t]+(?:React\s*\.\s*)?(?:Pure)?Component\b",
        r"|(?:const|let|var)[ \t]+([A-Z][\w$]*)\s*=\s*(?:React\s*\.\s*)?",
        r"(?:memo\s*\(|forwardRef\s*\(|function\b|\([^)]*\)\s*=>|[A-Za-z_$][\w$]*\s*=>)",
        r")"
    ))
    .unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e))
});

/// Name given to an anonymous `export default` expression.
const ANONYMOUS_DEFAULT: &str = "PreviewDefaultExport";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown language '{0}' (expected markup, style, script or component)")]
pub struct UnknownLanguage(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown theme '{0}' (expected light or dark)")]
pub struct UnknownTheme(pub String);

/// Source language, which selects the synthesis strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Markup,
    Style,
    Script,
    Component,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Markup => "markup",
            Language::Style => "style",
            Language::Script => "script",
            Language::Component => "component",
        }
    }
}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markup" | "html" => Ok(Language::Markup),
            "style" | "css" => Ok(Language::Style),
            "script" | "javascript" | "js" => Ok(Language::Script),
            "component" | "jsx" | "react" => Ok(Language::Component),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl FromStr for Theme {
    type Err = UnknownTheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            _ => Err(UnknownTheme(s.to_string())),
        }
    }
}

/// The thing being previewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub code: String,
    pub language: Language,
    #[serde(default)]
    pub theme: Theme,
}

impl SourceUnit {
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
            theme: Theme::default(),
        }
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }
}

/// Script pieces of a script-language document, in execution order after
/// the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptProgram {
    pub helpers: String,
    /// User code inside the guard, tagged with [`USER_SCRIPT_URL`].
    pub user: String,
}

/// Why the heuristic picked a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectionBasis {
    DefaultExport,
    ConventionalName,
    LastDeclaration,
}

/// Outcome of the component render-call heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum RenderTarget {
    /// The code renders itself.
    Explicit,
    Detected { name: String, basis: DetectionBasis },
    /// Nothing found; the preview stays empty apart from a hint.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedDocument {
    pub language: Language,
    pub theme: Theme,
    /// The complete, self-contained document.
    pub markup: String,
    /// Present for the script language only.
    pub program: Option<ScriptProgram>,
    /// Present for the component language only.
    pub render_target: Option<RenderTarget>,
}

/// Either a renderable document or the reason none could be built.
pub type SynthesisResult = Result<SynthesizedDocument, SynthesisError>;

/// Seam between the shell and the synthesizer.
pub trait Synthesize: Send + Sync {
    fn synthesize(&self, unit: &SourceUnit) -> SynthesisResult;
}

#[derive(Debug, Clone)]
pub struct DocumentSynthesizer {
    max_code_size: usize,
    runtime: ComponentRuntime,
}

impl Default for DocumentSynthesizer {
    fn default() -> Self {
        Self::new(&SandboxConfig::default())
    }
}

impl DocumentSynthesizer {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            max_code_size: config.max_code_size,
            runtime: config.component_runtime.clone(),
        }
    }

    fn check_code(&self, unit: &SourceUnit) -> Result<(), SynthesisError> {
        let len = unit.code.len();
        if len > self.max_code_size {
            return Err(SynthesisError::CodeTooLarge { len, max: self.max_code_size });
        }
        if let Some(offset) = unit.code.find('\0') {
            return Err(SynthesisError::NulCharacter { offset });
        }
        Ok(())
    }

    fn markup_document(&self, unit: &SourceUnit) -> SynthesizedDocument {
        let head = bridge_script_tag();
        let body = format!("{}\n{}", template::output_area(false), unit.code);
        SynthesizedDocument {
            language: Language::Markup,
            theme: unit.theme,
            markup: template::document_shell(unit.theme, &head, &body),
            program: None,
            render_target: None,
        }
    }

    fn style_document(&self, unit: &SourceUnit) -> Result<SynthesizedDocument, SynthesisError> {
        if let Some(m) = STYLE_CLOSE.find(&unit.code) {
            return Err(SynthesisError::EmbeddedCloseTag { tag: "style", offset: m.start() });
        }
        let head = format!("<style id=\"preview-user-style\">\n{}\n</style>", unit.code);
        Ok(SynthesizedDocument {
            language: Language::Style,
            theme: unit.theme,
            markup: template::document_shell(unit.theme, &head, template::STYLE_DEMO_BODY),
            program: None,
            render_target: None,
        })
    }

    fn script_document(&self, unit: &SourceUnit) -> SynthesizedDocument {
        let program = ScriptProgram {
            helpers: SCRIPT_HELPERS.to_string(),
            user: guard_user_code(&neutralize_script_close(&unit.code)),
        };
        let body = format!(
            "<h3 class=\"preview-heading\">Output</h3>\n<div id=\"{root}\"></div>\n{output}\n{bridge}\n<script>\n{helpers}</script>\n<script>\n{user}</script>",
            root = ROOT_ID,
            output = template::output_area(true),
            bridge = bridge_script_tag(),
            helpers = program.helpers,
            user = program.user,
        );
        SynthesizedDocument {
            language: Language::Script,
            theme: unit.theme,
            markup: template::document_shell(unit.theme, "", &body),
            program: Some(program),
            render_target: None,
        }
    }

    fn component_document(&self, unit: &SourceUnit) -> SynthesizedDocument {
        let prepared = prepare_component_code(&unit.code);
        let target = detect_render_target(&unit.code);
        let render_call = match &target {
            RenderTarget::Detected { name, .. } => format!(
                "ReactDOM.createRoot(document.getElementById(\"{}\")).render(React.createElement({}));",
                COMPONENT_ROOT_ID, name
            ),
            RenderTarget::Explicit | RenderTarget::NotFound => String::new(),
        };
        let hint = match target {
            RenderTarget::NotFound => "<p class=\"preview-hint\">No component was found to render automatically. Add an explicit render call, for example <code>ReactDOM.createRoot(document.getElementById(\"root\")).render(&lt;App /&gt;);</code></p>\n",
            _ => "",
        };

        let head = format!(
            "<script src=\"{}\" crossorigin></script>\n<script src=\"{}\" crossorigin></script>\n<script src=\"{}\"></script>",
            escape_html(&self.runtime.react_url),
            escape_html(&self.runtime.react_dom_url),
            escape_html(&self.runtime.babel_url),
        );
        let runtime_missing = format!(
            "Component runtime failed to load from {}",
            self.runtime.react_url.replace('\\', "\\\\").replace('"', "\\\"")
        );
        let user = neutralize_script_close(&format!(
            "try {{\n  if (typeof React === \"undefined\" || typeof ReactDOM === \"undefined\") {{\n    throw new Error(\"{missing}\");\n  }}\n  {globals}\n  {{\n{code}\n{render}\n  }}\n}} catch (__previewError) {{\n  window.__preview.reportError(__previewError);\n}}\n",
            missing = runtime_missing,
            globals = COMPONENT_GLOBALS,
            code = prepared,
            render = render_call,
        ));
        let body = format!(
            "<div id=\"{root}\"></div>\n{hint}{output}\n{bridge}\n<script type=\"text/babel\" data-presets=\"react\">\n{user}</script>",
            root = COMPONENT_ROOT_ID,
            hint = hint,
            output = template::output_area(false),
            bridge = bridge_script_tag(),
            user = user,
        );
        SynthesizedDocument {
            language: Language::Component,
            theme: unit.theme,
            markup: template::document_shell(unit.theme, &head, &body),
            program: None,
            render_target: Some(target),
        }
    }
}

impl Synthesize for DocumentSynthesizer {
    fn synthesize(&self, unit: &SourceUnit) -> SynthesisResult {
        self.check_code(unit)?;
        let document = match unit.language {
            Language::Markup => self.markup_document(unit),
            Language::Style => self.style_document(unit)?,
            Language::Script => self.script_document(unit),
            Language::Component => self.component_document(unit),
        };
        debug!(
            language = %unit.language,
            theme = unit.theme.as_str(),
            code_len = unit.code.len(),
            document_len = document.markup.len(),
            render_target = ?document.render_target,
            "synthesized preview document"
        );
        Ok(document)
    }
}

fn bridge_script_tag() -> String {
    format!("<script>\n{}{}</script>", BRIDGE_SOURCE, DOM_SINK_SOURCE)
}

/// `</script` inside a script block would end it early; `<\/script` means the
/// same thing inside string, template and regex literals.
fn neutralize_script_close(code: &str) -> String {
    SCRIPT_CLOSE.replace_all(code, r"<\/$1").into_owned()
}

fn guard_user_code(code: &str) -> String {
    format!(
        "try {{\n{}\n}} catch (__previewError) {{\n  globalThis.__preview.reportError(__previewError);\n}}\n//# sourceURL={}\n",
        code, USER_SCRIPT_URL
    )
}

/// Make module-shaped lesson code runnable as a classic script: drop imports
/// (React comes from the pinned runtime) and `export` keywords.
fn prepare_component_code(code: &str) -> String {
    let code = IMPORT_LINE.replace_all(code, "");
    let code = strip_named_exports(&code);
    EXPORT_DEFAULT_EXPR
        .replace_all(&code, format!("${{1}}const {} = ", ANONYMOUS_DEFAULT))
        .into_owned()
}

/// Remove `export default Name;` lines and `export` in front of named
/// declarations. Whatever `export default` is left after this introduces an
/// expression, anonymous functions and classes included.
fn strip_named_exports(code: &str) -> String {
    let code = EXPORT_DEFAULT_NAME.replace_all(code, "");
    let code = EXPORT_DEFAULT_DECL_ANY.replace_all(&code, |caps: &Captures| match caps.get(3) {
        Some(name) if name.as_str() != "extends" => format!("{}{}", &caps[1], &caps[2]),
        _ => caps[0].to_string(),
    });
    EXPORT_KEYWORD.replace_all(&code, "$1$2").into_owned()
}

/// Best-effort guess at which component to render when the code does not
/// render itself. This is a heuristic: unusual code shapes (components built
/// by factories, nested declarations, lowercase names) are not found.
pub fn detect_render_target(code: &str) -> RenderTarget {
    if RENDER_CALL.is_match(code) {
        return RenderTarget::Explicit;
    }

    if let Some(caps) = EXPORT_DEFAULT_DECL.captures(code) {
        return RenderTarget::Detected { name: caps[1].to_string(), basis: DetectionBasis::DefaultExport };
    }
    if let Some(caps) = EXPORT_DEFAULT_NAME.captures(code) {
        let name = &caps[1];
        if name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return RenderTarget::Detected { name: name.to_string(), basis: DetectionBasis::DefaultExport };
        }
    }
    if EXPORT_DEFAULT_EXPR.is_match(&strip_named_exports(code)) {
        return RenderTarget::Detected {
            name: ANONYMOUS_DEFAULT.to_string(),
            basis: DetectionBasis::DefaultExport,
        };
    }

    let declared: Vec<&str> = COMPONENT_DECL
        .captures_iter(code)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| m.as_str())
        .collect();

    if declared.contains(&"App") {
        return RenderTarget::Detected { name: "App".to_string(), basis: DetectionBasis::ConventionalName };
    }
    match declared.last() {
        Some(name) => RenderTarget::Detected { name: name.to_string(), basis: DetectionBasis::LastDeclaration },
        None => RenderTarget::NotFound,
    }
}
