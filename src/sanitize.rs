//! Escaping, allow-list sanitization and format validation for author content.
//!
//! These helpers reduce accidental markup injection when lesson text is
//! interpolated into rendered output. They are not the security boundary:
//! untrusted code only ever runs inside a frame without same-origin rights.
//!
//! Nothing here panics or returns an error. Input that cannot be parsed as a
//! tag is escaped and shown as text.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

/// Inline formatting tags kept by [`sanitize_input`].
pub const DEFAULT_INLINE_TAGS: &[&str] = &[
    "b", "strong", "i", "em", "u", "s", "code", "kbd", "mark", "small", "sub", "sup", "br",
];

/// Elements whose content is dropped together with the element when stripped.
const RAW_TEXT_TAGS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "noembed", "noframes", "template",
    "textarea", "title", "xmp", "svg", "math",
];

const VOID_TAGS: &[&str] = &["br", "hr", "img", "wbr", "col", "area", "source", "track"];

/// Attributes whose value is a URL and must use a safe scheme.
const URL_ATTRS: &[&str] = &["href", "src", "action", "formaction", "poster", "cite", "background", "xlink:href"];

const SAFE_URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9-]+(\.[a-zA-Z0-9-]+)*\.[a-zA-Z]{2,}$")
        .unwrap_or_else(|e| panic!("BUG: invalid email pattern: {}", e))
});

static CSS_LENGTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0|auto|\d+(\.\d+)?(px|em|rem|vh|vw|%))$")
        .unwrap_or_else(|e| panic!("BUG: invalid css length pattern: {}", e))
});

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});")
        .unwrap_or_else(|e| panic!("BUG: invalid entity pattern: {}", e))
});

/// Escape text for use in element content or a double-quoted attribute.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Like [`escape_html`] but leaves well-formed character references alone,
/// so author text that already says `&amp;` is not double escaped.
fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(c) = rest.chars().next() {
        if c == '&' {
            if let Some(m) = ENTITY.find(rest) {
                out.push_str(m.as_str());
                rest = &rest[m.end()..];
                continue;
            }
        }
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Escape user text for interpolation into markup, keeping a small set of
/// inline formatting tags (without any attributes). Every other tag is escaped
/// so it reads as literal text.
pub fn sanitize_input(raw: &str) -> String {
    Sanitizer::inline().clean(raw)
}

/// Clean author markup for insertion as markup. Tags outside `allowed_tags`
/// are removed (script-bearing elements together with their content),
/// attributes outside `allowed_attrs` are dropped, and event handlers or
/// non-http(s) URLs are dropped even when allow-listed.
pub fn sanitize_rich_content(
    raw: &str,
    allowed_tags: &HashSet<String>,
    allowed_attrs: &HashSet<String>,
) -> String {
    Sanitizer::new(allowed_tags.iter().cloned(), allowed_attrs.iter().cloned(), Policy::Strip)
        .clean(raw)
}

/// Format check only; no network lookup.
pub fn validate_email(value: &str) -> bool {
    value.len() <= 254 && EMAIL.is_match(value)
}

/// Absolute http(s) URL with a host. Every other scheme is rejected.
pub fn validate_url(value: &str) -> bool {
    match Url::parse(value.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// A CSS length usable as a frame height: `0`, `auto`, or a number with a
/// px/em/rem/vh/vw/% unit.
pub fn validate_css_length(value: &str) -> bool {
    CSS_LENGTH.is_match(value.trim())
}

/// What happens to a tag that is not allow-listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    /// Show the tag as text.
    Escape,
    /// Remove the tag; raw-text elements lose their content too.
    Strip,
}

#[derive(Debug, Clone)]
struct Sanitizer {
    tags: HashSet<String>,
    attrs: HashSet<String>,
    policy: Policy,
}

impl Sanitizer {
    fn new(
        tags: impl IntoIterator<Item = String>,
        attrs: impl IntoIterator<Item = String>,
        policy: Policy,
    ) -> Self {
        Self {
            tags: tags.into_iter().map(|t| t.to_ascii_lowercase()).collect(),
            attrs: attrs.into_iter().map(|a| a.to_ascii_lowercase()).collect(),
            policy,
        }
    }

    fn inline() -> Self {
        Self::new(
            DEFAULT_INLINE_TAGS.iter().map(|t| t.to_string()),
            std::iter::empty(),
            Policy::Escape,
        )
    }

    fn clean(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut open: Vec<String> = Vec::new();
        let mut tokens = Tokenizer::new(raw);

        while let Some(token) = tokens.next() {
            match token {
                Token::Text(text) => out.push_str(&escape_text(text)),
                Token::Comment(raw_comment) => {
                    if self.policy == Policy::Escape {
                        out.push_str(&escape_html(raw_comment));
                    }
                }
                Token::Open(tag) => {
                    if self.tags.contains(&tag.name) {
                        self.push_open(&mut out, &tag);
                        if !tag.self_closing && !VOID_TAGS.contains(&tag.name.as_str()) {
                            open.push(tag.name);
                        }
                    } else {
                        match self.policy {
                            Policy::Escape => out.push_str(&escape_html(tag.raw)),
                            Policy::Strip => {
                                if !tag.self_closing && RAW_TEXT_TAGS.contains(&tag.name.as_str()) {
                                    tokens.skip_raw_text(&tag.name);
                                }
                            }
                        }
                    }
                }
                Token::Close { name, raw: raw_close } => {
                    if let Some(pos) = open.iter().rposition(|n| *n == name) {
                        for unclosed in open.drain(pos..).rev() {
                            out.push_str("</");
                            out.push_str(&unclosed);
                            out.push('>');
                        }
                    } else if self.policy == Policy::Escape && !self.tags.contains(&name) {
                        out.push_str(&escape_html(raw_close));
                    }
                }
            }
        }

        for unclosed in open.iter().rev() {
            out.push_str("</");
            out.push_str(unclosed);
            out.push('>');
        }
        out
    }

    fn push_open(&self, out: &mut String, tag: &OpenTag<'_>) {
        out.push('<');
        out.push_str(&tag.name);
        for (name, value) in &tag.attrs {
            if !self.is_attr_allowed(name, value.as_deref()) {
                continue;
            }
            out.push(' ');
            out.push_str(name);
            if let Some(value) = value {
                out.push_str("=\"");
                out.push_str(&escape_html(&decode_entities(value)));
                out.push('"');
            }
        }
        out.push('>');
    }

    fn is_attr_allowed(&self, name: &str, value: Option<&str>) -> bool {
        if name.starts_with("on") || !self.attrs.contains(name) {
            return false;
        }
        let Some(value) = value else {
            return true;
        };
        if URL_ATTRS.contains(&name) {
            return is_safe_url(value);
        }
        if name == "style" {
            let lowered = normalize_for_scheme_check(value);
            return !(lowered.contains("expression(")
                || lowered.contains("javascript:")
                || lowered.contains("url("));
        }
        true
    }
}

/// Relative URLs and http/https/mailto pass; `javascript:`, `data:` and any
/// other scheme are rejected, including entity-encoded or whitespace-split
/// spellings.
fn is_safe_url(value: &str) -> bool {
    let normalized = normalize_for_scheme_check(value);
    let scheme_end = normalized.find(':');
    let path_start = normalized.find(['/', '?', '#']);
    match (scheme_end, path_start) {
        (None, _) => true,
        (Some(colon), Some(slash)) if slash < colon => true,
        (Some(colon), _) => SAFE_URL_SCHEMES.contains(&&normalized[..colon]),
    }
}

fn normalize_for_scheme_check(value: &str) -> String {
    decode_entities(value)
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Decode the character references that matter for scheme smuggling.
/// Unknown named references are left as written.
fn decode_entities(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(c) = rest.chars().next() {
        if c == '&' {
            if let Some(m) = ENTITY.find(rest) {
                let body = &m.as_str()[1..m.as_str().len() - 1];
                let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                } else if let Some(dec) = body.strip_prefix('#') {
                    dec.parse::<u32>().ok().and_then(char::from_u32)
                } else {
                    match body {
                        "amp" => Some('&'),
                        "lt" => Some('<'),
                        "gt" => Some('>'),
                        "quot" => Some('"'),
                        "apos" => Some('\''),
                        "colon" => Some(':'),
                        "Tab" => Some('\t'),
                        "NewLine" => Some('\n'),
                        _ => None,
                    }
                };
                match decoded {
                    Some(ch) => out.push(ch),
                    None => out.push_str(m.as_str()),
                }
                rest = &rest[m.end()..];
                continue;
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug)]
struct OpenTag<'a> {
    name: String,
    attrs: Vec<(String, Option<String>)>,
    self_closing: bool,
    raw: &'a str,
}

#[derive(Debug)]
enum Token<'a> {
    Text(&'a str),
    Comment(&'a str),
    Open(OpenTag<'a>),
    Close { name: String, raw: &'a str },
}

/// Forgiving tag scanner. Anything that does not parse as a complete tag is
/// returned as text, so a stray `<` never swallows the rest of the input.
struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Advance past the closing tag of a raw-text element, or to the end.
    fn skip_raw_text(&mut self, name: &str) {
        let rest = self.rest();
        let lowered = rest.to_ascii_lowercase();
        let needle = format!("</{}", name);
        match lowered.find(&needle) {
            Some(start) => {
                let after = start + needle.len();
                let end = rest[after..].find('>').map(|i| after + i + 1).unwrap_or(rest.len());
                self.pos += end;
            }
            None => self.pos = self.input.len(),
        }
    }

    fn take(&mut self, len: usize) -> &'a str {
        let s = &self.input[self.pos..self.pos + len];
        self.pos += len;
        s
    }

    fn parse_tag(s: &'a str) -> Option<(Token<'a>, usize)> {
        let bytes = s.as_bytes();
        let len = bytes.len();
        let closing = bytes.get(1) == Some(&b'/');
        let mut i = if closing { 2 } else { 1 };

        let name_start = i;
        if !bytes.get(i).is_some_and(|b| b.is_ascii_alphabetic()) {
            return None;
        }
        while i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-' || bytes[i] == b':') {
            i += 1;
        }
        let name = s[name_start..i].to_ascii_lowercase();

        let mut attrs = Vec::new();
        let mut self_closing = false;
        loop {
            while i < len && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
                self_closing = bytes[i] == b'/';
                i += 1;
            }
            if i >= len {
                return None;
            }
            if bytes[i] == b'>' {
                i += 1;
                break;
            }
            self_closing = false;

            let attr_start = i;
            while i < len && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'/' | b'>' | b'=') {
                i += 1;
            }
            if i == attr_start {
                // stray '='
                i += 1;
                continue;
            }
            let attr_name = s[attr_start..i].to_ascii_lowercase();

            while i < len && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let mut value = None;
            if i < len && bytes[i] == b'=' {
                i += 1;
                while i < len && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i >= len {
                    return None;
                }
                if bytes[i] == b'"' || bytes[i] == b'\'' {
                    let quote = bytes[i];
                    let value_start = i + 1;
                    let value_end = value_start + s[value_start..].bytes().position(|b| b == quote)?;
                    value = Some(s[value_start..value_end].to_string());
                    i = value_end + 1;
                } else {
                    let value_start = i;
                    while i < len && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = Some(s[value_start..i].to_string());
                }
            }
            attrs.push((attr_name, value));
        }

        let raw = &s[..i];
        let token = if closing {
            Token::Close { name, raw }
        } else {
            Token::Open(OpenTag { name, attrs, self_closing, raw })
        };
        Some((token, i))
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let rest = self.rest();
        if rest.is_empty() {
            return None;
        }

        if rest.starts_with("<!--") {
            let end = rest[4..].find("-->").map(|i| i + 4 + 3).unwrap_or(rest.len());
            return Some(Token::Comment(self.take(end)));
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
            return Some(Token::Comment(self.take(end)));
        }
        if rest.starts_with('<') {
            if let Some((token, consumed)) = Self::parse_tag(rest) {
                self.pos += consumed;
                return Some(token);
            }
            return Some(Token::Text(self.take(1)));
        }

        let end = rest.find('<').unwrap_or(rest.len());
        Some(Token::Text(self.take(end)))
    }
}
