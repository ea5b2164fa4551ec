//! Static code review for lesson code.
//!
//! A handful of substring rules, a score, and a fixed list of general advice.
//! Nothing here parses JavaScript; the rules are intentionally shallow.

use crate::synth::Language;
use serde::Serialize;

/// Penalty per suggestion.
const PENALTY: u32 = 10;

pub const BEST_PRACTICES: [&str; 3] = [
    "Use descriptive variable names",
    "Split complex functions into smaller ones",
    "Comment your code to explain the \"why\", not the \"how\"",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SuggestionKind {
    Style,
    Debug,
    Modern,
    Optimization,
    BestPractice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub message: &'static str,
    pub example: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Excellent,
    Good,
    NeedsWork,
}

impl Verdict {
    fn from_score(score: u32) -> Self {
        match score {
            90.. => Verdict::Excellent,
            70.. => Verdict::Good,
            _ => Verdict::NeedsWork,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Verdict::Excellent => "Excellent code!",
            Verdict::Good => "Good code with a few possible improvements",
            Verdict::NeedsWork => "Several improvements are possible",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub score: u32,
    pub verdict: Verdict,
    pub suggestions: Vec<Suggestion>,
    pub best_practices: Vec<&'static str>,
}

pub fn analyze(code: &str, language: Language) -> AnalysisReport {
    let mut suggestions = Vec::new();

    if matches!(language, Language::Script | Language::Component) {
        if code.contains("function(") && !code.contains("=>") {
            suggestions.push(Suggestion {
                kind: SuggestionKind::Style,
                message: "Consider arrow functions for more concise code",
                example: "const add = (a, b) => a + b;",
            });
        }
        if code.contains("console.log") {
            suggestions.push(Suggestion {
                kind: SuggestionKind::Debug,
                message: "Remove console.log calls before shipping",
                example: "// remove or comment out: console.log(...)",
            });
        }
        if code.contains("var ") {
            suggestions.push(Suggestion {
                kind: SuggestionKind::Modern,
                message: "Prefer const and let over var for clearer scoping",
                example: "const x = 1; // never reassigned\nlet y = 2; // reassigned later",
            });
        }
    }

    if language == Language::Component || code.contains("import React") {
        if code.contains("import React from 'react';") && !code.contains("React.") {
            suggestions.push(Suggestion {
                kind: SuggestionKind::Optimization,
                message: "Importing React is unnecessary when React.* is never used directly",
                example: "// remove if unused:\n// import React from 'react';",
            });
        }
        if (code.contains(".map(") || code.contains(".forEach(")) && !code.contains("key=") {
            suggestions.push(Suggestion {
                kind: SuggestionKind::BestPractice,
                message: "Give each element generated from a list a unique \"key\" attribute",
                example: "{items.map((item) => <div key={item.id}>{item.name}</div>)}",
            });
        }
    }

    let penalty = PENALTY.saturating_mul(suggestions.len() as u32);
    let score = 100u32.saturating_sub(penalty);
    AnalysisReport {
        score,
        verdict: Verdict::from_score(score),
        suggestions,
        best_practices: BEST_PRACTICES.to_vec(),
    }
}
