//! Exercise checks - static pass/fail verification of a learner's code.
//!
//! The checker never runs the code. It looks for required (or forbidden)
//! substrings and patterns after collapsing whitespace, and reports which
//! requirements are unmet. Hook it to the shell's `on_code_change` callback to
//! re-check on every edit.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e)));

/// Collapse whitespace runs to one space and trim, so formatting does not
/// affect a check.
pub fn normalize_whitespace(code: &str) -> String {
    WHITESPACE.replace_all(code.trim(), " ").into_owned()
}

/// Needles keep their edges: `"var "` must not match `"variable"`.
fn normalize_needle(needle: &str) -> String {
    WHITESPACE.replace_all(needle, " ").into_owned()
}

#[derive(Debug, Clone)]
pub enum Requirement {
    Contains { needle: String, feedback: String },
    Matches { pattern: Regex, feedback: String },
    Absent { needle: String, feedback: String },
}

impl Requirement {
    pub fn contains(needle: impl AsRef<str>, feedback: impl Into<String>) -> Self {
        Requirement::Contains {
            needle: normalize_needle(needle.as_ref()),
            feedback: feedback.into(),
        }
    }

    /// The pattern is matched against the whitespace-normalized code.
    pub fn matches(pattern: &str, feedback: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Requirement::Matches {
            pattern: Regex::new(pattern)?,
            feedback: feedback.into(),
        })
    }

    pub fn absent(needle: impl AsRef<str>, feedback: impl Into<String>) -> Self {
        Requirement::Absent {
            needle: normalize_needle(needle.as_ref()),
            feedback: feedback.into(),
        }
    }

    fn is_met(&self, normalized: &str) -> bool {
        match self {
            Requirement::Contains { needle, .. } => normalized.contains(needle.as_str()),
            Requirement::Matches { pattern, .. } => pattern.is_match(normalized),
            Requirement::Absent { needle, .. } => !normalized.contains(needle.as_str()),
        }
    }

    fn feedback(&self) -> &str {
        match self {
            Requirement::Contains { feedback, .. }
            | Requirement::Matches { feedback, .. }
            | Requirement::Absent { feedback, .. } => feedback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub passed: bool,
    /// Success or failure message of the exercise.
    pub message: String,
    /// Feedback of each unmet requirement, in declaration order.
    pub feedback: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExerciseSpec {
    pub requirements: Vec<Requirement>,
    pub success_message: String,
    pub failure_message: String,
}

impl Default for ExerciseSpec {
    fn default() -> Self {
        Self {
            requirements: Vec::new(),
            success_message: String::from("Well done! Your code works."),
            failure_message: String::from("Your code does not produce the expected result yet. Try again."),
        }
    }
}

impl ExerciseSpec {
    /// Every needle must appear in the code.
    pub fn requiring<I, T>(needles: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let requirements = needles
            .into_iter()
            .map(|needle| {
                let needle = needle.as_ref();
                Requirement::contains(needle, format!("Your code should contain `{}`.", needle))
            })
            .collect();
        Self { requirements, ..Default::default() }
    }

    /// The generic component check: the code returns something, and that
    /// something looks like markup or a function.
    pub fn component_default() -> Self {
        let requirements = vec![
            Requirement::contains("return", "Your component should return what it renders."),
            Requirement::Matches {
                pattern: Regex::new(r"<h1>|<div|function").unwrap_or_else(|e| panic!("BUG: invalid pattern: {}", e)),
                feedback: String::from("Render an element such as <h1> or <div>, or declare a function component."),
            },
        ];
        Self { requirements, ..Default::default() }
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn check(&self, code: &str) -> CheckReport {
        let normalized = normalize_whitespace(code);
        let feedback: Vec<String> = self
            .requirements
            .iter()
            .filter(|r| !r.is_met(&normalized))
            .map(|r| r.feedback().to_string())
            .collect();
        let passed = feedback.is_empty();
        CheckReport {
            passed,
            message: if passed { self.success_message.clone() } else { self.failure_message.clone() },
            feedback,
        }
    }
}
