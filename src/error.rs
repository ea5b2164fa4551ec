//! Error types shared across the sandbox.
//!
//! Two families exist and they must not be confused:
//! - [`SynthesisError`]: the document could not be built from the source unit.
//!   Shown to the user as an error panel in place of the frame.
//! - [`SandboxError`]: the host side of the sandbox failed (bad config, the
//!   headless realm could not be prepared). Runtime errors raised by user code
//!   are neither; they are captured as output records inside the frame.

use thiserror::Error;

/// Failure to build a renderable document from a source unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("code is {len} bytes, the preview accepts at most {max}")]
    CodeTooLarge { len: usize, max: usize },

    #[error("code contains a NUL character at byte {offset}")]
    NulCharacter { offset: usize },

    #[error("code contains a literal `</{tag}` at byte {offset}, which would close the generated <{tag}> block")]
    EmbeddedCloseTag { tag: &'static str, offset: usize },
}

impl SynthesisError {
    /// One-line summary suitable for the error panel header.
    pub fn summary(&self) -> &'static str {
        match self {
            SynthesisError::CodeTooLarge { .. } => "The code is too large to preview",
            SynthesisError::NulCharacter { .. } => "The code contains an invalid character",
            SynthesisError::EmbeddedCloseTag { .. } => "The code cannot be embedded in the preview document",
        }
    }
}

/// Host-side sandbox failures.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare the isolated realm: {0}")]
    Bridge(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SandboxError> = std::result::Result<T, E>;
