//! Host-level runtime errors.
//!
//! These cover failures of the embedding API only. Everything a guest
//! program can cause (type errors, arity errors, arithmetic misuse)
//! travels in-band as an `Error` object on the operand stack, and
//! invariant violations (unknown opcode, out-of-range local, collector
//! breakage, heap exhaustion after the forced minor collection) are
//! fatal and terminate the process.

use thiserror::Error;

/// Errors surfaced by [`crate::Runtime`]'s public entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// The executable target has no compiled code region yet.
    #[error("target is not compiled")]
    NotCompiled,
    /// `exec` was handed something that is not a script.
    #[error("expected a script, got `{0}`")]
    NotAScript(String),
    /// `call` was handed something that is not a lambda or native.
    #[error("expected a procedure, got `{0}`")]
    NotAProcedure(String),
    /// `eval` requires an installed front end.
    #[error("no front end installed")]
    NoFrontEnd,
    /// The front end rejected the source text.
    #[error("front end error: {0}")]
    FrontEnd(String),
    /// A native procedure was linked twice under the same symbol.
    #[error("native procedure `{0}` is already linked")]
    AlreadyLinked(String),
}
