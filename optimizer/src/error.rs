//! The optimizer's only hard error: an internal invariant violation. Every
//! other uncertainty is handled by bailing out of a rewrite, not by
//! propagating an error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizerError {
    /// A new `invoke_*` opcode was added without updating the call-site
    /// rewriter's dispatch table. Must never be reachable on well-formed
    /// input; raised through the runtime's adhoc-exception channel by the
    /// embedder when it is.
    #[error("unhandled invoke instruction: {0:?}")]
    UnhandledInvoke(crate::ir::Opcode),
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
