//! Transient per-call-site state accumulated while walking one basic block.
//!
//! A `CallInfo` is opened by `prepargs` and consumed by the matching
//! `invoke_*`. It must not outlive the block walk that created it, and no
//! rewrite between `prepargs` and `invoke_*` may delete an `arg_*` instruction
//! belonging to the currently-open call (their instruction pointers are
//! captured here and relied on until the invoke is rewritten).

use crate::entities::Inst;
use crate::facts::Fact;
use smallvec::SmallVec;

/// Argument cap for the detailed per-argument bookkeeping below. Calls with
/// more arguments than this still get looked up and fast-invoked, they just
/// don't get the same specialization treatment for arguments past the cap.
pub const MAX_ARGS_FOR_OPT: usize = 8;

/// The callsite's formal shape, opaque beyond what the multi-dispatch cache
/// and candidate matcher need.
#[derive(Copy, Clone, Debug)]
pub struct CallsiteShape {
    pub callsite_idx: u32,
    pub num_args: u32,
}

#[derive(Clone)]
pub struct ArgRecord {
    pub emitting_ins: Inst,
    pub fact: Fact,
    pub is_const: bool,
}

/// Transient call-site descriptor. Lives only inside one basic-block walk.
pub struct CallInfo {
    pub cs: CallsiteShape,
    pub prepargs_ins: Inst,
    pub args: SmallVec<[ArgRecord; MAX_ARGS_FOR_OPT]>,
}

impl CallInfo {
    pub fn new(prepargs_ins: Inst, cs: CallsiteShape) -> Self {
        CallInfo { cs, prepargs_ins, args: SmallVec::new() }
    }

    pub fn record_arg(&mut self, idx: usize, emitting_ins: Inst, fact: Fact, is_const: bool) {
        if idx < MAX_ARGS_FOR_OPT {
            while self.args.len() <= idx {
                self.args.push(ArgRecord { emitting_ins, fact: Fact::default(), is_const: false });
            }
            self.args[idx] = ArgRecord { emitting_ins, fact, is_const };
        }
    }

    pub fn arg(&self, idx: usize) -> Option<&ArgRecord> {
        self.args.get(idx)
    }
}
