//! Speculative-specialization optimizer for a typed register-machine IR.
//!
//! A single pass over one speculative graph `G` — one candidate
//! specialization of one subroutine — that rewrites generic dispatching
//! operations into cheaper specialized forms, removes redundant work, and
//! inlines called subroutines when profitable. See [`optimize`] for the
//! top-level entry point and the module docs below for the four phases it
//! runs in order.
//!
//! Everything outside the graph itself — the bytecode loader, the garbage
//! collector, the JIT backend, the object model's caches, and the
//! representation/container sub-specializers — is a black-box collaborator
//! reached only through [`capabilities::OptimizerEnv`].

pub mod call_info;
pub mod call_spec;
pub mod capabilities;
pub mod dead_block;
pub mod dead_code;
pub mod entities;
pub mod error;
pub mod facts;
pub mod graph;
pub mod guard_cleanup;
pub mod ir;
pub mod peephole;
pub mod throwcat;

pub mod testenv;

pub use capabilities::OptimizerEnv;
pub use error::{OptimizerError, Result};
pub use graph::SpeshGraph;

use log::debug;

/// Runs the optimizer's four phases over `graph` in order: peephole
/// specialization, dead-instruction elimination, dead-block elimination, and
/// guard cleanup.
///
/// Pre-conditions: `graph` is well-formed (dominator tree populated, fact
/// table sized and filled in by the analyzer, log-guard table populated,
/// `inlined` set only on truly grafted blocks).
///
/// Post-conditions: the graph is semantically equivalent to its input; no
/// unused log guards, unreachable non-inlined blocks, or pure dead
/// instructions remain.
pub fn optimize(graph: &mut SpeshGraph, env: &dyn OptimizerEnv) -> Result<()> {
    debug!("running peephole specialization");
    peephole::run(graph, env)?;

    debug!("running dead-instruction elimination");
    dead_code::run(graph);

    debug!("running dead-block elimination");
    dead_block::run(graph);

    debug!("running log-guard cleanup");
    guard_cleanup::run(graph);

    Ok(())
}
