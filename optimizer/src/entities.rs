//! Densely-numbered references into the tables owned by a [`SpeshGraph`](crate::graph::SpeshGraph).
//!
//! Mirrors the way a dataflow graph keys its instructions and blocks with compact
//! `u32` indices instead of pointers, so that growing the backing `PrimaryMap`s never
//! invalidates a reference held elsewhere.

use cranelift_entity::entity_impl;

/// A basic block in a [`SpeshGraph`](crate::graph::SpeshGraph).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "bb");

/// An instruction in a [`SpeshGraph`](crate::graph::SpeshGraph).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "ins");

/// An entry in the append-only spesh-slot constant table.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpeshSlot(u32);
entity_impl!(SpeshSlot, "slot");

/// A profile-derived log guard recorded by the analyzer.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogGuard(u32);
entity_impl!(LogGuard, "guard");
