//! The speculative graph `G`: basic blocks, the instruction arena, the fact
//! table, the spesh-slot table and the log-guard table.

use crate::capabilities::ObjHandle;
use crate::entities::{Block, Inst, LogGuard, SpeshSlot};
use crate::facts::{FactTable, Reg};
use crate::ir::InstData;
use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

/// Opaque reference to the containing static-frame record (read-only from the
/// optimizer's point of view; owned by the bytecode loader).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct StaticFrame(pub u32);

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct HandlerIdx(u32);
entity_impl!(HandlerIdx, "handler");

/// A goto-handler record from the static frame: category mask, nesting depth,
/// destination block once its goto annotation has been seen.
#[derive(Copy, Clone, Debug)]
pub struct HandlerRecord {
    pub category_mask: u32,
    pub nesting_depth: u32,
}

/// One basic block.
pub struct BasicBlockData {
    pub index: Block,
    pub first_ins: Option<Inst>,
    pub last_ins: Option<Inst>,
    pub succ: SmallVec<[Block; 2]>,
    pub linear_next: Option<Block>,
    pub children: SmallVec<[Block; 4]>,
    pub inlined: bool,
    /// Dense rank in textual order, recomputed by dead-block elimination's
    /// renumbering step.
    pub linear_rank: u32,
}

impl BasicBlockData {
    fn new(index: Block) -> Self {
        BasicBlockData {
            index,
            first_ins: None,
            last_ins: None,
            succ: SmallVec::new(),
            linear_next: None,
            children: SmallVec::new(),
            inlined: false,
            linear_rank: 0,
        }
    }
}

/// Record of a profile-derived type assertion. `used` starts false; rewriters
/// set it through [`crate::facts::use_facts`] / [`crate::facts::get_and_use_facts`].
pub struct LogGuardRecord {
    pub bb: Block,
    pub ins: Inst,
    pub used: bool,
}

#[derive(Default)]
pub struct LogGuardTable {
    guards: PrimaryMap<LogGuard, LogGuardRecord>,
}

impl LogGuardTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bb: Block, ins: Inst) -> LogGuard {
        self.guards.push(LogGuardRecord { bb, ins, used: false })
    }

    pub fn mark_used(&mut self, guard: LogGuard) {
        if let Some(rec) = self.guards.get_mut(guard) {
            rec.used = true;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogGuard, &LogGuardRecord)> {
        self.guards.iter()
    }
}

/// The append-only spesh-slot constant table. `None` entries are reserved
/// slots (used as inline monomorphic caches) awaiting a later fill.
#[derive(Default)]
pub struct SpeshSlotTable {
    slots: PrimaryMap<SpeshSlot, Option<ObjHandle>>,
}

impl SpeshSlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, obj: ObjHandle) -> SpeshSlot {
        self.slots.push(Some(obj))
    }

    pub fn add_reserved(&mut self) -> SpeshSlot {
        self.slots.push(None)
    }

    pub fn fill(&mut self, slot: SpeshSlot, obj: ObjHandle) {
        self.slots[slot] = Some(obj);
    }

    pub fn get(&self, slot: SpeshSlot) -> Option<ObjHandle> {
        self.slots[slot]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// The speculative graph: one candidate specialization of one subroutine.
pub struct SpeshGraph {
    pub blocks: PrimaryMap<Block, BasicBlockData>,
    pub insts: PrimaryMap<Inst, InstData>,
    inst_prev: SecondaryMap<Inst, PackedInst>,
    inst_next: SecondaryMap<Inst, PackedInst>,
    inst_block: SecondaryMap<Inst, PackedBlock>,
    pub facts: FactTable,
    pub spesh_slots: SpeshSlotTable,
    pub log_guards: LogGuardTable,
    pub handlers: PrimaryMap<HandlerIdx, HandlerRecord>,
    pub static_frame: StaticFrame,
    pub entry: Block,
    /// True when this candidate graph was itself selected by guarding on the
    /// invocant (argument slot 0) — the analyzer's equivalent of the
    /// original's `g->arg_guards` containing a slot-0 entry. Gates the
    /// `getlexperinvtype_o` rewrite: optimizing away a per-invocant-type
    /// lexical is only sound once the graph is already specialized per
    /// invocant type.
    pub specialized_on_invocant: bool,
}

/// `SecondaryMap` requires `Default + Clone`; wrap the optional links so we
/// don't need a `PackedOption` dependency just for this.
#[derive(Copy, Clone, Default)]
struct PackedInst(Option<Inst>);
#[derive(Copy, Clone, Default)]
struct PackedBlock(Option<Block>);

impl SpeshGraph {
    pub fn new(static_frame: StaticFrame) -> Self {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BasicBlockData::new(Block::from_u32(0)));
        SpeshGraph {
            blocks,
            insts: PrimaryMap::new(),
            inst_prev: SecondaryMap::new(),
            inst_next: SecondaryMap::new(),
            inst_block: SecondaryMap::new(),
            facts: FactTable::new(),
            spesh_slots: SpeshSlotTable::new(),
            log_guards: LogGuardTable::new(),
            handlers: PrimaryMap::new(),
            static_frame,
            entry,
            specialized_on_invocant: false,
        }
    }

    pub fn add_block(&mut self) -> Block {
        let idx = self.blocks.next_key();
        self.blocks.push(BasicBlockData::new(idx))
    }

    pub fn block(&self, b: Block) -> &BasicBlockData {
        &self.blocks[b]
    }

    pub fn block_mut(&mut self, b: Block) -> &mut BasicBlockData {
        &mut self.blocks[b]
    }

    pub fn inst(&self, i: Inst) -> &InstData {
        &self.insts[i]
    }

    pub fn inst_mut(&mut self, i: Inst) -> &mut InstData {
        &mut self.insts[i]
    }

    pub fn inst_block(&self, i: Inst) -> Option<Block> {
        self.inst_block[i].0
    }

    pub fn prev_ins(&self, i: Inst) -> Option<Inst> {
        self.inst_prev[i].0
    }

    pub fn next_ins(&self, i: Inst) -> Option<Inst> {
        self.inst_next[i].0
    }

    /// Append a freshly-allocated instruction to the end of `bb`.
    pub fn append_ins(&mut self, bb: Block, data: InstData) -> Inst {
        let ins = self.insts.push(data);
        self.inst_block[ins] = PackedBlock(Some(bb));
        let last = self.blocks[bb].last_ins;
        self.inst_prev[ins] = PackedInst(last);
        self.inst_next[ins] = PackedInst(None);
        if let Some(last) = last {
            self.inst_next[last] = PackedInst(Some(ins));
        } else {
            self.blocks[bb].first_ins = Some(ins);
        }
        self.blocks[bb].last_ins = Some(ins);
        ins
    }

    /// Insert a freshly-allocated instruction immediately before `before`.
    pub fn insert_ins_before(&mut self, bb: Block, before: Inst, data: InstData) -> Inst {
        let ins = self.insts.push(data);
        self.inst_block[ins] = PackedBlock(Some(bb));
        let prev = self.inst_prev[before].0;
        self.inst_prev[ins] = PackedInst(prev);
        self.inst_next[ins] = PackedInst(Some(before));
        self.inst_prev[before] = PackedInst(Some(ins));
        match prev {
            Some(p) => self.inst_next[p] = PackedInst(Some(ins)),
            None => self.blocks[bb].first_ins = Some(ins),
        }
        ins
    }

    /// Unlink `ins` from its block's instruction list. The `InstData` remains
    /// in the arena (never freed, matching arena-owned-for-graph-lifetime
    /// semantics) but is no longer reachable by traversal.
    pub fn delete_ins(&mut self, ins: Inst) {
        let bb = match self.inst_block[ins].0 {
            Some(bb) => bb,
            None => return,
        };
        let prev = self.inst_prev[ins].0;
        let next = self.inst_next[ins].0;
        match prev {
            Some(p) => self.inst_next[p] = PackedInst(next),
            None => self.blocks[bb].first_ins = next,
        }
        match next {
            Some(n) => self.inst_prev[n] = PackedInst(prev),
            None => self.blocks[bb].last_ins = prev,
        }
        self.inst_block[ins] = PackedBlock(None);
    }

    /// Iterate the live instructions of `bb` in order.
    pub fn block_insts(&self, bb: Block) -> BlockInstIter<'_> {
        BlockInstIter { graph: self, cur: self.blocks[bb].first_ins }
    }

    pub fn remove_successor(&mut self, bb: Block, target: Block) {
        self.blocks[bb].succ.retain(|&s| s != target);
    }

    pub fn add_successor(&mut self, bb: Block, target: Block) {
        if !self.blocks[bb].succ.contains(&target) {
            self.blocks[bb].succ.push(target);
        }
    }

    /// Overwrites `bb`'s first successor slot in place with `target`,
    /// matching the original's direct `bb->succ[0] = target` assignment
    /// rather than a remove-then-append (which would leave `target` last
    /// instead of first for a block with more than one successor). If `bb`
    /// currently has no successors, `target` is simply appended.
    pub fn set_first_successor(&mut self, bb: Block, target: Block) {
        let succ = &mut self.blocks[bb].succ;
        if let Some(first) = succ.first_mut() {
            *first = target;
        } else {
            succ.push(target);
        }
    }

    /// Preorder dominator-tree walk starting at `entry`.
    pub fn dominator_preorder(&self) -> Vec<Block> {
        let mut order = Vec::new();
        let mut stack = vec![self.entry];
        while let Some(b) = stack.pop() {
            order.push(b);
            for &child in self.blocks[b].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    pub fn get_temp_reg(&mut self, base_orig: u16) -> Reg {
        // Temps get a version derived from the current fact-table size to
        // stay clear of any version the analyzer already assigned.
        Reg { orig: base_orig, version: u32::MAX - self.insts.len() as u32 }
    }
}

pub struct BlockInstIter<'a> {
    graph: &'a SpeshGraph,
    cur: Option<Inst>,
}

impl<'a> Iterator for BlockInstIter<'a> {
    type Item = Inst;
    fn next(&mut self) -> Option<Inst> {
        let cur = self.cur?;
        self.cur = self.graph.next_ins(cur);
        Some(cur)
    }
}
