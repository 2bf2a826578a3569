//! Throw-category resolution (§4.4): rewriting a `throwcatdyn`/`throwcatlex`/
//! `throwcatlexotic` into a `goto` when it is lexically inside a goto-handler
//! whose category mask covers it and whose destination is statically known.
//!
//! Each call does its own fresh linear (not dominator-order) scan from the
//! entry block, since the set of handlers active at a given instruction can't
//! be derived from the dominator-tree walk that drives peephole
//! specialization — it depends on frame-handler scope annotations, which are
//! linear/lexical, not control-flow, in nature.

use crate::entities::{Block, Inst};
use crate::graph::{HandlerIdx, SpeshGraph};
use crate::ir::{Annotation, Opcode, Operand};
use rustc_hash::{FxHashMap, FxHashSet};

pub fn optimize_throwcat(graph: &mut SpeshGraph, bb: Block, ins: Inst) {
    let category = match graph.inst(ins).operands.get(1) {
        Some(Operand::IntLit(c)) => *c as u32,
        _ => return,
    };

    let handlers_found: Vec<HandlerIdx> = graph
        .handlers
        .iter()
        .filter(|(_, h)| h.category_mask & category != 0)
        .map(|(idx, _)| idx)
        .collect();
    if handlers_found.is_empty() {
        return;
    }

    let mut in_handlers: FxHashSet<HandlerIdx> = FxHashSet::default();
    let mut goto_bbs: FxHashMap<HandlerIdx, Block> = FxHashMap::default();
    let mut picked: Option<HandlerIdx> = None;

    let mut search_bb = Some(graph.entry);
    'outer: while let Some(cur_bb) = search_bb {
        for search_ins in graph.block_insts(cur_bb).collect::<Vec<_>>() {
            for ann in graph.inst(search_ins).annotations.clone() {
                match ann {
                    Annotation::FrameHandlerStart { handler_idx } => {
                        in_handlers.insert(HandlerIdx::from_u32(handler_idx));
                    }
                    Annotation::FrameHandlerEnd { handler_idx } => {
                        in_handlers.remove(&HandlerIdx::from_u32(handler_idx));
                    }
                    Annotation::FrameHandlerGoto { handler_idx, target } => {
                        let h = HandlerIdx::from_u32(handler_idx);
                        goto_bbs.insert(h, target);
                        if picked == Some(h) {
                            break 'outer;
                        }
                    }
                }
            }

            if search_ins == ins {
                for &h in &handlers_found {
                    if in_handlers.contains(&h) {
                        picked = Some(h);
                        if goto_bbs.contains_key(&h) {
                            break 'outer;
                        }
                        break;
                    }
                }
            }
        }
        search_bb = graph.block(cur_bb).linear_next;
    }

    if let (Some(picked), Some(&target)) = (picked, picked.and_then(|p| goto_bbs.get(&p))) {
        let data = graph.inst_mut(ins);
        data.opcode = Opcode::Goto;
        data.operands = smallvec::smallvec![Operand::Branch(target)];
        // Overwrite succ[0] in place (matching the original's
        // `bb->succ[0] = goto_bbs[picked]`), not remove-then-append, so a
        // block with more than one successor keeps `target` as its first
        // rather than its last.
        graph.set_first_successor(bb, target);
    }
}
