//! Dead-instruction elimination (§4.5): fixed-point removal of pure
//! instructions and phis whose destination has zero remaining uses.
//!
//! Walks `linear_next` from `entry` and stops at the first `inlined` block —
//! that block and everything reachable from it via `linear_next` is left
//! alone, matching the original `eliminate_dead_ins`'s
//! `while (bb && !bb->inlined)` loop, so this pass never disturbs a grafted
//! donor block's or its caller-continuation's post-inline bookkeeping.

use crate::ir::Opcode;
use crate::graph::SpeshGraph;

pub fn run(graph: &mut SpeshGraph) {
    loop {
        let mut changed = false;
        let mut blocks = Vec::new();
        let mut cur = Some(graph.entry);
        while let Some(bb) = cur {
            if graph.block(bb).inlined {
                break;
            }
            blocks.push(bb);
            cur = graph.block(bb).linear_next;
        }
        for bb in blocks {
            // Backward walk: collect then iterate in reverse so deletions
            // don't disturb the forward cursor.
            let insts: Vec<_> = graph.block_insts(bb).collect();
            for &ins in insts.iter().rev() {
                let data = graph.inst(ins);
                let is_phi = data.opcode == Opcode::Phi;
                let is_pure_with_dest = data.descriptor().pure && data.dest_reg().is_some();
                if !is_phi && !is_pure_with_dest {
                    continue;
                }
                let Some(dest) = data.dest_reg() else { continue };
                let live = graph.facts.get(dest).map(|f| f.usages).unwrap_or(0) > 0;
                if live {
                    continue;
                }
                let reads: Vec<_> = data.read_regs().collect();
                for r in reads {
                    let fact = graph.facts.get_mut(r);
                    fact.usages = fact.usages.saturating_sub(1);
                }
                graph.delete_ins(ins);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}
