//! Dead-block elimination (§4.6): fixed-point removal of basic blocks
//! unreachable from the entry block's successor closure, followed by
//! renumbering surviving blocks 0..N-1 in linear order.

use crate::entities::Block;
use crate::graph::SpeshGraph;
use rustc_hash::FxHashSet;

pub fn run(graph: &mut SpeshGraph) {
    loop {
        let reachable = compute_reachable(graph);
        let removed = splice_unreachable(graph, &reachable);
        if !removed {
            break;
        }
    }
    renumber(graph);
}

/// One linear pass marking the entry reachable and propagating reachability
/// forward through each already-reachable block's successors. A single pass
/// need not reach a full fixed point by itself — the caller repeats this
/// until a pass removes nothing, which is how forward edges onto
/// not-yet-visited blocks still get marked correctly.
fn compute_reachable(graph: &SpeshGraph) -> FxHashSet<Block> {
    let mut reachable = FxHashSet::default();
    reachable.insert(graph.entry);
    let mut cur = Some(graph.entry);
    while let Some(bb) = cur {
        if reachable.contains(&bb) {
            for &s in &graph.block(bb).succ {
                reachable.insert(s);
            }
        }
        cur = graph.block(bb).linear_next;
    }
    reachable
}

fn splice_unreachable(graph: &mut SpeshGraph, reachable: &FxHashSet<Block>) -> bool {
    let mut removed_any = false;
    let all: Vec<Block> = {
        let mut v = Vec::new();
        let mut cur = Some(graph.entry);
        while let Some(bb) = cur {
            v.push(bb);
            cur = graph.block(bb).linear_next;
        }
        v
    };
    let mut last_kept: Option<Block> = None;
    for &bb in &all {
        if bb == graph.entry || reachable.contains(&bb) || graph.block(bb).inlined {
            last_kept = Some(bb);
            continue;
        }
        let next = graph.block(bb).linear_next;
        if let Some(prev) = last_kept {
            graph.block_mut(prev).linear_next = next;
        }
        graph.block_mut(bb).linear_next = None;
        graph.block_mut(bb).succ.clear();
        removed_any = true;
    }
    removed_any
}

/// Renumbers surviving blocks 0..N-1 in linear order. Block identity is a
/// `cranelift_entity` index into `graph.blocks`, which we cannot physically
/// compact without invalidating every stored `Block` reference graph-wide
/// (in `succ[]`, branch operands, annotations); instead the dense rank is
/// recorded on each block for display and ordering purposes, and the
/// underlying table stays sparse.
fn renumber(graph: &mut SpeshGraph) {
    let mut rank = 0u32;
    let mut cur = Some(graph.entry);
    while let Some(bb) = cur {
        graph.block_mut(bb).linear_rank = rank;
        rank += 1;
        cur = graph.block(bb).linear_next;
    }
}
