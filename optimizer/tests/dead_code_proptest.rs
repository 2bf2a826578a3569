//! Property check for dead-instruction elimination's fixed point: a block of
//! N dead `const_i64` definitions plus one live one always converges to
//! exactly the live instruction, regardless of N or where the live one sits.

use proptest::prelude::*;
use spesh_optimizer::dead_code;
use spesh_optimizer::facts::{Fact, Reg};
use spesh_optimizer::graph::{SpeshGraph, StaticFrame};
use spesh_optimizer::ir::{InstData, Opcode, Operand};

fn build_graph(n: usize, live_at: usize) -> (SpeshGraph, Reg) {
    let mut g = SpeshGraph::new(StaticFrame(0));
    let entry = g.entry;
    let mut live_reg = None;
    for i in 0..n {
        let r = Reg { orig: i as u16, version: 0 };
        let usages = if i == live_at { 1 } else { 0 };
        g.facts.set(r, Fact { usages, ..Default::default() });
        if i == live_at {
            live_reg = Some(r);
        }
        g.append_ins(
            entry,
            InstData::new(Opcode::ConstI64, smallvec::smallvec![Operand::Reg(r), Operand::IntLit(i as i64)]),
        );
    }
    (g, live_reg.expect("live_at must be < n"))
}

proptest! {
    #[test]
    fn dead_consts_converge_to_exactly_the_live_one(n in 1usize..20) {
        let live_at = n - 1;
        let (mut g, live_reg) = build_graph(n, live_at);
        dead_code::run(&mut g);
        let remaining: Vec<_> = g.block_insts(g.entry).collect();
        prop_assert_eq!(remaining.len(), 1);
        let data = g.inst(remaining[0]);
        prop_assert_eq!(data.dest_reg(), Some(live_reg));
    }
}
