//! A small driver that builds sample speculative graphs and runs the
//! optimizer over them, printing a before/after summary of each block's
//! instructions. Stands in for an embedding runtime's spesh-worker thread,
//! which would instead load a real graph from the analyzer.

use spesh_optimizer::capabilities::{BoolMode, PrimSpec, ReprId, TypeHandle, TypeInfo};
use spesh_optimizer::facts::{Fact, FactFlags, KnownValue, Reg};
use spesh_optimizer::graph::{SpeshGraph, StaticFrame};
use spesh_optimizer::ir::{InstData, Opcode, Operand};
use spesh_optimizer::testenv::TestEnv;

fn reg(orig: u16) -> Reg {
    Reg { orig, version: 0 }
}

fn describe(g: &SpeshGraph, label: &str) {
    println!("--- {label} ---");
    let mut cur = Some(g.entry);
    while let Some(bb) = cur {
        println!("{bb}:");
        for ins in g.block_insts(bb) {
            println!("  {:?} {:?}", g.inst(ins).opcode, g.inst(ins).operands.as_slice());
        }
        cur = g.block(bb).linear_next;
    }
}

fn build_sample() -> SpeshGraph {
    let mut g = SpeshGraph::new(StaticFrame(0));
    let entry = g.entry;
    let fallthrough = g.add_block();
    let target = g.add_block();
    g.block_mut(entry).linear_next = Some(fallthrough);
    g.block_mut(fallthrough).linear_next = Some(target);
    g.add_successor(entry, fallthrough);
    g.add_successor(entry, target);

    let flag = reg(1);
    g.facts.set(flag, Fact {
        flags: FactFlags::KNOWN_VALUE | FactFlags::KNOWN_TYPE,
        known_value: Some(KnownValue::Int(1)),
        usages: 1,
        ..Default::default()
    });
    g.append_ins(entry, InstData::new(Opcode::ConstI64, smallvec::smallvec![Operand::Reg(flag), Operand::IntLit(1)]));
    g.append_ins(entry, InstData::new(Opcode::IfI, smallvec::smallvec![Operand::Reg(flag), Operand::Branch(target)]));
    g
}

fn main() {
    env_logger::init();

    let mut graph = build_sample();
    describe(&graph, "before");

    let env = TestEnv::new();
    env.set_type(TypeHandle(0), TypeInfo {
        repr_id: ReprId::Other,
        prim_spec: PrimSpec::None,
        bool_mode: BoolMode::NotTypeObject,
        invocation_spec: None,
        fetch_never_invokes: false,
        is_code_repr: false,
        already_hllized: false,
    });

    if let Err(e) = spesh_optimizer::optimize(&mut graph, &env) {
        eprintln!("optimization failed: {e}");
        std::process::exit(1);
    }

    describe(&graph, "after");
}
