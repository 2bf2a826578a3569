//! Measures the optimizer's end-to-end throughput over a synthetic graph
//! shaped like a single large basic block: a run of dead `const_i64`
//! definitions (stressing dead-instruction elimination's fixed-point walk)
//! followed by a `findmeth`/branch pair that the peephole driver rewrites.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use spesh_optimizer::capabilities::{BoolMode, MethodHandle, PrimSpec, ReprId, TypeHandle, TypeInfo};
use spesh_optimizer::facts::{Fact, FactFlags, KnownValue, Reg};
use spesh_optimizer::graph::{SpeshGraph, StaticFrame};
use spesh_optimizer::ir::{InstData, Opcode, Operand};
use spesh_optimizer::testenv::TestEnv;

fn reg(orig: u16) -> Reg {
    Reg { orig, version: 0 }
}

/// Builds a block of `n` dead `const_i64` definitions, a `findmeth` that
/// monomorphizes, and a branch on a known-true flag.
fn build_graph(n: usize) -> (SpeshGraph, TestEnv) {
    let mut g = SpeshGraph::new(StaticFrame(0));
    let entry = g.entry;
    let target = g.add_block();
    g.block_mut(entry).linear_next = Some(target);
    g.add_successor(entry, target);

    for i in 0..n {
        let r = Reg { orig: i as u16, version: 0 };
        g.facts.set(r, Fact { usages: 0, ..Default::default() });
        g.append_ins(
            entry,
            InstData::new(Opcode::ConstI64, smallvec::smallvec![Operand::Reg(r), Operand::IntLit(i as i64)]),
        );
    }

    let ty = TypeHandle(1);
    let invocant = reg(n as u16 + 1);
    g.facts.set(invocant, Fact {
        flags: FactFlags::KNOWN_TYPE,
        known_type: Some(ty),
        usages: 1,
        ..Default::default()
    });
    let findmeth_dst = reg(n as u16 + 2);
    g.append_ins(entry, InstData::new(Opcode::FindMeth, smallvec::smallvec![
        Operand::Reg(findmeth_dst), Operand::Reg(invocant), Operand::StrIdx(0),
    ]));

    let flag = reg(n as u16 + 3);
    g.facts.set(flag, Fact {
        flags: FactFlags::KNOWN_VALUE | FactFlags::KNOWN_TYPE,
        known_value: Some(KnownValue::Int(1)),
        usages: 1,
        ..Default::default()
    });
    g.append_ins(entry, InstData::new(Opcode::IfI, smallvec::smallvec![Operand::Reg(flag), Operand::Branch(target)]));

    let env = TestEnv::new();
    env.set_type(ty, TypeInfo {
        repr_id: ReprId::Other,
        prim_spec: PrimSpec::None,
        bool_mode: BoolMode::NotTypeObject,
        invocation_spec: None,
        fetch_never_invokes: false,
        is_code_repr: false,
        already_hllized: false,
    });
    env.set_str(0, "frobnicate");
    env.set_method(ty, "frobnicate", MethodHandle(42));

    (g, env)
}

fn bench_optimize(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize");
    for &n in &[16usize, 256, 4096] {
        group.bench_function(format!("dead_consts/{n}"), |b| {
            b.iter_batched(
                || build_graph(n),
                |(mut g, env)| spesh_optimizer::optimize(&mut g, &env).unwrap(),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_optimize);
criterion_main!(benches);
