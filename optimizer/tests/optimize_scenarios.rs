//! End-to-end scenarios from the optimizer's testable-properties list: each
//! builds a tiny hand-rolled graph, runs `optimize`, and checks the resulting
//! shape and fact-table bookkeeping.

use spesh_optimizer::capabilities::{
    CodeHandle, InvocationSpec, MethodHandle, ObjHandle, PrimSpec, ReprId, TypeHandle, TypeInfo,
};
use spesh_optimizer::facts::{Fact, FactFlags, KnownValue, Reg};
use spesh_optimizer::graph::{HandlerRecord, SpeshGraph, StaticFrame};
use spesh_optimizer::ir::{Annotation, InstData, Opcode, Operand};
use spesh_optimizer::testenv::TestEnv;

fn reg(orig: u16) -> Reg {
    Reg { orig, version: 0 }
}

fn new_graph() -> SpeshGraph {
    SpeshGraph::new(StaticFrame(0))
}

#[test]
fn constant_branch_folding() {
    let mut g = new_graph();
    let entry = g.entry;
    let fallthrough = g.add_block();
    let target = g.add_block();
    g.block_mut(entry).linear_next = Some(fallthrough);
    g.block_mut(fallthrough).linear_next = Some(target);
    g.add_successor(entry, fallthrough);
    g.add_successor(entry, target);

    let r1 = reg(1);
    g.facts.set(r1, Fact {
        flags: FactFlags::KNOWN_VALUE | FactFlags::KNOWN_TYPE,
        known_value: Some(KnownValue::Int(1)),
        usages: 1,
        ..Default::default()
    });

    g.append_ins(entry, InstData::new(Opcode::ConstI64, smallvec::smallvec![Operand::Reg(r1), Operand::IntLit(1)]));
    let if_ins = g.append_ins(entry, InstData::new(Opcode::IfI, smallvec::smallvec![Operand::Reg(r1), Operand::Branch(target)]));

    let env = TestEnv::new();
    spesh_optimizer::optimize(&mut g, &env).unwrap();

    assert_eq!(g.inst(if_ins).opcode, Opcode::Goto);
    assert_eq!(g.inst(if_ins).operands[0].as_branch(), Some(target));
    assert!(!g.block(entry).succ.contains(&fallthrough));
    assert_eq!(g.facts.get(r1).unwrap().usages, 0);
}

#[test]
fn method_monomorphization() {
    let mut g = new_graph();
    let entry = g.entry;

    let t = TypeHandle(7);
    let r2 = reg(2);
    g.facts.set(r2, Fact {
        flags: FactFlags::KNOWN_TYPE,
        known_type: Some(t),
        usages: 1,
        ..Default::default()
    });

    let r3 = reg(3);
    let ins = g.append_ins(entry, InstData::new(Opcode::FindMeth, smallvec::smallvec![
        Operand::Reg(r3), Operand::Reg(r2), Operand::StrIdx(42),
    ]));

    let env = TestEnv::new();
    env.set_str(42, "foo");
    env.set_method(t, "foo", MethodHandle(99));
    let slots_before = g.spesh_slots.len();

    spesh_optimizer::optimize(&mut g, &env).unwrap();

    assert_eq!(g.inst(ins).opcode, Opcode::SpGetSpeshSlot);
    assert_eq!(g.spesh_slots.len(), slots_before + 1);
    let r3_fact = g.facts.get(r3).unwrap();
    assert!(r3_fact.flags.contains(FactFlags::KNOWN_VALUE));
}

#[test]
fn call_site_resolves_through_multi_dispatch_cache() {
    let mut g = new_graph();
    let entry = g.entry;

    // The callee register's fact says it holds a known object whose type
    // carries a multi-dispatch invocation spec rather than being code itself.
    let dispatcher_ty = TypeHandle(21);
    let dispatcher_obj = ObjHandle(500);
    let cache_obj = ObjHandle(501);
    let resolved_code = CodeHandle(77);

    let callee = reg(1);
    g.facts.set(callee, Fact {
        flags: FactFlags::KNOWN_VALUE,
        known_value: Some(KnownValue::Obj(dispatcher_obj)),
        usages: 1,
        ..Default::default()
    });

    let prepargs = g.append_ins(entry, InstData::new(Opcode::PrepArgs, smallvec::smallvec![Operand::CallsiteIdx(0)]));
    let invoke = g.append_ins(entry, InstData::new(Opcode::InvokeO, smallvec::smallvec![
        Operand::Reg(reg(9)), Operand::Reg(callee),
    ]));
    let _ = prepargs;

    let env = TestEnv::new();
    env.set_obj_type(dispatcher_obj, dispatcher_ty);
    env.set_type(dispatcher_ty, TypeInfo {
        repr_id: ReprId::Other,
        prim_spec: PrimSpec::None,
        bool_mode: spesh_optimizer::capabilities::BoolMode::NotTypeObject,
        invocation_spec: Some(InvocationSpec::Multi { cache_attr_slot: 0 }),
        fetch_never_invokes: false,
        is_code_repr: false,
        already_hllized: false,
    });
    env.set_attr(dispatcher_obj, 0, cache_obj);
    env.set_multi_cache_result(cache_obj, resolved_code);

    spesh_optimizer::optimize(&mut g, &env).unwrap();

    // The invoke target differs from the callee's original object, so a
    // spesh-slot load of the resolved code must have been hoisted in front
    // of it, and no monomorphic-cache slot goes unused.
    let opcodes: Vec<_> = g.block_insts(entry).map(|i| g.inst(i).opcode).collect();
    assert!(opcodes.contains(&Opcode::SpGetSpeshSlot));
    assert_eq!(g.inst(invoke).opcode, Opcode::InvokeO);
}

#[test]
fn call_site_takes_code_object_directly_when_already_code() {
    let mut g = new_graph();
    let entry = g.entry;

    let code_ty = TypeHandle(22);
    let code_obj = ObjHandle(600);

    let callee = reg(1);
    g.facts.set(callee, Fact {
        flags: FactFlags::KNOWN_VALUE,
        known_value: Some(KnownValue::Obj(code_obj)),
        usages: 1,
        ..Default::default()
    });

    g.append_ins(entry, InstData::new(Opcode::PrepArgs, smallvec::smallvec![Operand::CallsiteIdx(0)]));
    let invoke = g.append_ins(entry, InstData::new(Opcode::InvokeO, smallvec::smallvec![
        Operand::Reg(reg(9)), Operand::Reg(callee),
    ]));

    let env = TestEnv::new();
    env.set_obj_type(code_obj, code_ty);
    env.set_type(code_ty, TypeInfo {
        repr_id: ReprId::Other,
        prim_spec: PrimSpec::None,
        bool_mode: spesh_optimizer::capabilities::BoolMode::NotTypeObject,
        invocation_spec: None,
        fetch_never_invokes: false,
        is_code_repr: true,
        already_hllized: false,
    });
    env.set_code(code_obj.0, CodeHandle(code_obj.0));

    spesh_optimizer::optimize(&mut g, &env).unwrap();

    // Already the invocation target: no spesh-slot load needed ahead of it.
    let opcodes: Vec<_> = g.block_insts(entry).map(|i| g.inst(i).opcode).collect();
    assert!(!opcodes.contains(&Opcode::SpGetSpeshSlot));
    assert_eq!(g.inst(invoke).opcode, Opcode::InvokeO);
}

#[test]
fn decont_elision() {
    let mut g = new_graph();
    let entry = g.entry;

    let r1 = reg(1);
    g.facts.set(r1, Fact {
        flags: FactFlags::DECONTED,
        usages: 1,
        ..Default::default()
    });
    let r2 = reg(2);
    let ins = g.append_ins(entry, InstData::new(Opcode::Decont, smallvec::smallvec![Operand::Reg(r2), Operand::Reg(r1)]));

    let env = TestEnv::new();
    spesh_optimizer::optimize(&mut g, &env).unwrap();

    assert_eq!(g.inst(ins).opcode, Opcode::Set);
    let r2_fact = g.facts.get(r2).unwrap();
    assert!(r2_fact.flags.contains(FactFlags::DECONTED));
}

#[test]
fn representation_probe() {
    let mut g = new_graph();
    let entry = g.entry;

    let t = TypeHandle(11);
    let r1 = reg(1);
    g.facts.set(r1, Fact {
        flags: FactFlags::KNOWN_TYPE,
        known_type: Some(t),
        usages: 1,
        ..Default::default()
    });
    let r2 = reg(2);
    let ins = g.append_ins(entry, InstData::new(Opcode::IsList, smallvec::smallvec![Operand::Reg(r2), Operand::Reg(r1)]));

    let env = TestEnv::new();
    env.set_type(t, TypeInfo {
        repr_id: ReprId::Array,
        prim_spec: PrimSpec::None,
        bool_mode: spesh_optimizer::capabilities::BoolMode::NotTypeObject,
        invocation_spec: None,
        fetch_never_invokes: false,
        is_code_repr: false,
        already_hllized: false,
    });

    spesh_optimizer::optimize(&mut g, &env).unwrap();

    assert_eq!(g.inst(ins).opcode, Opcode::IsNonNull);
}

#[test]
fn unused_phi_removal() {
    let mut g = new_graph();
    let entry = g.entry;

    let r1 = reg(1);
    let r2 = reg(2);
    let r4 = reg(4);
    g.facts.set(r1, Fact { usages: 1, ..Default::default() });
    g.facts.set(r2, Fact { usages: 1, ..Default::default() });
    g.facts.set(r4, Fact { usages: 0, ..Default::default() });

    let phi = g.append_ins(entry, InstData::new(Opcode::Phi, smallvec::smallvec![
        Operand::Reg(r4), Operand::Reg(r1), Operand::Reg(r2),
    ]));

    let env = TestEnv::new();
    spesh_optimizer::optimize(&mut g, &env).unwrap();

    assert!(g.block_insts(entry).all(|i| i != phi));
    assert_eq!(g.facts.get(r1).unwrap().usages, 0);
    assert_eq!(g.facts.get(r2).unwrap().usages, 0);
}

#[test]
fn throwcat_to_goto() {
    let mut g = new_graph();
    let entry = g.entry;
    let handler_body = g.add_block();
    let goto_target = g.add_block();
    g.block_mut(entry).linear_next = Some(handler_body);
    g.block_mut(handler_body).linear_next = Some(goto_target);
    g.add_successor(entry, handler_body);

    let cat_x: u32 = 0b0001;
    g.handlers.push(HandlerRecord { category_mask: cat_x, nesting_depth: 0 });

    let start = g.append_ins(entry, InstData::new(Opcode::Set, smallvec::smallvec![Operand::Reg(reg(9)), Operand::Reg(reg(9))]));
    g.inst_mut(start).annotations.push(Annotation::FrameHandlerStart { handler_idx: 0 });
    g.inst_mut(start).annotations.push(Annotation::FrameHandlerGoto { handler_idx: 0, target: goto_target });

    let dst = reg(5);
    let throw_ins = g.append_ins(entry, InstData::new(Opcode::ThrowCatLex, smallvec::smallvec![
        Operand::Reg(dst), Operand::IntLit(cat_x as i64),
    ]));

    let env = TestEnv::new();
    spesh_optimizer::optimize(&mut g, &env).unwrap();

    assert_eq!(g.inst(throw_ins).opcode, Opcode::Goto);
    assert_eq!(g.inst(throw_ins).operands[0].as_branch(), Some(goto_target));
    assert_eq!(g.block(entry).succ.first().copied(), Some(goto_target));
}

#[test]
fn idempotence_on_already_optimized_graph() {
    let mut g = new_graph();
    let entry = g.entry;
    let r1 = reg(1);
    g.facts.set(r1, Fact {
        flags: FactFlags::DECONTED,
        usages: 1,
        ..Default::default()
    });
    let r2 = reg(2);
    g.append_ins(entry, InstData::new(Opcode::Decont, smallvec::smallvec![Operand::Reg(r2), Operand::Reg(r1)]));

    let env = TestEnv::new();
    spesh_optimizer::optimize(&mut g, &env).unwrap();
    let shape_after_first: Vec<_> = g.block_insts(entry).map(|i| g.inst(i).opcode).collect();

    spesh_optimizer::optimize(&mut g, &env).unwrap();
    let shape_after_second: Vec<_> = g.block_insts(entry).map(|i| g.inst(i).opcode).collect();

    assert_eq!(shape_after_first, shape_after_second);
}

#[test]
fn unreachable_block_is_removed() {
    let mut g = new_graph();
    let entry = g.entry;
    let reachable = g.add_block();
    let dead = g.add_block();
    g.block_mut(entry).linear_next = Some(reachable);
    g.block_mut(reachable).linear_next = Some(dead);
    g.add_successor(entry, reachable);
    // `dead` has no predecessor: nothing points to it via succ[].

    let env = TestEnv::new();
    spesh_optimizer::optimize(&mut g, &env).unwrap();

    let mut cur = Some(entry);
    let mut seen = Vec::new();
    while let Some(bb) = cur {
        seen.push(bb);
        cur = g.block(bb).linear_next;
    }
    assert!(!seen.contains(&dead));
}
