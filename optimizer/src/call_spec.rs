//! Call-site specialization and inlining (§4.3): resolving an `invoke_*`'s
//! callee to a concrete code object, hoisting the resolved target into a
//! spesh slot ahead of `prepargs`, and handing candidate matches off to the
//! inliner or to `sp_fastinvoke_*`.

use crate::call_info::CallInfo;
use crate::capabilities::{InvocationSpec, ObjHandle, OptimizerEnv};
use crate::entities::{Block, Inst};
use crate::error::Result;
use crate::facts::{get_and_use_facts, KnownValue};
use crate::graph::SpeshGraph;
use crate::ir::{InstData, Opcode, Operand};

/// Resolves `obj` to the concrete code object the call site actually
/// invokes, following its type's invocation spec the way the runtime's own
/// dispatcher would: a code object is taken directly, a single-dispatch type
/// hands back the attribute it wraps its code in, and a multi-dispatch type
/// is resolved by consulting the multi-dispatch cache with the caller's
/// argument shape. Neither branch recurses further: a cache miss or an
/// attribute that itself needs another round of dispatch just aborts the
/// rewrite, matching the conservative "bail, don't fail" discipline used
/// everywhere else in this pass.
fn resolve_invocable(
    env: &dyn OptimizerEnv,
    obj: ObjHandle,
    call_info: &CallInfo,
) -> Option<crate::capabilities::CodeHandle> {
    let ty = env.type_of(obj);
    let info = env.type_info(ty);
    if info.is_code_repr {
        return env.as_code(&KnownValue::Obj(obj));
    }
    match info.invocation_spec? {
        InvocationSpec::Multi { cache_attr_slot } => {
            let cache_obj = env.read_invocation_attr(obj, cache_attr_slot)?;
            env.multi_cache_find(cache_obj, call_info)
        }
        InvocationSpec::Single { attr_slot } => {
            let target = env.read_invocation_attr(obj, attr_slot)?;
            env.as_code(&KnownValue::Obj(target))
        }
    }
}

pub fn optimize_call(
    graph: &mut SpeshGraph,
    bb: Block,
    invoke_ins: Inst,
    call_info: CallInfo,
    env: &dyn OptimizerEnv,
) -> Result<()> {
    // Step 1: the callee operand is the last read-register operand of the
    // invoke instruction (its invocant).
    let callee_reg = match graph.inst(invoke_ins).read_regs().last() {
        Some(r) => r,
        None => return Ok(()),
    };
    let fact = match get_and_use_facts(&graph.facts, &mut graph.log_guards, callee_reg) {
        Some(f) if f.has_known_value() => f.clone(),
        _ => return Ok(()),
    };

    // Step 2: resolve the concrete code object, following a single-/multi-
    // dispatch invocation spec if the callee isn't already code itself.
    let callee_obj = match fact.known_value.as_ref().unwrap() {
        KnownValue::Obj(o) => *o,
        _ => return Ok(()),
    };
    let resolved = match resolve_invocable(env, callee_obj, &call_info) {
        Some(code) => code,
        None => return Ok(()), // non-code or inconclusive: abort the rewrite
    };

    // Step 3: if resolution changed the operand's value and the target isn't
    // a compiler stub, hoist an sp_getspeshslot load before prepargs so the
    // prepargs/arg*/invoke sequence stays one inlineable unit for the JIT.
    let already_this_code = callee_obj.0 == resolved.0;
    if !already_this_code && !env.is_compiler_stub(resolved) {
        let slot = graph.spesh_slots.add(crate::capabilities::ObjHandle(resolved.0));
        let load = InstData::new(
            Opcode::SpGetSpeshSlot,
            smallvec::smallvec![Operand::Reg(callee_reg), Operand::SpeshSlot(slot)],
        );
        graph.insert_ins_before(bb, call_info.prepargs_ins, load);
    }

    // Step 4: find a matching candidate.
    let candidate = match env.candidate_for(resolved, &call_info) {
        Some(c) if c.callsite_matches && c.arg_guards_satisfied => c,
        _ => {
            rewrite_to_fastinvoke(graph, invoke_ins, None);
            return Ok(());
        }
    };

    // Step 5: ask the inliner for a graph; graft it in if granted, otherwise
    // fall back to sp_fastinvoke_* with the candidate index attached.
    match env.inline_try_get_graph(graph, resolved, &candidate) {
        Some(inline_graph) => {
            env.inline(graph, &call_info, bb, invoke_ins, inline_graph, resolved);
        }
        None => {
            rewrite_to_fastinvoke(graph, invoke_ins, Some(candidate.index));
        }
    }
    Ok(())
}

fn rewrite_to_fastinvoke(graph: &mut SpeshGraph, invoke_ins: Inst, candidate_index: Option<u32>) {
    let Some(idx) = candidate_index else { return };
    let data = graph.inst_mut(invoke_ins);
    let fastinvoke = match data.opcode {
        Opcode::InvokeV => Opcode::SpFastInvokeV,
        Opcode::InvokeI => Opcode::SpFastInvokeI,
        Opcode::InvokeN => Opcode::SpFastInvokeN,
        Opcode::InvokeS => Opcode::SpFastInvokeS,
        Opcode::InvokeO => Opcode::SpFastInvokeO,
        _ => return,
    };
    data.opcode = fastinvoke;
    data.operands.push(Operand::IntLit(idx as i64));
}
