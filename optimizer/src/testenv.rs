//! An in-memory fake of [`OptimizerEnv`] for tests. Mirrors the shape of the
//! fixture collaborators cranelift-codegen's own filetests use to drive
//! individual passes without a whole embedding runtime.

use crate::call_info::CallInfo;
use crate::capabilities::{
    BoolMode, Candidate, CodeHandle, InlineGraph, MethodHandle, ObjHandle, OptimizerEnv,
    ReprSpecializer, TriState, TypeHandle, TypeInfo,
};
use crate::entities::{Block, Inst};
use crate::facts::KnownValue;
use crate::graph::SpeshGraph;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;

#[derive(Default)]
pub struct TestEnv {
    pub types: RefCell<FxHashMap<u32, TypeInfo>>,
    pub methods: RefCell<FxHashMap<(u32, String), MethodHandle>>,
    pub can_results: RefCell<FxHashMap<(u32, String), TriState>>,
    pub type_checks: RefCell<FxHashMap<(u32, u32), TriState>>,
    pub codes: RefCell<FxHashMap<u32, CodeHandle>>,
    pub compiler_stubs: RefCell<FxHashSet<u32>>,
    pub candidates: RefCell<FxHashMap<u32, Candidate>>,
    pub inline_graphs: RefCell<FxHashMap<u32, bool>>,
    pub inlined_calls: RefCell<Vec<u32>>,
    pub strings: RefCell<FxHashMap<u32, String>>,
    pub obj_types: RefCell<FxHashMap<u32, TypeHandle>>,
    pub attrs: RefCell<FxHashMap<(u32, u32), ObjHandle>>,
    pub multi_cache_results: RefCell<FxHashMap<u32, CodeHandle>>,
    pub truthy: RefCell<FxHashMap<u32, bool>>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_type(&self, ty: TypeHandle, info: TypeInfo) {
        self.types.borrow_mut().insert(ty.0, info);
    }

    pub fn set_method(&self, ty: TypeHandle, name: &str, method: MethodHandle) {
        self.methods.borrow_mut().insert((ty.0, name.to_string()), method);
    }

    pub fn set_code(&self, obj: u32, code: CodeHandle) {
        self.codes.borrow_mut().insert(obj, code);
    }

    /// Registers the string a constant-pool index resolves to, for rewriters
    /// that need to turn a `StrIdx`/`KnownValue::Str` back into a name.
    pub fn set_str(&self, idx: u32, s: &str) {
        self.strings.borrow_mut().insert(idx, s.to_string());
    }

    /// Records the type of a heap object, for call-site invocation-spec
    /// resolution in tests.
    pub fn set_obj_type(&self, obj: ObjHandle, ty: TypeHandle) {
        self.obj_types.borrow_mut().insert(obj.0, ty);
    }

    /// Records the value of an object's attribute slot, for invocation-spec
    /// unwrapping in tests.
    pub fn set_attr(&self, obj: ObjHandle, attr_slot: u32, value: ObjHandle) {
        self.attrs.borrow_mut().insert((obj.0, attr_slot), value);
    }

    /// Registers what the multi-dispatch cache should resolve a cache object
    /// to, irrespective of the caller's `CallInfo` (tests only exercise one
    /// callsite shape at a time).
    pub fn set_multi_cache_result(&self, cache_obj: ObjHandle, code: CodeHandle) {
        self.multi_cache_results.borrow_mut().insert(cache_obj.0, code);
    }

    /// Registers the eager-boolified truthiness `obj` should report under
    /// whichever non-`CallMethod` mode a test rewrite queries it with.
    pub fn set_truthy(&self, obj: ObjHandle, val: bool) {
        self.truthy.borrow_mut().insert(obj.0, val);
    }
}

impl OptimizerEnv for TestEnv {
    fn method_cache_lookup(&self, ty: TypeHandle, name: &str) -> Option<MethodHandle> {
        self.methods.borrow().get(&(ty.0, name.to_string())).copied()
    }

    fn can_method_cache_only(&self, ty: TypeHandle, name: &str) -> TriState {
        self.can_results
            .borrow()
            .get(&(ty.0, name.to_string()))
            .copied()
            .unwrap_or(TriState::Unknown)
    }

    fn try_cache_type_check(&self, obj_type: TypeHandle, check_type: TypeHandle) -> TriState {
        self.type_checks
            .borrow()
            .get(&(obj_type.0, check_type.0))
            .copied()
            .unwrap_or(TriState::Unknown)
    }

    fn multi_cache_find(&self, cache_obj: ObjHandle, _call_info: &CallInfo) -> Option<CodeHandle> {
        self.multi_cache_results.borrow().get(&cache_obj.0).copied()
    }

    fn resolve_str(&self, idx: u32) -> String {
        self.strings.borrow().get(&idx).cloned().unwrap_or_default()
    }

    fn type_info(&self, ty: TypeHandle) -> TypeInfo {
        self.types.borrow().get(&ty.0).copied().unwrap_or(TypeInfo {
            repr_id: crate::capabilities::ReprId::Other,
            prim_spec: crate::capabilities::PrimSpec::None,
            bool_mode: crate::capabilities::BoolMode::NotTypeObject,
            invocation_spec: None,
            fetch_never_invokes: false,
            is_code_repr: false,
            already_hllized: false,
        })
    }

    fn repr_specializer(&self, _ty: TypeHandle) -> Option<&dyn ReprSpecializer> {
        None
    }

    fn eager_truthy(&self, obj: ObjHandle, mode: BoolMode) -> Option<bool> {
        if mode == BoolMode::CallMethod {
            return None;
        }
        self.truthy.borrow().get(&obj.0).copied()
    }

    fn type_of(&self, obj: ObjHandle) -> TypeHandle {
        self.obj_types.borrow().get(&obj.0).copied().unwrap_or(TypeHandle(u32::MAX))
    }

    fn read_invocation_attr(&self, obj: ObjHandle, attr_slot: u32) -> Option<ObjHandle> {
        self.attrs.borrow().get(&(obj.0, attr_slot)).copied()
    }

    fn as_code(&self, value: &KnownValue) -> Option<CodeHandle> {
        match value {
            KnownValue::Obj(o) => self.codes.borrow().get(&o.0).copied(),
            _ => None,
        }
    }

    fn is_compiler_stub(&self, code: CodeHandle) -> bool {
        self.compiler_stubs.borrow().contains(&code.0)
    }

    fn candidate_for(&self, code: CodeHandle, _call_info: &CallInfo) -> Option<Candidate> {
        self.candidates.borrow().get(&code.0).cloned()
    }

    fn inline_try_get_graph(
        &self,
        _graph: &SpeshGraph,
        callee_code: CodeHandle,
        candidate: &Candidate,
    ) -> Option<InlineGraph> {
        if self.inline_graphs.borrow().get(&callee_code.0).copied().unwrap_or(false) {
            Some(InlineGraph { candidate_index: candidate.index })
        } else {
            None
        }
    }

    fn inline(
        &self,
        graph: &mut SpeshGraph,
        _call_info: &CallInfo,
        bb: Block,
        ins: Inst,
        _inline_graph: InlineGraph,
        callee_code: CodeHandle,
    ) {
        // A minimal graft: mark the call block's successor chain unchanged and
        // just turn the invoke into a no-arg goto to its own linear successor,
        // standing in for "a sub-graph was spliced in here". Real inliners
        // graft a whole donor graph; this fake only needs to prove the
        // optimizer reaches this call correctly.
        self.inlined_calls.borrow_mut().push(callee_code.0);
        graph.delete_ins(ins);
        let _ = bb;
    }
}
