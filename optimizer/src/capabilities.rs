//! Capability interfaces for the external collaborators the optimizer treats as
//! black boxes: the object model's method/type/multi-dispatch caches, the
//! representation and container sub-specializers, and the inliner.
//!
//! None of these are implemented here — the optimizer only ever calls through
//! the traits below. Production embedders provide a concrete `OptimizerEnv`;
//! tests use the in-memory [`TestEnv`](crate::testenv::TestEnv) fake.

use crate::call_info::CallInfo;
use crate::entities::{Block, Inst};
use crate::graph::SpeshGraph;

/// Opaque handle to a type in the object model.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct TypeHandle(pub u32);

/// Opaque handle to a resolved method.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodHandle(pub u32);

/// Opaque handle to a code object (an invocable subroutine).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CodeHandle(pub u32);

/// Opaque handle to any heap object, used where a fact's known value is not
/// necessarily a code object (e.g. a logged lexical).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ObjHandle(pub u32);

/// A tri-state result from a cache-only query: the cache never suspends, never
/// allocates a user-visible object, and returns `Unknown` when it cannot give a
/// conclusive answer. `Unknown` must cause the calling rewriter to bail, not block.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TriState {
    Unknown,
    No,
    Yes,
}

impl TriState {
    pub fn is_conclusive(self) -> bool {
        !matches!(self, TriState::Unknown)
    }
}

/// Representation IDs the optimizer cares about for `islist`/`ishash`/`isint`/
/// `isnum`/`isstr` probing and `objprimspec`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ReprId {
    Array,
    Hash,
    P6Int,
    P6Num,
    P6Str,
    Exception,
    Other,
}

/// Boxed-primitive storage spec returned by `objprimspec`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PrimSpec {
    None,
    Int,
    Num,
    Str,
}

/// The full boolification-mode vocabulary a type's boolification spec may
/// declare, used by `istrue`/`isfalse` peephole rewriting. Only
/// `UnboxInt`/`NotTypeObject` are eagerly rewritten by this pass (spec.md's
/// §4.2 table documents exactly those two); every other mode is modeled here
/// so the capability surface an embedder implements is complete, but is left
/// a documented bail by the rewriter — evaluating it would mean running a
/// user-overridable boxing routine (or, for `CallMethod`, user code) at
/// spesh time, which the optimizer never does.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BoolMode {
    UnboxInt,
    UnboxNum,
    UnboxStrNotEmpty,
    UnboxStrNotEmptyOrZero,
    Bigint,
    Iter,
    HasElems,
    NotTypeObject,
    CallMethod,
}

/// A single-dispatch or multi-dispatch invocation spec attached to a type.
#[derive(Copy, Clone, Debug)]
pub enum InvocationSpec {
    /// Single dispatch: read the named attribute to get the invocable.
    Single { attr_slot: u32 },
    /// Multi dispatch: consult the multi-dispatch cache using the attribute
    /// slots that hold dispatcher state, keyed by the caller's call info.
    Multi { cache_attr_slot: u32 },
}

/// Everything the optimizer needs to know about a type to drive peephole
/// rewrites and call-site specialization. Returned by [`OptimizerEnv::type_info`].
#[derive(Copy, Clone, Debug)]
pub struct TypeInfo {
    pub repr_id: ReprId,
    pub prim_spec: PrimSpec,
    /// The type's boolification spec mode. A type with no boolification spec
    /// at all reports `NotTypeObject`, matching the original's
    /// `bs == NULL ? MVM_BOOL_MODE_NOT_TYPE_OBJECT : bs->mode` fallback.
    pub bool_mode: BoolMode,
    pub invocation_spec: Option<InvocationSpec>,
    /// True if the representation's container spec declares that fetching a
    /// value out of it can never invoke user code.
    pub fetch_never_invokes: bool,
    /// True if this type is the dedicated code representation (the invocation
    /// target can be taken directly, without consulting an invocation spec).
    pub is_code_repr: bool,
    /// True if this type already belongs to the destination HLL scope that
    /// `hllize` would otherwise coerce it into.
    pub already_hllized: bool,
}

/// A resolved representation sub-specializer invocation. Representation and
/// container hooks run synchronously, may mutate the instruction they were
/// handed and allocate spesh slots, but must not touch other instructions or
/// blocks.
pub trait ReprSpecializer {
    /// Attempt to specialize `ins` (in block `bb`) given that its designated
    /// type operand resolves to `st`. Returns true if it rewrote the
    /// instruction.
    fn spesh(&self, graph: &mut SpeshGraph, st: TypeHandle, bb: Block, ins: Inst) -> bool;
}

/// A candidate pre-specialized version of a callee, matched by callsite shape
/// and per-argument guards.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub index: u32,
    pub callsite_matches: bool,
    pub arg_guards_satisfied: bool,
}

/// An inline graph snippet produced by the inliner from a chosen candidate.
pub struct InlineGraph {
    pub candidate_index: u32,
}

/// The full set of external collaborators the optimizer calls through. This is
/// the single seam between the optimizer's pure graph-rewriting logic and the
/// rest of the runtime (bytecode loader, GC, JIT backend, object model).
pub trait OptimizerEnv {
    fn op_descriptor(&self, opcode: crate::ir::Opcode) -> &'static crate::ir::OpDescriptor {
        crate::ir::op_descriptor(opcode)
    }

    fn method_cache_lookup(&self, ty: TypeHandle, name: &str) -> Option<MethodHandle>;
    fn can_method_cache_only(&self, ty: TypeHandle, name: &str) -> TriState;
    fn try_cache_type_check(&self, obj_type: TypeHandle, check_type: TypeHandle) -> TriState;
    fn multi_cache_find(&self, cache_obj: ObjHandle, call_info: &CallInfo) -> Option<CodeHandle>;

    /// Resolves a string-constant-pool index to its string value. The
    /// constant pool itself belongs to the bytecode loader (out of scope);
    /// the optimizer never inspects string bytes directly, it only ever
    /// forwards an index through this capability when a rewriter (`findmeth`,
    /// `can`/`can_s`) needs an actual name to hand to a cache query.
    fn resolve_str(&self, idx: u32) -> String;

    fn type_info(&self, ty: TypeHandle) -> TypeInfo;
    fn repr_specializer(&self, ty: TypeHandle) -> Option<&dyn ReprSpecializer>;

    /// Eagerly computes the boolified truthiness of `obj` under `mode`,
    /// without running user code. Must return `None` for `BoolMode::CallMethod`
    /// (boolifying through a user-overridable method requires invoking it) and
    /// may return `None` for any other mode if the value can't be read
    /// without side effects; a rewriter that gets `None` must bail.
    fn eager_truthy(&self, obj: ObjHandle, mode: BoolMode) -> Option<bool>;

    /// The type of an arbitrary heap object, used to drive invocation-spec
    /// resolution at a call site (is this already code? does its type carry
    /// a single- or multi-dispatch invocation spec to unwrap?).
    fn type_of(&self, obj: ObjHandle) -> TypeHandle;

    /// Reads the attribute stored at `attr_slot` on `obj`. Used only to
    /// follow a type's [`InvocationSpec`]: the single-dispatch slot holding
    /// the wrapped code object, or the multi-dispatch slot holding the
    /// dispatch cache object. Never runs user code.
    fn read_invocation_attr(&self, obj: ObjHandle, attr_slot: u32) -> Option<ObjHandle>;

    /// Resolve a known value to a code handle, if it is (or unwraps to) one.
    fn as_code(&self, value: &crate::facts::KnownValue) -> Option<CodeHandle>;
    fn is_compiler_stub(&self, code: CodeHandle) -> bool;
    fn candidate_for(&self, code: CodeHandle, call_info: &CallInfo) -> Option<Candidate>;

    fn inline_try_get_graph(
        &self,
        graph: &SpeshGraph,
        callee_code: CodeHandle,
        candidate: &Candidate,
    ) -> Option<InlineGraph>;
    fn inline(
        &self,
        graph: &mut SpeshGraph,
        call_info: &CallInfo,
        bb: Block,
        ins: Inst,
        inline_graph: InlineGraph,
        callee_code: CodeHandle,
    );
}
