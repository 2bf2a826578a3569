//! Instruction and operand representation.

use crate::entities::{Block, SpeshSlot};
use crate::facts::Reg;
use smallvec::SmallVec;

/// The opcodes the optimizer knows how to rewrite, plus the handful it treats
/// as opaque pass-through (anything not listed here is left untouched by the
/// peephole driver, matching the "local, bail-on-uncertainty" discipline).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Opcode {
    Set,
    IsTrue,
    IsFalse,
    NotI,
    IfI,
    UnlessI,
    IfN,
    UnlessN,
    IfO,
    UnlessO,
    Goto,
    SmrtStrify,
    SmrtNumify,
    CoerceIn,
    FindMeth,
    Can,
    CanS,
    IsList,
    IsHash,
    IsInt,
    IsNum,
    IsStr,
    IsConcrete,
    IsType,
    IsNonNull,
    ObjPrimSpec,
    Hllize,
    Decont,
    AssertParamCheck,
    Create,
    BoxI,
    BoxN,
    BoxS,
    UnboxI,
    UnboxN,
    UnboxS,
    Elems,
    GetAttr,
    BindAttr,
    GetLexStaticO,
    GetLexPerInvTypeO,
    ThrowCatDyn,
    ThrowCatLex,
    ThrowCatLexotic,
    SpLog,
    SpOsrFinalize,
    SpGetSpeshSlot,
    SpFindMeth,
    SpFastInvokeV,
    SpFastInvokeI,
    SpFastInvokeN,
    SpFastInvokeS,
    SpFastInvokeO,
    PrepArgs,
    ArgI,
    ArgN,
    ArgS,
    ArgO,
    ArgConstI,
    ArgConstN,
    ArgConstS,
    InvokeV,
    InvokeI,
    InvokeN,
    InvokeS,
    InvokeO,
    ConstI64,
    ConstN64,
    ConstI6416,
    Phi,
    /// Extension opcode: real encoding carries a sentinel opcode number of
    /// -1 plus a registered specialization callback looked up by extension id.
    ExtOp(u32),
}

/// Read/write classification of an operand slot, used to determine whether an
/// instruction defines a register.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RegKind {
    Read,
    Write,
}

/// The per-operand kind an op descriptor assigns to each operand slot.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum OperandKind {
    Reg(RegKind),
    IntLit,
    NumLit,
    StrIdx,
    CallsiteIdx,
    BranchTarget,
    SpeshSlotIdx,
}

/// Static, opcode-indexed metadata: operand layout and the `pure` bit used by
/// dead-instruction elimination.
pub struct OpDescriptor {
    pub opcode: Opcode,
    pub pure: bool,
    pub operand_kinds: &'static [OperandKind],
}

macro_rules! desc {
    ($op:expr, $pure:expr, [$($k:expr),* $(,)?]) => {
        OpDescriptor { opcode: $op, pure: $pure, operand_kinds: &[$($k),*] }
    };
}

/// Returns the op-descriptor for a given opcode. This is one of the outbound
/// capabilities the driver is specified to call through; here it is a static
/// table rather than a trait method since opcode shape is fixed, not
/// embedder-supplied. Each arm promotes a `const` to a `'static` reference —
/// no allocation on any call.
pub fn op_descriptor(opcode: Opcode) -> &'static OpDescriptor {
    use OperandKind::*;
    use RegKind::*;
    match opcode {
        Opcode::Set => &desc!(Opcode::Set, true, [Reg(Write), Reg(Read)]),
        Opcode::IsTrue => &desc!(Opcode::IsTrue, true, [Reg(Write), Reg(Read)]),
        Opcode::IsFalse => &desc!(Opcode::IsFalse, true, [Reg(Write), Reg(Read)]),
        Opcode::NotI => &desc!(Opcode::NotI, true, [Reg(Write), Reg(Read)]),
        Opcode::IfI => &desc!(Opcode::IfI, false, [Reg(Read), BranchTarget]),
        Opcode::UnlessI => &desc!(Opcode::UnlessI, false, [Reg(Read), BranchTarget]),
        Opcode::IfN => &desc!(Opcode::IfN, false, [Reg(Read), BranchTarget]),
        Opcode::UnlessN => &desc!(Opcode::UnlessN, false, [Reg(Read), BranchTarget]),
        Opcode::IfO => &desc!(Opcode::IfO, false, [Reg(Read), BranchTarget]),
        Opcode::UnlessO => &desc!(Opcode::UnlessO, false, [Reg(Read), BranchTarget]),
        Opcode::Goto => &desc!(Opcode::Goto, false, [BranchTarget]),
        Opcode::SmrtStrify => &desc!(Opcode::SmrtStrify, false, [Reg(Write), Reg(Read)]),
        Opcode::SmrtNumify => &desc!(Opcode::SmrtNumify, false, [Reg(Write), Reg(Read)]),
        Opcode::CoerceIn => &desc!(Opcode::CoerceIn, true, [Reg(Write), Reg(Read)]),
        Opcode::FindMeth => &desc!(Opcode::FindMeth, false, [Reg(Write), Reg(Read), StrIdx]),
        // `can` takes the method name as a literal string-index operand
        // (resolved at spesh time via the embedder's constant pool), while
        // `can_s` takes it as a register whose facts may or may not be known
        // — the opposite of what the two opcodes' names suggest at a glance.
        Opcode::Can => &desc!(Opcode::Can, true, [Reg(Write), Reg(Read), StrIdx]),
        Opcode::CanS => &desc!(Opcode::CanS, true, [Reg(Write), Reg(Read), Reg(Read)]),
        Opcode::IsList => &desc!(Opcode::IsList, true, [Reg(Write), Reg(Read)]),
        Opcode::IsHash => &desc!(Opcode::IsHash, true, [Reg(Write), Reg(Read)]),
        Opcode::IsInt => &desc!(Opcode::IsInt, true, [Reg(Write), Reg(Read)]),
        Opcode::IsNum => &desc!(Opcode::IsNum, true, [Reg(Write), Reg(Read)]),
        Opcode::IsStr => &desc!(Opcode::IsStr, true, [Reg(Write), Reg(Read)]),
        Opcode::IsConcrete => &desc!(Opcode::IsConcrete, true, [Reg(Write), Reg(Read)]),
        Opcode::IsType => &desc!(Opcode::IsType, true, [Reg(Write), Reg(Read), Reg(Read)]),
        Opcode::IsNonNull => &desc!(Opcode::IsNonNull, true, [Reg(Write), Reg(Read)]),
        Opcode::ObjPrimSpec => &desc!(Opcode::ObjPrimSpec, true, [Reg(Write), Reg(Read)]),
        Opcode::Hllize => &desc!(Opcode::Hllize, false, [Reg(Write), Reg(Read)]),
        Opcode::Decont => &desc!(Opcode::Decont, false, [Reg(Write), Reg(Read)]),
        Opcode::AssertParamCheck => &desc!(Opcode::AssertParamCheck, false, [Reg(Read)]),
        Opcode::Create => &desc!(Opcode::Create, false, [Reg(Write), Reg(Read)]),
        Opcode::BoxI => &desc!(Opcode::BoxI, false, [Reg(Write), Reg(Read), Reg(Read)]),
        Opcode::BoxN => &desc!(Opcode::BoxN, false, [Reg(Write), Reg(Read), Reg(Read)]),
        Opcode::BoxS => &desc!(Opcode::BoxS, false, [Reg(Write), Reg(Read), Reg(Read)]),
        Opcode::UnboxI => &desc!(Opcode::UnboxI, true, [Reg(Write), Reg(Read)]),
        Opcode::UnboxN => &desc!(Opcode::UnboxN, true, [Reg(Write), Reg(Read)]),
        Opcode::UnboxS => &desc!(Opcode::UnboxS, true, [Reg(Write), Reg(Read)]),
        Opcode::Elems => &desc!(Opcode::Elems, true, [Reg(Write), Reg(Read)]),
        Opcode::GetAttr => &desc!(Opcode::GetAttr, false, [Reg(Write), Reg(Read), StrIdx]),
        Opcode::BindAttr => &desc!(Opcode::BindAttr, false, [Reg(Read), StrIdx, Reg(Read)]),
        Opcode::GetLexStaticO => &desc!(Opcode::GetLexStaticO, false, [Reg(Write), StrIdx]),
        Opcode::GetLexPerInvTypeO => &desc!(Opcode::GetLexPerInvTypeO, false, [Reg(Write), StrIdx]),
        Opcode::ThrowCatDyn => &desc!(Opcode::ThrowCatDyn, false, [Reg(Write), IntLit]),
        Opcode::ThrowCatLex => &desc!(Opcode::ThrowCatLex, false, [Reg(Write), IntLit]),
        Opcode::ThrowCatLexotic => &desc!(Opcode::ThrowCatLexotic, false, [Reg(Write), IntLit]),
        Opcode::SpLog => &desc!(Opcode::SpLog, false, [Reg(Read), IntLit]),
        Opcode::SpOsrFinalize => &desc!(Opcode::SpOsrFinalize, false, [IntLit]),
        Opcode::SpGetSpeshSlot => &desc!(Opcode::SpGetSpeshSlot, true, [Reg(Write), SpeshSlotIdx]),
        Opcode::SpFindMeth => &desc!(Opcode::SpFindMeth, false, [Reg(Write), Reg(Read), StrIdx, SpeshSlotIdx, SpeshSlotIdx]),
        Opcode::SpFastInvokeV => &desc!(Opcode::SpFastInvokeV, false, [Reg(Read), IntLit]),
        Opcode::SpFastInvokeI => &desc!(Opcode::SpFastInvokeI, false, [Reg(Write), Reg(Read), IntLit]),
        Opcode::SpFastInvokeN => &desc!(Opcode::SpFastInvokeN, false, [Reg(Write), Reg(Read), IntLit]),
        Opcode::SpFastInvokeS => &desc!(Opcode::SpFastInvokeS, false, [Reg(Write), Reg(Read), IntLit]),
        Opcode::SpFastInvokeO => &desc!(Opcode::SpFastInvokeO, false, [Reg(Write), Reg(Read), IntLit]),
        Opcode::PrepArgs => &desc!(Opcode::PrepArgs, false, [CallsiteIdx]),
        Opcode::ArgI => &desc!(Opcode::ArgI, false, [IntLit, Reg(Read)]),
        Opcode::ArgN => &desc!(Opcode::ArgN, false, [IntLit, Reg(Read)]),
        Opcode::ArgS => &desc!(Opcode::ArgS, false, [IntLit, Reg(Read)]),
        Opcode::ArgO => &desc!(Opcode::ArgO, false, [IntLit, Reg(Read)]),
        Opcode::ArgConstI => &desc!(Opcode::ArgConstI, false, [IntLit, IntLit]),
        Opcode::ArgConstN => &desc!(Opcode::ArgConstN, false, [IntLit, NumLit]),
        Opcode::ArgConstS => &desc!(Opcode::ArgConstS, false, [IntLit, StrIdx]),
        Opcode::InvokeV => &desc!(Opcode::InvokeV, false, [Reg(Read)]),
        Opcode::InvokeI => &desc!(Opcode::InvokeI, false, [Reg(Write), Reg(Read)]),
        Opcode::InvokeN => &desc!(Opcode::InvokeN, false, [Reg(Write), Reg(Read)]),
        Opcode::InvokeS => &desc!(Opcode::InvokeS, false, [Reg(Write), Reg(Read)]),
        Opcode::InvokeO => &desc!(Opcode::InvokeO, false, [Reg(Write), Reg(Read)]),
        Opcode::ConstI64 => &desc!(Opcode::ConstI64, true, [Reg(Write), IntLit]),
        Opcode::ConstN64 => &desc!(Opcode::ConstN64, true, [Reg(Write), NumLit]),
        Opcode::ConstI6416 => &desc!(Opcode::ConstI6416, true, [Reg(Write), IntLit]),
        Opcode::Phi => &desc!(Opcode::Phi, true, [Reg(Write)]),
        Opcode::ExtOp(_) => &desc!(Opcode::ExtOp(0), false, []),
    }
}

/// An instruction operand: a tagged union over the kinds an op descriptor may
/// assign to an operand slot.
#[derive(Copy, Clone, Debug)]
pub enum Operand {
    Reg(Reg),
    IntLit(i64),
    NumLit(f64),
    StrIdx(u32),
    CallsiteIdx(u32),
    Branch(Block),
    SpeshSlot(SpeshSlot),
}

impl Operand {
    pub fn as_reg(&self) -> Option<Reg> {
        match self {
            Operand::Reg(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_branch(&self) -> Option<Block> {
        match self {
            Operand::Branch(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int_lit(&self) -> Option<i64> {
        match self {
            Operand::IntLit(v) => Some(*v),
            _ => None,
        }
    }
}

/// An annotation attached to an instruction: a frame-handler scope marker or
/// goto-handler destination marker, consumed by throw-category resolution.
#[derive(Copy, Clone, Debug)]
pub enum Annotation {
    FrameHandlerStart { handler_idx: u32 },
    FrameHandlerEnd { handler_idx: u32 },
    FrameHandlerGoto { handler_idx: u32, target: Block },
}

/// One instruction: an op descriptor, its concrete operands, and any
/// annotations. `prev`/`next` links live on the graph's per-instruction
/// secondary maps so that `delete_ins`/`insert_ins` can relink without
/// invalidating this struct's address.
pub struct InstData {
    pub opcode: Opcode,
    pub operands: SmallVec<[Operand; 4]>,
    pub annotations: SmallVec<[Annotation; 1]>,
}

impl InstData {
    pub fn new(opcode: Opcode, operands: impl Into<SmallVec<[Operand; 4]>>) -> Self {
        InstData { opcode, operands: operands.into(), annotations: SmallVec::new() }
    }

    pub fn descriptor(&self) -> &'static OpDescriptor {
        op_descriptor(self.opcode)
    }

    /// The register this instruction defines, if its first operand is a
    /// write-register per its op descriptor.
    pub fn dest_reg(&self) -> Option<Reg> {
        let desc = self.descriptor();
        if let Some(OperandKind::Reg(RegKind::Write)) = desc.operand_kinds.first() {
            self.operands.first().and_then(|o| o.as_reg())
        } else {
            None
        }
    }

    /// All registers this instruction reads. `phi` is variadic in its number
    /// of incoming values, so it is special-cased here rather than given a
    /// fixed-shape op descriptor: every operand after the destination is a
    /// read.
    pub fn read_regs(&self) -> Box<dyn Iterator<Item = Reg> + '_> {
        if self.opcode == Opcode::Phi {
            return Box::new(self.operands.iter().skip(1).filter_map(|o| o.as_reg()));
        }
        let desc = self.descriptor();
        Box::new(self.operands.iter().zip(desc.operand_kinds.iter()).filter_map(|(op, kind)| {
            match kind {
                OperandKind::Reg(RegKind::Read) => op.as_reg(),
                _ => None,
            }
        }))
    }
}

