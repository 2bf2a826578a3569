//! The fact table: compile-time-derived knowledge about register versions.

use crate::entities::LogGuard;
use rustc_hash::FxHashMap;

use bitflags::bitflags;

bitflags! {
    /// Flag vocabulary for a [`Fact`]. `KNOWN_VALUE` implies `KNOWN_TYPE`;
    /// `CONCRETE` and `TYPEOBJ` are mutually exclusive.
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
    pub struct FactFlags: u16 {
        const KNOWN_TYPE        = 1 << 0;
        const KNOWN_VALUE       = 1 << 1;
        const KNOWN_DECONT_TYPE = 1 << 2;
        const CONCRETE          = 1 << 3;
        const TYPEOBJ           = 1 << 4;
        const DECONTED          = 1 << 5;
        const DECONT_CONCRETE   = 1 << 6;
        const DECONT_TYPEOBJ    = 1 << 7;
        const FROM_LOG_GUARD    = 1 << 8;
    }
}

/// A register reference: an original register identity plus an SSA-like
/// version number assigned by the analyzer.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Reg {
    pub orig: u16,
    pub version: u32,
}

/// A known literal value carried by a fact.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum KnownValue {
    Int(i64),
    Num(f64),
    Str(u32),
    Obj(crate::capabilities::ObjHandle),
}

/// Per-register-version compile-time knowledge recorded by the analyzer and
/// refined by the optimizer's own rewrites.
#[derive(Clone, Debug, Default)]
pub struct Fact {
    pub flags: FactFlags,
    pub known_type: Option<crate::capabilities::TypeHandle>,
    pub known_decont_type: Option<crate::capabilities::TypeHandle>,
    pub known_value: Option<KnownValue>,
    pub log_guard: Option<LogGuard>,
    /// Number of live readers of this register version. Decremented exactly
    /// once per rewrite that removes or ignores a reader.
    pub usages: u32,
}

impl Fact {
    pub fn has_known_type(&self) -> bool {
        self.flags.contains(FactFlags::KNOWN_TYPE)
    }

    pub fn has_known_value(&self) -> bool {
        self.flags.contains(FactFlags::KNOWN_VALUE)
    }

    pub fn is_concrete(&self) -> bool {
        self.flags.contains(FactFlags::CONCRETE)
    }

    pub fn is_typeobj(&self) -> bool {
        self.flags.contains(FactFlags::TYPEOBJ)
    }

    pub fn is_deconted(&self) -> bool {
        self.flags.contains(FactFlags::DECONTED)
    }
}

/// The graph's two-dimensional fact table, indexed by `(original_register,
/// version)`.
#[derive(Default)]
pub struct FactTable {
    rows: FxHashMap<(u16, u32), Fact>,
}

impl FactTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg: Reg) -> Option<&Fact> {
        self.rows.get(&(reg.orig, reg.version))
    }

    pub fn get_mut(&mut self, reg: Reg) -> &mut Fact {
        self.rows.entry((reg.orig, reg.version)).or_default()
    }

    pub fn set(&mut self, reg: Reg, fact: Fact) {
        self.rows.insert((reg.orig, reg.version), fact);
    }
}

/// Returns the fact record for `reg` without side effects. A register with no
/// recorded fact (never logged, never specialized) simply has no knowledge.
pub fn get_facts(table: &FactTable, reg: Reg) -> Option<&Fact> {
    table.get(reg)
}

/// Like [`get_facts`], but if the fact carries `FROM_LOG_GUARD`, marks the
/// referenced log guard `used`.
pub fn get_and_use_facts<'a>(
    table: &'a FactTable,
    guards: &mut crate::graph::LogGuardTable,
    reg: Reg,
) -> Option<&'a Fact> {
    let fact = table.get(reg)?;
    use_facts(fact, guards);
    Some(fact)
}

/// Marks the log guard a fact in hand depends on (if any) as used.
pub fn use_facts(fact: &Fact, guards: &mut crate::graph::LogGuardTable) {
    if fact.flags.contains(FactFlags::FROM_LOG_GUARD) {
        if let Some(guard) = fact.log_guard {
            guards.mark_used(guard);
        }
    }
}

/// Duplicates flags, types, value and log-guard index from `src` to `dst` —
/// but *not* `usages` — used whenever a rewrite turns an instruction into a
/// `set`-like identity move.
pub fn copy_facts(table: &mut FactTable, dst: Reg, src: Reg) {
    let src_fact = table.get(src).cloned().unwrap_or_default();
    let dst_usages = table.get(dst).map(|f| f.usages).unwrap_or(0);
    table.set(
        dst,
        Fact {
            flags: src_fact.flags,
            known_type: src_fact.known_type,
            known_decont_type: src_fact.known_decont_type,
            known_value: src_fact.known_value,
            log_guard: src_fact.log_guard,
            usages: dst_usages,
        },
    );
}
