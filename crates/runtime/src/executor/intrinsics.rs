//! The intrinsics ("proxy") surface AOT-compiled code calls back into: a
//! fixed-order table of function pointers, one per [`IntrinsicId`], sharing a
//! uniform calling contract so the code generator only needs to know the
//! table's layout, never the engine's internals.
use crate::executor::context::ExecutionContext;
use wyrmcore_core::{Trap, Value};

/// Every operation compiled code cannot perform inline and must call back
/// into the engine for. Numeric and vector instructions are excluded: they
/// compile to native code directly and never need a proxy entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum IntrinsicId {
    Trap,
    Call,
    CallIndirect,
    CallRef,
    RefFunc,
    StructNew,
    StructGet,
    StructSet,
    ArrayNew,
    ArrayGet,
    ArraySet,
    ArrayLen,
    ArrayFill,
    ArrayCopy,
    RefTest,
    RefCast,
    TableGet,
    TableSet,
    TableInit,
    TableCopy,
    TableGrow,
    TableSize,
    TableFill,
    ElemDrop,
    MemoryGrow,
    MemorySize,
    MemoryInit,
    MemoryCopy,
    MemoryFill,
    DataDrop,
    MemoryAtomicNotify,
    MemoryAtomicWait32,
    MemoryAtomicWait64,
    /// Hands compiled code a direct native symbol for a table slot, letting
    /// a subsequent `call_indirect` to the same slot skip the proxy.
    ResolveTableCallTarget,
    /// Hands compiled code a direct native symbol for a `call_ref` target.
    ResolveRefCallTarget,
}

impl IntrinsicId {
    pub const COUNT: usize = Self::ResolveRefCallTarget as usize + 1;
}

/// The signature every proxy entry shares: the active [`ExecutionContext`],
/// a span of scalar arguments (operand-stack values, already popped by the
/// caller), and a caller-provided slot for the result — written only on
/// success. Returns `Err` to signal the caller should emit a fault via
/// [`crate::fault::emit`] with the carried [`wyrmcore_core::TrapCode`].
pub type ProxyFn = fn(&mut ExecutionContext, args: &[Value], out: &mut [Value]) -> Result<(), Trap>;

/// A fixed-order array of [`ProxyFn`]s, one per [`IntrinsicId`], indexed
/// directly by its discriminant. Populated by the embedder/code generator;
/// this crate only defines the layout and the contract each slot must honor.
pub struct ProxyTable {
    entries: [ProxyFn; IntrinsicId::COUNT],
}

impl ProxyTable {
    pub const fn new(entries: [ProxyFn; IntrinsicId::COUNT]) -> Self {
        Self { entries }
    }

    pub fn get(&self, id: IntrinsicId) -> ProxyFn {
        self.entries[id as usize]
    }
}
