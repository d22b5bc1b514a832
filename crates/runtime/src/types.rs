//! Per-instance entity tables: the concrete objects a module instance's
//! function/table/memory/global/element/data indices resolve to.
use crate::allocator::LinearMemory;
use crate::indices::{DataIdx, ElemIdx, FuncIdx, GlobalIdx, MemIdx, ObjectIdx, TableIdx};
use crate::stack::ModuleHandle;
use alloc::boxed::Box;
use alloc::vec::Vec;
use wyrmcore_collections::Arena;
use wyrmcore_core::{FuncType, HeapType, Trap, Value};

/// One function entry: either a function body owned by this crate's own
/// interpreter, a pointer into AOT-compiled code, or a host callback. The
/// validator only ever needs a function's [`FuncType`]; this enum is what
/// the executor dispatches on at call time.
pub enum FunctionInstance {
    Interpreted {
        ty: FuncType,
        module: ModuleHandle,
        /// Parameters followed by declared locals, i.e. the function's full
        /// locals window as `local.get 0` through `local.get N` address it.
        locals: Vec<wyrmcore_core::ValType>,
        code_offset: u32,
    },
    Compiled {
        ty: FuncType,
        module: ModuleHandle,
        /// Entry point inside a [`crate::allocator::JitChunk`] already flipped
        /// to [`crate::allocator::ChunkPermission::ReadExecute`].
        entry: *const u8,
    },
    Host {
        ty: FuncType,
        callback: Box<dyn Fn(&[Value]) -> Result<Vec<Value>, Trap> + Send + Sync>,
    },
}

// SAFETY: `Compiled::entry` points into a `JitChunk` this instance keeps
// alive for at least as long as the `FunctionInstance` itself; it is never
// written to once shared.
unsafe impl Send for FunctionInstance {}
unsafe impl Sync for FunctionInstance {}

impl FunctionInstance {
    pub fn ty(&self) -> &FuncType {
        match self {
            Self::Interpreted { ty, .. } | Self::Compiled { ty, .. } | Self::Host { ty, .. } => ty,
        }
    }
}

/// A Wasm linear memory: committed pages plus the declared maximum the
/// allocator enforces on `grow`.
pub struct MemoryInstance {
    memory: LinearMemory,
}

impl MemoryInstance {
    pub fn new(initial_pages: u32, max_pages: Option<u32>) -> Result<Self, crate::allocator::AllocatorError> {
        Ok(Self { memory: LinearMemory::new(initial_pages, max_pages)? })
    }

    pub fn size_pages(&self) -> u32 {
        self.memory.size_pages()
    }

    pub fn grow(&mut self, delta: u32) -> Result<u32, crate::allocator::AllocatorError> {
        self.memory.grow(delta)
    }

    pub fn data(&self) -> &[u8] {
        self.memory.data()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut()
    }
}

/// A Wasm table: a fixed-width array of typed references, grown in units of
/// one element (unlike linear memory's page granularity).
pub struct TableInstance {
    elem_type: HeapType,
    elements: Vec<wyrmcore_core::Reference>,
    max: Option<u32>,
}

impl TableInstance {
    pub fn new(elem_type: HeapType, initial: u32, max: Option<u32>) -> Self {
        Self { elem_type, elements: alloc::vec![wyrmcore_core::Reference::null(elem_type); initial as usize], max }
    }

    pub fn elem_type(&self) -> HeapType {
        self.elem_type
    }

    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn get(&self, idx: u32) -> Option<wyrmcore_core::Reference> {
        self.elements.get(idx as usize).copied()
    }

    pub fn set(&mut self, idx: u32, value: wyrmcore_core::Reference) -> bool {
        match self.elements.get_mut(idx as usize) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn grow(&mut self, delta: u32, fill: wyrmcore_core::Reference) -> Option<u32> {
        let old = self.size();
        let new_len = old.checked_add(delta)?;
        if let Some(max) = self.max {
            if new_len > max {
                return None;
            }
        }
        self.elements.resize(new_len as usize, fill);
        Some(old)
    }

    pub fn fill(&mut self, idx: u32, value: wyrmcore_core::Reference, len: u32) -> bool {
        let Some(end) = idx.checked_add(len) else { return false };
        if end as usize > self.elements.len() {
            return false;
        }
        self.elements[idx as usize..end as usize].fill(value);
        true
    }
}

/// A mutable or immutable global variable.
pub struct GlobalInstance {
    ty: wyrmcore_core::ValType,
    mutable: bool,
    value: Value,
}

impl GlobalInstance {
    pub fn new(ty: wyrmcore_core::ValType, mutable: bool, value: Value) -> Self {
        Self { ty, mutable, value }
    }

    pub fn ty(&self) -> wyrmcore_core::ValType {
        self.ty
    }

    pub fn mutable(&self) -> bool {
        self.mutable
    }

    pub fn get(&self) -> Value {
        self.value
    }

    /// Returns `false` without writing if this global is immutable; the
    /// validator is expected to have already rejected any `global.set`
    /// targeting one, so this is a defense against a malformed instance
    /// built outside the normal validation path.
    pub fn set(&mut self, value: Value) -> bool {
        if !self.mutable {
            return false;
        }
        self.value = value;
        true
    }
}

/// An active or dropped element segment, consumed by `table.init` and
/// erased (but index-stable) by `elem.drop`.
pub struct ElementInstance {
    elements: Option<Vec<wyrmcore_core::Reference>>,
}

impl ElementInstance {
    pub fn new(elements: Vec<wyrmcore_core::Reference>) -> Self {
        Self { elements: Some(elements) }
    }

    pub fn get(&self) -> &[wyrmcore_core::Reference] {
        self.elements.as_deref().unwrap_or(&[])
    }

    pub fn drop_segment(&mut self) {
        self.elements = None;
    }
}

/// An active or dropped data segment, consumed by `memory.init` and erased
/// (but index-stable) by `data.drop`.
pub struct DataInstance {
    bytes: Option<Box<[u8]>>,
}

impl DataInstance {
    pub fn new(bytes: Box<[u8]>) -> Self {
        Self { bytes: Some(bytes) }
    }

    pub fn get(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or(&[])
    }

    pub fn drop_segment(&mut self) {
        self.bytes = None;
    }
}

/// A GC struct or array instance living in the object heap, keyed by
/// [`ObjectIdx`] in the store's [`wyrmcore_collections::Arena`].
pub struct ObjectInstance {
    pub type_idx: wyrmcore_core::TypeIdx,
    pub fields: Vec<wyrmcore_core::RawValue>,
}

impl ObjectInstance {
    pub fn new(type_idx: wyrmcore_core::TypeIdx, fields: Vec<wyrmcore_core::RawValue>) -> Self {
        Self { type_idx, fields }
    }
}

/// Back-reference from a GC object to the objects it directly contains,
/// used by the cycle-tolerant tracing collector; not populated by this
/// crate, which only defines the object shape.
pub type ObjectGraph = Vec<ObjectIdx>;

/// Every per-instance entity table a module instance owns, each backed by a
/// [`wyrmcore_collections::Arena`] keyed by the matching index newtype from
/// [`crate::indices`]. The instantiator (out of this crate's scope) decides
/// how many of these a given module gets and populates them; this crate only
/// owns the table shape and the handful of index-resolved operations
/// ([`Self::memory_size`], [`Self::table_size`], ...) that need no
/// module-relative lookup beyond the index itself.
#[derive(Default)]
pub struct Store {
    functions: Arena<FuncIdx, FunctionInstance>,
    memories: Arena<MemIdx, MemoryInstance>,
    tables: Arena<TableIdx, TableInstance>,
    globals: Arena<GlobalIdx, GlobalInstance>,
    elements: Arena<ElemIdx, ElementInstance>,
    data: Arena<DataIdx, DataInstance>,
    objects: Arena<ObjectIdx, ObjectInstance>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_function(&mut self, function: FunctionInstance) -> FuncIdx {
        self.functions.alloc(function)
    }

    pub fn function(&self, idx: FuncIdx) -> Option<&FunctionInstance> {
        self.functions.get(idx)
    }

    pub fn alloc_memory(&mut self, memory: MemoryInstance) -> MemIdx {
        self.memories.alloc(memory)
    }

    /// `memory.size`: the committed page count of memory `idx`, or `None` if
    /// `idx` is out of range (a validator bug, since every index in the
    /// instruction stream is checked against the module's declared memory
    /// count at validation time).
    pub fn memory_size(&self, idx: MemIdx) -> Option<u32> {
        self.memories.get(idx).map(MemoryInstance::size_pages)
    }

    /// `memory.grow`. Returns `Ok(None)` rather than a trap for an
    /// out-of-range `idx`, so the caller can distinguish an engine-internal
    /// bug from the ordinary grow-rejected outcome it already handles.
    pub fn memory_grow(&mut self, idx: MemIdx, delta: u32) -> Option<Result<u32, crate::allocator::AllocatorError>> {
        Some(self.memories.get_mut(idx)?.grow(delta))
    }

    pub fn alloc_table(&mut self, table: TableInstance) -> TableIdx {
        self.tables.alloc(table)
    }

    /// `table.size`: the current element count of table `idx`.
    pub fn table_size(&self, idx: TableIdx) -> Option<u32> {
        self.tables.get(idx).map(TableInstance::size)
    }

    pub fn table(&self, idx: TableIdx) -> Option<&TableInstance> {
        self.tables.get(idx)
    }

    pub fn table_mut(&mut self, idx: TableIdx) -> Option<&mut TableInstance> {
        self.tables.get_mut(idx)
    }

    pub fn alloc_global(&mut self, global: GlobalInstance) -> GlobalIdx {
        self.globals.alloc(global)
    }

    pub fn global(&self, idx: GlobalIdx) -> Option<&GlobalInstance> {
        self.globals.get(idx)
    }

    pub fn global_mut(&mut self, idx: GlobalIdx) -> Option<&mut GlobalInstance> {
        self.globals.get_mut(idx)
    }

    pub fn alloc_element(&mut self, element: ElementInstance) -> ElemIdx {
        self.elements.alloc(element)
    }

    pub fn element(&self, idx: ElemIdx) -> Option<&ElementInstance> {
        self.elements.get(idx)
    }

    pub fn alloc_data(&mut self, data: DataInstance) -> DataIdx {
        self.data.alloc(data)
    }

    pub fn data_segment(&self, idx: DataIdx) -> Option<&DataInstance> {
        self.data.get(idx)
    }

    pub fn alloc_object(&mut self, object: ObjectInstance) -> ObjectIdx {
        self.objects.alloc(object)
    }

    pub fn object(&self, idx: ObjectIdx) -> Option<&ObjectInstance> {
        self.objects.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_size_resolves_through_the_arena() {
        let mut store = Store::new();
        let idx = store.alloc_memory(MemoryInstance::new(1, Some(4)).unwrap());
        assert_eq!(store.memory_size(idx), Some(1));
        assert_eq!(store.memory_grow(idx, 2).unwrap().unwrap(), 1);
        assert_eq!(store.memory_size(idx), Some(3));
    }

    #[test]
    fn memory_size_of_unknown_index_is_none() {
        let store = Store::new();
        assert_eq!(store.memory_size(MemIdx(0)), None);
    }

    #[test]
    fn table_size_resolves_through_the_arena() {
        let mut store = Store::new();
        let idx = store.alloc_table(TableInstance::new(HeapType::Abs(wyrmcore_core::AbsHeapType::Func), 3, None));
        assert_eq!(store.table_size(idx), Some(3));
        store.table_mut(idx).unwrap().grow(2, wyrmcore_core::Reference::null(HeapType::Abs(wyrmcore_core::AbsHeapType::Func)));
        assert_eq!(store.table_size(idx), Some(5));
    }

    #[test]
    fn globals_round_trip_through_distinct_indices() {
        let mut store = Store::new();
        let a = store.alloc_global(GlobalInstance::new(wyrmcore_core::ValType::I32, true, Value::I32(1)));
        let b = store.alloc_global(GlobalInstance::new(wyrmcore_core::ValType::I32, true, Value::I32(2)));
        store.global_mut(a).unwrap().set(Value::I32(9));
        assert_eq!(store.global(a).unwrap().get().i32(), Some(9));
        assert_eq!(store.global(b).unwrap().get().i32(), Some(2));
    }

    #[test]
    fn objects_are_addressable_by_their_allocated_index() {
        let mut store = Store::new();
        let idx = store.alloc_object(ObjectInstance::new(wyrmcore_core::TypeIdx(0), alloc::vec![]));
        assert_eq!(store.object(idx).unwrap().type_idx, wyrmcore_core::TypeIdx(0));
    }
}
