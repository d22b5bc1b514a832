//! Reserved-region linear memory allocator and the mmap/VirtualAlloc-backed
//! JIT chunk allocator.
//!
//! Grounded on the reserve-12-GiB / offset-4-GiB scheme: a Wasm linear memory
//! reserves far more virtual address space than it will ever commit so that
//! `i32`-indexed accesses can overrun into guard pages instead of needing an
//! explicit bounds check on every load/store. Platforms without enough spare
//! VA space (or without `mmap`/`VirtualAlloc` at all) fall back to a plain
//! heap allocation; correctness is unaffected, only the elided-bounds-check
//! optimization is lost.
use core::fmt::{self, Display};
use wyrmcore_core::PAGE_SIZE;

/// 4 GiB: width of an `i32` offset, and the distance from the start of the
/// reservation to the pointer handed back as a linear memory's base.
const K4G: usize = 0x1_0000_0000;
/// 12 GiB: the full reservation, giving a 4 GiB window on either side of `base`.
const K12G: usize = 0x3_0000_0000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// The platform refused to reserve or commit the requested region.
    OutOfMemory,
    /// `grow` would exceed the memory's declared maximum.
    ExceedsMaximum,
    /// `grow` would exceed the fixed 4 GiB addressable window.
    ExceedsAddressSpace,
}

impl Display for AllocatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OutOfMemory => "out of memory",
            Self::ExceedsMaximum => "memory grow exceeds configured maximum",
            Self::ExceedsAddressSpace => "memory grow exceeds the 4 GiB address window",
        };
        write!(f, "{msg}")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocatorError {}

mod backend {
    use super::AllocatorError;

    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            pub use unix::*;
            mod unix {
                use super::super::{AllocatorError, K12G};

                /// Reserves `K12G` bytes as `PROT_NONE`. Returns the mapping's start.
                pub fn reserve() -> Result<*mut u8, AllocatorError> {
                    // SAFETY: anonymous, non-fixed mapping; no aliasing concerns.
                    let ptr = unsafe {
                        libc::mmap(
                            core::ptr::null_mut(),
                            K12G,
                            libc::PROT_NONE,
                            libc::MAP_PRIVATE | libc::MAP_ANON,
                            -1,
                            0,
                        )
                    };
                    if ptr == libc::MAP_FAILED {
                        return Err(AllocatorError::OutOfMemory);
                    }
                    Ok(ptr.cast())
                }

                pub unsafe fn unreserve(ptr: *mut u8) {
                    libc::munmap(ptr.cast(), K12G);
                }

                pub unsafe fn commit_rw(ptr: *mut u8, len: usize) -> Result<(), AllocatorError> {
                    if libc::mprotect(ptr.cast(), len, libc::PROT_READ | libc::PROT_WRITE) != 0 {
                        return Err(AllocatorError::OutOfMemory);
                    }
                    Ok(())
                }

                pub fn allocate_chunk(len: usize) -> Result<*mut u8, AllocatorError> {
                    let ptr = unsafe {
                        libc::mmap(
                            core::ptr::null_mut(),
                            len,
                            libc::PROT_READ | libc::PROT_WRITE,
                            libc::MAP_PRIVATE | libc::MAP_ANON,
                            -1,
                            0,
                        )
                    };
                    if ptr == libc::MAP_FAILED {
                        return Err(AllocatorError::OutOfMemory);
                    }
                    Ok(ptr.cast())
                }

                pub unsafe fn release_chunk(ptr: *mut u8, len: usize) {
                    libc::munmap(ptr.cast(), len);
                }

                pub unsafe fn protect(ptr: *mut u8, len: usize, prot: i32) -> Result<(), AllocatorError> {
                    if libc::mprotect(ptr.cast(), len, prot) != 0 {
                        return Err(AllocatorError::OutOfMemory);
                    }
                    Ok(())
                }

                pub const PROT_R: i32 = libc::PROT_READ;
                pub const PROT_RW: i32 = libc::PROT_READ | libc::PROT_WRITE;
                pub const PROT_RX: i32 = libc::PROT_READ | libc::PROT_EXEC;
            }
        } else if #[cfg(windows)] {
            pub use win::*;
            mod win {
                use super::super::{AllocatorError, K12G};
                use windows_sys::Win32::System::Memory::{
                    VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
                    PAGE_EXECUTE_READ, PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
                };

                pub fn reserve() -> Result<*mut u8, AllocatorError> {
                    let ptr = unsafe {
                        VirtualAlloc(core::ptr::null(), K12G, MEM_RESERVE, PAGE_NOACCESS)
                    };
                    if ptr.is_null() {
                        return Err(AllocatorError::OutOfMemory);
                    }
                    Ok(ptr.cast())
                }

                pub unsafe fn unreserve(ptr: *mut u8) {
                    VirtualFree(ptr.cast(), 0, MEM_RELEASE);
                }

                pub unsafe fn commit_rw(ptr: *mut u8, len: usize) -> Result<(), AllocatorError> {
                    let res = VirtualAlloc(ptr.cast(), len, MEM_COMMIT, PAGE_READWRITE);
                    if res.is_null() {
                        return Err(AllocatorError::OutOfMemory);
                    }
                    Ok(())
                }

                pub fn allocate_chunk(len: usize) -> Result<*mut u8, AllocatorError> {
                    let ptr = unsafe {
                        VirtualAlloc(core::ptr::null(), len, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE)
                    };
                    if ptr.is_null() {
                        return Err(AllocatorError::OutOfMemory);
                    }
                    Ok(ptr.cast())
                }

                pub unsafe fn release_chunk(ptr: *mut u8, _len: usize) {
                    VirtualFree(ptr.cast(), 0, MEM_RELEASE);
                }

                pub unsafe fn protect(ptr: *mut u8, len: usize, prot: u32) -> Result<(), AllocatorError> {
                    let mut old = 0u32;
                    if VirtualProtect(ptr.cast(), len, prot, &mut old) == 0 {
                        return Err(AllocatorError::OutOfMemory);
                    }
                    Ok(())
                }

                pub const PROT_R: u32 = PAGE_READONLY;
                pub const PROT_RW: u32 = PAGE_READWRITE;
                pub const PROT_RX: u32 = PAGE_EXECUTE_READ;
            }
        } else {
            pub use fallback::*;
            mod fallback {
                use super::super::AllocatorError;

                pub fn reserve() -> Result<*mut u8, AllocatorError> {
                    Err(AllocatorError::OutOfMemory)
                }
                pub unsafe fn unreserve(_ptr: *mut u8) {}
                pub unsafe fn commit_rw(_ptr: *mut u8, _len: usize) -> Result<(), AllocatorError> {
                    Err(AllocatorError::OutOfMemory)
                }
                pub fn allocate_chunk(_len: usize) -> Result<*mut u8, AllocatorError> {
                    Err(AllocatorError::OutOfMemory)
                }
                pub unsafe fn release_chunk(_ptr: *mut u8, _len: usize) {}
                pub unsafe fn protect(_ptr: *mut u8, _len: usize, _prot: i32) -> Result<(), AllocatorError> {
                    Ok(())
                }
                pub const PROT_R: i32 = 0;
                pub const PROT_RW: i32 = 0;
                pub const PROT_RX: i32 = 0;
            }
        }
    }
}

/// A Wasm linear memory's storage: either a guard-paged reservation (the fast
/// path) or a plain heap buffer (the fallback path, used whenever `reserve`
/// fails — typically a platform without enough spare virtual address space).
enum Storage {
    Reserved { reservation: *mut u8, base: *mut u8 },
    Heap(alloc::vec::Vec<u8>),
}

// SAFETY: the raw pointers in `Reserved` are exclusively owned by the
// `LinearMemory` that holds this `Storage`; no aliasing occurs.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

/// Backing storage for one [`crate::types::MemoryInstance`].
pub struct LinearMemory {
    storage: Storage,
    committed_pages: u32,
    max_pages: Option<u32>,
}

impl LinearMemory {
    pub fn new(initial_pages: u32, max_pages: Option<u32>) -> Result<Self, AllocatorError> {
        let mut mem = match backend::reserve() {
            Ok(reservation) => {
                // SAFETY: `reservation` is `K12G` bytes of our own fresh mapping.
                let base = unsafe { reservation.add(K4G) };
                Self { storage: Storage::Reserved { reservation, base }, committed_pages: 0, max_pages }
            }
            Err(_) => {
                log::warn!("falling back to heap-backed linear memory, no guard pages");
                Self { storage: Storage::Heap(alloc::vec::Vec::new()), committed_pages: 0, max_pages }
            }
        };
        mem.grow(initial_pages)?;
        Ok(mem)
    }

    pub fn size_pages(&self) -> u32 {
        self.committed_pages
    }

    /// Commits `delta` additional pages at the tail, returning the size
    /// before the grow (the Wasm `memory.grow` return convention). Leaves
    /// the memory unchanged if the grow is rejected.
    pub fn grow(&mut self, delta: u32) -> Result<u32, AllocatorError> {
        let old_pages = self.committed_pages;
        let Some(new_pages) = old_pages.checked_add(delta) else {
            return Err(AllocatorError::ExceedsAddressSpace);
        };
        if let Some(max) = self.max_pages {
            if new_pages > max {
                return Err(AllocatorError::ExceedsMaximum);
            }
        }
        let new_len = new_pages as usize * PAGE_SIZE as usize;
        match &mut self.storage {
            Storage::Reserved { base, .. } => {
                if new_len > K4G {
                    return Err(AllocatorError::ExceedsAddressSpace);
                }
                // SAFETY: `new_len <= K4G`, within the reservation's committable window.
                unsafe { backend::commit_rw(*base, new_len)? };
            }
            Storage::Heap(buf) => {
                buf.resize(new_len, 0);
            }
        }
        self.committed_pages = new_pages;
        log::debug!("memory grown from {old_pages} to {new_pages} pages");
        Ok(old_pages)
    }

    pub fn data(&self) -> &[u8] {
        let len = self.committed_pages as usize * PAGE_SIZE as usize;
        match &self.storage {
            // SAFETY: `[base, base+len)` is committed RW memory owned by this instance.
            Storage::Reserved { base, .. } => unsafe { core::slice::from_raw_parts(*base, len) },
            Storage::Heap(buf) => buf,
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.committed_pages as usize * PAGE_SIZE as usize;
        match &mut self.storage {
            // SAFETY: see `data`; exclusive borrow upheld by `&mut self`.
            Storage::Reserved { base, .. } => unsafe { core::slice::from_raw_parts_mut(*base, len) },
            Storage::Heap(buf) => buf,
        }
    }
}

impl Drop for LinearMemory {
    fn drop(&mut self) {
        if let Storage::Reserved { reservation, .. } = self.storage {
            // SAFETY: `reservation` was obtained from `backend::reserve` and is
            // released exactly once, here.
            unsafe { backend::unreserve(reservation) };
        }
    }
}

/// Lifecycle stage of a [`JitChunk`], enforcing the write-then-execute
/// discipline: code is always written under RW, flipped to RX before first
/// execution, and the engine never requests RWX.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChunkPermission {
    ReadWrite,
    ReadOnly,
    ReadExecute,
}

/// An executable memory chunk for AOT-compiled code.
pub struct JitChunk {
    ptr: *mut u8,
    len: usize,
    permission: ChunkPermission,
}

// SAFETY: exclusively owned by the holder; no interior aliasing.
unsafe impl Send for JitChunk {}

impl JitChunk {
    pub fn allocate(len: usize) -> Result<Self, AllocatorError> {
        let ptr = backend::allocate_chunk(len)?;
        Ok(Self { ptr, len, permission: ChunkPermission::ReadWrite })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn permission(&self) -> ChunkPermission {
        self.permission
    }

    pub fn set_readable_writable(&mut self) -> Result<(), AllocatorError> {
        // SAFETY: `self.ptr`/`self.len` describe this chunk's own mapping.
        unsafe { backend::protect(self.ptr, self.len, backend::PROT_RW)? };
        self.permission = ChunkPermission::ReadWrite;
        Ok(())
    }

    pub fn set_readable(&mut self) -> Result<(), AllocatorError> {
        unsafe { backend::protect(self.ptr, self.len, backend::PROT_R)? };
        self.permission = ChunkPermission::ReadOnly;
        Ok(())
    }

    /// Transitions the chunk from RW to RX. Invalidates any outstanding
    /// `&mut` view obtained via [`Self::as_mut_slice`].
    pub fn set_executable(&mut self) -> Result<(), AllocatorError> {
        unsafe { backend::protect(self.ptr, self.len, backend::PROT_RX)? };
        self.permission = ChunkPermission::ReadExecute;
        Ok(())
    }

    /// Writable view of the chunk. Panics if the chunk is not currently RW.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert_eq!(self.permission, ChunkPermission::ReadWrite, "chunk is not writable");
        // SAFETY: chunk is RW per the assertion above.
        unsafe { core::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }
}

impl Drop for JitChunk {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe this chunk's own mapping, released once.
        unsafe { backend::release_chunk(self.ptr, self.len) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_grows_and_zero_fills() {
        let mut mem = LinearMemory::new(1, Some(4)).unwrap();
        assert_eq!(mem.size_pages(), 1);
        assert_eq!(mem.data().len(), PAGE_SIZE as usize);
        assert!(mem.data().iter().all(|&b| b == 0));
        let old = mem.grow(2).unwrap();
        assert_eq!(old, 1);
        assert_eq!(mem.size_pages(), 3);
    }

    #[test]
    fn memory_grow_rejects_past_maximum() {
        let mut mem = LinearMemory::new(1, Some(1)).unwrap();
        assert_eq!(mem.grow(1), Err(AllocatorError::ExceedsMaximum));
    }

    #[test]
    fn jit_chunk_round_trips_through_permission_states() {
        let mut chunk = JitChunk::allocate(PAGE_SIZE as usize).unwrap();
        chunk.as_mut_slice()[0] = 0xC3; // `ret` on x86_64, harmless as data
        chunk.set_executable().unwrap();
        assert_eq!(chunk.permission(), ChunkPermission::ReadExecute);
        chunk.set_readable_writable().unwrap();
        assert_eq!(chunk.as_mut_slice()[0], 0xC3);
    }
}
