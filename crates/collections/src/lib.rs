//! Fast arena data structures specialized for the wyrmcore interpreter.
//!
//! They cannot deallocate single allocated entities for extra efficiency;
//! whole-arena release happens when the owning module instance or GC heap is
//! dropped. These back the function/memory/table/global instance tables and
//! the struct/array object heap.
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std as alloc;

mod arena;

pub use self::arena::{Arena, ArenaIndex, Iter, IterMut};
