//! Core primitives shared between the validator, the stack machine and the
//! allocator: the tagged value representation, the Wasm type system
//! (including GC-proposal sub-types) and the trap code vocabulary.
//!
//! This crate knows nothing about modules, instances or the store; it only
//! describes the shapes of values and types that flow through them.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(
    clippy::cast_lossless,
    clippy::missing_errors_doc,
    clippy::used_underscore_binding,
    clippy::redundant_closure_for_method_calls
)]

#[cfg(not(feature = "std"))]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std as alloc;

mod func_type;
mod host_error;
mod limits;
mod reference;
mod sub_type;
mod trap;
mod val_type;
mod value;

pub use self::{
    func_type::{FuncType, FuncTypeError},
    host_error::{downcast_box, HostError},
    limits::{MAX_SUBTYPE_DEPTH, PAGE_SIZE},
    reference::Reference,
    sub_type::{heap_type_matches, matches_in, CompositeType, FieldType, SubType, SubTypeError, TypeList},
    trap::{ErrorCategory, Trap, TrapCode, TrapReason},
    val_type::{AbsHeapType, HeapType, StorageType, TypeIdx, ValType},
    value::{RawValue, Value},
};
