//! Validator, stack machine, fault handling and linear-memory allocator: the
//! execution core of the wyrmcore Wasm engine, independent of any particular
//! binary-format loader or embedder API.
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

pub mod allocator;
pub mod error;
#[cfg(feature = "std")]
pub mod executor;
#[cfg(feature = "std")]
pub mod fault;
pub mod indices;
pub mod stack;
pub mod stacktrace;
pub mod types;
pub mod validator;

pub use error::ValidationError;
pub use stack::{Frame, JumpDescriptor, StackError, StackManager};
pub use validator::{FormChecker, ModuleContext, Operator};
