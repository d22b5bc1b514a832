//! The module's type checker: an instruction vocabulary ([`ir`]) and the
//! bidirectional checker that walks it ([`form_checker`]).
pub mod form_checker;
pub mod ir;

pub use form_checker::{FormChecker, ModuleContext};
pub use ir::{BlockType, CatchClauseOp, MemArg, Operator, SimpleOp};
