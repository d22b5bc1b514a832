//! The validator's error type. Runtime failures use [`wyrmcore_core::Trap`]
//! instead; see the module docs for why the two are kept separate.
use core::fmt::{self, Display};
use wyrmcore_core::{SubTypeError, ValType};

/// Why a function failed to validate. Exactly one of these is produced per
/// validation failure; no partial validator state is committed afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// An instruction's operand types did not match what it expected.
    TypeCheckFailed { expected: ValType, found: ValType },
    /// An instruction demanded an operand but the value stack (within the
    /// current control frame) was empty.
    StackUnderflow,
    /// A `local.get`/`local.set`/`local.tee` referenced a local past the function's declared count.
    InvalidLocalIdx(u32),
    /// A memory instruction's alignment exceeded the access width (`2^align > width/8`).
    InvalidAlignment,
    /// A declared sub-type chain was malformed or exceeded the depth bound.
    InvalidSubType(SubTypeError),
    /// A branch (`br`, `br_if`, `br_table`, ...) targeted a control depth that does not exist.
    InvalidLabelIdx(u32),
    /// A `local.get` observed a non-defaultable local that was never `local.set`.
    InvalidUninitLocal(u32),
    /// A function, table, memory, global, element, or data index exceeded the module's declared count.
    IndexOutOfBounds,
    /// `call_indirect`/`call_ref`'s declared type did not match `matchType` against the callee.
    IndirectCallTypeMismatch,
    /// A legacy `try`/`catch`/`delegate`/`rethrow` exception-handling form was used; recognized, never accepted.
    UncaughtException,
    /// The function's final control frame did not end with exactly the declared result types on the stack.
    EndTypeMismatch,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeCheckFailed { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            Self::StackUnderflow => write!(f, "value stack underflow"),
            Self::InvalidLocalIdx(idx) => write!(f, "invalid local index {idx}"),
            Self::InvalidAlignment => write!(f, "alignment must not be larger than natural alignment"),
            Self::InvalidSubType(e) => write!(f, "invalid sub-type: {e}"),
            Self::InvalidLabelIdx(idx) => write!(f, "invalid label index {idx}"),
            Self::InvalidUninitLocal(idx) => write!(f, "local {idx} read before it was set"),
            Self::IndexOutOfBounds => write!(f, "index out of bounds"),
            Self::IndirectCallTypeMismatch => write!(f, "indirect call type mismatch"),
            Self::UncaughtException => write!(f, "legacy exception-handling form is not supported"),
            Self::EndTypeMismatch => write!(f, "function's value stack did not match its declared results"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ValidationError {}

impl From<SubTypeError> for ValidationError {
    fn from(e: SubTypeError) -> Self {
        Self::InvalidSubType(e)
    }
}
