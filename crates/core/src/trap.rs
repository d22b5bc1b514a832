use crate::host_error::{downcast_box, HostError};
use alloc::boxed::Box;
use core::fmt::{self, Debug, Display};

/// Coarse classification of an [`TrapCode`], used by host embedders to tell
/// a genuine Wasm trap apart from an engine-internal failure (stack
/// exhaustion, cost accounting, cooperative cancellation).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The Wasm program itself violated a runtime check.
    Wasm,
    /// The engine refused to continue for a reason outside the program's control.
    Engine,
}

macro_rules! generate_trap_code {
    (
        $( $(#[$attr:meta])* $ident:ident($category:ident) = $discr:literal ),* $(,)?
    ) => {
        /// A flat enum of every trap the executor can raise, whether it
        /// originates from an interpreter step, a compiled-code intrinsic,
        /// or the engine's own resource accounting.
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        #[repr(u8)]
        pub enum TrapCode {
            $(
                $( #[$attr] )*
                $ident = $discr
            ),*
        }

        impl TrapCode {
            /// The [`ErrorCategory`] this trap is reported under.
            pub const fn category(self) -> ErrorCategory {
                match self {
                    $( Self::$ident => ErrorCategory::$category, )*
                }
            }
        }
    };
}

generate_trap_code! {
    /// Wasm code executed the `unreachable` opcode.
    Unreachable(Wasm) = 1,
    /// A load or store address lies outside of the memory's bounds.
    MemoryOutOfBounds(Wasm) = 2,
    /// An `i32.div_s`/`i64.div_s`/`rem` executed with a zero divisor.
    DivideByZero(Wasm) = 3,
    /// Signed division overflowed (e.g. `i32::MIN / -1`).
    IntegerOverflow(Wasm) = 4,
    /// `i32.div_s`/`i64.div_s` with a zero divisor during a trapping intrinsic.
    IntegerDivideByZero(Wasm) = 5,
    /// A float-to-int truncation saw NaN, infinity, or an out-of-range value.
    InvalidConversion(Wasm) = 6,
    /// `call_indirect`/table access referenced an index past the table's size.
    UndefinedElement(Wasm) = 7,
    /// `call_indirect` referenced a table slot that was never initialized.
    UninitializedElement(Wasm) = 8,
    /// `call_indirect`/`call_ref` found a callee whose type does not match.
    IndirectCallTypeMismatch(Wasm) = 9,
    /// The configured maximum call-frame depth was exceeded.
    CallStackExhausted(Engine) = 10,
    /// A configured cost/gas limit would be exceeded by the next charge.
    CostLimitExceeded(Engine) = 11,
    /// The invocation's stop-token was flipped from another thread.
    Interrupted(Engine) = 12,
    /// The host requested unconditional termination of the invocation.
    Terminated(Engine) = 13,
    /// A GC array operation dereferenced a null array reference.
    AccessNullArray(Wasm) = 14,
    /// `ref.cast` found no matching super-type relationship.
    CastFailed(Wasm) = 15,
    /// An exception propagated past every active `try_table` handler.
    UncaughtException(Wasm) = 16,
    /// A direct `call`/`return_call` found a callee of a different type.
    FuncSigMismatch(Wasm) = 17,
    /// A non-nullable reference operand (local, field, return) observed `null`.
    NonNullRequired(Wasm) = 18,
}

impl TrapCode {
    /// Returns the trap message as specified by the WebAssembly specification,
    /// or a short engine-internal description.
    pub const fn trap_message(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::MemoryOutOfBounds => "out of bounds memory access",
            Self::DivideByZero => "integer divide by zero",
            Self::IntegerOverflow => "integer overflow",
            Self::IntegerDivideByZero => "integer divide by zero",
            Self::InvalidConversion => "invalid conversion to integer",
            Self::UndefinedElement => "undefined element",
            Self::UninitializedElement => "uninitialized element",
            Self::IndirectCallTypeMismatch => "indirect call type mismatch",
            Self::CallStackExhausted => "call stack exhausted",
            Self::CostLimitExceeded => "cost limit exceeded",
            Self::Interrupted => "interrupted",
            Self::Terminated => "terminated",
            Self::AccessNullArray => "access null array",
            Self::CastFailed => "cast failed",
            Self::UncaughtException => "uncaught exception",
            Self::FuncSigMismatch => "function signature mismatch",
            Self::NonNullRequired => "non-nullable reference required",
        }
    }
}

impl Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.trap_message())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TrapCode {}

/// What caused a [`Trap`]: a well-known [`TrapCode`] the engine recognizes,
/// or an opaque error a host function raised.
pub enum TrapReason {
    Code(TrapCode),
    Host(Box<dyn HostError>),
}

impl Debug for TrapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(c) => Debug::fmt(c, f),
            Self::Host(e) => write!(f, "Host({e})"),
        }
    }
}

/// The single error type an invocation fails with once validation has
/// already accepted the module: either the engine itself raised a
/// [`TrapCode`], or a host function returned/panicked with a boxed
/// [`HostError`]. Validation failures are reported separately and never
/// constructed as a [`Trap`]; see the validator's own error type.
#[derive(Debug)]
pub struct Trap(TrapReason);

impl Trap {
    pub const fn code(code: TrapCode) -> Self {
        Self(TrapReason::Code(code))
    }

    pub fn host(err: impl HostError) -> Self {
        Self(TrapReason::Host(Box::new(err)))
    }

    /// The [`ErrorCategory`] this trap is reported under; host errors are
    /// always reported as [`ErrorCategory::Engine`] since they did not
    /// originate from a Wasm-defined runtime check.
    pub fn category(&self) -> ErrorCategory {
        match &self.0 {
            TrapReason::Code(c) => c.category(),
            TrapReason::Host(_) => ErrorCategory::Engine,
        }
    }

    pub const fn trap_code(&self) -> Option<TrapCode> {
        match &self.0 {
            TrapReason::Code(c) => Some(*c),
            TrapReason::Host(_) => None,
        }
    }

    pub fn downcast_ref<T: HostError>(&self) -> Option<&T> {
        match &self.0 {
            TrapReason::Host(e) => e.downcast_ref(),
            TrapReason::Code(_) => None,
        }
    }

    /// Consumes the trap, recovering the original host error if it carried one.
    pub fn downcast<T: HostError>(self) -> Result<Box<T>, Self> {
        match self.0 {
            TrapReason::Host(e) => downcast_box(e).map_err(|e| Self(TrapReason::Host(e))),
            code => Err(Self(code)),
        }
    }
}

impl From<TrapCode> for Trap {
    fn from(code: TrapCode) -> Self {
        Self::code(code)
    }
}

impl Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            TrapReason::Code(c) => Display::fmt(c, f),
            TrapReason::Host(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Trap {}

#[test]
fn every_wasm_trap_is_wasm_category() {
    assert_eq!(TrapCode::MemoryOutOfBounds.category(), ErrorCategory::Wasm);
    assert_eq!(TrapCode::CallStackExhausted.category(), ErrorCategory::Engine);
}
