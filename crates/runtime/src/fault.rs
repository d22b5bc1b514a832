//! Translation of OS-level traps (SIGSEGV/SIGBUS/SIGFPE on POSIX, vectored
//! exceptions on Windows) into [`TrapCode`]s via a non-local escape, plus the
//! [`FaultBlocker`] scope used while running host code that is allowed to
//! fault natively.
//!
//! Grounded on the reserve-12-GiB allocator scheme's companion subsystem:
//! `Fault`/`FaultBlocker` there arm/disarm a `setjmp` buffer around a
//! thread-local chain. A `setjmp`/`longjmp` pair has no safe Rust
//! equivalent, so this module instead arms a [`std::panic::catch_unwind`]
//! boundary and unwinds with a dedicated payload type, per the spec's own
//! design note that a Rust rewrite should use exactly this substitution.
use core::cell::RefCell;
use wyrmcore_core::TrapCode;

std::thread_local! {
    /// The innermost active [`Fault`] on this thread, mirroring the
    /// original's intrusive singly-linked chain. Only the top entry is ever
    /// armed; outer entries are restored on `Drop`.
    static CHAIN: RefCell<Vec<FaultState>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone, Copy)]
struct FaultState {
    blocked: bool,
}

/// A panic payload carrying the Wasm trap code an OS-level fault translated
/// to. Caught by [`Fault::guard`]; any other panic payload propagates
/// unchanged, since it did not originate from this subsystem.
struct FaultPanic(TrapCode);

/// A scope that arms a catch-unwind boundary for the duration of `body`,
/// translating any [`emit`] call made inside it (directly, or indirectly via
/// a signal handler installed elsewhere) into a returned [`TrapCode`] instead
/// of an unhandled panic.
///
/// Strictly LIFO-nested per thread: only the innermost live `Fault` is
/// eligible to catch an [`emit`].
pub struct Fault;

impl Fault {
    /// Runs `body` under a fresh fault scope. Returns `Ok(body()'s value)` on
    /// normal completion, or `Err(code)` if `body` (or something it called)
    /// invoked [`emit`].
    pub fn guard<T>(body: impl FnOnce() -> T + core::panic::UnwindSafe) -> Result<T, TrapCode> {
        CHAIN.with(|c| c.borrow_mut().push(FaultState { blocked: false }));
        let result = std::panic::catch_unwind(body);
        CHAIN.with(|c| {
            c.borrow_mut().pop();
        });
        result.map_err(|payload| match payload.downcast::<FaultPanic>() {
            Ok(fault) => fault.0,
            Err(other) => std::panic::resume_unwind(other),
        })
    }
}

/// Unwinds to the innermost armed (non-blocked) [`Fault::guard`] on this
/// thread with `code`. Called directly by intrinsics on a detected runtime
/// violation, and would be called by an installed OS signal handler after
/// translating the platform-specific fault code.
///
/// # Panics
/// Panics (an ordinary unwind, not a [`FaultPanic`]) if no [`Fault::guard`]
/// is active on the current thread — an engine bug, since every invocation
/// entry point arms one before running Wasm code.
pub fn emit(code: TrapCode) -> ! {
    let armed = CHAIN.with(|c| c.borrow().last().map(|s| !s.blocked).unwrap_or(false));
    assert!(armed, "fault emitted with no active, unblocked Fault guard");
    log::warn!("translated fault into trap {code:?}");
    std::panic::panic_any(FaultPanic(code))
}

/// Translates a POSIX signal number and, for `SIGFPE`, the `si_code` that
/// would be found in `siginfo_t`, to the trap this subsystem raises for it.
/// Pure translation table; installing the actual signal handler is left to
/// the embedder's platform layer, which is expected to call [`emit`] from
/// its handler with the result of this lookup.
// `libc` doesn't expose `FPE_INTDIV` on every unix target; its value is fixed
// by POSIX's `siginfo_t` layout (see `bits/siginfo-consts.h`).
#[cfg(unix)]
const FPE_INTDIV: i32 = 1;

pub fn translate_posix_signal(signal: i32, fpe_sicode: Option<i32>) -> Option<TrapCode> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            match signal {
                libc::SIGSEGV | libc::SIGBUS => Some(TrapCode::MemoryOutOfBounds),
                libc::SIGFPE => match fpe_sicode {
                    Some(code) if code == FPE_INTDIV => Some(TrapCode::DivideByZero),
                    _ => Some(TrapCode::IntegerOverflow),
                },
                _ => None,
            }
        } else {
            let _ = (signal, fpe_sicode);
            None
        }
    }
}

/// Translates a Windows `EXCEPTION_*` code to the trap this subsystem raises
/// for it, per the same contract as [`translate_posix_signal`].
#[cfg(windows)]
pub fn translate_windows_exception(code: u32) -> Option<TrapCode> {
    use windows_sys::Win32::Foundation::{
        EXCEPTION_ACCESS_VIOLATION, EXCEPTION_INT_DIVIDE_BY_ZERO, EXCEPTION_INT_OVERFLOW,
        EXCEPTION_STACK_OVERFLOW,
    };
    match code {
        EXCEPTION_INT_DIVIDE_BY_ZERO => Some(TrapCode::DivideByZero),
        EXCEPTION_INT_OVERFLOW => Some(TrapCode::IntegerOverflow),
        EXCEPTION_ACCESS_VIOLATION | EXCEPTION_STACK_OVERFLOW => Some(TrapCode::MemoryOutOfBounds),
        _ => None,
    }
}

/// A scoped guard that blocks fault delivery to the current thread's
/// innermost [`Fault`] for its lifetime, restoring the prior state on drop.
/// Used while running host code that is allowed to fault natively (e.g. a
/// debugger-attached host callback) without being mistaken for a Wasm trap.
pub struct FaultBlocker {
    had_chain: bool,
}

impl FaultBlocker {
    pub fn new() -> Self {
        let had_chain = CHAIN.with(|c| {
            let mut chain = c.borrow_mut();
            match chain.last_mut() {
                Some(state) => {
                    state.blocked = true;
                    true
                }
                None => false,
            }
        });
        Self { had_chain }
    }
}

impl Default for FaultBlocker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FaultBlocker {
    fn drop(&mut self) {
        if self.had_chain {
            CHAIN.with(|c| {
                if let Some(state) = c.borrow_mut().last_mut() {
                    state.blocked = false;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_catches_emitted_fault() {
        let result = Fault::guard(|| {
            emit(TrapCode::MemoryOutOfBounds);
        });
        assert_eq!(result, Err(TrapCode::MemoryOutOfBounds));
    }

    #[test]
    fn guard_returns_body_value_on_normal_completion() {
        let result = Fault::guard(|| 7i32);
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn nested_guards_catch_at_the_innermost_level() {
        let outer = Fault::guard(|| {
            let inner = Fault::guard(|| {
                emit(TrapCode::DivideByZero);
            });
            assert_eq!(inner, Err(TrapCode::DivideByZero));
            5i32
        });
        assert_eq!(outer, Ok(5));
    }

    #[test]
    fn blocker_suppresses_delivery_while_held() {
        let result = Fault::guard(|| {
            let armed = CHAIN.with(|c| c.borrow().last().map(|s| !s.blocked).unwrap_or(false));
            assert!(armed);
            let _blocker = FaultBlocker::new();
            let armed = CHAIN.with(|c| c.borrow().last().map(|s| !s.blocked).unwrap_or(false));
            assert!(!armed);
            9i32
        });
        assert_eq!(result, Ok(9));
    }

    #[test]
    fn posix_signal_translation_maps_divide_by_zero() {
        #[cfg(unix)]
        {
            assert_eq!(translate_posix_signal(libc::SIGFPE, Some(FPE_INTDIV)), Some(TrapCode::DivideByZero));
            assert_eq!(translate_posix_signal(libc::SIGSEGV, None), Some(TrapCode::MemoryOutOfBounds));
        }
    }
}
