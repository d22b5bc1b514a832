//! Per-thread execution state: the active invocation's stop-token, cost
//! accounting, and the thread-local cell that makes an executor addressable
//! from compiled code with no explicit handle.
use crate::stack::StackManager;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A per-invocation cooperative-cancellation flag. Polled at every function
/// entry and at every `branchToLabel`; flipping it from any thread causes
/// the invocation to unwind with `Interrupted` at the next poll.
#[derive(Debug, Default)]
pub struct StopToken(AtomicBool);

impl StopToken {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A declared cost (gas) table indexed by a coarse operation class; the
/// loader/codegen assigns the concrete weights, this crate only enforces the
/// running total against the configured limit.
#[derive(Debug, Default)]
pub struct CostAccounting {
    used: AtomicU64,
    limit: Option<u64>,
}

impl CostAccounting {
    pub const fn unlimited() -> Self {
        Self { used: AtomicU64::new(0), limit: None }
    }

    pub const fn with_limit(limit: u64) -> Self {
        Self { used: AtomicU64::new(0), limit: Some(limit) }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Charges `amount`, returning `false` (without committing the charge)
    /// if it would exceed the configured limit.
    pub fn charge(&self, amount: u64) -> bool {
        let current = self.used.load(Ordering::Relaxed);
        let Some(next) = current.checked_add(amount) else {
            log::debug!("cost charge of {amount} overflowed the running total");
            return false;
        };
        if let Some(limit) = self.limit {
            if next > limit {
                log::debug!("cost charge of {amount} rejected: {next} would exceed limit {limit}");
                return false;
            }
        }
        self.used.store(next, Ordering::Relaxed);
        true
    }
}

/// A per-thread struct referenced directly by compiled code: memory/global
/// base pointers are owned by the module instance proper (outside this
/// crate's scope), so this holds only the parts the executor itself is
/// responsible for — cost accounting and cancellation — plus the
/// [`StackManager`] the current invocation is running on.
pub struct ExecutionContext {
    pub stack: StackManager,
    pub cost: CostAccounting,
    pub stop_token: StopToken,
}

impl ExecutionContext {
    pub fn new(cost: CostAccounting) -> Self {
        Self { stack: StackManager::new(), cost, stop_token: StopToken::new() }
    }

    /// Draws a [`StackManager`] from `pool` instead of allocating a fresh one.
    pub fn from_pool(pool: &StackPool, cost: CostAccounting) -> Self {
        Self { stack: pool.acquire(), cost, stop_token: StopToken::new() }
    }
}

/// A pool of reusable [`StackManager`]s shared across threads, avoiding a
/// fresh heap allocation for the value/frame/handler stacks on every
/// invocation. Grounded on the engine's own `allocs: Mutex<ReusableAllocationStack>`
/// pool of reusable call stacks; uses the same `spin::Mutex` rather than
/// `std::sync::Mutex` so a `StackPool` can be shared from code built without
/// the `std` feature, even though [`ExecutionContext`] itself currently is not.
pub struct StackPool {
    free: spin::Mutex<alloc::vec::Vec<StackManager>>,
}

impl StackPool {
    pub const fn new() -> Self {
        Self { free: spin::Mutex::new(alloc::vec::Vec::new()) }
    }

    /// Takes a stack manager from the pool, or allocates a fresh one if empty.
    pub fn acquire(&self) -> StackManager {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Clears `stack` and returns it to the pool for reuse by the next invocation.
    pub fn release(&self, mut stack: StackManager) {
        stack.reset();
        self.free.lock().push(stack);
    }
}

impl Default for StackPool {
    fn default() -> Self {
        Self::new()
    }
}

std::thread_local! {
    /// The active [`ExecutionContext`] on this thread, installed by
    /// [`enter`] for the duration of one Wasm invocation and restored by its
    /// drop guard. Compiled code reaches it through a raw pointer baked into
    /// the type trampoline rather than this cell directly; this cell exists
    /// so host-side code (intrinsics, fault translation) can recover "the
    /// currently running invocation" with no argument threading.
    static CURRENT: core::cell::RefCell<alloc::vec::Vec<*mut ExecutionContext>> =
        const { core::cell::RefCell::new(alloc::vec::Vec::new()) };
}

/// RAII scope installing `ctx` as the thread's active [`ExecutionContext`]
/// for its lifetime; restores the previous cell contents (if any) on drop,
/// mirroring the non-Wasm-reentrant, strictly-nested contract described by
/// the fault-handler chain.
pub struct EnteredContext;

impl EnteredContext {
    /// # Safety
    /// `ctx` must outlive the returned guard; the executor upholds this by
    /// constructing the [`ExecutionContext`] on the invoking thread's stack
    /// and dropping the guard before it goes out of scope.
    pub unsafe fn enter(ctx: *mut ExecutionContext) -> Self {
        CURRENT.with(|c| c.borrow_mut().push(ctx));
        Self
    }

    /// Recovers the currently installed context, if any. `None` outside any
    /// [`Self::enter`] scope, which never happens while Wasm code is
    /// running but is the expected state for a thread that has never
    /// invoked one.
    pub fn current() -> Option<*mut ExecutionContext> {
        CURRENT.with(|c| c.borrow().last().copied())
    }
}

impl Drop for EnteredContext {
    fn drop(&mut self) {
        CURRENT.with(|c| {
            c.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wyrmcore_core::Value;

    #[test]
    fn cost_accounting_rejects_charge_past_limit() {
        let cost = CostAccounting::with_limit(10);
        assert!(cost.charge(6));
        assert!(!cost.charge(5));
        assert_eq!(cost.used(), 6);
    }

    #[test]
    fn stop_token_observes_cross_thread_request() {
        let token = StopToken::new();
        assert!(!token.is_stopped());
        token.request_stop();
        assert!(token.is_stopped());
    }

    #[test]
    fn stack_pool_reuses_released_stacks_and_clears_them() {
        let pool = StackPool::new();
        let mut stack = pool.acquire();
        stack.push(Value::I32(1));
        stack.push_frame(0, 0, 0, 0, false);
        pool.release(stack);

        let reused = pool.acquire();
        assert_eq!(reused.depth(), 0);
        assert_eq!(reused.frame_depth(), 0);
    }

    #[test]
    fn entered_context_is_visible_and_restored() {
        let mut ctx = ExecutionContext::new(CostAccounting::unlimited());
        assert!(EnteredContext::current().is_none());
        {
            let _guard = unsafe { EnteredContext::enter(&mut ctx as *mut _) };
            assert!(EnteredContext::current().is_some());
        }
        assert!(EnteredContext::current().is_none());
    }
}
