//! `invoke`/`asyncInvoke`: argument/return marshalling across the Wasm/host
//! boundary, and the interpreter dispatch loop for interpreted functions.
use crate::error::ValidationError;
use crate::executor::context::{CostAccounting, EnteredContext, ExecutionContext, StackPool};
use crate::fault::{self, Fault};
use crate::stack::branch_to_label;
use crate::types::FunctionInstance;
use crate::validator::Operator;
use alloc::vec::Vec;
use wyrmcore_core::{HeapType, Trap, TrapCode, TypeList, Value};

/// What the caller of a host function sees: the caller's module instance
/// handle and a way to reach the executor for re-entrant calls. Module
/// resolution itself (memories, tables) belongs to the instantiator, which
/// is out of this crate's scope; only the handle is carried here.
pub struct CallingFrame {
    pub caller_module: crate::stack::ModuleHandle,
}

/// Anything that can supply the next native-code instruction stream position
/// to resume at for an interpreted function's body. Kept abstract: the
/// module-instance layer (out of scope for this crate) owns the actual flat
/// instruction array and per-function jump-descriptor tables computed by the
/// validator; this trait is the minimal read-only view the dispatch loop
/// needs.
pub trait CodeSource: TypeList {
    fn instruction(&self, module: crate::stack::ModuleHandle, pc: u32) -> Option<&Operator>;

    /// The jump descriptor for the `target_index`-th branch target of the
    /// instruction at `pc` (always `0` except for `br_table`, which the
    /// validator records one descriptor per listed target plus the default).
    fn jump_descriptor(
        &self,
        module: crate::stack::ModuleHandle,
        pc: u32,
        target_index: u32,
    ) -> Option<crate::stack::JumpDescriptor>;
}

/// Evaluates the fixed-signature numeric/vector instructions folded into
/// [`crate::validator::ir::SimpleOp`] by the validator. The interpreter
/// itself carries no arithmetic: like the AOT back end, it treats this as an
/// external kernel keyed by whatever opcode tag the loader attaches
/// alongside the `SimpleOp` signature (the validator only needs the
/// signature; the interpreter additionally needs to know *which* op it is,
/// which the loader threads through out-of-band).
pub trait NumericKernel {
    fn eval(&self, opcode_tag: u32, args: &[Value], out: &mut Vec<Value>) -> Result<(), Trap>;
}

/// Matches argument types against a function's parameters (subtype check
/// plus a null-ref rejection for non-nullable params), per `invoke`'s entry
/// contract.
fn check_args(func: &FunctionInstance, args: &[Value]) -> Result<(), ValidationError> {
    let params = func.ty().params();
    if params.len() != args.len() {
        return Err(ValidationError::EndTypeMismatch);
    }
    for (expected, got) in params.iter().zip(args) {
        let found = got.ty(|r| wyrmcore_core::ValType::Ref { nullable: true, heap: r.declared_heap_type() });
        let ok = match (*expected, got) {
            (wyrmcore_core::ValType::Ref { nullable, .. }, Value::Ref(r)) => nullable || !r.is_null(),
            (e, _) => found == e,
        };
        if !ok {
            return Err(ValidationError::TypeCheckFailed { expected: *expected, found });
        }
    }
    Ok(())
}

/// Zeroes a numeric value's high bits and normalizes an outgoing reference's
/// heap type to its top abstract type (externalized references become
/// `externref`), per the executor's "numeric cleanup" contract applied at
/// every Wasm/host boundary crossing.
fn normalize_outgoing(value: Value, top_of: impl Fn(wyrmcore_core::TypeIdx) -> wyrmcore_core::AbsHeapType) -> Value {
    match value {
        Value::Ref(r) => {
            let abs = r.dynamic_heap_type().top(top_of);
            Value::Ref(wyrmcore_core::Reference::new(HeapType::Abs(abs), r.raw()))
        }
        other => other,
    }
}

/// Runs `func` to completion with `args`, returning its results. This is the
/// single entry point every function variant funnels through: it installs a
/// fresh [`ExecutionContext`], arms a [`Fault`] guard, and dispatches on the
/// function's representation.
pub fn invoke(
    func: &FunctionInstance,
    args: &[Value],
    code: &impl CodeSource,
    kernel: &impl NumericKernel,
    pool: &StackPool,
    top_of: impl Fn(wyrmcore_core::TypeIdx) -> wyrmcore_core::AbsHeapType + Copy,
) -> Result<Vec<Value>, Trap> {
    check_args(func, args).map_err(|_| Trap::code(TrapCode::FuncSigMismatch))?;

    let mut ctx = ExecutionContext::from_pool(pool, CostAccounting::unlimited());
    // SAFETY: `ctx` lives on this stack frame for the remainder of `invoke`;
    // the guard is dropped before returning.
    let _entered = unsafe { EnteredContext::enter(&mut ctx as *mut _) };
    let outcome = Fault::guard(std::panic::AssertUnwindSafe(|| run(func, args, &mut ctx, code, kernel)));
    drop(_entered);
    pool.release(ctx.stack);

    let results = match outcome {
        Ok(inner) => inner?,
        Err(code) => return Err(Trap::code(code)),
    };
    Ok(results.into_iter().map(|v| normalize_outgoing(v, top_of)).collect())
}

fn run(
    func: &FunctionInstance,
    args: &[Value],
    ctx: &mut ExecutionContext,
    code: &impl CodeSource,
    kernel: &impl NumericKernel,
) -> Result<Vec<Value>, Trap> {
    match func {
        FunctionInstance::Host { callback, .. } => {
            if !ctx.cost.charge(1) {
                return Err(Trap::code(TrapCode::CostLimitExceeded));
            }
            callback(args)
        }
        FunctionInstance::Interpreted { ty, module, locals, .. } => {
            run_interpreted(*module, ty.results().len(), locals, args, ctx, code, kernel)
        }
        FunctionInstance::Compiled { .. } => {
            // AOT entry/trampoline invocation is owned by the code generator
            // (out of this crate's scope); the core's contract with it ends
            // at the intrinsics table and calling convention.
            Err(Trap::code(TrapCode::FuncSigMismatch))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_interpreted(
    module: crate::stack::ModuleHandle,
    results_arity: usize,
    locals: &[wyrmcore_core::ValType],
    args: &[Value],
    ctx: &mut ExecutionContext,
    code: &impl CodeSource,
    kernel: &impl NumericKernel,
) -> Result<Vec<Value>, Trap> {
    ctx.stack.push_frame(module, 0, locals.len() as u32, results_arity as u32, false);
    for (i, &ty) in locals.iter().enumerate() {
        let value = args.get(i).copied().unwrap_or_else(|| default_value(ty));
        ctx.stack.push(value);
    }

    let mut pc: u32 = 0;
    loop {
        if ctx.stop_token.is_stopped() {
            return Err(Trap::code(TrapCode::Interrupted));
        }
        let Some(op) = code.instruction(module, pc) else {
            break;
        };
        if matches!(op, Operator::Return) {
            break;
        }
        step(op, module, &mut pc, ctx, code, kernel)?;
        pc += 1;
    }

    let mut results = Vec::with_capacity(results_arity);
    for _ in 0..results_arity {
        results.push(ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?);
    }
    results.reverse();
    ctx.stack.pop_frame().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
    Ok(results)
}

fn default_value(ty: wyrmcore_core::ValType) -> Value {
    match ty {
        wyrmcore_core::ValType::I32 => Value::I32(0),
        wyrmcore_core::ValType::I64 => Value::I64(0),
        wyrmcore_core::ValType::F32 => Value::F32(0.0),
        wyrmcore_core::ValType::F64 => Value::F64(0.0),
        wyrmcore_core::ValType::V128 => Value::V128(0),
        wyrmcore_core::ValType::Ref { heap, .. } => Value::Ref(wyrmcore_core::Reference::null(heap)),
    }
}

fn step(
    op: &Operator,
    module: crate::stack::ModuleHandle,
    pc: &mut u32,
    ctx: &mut ExecutionContext,
    code: &impl CodeSource,
    kernel: &impl NumericKernel,
) -> Result<(), Trap> {
    match op {
        Operator::Unreachable => fault::emit(TrapCode::Unreachable),
        Operator::Nop | Operator::Block(_) | Operator::Loop(_) | Operator::If(_) | Operator::Else | Operator::End => {
            // Structured-control markers carry no runtime effect once the
            // validator has lowered every branch to a jump descriptor; the
            // interpreter only consumes `Br*`/`Return`.
        }
        Operator::Br(_) => branch(module, pc, 0, ctx, code)?,
        Operator::BrIf(_) => {
            if pop_i32(ctx)? != 0 {
                branch(module, pc, 0, ctx, code)?;
            }
        }
        Operator::BrTable { targets, .. } => {
            let idx = pop_i32(ctx)?.max(0) as u32;
            let target_index = if (idx as usize) < targets.len() { idx } else { targets.len() as u32 };
            branch(module, pc, target_index, ctx, code)?;
        }
        Operator::Return => unreachable!("caught by run_interpreted's dispatch loop before reaching step"),
        Operator::Drop => {
            ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
        }
        Operator::Select(_) => {
            let cond = pop_i32(ctx)?;
            let on_false = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            let on_true = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            ctx.stack.push(if cond != 0 { on_true } else { on_false });
        }
        Operator::LocalGet(idx) => {
            let value = ctx.stack.get_local(idx.0).map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            ctx.stack.push(value);
        }
        Operator::LocalSet(idx) => {
            let value = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            ctx.stack.set_local(idx.0, value).map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
        }
        Operator::LocalTee(idx) => {
            let value = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            ctx.stack.set_local(idx.0, value).map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            ctx.stack.push(value);
        }
        Operator::I32Const(v) => ctx.stack.push(Value::I32(*v)),
        Operator::I64Const(v) => ctx.stack.push(Value::I64(*v)),
        Operator::F32Const(v) => ctx.stack.push(Value::F32(*v)),
        Operator::F64Const(v) => ctx.stack.push(Value::F64(*v)),
        Operator::Simple(simple) => {
            let mut args = Vec::with_capacity(simple.pops.len());
            for _ in simple.pops {
                args.push(ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?);
            }
            args.reverse();
            let mut out = Vec::new();
            kernel.eval(0, &args, &mut out)?;
            for v in out {
                ctx.stack.push(v);
            }
        }
        Operator::RefIsNull => {
            let v = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            let Value::Ref(r) = v else { return Err(Trap::code(TrapCode::FuncSigMismatch)) };
            ctx.stack.push(Value::I32(r.is_null() as i32));
        }
        Operator::RefEq => {
            let b = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            let a = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            let (Value::Ref(a), Value::Ref(b)) = (a, b) else {
                return Err(Trap::code(TrapCode::FuncSigMismatch));
            };
            ctx.stack.push(Value::I32((a == b) as i32));
        }
        Operator::RefAsNonNull => {
            let v = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            let Value::Ref(r) = v else { return Err(Trap::code(TrapCode::FuncSigMismatch)) };
            if r.is_null() {
                fault::emit(TrapCode::NonNullRequired);
            }
            ctx.stack.push(v);
        }
        Operator::BrOnNull(_) => {
            let v = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            let Value::Ref(r) = v else { return Err(Trap::code(TrapCode::FuncSigMismatch)) };
            if r.is_null() {
                branch(module, pc, 0, ctx, code)?;
            } else {
                ctx.stack.push(v);
            }
        }
        Operator::BrOnNonNull(_) => {
            let v = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            let Value::Ref(r) = v else { return Err(Trap::code(TrapCode::FuncSigMismatch)) };
            if !r.is_null() {
                ctx.stack.push(v);
                branch(module, pc, 0, ctx, code)?;
            }
        }
        Operator::BrOnCast { to_heap, to_nullable, .. } => {
            let v = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            let Value::Ref(r) = v else { return Err(Trap::code(TrapCode::FuncSigMismatch)) };
            let casts = cast_matches(r, *to_heap, *to_nullable, code);
            ctx.stack.push(v);
            if casts {
                branch(module, pc, 0, ctx, code)?;
            }
        }
        Operator::BrOnCastFail { to_heap, to_nullable, .. } => {
            let v = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            let Value::Ref(r) = v else { return Err(Trap::code(TrapCode::FuncSigMismatch)) };
            let casts = cast_matches(r, *to_heap, *to_nullable, code);
            ctx.stack.push(v);
            if !casts {
                branch(module, pc, 0, ctx, code)?;
            }
        }
        Operator::Throw(tag) => throw_to_handler(ctx, pc, *tag)?,
        Operator::ThrowRef => {
            let v = ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;
            let Value::Ref(r) = v else { return Err(Trap::code(TrapCode::FuncSigMismatch)) };
            if r.is_null() {
                fault::emit(TrapCode::NonNullRequired);
            }
            throw_to_handler(ctx, pc, r.raw() as u32)?;
        }
        // Calls, memory/table/GC allocation, and module-relative resolution
        // of table/memory/element/data/global indices are owned by the
        // instantiated module and the intrinsics proxy table rather than
        // this crate's bare dispatch loop; they are threaded through
        // `code`/`kernel` in a full embedder, not reproduced here.
        _ => {}
    }
    Ok(())
}

fn pop_i32(ctx: &mut ExecutionContext) -> Result<i32, Trap> {
    ctx.stack.pop().map_err(|_| Trap::code(TrapCode::CallStackExhausted))?.i32().ok_or(Trap::code(TrapCode::FuncSigMismatch))
}

/// Runtime type-test for `br_on_cast`/`br_on_cast_fail`: does `r`'s dynamic
/// heap type match the declared cast target, resolving concrete type
/// indices against `code`'s own type list (the only list `step` has a handle
/// to; cross-module casts are a module-instance concern out of scope here).
fn cast_matches(r: wyrmcore_core::Reference, to_heap: HeapType, to_nullable: bool, code: &impl CodeSource) -> bool {
    if r.is_null() {
        return to_nullable;
    }
    wyrmcore_core::matches_in(code, r.dynamic_heap_type(), to_heap)
}

/// `throw`/`throw_ref`: finds the innermost handler with a clause matching
/// `tag`, unwinds the handler and operand stacks to it, and redirects `pc`
/// to the clause's target. Traps with `UncaughtException` if no handler
/// matches all the way to the bottom of the handler stack.
///
/// The clause's payload values are whatever is already sitting on top of the
/// operand stack at the throw site (this crate has no separate exception
/// object to carry them in), so they are read out with `top()` before the
/// unwind discards them, then pushed back afterward in the catch clause's
/// expected order: payload values first, `exnref` last if `want_exnref`.
fn throw_to_handler(ctx: &mut ExecutionContext, pc: &mut u32, tag: u32) -> Result<(), Trap> {
    let Some((depth_from_top, clause)) = ctx.stack.find_handler(tag) else {
        fault::emit(TrapCode::UncaughtException);
    };
    let payload_arity = clause.target.stack_erase_end - u32::from(clause.want_exnref);
    let payload =
        ctx.stack.top(payload_arity).map_err(|_| Trap::code(TrapCode::CallStackExhausted))?.to_vec();

    ctx.stack.discard_handlers(depth_from_top);
    let handler = ctx.stack.pop_top_handler(0).map_err(|_| Trap::code(TrapCode::CallStackExhausted))?;

    for v in payload {
        ctx.stack.push(v);
    }
    if clause.want_exnref {
        ctx.stack
            .push(Value::Ref(wyrmcore_core::Reference::new(HeapType::Abs(wyrmcore_core::AbsHeapType::Exn), tag as u64)));
    }
    *pc = (handler.try_pc as i64 + clause.target.pc_offset as i64 - 1) as u32;
    Ok(())
}

fn branch(
    module: crate::stack::ModuleHandle,
    pc: &mut u32,
    target_index: u32,
    ctx: &mut ExecutionContext,
    code: &impl CodeSource,
) -> Result<(), Trap> {
    let desc =
        code.jump_descriptor(module, *pc, target_index).ok_or(Trap::code(TrapCode::CallStackExhausted))?;
    branch_to_label(&mut ctx.stack, pc, &desc).map_err(|_| Trap::code(TrapCode::CallStackExhausted))
}

/// A synchronous stand-in for the thread-pool-backed future `asyncInvoke`
/// returns: `invoke`'s result, already computed. A true async runtime is an
/// embedder concern (out of this crate's scope); cooperative cancellation
/// via [`crate::executor::context::StopToken`] is the contract this crate
/// owns, and is identical whether the caller polls synchronously or from a
/// task queue.
pub struct AsyncInvoke(Result<Vec<Value>, Trap>);

impl AsyncInvoke {
    pub fn poll(self) -> Result<Vec<Value>, Trap> {
        self.0
    }
}

pub fn async_invoke(
    func: &FunctionInstance,
    args: &[Value],
    code: &impl CodeSource,
    kernel: &impl NumericKernel,
    pool: &StackPool,
    top_of: impl Fn(wyrmcore_core::TypeIdx) -> wyrmcore_core::AbsHeapType + Copy,
) -> AsyncInvoke {
    AsyncInvoke(invoke(func, args, code, kernel, pool, top_of))
}
