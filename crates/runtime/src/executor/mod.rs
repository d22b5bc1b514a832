//! Function entry/exit across interpreted, compiled, and host functions;
//! argument/return marshalling; and the intrinsics surface compiled code
//! calls back into.
pub mod context;
pub mod intrinsics;
pub mod invoke;

pub use context::{CostAccounting, EnteredContext, ExecutionContext, StackPool, StopToken};
pub use intrinsics::{IntrinsicId, ProxyFn, ProxyTable};
pub use invoke::{async_invoke, invoke, AsyncInvoke, CallingFrame, CodeSource, NumericKernel};
