use alloc::boxed::Box;
use core::any::Any;
use core::fmt::{Debug, Display};

#[cfg(feature = "std")]
use std::error::Error as StdError;

/// Trait implemented by errors that host functions raise across the
/// Wasm/host boundary.
///
/// A [`HostError`] is boxed and carried inside a trap so it can be
/// downcast back to its concrete type by the embedder after `invoke`
/// returns.
pub trait HostError: Display + Debug + Any + Send + Sync + 'static {
    #[doc(hidden)]
    fn as_any(&self) -> &dyn Any;
    #[doc(hidden)]
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> HostError for T
where
    T: Display + Debug + Any + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(feature = "std")]
impl StdError for dyn HostError {}

impl dyn HostError {
    /// Downcasts the trait object to `T` if the underlying type matches.
    pub fn downcast_ref<T: HostError>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Downcasts the trait object to `T` if the underlying type matches.
    pub fn downcast_mut<T: HostError>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Consumes a boxed [`HostError`] trait object, downcasting it to `T`.
///
/// Returns the original box back in `Err` when the underlying type does not match.
pub fn downcast_box<T: HostError>(err: Box<dyn HostError>) -> Result<Box<T>, Box<dyn HostError>> {
    if (*err).as_any().is::<T>() {
        let raw = Box::into_raw(err) as *mut T;
        // SAFETY: just checked the concrete type above.
        Ok(unsafe { Box::from_raw(raw) })
    } else {
        Err(err)
    }
}
