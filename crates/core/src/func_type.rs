use crate::ValType;
use core::fmt::{self, Display};

use alloc::{sync::Arc, vec::Vec};

/// Errors that can occur upon constructing a function signature.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FuncTypeError {
    TooManyFunctionParams,
    TooManyFunctionResults,
}

impl Display for FuncTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyFunctionParams => write!(f, "function declares too many parameters"),
            Self::TooManyFunctionResults => write!(f, "function declares too many results"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FuncTypeError {}

/// A function type: its parameter and result value types.
///
/// Cheap to clone: the combined parameter/result slice is reference-counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    /// Parameters followed by results; `len_params` marks the split point.
    params_results: Arc<[ValType]>,
    len_params: u16,
}

impl FuncType {
    /// Maximum number of parameters or results a [`FuncType`] may declare.
    pub const MAX_LEN: usize = 1_000;

    /// # Panics
    ///
    /// Panics if `params` or `results` exceeds [`Self::MAX_LEN`] entries; use
    /// [`Self::try_new`] to handle that as an error instead, e.g. when
    /// constructing a [`FuncType`] from untrusted module bytes.
    pub fn new<P, R>(params: P, results: R) -> Self
    where
        P: IntoIterator<Item = ValType>,
        R: IntoIterator<Item = ValType>,
    {
        Self::try_new(params, results).expect("function type within size limits")
    }

    /// Fallible counterpart to [`Self::new`] for untrusted input.
    pub fn try_new<P, R>(params: P, results: R) -> Result<Self, FuncTypeError>
    where
        P: IntoIterator<Item = ValType>,
        R: IntoIterator<Item = ValType>,
    {
        let params: Vec<ValType> = params.into_iter().collect();
        let len_params = params.len();
        if len_params > Self::MAX_LEN {
            return Err(FuncTypeError::TooManyFunctionParams);
        }
        let mut combined = params;
        combined.extend(results);
        if combined.len() - len_params > Self::MAX_LEN {
            return Err(FuncTypeError::TooManyFunctionResults);
        }
        Ok(Self { params_results: combined.into(), len_params: len_params as u16 })
    }

    pub fn params(&self) -> &[ValType] {
        &self.params_results[..usize::from(self.len_params)]
    }

    pub fn results(&self) -> &[ValType] {
        &self.params_results[usize::from(self.len_params)..]
    }
}

impl Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> (")?;
        for (i, r) in self.results().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, ")")
    }
}
