//! Invariant checking for the cut mesh and the request registry.
//!
//! The decomposition driver validates both structures at the end of every
//! interface pass in debug builds (or with the `strict-invariants` feature),
//! and on demand when `DecompositionOptions::validate_invariants` is set.

use crate::mesh_error::MeshDecompError;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Assert invariants in debug builds or when invariant checking is enabled.
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "invariant check failed");
    }
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), MeshDecompError>;
}

/// Return an [`MeshDecompError::InvariantViolation`] built from `msg` unless `cond` holds.
#[inline]
pub fn ensure(cond: bool, msg: impl FnOnce() -> String) -> Result<(), MeshDecompError> {
    if cond {
        Ok(())
    } else {
        Err(MeshDecompError::InvariantViolation(msg()))
    }
}

/// Helper macro to run a fallible check and panic on error when invariant
/// checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
