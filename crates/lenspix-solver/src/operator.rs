//! Backend-agnostic operator traits for matrix-vector products.
//!
//! These traits abstract the linear operator (matvec) so that CPU and CUDA
//! matrices can be handed to the same iterative solver.

/// A linear operator that computes y = A * x for real (f64) vectors.
pub trait RealOperator: Send + Sync {
    /// Dimension of the operator (N x N).
    fn dim(&self) -> usize;

    /// Apply the operator: y = A * x.
    ///
    /// `x` and `y` are f64 vectors of length `dim()`.
    fn apply(&self, x: &[f64], y: &mut [f64]);
}

/// An approximate inverse M ≈ A⁻¹ used to precondition a solve.
pub trait RealPreconditioner: Send + Sync {
    fn dim(&self) -> usize;

    /// Apply the preconditioner: y = M * x.
    fn apply(&self, x: &[f64], y: &mut [f64]);
}

/// No-op preconditioner (M = I).
#[derive(Debug, Clone, Copy)]
pub struct IdentityPreconditioner {
    dim: usize,
}

impl IdentityPreconditioner {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl RealPreconditioner for IdentityPreconditioner {
    fn dim(&self) -> usize {
        self.dim
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        y.copy_from_slice(x);
    }
}
