//! Sparse linear algebra and iterative solvers for lenspix.
//!
//! This crate provides:
//! - CSR sparse matrices with parallel mat-vec and transpose
//! - Operator and preconditioner traits shared by CPU and GPU matrices
//! - Restarted, left-preconditioned GMRES
//! - The compute backend selector

pub mod backend;
pub mod error;
pub mod gmres;
pub mod operator;
pub mod sparse;

pub use backend::ComputeBackend;
pub use error::{Error, Result};
pub use gmres::{GmresConfig, GmresResult, solve_gmres};
pub use operator::{IdentityPreconditioner, RealOperator, RealPreconditioner};
pub use sparse::{CsrMatrix, Transposed};
