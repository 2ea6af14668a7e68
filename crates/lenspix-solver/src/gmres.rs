//! Left-preconditioned GMRES for real linear systems.
//!
//! Solves A*x = b by minimizing ‖M(b − A x)‖ over a Krylov subspace of M A,
//! where M ≈ A⁻¹ is a [`RealPreconditioner`]. Convergence is measured on the
//! preconditioned relative residual ‖M(b − A x)‖ / ‖M b‖.
//!
//! `max_iter` counts Arnoldi steps across all restart cycles, so a small cap
//! gives a cheap approximate inverse. Hitting the cap is not an error: the
//! best iterate found so far is returned with `converged = false`.

use crate::error::{Error, Result};
use crate::operator::{RealOperator, RealPreconditioner};

/// GMRES solver configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GmresConfig {
    /// Maximum number of iterations (Arnoldi steps).
    pub max_iter: usize,
    /// Convergence tolerance (preconditioned relative residual).
    pub tol: f64,
    /// Restart parameter (Krylov subspace dimension before restart).
    pub restart: usize,
}

impl Default for GmresConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tol: 1e-8,
            restart: 30,
        }
    }
}

impl GmresConfig {
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_restart(mut self, restart: usize) -> Self {
        self.restart = restart;
        self
    }
}

/// Result of a GMRES solve.
#[derive(Debug, Clone)]
pub struct GmresResult {
    /// Solution vector.
    pub x: Vec<f64>,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Final preconditioned relative residual.
    pub residual: f64,
    /// Whether the solver converged.
    pub converged: bool,
}

/// Solve A*x = b using restarted, left-preconditioned GMRES.
///
/// `x0` is the starting guess (zeros when `None`). Errors only on dimension
/// mismatches between the operator, preconditioner, and vectors.
pub fn solve_gmres(
    op: &dyn RealOperator,
    precond: &dyn RealPreconditioner,
    b: &[f64],
    x0: Option<&[f64]>,
    config: &GmresConfig,
) -> Result<GmresResult> {
    let n = op.dim();
    check_dim(n, b.len())?;
    check_dim(n, precond.dim())?;
    if let Some(x0) = x0 {
        check_dim(n, x0.len())?;
    }
    if config.restart == 0 {
        return Err(Error::SolverError("restart must be at least 1".into()));
    }

    let mut scratch = vec![0.0; n];
    let mut pb = vec![0.0; n];
    precond.apply(b, &mut pb);
    let pb_norm = vec_norm(&pb);
    if pb_norm < 1e-30 {
        return Ok(GmresResult {
            x: vec![0.0; n],
            iterations: 0,
            residual: 0.0,
            converged: true,
        });
    }

    let mut x = match x0 {
        Some(x0) => x0.to_vec(),
        None => vec![0.0; n],
    };
    let mut total_iter = 0;

    loop {
        // r = M (b - A x)
        op.apply(&x, &mut scratch);
        for (s, &bi) in scratch.iter_mut().zip(b) {
            *s = bi - *s;
        }
        let mut r = vec![0.0; n];
        precond.apply(&scratch, &mut r);
        let r_norm = vec_norm(&r);
        let rel_res = r_norm / pb_norm;

        if rel_res < config.tol || total_iter >= config.max_iter {
            let converged = rel_res < config.tol;
            if !converged {
                log::debug!(
                    "GMRES stopped after {} iterations, residual {:.3e}",
                    total_iter,
                    rel_res
                );
            }
            return Ok(GmresResult {
                x,
                iterations: total_iter,
                residual: rel_res,
                converged,
            });
        }

        // Arnoldi process with modified Gram-Schmidt
        let m = config.restart.min(n);
        let mut v: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
        let mut h = vec![vec![0.0; m + 1]; m];

        let inv_r_norm = 1.0 / r_norm;
        for ri in r.iter_mut() {
            *ri *= inv_r_norm;
        }
        v.push(r);

        // g = ||r|| * e_1
        let mut g = vec![0.0; m + 1];
        g[0] = r_norm;

        // Givens rotation storage
        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];

        let mut k = 0;
        while k < m && total_iter < config.max_iter {
            total_iter += 1;

            // w = M A v[k]
            op.apply(&v[k], &mut scratch);
            let mut w = vec![0.0; n];
            precond.apply(&scratch, &mut w);

            for j in 0..=k {
                let hij = dot(&v[j], &w);
                h[k][j] = hij;
                for (wi, vji) in w.iter_mut().zip(&v[j]) {
                    *wi -= hij * vji;
                }
            }

            let w_norm = vec_norm(&w);
            h[k][k + 1] = w_norm;

            // Apply previous Givens rotations to h[k]
            for j in 0..k {
                let temp = cs[j] * h[k][j] + sn[j] * h[k][j + 1];
                h[k][j + 1] = -sn[j] * h[k][j] + cs[j] * h[k][j + 1];
                h[k][j] = temp;
            }

            let (c, s) = givens_rotation(h[k][k], h[k][k + 1]);
            cs[k] = c;
            sn[k] = s;
            h[k][k] = c * h[k][k] + s * h[k][k + 1];
            h[k][k + 1] = 0.0;

            g[k + 1] = -s * g[k];
            g[k] *= c;

            k += 1;

            if w_norm < 1e-30 {
                // Lucky breakdown: the Krylov space is invariant
                break;
            }
            v.push(w.iter().map(|&wi| wi / w_norm).collect());

            if g[k].abs() / pb_norm < config.tol {
                break;
            }
        }

        // Back-substitution to find y from H*y = g
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut sum = g[i];
            for j in (i + 1)..k {
                sum -= h[j][i] * y[j];
            }
            if h[i][i].abs() > 1e-30 {
                y[i] = sum / h[i][i];
            }
        }

        // x = x + V * y
        for (vi, &yi) in v.iter().zip(&y) {
            for (xj, vij) in x.iter_mut().zip(vi) {
                *xj += vij * yi;
            }
        }
    }
}

fn check_dim(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn vec_norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// Givens rotation `(c, s)` zeroing `b` in `(a, b)`.
fn givens_rotation(a: f64, b: f64) -> (f64, f64) {
    if b.abs() < 1e-30 {
        return (1.0, 0.0);
    }
    let r = a.hypot(b);
    (a / r, b / r)
}
