//! The bilinear lensing operator.
//!
//! [`BilinearLens`] remaps a field by the deflection `∇φ`: every output pixel
//! takes the bilinear interpolation of the input at its deflected position.
//! The forward matrix is built eagerly at construction. The anti-lensing
//! matrix (built from `−φ`) is only needed by the inverse solves, so it is
//! built on first use and cached.
//!
//! A deflection that is exactly zero produces an identity operator that
//! holds no matrix; every application then returns its input unchanged.

use std::sync::Arc;

use lenspix_core::{Field, FlatField, FlatMap, PixelGrid};
use lenspix_solver::{ComputeBackend, GmresConfig, RealOperator, RealPreconditioner, solve_gmres};

use crate::builder::DeflectedCoordinates;
use crate::cache::AntiLensingCache;
use crate::device::ensure_available;
use crate::error::{LensError, Result};
use crate::matrix::LensingMatrix;

/// Default GMRES iteration cap of the inverse solves.
pub const DEFAULT_INVERSE_ITERATIONS: usize = 5;

/// Lensing operator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LensingConfig {
    /// Where the lensing matrices are built and applied.
    pub backend: ComputeBackend,
    /// Solver settings for `apply_inverse` and `apply_inverse_adjoint`.
    pub inverse: GmresConfig,
}

impl Default for LensingConfig {
    fn default() -> Self {
        Self {
            backend: ComputeBackend::Cpu,
            inverse: GmresConfig {
                max_iter: DEFAULT_INVERSE_ITERATIONS,
                tol: f64::EPSILON.sqrt(),
                restart: 20,
            },
        }
    }
}

impl LensingConfig {
    pub fn with_backend(mut self, backend: ComputeBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_inverse(mut self, inverse: GmresConfig) -> Self {
        self.inverse = inverse;
        self
    }

    /// Set the GMRES iteration cap of the inverse solves.
    pub fn with_inverse_iterations(mut self, max_iter: usize) -> Self {
        self.inverse.max_iter = max_iter;
        self
    }
}

/// Outcome of one inverse solve (one map plane).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveSummary {
    pub iterations: usize,
    /// Preconditioned relative residual.
    pub residual: f64,
    pub converged: bool,
}

/// Per-plane outcomes of an inverse application, in leaf then plane order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InverseReport {
    pub solves: Vec<SolveSummary>,
}

impl InverseReport {
    /// True if every plane met the solver tolerance (vacuously for identity).
    pub fn all_converged(&self) -> bool {
        self.solves.iter().all(|s| s.converged)
    }

    pub fn max_residual(&self) -> f64 {
        self.solves.iter().map(|s| s.residual).fold(0.0, f64::max)
    }

    pub fn total_iterations(&self) -> usize {
        self.solves.iter().map(|s| s.iterations).sum()
    }
}

/// Bilinear-interpolation lensing operator for one deflection field.
#[derive(Debug)]
pub struct BilinearLens {
    deflection: FlatMap,
    config: LensingConfig,
    /// `None` for the zero-deflection identity.
    matrix: Option<Arc<LensingMatrix>>,
    anti: AntiLensingCache,
}

impl BilinearLens {
    /// Operator for deflection potential `phi` with the default configuration.
    pub fn new(phi: FlatMap) -> Result<Self> {
        Self::with_config(phi, LensingConfig::default())
    }

    pub fn with_config(phi: FlatMap, config: LensingConfig) -> Result<Self> {
        if phi.nbatch() != 1 {
            return Err(LensError::IncompatibleDeflection(format!(
                "expected a single map plane, got {}",
                phi.nbatch()
            )));
        }
        if !phi.is_finite() {
            return Err(LensError::IncompatibleDeflection(
                "deflection contains non-finite values".into(),
            ));
        }
        ensure_available(&config.backend)?;

        let matrix = if phi.is_zero() {
            log::debug!("zero deflection on {} grid, using identity", phi.grid());
            None
        } else {
            let coords = DeflectedCoordinates::from_deflection(&phi);
            Some(Arc::new(LensingMatrix::build(&coords, &config.backend)?))
        };

        Ok(Self {
            deflection: phi,
            config,
            matrix,
            anti: AntiLensingCache::new(),
        })
    }

    /// Operator for a deflection given as a generic field.
    ///
    /// The field must be scalar; a Fourier-space field is converted to
    /// position space first.
    pub fn from_field(phi: &Field, config: LensingConfig) -> Result<Self> {
        match phi {
            Field::Scalar(flat) => Self::with_config(flat.to_map(), config),
            Field::Composite(_) => Err(LensError::IncompatibleDeflection(
                "deflection must be a scalar field, got a composite".into(),
            )),
        }
    }

    /// New operator for `phi` with this operator's configuration.
    pub fn with_deflection(&self, phi: FlatMap) -> Result<Self> {
        Self::with_config(phi, self.config.clone())
    }

    pub fn deflection(&self) -> &FlatMap {
        &self.deflection
    }

    pub fn grid(&self) -> PixelGrid {
        self.deflection.grid()
    }

    pub fn config(&self) -> &LensingConfig {
        &self.config
    }

    pub fn backend(&self) -> &ComputeBackend {
        &self.config.backend
    }

    pub fn is_identity(&self) -> bool {
        self.matrix.is_none()
    }

    /// The forward lensing matrix; `None` for the identity.
    pub fn matrix(&self) -> Option<&Arc<LensingMatrix>> {
        self.matrix.as_ref()
    }

    /// The anti-lensing matrix, building it if needed; `None` for the identity.
    pub fn anti_lensing_matrix(&self) -> Result<Option<Arc<LensingMatrix>>> {
        if self.matrix.is_none() {
            return Ok(None);
        }
        self.build_anti_lensing().map(Some)
    }

    /// How many times this operator has built its anti-lensing matrix.
    pub fn anti_lensing_builds(&self) -> usize {
        self.anti.builds()
    }

    fn build_anti_lensing(&self) -> Result<Arc<LensingMatrix>> {
        self.anti.get_or_try_build(|| {
            log::debug!("building anti-lensing matrix for {} grid", self.grid());
            let coords = DeflectedCoordinates::from_deflection(&self.deflection.scale(-1.0));
            LensingMatrix::build(&coords, &self.config.backend)
        })
    }

    /// Lensed field `L f`.
    pub fn apply(&self, f: &Field) -> Result<Field> {
        match &self.matrix {
            None => self.pass_through(f),
            Some(m) => self.map_planes(f, |x, y| m.apply(x, y)),
        }
    }

    /// `Lᵀ f`.
    pub fn apply_adjoint(&self, f: &Field) -> Result<Field> {
        match &self.matrix {
            None => self.pass_through(f),
            Some(m) => self.map_planes(f, |x, y| m.apply_transpose(x, y)),
        }
    }

    /// Approximate `L⁻¹ f` from a capped, anti-lensing-preconditioned GMRES.
    pub fn apply_inverse(&self, f: &Field) -> Result<Field> {
        self.solve(f, false).map(|(out, _)| out)
    }

    /// Approximate `(Lᵀ)⁻¹ f`.
    pub fn apply_inverse_adjoint(&self, f: &Field) -> Result<Field> {
        self.solve(f, true).map(|(out, _)| out)
    }

    /// [`apply_inverse`](Self::apply_inverse) plus the per-plane solver outcomes.
    pub fn apply_inverse_with_report(&self, f: &Field) -> Result<(Field, InverseReport)> {
        self.solve(f, false)
    }

    /// [`apply_inverse_adjoint`](Self::apply_inverse_adjoint) plus the
    /// per-plane solver outcomes.
    pub fn apply_inverse_adjoint_with_report(&self, f: &Field) -> Result<(Field, InverseReport)> {
        self.solve(f, true)
    }

    /// Borrowed view of `Lᵀ`.
    pub fn adjoint(&self) -> AdjointLens<'_> {
        AdjointLens { lens: self }
    }

    /// Log-determinant of `L`. Not available for this operator.
    pub fn logdet(&self) -> Result<f64> {
        Err(LensError::UnsupportedOperation(
            "log-determinant of a bilinear lensing operator",
        ))
    }

    /// Equivalent operator with its matrices on `backend`.
    ///
    /// An anti-lensing matrix that was already built is moved along with the
    /// forward matrix.
    pub fn adapt(&self, backend: &ComputeBackend) -> Result<BilinearLens> {
        ensure_available(backend)?;
        let matrix = match &self.matrix {
            Some(m) => Some(Arc::new(m.to_backend(backend)?)),
            None => None,
        };
        let anti = match self.anti.get() {
            Some(a) => AntiLensingCache::with_matrix(Arc::new(a.to_backend(backend)?)),
            None => AntiLensingCache::new(),
        };
        log::debug!("moved lensing operator from {} to {}", self.config.backend, backend);

        Ok(BilinearLens {
            deflection: self.deflection.clone(),
            config: self.config.clone().with_backend(backend.clone()),
            matrix,
            anti,
        })
    }

    fn pass_through(&self, f: &Field) -> Result<Field> {
        for leaf in f.leaves() {
            self.grid().ensure_same(&leaf.grid())?;
        }
        Ok(f.clone())
    }

    fn leaf_map(&self, leaf: &FlatField) -> Result<FlatMap> {
        self.grid().ensure_same(&leaf.grid())?;
        Ok(leaf.to_map())
    }

    fn map_planes<F>(&self, f: &Field, op: F) -> Result<Field>
    where
        F: Fn(&[f64], &mut [f64]),
    {
        f.try_map_leaves(&mut |leaf: &FlatField| -> Result<FlatMap> {
            let input = self.leaf_map(leaf)?;
            let mut out = FlatMap::zeros_batched(input.grid(), input.nbatch());
            for (x, y) in input.planes().zip(out.planes_mut()) {
                op(x, y);
            }
            Ok(out)
        })
    }

    fn solve(&self, f: &Field, adjoint: bool) -> Result<(Field, InverseReport)> {
        let Some(matrix) = &self.matrix else {
            return Ok((self.pass_through(f)?, InverseReport::default()));
        };
        let anti = self.build_anti_lensing()?;

        let (fwd, fwd_precond) = (matrix.forward(), anti.forward());
        let (adj, adj_precond) = (matrix.adjoint(), anti.adjoint());
        let (op, precond): (&dyn RealOperator, &dyn RealPreconditioner) = if adjoint {
            (&adj, &adj_precond)
        } else {
            (&fwd, &fwd_precond)
        };
        let config = &self.config.inverse;

        let mut report = InverseReport::default();
        let out = f.try_map_leaves(&mut |leaf: &FlatField| -> Result<FlatMap> {
            let input = self.leaf_map(leaf)?;
            let mut out = FlatMap::zeros_batched(input.grid(), input.nbatch());
            for (b, x) in input.planes().zip(out.planes_mut()) {
                let result = solve_gmres(op, precond, b, Some(b), config)?;
                report.solves.push(SolveSummary {
                    iterations: result.iterations,
                    residual: result.residual,
                    converged: result.converged,
                });
                x.copy_from_slice(&result.x);
            }
            Ok(out)
        })?;

        Ok((out, report))
    }
}

/// Borrowed adjoint `Lᵀ` of a [`BilinearLens`].
#[derive(Debug, Clone, Copy)]
pub struct AdjointLens<'a> {
    lens: &'a BilinearLens,
}

impl<'a> AdjointLens<'a> {
    /// `Lᵀ f`.
    pub fn apply(&self, f: &Field) -> Result<Field> {
        self.lens.apply_adjoint(f)
    }

    /// Approximate `(Lᵀ)⁻¹ f`.
    pub fn apply_inverse(&self, f: &Field) -> Result<Field> {
        self.lens.apply_inverse_adjoint(f)
    }

    pub fn apply_inverse_with_report(&self, f: &Field) -> Result<(Field, InverseReport)> {
        self.lens.apply_inverse_adjoint_with_report(f)
    }

    /// The operator this is the adjoint of.
    pub fn adjoint(&self) -> &'a BilinearLens {
        self.lens
    }
}
