//! Reverse-mode derivatives of lensing.
//!
//! For `y = L(φ) f` and a cotangent `Δ` shaped like `y`, the pullback gives
//!
//! - `δf = Lᵀ Δ`
//! - `δφ = ∇ᵀ(Δ ∇y)`, summed over every leaf and map plane of `Δ`
//!
//! where `∇y` stands in for the deflected input gradient. The φ part
//! therefore only needs the lensed output, which the tape keeps.

use lenspix_core::{Field, FlatField, FlatMap, gradient, gradient_adjoint};

use crate::error::{LensError, Result};
use crate::operator::BilinearLens;

/// Saved forward state for [`BilinearLens::pullback`].
///
/// A tape is only valid for a lens with the deflection that recorded it.
#[derive(Debug, Clone)]
pub struct LensingTape {
    deflection: FlatMap,
    output: Field,
}

impl LensingTape {
    /// The lensed field recorded by the forward pass.
    pub fn output(&self) -> &Field {
        &self.output
    }

    /// Deflection potential of the lens that recorded the tape.
    pub fn deflection(&self) -> &FlatMap {
        &self.deflection
    }
}

/// Cotangents of lensing with respect to its inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct LensingGradient {
    /// With respect to the unlensed field, in position space.
    pub field: Field,
    /// With respect to the deflection potential.
    pub deflection: FlatMap,
}

impl BilinearLens {
    /// [`apply`](Self::apply), also recording what the pullback needs.
    pub fn apply_with_tape(&self, f: &Field) -> Result<(Field, LensingTape)> {
        let output = self.apply(f)?;
        let tape = LensingTape {
            deflection: self.deflection().clone(),
            output: output.clone(),
        };
        Ok((output, tape))
    }

    /// Pull the cotangent `delta` back through the recorded application.
    ///
    /// # Errors
    ///
    /// `LensError::TapeMismatch` if `tape` was recorded by a lens with a
    /// different deflection.
    pub fn pullback(&self, tape: &LensingTape, delta: &Field) -> Result<LensingGradient> {
        if tape.deflection != *self.deflection() {
            return Err(LensError::TapeMismatch);
        }
        let field = self.apply_adjoint(delta)?.to_map_field();

        let per_leaf = delta.try_zip_leaves(
            &tape.output,
            &mut |d: &FlatField, y: &FlatField| -> Result<FlatMap> {
                let d = d.to_map();
                let y = y.to_map();
                d.ensure_compatible(&y)?;
                let (gx, gy) = gradient(&y);
                let vx = d.hadamard(&gx)?;
                let vy = d.hadamard(&gy)?;
                Ok(gradient_adjoint(&vx, &vy)?.sum_planes())
            },
        )?;

        let mut deflection = FlatMap::zeros(self.grid());
        for leaf in per_leaf.leaves() {
            deflection.axpy(1.0, &leaf.to_map())?;
        }

        Ok(LensingGradient { field, deflection })
    }
}
