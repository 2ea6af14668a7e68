//! Integration tests for the bilinear lensing operator.

use std::f64::consts::PI;
use std::sync::Arc;

use lenspix_core::{Field, FlatMap, PixelGrid, gradient};
use lenspix_lensing::{
    BilinearLens, ComputeBackend, DeflectedCoordinates, LensError, LensingConfig, bilinear_stencil,
    build_cpu,
};

fn grid(n: usize) -> PixelGrid {
    PixelGrid::square(n, 1.0).unwrap()
}

/// Sum of a few low Fourier modes, periodic on the grid.
fn smooth(grid: PixelGrid, amplitude: f64, phase: f64) -> FlatMap {
    let n = grid.nx() as f64;
    FlatMap::from_fn(grid, |i, j| {
        let x = 2.0 * PI * i as f64 / n;
        let y = 2.0 * PI * j as f64 / n;
        amplitude * ((x + phase).cos() * (y - 0.5 * phase).cos() + 0.3 * (2.0 * x - y + phase).sin())
    })
}

fn max_abs_diff(a: &Field, b: &Field) -> f64 {
    a.leaves()
        .iter()
        .zip(b.leaves())
        .flat_map(|(x, y)| {
            let (x, y) = (x.to_map(), y.to_map());
            x.data()
                .iter()
                .zip(y.data())
                .map(|(p, q)| (p - q).abs())
                .collect::<Vec<_>>()
        })
        .fold(0.0, f64::max)
}

#[test]
fn test_zero_deflection_applications_return_input() {
    let g = grid(16);
    let lens = BilinearLens::new(FlatMap::zeros(g)).unwrap();
    let map: Field = FlatMap::white_noise(g, 11).into();
    let fourier: Field = FlatMap::white_noise(g, 12).to_fourier().into();

    for f in [&map, &fourier] {
        assert_eq!(&lens.apply(f).unwrap(), f);
        assert_eq!(&lens.apply_adjoint(f).unwrap(), f);
        assert_eq!(&lens.apply_inverse(f).unwrap(), f);
        assert_eq!(&lens.apply_inverse_adjoint(f).unwrap(), f);
    }
    assert_eq!(lens.anti_lensing_builds(), 0);
}

#[test]
fn test_stencil_weights_sum_to_one() {
    let steps = 17;
    for a in 0..steps {
        for b in 0..steps {
            let fx = a as f64 / steps as f64;
            let fy = b as f64 / steps as f64;
            let stencil = bilinear_stencil(3.0 + fx, 5.0 + fy, 8, 8);
            let sum: f64 = stencil.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-10, "sum {} at ({}, {})", sum, fx, fy);
        }
    }
}

#[test]
fn test_stencil_wraps_at_grid_edges() {
    // left corner lands at raw column -1 -> 7, right at 8 -> 0
    let low = bilinear_stencil(-0.25, 2.0, 8, 8);
    assert_eq!(low.indices[0] % 8, 7);
    assert_eq!(low.indices[1] % 8, 0);

    let high = bilinear_stencil(7.5, 7.5, 8, 8);
    assert_eq!(high.indices[0], 7 * 8 + 7);
    assert_eq!(high.indices[1], 7 * 8);
    assert_eq!(high.indices[2], 7);
    assert_eq!(high.indices[3], 0);
}

#[test]
fn test_adjoint_matches_inner_product() {
    let g = grid(32);
    let lens = BilinearLens::new(smooth(g, 2.0, 0.3)).unwrap();
    let a: Field = FlatMap::white_noise(g, 1).into();
    let b: Field = FlatMap::white_noise(g, 2).into();

    let lhs = lens.apply(&a).unwrap().dot(&b).unwrap();
    let rhs = a.dot(&lens.apply_adjoint(&b).unwrap()).unwrap();
    assert!((lhs - rhs).abs() < 1e-10 * lhs.abs().max(1.0));

    let adjoint = lens.adjoint();
    assert_eq!(adjoint.apply(&b).unwrap(), lens.apply_adjoint(&b).unwrap());
}

#[test]
fn test_inverse_improves_with_iteration_cap() {
    let g = grid(32);
    let phi = smooth(g, 0.3, 0.1);
    let f: Field = FlatMap::white_noise(g, 11).into();

    let error_with_cap = |cap: usize| {
        // tight tolerance so no cap stops early
        let config = LensingConfig::default().with_inverse(
            LensingConfig::default()
                .inverse
                .with_max_iter(cap)
                .with_tol(1e-14),
        );
        let lens = BilinearLens::with_config(phi.clone(), config).unwrap();
        let lensed = lens.apply(&f).unwrap();
        let restored = lens.apply_inverse(&lensed).unwrap();
        let diff = restored.as_map().unwrap().try_sub(f.as_map().unwrap()).unwrap();
        diff.norm() / f.as_map().unwrap().norm()
    };

    let errors: Vec<f64> = (1..=5).map(error_with_cap).collect();
    for (cap, pair) in errors.windows(2).enumerate() {
        assert!(
            pair[1] < pair[0],
            "cap {} error {} not below cap {} error {}",
            cap + 2,
            pair[1],
            cap + 1,
            pair[0]
        );
    }
    assert!(errors[4] < 1e-2, "cap 5 relative error {}", errors[4]);
}

#[test]
fn test_inverse_adjoint_undoes_adjoint() {
    let g = grid(32);
    let lens = BilinearLens::new(smooth(g, 0.8, 0.4)).unwrap();
    let f: Field = smooth(g, 1.0, 2.2).into();

    let restored = lens
        .adjoint()
        .apply_inverse(&lens.apply_adjoint(&f).unwrap())
        .unwrap();
    assert!(max_abs_diff(&restored, &f) < 1e-2);
}

#[test]
fn test_four_entries_per_row() {
    for (nx, ny) in [(2, 2), (3, 5), (16, 9)] {
        let g = PixelGrid::new(nx, ny, 1.0).unwrap();
        let phi = FlatMap::from_fn(g, |i, j| 0.7 * (i as f64 + 0.3).sin() * (j as f64).cos());
        let m = build_cpu(&DeflectedCoordinates::from_deflection(&phi)).unwrap();
        assert_eq!(m.nnz(), 4 * nx * ny);
        for w in m.row_ptr().windows(2) {
            assert_eq!(w[1] - w[0], 4);
        }
        for s in m.row_sums() {
            assert!((s - 1.0).abs() < 1e-10);
        }
    }
}

#[test]
fn test_logdet_rejected_for_any_deflection() {
    let g = grid(8);
    for phi in [FlatMap::zeros(g), smooth(g, 1.0, 0.0)] {
        let lens = BilinearLens::new(phi).unwrap();
        assert!(matches!(
            lens.logdet(),
            Err(LensError::UnsupportedOperation(_))
        ));
    }
}

#[test]
fn test_concurrent_inverse_builds_anti_lensing_once() {
    let g = grid(32);
    let lens = BilinearLens::new(smooth(g, 0.8, 0.9)).unwrap();
    let f: Field = smooth(g, 1.0, 0.2).into();

    let results: Vec<Field> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| lens.apply_inverse(&f).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(lens.anti_lensing_builds(), 1);
    for r in &results[1..] {
        assert_eq!(r, &results[0]);
    }
    let a = lens.anti_lensing_matrix().unwrap().unwrap();
    let b = lens.anti_lensing_matrix().unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

/// Single lowest Fourier mode; bilinear and spectral derivatives stay close.
fn lowest_mode(grid: PixelGrid, amplitude: f64, phase: f64) -> FlatMap {
    let n = grid.nx() as f64;
    FlatMap::from_fn(grid, |i, j| {
        let x = 2.0 * PI * i as f64 / n;
        let y = 2.0 * PI * j as f64 / n;
        amplitude * (x + phase).cos() * (y - 0.5 * phase).cos()
    })
}

#[test]
fn test_deflection_gradient_matches_finite_difference() {
    let g = grid(128);
    let phi = lowest_mode(g, 4.0, 0.5);
    let f = lowest_mode(g, 1.0, 2.0);

    // cotangent aligned with the first-order change of L f along phi
    let (fx, fy) = gradient(&f);
    let (px, py) = gradient(&phi);
    let delta: Field = fx
        .hadamard(&px)
        .unwrap()
        .try_add(&fy.hadamard(&py).unwrap())
        .unwrap()
        .into();
    let direction = phi.clone();

    let lens = BilinearLens::new(phi.clone()).unwrap();
    let field: Field = f.clone().into();
    let (_, tape) = lens.apply_with_tape(&field).unwrap();
    let grad = lens.pullback(&tape, &delta).unwrap();
    let analytic = grad.deflection.dot(&direction).unwrap();

    let eps = 1e-5;
    let objective = |shift: f64| {
        let mut shifted = phi.clone();
        shifted.axpy(shift, &direction).unwrap();
        let lens = BilinearLens::new(shifted).unwrap();
        lens.apply(&field).unwrap().dot(&delta).unwrap()
    };
    let numeric = (objective(eps) - objective(-eps)) / (2.0 * eps);

    assert!(analytic.abs() > 0.0);
    assert!(
        (analytic - numeric).abs() < 0.1 * numeric.abs(),
        "analytic {} vs finite difference {}",
        analytic,
        numeric
    );
}

#[test]
fn test_field_gradient_is_adjoint_of_cotangent() {
    let g = grid(16);
    let lens = BilinearLens::new(smooth(g, 1.0, 0.1)).unwrap();
    let f: Field = FlatMap::white_noise(g, 5).into();
    let delta: Field = FlatMap::white_noise(g, 6).into();

    let (_, tape) = lens.apply_with_tape(&f).unwrap();
    let grad = lens.pullback(&tape, &delta).unwrap();
    assert_eq!(grad.field, lens.apply_adjoint(&delta).unwrap());
}

#[test]
fn test_composite_fields_keep_structure() {
    let g = grid(16);
    let lens = BilinearLens::new(smooth(g, 1.0, 0.3)).unwrap();
    let q: Field = FlatMap::white_noise(g, 1).into();
    let u: Field = FlatMap::white_noise(g, 2).to_fourier().into();
    let pol = Field::composite(vec![q.clone(), u.clone()]);

    let lensed = lens.apply(&pol).unwrap();
    assert_eq!(lensed.components().len(), 2);
    assert_eq!(lensed.components()[0], lens.apply(&q).unwrap());
    let expected_u = lens.apply(&u).unwrap();
    assert!(max_abs_diff(&lensed.components()[1], &expected_u) < 1e-12);

    let restored = lens.apply_inverse(&lensed).unwrap();
    assert_eq!(restored.components().len(), 2);
}

#[test]
fn test_cpu_adapt_round_trip_preserves_results() {
    let g = grid(16);
    let lens = BilinearLens::new(smooth(g, 1.0, 0.6)).unwrap();
    let f: Field = FlatMap::white_noise(g, 9).into();
    let before = lens.apply_inverse(&f).unwrap();

    let moved = lens.adapt(&ComputeBackend::Cpu).unwrap();
    assert_eq!(moved.backend(), &ComputeBackend::Cpu);
    assert_eq!(moved.apply(&f).unwrap(), lens.apply(&f).unwrap());
    assert_eq!(moved.apply_inverse(&f).unwrap(), before);
}

#[test]
fn test_grid_mismatch_is_rejected() {
    let lens = BilinearLens::new(smooth(grid(16), 1.0, 0.0)).unwrap();
    let f: Field = FlatMap::zeros(grid(8)).into();
    assert!(lens.apply(&f).is_err());
    assert!(lens.apply_inverse(&f).is_err());
}

#[cfg(not(feature = "cuda"))]
#[test]
fn test_cuda_backend_unavailable_without_feature() {
    let g = grid(8);
    let config = LensingConfig::default().with_backend(ComputeBackend::Cuda { device_id: 0 });

    // checked even when the deflection is zero
    for phi in [FlatMap::zeros(g), smooth(g, 1.0, 0.0)] {
        let err = BilinearLens::with_config(phi, config.clone()).unwrap_err();
        assert!(matches!(err, LensError::BackendUnavailable(_)));
    }

    let lens = BilinearLens::new(smooth(g, 1.0, 0.0)).unwrap();
    assert!(matches!(
        lens.adapt(&ComputeBackend::Cuda { device_id: 0 }),
        Err(LensError::BackendUnavailable(_))
    ));
}

#[cfg(feature = "cuda")]
mod cuda {
    use super::*;

    fn cuda_lens(phi: FlatMap) -> Option<BilinearLens> {
        let config = LensingConfig::default().with_backend(ComputeBackend::Cuda { device_id: 0 });
        match BilinearLens::with_config(phi, config) {
            Ok(lens) => Some(lens),
            Err(LensError::BackendUnavailable(msg)) => {
                eprintln!("CUDA not available, skipping test: {}", msg);
                None
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    #[ignore = "requires CUDA hardware"]
    fn test_gpu_matrix_matches_cpu() {
        let g = grid(64);
        let phi = smooth(g, 3.0, 0.4);
        let Some(gpu) = cuda_lens(phi.clone()) else {
            return;
        };
        let cpu = BilinearLens::new(phi).unwrap();

        let a = cpu.matrix().unwrap().host();
        let b = gpu.matrix().unwrap().host();
        assert_eq!(a.col_idx(), b.col_idx());
        for (x, y) in a.values().iter().zip(b.values()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    #[ignore = "requires CUDA hardware"]
    fn test_gpu_applications_match_cpu() {
        let g = grid(64);
        let phi = smooth(g, 2.0, 1.1);
        let Some(gpu) = cuda_lens(phi.clone()) else {
            return;
        };
        let cpu = BilinearLens::new(phi).unwrap();
        let f: Field = FlatMap::white_noise(g, 3).into();

        assert!(max_abs_diff(&gpu.apply(&f).unwrap(), &cpu.apply(&f).unwrap()) < 1e-10);
        assert!(
            max_abs_diff(&gpu.apply_adjoint(&f).unwrap(), &cpu.apply_adjoint(&f).unwrap()) < 1e-10
        );
        assert!(
            max_abs_diff(&gpu.apply_inverse(&f).unwrap(), &cpu.apply_inverse(&f).unwrap()) < 1e-8
        );
    }

    #[test]
    #[ignore = "requires CUDA hardware"]
    fn test_adapt_moves_between_cpu_and_gpu() {
        let g = grid(32);
        let cpu = BilinearLens::new(smooth(g, 1.0, 0.2)).unwrap();
        let f: Field = FlatMap::white_noise(g, 4).into();
        cpu.apply_inverse(&f).unwrap();

        let gpu = match cpu.adapt(&ComputeBackend::Cuda { device_id: 0 }) {
            Ok(lens) => lens,
            Err(LensError::BackendUnavailable(_)) => return,
            Err(e) => panic!("unexpected error: {}", e),
        };
        assert!(gpu.backend().is_gpu());
        assert_eq!(gpu.anti_lensing_builds(), 0);

        let back = gpu.adapt(&ComputeBackend::Cpu).unwrap();
        assert!(max_abs_diff(&back.apply(&f).unwrap(), &cpu.apply(&f).unwrap()) < 1e-12);
    }
}
