// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! End-to-end behavior of the covariance/coefficient engine.

use approx::assert_relative_eq;
use nalgebra::SymmetricEigen;
use sky_core::pipeline::{run, Checkpoint, Distribution, EngineConfig};
use sky_core::{
    Diagnostics, EigenClip, Field, FieldCatalog, FieldId, FieldKind, PipelineError,
    SpectrumSamples, SpectrumStore, WarningSink, WindowConfig,
};

fn catalog(n: usize) -> FieldCatalog {
    FieldCatalog::new(
        (0..n)
            .map(|k| Field {
                id: FieldId::new(1, k as u32 + 1),
                mean: 0.0,
                shift: 1.0,
                kind: FieldKind::Density,
                zmin: 0.2 * k as f64,
                zmax: 0.2 * (k + 1) as f64,
            })
            .collect(),
    )
    .unwrap()
}

fn config(distribution: Distribution, lmin: usize, lmax: usize) -> EngineConfig {
    EngineConfig {
        distribution,
        lmin,
        lmax,
        crop_to_lmax: false,
        windows: WindowConfig::default(),
        allow_missing: false,
        bad_corr_frac: 0.0,
        min_diag_frac: 0.0,
        extrapolate_dipole: false,
        base_seed: 17,
        worker_count: 2,
        exit_at: None,
    }
}

/// Smooth decaying spectrum: safe on both sides of the lognormal mapping.
fn decaying(amp: f64, lmax: usize) -> SpectrumSamples {
    let ell: Vec<f64> = (0..=lmax).map(|l| l as f64).collect();
    let value: Vec<f64> = ell
        .iter()
        .map(|&l| amp * (-0.02 * l * (l + 1.0)).exp())
        .collect();
    SpectrumSamples::new(ell, value).unwrap()
}

fn two_field_store(lmax: usize, amp0: f64, amp1: f64, cross: f64) -> SpectrumStore {
    let mut store = SpectrumStore::new(2);
    store.set(0, 0, decaying(amp0, lmax)).unwrap();
    store.set(1, 1, decaying(amp1, lmax)).unwrap();
    store
        .set(0, 1, decaying(cross * (amp0 * amp1).sqrt(), lmax))
        .unwrap();
    store
}

#[test]
fn scenario_a_unit_spectrum_passes_through_unchanged() {
    // One field, Gaussian mode, C_l = 1 for l = 2..=10, nothing else set.
    let catalog = catalog(1);
    let mut store = SpectrumStore::new(1);
    let ell: Vec<f64> = (2..=10).map(|l| l as f64).collect();
    store
        .set(0, 0, SpectrumSamples::new(ell, vec![1.0; 9]).unwrap())
        .unwrap();

    let mut cfg = config(Distribution::Gaussian, 2, 10);
    cfg.exit_at = Some(Checkpoint::RegularizedCovariance);
    let warnings = WarningSink::new();
    let outputs = run(
        &catalog,
        store.clone(),
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap();
    let cov = outputs.covariance.unwrap();
    for l in 2..=10 {
        assert_relative_eq!(cov.matrix(l)[(0, 0)], 1.0, max_relative = 1e-14);
    }
    // Below the first input multipole, nothing was extrapolated.
    assert_eq!(cov.matrix(0)[(0, 0)], 0.0);

    // The Cholesky factor of a scalar is its square root.
    let mut cfg = config(Distribution::Gaussian, 2, 10);
    cfg.exit_at = Some(Checkpoint::MixingMatrices);
    let outputs = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap();
    let mixing = outputs.mixing.unwrap();
    for l in 2..=10 {
        assert_relative_eq!(mixing.factor(l).unwrap()[(0, 0)], 1.0, max_relative = 1e-14);
    }
}

#[test]
fn scenario_b_missing_pair_is_fatal_and_names_the_transpose() {
    // Cross spectrum supplied in neither order, allow_missing off.
    let catalog = catalog(2);
    let mut store = SpectrumStore::new(2);
    store.set(0, 0, decaying(1.0, 8)).unwrap();
    store.set(1, 1, decaying(1.0, 8)).unwrap();

    let cfg = config(Distribution::Gaussian, 2, 8);
    let warnings = WarningSink::new();
    let err = run(
        &catalog,
        store.clone(),
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Covariance(sky_core::covariance::CovarianceError::MissingPair { i: 0, j: 1 })
    ));
    assert!(err.to_string().contains("(1, 0)"));

    // The same input is accepted when missing pairs may be zeroed.
    let mut cfg = config(Distribution::Gaussian, 2, 8);
    cfg.allow_missing = true;
    let outputs = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap();
    assert!(outputs.coefficients.is_some());
}

#[test]
fn scenario_c_non_positive_shifted_mean_fails_before_any_transform() {
    let catalog = FieldCatalog::new(vec![
        Field {
            id: FieldId::new(1, 1),
            mean: 0.0,
            shift: 1.0,
            kind: FieldKind::Density,
            zmin: 0.0,
            zmax: 0.2,
        },
        Field {
            id: FieldId::new(1, 2),
            mean: -0.5,
            shift: 0.3,
            kind: FieldKind::Density,
            zmin: 0.2,
            zmax: 0.4,
        },
    ])
    .unwrap();
    // The store is empty: the shifted-mean check must fire first.
    let store = SpectrumStore::new(2);
    let cfg = config(Distribution::Lognormal, 2, 8);
    let warnings = WarningSink::new();
    let err = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Field(sky_core::fields::FieldError::NonPositiveShiftedMean { .. })
    ));
}

#[test]
fn scenario_d_bad_correlation_inflates_both_variances_by_the_fraction() {
    let catalog = catalog(2);
    let mut store = SpectrumStore::new(2);
    let ell: Vec<f64> = (0..=4).map(|l| l as f64).collect();
    store
        .set(0, 0, SpectrumSamples::new(ell.clone(), vec![1.0; 5]).unwrap())
        .unwrap();
    store
        .set(1, 1, SpectrumSamples::new(ell.clone(), vec![1.0; 5]).unwrap())
        .unwrap();
    store
        .set(0, 1, SpectrumSamples::new(ell, vec![1.2; 5]).unwrap())
        .unwrap();

    let mut cfg = config(Distribution::Gaussian, 2, 4);
    cfg.bad_corr_frac = 0.1;
    cfg.exit_at = Some(Checkpoint::RegularizedCovariance);
    let warnings = WarningSink::new();
    let outputs = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap();
    let cov = outputs.covariance.unwrap();
    for l in 2..=4 {
        // |corr| = 1.2 triggered the one-shot fudge: both variances up 10%,
        // exactly. The recheck (1.2/1.1 > 1) stays a warning.
        assert_relative_eq!(cov.matrix(l)[(0, 0)], 1.1, max_relative = 1e-12);
        assert_relative_eq!(cov.matrix(l)[(1, 1)], 1.1, max_relative = 1e-12);
    }
    assert!(warnings.count() >= 3);
}

#[test]
fn assembled_matrices_are_symmetric() {
    let catalog = catalog(3);
    let mut store = SpectrumStore::new(3);
    for i in 0..3 {
        store.set(i, i, decaying(0.01 * (i + 1) as f64, 16)).unwrap();
    }
    // Cross pairs in one storage order only.
    store.set(0, 1, decaying(0.004, 16)).unwrap();
    store.set(2, 0, decaying(0.003, 16)).unwrap();
    store.set(1, 2, decaying(0.002, 16)).unwrap();

    let mut cfg = config(Distribution::Lognormal, 1, 16);
    cfg.exit_at = Some(Checkpoint::Covariance);
    let warnings = WarningSink::new();
    let outputs = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap();
    let cov = outputs.covariance.unwrap();
    for l in 0..cov.bandwidth() {
        let m = cov.matrix(l);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(m[(i, j)], m[(j, i)]);
            }
        }
    }
}

#[test]
fn regularized_matrices_are_positive_semidefinite() {
    let catalog = catalog(2);
    let store = two_field_store(16, 0.01, 0.02, 0.9);
    let mut cfg = config(Distribution::Lognormal, 1, 16);
    cfg.exit_at = Some(Checkpoint::RegularizedCovariance);
    let warnings = WarningSink::new();
    let outputs = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap();
    let cov = outputs.covariance.unwrap();
    for l in 1..=16 {
        let eigen = SymmetricEigen::new(cov.matrix(l).clone());
        let max = eigen.eigenvalues.iter().cloned().fold(0.0f64, f64::max);
        for &e in eigen.eigenvalues.iter() {
            assert!(
                e >= -1e-10 * max.max(1e-30),
                "l={l}: eigenvalue {e} below tolerance"
            );
        }
    }
}

#[test]
fn mixing_factors_reproduce_the_regularized_covariance() {
    let catalog = catalog(2);
    let store = two_field_store(12, 0.01, 0.015, 0.5);

    let mut cfg = config(Distribution::Lognormal, 2, 12);
    cfg.exit_at = Some(Checkpoint::RegularizedCovariance);
    let warnings = WarningSink::new();
    let reference = run(
        &catalog,
        store.clone(),
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap()
    .covariance
    .unwrap();

    let mut cfg = config(Distribution::Lognormal, 2, 12);
    cfg.exit_at = Some(Checkpoint::MixingMatrices);
    let mixing = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap()
    .mixing
    .unwrap();

    for l in 2..=12 {
        let factor = mixing.factor(l).unwrap();
        let rebuilt = factor * factor.transpose();
        let expected = reference.matrix(l);
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(
                    rebuilt[(i, j)],
                    expected[(i, j)],
                    max_relative = 1e-10,
                    epsilon = 1e-14
                );
            }
        }
    }
}

#[test]
fn gaussian_mode_scales_linearly_with_the_input() {
    let catalog = catalog(2);
    let store = two_field_store(12, 0.01, 0.02, 0.4);
    let factor = 2.5;

    let mut plain = config(Distribution::Gaussian, 2, 12);
    plain.exit_at = Some(Checkpoint::RegularizedCovariance);
    let mut scaled = plain.clone();
    scaled.windows.rescale = factor;

    let warnings = WarningSink::new();
    let base = run(
        &catalog,
        store.clone(),
        &plain,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap()
    .covariance
    .unwrap();
    let boosted = run(
        &catalog,
        store,
        &scaled,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap()
    .covariance
    .unwrap();

    for l in 2..=12 {
        for i in 0..2 {
            assert_relative_eq!(
                boosted.matrix(l)[(i, i)],
                factor * base.matrix(l)[(i, i)],
                max_relative = 1e-12
            );
        }
    }
}

#[test]
fn identical_seed_and_workers_reproduce_the_coefficients() {
    let catalog = catalog(2);
    let store = two_field_store(16, 0.01, 0.02, 0.5);
    let cfg = config(Distribution::Lognormal, 2, 16);
    let warnings = WarningSink::new();

    let first = run(
        &catalog,
        store.clone(),
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap()
    .coefficients
    .unwrap();
    let second = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap()
    .coefficients
    .unwrap();

    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.as_slice(), b.as_slice());
    }
}

#[test]
fn homogeneous_mode_skips_preparation_entirely() {
    let catalog = catalog(2);
    let store = SpectrumStore::new(2);
    let cfg = config(Distribution::Homogeneous, 2, 16);
    let warnings = WarningSink::new();
    let outputs = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap();
    assert!(outputs.mixing.is_none());
    assert!(outputs.coefficients.is_none());
    assert!(outputs.covariance.is_none());
    assert_eq!(outputs.field_order.len(), 2);
}

#[test]
fn reversed_range_is_rejected_before_heavy_work() {
    let catalog = catalog(1);
    let store = SpectrumStore::new(1);
    let cfg = config(Distribution::Gaussian, 10, 2);
    let warnings = WarningSink::new();
    let err = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::RangeOrder { lmin: 10, lmax: 2 }
    ));
}

#[test]
fn requesting_more_bandwidth_than_supplied_is_an_error() {
    let catalog = catalog(1);
    let mut store = SpectrumStore::new(1);
    store.set(0, 0, decaying(0.01, 8)).unwrap();
    let cfg = config(Distribution::Gaussian, 2, 32);
    let warnings = WarningSink::new();
    let err = run(
        &catalog,
        store,
        &cfg,
        &EigenClip::default(),
        &Diagnostics::default(),
        &warnings,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InsufficientBandwidth {
            available: 8,
            requested: 32
        }
    ));
}
