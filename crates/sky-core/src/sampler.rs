// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Generation of correlated spherical-harmonic coefficients.
//!
//! One task per (l, m) pair: draw one independent complex unit-variance
//! Gaussian per field, multiply the vector by the multipole's triangular
//! mixing matrix, store the correlated result. For m = 0 the coefficient is
//! purely real with full unit variance; for m > 0 the real and imaginary
//! parts each carry variance one half.
//!
//! # Randomness contract
//!
//! The task range is split into `worker_count` contiguous blocks. Worker `w`
//! owns the random stream seeded with `base_seed + (w+1)·STREAM_OFFSET`;
//! stream index 0 is reserved for serial use. The mapping from task to
//! worker depends only on the configured worker count — not on how rayon
//! schedules the blocks — so a fixed `(base_seed, worker_count)` reproduces
//! the output bit for bit. Changing the worker count changes the
//! task→stream assignment and therefore the realization, even for the same
//! base seed: reproducibility is guaranteed only for a fixed worker count.
//! Each block is a disjoint slice of the output, so no two tasks ever write
//! the same memory.

use crate::cholesky::MixingSet;
use crate::warnings::WarningSink;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_1_SQRT_2;
use thiserror::Error;

/// Seed spacing between worker streams. Seeds for different workers can
/// never collide as long as the base seed stays below this offset.
pub const STREAM_OFFSET: u64 = 10_000_000;

pub type SamplerResult<T> = Result<T, SamplerError>;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("sampler range {lmin}..={lmax} does not match the mixing matrices' {have_lmin}..={have_lmax}")]
    RangeMismatch {
        lmin: usize,
        lmax: usize,
        have_lmin: usize,
        have_lmax: usize,
    },
    #[error(transparent)]
    Cholesky(#[from] crate::cholesky::CholeskyError),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub base_seed: u64,
    pub worker_count: usize,
    pub lmin: usize,
    pub lmax: usize,
}

/// One field's spherical-harmonic coefficients, packed over the triangle
/// 0 ≤ m ≤ l ≤ lmax at index `l(l+1)/2 + m`.
#[derive(Clone, Debug)]
pub struct HarmonicCoefficients {
    lmax: usize,
    data: Vec<Complex64>,
}

impl HarmonicCoefficients {
    pub fn zeros(lmax: usize) -> Self {
        Self {
            lmax,
            data: vec![Complex64::new(0.0, 0.0); triangle_index(lmax, lmax) + 1],
        }
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    pub fn get(&self, l: usize, m: usize) -> Complex64 {
        debug_assert!(m <= l && l <= self.lmax);
        self.data[triangle_index(l, m)]
    }

    /// Packed coefficient storage, triangle order.
    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }
}

#[inline]
fn triangle_index(l: usize, m: usize) -> usize {
    l * (l + 1) / 2 + m
}

/// Inverse of [`triangle_index`], guarded against floating-point rounding at
/// triangle boundaries.
fn task_to_lm(j: usize) -> (usize, usize) {
    let mut l = (((8.0 * j as f64 + 1.0).sqrt() - 1.0) / 2.0) as usize;
    while (l + 1) * (l + 2) / 2 <= j {
        l += 1;
    }
    while l * (l + 1) / 2 > j {
        l -= 1;
    }
    (l, j - l * (l + 1) / 2)
}

/// Draws the correlated coefficients for every field over the configured
/// multipole window. Returns one coefficient array per field; entries
/// outside the window stay zero.
pub fn sample_coefficients(
    mixing: &MixingSet,
    config: &SamplerConfig,
    warnings: &WarningSink,
) -> SamplerResult<Vec<HarmonicCoefficients>> {
    if config.worker_count == 0 {
        return Err(SamplerError::NoWorkers);
    }
    if config.lmin < mixing.lmin() || config.lmax > mixing.lmax() {
        return Err(SamplerError::RangeMismatch {
            lmin: config.lmin,
            lmax: config.lmax,
            have_lmin: mixing.lmin(),
            have_lmax: mixing.lmax(),
        });
    }
    if config.base_seed >= STREAM_OFFSET {
        warnings.warn(format_args!(
            "base seed {} reaches the stream offset {STREAM_OFFSET}; worker streams may overlap",
            config.base_seed
        ));
    }

    let n_fields = mixing.n_fields();
    let factors: Vec<&nalgebra::DMatrix<f64>> = (config.lmin..=config.lmax)
        .map(|l| mixing.factor(l))
        .collect::<Result<_, _>>()?;
    let jmin = triangle_index(config.lmin, 0);
    let jmax = triangle_index(config.lmax, config.lmax);
    let n_tasks = jmax - jmin + 1;

    // One row of n_fields correlated draws per task; rows are handed to
    // workers as disjoint contiguous blocks.
    let mut rows = vec![Complex64::new(0.0, 0.0); n_tasks * n_fields];
    let rows_per_worker = n_tasks.div_ceil(config.worker_count);

    rows.par_chunks_mut(rows_per_worker * n_fields)
        .enumerate()
        .for_each(|(worker, block)| {
            let seed = config.base_seed + (worker as u64 + 1) * STREAM_OFFSET;
            let mut rng = StdRng::seed_from_u64(seed);
            let mut draws = vec![Complex64::new(0.0, 0.0); n_fields];
            let first_task = jmin + worker * rows_per_worker;
            for (offset, row) in block.chunks_mut(n_fields).enumerate() {
                let (l, m) = task_to_lm(first_task + offset);
                for draw in draws.iter_mut() {
                    *draw = if m == 0 {
                        Complex64::new(rng.sample(StandardNormal), 0.0)
                    } else {
                        let re: f64 = rng.sample(StandardNormal);
                        let im: f64 = rng.sample(StandardNormal);
                        Complex64::new(re * FRAC_1_SQRT_2, im * FRAC_1_SQRT_2)
                    };
                }
                // The factor is lower triangular; only entries j <= i count.
                let factor = factors[l - config.lmin];
                for (i, out) in row.iter_mut().enumerate() {
                    let mut acc = Complex64::new(0.0, 0.0);
                    for (j, draw) in draws.iter().enumerate().take(i + 1) {
                        acc += *draw * factor[(i, j)];
                    }
                    *out = acc;
                }
            }
        });

    // Scatter the task rows into per-field coefficient arrays.
    let mut coefficients = vec![HarmonicCoefficients::zeros(config.lmax); n_fields];
    for (task, row) in rows.chunks(n_fields).enumerate() {
        for (field, &value) in row.iter().enumerate() {
            coefficients[field].data[jmin + task] = value;
        }
    }
    Ok(coefficients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::CovarianceSet;
    use crate::cholesky::factorize_range;
    use approx::assert_relative_eq;

    fn mixing(n_fields: usize, lmax: usize, rho: f64) -> MixingSet {
        let mut set = CovarianceSet::zeros(lmax + 1, n_fields);
        for l in 0..=lmax {
            let m = set.matrix_mut(l);
            for i in 0..n_fields {
                m[(i, i)] = 1.0;
            }
            if n_fields > 1 {
                m[(0, 1)] = rho;
                m[(1, 0)] = rho;
            }
        }
        let warnings = WarningSink::new();
        factorize_range(set, 0, lmax, &warnings).unwrap()
    }

    fn config(seed: u64, workers: usize, lmax: usize) -> SamplerConfig {
        SamplerConfig {
            base_seed: seed,
            worker_count: workers,
            lmin: 0,
            lmax,
        }
    }

    #[test]
    fn triangle_mapping_round_trips() {
        for j in 0..5000 {
            let (l, m) = task_to_lm(j);
            assert!(m <= l);
            assert_eq!(triangle_index(l, m), j);
        }
    }

    #[test]
    fn m_zero_coefficients_are_real() {
        let mixing = mixing(2, 8, 0.5);
        let warnings = WarningSink::new();
        let coeffs = sample_coefficients(&mixing, &config(7, 3, 8), &warnings).unwrap();
        for field in &coeffs {
            for l in 0..=8 {
                assert_eq!(field.get(l, 0).im, 0.0);
            }
        }
    }

    #[test]
    fn same_seed_and_worker_count_reproduce_bit_identical_output() {
        let mixing = mixing(2, 16, 0.3);
        let warnings = WarningSink::new();
        let first = sample_coefficients(&mixing, &config(99, 4, 16), &warnings).unwrap();
        let second = sample_coefficients(&mixing, &config(99, 4, 16), &warnings).unwrap();
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.as_slice(), b.as_slice());
        }
    }

    #[test]
    fn worker_count_changes_the_realization() {
        let mixing = mixing(1, 16, 0.0);
        let warnings = WarningSink::new();
        let four = sample_coefficients(&mixing, &config(99, 4, 16), &warnings).unwrap();
        let two = sample_coefficients(&mixing, &config(99, 2, 16), &warnings).unwrap();
        assert_ne!(four[0].as_slice(), two[0].as_slice());
    }

    #[test]
    fn draw_order_and_mixing_match_a_manual_replay() {
        // One worker: every task reads stream 1 in task order. Replay the
        // stream by hand and apply the triangular factor to the draws.
        let rho: f64 = 0.6;
        let mixing = mixing(2, 3, rho);
        let warnings = WarningSink::new();
        let coeffs = sample_coefficients(&mixing, &config(5, 1, 3), &warnings).unwrap();

        let l11 = 1.0;
        let l21 = rho;
        let l22 = (1.0 - rho * rho).sqrt();
        let mut rng = StdRng::seed_from_u64(5 + STREAM_OFFSET);
        for j in 0..=triangle_index(3, 3) {
            let (l, m) = task_to_lm(j);
            let draw = |rng: &mut StdRng| -> Complex64 {
                if m == 0 {
                    Complex64::new(rng.sample(StandardNormal), 0.0)
                } else {
                    let re: f64 = rng.sample(StandardNormal);
                    let im: f64 = rng.sample(StandardNormal);
                    Complex64::new(re * FRAC_1_SQRT_2, im * FRAC_1_SQRT_2)
                }
            };
            let z0 = draw(&mut rng);
            let z1 = draw(&mut rng);
            let expected0 = z0 * l11;
            let expected1 = z0 * l21 + z1 * l22;
            let got0 = coeffs[0].get(l, m);
            let got1 = coeffs[1].get(l, m);
            assert_relative_eq!(got0.re, expected0.re, max_relative = 1e-12);
            assert_relative_eq!(got1.re, expected1.re, max_relative = 1e-12);
            assert_relative_eq!(got1.im, expected1.im, max_relative = 1e-12);
        }
    }

    #[test]
    fn coefficients_below_lmin_stay_zero() {
        let mut set = CovarianceSet::zeros(9, 1);
        for l in 0..9 {
            set.matrix_mut(l)[(0, 0)] = 1.0;
        }
        let warnings = WarningSink::new();
        let mixing = factorize_range(set, 2, 8, &warnings).unwrap();
        let cfg = SamplerConfig {
            base_seed: 1,
            worker_count: 2,
            lmin: 2,
            lmax: 8,
        };
        let coeffs = sample_coefficients(&mixing, &cfg, &warnings).unwrap();
        for l in 0..2 {
            for m in 0..=l {
                assert_eq!(coeffs[0].get(l, m), Complex64::new(0.0, 0.0));
            }
        }
        assert_ne!(coeffs[0].get(5, 3), Complex64::new(0.0, 0.0));
    }

    #[test]
    fn oversized_seed_warns_about_stream_overlap() {
        let mixing = mixing(1, 2, 0.0);
        let warnings = WarningSink::new();
        let cfg = SamplerConfig {
            base_seed: STREAM_OFFSET,
            worker_count: 1,
            lmin: 0,
            lmax: 2,
        };
        sample_coefficients(&mixing, &cfg, &warnings).unwrap();
        assert_eq!(warnings.count(), 1);
    }
}
