// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-multipole covariance matrices over all fields.
//!
//! Assembly turns the per-pair spectra into one dense symmetric matrix per
//! multipole, fills unset entries from their transpose, and validates the
//! basic statistical properties: non-negative diagonals and correlations
//! inside [-1, 1]. Out-of-range correlations trigger a one-shot variance
//! inflation before being declared a (non-fatal) problem.

use crate::warnings::WarningSink;
use nalgebra::DMatrix;
use thiserror::Error;
use tracing::info;

pub type CovarianceResult<T> = Result<T, CovarianceError>;

#[derive(Debug, Error)]
pub enum CovarianceError {
    #[error("pair ({i}, {j}) could not be set because ({j}, {i}) was not set either")]
    MissingPair { i: usize, j: usize },
    #[error("spectrum for pair ({i}, {j}) holds {found} multipoles, bandwidth needs {expected}")]
    SpectrumLength {
        i: usize,
        j: usize,
        expected: usize,
        found: usize,
    },
}

/// Symmetric bookkeeping of which ordered pairs have been filled.
#[derive(Clone, Debug)]
pub struct PairFlags {
    n: usize,
    set: Vec<bool>,
}

impl PairFlags {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            set: vec![false; n * n],
        }
    }

    pub fn mark(&mut self, i: usize, j: usize) {
        self.set[i * self.n + j] = true;
    }

    pub fn is_set(&self, i: usize, j: usize) -> bool {
        self.set[i * self.n + j]
    }
}

/// One dense symmetric matrix per multipole in `0..bandwidth`.
#[derive(Clone, Debug)]
pub struct CovarianceSet {
    n_fields: usize,
    mats: Vec<DMatrix<f64>>,
}

impl CovarianceSet {
    pub fn zeros(bandwidth: usize, n_fields: usize) -> Self {
        Self {
            n_fields,
            mats: vec![DMatrix::zeros(n_fields, n_fields); bandwidth],
        }
    }

    pub fn bandwidth(&self) -> usize {
        self.mats.len()
    }

    pub fn n_fields(&self) -> usize {
        self.n_fields
    }

    pub fn matrix(&self, l: usize) -> &DMatrix<f64> {
        &self.mats[l]
    }

    pub fn matrix_mut(&mut self, l: usize) -> &mut DMatrix<f64> {
        &mut self.mats[l]
    }

    pub(crate) fn matrices_mut(&mut self) -> &mut [DMatrix<f64>] {
        &mut self.mats
    }

    pub(crate) fn into_matrices(self) -> Vec<DMatrix<f64>> {
        self.mats
    }

    /// Writes one pair's dense spectrum into its matrix entry at every
    /// multipole.
    pub fn set_pair(&mut self, i: usize, j: usize, spectrum: &[f64]) -> CovarianceResult<()> {
        if spectrum.len() != self.mats.len() {
            return Err(CovarianceError::SpectrumLength {
                i,
                j,
                expected: self.mats.len(),
                found: spectrum.len(),
            });
        }
        for (mat, &cl) in self.mats.iter_mut().zip(spectrum) {
            mat[(i, j)] = cl;
        }
        Ok(())
    }

    /// Reads one pair's spectrum back out of the matrices.
    pub fn extract_pair(&self, i: usize, j: usize) -> Vec<f64> {
        self.mats.iter().map(|mat| mat[(i, j)]).collect()
    }

    /// Fills every unset entry from its transpose. When both `(i, j)` and
    /// `(j, i)` are unset the pair is either zeroed (`allow_missing`) or the
    /// assembly fails naming the pair.
    pub fn complete_symmetry(
        &mut self,
        flags: &mut PairFlags,
        allow_missing: bool,
    ) -> CovarianceResult<()> {
        let n = self.n_fields;
        for i in 0..n {
            for j in 0..n {
                if flags.is_set(i, j) {
                    continue;
                }
                if !flags.is_set(j, i) {
                    if !allow_missing {
                        return Err(CovarianceError::MissingPair { i, j });
                    }
                    for mat in self.mats.iter_mut() {
                        mat[(j, i)] = 0.0;
                    }
                    flags.mark(j, i);
                }
                for mat in self.mats.iter_mut() {
                    mat[(i, j)] = mat[(j, i)];
                }
                flags.mark(i, j);
            }
        }
        Ok(())
    }

    /// Validates diagonals and correlations over the active multipole range
    /// (inclusive). Negative diagonals warn; zero diagonals are floored to
    /// `min_diag_frac` times the smallest positive diagonal in the range
    /// when that fraction is positive, and warn otherwise. Correlations
    /// outside [-1, 1] inflate both variances once by `1 + bad_corr_frac`
    /// and warn if the recheck still fails.
    pub fn validate(
        &mut self,
        lmin: usize,
        lmax: usize,
        bad_corr_frac: f64,
        min_diag_frac: f64,
        warnings: &WarningSink,
    ) {
        let n = self.n_fields;

        let mut min_diag = f64::INFINITY;
        if min_diag_frac > 0.0 {
            for l in lmin..=lmax {
                for i in 0..n {
                    let v = self.mats[l][(i, i)];
                    if v > 0.0 && v < min_diag {
                        min_diag = v;
                    }
                }
            }
        }

        for l in lmin..=lmax {
            let mat = &mut self.mats[l];
            for i in 0..n {
                if mat[(i, i)] < 0.0 {
                    warnings.warn(format_args!(
                        "covariance matrix (l={l}) element [{i}, {i}] is negative"
                    ));
                }
                if mat[(i, i)] == 0.0 {
                    if min_diag_frac > 0.0 && min_diag.is_finite() {
                        mat[(i, i)] = min_diag_frac * min_diag;
                    } else {
                        warnings.warn(format_args!(
                            "covariance matrix (l={l}) element [{i}, {i}] is zero"
                        ));
                    }
                }
                for j in (i + 1)..n {
                    let corr = mat[(i, j)] / (mat[(i, i)] * mat[(j, j)]).sqrt();
                    if corr.abs() > 1.0 {
                        info!(
                            "covariance matrix (l={l}) element [{i}, {j}] gives correlation \
                             {corr}; inflating variances by {bad_corr_frac}"
                        );
                        mat[(i, i)] *= 1.0 + bad_corr_frac;
                        mat[(j, j)] *= 1.0 + bad_corr_frac;
                        let recheck = mat[(i, j)] / (mat[(i, i)] * mat[(j, j)]).sqrt();
                        if recheck.abs() > 1.0 {
                            warnings.warn(format_args!(
                                "variance inflation could not bring correlation for (l={l}) \
                                 element [{i}, {j}] inside [-1, 1]: {recheck}"
                            ));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn transpose_fills_unset_entries() {
        let mut set = CovarianceSet::zeros(3, 2);
        let mut flags = PairFlags::new(2);
        set.set_pair(0, 0, &[1.0, 1.0, 1.0]).unwrap();
        flags.mark(0, 0);
        set.set_pair(1, 1, &[2.0, 2.0, 2.0]).unwrap();
        flags.mark(1, 1);
        set.set_pair(0, 1, &[0.5, 0.4, 0.3]).unwrap();
        flags.mark(0, 1);
        set.complete_symmetry(&mut flags, false).unwrap();
        for l in 0..3 {
            let mat = set.matrix(l);
            assert_eq!(mat[(1, 0)], mat[(0, 1)]);
        }
    }

    #[test]
    fn missing_pair_is_fatal_without_allow_missing() {
        let mut set = CovarianceSet::zeros(2, 2);
        let mut flags = PairFlags::new(2);
        set.set_pair(0, 0, &[1.0, 1.0]).unwrap();
        flags.mark(0, 0);
        set.set_pair(0, 1, &[0.5, 0.5]).unwrap();
        flags.mark(0, 1);
        // (1, 1) and its transpose are both unset.
        let err = set.complete_symmetry(&mut flags, false).unwrap_err();
        assert!(matches!(err, CovarianceError::MissingPair { i: 1, j: 1 }));
    }

    #[test]
    fn missing_pair_zeroed_when_allowed() {
        let mut set = CovarianceSet::zeros(2, 2);
        let mut flags = PairFlags::new(2);
        set.set_pair(0, 0, &[1.0, 1.0]).unwrap();
        flags.mark(0, 0);
        set.set_pair(1, 1, &[1.0, 1.0]).unwrap();
        flags.mark(1, 1);
        set.complete_symmetry(&mut flags, true).unwrap();
        assert_eq!(set.matrix(0)[(0, 1)], 0.0);
        assert_eq!(set.matrix(0)[(1, 0)], 0.0);
    }

    #[test]
    fn absurd_correlation_inflates_both_variances_once() {
        let mut set = CovarianceSet::zeros(1, 2);
        let mut flags = PairFlags::new(2);
        set.set_pair(0, 0, &[1.0]).unwrap();
        flags.mark(0, 0);
        set.set_pair(1, 1, &[1.0]).unwrap();
        flags.mark(1, 1);
        set.set_pair(0, 1, &[1.2]).unwrap();
        flags.mark(0, 1);
        set.complete_symmetry(&mut flags, false).unwrap();

        let warnings = WarningSink::new();
        set.validate(0, 0, 0.1, 0.0, &warnings);
        // Both diagonals inflated by exactly 10%; the recheck still fails
        // (1.2/1.1 > 1), which is a warning rather than an error.
        assert_relative_eq!(set.matrix(0)[(0, 0)], 1.1);
        assert_relative_eq!(set.matrix(0)[(1, 1)], 1.1);
        assert_eq!(warnings.count(), 1);
    }

    #[test]
    fn zero_diagonal_floored_by_min_diag_fraction() {
        let mut set = CovarianceSet::zeros(1, 2);
        set.matrix_mut(0)[(0, 0)] = 4.0;
        let warnings = WarningSink::new();
        set.validate(0, 0, 0.1, 0.5, &warnings);
        assert_relative_eq!(set.matrix(0)[(1, 1)], 2.0);
        assert_eq!(warnings.count(), 0);
    }
}
