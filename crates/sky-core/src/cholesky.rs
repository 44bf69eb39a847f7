// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-multipole Cholesky factorization of the regularized covariance
//! matrices into the triangular mixing matrices used by the sampler.
//!
//! Factorization consumes the covariance set: once the mixing matrices
//! exist the covariance data has served its purpose. A failed factorization
//! (matrix not positive definite) is a warning per multipole; any failure
//! makes the run fatal once the whole range has been attempted.

use crate::covariance::CovarianceSet;
use crate::warnings::WarningSink;
use nalgebra::{Cholesky, DMatrix};
use rayon::prelude::*;
use thiserror::Error;

pub type CholeskyResult<T> = Result<T, CholeskyError>;

#[derive(Debug, Error)]
pub enum CholeskyError {
    #[error("Cholesky decomposition failed {failures} time(s) over the active multipole range")]
    Factorization { failures: usize },
    #[error("factorization range {lmin}..={lmax} exceeds bandwidth {bandwidth}")]
    RangeOutOfBounds {
        lmin: usize,
        lmax: usize,
        bandwidth: usize,
    },
    #[error("no mixing matrix for l={l}; the active range is {lmin}..={lmax}")]
    OutOfRange { l: usize, lmin: usize, lmax: usize },
}

/// Lower-triangular mixing matrices for the active multipole range,
/// read-only once built.
#[derive(Clone, Debug)]
pub struct MixingSet {
    lmin: usize,
    lmax: usize,
    n_fields: usize,
    factors: Vec<DMatrix<f64>>,
}

impl MixingSet {
    pub fn lmin(&self) -> usize {
        self.lmin
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    pub fn n_fields(&self) -> usize {
        self.n_fields
    }

    /// The triangular factor for one multipole in the active range.
    pub fn factor(&self, l: usize) -> CholeskyResult<&DMatrix<f64>> {
        if l < self.lmin || l > self.lmax {
            return Err(CholeskyError::OutOfRange {
                l,
                lmin: self.lmin,
                lmax: self.lmax,
            });
        }
        Ok(&self.factors[l - self.lmin])
    }
}

/// Factorizes every matrix in `lmin..=lmax`, destroying the covariance set.
pub fn factorize_range(
    set: CovarianceSet,
    lmin: usize,
    lmax: usize,
    warnings: &WarningSink,
) -> CholeskyResult<MixingSet> {
    if lmax >= set.bandwidth() || lmin > lmax {
        return Err(CholeskyError::RangeOutOfBounds {
            lmin,
            lmax,
            bandwidth: set.bandwidth(),
        });
    }
    let n_fields = set.n_fields();
    let mut mats = set.into_matrices();

    let factors: Vec<Option<DMatrix<f64>>> = mats
        .drain(lmin..=lmax)
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|matrix| Cholesky::new(matrix).map(|c| c.unpack()))
        .collect();

    let mut resolved = Vec::with_capacity(factors.len());
    let mut failures = 0;
    for (offset, factor) in factors.into_iter().enumerate() {
        match factor {
            Some(l) => resolved.push(l),
            None => {
                warnings.warn(format_args!(
                    "Cholesky decomposition failed: covariance matrix for l={} is not \
                     positive-definite",
                    lmin + offset
                ));
                failures += 1;
                resolved.push(DMatrix::zeros(n_fields, n_fields));
            }
        }
    }

    if failures > 0 {
        return Err(CholeskyError::Factorization { failures });
    }

    Ok(MixingSet {
        lmin,
        lmax,
        n_fields,
        factors: resolved,
    })
}
