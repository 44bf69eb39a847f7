// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Numerical repair of covariance matrices that are not positive
//! semidefinite.
//!
//! The engine only consumes the [`Regularizer`] contract; [`EigenClip`] is
//! the default implementation. The driver runs a multipole range in
//! parallel, records the maximum fractional change each repair introduced,
//! warns per matrix that exhausted its iteration budget, and turns any such
//! exhaustion into a run-fatal error once every matrix has been attempted.

use crate::covariance::CovarianceSet;
use crate::warnings::WarningSink;
use nalgebra::{DMatrix, SymmetricEigen};
use rayon::prelude::*;
use thiserror::Error;
use tracing::info;

pub type RegularizeResult<T> = Result<T, RegularizeError>;

#[derive(Debug, Error)]
pub enum RegularizeError {
    #[error("regularization exhausted its iteration budget for {exhausted} matrix(es); worst fractional change {worst_change} at l={worst_l}")]
    Exhausted {
        exhausted: usize,
        worst_l: usize,
        worst_change: f64,
    },
    #[error("regularization range {lstart}..={lend} exceeds bandwidth {bandwidth}")]
    RangeOutOfBounds {
        lstart: usize,
        lend: usize,
        bandwidth: usize,
    },
}

/// Outcome of repairing one matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegularizeOutcome {
    /// The matrix was already acceptable.
    Unchanged,
    /// Repaired within the iteration budget.
    Converged { steps: usize },
    /// The iteration budget ran out before the matrix became acceptable.
    Exhausted { steps: usize },
}

/// Contract consumed by the engine: repair `matrix` in place so that it is
/// positive semidefinite, reporting how the attempt went.
pub trait Regularizer: Sync {
    fn regularize(&self, matrix: &mut DMatrix<f64>) -> RegularizeOutcome;
}

/// Iterative eigenvalue clipping: clamp negative eigenvalues, rebuild, put
/// the original variances back, and repeat until the smallest eigenvalue is
/// acceptable or the step budget runs out. Keeping the variances fixed is
/// what makes the iteration necessary.
#[derive(Clone, Copy, Debug)]
pub struct EigenClip {
    /// Maximum repair iterations per matrix.
    pub max_steps: usize,
    /// Eigenvalues below this are clamped up to it.
    pub eigen_floor: f64,
    /// Relative tolerance for accepting a slightly negative spectrum.
    pub tolerance: f64,
}

impl Default for EigenClip {
    fn default() -> Self {
        Self {
            max_steps: 100,
            eigen_floor: 0.0,
            tolerance: 1e-12,
        }
    }
}

impl Regularizer for EigenClip {
    fn regularize(&self, matrix: &mut DMatrix<f64>) -> RegularizeOutcome {
        let diagonal = matrix.diagonal();
        for step in 0..self.max_steps {
            let eigen = SymmetricEigen::new(matrix.clone());
            let max_eig = eigen.eigenvalues.iter().cloned().fold(0.0f64, f64::max);
            let min_eig = eigen
                .eigenvalues
                .iter()
                .cloned()
                .fold(f64::INFINITY, f64::min);
            if min_eig >= -self.tolerance * max_eig.max(f64::MIN_POSITIVE) {
                return if step == 0 {
                    RegularizeOutcome::Unchanged
                } else {
                    RegularizeOutcome::Converged { steps: step }
                };
            }

            let mut clipped = eigen.eigenvalues.clone();
            for value in clipped.iter_mut() {
                if *value < self.eigen_floor {
                    *value = self.eigen_floor;
                }
            }
            let rebuilt =
                &eigen.eigenvectors * DMatrix::from_diagonal(&clipped) * eigen.eigenvectors.transpose();
            *matrix = rebuilt;
            // Variances are data; the repair only redistributes covariances.
            for (i, &d) in diagonal.iter().enumerate() {
                if d > 0.0 {
                    matrix[(i, i)] = d;
                }
            }
        }
        RegularizeOutcome::Exhausted {
            steps: self.max_steps,
        }
    }
}

/// Largest symmetric fractional difference between two matrices,
/// `2|a−b| / (|a|+|b|)`, skipping entries where both are zero.
pub fn max_frac_diff(a: &DMatrix<f64>, b: &DMatrix<f64>) -> f64 {
    let mut max = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let scale = x.abs() + y.abs();
        if scale > 0.0 {
            max = max.max(2.0 * (x - y).abs() / scale);
        }
    }
    max
}

/// What the repair pass did to the whole range.
#[derive(Clone, Debug)]
pub struct RegularizationReport {
    pub lstart: usize,
    pub lend: usize,
    /// Maximum fractional change per multipole, indexed `l - lstart`.
    pub max_change: Vec<f64>,
    /// Multipole with the largest change and that change.
    pub worst_l: usize,
    pub worst_change: f64,
}

/// Repairs every matrix in `lstart..=lend` in parallel. Each exhausted
/// budget is a warning at the moment it is discovered; any exhaustion makes
/// the whole pass fail after all matrices have been attempted.
pub fn regularize_range(
    set: &mut CovarianceSet,
    lstart: usize,
    lend: usize,
    regularizer: &dyn Regularizer,
    warnings: &WarningSink,
) -> RegularizeResult<RegularizationReport> {
    if lend >= set.bandwidth() || lstart > lend {
        return Err(RegularizeError::RangeOutOfBounds {
            lstart,
            lend,
            bandwidth: set.bandwidth(),
        });
    }

    let results: Vec<(RegularizeOutcome, f64)> = set.matrices_mut()[lstart..=lend]
        .par_iter_mut()
        .map(|matrix| {
            let before = matrix.clone();
            let outcome = regularizer.regularize(matrix);
            (outcome, max_frac_diff(matrix, &before))
        })
        .collect();

    let mut exhausted = 0;
    let mut worst_l = lstart;
    let mut worst_change = 0.0;
    for (offset, (outcome, change)) in results.iter().enumerate() {
        let l = lstart + offset;
        if *change > worst_change {
            worst_change = *change;
            worst_l = l;
        }
        if let RegularizeOutcome::Exhausted { steps } = outcome {
            warnings.warn(format_args!(
                "regularization for l={l} reached its budget of {steps} steps \
                 with max fractional change {change}"
            ));
            exhausted += 1;
        }
    }

    info!(
        "max fractional regularization change for {lstart}<=l<={lend} at l={worst_l}: {worst_change}"
    );

    if exhausted > 0 {
        return Err(RegularizeError::Exhausted {
            exhausted,
            worst_l,
            worst_change,
        });
    }

    Ok(RegularizationReport {
        lstart,
        lend,
        max_change: results.into_iter().map(|(_, change)| change).collect(),
        worst_l,
        worst_change,
    })
}
