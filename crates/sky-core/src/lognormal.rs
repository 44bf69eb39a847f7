// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pointwise mapping of correlation-function samples between the lognormal
//! field domain and the associated Gaussian field domain.
//!
//! Both directions operate in place on the sample buffer (explicit may-alias
//! contract: callers reuse one scratch buffer through the whole chain). The
//! lognormal→Gaussian direction can fail per sample when the logarithm
//! argument is non-positive; failed samples receive the sentinel value and
//! the whole call reports a domain error, which callers treat as fatal for
//! the field pair.

use thiserror::Error;

/// Sentinel written over samples whose logarithm argument was non-positive.
pub const BAD_CORR: f64 = -666.0;

pub type LognormalResult<T> = Result<T, LognormalError>;

#[derive(Debug, Error)]
pub enum LognormalError {
    #[error("{flagged} correlation sample(s) lead to a non-positive log argument, first at sample {first_index}; flagged entries set to {BAD_CORR}")]
    BadLogArgument { first_index: usize, flagged: usize },
}

/// Transforms a correlation function of lognormal variables into the
/// correlation function of the associated Gaussian variables:
/// `ξ_g = ln(1 + ξ_ln / ((mean1+shift1)·(mean2+shift2)))`.
///
/// Every sample is scanned even after a failure so the error reports the
/// full extent of the problem.
pub fn to_gaussian(
    xi: &mut [f64],
    mean1: f64,
    shift1: f64,
    mean2: f64,
    shift2: f64,
) -> LognormalResult<()> {
    let denom = (mean1 + shift1) * (mean2 + shift2);
    let mut first_index = None;
    let mut flagged = 0;
    for (index, sample) in xi.iter_mut().enumerate() {
        let arg = 1.0 + *sample / denom;
        if arg <= 0.0 {
            *sample = BAD_CORR;
            flagged += 1;
            first_index.get_or_insert(index);
        } else {
            *sample = arg.ln();
        }
    }
    match first_index {
        Some(first_index) => Err(LognormalError::BadLogArgument {
            first_index,
            flagged,
        }),
        None => Ok(()),
    }
}

/// Inverse direction, always defined:
/// `ξ_ln = (exp(ξ_g) − 1)·(mean1+shift1)·(mean2+shift2)`.
pub fn to_lognormal(xi: &mut [f64], mean1: f64, shift1: f64, mean2: f64, shift2: f64) {
    let factor = (mean1 + shift1) * (mean2 + shift2);
    for sample in xi.iter_mut() {
        *sample = (sample.exp() - 1.0) * factor;
    }
}
