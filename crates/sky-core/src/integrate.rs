// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Romberg integration over arbitrary closures.
//!
//! Trapezoid refinements combined with polynomial extrapolation to zero step
//! size. The integrand is any `Fn(f64) -> f64`; no function-pointer
//! plumbing.

use thiserror::Error;

const EPS: f64 = 1.0e-16;
const JMAX: usize = 40;
const K: usize = 12;

pub type IntegrateResult<T> = Result<T, IntegrateError>;

#[derive(Debug, Error)]
pub enum IntegrateError {
    #[error("integral did not converge within {JMAX} refinement steps")]
    TooManySteps,
    #[error("repeated abscissa in polynomial extrapolation")]
    DegenerateAbscissa,
}

/// Integrates `f` over `[a, b]` by Romberg's method.
pub fn romberg<F: Fn(f64) -> f64>(f: F, a: f64, b: f64) -> IntegrateResult<f64> {
    let mut s_values = [0.0f64; JMAX + 1];
    let mut h_values = [0.0f64; JMAX + 2];
    h_values[0] = 1.0;

    let mut trapezoid = 0.0;
    for j in 0..JMAX {
        trapezoid = refine_trapezoid(&f, a, b, j, trapezoid);
        s_values[j] = trapezoid;
        if j + 1 >= K {
            let window = j + 1 - K;
            let (estimate, error) =
                polynomial_extrapolate(&h_values[window..=j], &s_values[window..=j])?;
            if error.abs() <= EPS * estimate.abs() {
                return Ok(estimate);
            }
        }
        h_values[j + 1] = 0.25 * h_values[j];
    }
    Err(IntegrateError::TooManySteps)
}

/// j-th stage of the trapezoid refinement: doubles the number of interior
/// points and reuses the previous estimate.
fn refine_trapezoid<F: Fn(f64) -> f64>(f: &F, a: f64, b: f64, stage: usize, previous: f64) -> f64 {
    if stage == 0 {
        return 0.5 * (b - a) * (f(a) + f(b));
    }
    let points = 1usize << (stage - 1);
    let step = (b - a) / points as f64;
    let mut x = a + 0.5 * step;
    let mut sum = 0.0;
    for _ in 0..points {
        sum += f(x);
        x += step;
    }
    0.5 * (previous + (b - a) * sum / points as f64)
}

/// Neville's algorithm evaluated at zero step size; returns the estimate and
/// the last correction as an error indicator.
fn polynomial_extrapolate(xs: &[f64], ys: &[f64]) -> IntegrateResult<(f64, f64)> {
    let n = xs.len();
    let mut c = ys.to_vec();
    let mut d = ys.to_vec();

    let mut nearest = 0;
    for (i, &x) in xs.iter().enumerate() {
        if x.abs() < xs[nearest].abs() {
            nearest = i;
        }
    }
    let mut estimate = ys[nearest];
    let mut correction = 0.0;
    let mut ns = nearest;

    for m in 1..n {
        for i in 0..n - m {
            let ho = xs[i];
            let hp = xs[i + m];
            let w = c[i + 1] - d[i];
            let den = ho - hp;
            if den == 0.0 {
                return Err(IntegrateError::DegenerateAbscissa);
            }
            let den = w / den;
            d[i] = hp * den;
            c[i] = ho * den;
        }
        correction = if 2 * ns < n - m {
            c[ns]
        } else {
            ns = ns.saturating_sub(1);
            d[ns]
        };
        estimate += correction;
    }
    Ok((estimate, correction))
}
