// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Discrete Legendre transform between multipole-space spectra and
//! angle-space correlation functions.
//!
//! For bandwidth `bw` (one plus the maximum multipole), the correlation
//! function is sampled at the `2·bw` Chebyshev-style nodes
//! `x_j = cos((2j+1)·π/(4·bw))`. The quadrature weights make the inverse
//! transform exact for any polynomial of degree below `2·bw`, so a forward
//! transform followed by the inverse reproduces a band-limited spectrum to
//! machine precision.
//!
//! Conventions: `forward` produces
//! `ξ(θ_j) = Σ_l (2l+1)/(4π) · C_l · P_l(x_j)` and `inverse` recovers
//! `C_l = 2π · Σ_j w_j · ξ(θ_j) · P_l(x_j)`.
//!
//! The Legendre table and weight vector are computed once per run and shared
//! read-only across all parallel tasks.

use std::f64::consts::PI;
use thiserror::Error;

pub type DltResult<T> = Result<T, DltError>;

#[derive(Debug, Error)]
pub enum DltError {
    #[error("bandwidth must be at least 1")]
    ZeroBandwidth,
    #[error("spectrum buffer holds {found} multipoles, bandwidth needs {expected}")]
    SpectrumLength { expected: usize, found: usize },
    #[error("correlation buffer holds {found} samples, bandwidth needs {expected}")]
    CorrelationLength { expected: usize, found: usize },
}

/// Precomputed Legendre-polynomial table and quadrature weights for one
/// bandwidth. O(bw²) storage for the table, O(bw) for the weights.
#[derive(Clone, Debug)]
pub struct LegendreTable {
    bandwidth: usize,
    /// cos θ_j at the 2·bw quadrature nodes.
    nodes: Vec<f64>,
    /// Quadrature weights, one per node.
    weights: Vec<f64>,
    /// P_l(x_j), row l (l < bw), column j (j < 2·bw).
    table: Vec<f64>,
}

impl LegendreTable {
    pub fn new(bandwidth: usize) -> DltResult<Self> {
        if bandwidth == 0 {
            return Err(DltError::ZeroBandwidth);
        }
        let n = 2 * bandwidth;
        let mut nodes = Vec::with_capacity(n);
        for j in 0..n {
            let angle = (2 * j + 1) as f64 * PI / (2.0 * n as f64);
            nodes.push(angle.cos());
        }

        let weights = quadrature_weights(bandwidth);

        // Three-term recurrence per node:
        // (l+1)·P_{l+1}(x) = (2l+1)·x·P_l(x) − l·P_{l−1}(x).
        let mut table = vec![0.0; bandwidth * n];
        for (j, &x) in nodes.iter().enumerate() {
            table[j] = 1.0;
            if bandwidth > 1 {
                table[n + j] = x;
            }
            for l in 1..bandwidth.saturating_sub(1) {
                let lf = l as f64;
                table[(l + 1) * n + j] =
                    ((2.0 * lf + 1.0) * x * table[l * n + j] - lf * table[(l - 1) * n + j])
                        / (lf + 1.0);
            }
        }

        Ok(Self {
            bandwidth,
            nodes,
            weights,
            table,
        })
    }

    pub fn bandwidth(&self) -> usize {
        self.bandwidth
    }

    /// Number of angular samples (2·bandwidth).
    pub fn n_angles(&self) -> usize {
        2 * self.bandwidth
    }

    /// Sampling angles θ_j in degrees, for diagnostic output.
    pub fn angles_deg(&self) -> Vec<f64> {
        self.nodes
            .iter()
            .map(|&x| x.acos() * 180.0 / PI)
            .collect()
    }

    /// Multipole-space → angle-space: fills `correlation` with ξ(θ_j).
    pub fn forward(&self, spectrum: &[f64], correlation: &mut [f64]) -> DltResult<()> {
        let n = self.n_angles();
        if spectrum.len() != self.bandwidth {
            return Err(DltError::SpectrumLength {
                expected: self.bandwidth,
                found: spectrum.len(),
            });
        }
        if correlation.len() != n {
            return Err(DltError::CorrelationLength {
                expected: n,
                found: correlation.len(),
            });
        }
        correlation.fill(0.0);
        for (l, &cl) in spectrum.iter().enumerate() {
            if cl == 0.0 {
                continue;
            }
            let coeff = cl * (2.0 * l as f64 + 1.0) / (4.0 * PI);
            let row = &self.table[l * n..(l + 1) * n];
            for (out, &p) in correlation.iter_mut().zip(row) {
                *out += coeff * p;
            }
        }
        Ok(())
    }

    /// Angle-space → multipole-space: fills `spectrum` with C_l.
    pub fn inverse(&self, correlation: &[f64], spectrum: &mut [f64]) -> DltResult<()> {
        let n = self.n_angles();
        if correlation.len() != n {
            return Err(DltError::CorrelationLength {
                expected: n,
                found: correlation.len(),
            });
        }
        if spectrum.len() != self.bandwidth {
            return Err(DltError::SpectrumLength {
                expected: self.bandwidth,
                found: spectrum.len(),
            });
        }
        for (l, out) in spectrum.iter_mut().enumerate() {
            let row = &self.table[l * n..(l + 1) * n];
            let mut sum = 0.0;
            for ((&xi, &w), &p) in correlation.iter().zip(&self.weights).zip(row) {
                sum += xi * w * p;
            }
            *out = 2.0 * PI * sum;
        }
        Ok(())
    }
}

/// Quadrature weights for the Chebyshev-style node set: exact for
/// polynomials of degree below 2·bw (Driscoll–Healy).
fn quadrature_weights(bandwidth: usize) -> Vec<f64> {
    let n = 2 * bandwidth;
    let fudge = PI / (2.0 * n as f64);
    let mut weights = Vec::with_capacity(n);
    for j in 0..n {
        let arg = (2 * j + 1) as f64 * fudge;
        let mut sum = 0.0;
        for k in 0..bandwidth {
            let odd = (2 * k + 1) as f64;
            sum += (odd * arg).sin() / odd;
        }
        weights.push(sum * arg.sin() * 4.0 / n as f64);
    }
    weights
}
