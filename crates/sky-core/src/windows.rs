// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Multiplicative window transforms applied to the input spectra in place.
//!
//! Order is significant and fixed: constant rescale, Gaussian beam, pixel
//! window, exponential high-multipole suppression. Every transform is
//! elementwise per field pair and runs in parallel across all pairs.

use crate::spectra::SpectrumStore;
use crate::warnings::WarningSink;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub type WindowResult<T> = Result<T, WindowError>;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("pixel window table needs at least 2 samples")]
    PixelTableTooSmall,
    #[error("pixel window multipoles must be finite and strictly increasing (sample {index})")]
    PixelTableOrder { index: usize },
    #[error("suppression scale must be positive when suppression is enabled, got {lsup}")]
    BadSuppressionScale { lsup: f64 },
}

/// Discrete pixel window function w(l), to be squared and spline-evaluated
/// at the (possibly non-integer) input multipoles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PixelWindowTable {
    pub ell: Vec<f64>,
    pub window: Vec<f64>,
}

/// Which window transforms to apply. Field semantics follow the input
/// conventions: `rescale = 1` means off, `beam_sigma_arcmin = 0` means off,
/// suppression is off unless both `suppress_l` and `suppress_index` are
/// non-negative.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WindowConfig {
    pub rescale: f64,
    /// Gaussian beam width (standard deviation) in arcminutes.
    pub beam_sigma_arcmin: f64,
    pub pixel_window: Option<PixelWindowTable>,
    pub suppress_l: f64,
    pub suppress_index: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            rescale: 1.0,
            beam_sigma_arcmin: 0.0,
            pixel_window: None,
            suppress_l: -1.0,
            suppress_index: -1.0,
        }
    }
}

/// Smooth high-multipole cutoff: exp(−(l/l_sup)^index).
pub fn suppress(l: f64, lsup: f64, index: f64) -> f64 {
    (-(l / lsup).powf(index)).exp()
}

/// Applies the configured transforms to every set spectrum, in the fixed
/// order, each parallel over field pairs.
pub fn apply_windows(
    store: &mut SpectrumStore,
    config: &WindowConfig,
    warnings: &WarningSink,
) -> WindowResult<()> {
    if config.rescale != 1.0 {
        let factor = config.rescale;
        info!("re-scaling all spectra by {factor}");
        store
            .entries_mut()
            .par_iter_mut()
            .filter_map(|entry| entry.as_mut())
            .for_each(|samples| {
                for value in samples.value.iter_mut() {
                    *value *= factor;
                }
            });
    }

    if config.beam_sigma_arcmin > 0.0 {
        let sigma_rad = config.beam_sigma_arcmin / 60.0 * std::f64::consts::PI / 180.0;
        let sigma2 = sigma_rad * sigma_rad;
        info!(
            "applying Gaussian beam of {} arcmin to all spectra",
            config.beam_sigma_arcmin
        );
        store
            .entries_mut()
            .par_iter_mut()
            .filter_map(|entry| entry.as_mut())
            .for_each(|samples| {
                for (value, &l) in samples.value.iter_mut().zip(&samples.ell) {
                    *value *= (-l * (l + 1.0) * sigma2).exp();
                }
            });
    }

    if let Some(table) = &config.pixel_window {
        info!("applying the pixel window function to all spectra");
        // The input multipoles can sit anywhere, so fit a spline to the
        // squared window once and evaluate it per sample.
        let squared: Vec<f64> = table.window.iter().map(|w| w * w).collect();
        let spline = CubicSpline::new(&table.ell, &squared)?;
        let domain_end = *table.ell.last().expect("validated non-empty");
        let n_fields = store.n_fields();
        store
            .entries_mut()
            .par_iter_mut()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_mut().map(|samples| (slot, samples)))
            .for_each(|(slot, samples)| {
                if samples.max_multipole() > domain_end {
                    warnings.warn(format_args!(
                        "input spectrum ({}, {}) overshoots the pixel window table \
                         (l={} > {domain_end})",
                        slot / n_fields,
                        slot % n_fields,
                        samples.max_multipole()
                    ));
                }
                for (value, &l) in samples.value.iter_mut().zip(&samples.ell) {
                    *value *= spline.eval(l);
                }
            });
    }

    if config.suppress_l >= 0.0 && config.suppress_index >= 0.0 {
        if config.suppress_l == 0.0 {
            return Err(WindowError::BadSuppressionScale {
                lsup: config.suppress_l,
            });
        }
        let (lsup, index) = (config.suppress_l, config.suppress_index);
        info!("applying exponential suppression (l_sup={lsup}, index={index})");
        store
            .entries_mut()
            .par_iter_mut()
            .filter_map(|entry| entry.as_mut())
            .for_each(|samples| {
                for (value, &l) in samples.value.iter_mut().zip(&samples.ell) {
                    *value *= suppress(l, lsup, index);
                }
            });
    }

    Ok(())
}

/// Natural cubic spline over strictly increasing abscissae. Evaluation
/// clamps to the end values outside the fitted domain; the caller warns on
/// overshoot separately.
#[derive(Clone, Debug)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    second: Vec<f64>,
}

impl CubicSpline {
    pub fn new(x: &[f64], y: &[f64]) -> WindowResult<Self> {
        let n = x.len();
        if n < 2 || y.len() != n {
            return Err(WindowError::PixelTableTooSmall);
        }
        for (index, &xi) in x.iter().enumerate() {
            if !xi.is_finite() || (index > 0 && xi <= x[index - 1]) {
                return Err(WindowError::PixelTableOrder { index });
            }
        }

        // Tridiagonal sweep for the natural second derivatives.
        let mut second = vec![0.0; n];
        let mut scratch = vec![0.0; n];
        for i in 1..n - 1 {
            let sig = (x[i] - x[i - 1]) / (x[i + 1] - x[i - 1]);
            let p = sig * second[i - 1] + 2.0;
            second[i] = (sig - 1.0) / p;
            let slope_right = (y[i + 1] - y[i]) / (x[i + 1] - x[i]);
            let slope_left = (y[i] - y[i - 1]) / (x[i] - x[i - 1]);
            scratch[i] =
                (6.0 * (slope_right - slope_left) / (x[i + 1] - x[i - 1]) - sig * scratch[i - 1])
                    / p;
        }
        for i in (0..n - 1).rev() {
            second[i] = second[i] * second[i + 1] + scratch[i];
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            second,
        })
    }

    pub fn eval(&self, at: f64) -> f64 {
        let n = self.x.len();
        if at <= self.x[0] {
            return self.y[0];
        }
        if at >= self.x[n - 1] {
            return self.y[n - 1];
        }
        let seg = match self
            .x
            .binary_search_by(|probe| probe.partial_cmp(&at).expect("finite abscissae"))
        {
            Ok(hit) => return self.y[hit],
            Err(upper) => upper - 1,
        };
        let h = self.x[seg + 1] - self.x[seg];
        let a = (self.x[seg + 1] - at) / h;
        let b = (at - self.x[seg]) / h;
        a * self.y[seg]
            + b * self.y[seg + 1]
            + ((a.powi(3) - a) * self.second[seg] + (b.powi(3) - b) * self.second[seg + 1])
                * h
                * h
                / 6.0
    }
}
