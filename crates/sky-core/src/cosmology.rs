// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Background cosmology needed to build the lensing-kernel weight table.
//!
//! The comoving-distance grid is an explicit object built once by its
//! constructor and passed by reference to every caller; nothing is
//! initialised behind a first call.

use crate::fields::FieldCatalog;
use crate::integrate::{romberg, IntegrateError};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Speed of light in km/s.
pub const C_KMS: f64 = 299_792.458;
/// Hubble parameter scale in km/s/Mpc; distances come out in h⁻¹ Mpc.
pub const H100: f64 = 100.0;

pub type CosmologyResult<T> = Result<T, CosmologyError>;

#[derive(Debug, Error)]
pub enum CosmologyError {
    #[error("matter and dark-energy densities must be finite")]
    NonFiniteDensity,
    #[error("distance grid needs at least 2 points")]
    GridTooSmall,
    #[error("grid zmax must be positive and finite")]
    BadGridRange,
    #[error("z={z} is outside the tabulated range 0..={zmax}")]
    RedshiftOutOfRange { z: f64, zmax: f64 },
    #[error(transparent)]
    Integrate(#[from] IntegrateError),
}

/// Homogeneous background parameters. Curvature is derived.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Cosmology {
    pub omega_m: f64,
    pub omega_de: f64,
    pub w_de: f64,
    /// Derived: 1 − Ωm − Ωde.
    pub omega_k: f64,
}

impl Cosmology {
    pub fn new(omega_m: f64, omega_de: f64, w_de: f64) -> CosmologyResult<Self> {
        if !(omega_m.is_finite() && omega_de.is_finite() && w_de.is_finite()) {
            return Err(CosmologyError::NonFiniteDensity);
        }
        Ok(Self {
            omega_m,
            omega_de,
            w_de,
            omega_k: 1.0 - omega_m - omega_de,
        })
    }

    /// Dimensionless Hubble rate E(z).
    pub fn eh(&self, z: f64) -> f64 {
        let a = 1.0 + z;
        (self.omega_m * a.powi(3)
            + self.omega_k * a.powi(2)
            + self.omega_de * a.powf(3.0 * (1.0 + self.w_de)))
        .sqrt()
    }

    /// d(comoving distance)/dz in h⁻¹ Mpc.
    pub fn dchi_dz(&self, z: f64) -> f64 {
        C_KMS / H100 / self.eh(z)
    }

    /// Transverse comoving distance for radial comoving distance `chi`,
    /// valid for any curvature sign.
    pub fn transverse(&self, chi: f64) -> f64 {
        if self.omega_k == 0.0 {
            return chi;
        }
        let curv_factor = C_KMS / H100 / self.omega_k.abs().sqrt();
        if self.omega_k > 0.0 {
            curv_factor * (chi / curv_factor).sinh()
        } else {
            curv_factor * (chi / curv_factor).sin()
        }
    }
}

/// Comoving distance χ(z) tabulated on a uniform redshift grid with linear
/// interpolation between grid points.
#[derive(Clone, Debug)]
pub struct DistanceTable {
    zmax: f64,
    step: f64,
    grid: Vec<f64>,
}

impl DistanceTable {
    /// Integrates χ(z) = (c/H₁₀₀)·∫₀ᶻ dz'/E(z') at every grid point.
    pub fn new(cosmo: &Cosmology, zmax: f64, points: usize) -> CosmologyResult<Self> {
        if points < 2 {
            return Err(CosmologyError::GridTooSmall);
        }
        if !(zmax.is_finite() && zmax > 0.0) {
            return Err(CosmologyError::BadGridRange);
        }
        let step = zmax / (points - 1) as f64;
        let mut grid = Vec::with_capacity(points);
        grid.push(0.0);
        // Integrate segment by segment; the grid is cumulative.
        for i in 1..points {
            let lo = step * (i - 1) as f64;
            let hi = step * i as f64;
            let segment = romberg(|z| 1.0 / cosmo.eh(z), lo, hi)?;
            grid.push(grid[i - 1] + C_KMS / H100 * segment);
        }
        Ok(Self { zmax, step, grid })
    }

    pub fn zmax(&self) -> f64 {
        self.zmax
    }

    /// Radial comoving distance at `z`, in h⁻¹ Mpc.
    pub fn comoving(&self, z: f64) -> CosmologyResult<f64> {
        if !(0.0..=self.zmax).contains(&z) {
            return Err(CosmologyError::RedshiftOutOfRange {
                z,
                zmax: self.zmax,
            });
        }
        let pos = z / self.step;
        let idx = (pos.floor() as usize).min(self.grid.len() - 2);
        let t = pos - idx as f64;
        Ok(self.grid[idx] * (1.0 - t) + self.grid[idx + 1] * t)
    }
}

/// Weak-lensing convergence kernel for a source at `z_source`, evaluated at
/// lens redshift `z`.
pub fn kappa_weight(
    cosmo: &Cosmology,
    distances: &DistanceTable,
    z: f64,
    z_source: f64,
) -> CosmologyResult<f64> {
    let chi_lens = distances.comoving(z)?;
    let chi_source = distances.comoving(z_source)?;
    Ok(1.5 * H100 * H100 / C_KMS / C_KMS * cosmo.omega_m
        * (1.0 + z)
        * cosmo.transverse(chi_lens)
        * cosmo.transverse(chi_source - chi_lens)
        / cosmo.transverse(chi_source)
        * cosmo.dchi_dz(z))
}

/// Per-field-pair lensing weights: entry (i, j) is the kernel for sources at
/// the end of slice `i` evaluated at the midpoint of slice `j`, times the
/// width of slice `j`.
pub fn tabulate_kappa_weights(
    cosmo: &Cosmology,
    distances: &DistanceTable,
    catalog: &FieldCatalog,
) -> CosmologyResult<DMatrix<f64>> {
    let n = catalog.len();
    let mut table = DMatrix::zeros(n, n);
    for i in 0..n {
        let z_source = catalog.field(i).zmax;
        for j in 0..n {
            let lens = catalog.field(j);
            let z_mid = 0.5 * (lens.zmin + lens.zmax);
            table[(i, j)] =
                kappa_weight(cosmo, distances, z_mid, z_source)? * (lens.zmax - lens.zmin);
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Field, FieldId, FieldKind};
    use approx::assert_relative_eq;

    fn flat_lcdm() -> Cosmology {
        Cosmology::new(0.3, 0.7, -1.0).unwrap()
    }

    #[test]
    fn einstein_de_sitter_distance_is_analytic() {
        // Ωm = 1: χ(z) = 2·(c/H₁₀₀)·(1 − 1/√(1+z)).
        let cosmo = Cosmology::new(1.0, 0.0, -1.0).unwrap();
        let table = DistanceTable::new(&cosmo, 4.0, 400).unwrap();
        for &z in &[0.5f64, 1.0, 2.0, 3.5] {
            let expected = 2.0 * C_KMS / H100 * (1.0 - 1.0 / (1.0 + z).sqrt());
            // Tolerance dominated by the linear interpolation between grid
            // points, not by the integration.
            assert_relative_eq!(table.comoving(z).unwrap(), expected, max_relative = 1e-4);
        }
    }

    #[test]
    fn distances_grow_monotonically() {
        let table = DistanceTable::new(&flat_lcdm(), 3.0, 300).unwrap();
        let mut previous = -1.0;
        for i in 0..=30 {
            let chi = table.comoving(0.1 * i as f64).unwrap();
            assert!(chi > previous);
            previous = chi;
        }
    }

    #[test]
    fn out_of_range_redshift_is_an_error() {
        let table = DistanceTable::new(&flat_lcdm(), 2.0, 100).unwrap();
        assert!(matches!(
            table.comoving(2.5).unwrap_err(),
            CosmologyError::RedshiftOutOfRange { .. }
        ));
    }

    #[test]
    fn flat_universe_transverse_distance_is_radial() {
        let cosmo = flat_lcdm();
        assert_eq!(cosmo.transverse(1234.5), 1234.5);
    }

    #[test]
    fn kappa_kernel_vanishes_at_the_source() {
        let cosmo = flat_lcdm();
        let table = DistanceTable::new(&cosmo, 3.0, 300).unwrap();
        let at_source = kappa_weight(&cosmo, &table, 1.0, 1.0).unwrap();
        assert_relative_eq!(at_source, 0.0, epsilon = 1e-12);
        let between = kappa_weight(&cosmo, &table, 0.5, 1.0).unwrap();
        assert!(between > 0.0);
    }

    #[test]
    fn weight_table_scales_with_slice_width() {
        let cosmo = flat_lcdm();
        let distances = DistanceTable::new(&cosmo, 3.0, 300).unwrap();
        let catalog = FieldCatalog::new(vec![
            Field {
                id: FieldId::new(1, 1),
                mean: 0.0,
                shift: 1.0,
                kind: FieldKind::Density,
                zmin: 0.2,
                zmax: 0.4,
            },
            Field {
                id: FieldId::new(1, 2),
                mean: 0.0,
                shift: 1.0,
                kind: FieldKind::Density,
                zmin: 0.4,
                zmax: 0.8,
            },
        ])
        .unwrap();
        let weights = tabulate_kappa_weights(&cosmo, &distances, &catalog).unwrap();
        // Lenses in front of the source contribute; the slice containing the
        // source edge contributes via its midpoint.
        assert!(weights[(1, 0)] > 0.0);
        let expected = kappa_weight(&cosmo, &distances, 0.3, 0.8).unwrap() * 0.2;
        assert_relative_eq!(weights[(1, 0)], expected, max_relative = 1e-12);
    }
}
