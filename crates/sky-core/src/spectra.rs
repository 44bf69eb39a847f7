// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Storage of per-field-pair angular power spectra.
//!
//! Input spectra may be sparse and irregularly sampled in multipole. The
//! store keeps them as `(multipole, value)` sample pairs per ordered field
//! pair; `densify` interpolates a pair onto the dense integer grid the
//! discrete transform requires. A spectrum for `(i, j)` also describes
//! `(j, i)`; only one needs to be stored.

use crate::fields::{FieldCatalog, FieldId};
use crate::tables;
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub type SpectrumResult<T> = Result<T, SpectrumError>;

#[derive(Debug, Error)]
pub enum SpectrumError {
    #[error("pair ({i}, {j}) is out of range for {n_fields} fields")]
    PairOutOfRange { i: usize, j: usize, n_fields: usize },
    #[error("spectrum samples must not be empty")]
    EmptySamples,
    #[error("spectrum multipoles must be finite, non-negative and strictly increasing (sample {index})")]
    BadMultipole { index: usize },
    #[error("spectrum value at sample {index} is not finite")]
    NonFiniteValue { index: usize },
    #[error("no spectrum was set for any field pair")]
    NoneSet,
    #[error("spectrum for pair ({i}, {j}) only reaches l={reach} but l={needed} is needed")]
    InsufficientReach {
        i: usize,
        j: usize,
        reach: usize,
        needed: usize,
    },
    #[error(transparent)]
    Table(#[from] tables::TableError),
    #[error(transparent)]
    Field(#[from] crate::fields::FieldError),
}

/// One pair's sparse samples: parallel multipole/value arrays, multipoles
/// strictly increasing.
#[derive(Clone, Debug)]
pub struct SpectrumSamples {
    pub ell: Vec<f64>,
    pub value: Vec<f64>,
}

impl SpectrumSamples {
    pub fn new(ell: Vec<f64>, value: Vec<f64>) -> SpectrumResult<Self> {
        if ell.is_empty() || ell.len() != value.len() {
            return Err(SpectrumError::EmptySamples);
        }
        for (index, &l) in ell.iter().enumerate() {
            if !l.is_finite() || l < 0.0 || (index > 0 && l <= ell[index - 1]) {
                return Err(SpectrumError::BadMultipole { index });
            }
        }
        for (index, &v) in value.iter().enumerate() {
            if !v.is_finite() {
                return Err(SpectrumError::NonFiniteValue { index });
            }
        }
        Ok(Self { ell, value })
    }

    /// Highest multipole described by this spectrum.
    pub fn max_multipole(&self) -> f64 {
        *self.ell.last().expect("samples are never empty")
    }
}

/// Per-ordered-pair spectrum storage for `n_fields` fields.
#[derive(Clone, Debug)]
pub struct SpectrumStore {
    n_fields: usize,
    entries: Vec<Option<SpectrumSamples>>,
}

impl SpectrumStore {
    pub fn new(n_fields: usize) -> Self {
        Self {
            n_fields,
            entries: vec![None; n_fields * n_fields],
        }
    }

    pub fn n_fields(&self) -> usize {
        self.n_fields
    }

    fn slot(&self, i: usize, j: usize) -> SpectrumResult<usize> {
        if i >= self.n_fields || j >= self.n_fields {
            return Err(SpectrumError::PairOutOfRange {
                i,
                j,
                n_fields: self.n_fields,
            });
        }
        Ok(i * self.n_fields + j)
    }

    pub fn set(&mut self, i: usize, j: usize, samples: SpectrumSamples) -> SpectrumResult<()> {
        let slot = self.slot(i, j)?;
        self.entries[slot] = Some(samples);
        Ok(())
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&SpectrumSamples> {
        self.entries[i * self.n_fields + j].as_ref()
    }

    pub fn is_set(&self, i: usize, j: usize) -> bool {
        self.entries[i * self.n_fields + j].is_some()
    }

    /// Whether the pair is described either directly or by its transpose.
    pub fn is_described(&self, i: usize, j: usize) -> bool {
        self.is_set(i, j) || self.is_set(j, i)
    }

    /// Iterator over the set entries as `(i, j, samples)`.
    pub fn set_pairs(&self) -> impl Iterator<Item = (usize, usize, &SpectrumSamples)> {
        self.entries.iter().enumerate().filter_map(|(k, entry)| {
            entry
                .as_ref()
                .map(|s| (k / self.n_fields, k % self.n_fields, s))
        })
    }

    /// Mutable access used by the window transforms; same ordering contract
    /// as [`set_pairs`](Self::set_pairs).
    pub(crate) fn entries_mut(&mut self) -> &mut [Option<SpectrumSamples>] {
        &mut self.entries
    }

    /// The largest integer multipole described by *every* set spectrum: the
    /// common bandwidth usable by the transform.
    pub fn common_max_multipole(&self) -> SpectrumResult<usize> {
        let mut last: Option<usize> = None;
        for entry in self.entries.iter().flatten() {
            let reach = entry.max_multipole().floor() as usize;
            last = Some(match last {
                Some(current) => current.min(reach),
                None => reach,
            });
        }
        last.ok_or(SpectrumError::NoneSet)
    }

    /// Interpolates the pair's spectrum onto the dense grid `0..=last_l`.
    ///
    /// Linear interpolation between known samples. Below the first known
    /// multipole, values are zero unless `extrapolate_dipole` is set, in
    /// which case the first two samples are linearly extended down to l=1;
    /// l=0 is never extrapolated. Values beyond the highest sample are out
    /// of scope: the pair must reach `last_l`.
    pub fn densify(
        &self,
        i: usize,
        j: usize,
        last_l: usize,
        extrapolate_dipole: bool,
    ) -> SpectrumResult<Vec<f64>> {
        let slot = self.slot(i, j)?;
        let samples = self.entries[slot]
            .as_ref()
            .ok_or(SpectrumError::PairOutOfRange {
                i,
                j,
                n_fields: self.n_fields,
            })?;
        let reach = samples.max_multipole().floor() as usize;
        if reach < last_l {
            return Err(SpectrumError::InsufficientReach {
                i,
                j,
                reach,
                needed: last_l,
            });
        }

        let ell = &samples.ell;
        let value = &samples.value;
        let mut dense = vec![0.0; last_l + 1];
        let first_l = ell[0];

        // Walking index into the sorted samples; the dense grid is ascending.
        let mut seg = 0;
        for (l, out) in dense.iter_mut().enumerate() {
            let lf = l as f64;
            if lf < first_l {
                continue; // handled by the extrapolation pass below
            }
            while seg + 1 < ell.len() && ell[seg + 1] < lf {
                seg += 1;
            }
            if seg + 1 == ell.len() {
                *out = value[seg];
            } else {
                let (l0, l1) = (ell[seg], ell[seg + 1]);
                let t = if l1 > l0 { (lf - l0) / (l1 - l0) } else { 0.0 };
                *out = value[seg] * (1.0 - t) + value[seg + 1] * t;
            }
        }

        if extrapolate_dipole && first_l > 1.0 && ell.len() >= 2 {
            let slope = (value[1] - value[0]) / (ell[1] - ell[0]);
            let start = first_l.ceil() as usize;
            for l in 1..start.min(last_l + 1) {
                dense[l] = value[0] + slope * (l as f64 - ell[0]);
            }
        }

        Ok(dense)
    }

    /// Loads spectra from one two-column file per pair, using the
    /// `<prefix>f{a}z{b}f{c}z{d}.dat` naming convention. Missing files are
    /// simply absent pairs; symmetry completion decides later whether that
    /// is acceptable.
    pub fn load_per_pair(prefix: &str, catalog: &FieldCatalog) -> SpectrumResult<Self> {
        let n = catalog.len();
        let mut store = Self::new(n);
        for i in 0..n {
            for j in 0..n {
                let path = tables::pair_filename(prefix, catalog.field(i).id, catalog.field(j).id);
                if !path.exists() {
                    continue;
                }
                let (ell, value) = tables::read_two_column(&path)?;
                info!("{} goes to [{i}, {j}]", path.display());
                store.set(i, j, SpectrumSamples::new(ell, value)?)?;
            }
        }
        Ok(store)
    }

    /// Loads spectra from one wide table: first column is the multipole,
    /// remaining columns are labelled `Cl-f{a}z{b}f{c}z{d}`. Columns whose
    /// label names a field missing from the catalog are skipped.
    pub fn load_wide_table(path: &Path, catalog: &FieldCatalog) -> SpectrumResult<Self> {
        let (labels, columns) = tables::read_wide(path)?;
        let mut store = Self::new(catalog.len());
        info!("found {} spectra in {}", labels.len() - 1, path.display());
        for (label, column) in labels.iter().zip(columns.iter()).skip(1) {
            let (a, b) = tables::parse_pair_label(label)?;
            let (i, j) = match (catalog.index_of(a), catalog.index_of(b)) {
                (Ok(i), Ok(j)) => (i, j),
                _ => continue,
            };
            info!("{label} goes to [{i}, {j}]");
            store.set(i, j, SpectrumSamples::new(columns[0].clone(), column.clone())?)?;
        }
        Ok(store)
    }
}
