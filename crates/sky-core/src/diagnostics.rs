// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Optional diagnostic outputs, each independently toggleable.
//!
//! Everything here is observational: the pipeline behaves identically
//! whether or not any of these are requested, except for the early-exit
//! checkpoints that reference them.

use crate::covariance::CovarianceSet;
use crate::fields::FieldCatalog;
use crate::tables::{self, TableResult};
use nalgebra::DMatrix;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Output destinations; `None` disables the respective diagnostic. Entries
/// holding a prefix generate one file per field pair or per multipole.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    /// Listing of the internal field ordering.
    pub field_list: Option<PathBuf>,
    /// Per-pair correlation functions before the Gaussian mapping (prefix).
    pub correlation_fns: Option<String>,
    /// Per-pair correlation functions after the Gaussian mapping (prefix).
    pub gaussian_correlation_fns: Option<String>,
    /// Per-pair auxiliary Gaussian spectra (prefix).
    pub gaussian_spectra: Option<String>,
    /// Raw per-multipole covariance matrices (prefix).
    pub covariance: Option<String>,
    /// Regularized per-multipole covariance matrices (prefix).
    pub regularized_covariance: Option<String>,
    /// Spectra reconstructed from the regularized matrices: one file per
    /// pair, or a single wide table when the value ends in `.dat`.
    pub reconstructed_spectra: Option<String>,
}

impl Diagnostics {
    /// Whether the reconstructed-spectra output is requested; drives the
    /// widened regularization range in lognormal runs.
    pub fn wants_reconstructed_spectra(&self) -> bool {
        self.reconstructed_spectra.is_some()
    }

    pub fn write_field_list(&self, catalog: &FieldCatalog) -> TableResult<()> {
        let Some(path) = &self.field_list else {
            return Ok(());
        };
        let file = File::create(path).map_err(|e| io_err(path, e))?;
        let mut out = BufWriter::new(file);
        for field in catalog.iter() {
            writeln!(out, "{} {}", field.id.family, field.id.zbin).map_err(|e| io_err(path, e))?;
        }
        out.flush().map_err(|e| io_err(path, e))?;
        info!("field list written to {}", path.display());
        Ok(())
    }

    pub fn write_pair_function(
        target: &Option<String>,
        catalog: &FieldCatalog,
        i: usize,
        j: usize,
        x: &[f64],
        y: &[f64],
    ) -> TableResult<()> {
        let Some(prefix) = target else {
            return Ok(());
        };
        let path = tables::pair_filename(prefix, catalog.field(i).id, catalog.field(j).id);
        tables::write_two_column(&path, x, y)
    }

    pub fn write_covariance_set(
        target: &Option<String>,
        set: &CovarianceSet,
        lmax: usize,
    ) -> TableResult<()> {
        let Some(prefix) = target else {
            return Ok(());
        };
        for l in 0..set.bandwidth() {
            let path = tables::multipole_filename(prefix, l, lmax);
            write_matrix(&path, set.matrix(l))?;
        }
        info!("covariance matrices written to prefix {prefix}");
        Ok(())
    }
}

fn io_err(path: &Path, source: std::io::Error) -> tables::TableError {
    tables::TableError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One matrix as a whitespace table, full precision.
pub fn write_matrix(path: &Path, matrix: &DMatrix<f64>) -> TableResult<()> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut out = BufWriter::new(file);
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if j > 0 {
                write!(out, " ").map_err(|e| io_err(path, e))?;
            }
            write!(out, "{:>22.16e}", matrix[(i, j)]).map_err(|e| io_err(path, e))?;
        }
        writeln!(out).map_err(|e| io_err(path, e))?;
    }
    out.flush().map_err(|e| io_err(path, e))
}
