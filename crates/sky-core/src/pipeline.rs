// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! End-to-end orchestration: input spectra to correlated harmonic
//! coefficients.
//!
//! Stage order is fixed: window transforms, dense interpolation, the
//! lognormal→Gaussian detour through angle space (lognormal runs only),
//! covariance assembly and validation, regularization, Cholesky
//! factorization, coefficient sampling. Configuration problems abort before
//! any heavy computation; numerical-quality issues accumulate as warnings;
//! regularization/factorization failures abort only after their whole range
//! has been attempted.

use crate::cholesky::{factorize_range, CholeskyError, MixingSet};
use crate::covariance::{CovarianceError, CovarianceSet, PairFlags};
use crate::diagnostics::Diagnostics;
use crate::dlt::{DltError, LegendreTable};
use crate::fields::{FieldCatalog, FieldError, FieldId};
use crate::lognormal::{self, LognormalError};
use crate::regularize::{regularize_range, RegularizationReport, RegularizeError, Regularizer};
use crate::sampler::{sample_coefficients, HarmonicCoefficients, SamplerConfig, SamplerError};
use crate::spectra::{SpectrumError, SpectrumStore};
use crate::tables::{self, TableError};
use crate::warnings::WarningSink;
use crate::windows::{apply_windows, WindowConfig, WindowError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("multipole range is set in the wrong order: lmin {lmin} > lmax {lmax}")]
    RangeOrder { lmin: usize, lmax: usize },
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("spectrum store covers {store} fields but the catalog has {catalog}")]
    FieldCountMismatch { store: usize, catalog: usize },
    #[error("input spectra only reach l={available} but the requested range needs l={requested}")]
    InsufficientBandwidth { available: usize, requested: usize },
    #[error("lognormal mapping failed for {failed} field pair(s); first at pair ({i}, {j}): {source}")]
    BadLogArguments {
        failed: usize,
        i: usize,
        j: usize,
        source: LognormalError,
    },
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Spectrum(#[from] SpectrumError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Dlt(#[from] DltError),
    #[error(transparent)]
    Covariance(#[from] CovarianceError),
    #[error(transparent)]
    Regularize(#[from] RegularizeError),
    #[error(transparent)]
    Cholesky(#[from] CholeskyError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Marginal statistics of the generated fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    Gaussian,
    Lognormal,
    /// Uncorrelated homogeneous fields: covariance and coefficient
    /// preparation are skipped entirely.
    Homogeneous,
}

/// Named stages the pipeline can stop after, for diagnostics only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Checkpoint {
    FieldList,
    CorrelationFunctions,
    GaussianCorrelations,
    GaussianSpectra,
    Covariance,
    RegularizedCovariance,
    ReconstructedSpectra,
    MixingMatrices,
}

/// Full configuration surface of the engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    pub distribution: Distribution,
    /// Inclusive multipole window used for validation, factorization and
    /// sampling.
    pub lmin: usize,
    pub lmax: usize,
    /// Truncate the transform bandwidth at `lmax` instead of using every
    /// multipole the input spectra provide.
    pub crop_to_lmax: bool,
    pub windows: WindowConfig,
    /// Zero out field pairs whose spectrum is missing in both orders
    /// instead of failing.
    pub allow_missing: bool,
    /// Variance inflation applied when an off-diagonal entry implies a
    /// correlation outside [-1, 1].
    pub bad_corr_frac: f64,
    /// Zero diagonals are replaced by this fraction of the smallest
    /// positive variance in the active range (0 disables).
    pub min_diag_frac: f64,
    /// Extend spectra toward l=1 when the input starts above the dipole.
    pub extrapolate_dipole: bool,
    pub base_seed: u64,
    pub worker_count: usize,
    pub exit_at: Option<Checkpoint>,
}

impl EngineConfig {
    /// A configuration with the given distribution and multipole window;
    /// seed and worker count come from the deterministic runtime settings.
    pub fn new(distribution: Distribution, lmin: usize, lmax: usize) -> Self {
        let determinism = sky_config::determinism::config();
        Self {
            distribution,
            lmin,
            lmax,
            crop_to_lmax: false,
            windows: WindowConfig::default(),
            allow_missing: false,
            bad_corr_frac: 0.0,
            min_diag_frac: 0.0,
            extrapolate_dipole: false,
            base_seed: determinism.base_seed,
            worker_count: determinism.workers(),
            exit_at: None,
        }
    }
}

/// Everything a run can hand back. Early exits leave later stages `None`;
/// the covariance set survives only when the run stopped before
/// factorization consumed it.
#[derive(Debug)]
pub struct EngineOutputs {
    pub field_order: Vec<FieldId>,
    pub bandwidth: Option<usize>,
    pub covariance: Option<CovarianceSet>,
    pub regularization: Option<RegularizationReport>,
    pub mixing: Option<MixingSet>,
    pub coefficients: Option<Vec<HarmonicCoefficients>>,
    pub warning_count: usize,
}

impl EngineOutputs {
    fn new(field_order: Vec<FieldId>) -> Self {
        Self {
            field_order,
            bandwidth: None,
            covariance: None,
            regularization: None,
            mixing: None,
            coefficients: None,
            warning_count: 0,
        }
    }

    fn finish(mut self, warnings: &WarningSink) -> Self {
        self.warning_count = warnings.count();
        info!("total number of warnings: {}", self.warning_count);
        self
    }
}

/// Runs the engine over the given spectra.
pub fn run(
    catalog: &FieldCatalog,
    mut store: SpectrumStore,
    config: &EngineConfig,
    regularizer: &dyn Regularizer,
    diagnostics: &Diagnostics,
    warnings: &WarningSink,
) -> PipelineResult<EngineOutputs> {
    // Configuration errors abort before any heavy computation.
    if config.lmin > config.lmax {
        return Err(PipelineError::RangeOrder {
            lmin: config.lmin,
            lmax: config.lmax,
        });
    }
    if config.worker_count == 0 {
        return Err(PipelineError::NoWorkers);
    }
    if store.n_fields() != catalog.len() {
        return Err(PipelineError::FieldCountMismatch {
            store: store.n_fields(),
            catalog: catalog.len(),
        });
    }
    if config.distribution == Distribution::Lognormal {
        catalog.validate_shifted_means()?;
    }

    let mut outputs = EngineOutputs::new(catalog.order());

    diagnostics.write_field_list(catalog)?;
    if config.exit_at == Some(Checkpoint::FieldList) {
        return Ok(outputs.finish(warnings));
    }

    if config.distribution == Distribution::Homogeneous {
        info!("homogeneous realizations: skipping covariance and coefficient preparation");
        return Ok(outputs.finish(warnings));
    }

    apply_windows(&mut store, &config.windows, warnings)?;

    let available = store.common_max_multipole()?;
    info!("maximum multipole in the input spectra: {available}");
    if config.lmax > available {
        return Err(PipelineError::InsufficientBandwidth {
            available,
            requested: config.lmax,
        });
    }
    let last_l = if config.crop_to_lmax {
        config.lmax
    } else {
        available
    };
    let bandwidth = last_l + 1;
    outputs.bandwidth = Some(bandwidth);
    info!("maximum multipole in the transform: {last_l}");

    let table = match config.distribution {
        Distribution::Lognormal => Some(LegendreTable::new(bandwidth)?),
        _ => None,
    };
    let angles = table.as_ref().map(|t| t.angles_deg());
    let lls: Vec<f64> = (0..bandwidth).map(|l| l as f64).collect();

    // Every set pair is independent: interpolate onto the dense grid and,
    // for lognormal runs, push the spectrum through angle space to get the
    // auxiliary Gaussian one. Domain failures are collected across all
    // pairs before aborting so the report covers the full extent.
    let pairs: Vec<(usize, usize)> = store.set_pairs().map(|(i, j, _)| (i, j)).collect();
    let processed: Vec<PipelineResult<(usize, usize, Vec<f64>)>> = pairs
        .par_iter()
        .map(|&(i, j)| {
            let mut dense = store.densify(i, j, last_l, config.extrapolate_dipole)?;
            if let Some(table) = &table {
                let mut xi = vec![0.0; table.n_angles()];
                table.forward(&dense, &mut xi)?;
                if let Some(angles) = &angles {
                    Diagnostics::write_pair_function(
                        &diagnostics.correlation_fns,
                        catalog,
                        i,
                        j,
                        angles,
                        &xi,
                    )?;
                }
                let fi = catalog.field(i);
                let fj = catalog.field(j);
                lognormal::to_gaussian(&mut xi, fi.mean, fi.shift, fj.mean, fj.shift).map_err(
                    |source| PipelineError::BadLogArguments {
                        failed: 1,
                        i,
                        j,
                        source,
                    },
                )?;
                if i == j && xi[0] < 0.0 {
                    warnings.warn(format_args!(
                        "auxiliary Gaussian variance for field {i} is negative"
                    ));
                }
                if let Some(angles) = &angles {
                    Diagnostics::write_pair_function(
                        &diagnostics.gaussian_correlation_fns,
                        catalog,
                        i,
                        j,
                        angles,
                        &xi,
                    )?;
                }
                table.inverse(&xi, &mut dense)?;
                Diagnostics::write_pair_function(
                    &diagnostics.gaussian_spectra,
                    catalog,
                    i,
                    j,
                    &lls,
                    &dense,
                )?;
            }
            Ok((i, j, dense))
        })
        .collect();

    let mut dense_pairs = Vec::with_capacity(processed.len());
    let mut domain_failures: Vec<(usize, usize, LognormalError)> = Vec::new();
    for result in processed {
        match result {
            Ok(entry) => dense_pairs.push(entry),
            Err(PipelineError::BadLogArguments { i, j, source, .. }) => {
                warnings.warn(format_args!(
                    "lognormal mapping failed for pair ({i}, {j}): {source}"
                ));
                domain_failures.push((i, j, source));
            }
            Err(other) => return Err(other),
        }
    }
    if !domain_failures.is_empty() {
        let failed = domain_failures.len();
        let (i, j, source) = domain_failures.swap_remove(0);
        return Err(PipelineError::BadLogArguments {
            failed,
            i,
            j,
            source,
        });
    }

    if matches!(
        config.exit_at,
        Some(Checkpoint::CorrelationFunctions)
            | Some(Checkpoint::GaussianCorrelations)
            | Some(Checkpoint::GaussianSpectra)
    ) {
        return Ok(outputs.finish(warnings));
    }

    // Assemble one dense symmetric matrix per multipole.
    let mut covariance = CovarianceSet::zeros(bandwidth, catalog.len());
    let mut flags = PairFlags::new(catalog.len());
    for (i, j, dense) in &dense_pairs {
        covariance.set_pair(*i, *j, dense)?;
        flags.mark(*i, *j);
    }
    drop(dense_pairs);
    covariance.complete_symmetry(&mut flags, config.allow_missing)?;
    Diagnostics::write_covariance_set(&diagnostics.covariance, &covariance, last_l)?;
    if config.exit_at == Some(Checkpoint::Covariance) {
        outputs.covariance = Some(covariance);
        return Ok(outputs.finish(warnings));
    }

    covariance.validate(
        config.lmin,
        config.lmax,
        config.bad_corr_frac,
        config.min_diag_frac,
        warnings,
    );

    // Reconstructing spectra needs every multipole repaired, not just the
    // active window; a strong suppression makes the extra multipoles hard
    // to regularize, hence the narrower default.
    let (reg_lo, reg_hi) = if config.distribution == Distribution::Lognormal
        && diagnostics.wants_reconstructed_spectra()
        && last_l >= 1
    {
        (1, last_l)
    } else {
        (config.lmin, config.lmax)
    };
    outputs.regularization = Some(regularize_range(
        &mut covariance,
        reg_lo,
        reg_hi,
        regularizer,
        warnings,
    )?);
    Diagnostics::write_covariance_set(&diagnostics.regularized_covariance, &covariance, last_l)?;
    if config.exit_at == Some(Checkpoint::RegularizedCovariance) {
        outputs.covariance = Some(covariance);
        return Ok(outputs.finish(warnings));
    }

    if diagnostics.wants_reconstructed_spectra() {
        write_reconstructed_spectra(catalog, &covariance, table.as_ref(), diagnostics, &lls)?;
    }
    if config.exit_at == Some(Checkpoint::ReconstructedSpectra) {
        outputs.covariance = Some(covariance);
        return Ok(outputs.finish(warnings));
    }

    // Factorization consumes the covariance matrices.
    let mixing = factorize_range(covariance, config.lmin, config.lmax, warnings)?;
    if config.exit_at == Some(Checkpoint::MixingMatrices) {
        outputs.mixing = Some(mixing);
        return Ok(outputs.finish(warnings));
    }

    let sampler_config = SamplerConfig {
        base_seed: config.base_seed,
        worker_count: config.worker_count,
        lmin: config.lmin,
        lmax: config.lmax,
    };
    outputs.coefficients = Some(sample_coefficients(&mixing, &sampler_config, warnings)?);
    outputs.mixing = Some(mixing);
    Ok(outputs.finish(warnings))
}

/// Spectra of the target distribution rebuilt from the regularized
/// matrices: the upper-triangle pairs, mapped back through angle space in
/// lognormal runs, written per pair or as one wide table.
fn write_reconstructed_spectra(
    catalog: &FieldCatalog,
    covariance: &CovarianceSet,
    table: Option<&LegendreTable>,
    diagnostics: &Diagnostics,
    lls: &[f64],
) -> PipelineResult<()> {
    let Some(prefix) = &diagnostics.reconstructed_spectra else {
        return Ok(());
    };
    let n = catalog.len();
    let wide = prefix.ends_with(".dat");
    let mut labels = vec!["l".to_string()];
    let mut columns = vec![lls.to_vec()];

    for i in 0..n {
        for j in i..n {
            let mut spectrum = covariance.extract_pair(i, j);
            if let Some(table) = table {
                let mut xi = vec![0.0; table.n_angles()];
                table.forward(&spectrum, &mut xi)?;
                let fi = catalog.field(i);
                let fj = catalog.field(j);
                lognormal::to_lognormal(&mut xi, fi.mean, fi.shift, fj.mean, fj.shift);
                table.inverse(&xi, &mut spectrum)?;
            }
            if wide {
                labels.push(tables::pair_label(catalog.field(i).id, catalog.field(j).id));
                columns.push(spectrum);
            } else {
                Diagnostics::write_pair_function(
                    &diagnostics.reconstructed_spectra,
                    catalog,
                    i,
                    j,
                    lls,
                    &spectrum,
                )?;
            }
        }
    }

    if wide {
        tables::write_wide(std::path::Path::new(prefix), &labels, &columns)?;
    }
    info!("reconstructed spectra written to {prefix}");
    Ok(())
}
