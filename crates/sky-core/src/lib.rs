//! Correlated Gaussian and lognormal random fields on the sphere.
//!
//! The engine takes per-field-pair angular power spectra, builds a valid
//! covariance structure per multipole, factorizes it, and draws correlated
//! spherical-harmonic coefficients with reproducible parallel randomness.
//! Map synthesis, pixelization and catalog assembly live downstream of this
//! crate; their inputs are the coefficient arrays produced here.

pub mod cholesky;
pub mod cosmology;
pub mod covariance;
pub mod diagnostics;
pub mod dlt;
pub mod fields;
pub mod integrate;
pub mod lognormal;
pub mod pipeline;
pub mod regularize;
pub mod sampler;
pub mod spectra;
pub mod tables;
pub mod warnings;
pub mod windows;

pub use cholesky::MixingSet;
pub use covariance::CovarianceSet;
pub use diagnostics::Diagnostics;
pub use dlt::LegendreTable;
pub use fields::{Field, FieldCatalog, FieldId, FieldKind};
pub use pipeline::{run, Checkpoint, Distribution, EngineConfig, EngineOutputs, PipelineError};
pub use regularize::{EigenClip, Regularizer};
pub use sampler::{HarmonicCoefficients, SamplerConfig};
pub use spectra::{SpectrumSamples, SpectrumStore};
pub use warnings::WarningSink;
pub use windows::WindowConfig;
