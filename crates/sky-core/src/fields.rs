// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Registry of the simulated fields.
//!
//! A field is identified by a family index and a redshift-slice index and
//! carries the statistics needed by the lognormal mapping (mean and shift)
//! plus its redshift coverage. The catalog is immutable once constructed and
//! is shared read-only by every pipeline stage.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for field-catalog operations.
pub type FieldResult<T> = Result<T, FieldError>;

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("field catalog must not be empty")]
    Empty,
    #[error("field f{family}z{zbin}: zmin {zmin} exceeds zmax {zmax}")]
    RedshiftOrder {
        family: u32,
        zbin: u32,
        zmin: f64,
        zmax: f64,
    },
    #[error("duplicate field identity f{family}z{zbin}")]
    Duplicate { family: u32, zbin: u32 },
    #[error("field f{family}z{zbin}: mean+shift = {sum} must be greater than zero for lognormal runs")]
    NonPositiveShiftedMean { family: u32, zbin: u32, sum: f64 },
    #[error("unknown field identity f{family}z{zbin}")]
    Unknown { family: u32, zbin: u32 },
}

/// Identity of a field: family (kind of tracer) and redshift slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId {
    pub family: u32,
    pub zbin: u32,
}

impl FieldId {
    pub fn new(family: u32, zbin: u32) -> Self {
        Self { family, zbin }
    }
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "f{}z{}", self.family, self.zbin)
    }
}

/// What the field physically represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Galaxy (or other tracer) density contrast.
    Density,
    /// Weak-lensing convergence.
    Convergence,
    /// Any other scalar field on the sphere.
    Generic,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub mean: f64,
    /// Additive lognormal shift: `field + shift` is lognormally distributed.
    pub shift: f64,
    pub kind: FieldKind,
    pub zmin: f64,
    pub zmax: f64,
}

/// Immutable, ordered list of fields. The position of a field in this list is
/// its row/column index in every covariance matrix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldCatalog {
    fields: Vec<Field>,
}

impl FieldCatalog {
    pub fn new(fields: Vec<Field>) -> FieldResult<Self> {
        if fields.is_empty() {
            return Err(FieldError::Empty);
        }
        for (pos, field) in fields.iter().enumerate() {
            if field.zmin > field.zmax {
                return Err(FieldError::RedshiftOrder {
                    family: field.id.family,
                    zbin: field.id.zbin,
                    zmin: field.zmin,
                    zmax: field.zmax,
                });
            }
            if fields[..pos].iter().any(|other| other.id == field.id) {
                return Err(FieldError::Duplicate {
                    family: field.id.family,
                    zbin: field.id.zbin,
                });
            }
        }
        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Position of the field with the given identity.
    pub fn index_of(&self, id: FieldId) -> FieldResult<usize> {
        self.fields
            .iter()
            .position(|f| f.id == id)
            .ok_or(FieldError::Unknown {
                family: id.family,
                zbin: id.zbin,
            })
    }

    /// The internal field ordering, for the field-list diagnostic.
    pub fn order(&self) -> Vec<FieldId> {
        self.fields.iter().map(|f| f.id).collect()
    }

    /// Checks that every field satisfies `mean + shift > 0`. Lognormal runs
    /// must pass this before any transform is attempted.
    pub fn validate_shifted_means(&self) -> FieldResult<()> {
        for field in &self.fields {
            let sum = field.mean + field.shift;
            if sum <= 0.0 {
                return Err(FieldError::NonPositiveShiftedMean {
                    family: field.id.family,
                    zbin: field.id.zbin,
                    sum,
                });
            }
        }
        Ok(())
    }
}
