// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Plain-text table formats used for spectra input and diagnostics output.
//!
//! Two layouts exist: one two-column file per field pair, named by the
//! `<prefix>f{a}z{b}f{c}z{d}.dat` convention, and a single wide table whose
//! first column is the multipole and whose header row labels each remaining
//! column with the pair it belongs to (`Cl-f{a}z{b}f{c}z{d}`).

use crate::fields::FieldId;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type TableResult<T> = Result<T, TableError>;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}:{line}: expected {expected} columns, found {found}")]
    ColumnCount {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("{path}:{line}: cannot parse '{token}' as a number")]
    Parse {
        path: PathBuf,
        line: usize,
        token: String,
    },
    #[error("{path}: table is empty")]
    EmptyTable { path: PathBuf },
    #[error("cannot parse pair label '{label}'")]
    PairLabel { label: String },
}

fn io_err(path: &Path, source: std::io::Error) -> TableError {
    TableError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// File name for the pair `(a, b)` under the given prefix.
pub fn pair_filename(prefix: &str, a: FieldId, b: FieldId) -> PathBuf {
    PathBuf::from(format!("{prefix}{a}{b}.dat"))
}

/// File name for a per-multipole table, with the multipole zero-padded to the
/// width of the largest one.
pub fn multipole_filename(prefix: &str, l: usize, lmax: usize) -> PathBuf {
    let width = lmax.max(1).ilog10() as usize + 1;
    PathBuf::from(format!("{prefix}l{l:0width$}.dat"))
}

/// Column label for the pair `(a, b)` in a wide table header.
pub fn pair_label(a: FieldId, b: FieldId) -> String {
    format!("Cl-{a}{b}")
}

/// Parses a `Cl-f{a}z{b}f{c}z{d}` column label back into its field pair.
pub fn parse_pair_label(label: &str) -> TableResult<(FieldId, FieldId)> {
    let bad = || TableError::PairLabel {
        label: label.to_string(),
    };
    let body = label.strip_prefix("Cl-").ok_or_else(bad)?;
    let body = body.strip_prefix('f').ok_or_else(bad)?;
    let mut parts = Vec::with_capacity(4);
    let mut rest = body;
    for sep in ['z', 'f', 'z'] {
        let split = rest.find(sep).ok_or_else(bad)?;
        parts.push(rest[..split].parse::<u32>().map_err(|_| bad())?);
        rest = &rest[split + 1..];
    }
    parts.push(rest.parse::<u32>().map_err(|_| bad())?);
    Ok((
        FieldId::new(parts[0], parts[1]),
        FieldId::new(parts[2], parts[3]),
    ))
}

/// Reads a two-column `(x, y)` table, skipping blank and `#` comment lines.
pub fn read_two_column(path: &Path) -> TableResult<(Vec<f64>, Vec<f64>)> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_err(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let row = parse_row(path, idx + 1, trimmed, 2)?;
        xs.push(row[0]);
        ys.push(row[1]);
    }
    if xs.is_empty() {
        return Err(TableError::EmptyTable {
            path: path.to_path_buf(),
        });
    }
    Ok((xs, ys))
}

/// Writes a two-column `(x, y)` table.
pub fn write_two_column(path: &Path, x: &[f64], y: &[f64]) -> TableResult<()> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut out = BufWriter::new(file);
    for (a, b) in x.iter().zip(y.iter()) {
        writeln!(out, "{a:>22.16e} {b:>22.16e}").map_err(|e| io_err(path, e))?;
    }
    out.flush().map_err(|e| io_err(path, e))
}

/// Reads a wide table: a header row of column labels (optionally prefixed by
/// `#`) followed by numeric rows. Returns the labels and the data columns.
pub fn read_wide(path: &Path) -> TableResult<(Vec<String>, Vec<Vec<f64>>)> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut labels: Option<Vec<String>> = None;
    let mut columns: Vec<Vec<f64>> = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_err(path, e))?;
        let trimmed = line.trim().trim_start_matches('#').trim();
        if trimmed.is_empty() {
            continue;
        }
        match &labels {
            None => {
                let header: Vec<String> =
                    trimmed.split_whitespace().map(str::to_string).collect();
                columns = vec![Vec::new(); header.len()];
                labels = Some(header);
            }
            Some(header) => {
                let row = parse_row(path, idx + 1, trimmed, header.len())?;
                for (col, value) in columns.iter_mut().zip(row) {
                    col.push(value);
                }
            }
        }
    }
    match labels {
        Some(header) if !columns[0].is_empty() => Ok((header, columns)),
        _ => Err(TableError::EmptyTable {
            path: path.to_path_buf(),
        }),
    }
}

/// Writes a wide table with a `#`-prefixed header row.
pub fn write_wide(path: &Path, labels: &[String], columns: &[Vec<f64>]) -> TableResult<()> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "# {}", labels.join(" ")).map_err(|e| io_err(path, e))?;
    let rows = columns.first().map(|c| c.len()).unwrap_or(0);
    for row in 0..rows {
        let mut first = true;
        for col in columns {
            if !first {
                write!(out, " ").map_err(|e| io_err(path, e))?;
            }
            write!(out, "{:>22.16e}", col[row]).map_err(|e| io_err(path, e))?;
            first = false;
        }
        writeln!(out).map_err(|e| io_err(path, e))?;
    }
    out.flush().map_err(|e| io_err(path, e))
}

fn parse_row(path: &Path, line: usize, text: &str, expected: usize) -> TableResult<Vec<f64>> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() != expected {
        return Err(TableError::ColumnCount {
            path: path.to_path_buf(),
            line,
            expected,
            found: tokens.len(),
        });
    }
    tokens
        .into_iter()
        .map(|token| {
            token.parse::<f64>().map_err(|_| TableError::Parse {
                path: path.to_path_buf(),
                line,
                token: token.to_string(),
            })
        })
        .collect()
}
