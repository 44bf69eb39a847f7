// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralSky — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Run-wide accumulation of numerical-quality warnings.
//!
//! Warnings do not stop the run; they are logged as they happen and the total
//! is reported once at the end. The sink is an explicit value passed by
//! reference so that no component hides mutable global state.

use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct WarningSink {
    count: AtomicUsize,
}

impl WarningSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs the message at warn level and bumps the run-wide counter.
    /// Safe to call from parallel regions.
    pub fn warn(&self, message: impl Display) {
        tracing::warn!("{message}");
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of warnings emitted so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}
