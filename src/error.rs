// SPDX-License-Identifier: GPL-3.0-or-later
use thiserror::Error;

/// Errors raised by the background-subtraction and entity-analysis core.
///
/// Pure arithmetic and byte transforms never fail; only operations that
/// allocate, compare dimensions, spawn workers, or validate configuration
/// return this type.
#[derive(Debug, Error)]
pub enum Error {
    /// A heap allocation failed while constructing an image or model.
    #[error("failed to allocate {requested} bytes")]
    AllocationFailure { requested: usize },

    /// Two images (or an image and a model) that were expected to share
    /// dimensions did not.
    #[error("dimension mismatch: expected {expected_width}x{expected_height}, got {actual_width}x{actual_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// A pixel access fell outside the bounds of an image.
    ///
    /// The public `get`/`set` accessors never surface this variant; they
    /// convert out-of-bounds access into a safe no-op (`get` returns a
    /// default pixel, `set` returns `false`) instead of failing. It exists
    /// in the taxonomy for callers that want a strict, fallible accessor.
    #[error("pixel access ({x}, {y}) out of bounds for a {width}x{height} image")]
    OutOfBounds { x: i64, y: i64, width: u32, height: u32 },

    /// A configuration value fell outside its documented range.
    #[error("invalid configuration: {field} = {value} ({reason})")]
    InvalidConfiguration {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// A parallel worker failed to start or panicked before joining.
    #[error("worker {index} of {total} failed: {reason}")]
    WorkerFailure {
        index: usize,
        total: usize,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
