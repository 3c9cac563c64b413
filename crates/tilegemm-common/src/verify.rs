//! Tolerance-based comparison of a computed matrix against a reference.
//!
//! Every element is compared and every mismatch is recorded; callers that only
//! care about the first one use [`VerificationReport::first_mismatch`].

use crate::error::ShapeError;
use crate::matrix::Matrix;
use std::fmt;

/// One element outside tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub row: usize,
    pub col: usize,
    pub expected: f32,
    pub actual: f32,
}

impl Mismatch {
    pub fn abs_diff(&self) -> f32 {
        (self.actual - self.expected).abs()
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {}, col {}: expected {}, got {} (|diff| = {})",
            self.row,
            self.col,
            self.expected,
            self.actual,
            self.abs_diff()
        )
    }
}

/// Outcome of [`verify`].
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub rows: usize,
    pub cols: usize,
    pub tolerance: f32,
    /// Largest absolute difference over all finite pairs.
    pub max_abs_diff: f32,
    /// Mismatches in row-major order.
    pub mismatches: Vec<Mismatch>,
}

impl VerificationReport {
    /// True when every element matched.
    pub fn matches(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn first_mismatch(&self) -> Option<&Mismatch> {
        self.mismatches.first()
    }

    pub fn compared(&self) -> usize {
        self.rows * self.cols
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.matches() {
            write!(
                f,
                "all {} elements match within {} (max |diff| = {})",
                self.compared(),
                self.tolerance,
                self.max_abs_diff
            )
        } else {
            write!(
                f,
                "{} of {} elements differ by more than {}",
                self.mismatches.len(),
                self.compared(),
                self.tolerance
            )
        }
    }
}

/// Compare `actual` against `expected` element-wise.
///
/// An element matches when `|actual - expected| <= tolerance`; NaN never
/// matches. Differing shapes fail before any element is compared.
pub fn verify(actual: &Matrix, expected: &Matrix, tolerance: f32) -> Result<VerificationReport, ShapeError> {
    if actual.shape() != expected.shape() {
        return Err(ShapeError::Mismatch {
            actual_rows: actual.rows(),
            actual_cols: actual.cols(),
            expected_rows: expected.rows(),
            expected_cols: expected.cols(),
        });
    }

    let cols = actual.cols();
    let mut max_abs_diff = 0.0f32;
    let mut mismatches = Vec::new();
    for (i, (&a, &e)) in actual.as_slice().iter().zip(expected.as_slice()).enumerate() {
        let diff = (a - e).abs();
        if diff.is_finite() {
            max_abs_diff = max_abs_diff.max(diff);
        }
        if diff.is_nan() || diff > tolerance {
            mismatches.push(Mismatch { row: i / cols, col: i % cols, expected: e, actual: a });
        }
    }

    Ok(VerificationReport { rows: actual.rows(), cols, tolerance, max_abs_diff, mismatches })
}
