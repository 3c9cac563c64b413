//! Dense row-major `f32` matrix.

use crate::error::ShapeError;

/// A dense matrix stored row-major.
///
/// `data.len() == rows * cols` holds for every constructed value, and both
/// dimensions are non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Build a matrix from row-major data.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, ShapeError> {
        let expected = element_count(rows, cols)?;
        if data.len() != expected {
            return Err(ShapeError::ElementCount { rows, cols, expected, found: data.len() });
        }
        Ok(Self { rows, cols, data })
    }

    /// A matrix with every element set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Result<Self, ShapeError> {
        let len = element_count(rows, cols)?;
        Ok(Self { rows, cols, data: vec![value; len] })
    }

    pub fn zeros(rows: usize, cols: usize) -> Result<Self, ShapeError> {
        Self::filled(rows, cols, 0.0)
    }

    /// Build from nested rows. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, ShapeError> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            // Report against the offending row.
            return Err(ShapeError::ElementCount {
                rows: 1,
                cols,
                expected: cols,
                found: bad.len(),
            });
        }
        let data: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self::from_vec(rows.len(), cols, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for a constructed matrix; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Size of the element buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.rows && col < self.cols {
            self.data.get(row * self.cols + col).copied()
        } else {
            None
        }
    }

    /// Iterate over rows as slices.
    pub fn row_iter(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.cols)
    }
}

/// `rows * cols`, rejecting zero and overflowing dimensions.
pub fn element_count(rows: usize, cols: usize) -> Result<usize, ShapeError> {
    if rows == 0 || cols == 0 {
        return Err(ShapeError::ZeroDimension { rows, cols });
    }
    rows.checked_mul(cols).ok_or(ShapeError::Overflow { rows, cols })
}
