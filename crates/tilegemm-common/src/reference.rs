//! CPU reference multiply used to produce expected results.

use crate::error::ShapeError;
use crate::matrix::Matrix;

/// Check that `a` and `b` can be multiplied.
pub fn check_inner_dims(a: &Matrix, b: &Matrix) -> Result<(), ShapeError> {
    if a.cols() != b.rows() {
        return Err(ShapeError::InnerDimension {
            a_rows: a.rows(),
            a_cols: a.cols(),
            b_rows: b.rows(),
            b_cols: b.cols(),
        });
    }
    Ok(())
}

/// `C = A × B`, accumulated in `f64`.
pub fn matmul(a: &Matrix, b: &Matrix) -> Result<Matrix, ShapeError> {
    check_inner_dims(a, b)?;
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    let (a, b) = (a.as_slice(), b.as_slice());

    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let acc: f64 = a_row
                .iter()
                .enumerate()
                .map(|(p, &x)| f64::from(x) * f64::from(b[p * n + j]))
                .sum();
            c[i * n + j] = acc as f32;
        }
    }
    Matrix::from_vec(m, n, c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplies_2x3_by_3x2() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Matrix::from_vec(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn ones_give_inner_dimension() {
        let a = Matrix::filled(2, 3, 1.0).unwrap();
        let b = Matrix::filled(3, 2, 1.0).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert!(c.as_slice().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn identity_is_neutral() {
        let id = Matrix::from_vec(2, 2, vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let b = Matrix::from_vec(2, 2, vec![5.0, 6.0, 7.0, 8.0]).unwrap();
        assert_eq!(matmul(&id, &b).unwrap(), b);
    }

    #[test]
    fn inner_dimension_mismatch_rejected() {
        let a = Matrix::zeros(2, 3).unwrap();
        let b = Matrix::zeros(2, 3).unwrap();
        assert_eq!(
            matmul(&a, &b).unwrap_err(),
            ShapeError::InnerDimension { a_rows: 2, a_cols: 3, b_rows: 2, b_cols: 3 }
        );
    }
}
