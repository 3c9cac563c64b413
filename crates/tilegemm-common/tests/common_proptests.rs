//! Property-based tests for `tilegemm-common`.
//!
//! Covers:
//! - matrix text format write/read preserving shape and values
//! - `verify` agreeing with a direct element scan
//! - reference multiply shape and identity behaviour

use proptest::prelude::*;
use tilegemm_common::{Matrix, ShapeError, parse_matrix, reference, verify, write_matrix};

fn matrix_strategy(max_dim: usize) -> impl Strategy<Value = Matrix> {
    (1..=max_dim, 1..=max_dim).prop_flat_map(|(rows, cols)| {
        prop::collection::vec(-1.0e6f32..1.0e6f32, rows * cols)
            .prop_map(move |data| Matrix::from_vec(rows, cols, data).unwrap())
    })
}

// ── text format ─────────────────────────────────────────────────────────────

proptest! {
    /// Writing then parsing yields the same dimensions and bit-identical values.
    #[test]
    fn prop_text_format_preserves_matrix(m in matrix_strategy(12)) {
        let mut buf = Vec::new();
        write_matrix(&mut buf, &m).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let back = parse_matrix(&text, "roundtrip").unwrap();
        prop_assert_eq!(back.shape(), m.shape());
        for (a, b) in back.as_slice().iter().zip(m.as_slice()) {
            prop_assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    /// The written file has a header line plus exactly one line per row.
    #[test]
    fn prop_written_line_count(m in matrix_strategy(8)) {
        let mut buf = Vec::new();
        write_matrix(&mut buf, &m).unwrap();
        let text = String::from_utf8(buf).unwrap();
        prop_assert_eq!(text.lines().count(), m.rows() + 1);
    }
}

// ── verification ────────────────────────────────────────────────────────────

proptest! {
    /// `verify` reports exactly the elements a direct scan finds out of tolerance.
    #[test]
    fn prop_verify_matches_direct_scan(
        m in matrix_strategy(10),
        noise in prop::collection::vec(-0.01f32..0.01f32, 100),
        tol in 0.0f32..0.01,
    ) {
        let perturbed: Vec<f32> = m
            .as_slice()
            .iter()
            .zip(noise.iter().cycle())
            .map(|(v, n)| v + n)
            .collect();
        let actual = Matrix::from_vec(m.rows(), m.cols(), perturbed).unwrap();
        let report = verify(&actual, &m, tol).unwrap();

        let expected_bad = actual
            .as_slice()
            .iter()
            .zip(m.as_slice())
            .filter(|(a, e)| (*a - *e).abs() > tol)
            .count();
        prop_assert_eq!(report.mismatches.len(), expected_bad);
        prop_assert_eq!(report.matches(), expected_bad == 0);
        prop_assert_eq!(report.compared(), m.len());
    }

    /// A matrix always matches itself at zero tolerance.
    #[test]
    fn prop_self_verification_passes(m in matrix_strategy(10)) {
        let report = verify(&m, &m, 0.0).unwrap();
        prop_assert!(report.matches());
        prop_assert_eq!(report.max_abs_diff, 0.0);
    }
}

// ── reference multiply ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_reference_output_shape(m in 1usize..9, k in 1usize..9, n in 1usize..9) {
        let a = Matrix::filled(m, k, 1.0).unwrap();
        let b = Matrix::filled(k, n, 2.0).unwrap();
        let c = reference::matmul(&a, &b).unwrap();
        prop_assert_eq!(c.shape(), (m, n));
        prop_assert!(c.as_slice().iter().all(|&v| v == 2.0 * k as f32));
    }

    #[test]
    fn prop_reference_rejects_inner_mismatch(m in 1usize..9, k in 1usize..9, n in 1usize..9) {
        let a = Matrix::zeros(m, k).unwrap();
        let b = Matrix::zeros(k + 1, n).unwrap();
        let is_inner_dimension =
            matches!(reference::matmul(&a, &b), Err(ShapeError::InnerDimension { .. }));
        prop_assert!(is_inner_dimension);
    }
}
