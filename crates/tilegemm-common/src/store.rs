//! Plain-text matrix files.
//!
//! Two header forms are accepted:
//!
//! ```text
//! 2 3                # rows cols, then rows*cols values
//! 1 2 3
//! 4 5 6
//! ```
//!
//! ```text
//! # (2, 3)           # dataset-generator header
//! 1.00 2.00 3.00
//! 4.00 5.00 6.00
//! ```
//!
//! Values are whitespace separated and row-major. Files are written with the
//! first form, one row per line.

use crate::error::{GemmError, Result, ShapeError};
use crate::matrix::{Matrix, element_count};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Read a matrix file.
pub fn load_matrix(path: impl AsRef<Path>) -> Result<Matrix> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| GemmError::io(path, e))?;
    let matrix = parse_matrix(&text, path)?;
    debug!(path = %path.display(), rows = matrix.rows(), cols = matrix.cols(), "loaded matrix");
    Ok(matrix)
}

/// Parse matrix text. `origin` is only used in error messages.
pub fn parse_matrix(text: &str, origin: impl AsRef<Path>) -> Result<Matrix> {
    let origin = origin.as_ref();
    let (rows, cols, body) = parse_header(text).map_err(|reason| GemmError::parse(origin, reason))?;
    let expected = element_count(rows, cols)?;

    let mut data = Vec::with_capacity(expected);
    for (index, token) in body.split_whitespace().enumerate() {
        let value: f32 = token.parse().map_err(|_| {
            GemmError::parse(origin, format!("value #{index} ('{token}') is not a number"))
        })?;
        data.push(value);
    }

    if data.len() != expected {
        return Err(ShapeError::ElementCount { rows, cols, expected, found: data.len() }.into());
    }
    Ok(Matrix::from_vec(rows, cols, data)?)
}

/// Split off the header, returning `(rows, cols, remaining text)`.
fn parse_header(text: &str) -> std::result::Result<(usize, usize, &str), String> {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix('#') {
        let (line, body) = rest.split_once('\n').unwrap_or((rest, ""));
        let inner = line.trim().trim_start_matches('(').trim_end_matches(')');
        let (r, c) = inner
            .split_once(',')
            .ok_or_else(|| format!("header '#{line}' is not of the form '# (rows, cols)'"))?;
        return Ok((parse_dim(r, "rows")?, parse_dim(c, "cols")?, body));
    }

    let mut tokens = trimmed.splitn(3, char::is_whitespace);
    let r = tokens.next().filter(|t| !t.is_empty()).ok_or("missing header")?;
    let c = tokens.next().ok_or("header is missing the column count")?;
    let body = tokens.next().unwrap_or("");
    // `splitn` leaves leading whitespace on the column token when the
    // separator run is longer than one character.
    let (c, body) = split_first_token(c, body);
    Ok((parse_dim(r, "rows")?, parse_dim(c, "cols")?, body))
}

fn split_first_token<'a>(token: &'a str, body: &'a str) -> (&'a str, &'a str) {
    if token.trim().is_empty() {
        let body = body.trim_start();
        let end = body.find(char::is_whitespace).unwrap_or(body.len());
        (&body[..end], &body[end..])
    } else {
        (token, body)
    }
}

fn parse_dim(token: &str, what: &str) -> std::result::Result<usize, String> {
    token.trim().parse().map_err(|_| format!("{what} '{}' is not a non-negative integer", token.trim()))
}

/// Write a matrix in the text format.
pub fn write_matrix<W: Write>(mut out: W, matrix: &Matrix) -> std::io::Result<()> {
    writeln!(out, "{} {}", matrix.rows(), matrix.cols())?;
    for row in matrix.row_iter() {
        let mut first = true;
        for value in row {
            if !first {
                out.write_all(b" ")?;
            }
            write!(out, "{value}")?;
            first = false;
        }
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// Write a matrix file, replacing any existing file.
pub fn save_matrix(path: impl AsRef<Path>, matrix: &Matrix) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| GemmError::io(path, e))?;
    write_matrix(BufWriter::new(file), matrix).map_err(|e| GemmError::io(path, e))?;
    debug!(path = %path.display(), rows = matrix.rows(), cols = matrix.cols(), "saved matrix");
    Ok(())
}
