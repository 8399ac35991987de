//! Dense matrix helpers over `Decimal`.
//!
//! Matrices are row-major `Vec<Vec<Decimal>>`. Inversion and linear solves use
//! Gauss-Jordan elimination with partial pivoting; a pivot smaller than
//! `SINGULAR_PIVOT_RATIO` times the largest entry of the input is treated as
//! zero, which is how exactly collinear covariance matrices are detected
//! despite decimal rounding in the elimination.

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::error::FolioError;
use crate::FolioResult;

const SINGULAR_PIVOT_RATIO: Decimal = dec!(0.000000000000001);

/// Dot product.
pub fn dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

/// Matrix-vector multiplication.
pub fn mat_vec_multiply(mat: &[Vec<Decimal>], v: &[Decimal]) -> Vec<Decimal> {
    mat.iter().map(|row| dot(row, v)).collect()
}

/// Quadratic form v' * M * v.
pub fn quad_form(v: &[Decimal], mat: &[Vec<Decimal>]) -> Decimal {
    dot(v, &mat_vec_multiply(mat, v))
}

/// Matrix-matrix multiplication.
#[allow(clippy::needless_range_loop)]
pub fn mat_multiply(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Vec<Vec<Decimal>> {
    let m = a.len();
    let p = if m > 0 { a[0].len() } else { 0 };
    let n_cols = if !b.is_empty() { b[0].len() } else { 0 };
    let mut c = vec![vec![Decimal::ZERO; n_cols]; m];
    for i in 0..m {
        for j in 0..n_cols {
            let mut sum = Decimal::ZERO;
            for k in 0..p {
                sum += a[i][k] * b[k][j];
            }
            c[i][j] = sum;
        }
    }
    c
}

pub fn transpose(a: &[Vec<Decimal>]) -> Vec<Vec<Decimal>> {
    let rows = a.len();
    let cols = if rows > 0 { a[0].len() } else { 0 };
    (0..cols)
        .map(|j| (0..rows).map(|i| a[i][j]).collect())
        .collect()
}

pub fn mat_scale(a: &[Vec<Decimal>], s: Decimal) -> Vec<Vec<Decimal>> {
    a.iter()
        .map(|row| row.iter().map(|v| *v * s).collect())
        .collect()
}

pub fn mat_add(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Vec<Vec<Decimal>> {
    a.iter()
        .zip(b.iter())
        .map(|(ra, rb)| ra.iter().zip(rb.iter()).map(|(x, y)| *x + *y).collect())
        .collect()
}

/// Diagonal matrix holding the diagonal of `a`.
pub fn diagonal_of(a: &[Vec<Decimal>]) -> Vec<Vec<Decimal>> {
    let n = a.len();
    let mut d = vec![vec![Decimal::ZERO; n]; n];
    for (i, row) in d.iter_mut().enumerate() {
        row[i] = a[i][i];
    }
    d
}

/// Largest absolute entry of a vector.
pub fn max_abs(v: &[Decimal]) -> Decimal {
    v.iter()
        .map(|x| x.abs())
        .fold(Decimal::ZERO, |a, b| if b > a { b } else { a })
}

fn max_abs_matrix(a: &[Vec<Decimal>]) -> Decimal {
    a.iter()
        .map(|row| max_abs(row))
        .fold(Decimal::ZERO, |a, b| if b > a { b } else { a })
}

/// Square root; zero for non-positive input (tiny negative variances from
/// rounding are clamped).
pub fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}

/// Reduce the augmented matrix `aug = [A | rhs]` in place to `[I | A^-1 rhs]`.
#[allow(clippy::needless_range_loop)]
fn gauss_jordan(aug: &mut [Vec<Decimal>], n: usize, scale: Decimal, context: &str) -> FolioResult<()> {
    let threshold = scale * SINGULAR_PIVOT_RATIO;
    for col in 0..n {
        // Partial pivoting
        let mut max_row = col;
        let mut max_val = aug[col][col].abs();
        for row in (col + 1)..n {
            let val = aug[row][col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }

        if max_val.is_zero() || max_val <= threshold {
            return Err(FolioError::numerical(
                context,
                "Matrix is singular (not invertible)",
            ));
        }

        if max_row != col {
            aug.swap(col, max_row);
        }

        let pivot = aug[col][col];
        for cell in aug[col].iter_mut() {
            *cell /= pivot;
        }

        let pivot_row = aug[col].clone();
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor.is_zero() {
                continue;
            }
            for (cell, &pv) in aug[row].iter_mut().zip(pivot_row.iter()) {
                *cell -= factor * pv;
            }
        }
    }
    Ok(())
}

/// Matrix inverse via Gauss-Jordan with partial pivoting.
pub fn mat_inverse(mat: &[Vec<Decimal>], context: &str) -> FolioResult<Vec<Vec<Decimal>>> {
    let n = mat.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    if mat.iter().any(|row| row.len() != n) {
        return Err(FolioError::validation(context, "Matrix must be square"));
    }

    let mut aug: Vec<Vec<Decimal>> = Vec::with_capacity(n);
    for (i, src) in mat.iter().enumerate() {
        let mut row = Vec::with_capacity(2 * n);
        row.extend_from_slice(src);
        for j in 0..n {
            row.push(if i == j { Decimal::ONE } else { Decimal::ZERO });
        }
        aug.push(row);
    }

    gauss_jordan(&mut aug, n, max_abs_matrix(mat), context)?;
    Ok(aug.iter().map(|row| row[n..].to_vec()).collect())
}

/// Solve A x = b.
pub fn solve_linear(a: &[Vec<Decimal>], b: &[Decimal], context: &str) -> FolioResult<Vec<Decimal>> {
    let n = a.len();
    if b.len() != n || a.iter().any(|row| row.len() != n) {
        return Err(FolioError::validation(
            context,
            format!("Linear system dimensions do not match (n={}, rhs={})", n, b.len()),
        ));
    }
    let mut aug: Vec<Vec<Decimal>> = a
        .iter()
        .zip(b.iter())
        .map(|(row, rhs)| {
            let mut r = row.clone();
            r.push(*rhs);
            r
        })
        .collect();
    gauss_jordan(&mut aug, n, max_abs_matrix(a), context)?;
    Ok(aug.iter().map(|row| row[n]).collect())
}
