//! Dense symmetric positive-definite solves

use crate::{Result, SosError};
use ndarray::{Array1, Array2};

/// Lower-triangular Cholesky factor of `a`
pub fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(SosError::Model(format!(
            "cholesky needs a square matrix, got {}x{}",
            n,
            a.ncols()
        )));
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut diag = a[[j, j]];
        for k in 0..j {
            diag -= l[[j, k]] * l[[j, k]];
        }
        if diag <= 0.0 || !diag.is_finite() {
            return Err(SosError::Model(format!(
                "matrix is not positive definite (pivot {} = {:e})",
                j, diag
            )));
        }
        let ljj = diag.sqrt();
        l[[j, j]] = ljj;

        for i in (j + 1)..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / ljj;
        }
    }
    Ok(l)
}

/// Solve `L L^T x = b` given the Cholesky factor
pub fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= l[[i, k]] * y[k];
        }
        y[i] = s / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut s = y[i];
        for k in (i + 1)..n {
            s -= l[[k, i]] * x[k];
        }
        x[i] = s / l[[i, i]];
    }
    x
}

/// Solve `a x = b` for symmetric positive-definite `a`
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let l = cholesky(a)?;
    Ok(cholesky_solve(&l, b))
}

/// Inverse of a symmetric positive-definite matrix
pub fn inverse(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    let l = cholesky(a)?;
    let mut inv = Array2::<f64>::zeros((n, n));
    let mut e = Array1::<f64>::zeros(n);
    for j in 0..n {
        e.fill(0.0);
        e[j] = 1.0;
        let col = cholesky_solve(&l, &e);
        inv.column_mut(j).assign(&col);
    }
    Ok(inv)
}
