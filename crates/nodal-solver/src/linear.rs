//! Linear system solvers.
//!
//! The Newton driver hands over a [`MatrixStore`]; small systems go through a
//! dense nalgebra LU, larger ones through faer's sparse LU built from the
//! store's triplets.

use faer::prelude::*;
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::{DMatrix, DVector};
use nodal_core::MatrixStore;
use num_complex::Complex64;

use crate::error::{Error, Result};

/// Systems with this many or more unknowns use the sparse solver path.
pub const SPARSE_THRESHOLD: usize = 50;

/// Solve a linear system Ax = b using LU decomposition.
pub fn solve_dense(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    check_square(a.nrows(), a.ncols(), b.len())?;
    a.clone().lu().solve(b).ok_or(Error::SingularMatrix)
}

/// Solve a complex linear system Ax = b using LU decomposition.
pub fn solve_complex(a: &DMatrix<Complex64>, b: &DVector<Complex64>) -> Result<DVector<Complex64>> {
    check_square(a.nrows(), a.ncols(), b.len())?;
    a.clone().lu().solve(b).ok_or(Error::SingularMatrix)
}

fn check_square(rows: usize, cols: usize, rhs: usize) -> Result<()> {
    if rows != cols {
        return Err(Error::DimensionMismatch {
            expected: rows,
            actual: cols,
        });
    }
    if rows != rhs {
        return Err(Error::DimensionMismatch {
            expected: rows,
            actual: rhs,
        });
    }
    Ok(())
}

/// Solve a sparse system given as `(row, col, value)` triplets.
///
/// Duplicate positions are summed by faer.
pub fn solve_sparse(
    size: usize,
    triplets: &[(usize, usize, f64)],
    rhs: &DVector<f64>,
) -> Result<DVector<f64>> {
    if size != rhs.len() {
        return Err(Error::DimensionMismatch {
            expected: size,
            actual: rhs.len(),
        });
    }
    let faer_triplets: Vec<_> = triplets
        .iter()
        .map(|&(r, c, v)| Triplet::new(r, c, v))
        .collect();
    let mat = SparseColMat::<usize, f64>::try_new_from_triplets(size, size, &faer_triplets)
        .map_err(|_| Error::SingularMatrix)?;
    let lu = mat.sp_lu().map_err(|_| Error::SingularMatrix)?;
    let x = lu.solve(&Col::<f64>::from_fn(size, |i| rhs[i]));
    let x = DVector::from_fn(size, |i, _| x[i]);
    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(Error::SingularMatrix)
    }
}

/// Complex counterpart of [`solve_sparse`].
pub fn solve_sparse_complex(
    size: usize,
    triplets: &[(usize, usize, Complex64)],
    rhs: &DVector<Complex64>,
) -> Result<DVector<Complex64>> {
    if size != rhs.len() {
        return Err(Error::DimensionMismatch {
            expected: size,
            actual: rhs.len(),
        });
    }
    let faer_triplets: Vec<_> = triplets
        .iter()
        .map(|&(r, c, v)| Triplet::new(r, c, c64::new(v.re, v.im)))
        .collect();
    let mat = SparseColMat::<usize, c64>::try_new_from_triplets(size, size, &faer_triplets)
        .map_err(|_| Error::SingularMatrix)?;
    let lu = mat.sp_lu().map_err(|_| Error::SingularMatrix)?;
    let x = lu.solve(&Col::<c64>::from_fn(size, |i| c64::new(rhs[i].re, rhs[i].im)));
    let x = DVector::from_fn(size, |i, _| Complex64::new(x[i].re, x[i].im));
    if x.iter().all(|v| v.re.is_finite() && v.im.is_finite()) {
        Ok(x)
    } else {
        Err(Error::SingularMatrix)
    }
}

/// Solve the real system held by `matrix`.
pub fn solve_store(matrix: &MatrixStore) -> Result<DVector<f64>> {
    let size = matrix.size();
    let rhs = DVector::from_column_slice(matrix.rhs());
    if size == 0 {
        return Ok(rhs);
    }
    if size >= SPARSE_THRESHOLD {
        let triplets: Vec<_> = matrix.triplets().collect();
        solve_sparse(size, &triplets, &rhs)
    } else {
        solve_dense(&matrix.to_dense_matrix(), &rhs)
    }
}

/// Solve the complex system held by `matrix`.
pub fn solve_store_complex(matrix: &MatrixStore) -> Result<DVector<Complex64>> {
    let size = matrix.size();
    let rhs = matrix.complex_rhs();
    if size == 0 {
        return Ok(rhs);
    }
    if size >= SPARSE_THRESHOLD {
        let triplets: Vec<_> = matrix.complex_triplets().collect();
        solve_sparse_complex(size, &triplets, &rhs)
    } else {
        solve_complex(&matrix.to_dense_complex(), &rhs)
    }
}

/// Determinant of the complex matrix held by `matrix`.
pub fn complex_determinant(matrix: &MatrixStore) -> Complex64 {
    if matrix.size() == 0 {
        return Complex64::new(1.0, 0.0);
    }
    matrix.to_dense_complex().lu().determinant()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};
    use nodal_core::NodeId;

    #[test]
    fn test_solve_simple() {
        // 2x + y = 5, x + 3y = 6
        let a = dmatrix![2.0, 1.0; 1.0, 3.0];
        let b = dvector![5.0, 6.0];
        let x = solve_dense(&a, &b).unwrap();
        assert!((x[0] - 1.8).abs() < 1e-10);
        assert!((x[1] - 1.4).abs() < 1e-10);
    }

    #[test]
    fn test_singular_matrix() {
        let a = dmatrix![1.0, 2.0; 2.0, 4.0];
        let b = dvector![1.0, 2.0];
        assert!(matches!(solve_dense(&a, &b), Err(Error::SingularMatrix)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = dmatrix![1.0, 2.0; 3.0, 4.0];
        let b = dvector![1.0, 2.0, 3.0];
        assert!(matches!(
            solve_dense(&a, &b),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_solve_sparse_matches_dense() {
        let size = 60;
        let a = DMatrix::from_fn(size, size, |i, j| {
            if i == j {
                (size as f64) + 1.0
            } else if i.abs_diff(j) <= 2 {
                1.0 / ((i as f64 - j as f64).abs() + 1.0)
            } else {
                0.0
            }
        });
        let b = DVector::from_fn(size, |i, _| (i + 1) as f64);
        let mut triplets = Vec::new();
        for i in 0..size {
            for j in 0..size {
                if a[(i, j)] != 0.0 {
                    triplets.push((i, j, a[(i, j)]));
                }
            }
        }
        let x_dense = solve_dense(&a, &b).unwrap();
        let x_sparse = solve_sparse(size, &triplets, &b).unwrap();
        for i in 0..size {
            assert!(
                (x_dense[i] - x_sparse[i]).abs() < 1e-10,
                "Mismatch at [{}]: dense={}, sparse={}",
                i,
                x_dense[i],
                x_sparse[i]
            );
        }
    }

    #[test]
    fn test_solve_store() {
        let mut m = MatrixStore::new(2);
        let (a, b) = (NodeId::new(1), NodeId::new(2));
        let haa = m.entry(a, a);
        let hbb = m.entry(b, b);
        let hab = m.entry(a, b);
        let hba = m.entry(b, a);
        m.add(haa, 2.0);
        m.add(hab, 1.0);
        m.add(hba, 1.0);
        m.add(hbb, 3.0);
        m.add_rhs(a, 5.0);
        m.add_rhs(b, 6.0);
        let x = solve_store(&m).unwrap();
        assert!((x[0] - 1.8).abs() < 1e-10, "x[0] = {}", x[0]);
        assert!((x[1] - 1.4).abs() < 1e-10, "x[1] = {}", x[1]);
    }

    #[test]
    fn test_complex_determinant() {
        let mut m = MatrixStore::new(1);
        let h = m.entry(NodeId::new(1), NodeId::new(1));
        m.add_complex(h, 1e-3, 2e-3);
        let det = complex_determinant(&m);
        assert!((det - Complex64::new(1e-3, 2e-3)).norm() < 1e-15);
    }
}
