//! Dense matrix helpers for the PCA estimator.
//!
//! Matrices are row-major `Vec<Vec<f64>>`; feature counts are small (tens),
//! so clarity wins over blocking or SIMD.

pub type Matrix = Vec<Vec<f64>>;

/// Power-iteration rounds per extracted component.
pub const POWER_ITERATIONS: usize = 100;

/// Sample covariance `(1/(n−1)) · XᵀX` of already-centred rows.
pub fn covariance(rows: &[Vec<f64>]) -> Matrix {
    let n = rows.len();
    let p = rows.first().map_or(0, Vec::len);
    let mut cov = vec![vec![0.0; p]; p];
    if n < 2 {
        return cov;
    }
    for row in rows {
        for i in 0..p {
            for j in i..p {
                cov[i][j] += row[i] * row[j];
            }
        }
    }
    let scale = 1.0 / (n - 1) as f64;
    for i in 0..p {
        for j in i..p {
            cov[i][j] *= scale;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

pub fn trace(m: &Matrix) -> f64 {
    m.iter().enumerate().map(|(i, row)| row[i]).sum()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mat_vec(m: &Matrix, v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

fn normalize(v: &mut [f64]) -> f64 {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

/// Eigenpairs of a symmetric matrix, eigenvalues descending.
#[derive(Debug, Clone, PartialEq)]
pub struct Eigen {
    pub values: Vec<f64>,
    /// `vectors[i]` is the unit eigenvector for `values[i]`.
    pub vectors: Matrix,
}

/// Extracts all eigenpairs by power iteration with deflation
/// `M ← M − λ·v·vᵀ`, then sorts them by eigenvalue.
pub fn eigen_decompose(matrix: &Matrix) -> Eigen {
    let p = matrix.len();
    let mut m = matrix.clone();
    let mut pairs: Vec<(f64, Vec<f64>)> = Vec::with_capacity(p);

    for component in 0..p {
        // Unequal start weights keep the seed off symmetric null directions.
        let mut v: Vec<f64> = (0..p).map(|i| 1.0 + (i + component) as f64 * 0.1).collect();
        normalize(&mut v);

        for _ in 0..POWER_ITERATIONS {
            let mut next = mat_vec(&m, &v);
            if normalize(&mut next) == 0.0 {
                break;
            }
            v = next;
        }

        let lambda = dot(&v, &mat_vec(&m, &v));
        for i in 0..p {
            for j in 0..p {
                m[i][j] -= lambda * v[i] * v[j];
            }
        }
        pairs.push((lambda, v));
    }

    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));
    let (values, vectors): (Vec<f64>, Matrix) = pairs.into_iter().unzip();
    Eigen { values, vectors }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covariance_of_centred_rows() {
        let rows = vec![vec![1.0, 2.0], vec![-1.0, -2.0]];
        let cov = covariance(&rows);
        assert_eq!(cov[0][0], 2.0);
        assert_eq!(cov[0][1], 4.0);
        assert_eq!(cov[1][0], 4.0);
        assert_eq!(cov[1][1], 8.0);
    }

    #[test]
    fn test_eigen_diagonal() {
        let m = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 5.0, 0.0],
            vec![0.0, 0.0, 3.0],
        ];
        let e = eigen_decompose(&m);
        assert!((e.values[0] - 5.0).abs() < 1e-6);
        assert!((e.values[1] - 3.0).abs() < 1e-6);
        assert!((e.values[2] - 1.0).abs() < 1e-6);
        assert!(e.vectors[0][1].abs() > 0.999);
    }

    #[test]
    fn test_eigen_sum_matches_trace() {
        let m = vec![vec![4.0, 1.0], vec![1.0, 3.0]];
        let e = eigen_decompose(&m);
        let sum: f64 = e.values.iter().sum();
        assert!((sum - trace(&m)).abs() < 1e-9);
        // (7 ± sqrt(5)) / 2
        assert!((e.values[0] - (7.0 + 5.0_f64.sqrt()) / 2.0).abs() < 1e-6);
    }
}
