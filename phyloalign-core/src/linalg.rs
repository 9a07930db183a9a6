//! Small dense linear algebra on `ndarray` matrices: the silent-state
//! closures of the DP engine and the eigensystems of reversible rate
//! matrices. Matrices here are at most a few dozen rows.

use ndarray::Array2;

/// Gauss-Jordan inverse with partial pivoting. `None` when singular.
pub fn invert(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());
    let mut m = a.clone();
    let mut inv = Array2::<f64>::eye(n);

    for col in 0..n {
        let mut pivot = col;
        let mut best = m[[col, col]].abs();
        for row in (col + 1)..n {
            let v = m[[row, col]].abs();
            if v > best {
                best = v;
                pivot = row;
            }
        }
        if best < 1e-300 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                m.swap([col, k], [pivot, k]);
                inv.swap([col, k], [pivot, k]);
            }
        }

        let d = m[[col, col]];
        for k in 0..n {
            m[[col, k]] /= d;
            inv[[col, k]] /= d;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let f = m[[row, col]];
            if f == 0.0 {
                continue;
            }
            for k in 0..n {
                m[[row, k]] -= f * m[[col, k]];
                inv[[row, k]] -= f * inv[[col, k]];
            }
        }
    }
    Some(inv)
}

/// `(I - q)^-1`, the total weight of all silent detours.
pub fn closure(q: &Array2<f64>) -> Option<Array2<f64>> {
    let n = q.nrows();
    let a = Array2::<f64>::eye(n) - q;
    invert(&a)
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
/// Returns the eigenvalues and a matrix whose columns are the matching
/// orthonormal eigenvectors.
pub fn symmetric_eigen(a: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut m = a.clone();
    let mut v = Array2::<f64>::eye(n);

    for _sweep in 0..100 {
        let mut off = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                off += m[[i, j]] * m[[i, j]];
            }
        }
        if off < 1e-30 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = m[[p, q]];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let mkp = m[[k, p]];
                    let mkq = m[[k, q]];
                    m[[k, p]] = c * mkp - s * mkq;
                    m[[k, q]] = s * mkp + c * mkq;
                }
                for k in 0..n {
                    let mpk = m[[p, k]];
                    let mqk = m[[q, k]];
                    m[[p, k]] = c * mpk - s * mqk;
                    m[[q, k]] = s * mpk + c * mqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let values = (0..n).map(|i| m[[i, i]]).collect();
    (values, v)
}
