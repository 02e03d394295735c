//! Polynomial least squares.
//!
//! The peak seeder fits a quadratic to the few samples around a candidate
//! peak, on standardized axes. Vandermonde rows `[x², x, 1]` are solved with
//! SVD, which handles tall and exactly determined systems alike (`QR::solve`
//! in nalgebra only accepts square matrices).

use nalgebra::{DMatrix, DVector};

/// Singular-value cutoffs tried in order before giving up.
const SVD_TOLERANCES: [f64; 3] = [1e-10, 1e-8, 1e-6];

/// Solve `min ‖X β - y‖²`. `None` when shapes disagree or no cutoff yields a
/// finite solution.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() == 0 || x.nrows() != y.len() {
        return None;
    }
    let svd = x.clone().svd(true, true);
    SVD_TOLERANCES.iter().find_map(|&tol| {
        svd.solve(y, tol)
            .ok()
            .filter(|beta| beta.iter().all(|v| v.is_finite()))
    })
}

/// Unweighted polynomial fit of the given degree, coefficients highest power first.
///
/// Needs at least `degree + 1` points.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Option<Vec<f64>> {
    let ncols = degree + 1;
    if x.len() != y.len() || x.len() < ncols {
        return None;
    }
    let design = DMatrix::from_fn(x.len(), ncols, |i, j| x[i].powi((degree - j) as i32));
    let rhs = DVector::from_column_slice(y);
    let beta = solve_least_squares(&design, &rhs)?;
    Some(beta.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polyfit_recovers_quadratic() {
        let x = [-1.0, -0.5, 0.0, 0.5, 1.0];
        let y: Vec<f64> = x.iter().map(|v| -2.0 * v * v + 0.5 * v + 3.0).collect();
        let c = polyfit(&x, &y, 2).unwrap();
        assert!((c[0] + 2.0).abs() < 1e-9);
        assert!((c[1] - 0.5).abs() < 1e-9);
        assert!((c[2] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn polyfit_exactly_determined() {
        let c = polyfit(&[-1.0, 0.0, 1.0], &[2.0, 1.0, 2.0], 2).unwrap();
        assert!((c[0] - 1.0).abs() < 1e-9);
        assert!(c[1].abs() < 1e-9);
        assert!((c[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn polyfit_needs_enough_points() {
        assert!(polyfit(&[0.0, 1.0], &[1.0, 2.0], 2).is_none());
        assert!(polyfit(&[0.0, 1.0, 2.0], &[1.0, 2.0], 1).is_none());
    }

    #[test]
    fn solver_rejects_shape_mismatch() {
        let x = DMatrix::from_row_slice(2, 1, &[1.0, 1.0]);
        let y = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        assert!(solve_least_squares(&x, &y).is_none());
    }
}
