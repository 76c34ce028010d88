//! EKF measurement update.

use nalgebra::{DMatrix, DVector};

use crate::prelude::Error;

/// Standard Kalman measurement update:
/// `K = Pp H^T (H Pp H^T + R)^-1`, `xp += K v`, `Pp = (I - K H) Pp`.
///
/// `R` must be symmetric positive definite by construction (elevation-scaled
/// DD variances); if the innovation covariance fails to invert, the epoch is
/// left unmodified and `Error::MatrixInversion` is returned.
pub fn measurement_update(
    x: &mut DVector<f64>,
    p: &mut DMatrix<f64>,
    h: &DMatrix<f64>,
    r: &DMatrix<f64>,
    v: &DVector<f64>,
) -> Result<(), Error> {
    let m = h.nrows();
    let n = h.ncols();
    if h.ncols() != x.len() || p.nrows() != n || p.ncols() != n || r.nrows() != m || r.ncols() != m {
        return Err(Error::MatrixDimension);
    }

    let pht = &*p * h.transpose();
    let s = h * &pht + r;
    let s_inv = s
        .clone()
        .cholesky()
        .map(|chol| chol.inverse())
        .or_else(|| s.clone().try_inverse())
        .ok_or(Error::MatrixInversion)?;

    let k = &pht * &s_inv;
    *x += &k * v;

    let identity = DMatrix::<f64>::identity(n, n);
    let ikh = &identity - &k * h;
    *p = &ikh * &*p;

    // Symmetrize to guard against asymmetric drift from repeated updates.
    *p = (&*p + p.transpose()) * 0.5;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn update_reduces_position_variance() {
        let mut x = DVector::from_vec(vec![0.0, 0.0, 0.0]);
        let mut p = DMatrix::<f64>::identity(3, 3) * 100.0;
        let h = DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 0.0]);
        let r = DMatrix::from_row_slice(1, 1, &[1.0]);
        let v = DVector::from_vec(vec![5.0]);

        measurement_update(&mut x, &mut p, &h, &r, &v).unwrap();
        assert!(p[(0, 0)] < 100.0);
        assert!(x[0] > 0.0);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut x = DVector::from_vec(vec![0.0, 0.0]);
        let mut p = DMatrix::<f64>::identity(2, 2);
        let h = DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 0.0]);
        let r = DMatrix::from_row_slice(1, 1, &[1.0]);
        let v = DVector::from_vec(vec![1.0]);
        assert!(measurement_update(&mut x, &mut p, &h, &r, &v).is_err());
    }
}
