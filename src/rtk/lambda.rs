//! LAMBDA/MLAMBDA integer ambiguity resolution.

use nalgebra::{DMatrix, DVector};

use crate::constants::{LAMBDA_LOOPMAX, LAMBDA_REDUCTION_EPS};
use crate::prelude::Error;

/// LD factorization of a symmetric positive-definite `Q`: `Q = L^T diag(D) L`
/// with `L` unit lower triangular, computed in reverse order.
pub fn ld_factorize(q: &DMatrix<f64>) -> Result<(DMatrix<f64>, DVector<f64>), Error> {
    let n = q.nrows();
    if q.ncols() != n {
        return Err(Error::MatrixDimension);
    }
    let mut a = q.clone();
    let mut l = DMatrix::<f64>::identity(n, n);
    let mut d = DVector::zeros(n);

    for i in (0..n).rev() {
        d[i] = a[(i, i)];
        if d[i] <= 0.0 {
            return Err(Error::MatrixInversion);
        }
        let inv_d = 1.0 / d[i];
        for j in 0..i {
            l[(i, j)] = a[(i, j)] * inv_d;
        }
        for j in 0..i {
            for k in 0..=j {
                a[(j, k)] -= l[(i, j)] * a[(i, k)];
            }
        }
    }
    Ok((l, d))
}

/// Decorrelation/reduction: integer Gauss transforms plus delta-permutations,
/// accumulating the unimodular transform `Z`.
pub fn reduce(l: &mut DMatrix<f64>, d: &mut DVector<f64>) -> DMatrix<f64> {
    let n = d.len();
    let mut z = DMatrix::<f64>::identity(n, n);
    if n < 2 {
        return z;
    }

    let mut j = n as isize - 2;
    while j >= 0 {
        let ju = j as usize;
        for i in (ju + 1)..n {
            let mu = (l[(i, ju)]).round();
            if mu.abs() > LAMBDA_REDUCTION_EPS {
                // Gauss-transform row i against row j (only the strictly
                // lower-triangular part below column j is affected).
                for k in 0..=ju {
                    let correction = mu * l[(ju, k)];
                    l[(i, k)] -= correction;
                }
                for k in 0..n {
                    let correction = mu * z[(ju, k)];
                    z[(i, k)] -= correction;
                }
            }
        }

        let delta = d[ju] + l[(ju + 1, ju)] * l[(ju + 1, ju)] * d[ju + 1];
        if delta < d[ju + 1] {
            // Permute columns j, j+1: swap D entries, swap L rows below the
            // pivot, update the affected L column, and restart from n-2.
            let eta = d[ju] / delta;
            let lam = d[ju + 1] * l[(ju + 1, ju)] / delta;
            d[ju] = eta * d[ju + 1];
            d[ju + 1] = delta;

            for k in 0..ju {
                let tmp = l[(ju, k)];
                l[(ju, k)] = l[(ju + 1, k)];
                l[(ju + 1, k)] = tmp;
            }
            l[(ju + 1, ju)] = lam;
            for k in (ju + 2)..n {
                let tmp = l[(k, ju)];
                l[(k, ju)] = l[(k, ju + 1)];
                l[(k, ju + 1)] = eta * tmp - l[(ju + 1, ju)] * l[(k, ju + 1)];
            }

            for k in 0..n {
                z.swap((ju, k), (ju + 1, k));
            }
            j = n as isize - 2;
        } else {
            j -= 1;
        }
    }
    z
}

/// One bounded depth-first search candidate: integer vector plus sum of
/// squared residuals in the decorrelated space.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub z: DVector<i64>,
    pub s: f64,
}

/// Bounded depth-first MLAMBDA search. Keeps the two smallest-distance
/// candidates (enough for the ratio test). Loop capped at `LAMBDA_LOOPMAX`
/// iterations.
pub fn search(z_hat: &DVector<f64>, d: &DVector<f64>, l: &DMatrix<f64>) -> Result<[Candidate; 2], Error> {
    let n = z_hat.len();
    if n < 2 {
        return Err(Error::NotEnoughAmbiguities);
    }

    let mut best: Vec<Candidate> = Vec::new();
    let mut chi2 = f64::INFINITY;
    let mut iterations = 0usize;

    // Conditional means, computed once from L/z_hat for the recursive search.
    let mut zb = vec![0.0; n];
    zb[n - 1] = z_hat[n - 1];

    fn search_level(
        level: isize,
        n: usize,
        l: &DMatrix<f64>,
        d: &DVector<f64>,
        z_hat: &DVector<f64>,
        zb: &mut [f64],
        partial_z: &mut Vec<i64>,
        s_so_far: f64,
        chi2: &mut f64,
        best: &mut Vec<Candidate>,
        iterations: &mut usize,
    ) -> Result<(), Error> {
        *iterations += 1;
        if *iterations > LAMBDA_LOOPMAX {
            return Err(Error::LambdaSearchTimeout);
        }

        if level < 0 {
            let mut z_full = vec![0i64; n];
            for (idx, &v) in partial_z.iter().enumerate() {
                z_full[n - 1 - idx] = v;
            }
            let cand = Candidate {
                z: DVector::from_vec(z_full),
                s: s_so_far,
            };
            if best.len() < 2 {
                best.push(cand);
                best.sort_by(|a, b| a.s.partial_cmp(&b.s).unwrap());
                if best.len() == 2 {
                    *chi2 = best[1].s;
                }
            } else if s_so_far < best[1].s {
                best[1] = cand;
                best.sort_by(|a, b| a.s.partial_cmp(&b.s).unwrap());
                *chi2 = best[1].s;
            }
            return Ok(());
        }

        let k = level as usize;
        let center = zb[k];
        let mut z_k = center.round();
        let mut step = if z_k > center { 1.0 } else { -1.0 };
        let mut first = true;

        loop {
            let dz = z_k - center;
            let s_k = s_so_far + dz * dz / d[k];
            if s_k > *chi2 && best.len() >= 2 {
                break;
            }

            partial_z.push(z_k as i64);
            if k > 0 {
                let mut sum = 0.0;
                for j in 0..k {
                    sum += l[(k, j)] * (z_k - zb[k]);
                }
                let saved = zb[k - 1];
                zb[k - 1] = z_hat[k - 1] - sum;
                search_level(level - 1, n, l, d, z_hat, zb, partial_z, s_k, chi2, best, iterations)?;
                zb[k - 1] = saved;
            } else {
                search_level(-1, n, l, d, z_hat, zb, partial_z, s_k, chi2, best, iterations)?;
            }
            partial_z.pop();

            if first {
                first = false;
                step = if z_k > center { -1.0 } else { 1.0 };
            }
            z_k += step;
            step = -step - step.signum();
            if best.len() >= 2 && s_k > *chi2 {
                break;
            }
            if (z_k - center).abs() > 1.0E6 {
                break;
            }
        }
        Ok(())
    }

    let mut partial_z = Vec::with_capacity(n);
    search_level(
        n as isize - 1,
        n,
        l,
        d,
        z_hat,
        &mut zb,
        &mut partial_z,
        0.0,
        &mut chi2,
        &mut best,
        &mut iterations,
    )?;

    if best.len() < 2 {
        return Err(Error::NotEnoughAmbiguities);
    }
    Ok([best[0].clone(), best[1].clone()])
}

/// Back-transforms an integer candidate from the decorrelated space to
/// original coordinates: `b = Z^-T z_int`, solved by back-substitution
/// against the (column-permuted triangular) `Z`.
pub fn back_transform(z_transform: &DMatrix<f64>, z_int: &DVector<i64>) -> Result<DVector<f64>, Error> {
    let z_f64 = DVector::from_iterator(z_int.len(), z_int.iter().map(|&v| v as f64));
    let z_t = z_transform.transpose();
    z_t.try_inverse()
        .map(|inv| inv * z_f64)
        .ok_or(Error::MatrixInversion)
}

/// Ratio test: accept the best candidate when `s[1]/s[0] >= thres_ar`.
pub fn ratio_test(s0: f64, s1: f64, thres_ar: f64) -> Result<f64, Error> {
    if s0 <= 0.0 {
        return Err(Error::MatrixInversion);
    }
    let ratio = s1 / s0;
    if ratio < thres_ar {
        return Err(Error::AmbiguityRatioTooLow(ratio, thres_ar));
    }
    Ok(ratio)
}

/// Fixed-solution update: with `Qb = D Qa D^T`, `Qab` the cross-covariance
/// between non-ambiguity and ambiguity states, `xa = x - Qab Qb^-1 (b_hat -
/// b_int)`, `Pa = Pnb - Qab Qb^-1 Qab^T`.
pub fn fixed_solution_update(
    x_nonamb: &DVector<f64>,
    p_nonamb: &DMatrix<f64>,
    qab: &DMatrix<f64>,
    qb: &DMatrix<f64>,
    b_hat: &DVector<f64>,
    b_int: &DVector<f64>,
) -> Result<(DVector<f64>, DMatrix<f64>), Error> {
    let qb_inv = qb.clone().try_inverse().ok_or(Error::MatrixInversion)?;
    let delta = b_hat - b_int;
    let correction = qab * &qb_inv * &delta;
    let xa = x_nonamb - correction;
    let pa = p_nonamb - qab * &qb_inv * qab.transpose();
    Ok((xa, pa))
}
