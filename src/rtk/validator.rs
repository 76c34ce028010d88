//! Post-fit validation, solution status assignment, and AR-hold.

use nalgebra::{DMatrix, DVector};

use crate::cfg::{Config, ModeAr};
use crate::constants::VAR_HOLDAMB;
use crate::solution::SolutionStatus;

/// Post-fit residual test: flags the epoch as degraded (not rejected) if any
/// `v^2 > (4*sigma)^2 * R_diag`.
pub fn postfit_degraded(v: &DVector<f64>, r_diag: &DVector<f64>) -> bool {
    v.iter()
        .zip(r_diag.iter())
        .any(|(&vi, &ri)| vi * vi > 16.0 * ri)
}

/// Assigns the epoch's `SolutionStatus`.
pub struct StatusInputs {
    pub lambda_validated: bool,
    pub postfit_ok: bool,
    pub ekf_update_ok: bool,
    pub common_l1_count: usize,
    pub mode_is_dgps: bool,
    pub dgps_code_only_ok: bool,
}

pub fn assign_status(inputs: &StatusInputs) -> SolutionStatus {
    if inputs.lambda_validated && inputs.postfit_ok {
        SolutionStatus::Fix
    } else if inputs.ekf_update_ok && inputs.common_l1_count >= 4 {
        SolutionStatus::Float
    } else if inputs.mode_is_dgps && inputs.dgps_code_only_ok {
        SolutionStatus::Dgps
    } else {
        SolutionStatus::None
    }
}

/// AR-hold pseudo-measurement: `v_k = (xa[iref] - xa[ik]) - (X[iref] - X[ik])`,
/// covariance `VAR_HOLDAMB`, injected when mode is `FixAndHold` and
/// `n_fix >= MinFix`.
pub fn hold_pseudo_measurement(xa_ref: f64, xa_k: f64, x_ref: f64, x_k: f64) -> (f64, f64) {
    let v = (xa_ref - xa_k) - (x_ref - x_k);
    (v, VAR_HOLDAMB)
}

pub fn should_hold(cfg: &Config, n_fix: u32) -> bool {
    matches!(cfg.mode_ar, ModeAr::FixAndHold) && n_fix >= cfg.min_fix
}

/// Builds the `(H, R)` rows for every AR-hold pseudo-measurement, one row
/// per non-reference ambiguity index within a (system, frequency) group.
pub fn hold_rows(
    nx: usize,
    ref_index: usize,
    other_indices: &[usize],
    xa_ref: f64,
    xa_others: &[f64],
    x_ref: f64,
    x_others: &[f64],
) -> (DMatrix<f64>, DMatrix<f64>, DVector<f64>) {
    let m = other_indices.len();
    let mut h = DMatrix::zeros(m, nx);
    let mut r = DMatrix::zeros(m, m);
    let mut v = DVector::zeros(m);

    for (row, (&idx, (&xa_k, &x_k))) in other_indices
        .iter()
        .zip(xa_others.iter().zip(x_others.iter()))
        .enumerate()
    {
        let (vi, var) = hold_pseudo_measurement(xa_ref, xa_k, x_ref, x_k);
        v[row] = vi;
        h[(row, ref_index)] = 1.0;
        h[(row, idx)] = -1.0;
        r[(row, row)] = var;
    }
    (h, r, v)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cfg::Mode;

    #[test]
    fn status_is_fix_when_lambda_and_postfit_pass() {
        let status = assign_status(&StatusInputs {
            lambda_validated: true,
            postfit_ok: true,
            ekf_update_ok: true,
            common_l1_count: 6,
            mode_is_dgps: false,
            dgps_code_only_ok: false,
        });
        assert_eq!(status, SolutionStatus::Fix);
    }

    #[test]
    fn status_falls_back_to_float_when_lambda_fails() {
        let status = assign_status(&StatusInputs {
            lambda_validated: false,
            postfit_ok: false,
            ekf_update_ok: true,
            common_l1_count: 5,
            mode_is_dgps: false,
            dgps_code_only_ok: false,
        });
        assert_eq!(status, SolutionStatus::Float);
    }

    #[test]
    fn should_hold_requires_fix_and_hold_mode_and_enough_fixes() {
        let cfg = Config::kinematic_preset(Mode::Kinematic);
        assert!(!should_hold(&cfg, cfg.min_fix));
        let mut cfg_hold = cfg.clone();
        cfg_hold.mode_ar = crate::cfg::ModeAr::FixAndHold;
        assert!(should_hold(&cfg_hold, cfg_hold.min_fix));
        assert!(!should_hold(&cfg_hold, cfg_hold.min_fix - 1));
    }
}
