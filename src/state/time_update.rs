//! State time update. Advances every state group by `tt` seconds ahead of
//! the measurement update.

use std::collections::HashMap;

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::cfg::{Config, GloModeAr, IonoOpt, Mode, TropOpt};
use crate::constants::{GAP_RESION, INIT_ZWD, VAR_GRA, VAR_POS};
use crate::geodetic::{cov2ecef, ecef2pos, GeodeticPos};
use crate::prelude::SV;
use crate::ssat::SSat;
use crate::state::{KalmanState, SatIndex, StateLayout};

/// One tracked satellite's per-epoch geometry, needed by the iono/phase
/// bias time updates.
#[derive(Debug, Clone, Copy)]
pub struct SatGeometry {
    pub sv: SV,
    pub elevation_rad: f64,
    pub tracked_this_epoch: bool,
}

/// Position/velocity/acceleration time update. Returns the (possibly reset)
/// origin used by the iono/tropo updates for ENU rotation.
pub fn position_time_update(
    cfg: &Config,
    layout: &StateLayout,
    state: &mut KalmanState,
    tt: f64,
    seed_pos: Vector3<f64>,
) -> GeodeticPos {
    let np = layout.np;
    if matches!(cfg.mode, Mode::Fixed | Mode::PPPFixed) {
        for i in 0..3 {
            state.reset_index(i, seed_pos[i], 1.0E-8);
        }
        return ecef2pos(seed_pos);
    }

    if !cfg.dynamics || np == 3 {
        for i in 0..3 {
            state.reset_index(i, seed_pos[i], VAR_POS);
        }
        return ecef2pos(seed_pos);
    }

    // Kinematic with dynamics: constant-acceleration transition.
    let n = state.x.len();
    let mut f = DMatrix::identity(n, n);
    for i in 0..3 {
        f[(i, 3 + i)] = tt;
        f[(i, 6 + i)] = 0.5 * tt * tt;
        f[(3 + i, 6 + i)] = tt;
    }
    state.x = &f * &state.x;
    state.p = &f * &state.p * f.transpose();

    let pos = ecef2pos(Vector3::new(state.x[0], state.x[1], state.x[2]));
    let enu_cov = Matrix3::from_diagonal(&Vector3::new(
        cfg.prn[3] * cfg.prn[3] * tt.abs(),
        cfg.prn[3] * cfg.prn[3] * tt.abs(),
        cfg.prn[4] * cfg.prn[4] * tt.abs(),
    ));
    let ecef_cov = cov2ecef(pos, enu_cov);
    for i in 0..3 {
        for j in 0..3 {
            state.p[(6 + i, 6 + j)] += ecef_cov[(i, j)];
        }
    }

    let avg_pos_var = (state.p[(0, 0)] + state.p[(1, 1)] + state.p[(2, 2)]) / 3.0;
    if avg_pos_var > VAR_POS {
        for i in 0..9 {
            state.reset_index(i, if i < 3 { seed_pos[i] } else { 0.0 }, VAR_POS);
        }
    }

    ecef2pos(Vector3::new(state.x[0], state.x[1], state.x[2]))
}

/// Slant ionospheric delay time update, active only when `IonoOpt::Est`.
pub fn iono_time_update(
    cfg: &Config,
    layout: &StateLayout,
    state: &mut KalmanState,
    sat_index: &SatIndex,
    ssats: &mut HashMap<SV, SSat>,
    geometries: &[SatGeometry],
    baseline_len_m: f64,
    tt: f64,
) {
    if !matches!(cfg.iono_opt, IonoOpt::Est) {
        return;
    }
    let bl = baseline_len_m.max(1.0);
    for geom in geometries {
        let Some(slot) = sat_index.slot(geom.sv) else {
            continue;
        };
        let i = layout.ii(slot);
        let ssat = ssats.entry(geom.sv).or_default();
        let outage = ssat.outc.iter().copied().max().unwrap_or(0);
        if outage > GAP_RESION {
            state.reset_index(i, 0.0, 0.0);
            continue;
        }
        if !geom.tracked_this_epoch {
            continue;
        }
        if state.is_unset(i) {
            let var = (cfg.std[1] * bl / 1.0E4).powi(2);
            state.reset_index(i, 0.0, var);
        } else {
            let prn = (cfg.prn[1] * bl / 1.0E4 * geom.elevation_rad.cos()).powi(2) * tt.abs();
            state.p[(i, i)] += prn;
        }
    }
}

/// Tropospheric zenith wet delay time update.
pub fn tropo_time_update(cfg: &Config, layout: &StateLayout, state: &mut KalmanState, tt: f64) {
    if matches!(cfg.trop_opt, TropOpt::Off) {
        return;
    }
    for rcv in 0..2 {
        let zenith = layout.it(rcv, 0);
        if state.is_unset(zenith) {
            state.reset_index(zenith, INIT_ZWD, cfg.std[2].powi(2));
        } else {
            state.p[(zenith, zenith)] += cfg.prn[2] * cfg.prn[2] * tt.abs();
        }
        if matches!(cfg.trop_opt, TropOpt::EstGrad) {
            for comp in 1..3 {
                let idx = layout.it(rcv, comp);
                if state.is_unset(idx) {
                    state.reset_index(idx, 0.0, VAR_GRA);
                }
            }
        }
    }
}

/// GLONASS hardware inter-frequency bias time update, active only when
/// `GloModeAr::FixHold`.
pub fn glonass_bias_time_update(cfg: &Config, layout: &StateLayout, state: &mut KalmanState, tt: f64) {
    if !matches!(cfg.glo_mode_ar, GloModeAr::FixHold) {
        return;
    }
    let prn_hwbias = cfg.prn_hwbias;
    for f in 0..cfg.nf {
        let i = layout.ib(f);
        if state.is_unset(i) {
            state.reset_index(i, 0.0, prn_hwbias * prn_hwbias);
        } else {
            state.p[(i, i)] += prn_hwbias * prn_hwbias * tt.abs();
        }
    }
}

/// Float DD phase ambiguity time update.
///
/// `approx_bias_m(sv, f)` supplies `L - P*f/c` (or the IFLC combination)
/// for satellites observed this epoch; it is consulted only for satellites
/// that already hold a bias state, to compute the cross-satellite offset
/// that keeps phase-code coherency.
pub fn phase_bias_time_update<F>(
    cfg: &Config,
    layout: &StateLayout,
    state: &mut KalmanState,
    sat_index: &SatIndex,
    ssats: &mut HashMap<SV, SSat>,
    geometries: &[SatGeometry],
    mut approx_bias_m: F,
    tt: f64,
) where
    F: FnMut(SV, usize) -> Option<f64>,
{
    for geom in geometries {
        let Some(slot) = sat_index.slot(geom.sv) else {
            continue;
        };
        let ssat = ssats.entry(geom.sv).or_default();
        for f in 0..cfg.nf {
            let i = layout.rib(slot, f);
            if !geom.tracked_this_epoch {
                ssat.outc[f] += 1;
                if ssat.outc[f] > cfg.max_out {
                    state.reset_index(i, 0.0, 0.0);
                    ssat.reset_ambiguity(f, cfg.min_lock);
                }
                continue;
            }
            ssat.outc[f] = 0;
            if ssat.slip[f].slip() {
                state.reset_index(i, 0.0, 0.0);
                ssat.reset_ambiguity(f, cfg.min_lock);
            }
            if !state.is_unset(i) {
                state.p[(i, i)] += cfg.prn[0] * cfg.prn[0] * tt.abs();
            }
        }
    }

    // Average offset between approximate and held bias, across satellites
    // that already carry a bias, then apply uniformly to preserve
    // phase-code coherency before seeding the unset ones.
    for f in 0..cfg.nf {
        let mut offsets = Vec::new();
        for geom in geometries {
            let Some(slot) = sat_index.slot(geom.sv) else {
                continue;
            };
            let i = layout.rib(slot, f);
            if state.is_unset(i) {
                continue;
            }
            if let Some(approx) = approx_bias_m(geom.sv, f) {
                offsets.push(approx - state.x[i]);
            }
        }
        let mean_offset = if offsets.is_empty() {
            0.0
        } else {
            offsets.iter().sum::<f64>() / offsets.len() as f64
        };
        for geom in geometries {
            let Some(slot) = sat_index.slot(geom.sv) else {
                continue;
            };
            let i = layout.rib(slot, f);
            if !state.is_unset(i) {
                state.x[i] += mean_offset;
            } else if let Some(approx) = approx_bias_m(geom.sv, f) {
                state.reset_index(i, approx - mean_offset, cfg.std[0] * cfg.std[0]);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cfg::Mode;
    use crate::state::StateLayout;

    #[test]
    fn static_mode_resets_position_to_seed_with_var_pos() {
        let cfg = Config::static_preset(Mode::Static);
        let layout = StateLayout::new(&cfg, 4);
        let mut state = KalmanState::zeros(layout.nx());
        let seed = Vector3::new(100.0, 200.0, 300.0);
        let pos = position_time_update(&cfg, &layout, &mut state, 1.0, seed);
        assert_eq!(state.x[0], 100.0);
        assert_eq!(state.p[(0, 0)], VAR_POS);
        assert!(pos.alt_m.is_finite());
    }

    #[test]
    fn fixed_mode_uses_tiny_variance() {
        let cfg = Config::kinematic_preset(Mode::Fixed);
        let layout = StateLayout::new(&cfg, 4);
        let mut state = KalmanState::zeros(layout.nx());
        let seed = Vector3::new(1.0, 2.0, 3.0);
        position_time_update(&cfg, &layout, &mut state, 1.0, seed);
        assert_eq!(state.p[(0, 0)], 1.0E-8);
    }
}
