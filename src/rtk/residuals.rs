//! Undifferenced/double-differenced residual construction.

use std::collections::HashMap;

use gnss::prelude::Constellation;
use nalgebra::{DMatrix, DVector, Vector3};

use crate::cfg::{Config, IonoOpt, TropOpt};
use crate::constants::Constants;
use crate::geodetic::azimuth_elevation;
use crate::observation::{Observation, Receiver};
use crate::prelude::{Error, SV};
use crate::ssat::MAX_FREQ;
use crate::state::{SatIndex, StateLayout};

/// Undifferenced (zero-differenced) residual for one satellite, one
/// receiver.
#[derive(Debug, Clone)]
pub struct ZdResidual {
    pub sv: SV,
    pub elevation_rad: f64,
    pub azimuth_rad: f64,
    pub line_of_sight: Vector3<f64>,
    /// Phase residual `y_L = L*c/f - r - dant`, per frequency slot.
    pub y_phase_m: [Option<f64>; MAX_FREQ],
    /// Code residual `y_P = P - r - dant`, per frequency slot.
    pub y_code_m: [Option<f64>; MAX_FREQ],
}

/// Inputs the caller must resolve before residuals can be built: satellite
/// position/clock, receiver position, troposphere mapping and antenna PCV
/// are all collaborator-provided, not computed here.
pub struct ZdInputs<'a> {
    pub receiver_pos_ecef: Vector3<f64>,
    pub sat_pos_ecef: HashMap<SV, Vector3<f64>>,
    pub sat_clock_bias_s: HashMap<SV, f64>,
    pub sat_healthy: HashMap<SV, bool>,
    pub tropo_delay_m: HashMap<SV, f64>,
    pub antenna_pcv_m: HashMap<SV, [f64; MAX_FREQ]>,
    pub observations: &'a [Observation],
    pub elmin_rad: f64,
    pub min_snr_dbhz: Option<f64>,
}

/// Builds zero-differenced residuals for one receiver's observation set.
pub fn undifferenced_residuals(cfg: &Config, inputs: &ZdInputs) -> Vec<ZdResidual> {
    let mut out = Vec::with_capacity(inputs.observations.len());
    for obs in inputs.observations {
        let Some(&sat_pos) = inputs.sat_pos_ecef.get(&obs.sv) else {
            continue;
        };
        if !inputs.sat_healthy.get(&obs.sv).copied().unwrap_or(true) {
            continue;
        }
        let (az, el) = azimuth_elevation(inputs.receiver_pos_ecef, sat_pos);
        if el < inputs.elmin_rad {
            continue;
        }
        if let Some(min_snr) = inputs.min_snr_dbhz {
            let all_below = obs.signals.iter().all(|s| s.snr_dbhz < min_snr);
            if all_below {
                continue;
            }
        }

        let geom_range = (sat_pos - inputs.receiver_pos_ecef).norm();
        let los = (sat_pos - inputs.receiver_pos_ecef) / geom_range.max(1.0);
        let dts = inputs.sat_clock_bias_s.get(&obs.sv).copied().unwrap_or(0.0);
        let tropo = inputs.tropo_delay_m.get(&obs.sv).copied().unwrap_or(0.0);
        let range = geom_range - Constants::SPEED_OF_LIGHT_M_S * dts + tropo;

        let mut y_phase_m = [None; MAX_FREQ];
        let mut y_code_m = [None; MAX_FREQ];
        let pcv = inputs.antenna_pcv_m.get(&obs.sv).copied().unwrap_or([0.0; MAX_FREQ]);

        for (k, signal) in obs.signals.iter().take(MAX_FREQ).enumerate() {
            if signal.has_phase() {
                y_phase_m[k] = Some(signal.phase_range_m() - range - pcv[k]);
            }
            if signal.has_pseudo_range() {
                y_code_m[k] = Some(signal.pseudo_range_m - range - pcv[k]);
            }
        }

        if matches!(cfg.iono_opt, IonoOpt::Iflc) && obs.signals.len() >= 2 {
            let f1 = obs.signals[0].carrier.frequency();
            let f2 = obs.signals[1].carrier.frequency();
            let c1 = f1 * f1 / (f1 * f1 - f2 * f2);
            let c2 = -f2 * f2 / (f1 * f1 - f2 * f2);
            if let (Some(yl1), Some(yl2)) = (y_phase_m[0], y_phase_m[1]) {
                y_phase_m[0] = Some(c1 * yl1 + c2 * yl2);
            }
            if let (Some(yp1), Some(yp2)) = (y_code_m[0], y_code_m[1]) {
                y_code_m[0] = Some(c1 * yp1 + c2 * yp2);
            }
        }

        out.push(ZdResidual {
            sv: obs.sv,
            elevation_rad: el,
            azimuth_rad: az,
            line_of_sight: los,
            y_phase_m,
            y_code_m,
        });
    }
    out
}

/// Satellites present in both ZD sets, base elevation `>= elmin`, matched by
/// satellite id (ascending, per the pre-sorted observation arrays).
pub fn common_satellites<'a>(
    rover: &'a [ZdResidual],
    base: &'a [ZdResidual],
    elmin_rad: f64,
) -> Vec<(&'a ZdResidual, &'a ZdResidual)> {
    let mut pairs = Vec::new();
    let mut bi = 0;
    for r in rover {
        while bi < base.len() && base[bi].sv < r.sv {
            bi += 1;
        }
        if bi < base.len() && base[bi].sv == r.sv && base[bi].elevation_rad >= elmin_rad {
            pairs.push((r, &base[bi]));
        }
    }
    pairs
}

/// One double-differenced residual row, with its design-matrix contribution
/// against the full state vector.
#[derive(Debug, Clone)]
pub struct DdRow {
    pub v_m: f64,
    /// Sparse partials against the state vector, `(index, coefficient)`.
    pub h: Vec<(usize, f64)>,
    pub variance_i: f64,
    pub variance_j: f64,
    pub reference_sv: SV,
    pub other_sv: SV,
    pub is_phase: bool,
    pub freq: usize,
    /// `(sat_ref<<16)|(sat_other<<8)|(type<<4)|freq`.
    pub origin_tag: u32,
}

fn pack_origin_tag(ref_sv: SV, other_sv: SV, is_phase: bool, freq: usize) -> u32 {
    let kind = if is_phase { 1u32 } else { 0u32 };
    ((ref_sv.prn as u32) << 16) | ((other_sv.prn as u32) << 8) | (kind << 4) | freq as u32
}

/// Elevation-dependent SD measurement variance.
fn sd_variance(cfg: &Config, el_rad: f64, baseline_len_m: f64, is_phase: bool, efact: f64) -> f64 {
    let [a, b, c, d] = cfg.err;
    let base = a * a + b * b / el_rad.sin().max(0.01).powi(2)
        + (c * baseline_len_m).powi(2)
        + (d * cfg.sat_clk_stab).powi(2);
    let ratio = if is_phase { 1.0 } else { cfg.eratio[0] };
    let iflc_penalty = if matches!(cfg.iono_opt, IonoOpt::Iflc) { 3.0 } else { 1.0 };
    base * ratio * ratio * efact * efact * iflc_penalty
}

/// Wet tropospheric mapping function, simplified to `1/sin(el)`.
fn tropo_wet_mapping(el_rad: f64) -> f64 {
    1.0 / el_rad.sin().max(0.01)
}

/// Horizontal-gradient mapping function (Bar-Sever et al. 1998), used only
/// when `TropOpt::EstGrad` allocates the extra gradient states.
fn tropo_gradient_mapping(el_rad: f64) -> f64 {
    tropo_wet_mapping(el_rad) / el_rad.tan().max(1.0E-3)
}

fn constellation_group(sv: SV) -> Option<u8> {
    match sv.constellation {
        Constellation::GPS | Constellation::SBAS => Some(0),
        Constellation::Glonass => Some(1),
        Constellation::Galileo => Some(2),
        Constellation::BeiDou => Some(3),
        Constellation::QZSS => Some(4),
        Constellation::IRNSS => Some(5),
        _ => None,
    }
}

/// Builds double differences across every (constellation, frequency) group,
/// electing one reference satellite per group (highest rover elevation).
/// The second return value lists `(sv, freq)` of every DD candidate
/// dropped by the `max_inno_m` innovation gate, for the caller to feed into
/// `SSat::rejc`.
#[allow(clippy::too_many_arguments)]
pub fn build_double_differences(
    cfg: &Config,
    layout: &StateLayout,
    sat_index: &SatIndex,
    pairs: &[(&ZdResidual, &ZdResidual)],
    baseline_len_m: f64,
) -> (Vec<DdRow>, Vec<(SV, usize)>) {
    let mut groups: HashMap<u8, Vec<usize>> = HashMap::new();
    for (idx, (rover, _base)) in pairs.iter().enumerate() {
        if let Some(group) = constellation_group(rover.sv) {
            groups.entry(group).or_default().push(idx);
        }
    }

    let mut rows = Vec::new();
    let mut rejected = Vec::new();
    for members in groups.values() {
        let Some(&ref_idx) = members.iter().max_by(|&&a, &&b| {
            pairs[a]
                .0
                .elevation_rad
                .partial_cmp(&pairs[b].0.elevation_rad)
                .unwrap()
        }) else {
            continue;
        };
        let (rover_i, base_i) = pairs[ref_idx];

        for f in 0..cfg.nf {
            for kind_is_phase in [true, false] {
                let yi_u = if kind_is_phase { rover_i.y_phase_m[f] } else { rover_i.y_code_m[f] };
                let yi_b = if kind_is_phase { base_i.y_phase_m[f] } else { base_i.y_code_m[f] };
                let (Some(yi_u), Some(yi_b)) = (yi_u, yi_b) else {
                    continue;
                };
                let sd_i = yi_u - yi_b;

                for &other_idx in members {
                    if other_idx == ref_idx {
                        continue;
                    }
                    let (rover_j, base_j) = pairs[other_idx];
                    let yj_u = if kind_is_phase { rover_j.y_phase_m[f] } else { rover_j.y_code_m[f] };
                    let yj_b = if kind_is_phase { base_j.y_phase_m[f] } else { base_j.y_code_m[f] };
                    let (Some(yj_u), Some(yj_b)) = (yj_u, yj_b) else {
                        continue;
                    };
                    let sd_j = yj_u - yj_b;
                    let v = sd_i - sd_j;

                    if v.abs() > cfg.max_inno_m {
                        rejected.push((rover_j.sv, f));
                        continue;
                    }

                    let mut h = Vec::new();
                    for c in 0..3 {
                        h.push((c, -rover_i.line_of_sight[c] + rover_j.line_of_sight[c]));
                    }

                    if layout.iono_enabled {
                        if let (Some(si), Some(sj)) =
                            (sat_index.slot(rover_i.sv), sat_index.slot(rover_j.sv))
                        {
                            let sign = if kind_is_phase { -1.0 } else { 1.0 };
                            h.push((layout.ii(si), sign * -1.0));
                            h.push((layout.ii(sj), sign * 1.0));
                        }
                    }

                    if kind_is_phase {
                        if let (Some(si), Some(sj)) =
                            (sat_index.slot(rover_i.sv), sat_index.slot(rover_j.sv))
                        {
                            h.push((layout.rib(si, f), -1.0));
                            h.push((layout.rib(sj, f), 1.0));
                        }
                    }

                    if !matches!(cfg.trop_opt, TropOpt::Off) {
                        let mf_rover_i = tropo_wet_mapping(rover_i.elevation_rad);
                        let mf_rover_j = tropo_wet_mapping(rover_j.elevation_rad);
                        let mf_base_i = tropo_wet_mapping(base_i.elevation_rad);
                        let mf_base_j = tropo_wet_mapping(base_j.elevation_rad);
                        h.push((layout.it(0, 0), -(mf_rover_i - mf_rover_j)));
                        h.push((layout.it(1, 0), mf_base_i - mf_base_j));

                        if layout.tropo_gradient {
                            let grad = |el: f64, az: f64| {
                                let mg = tropo_gradient_mapping(el);
                                (mg * az.cos(), mg * az.sin())
                            };
                            let (gn_ri, ge_ri) = grad(rover_i.elevation_rad, rover_i.azimuth_rad);
                            let (gn_rj, ge_rj) = grad(rover_j.elevation_rad, rover_j.azimuth_rad);
                            let (gn_bi, ge_bi) = grad(base_i.elevation_rad, base_i.azimuth_rad);
                            let (gn_bj, ge_bj) = grad(base_j.elevation_rad, base_j.azimuth_rad);
                            h.push((layout.it(0, 1), -(ge_ri - ge_rj)));
                            h.push((layout.it(0, 2), -(gn_ri - gn_rj)));
                            h.push((layout.it(1, 1), ge_bi - ge_bj));
                            h.push((layout.it(1, 2), gn_bi - gn_bj));
                        }
                    }

                    let var_i = sd_variance(cfg, rover_i.elevation_rad, baseline_len_m, kind_is_phase, 1.0);
                    let var_j = sd_variance(cfg, rover_j.elevation_rad, baseline_len_m, kind_is_phase, 1.0);

                    rows.push(DdRow {
                        v_m: v,
                        h,
                        variance_i: var_i,
                        variance_j: var_j,
                        reference_sv: rover_i.sv,
                        other_sv: rover_j.sv,
                        is_phase: kind_is_phase,
                        freq: f,
                        origin_tag: pack_origin_tag(rover_i.sv, rover_j.sv, kind_is_phase, f),
                    });
                }
            }
        }
    }
    (rows, rejected)
}

/// Appends the fixed-baseline constraint for `MovingBase` mode:
/// `v = baseline - |rr - rb|`, skipped if the estimated variance
/// exceeds `0.1 * |b|`.
pub fn moving_base_constraint(
    rover_pos: Vector3<f64>,
    base_pos: Vector3<f64>,
    baseline_len_m: f64,
    baseline_var: f64,
) -> Option<(f64, Vector3<f64>, f64)> {
    let b = rover_pos - base_pos;
    let norm = b.norm();
    if norm < 1.0E-3 {
        return None;
    }
    if baseline_var > 0.1 * norm {
        return None;
    }
    let v = baseline_len_m - norm;
    let h = b / norm;
    Some((v, h, baseline_var))
}

/// Assembles the dense `(H, R)` pair for a batch of DD rows against a state
/// of length `nx`, block-diagonal per reference group: diagonal `Ri + Rj`,
/// off-diagonal `Ri` for rows sharing a reference satellite.
pub fn assemble_h_r(rows: &[DdRow], nx: usize) -> Result<(DMatrix<f64>, DMatrix<f64>, DVector<f64>), Error> {
    if rows.is_empty() {
        return Err(Error::NotEnoughPostFitCandidates);
    }
    let m = rows.len();
    let mut h = DMatrix::zeros(m, nx);
    let mut r = DMatrix::zeros(m, m);
    let mut v = DVector::zeros(m);

    for (row_idx, row) in rows.iter().enumerate() {
        v[row_idx] = row.v_m;
        for &(col, coeff) in &row.h {
            if col >= nx {
                return Err(Error::MatrixDimension);
            }
            h[(row_idx, col)] = coeff;
        }
        r[(row_idx, row_idx)] = row.variance_i + row.variance_j;
    }

    for i in 0..m {
        for j in (i + 1)..m {
            if rows[i].reference_sv == rows[j].reference_sv && rows[i].freq == rows[j].freq && rows[i].is_phase == rows[j].is_phase {
                r[(i, j)] = rows[i].variance_i;
                r[(j, i)] = rows[i].variance_i;
            }
        }
    }

    Ok((h, r, v))
}

#[cfg(test)]
mod test {
    use super::*;

    fn sv(c: Constellation, prn: u8) -> SV {
        SV::new(c, prn)
    }

    #[test]
    fn origin_tag_packs_expected_fields() {
        let tag = pack_origin_tag(sv(Constellation::GPS, 5), sv(Constellation::GPS, 12), true, 1);
        assert_eq!((tag >> 16) & 0xFFFF, 5);
        assert_eq!((tag >> 8) & 0xFF, 12);
        assert_eq!((tag >> 4) & 0x1, 1);
        assert_eq!(tag & 0xF, 1);
    }

    #[test]
    fn common_satellites_matches_ascending_ids() {
        let mk = |prn, el| ZdResidual {
            sv: sv(Constellation::GPS, prn),
            elevation_rad: el,
            azimuth_rad: 0.0,
            line_of_sight: Vector3::new(0.0, 0.0, 1.0),
            y_phase_m: [None; MAX_FREQ],
            y_code_m: [None; MAX_FREQ],
        };
        let rover = vec![mk(1, 0.5), mk(2, 0.6)];
        let base = vec![mk(1, 0.4), mk(3, 0.5)];
        let pairs = common_satellites(&rover, &base, 0.1);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.sv.prn, 1);
    }

    #[test]
    fn build_double_differences_reports_innovation_gate_rejections() {
        use crate::cfg::{Config, Mode};
        use crate::state::{SatIndex, StateLayout};

        let cfg = Config::kinematic_preset(Mode::Kinematic);
        let mut sat_index = SatIndex::new();
        let ref_sv = sv(Constellation::GPS, 1);
        let other_sv = sv(Constellation::GPS, 2);
        sat_index.slot_or_insert(ref_sv);
        sat_index.slot_or_insert(other_sv);
        let layout = StateLayout::new(&cfg, sat_index.len());

        let mk = |s, el, phase: f64| ZdResidual {
            sv: s,
            elevation_rad: el,
            azimuth_rad: 0.0,
            line_of_sight: Vector3::new(0.0, 0.0, 1.0),
            y_phase_m: [Some(phase), None, None],
            y_code_m: [Some(phase), None, None],
        };

        // Reference satellite (highest elevation) carries a zero SD residual;
        // the other satellite's residual is far beyond `max_inno_m`, so its
        // DD row must be dropped and reported as rejected.
        let rover_ref = mk(ref_sv, 1.4, 0.0);
        let base_ref = mk(ref_sv, 1.4, 0.0);
        let rover_other = mk(other_sv, 0.3, cfg.max_inno_m * 10.0);
        let base_other = mk(other_sv, 0.3, 0.0);

        let pairs: Vec<(&ZdResidual, &ZdResidual)> = vec![(&rover_ref, &base_ref), (&rover_other, &base_other)];

        let (rows, rejected) = build_double_differences(&cfg, &layout, &sat_index, &pairs, 1.0);
        assert!(rows.is_empty());
        assert_eq!(rejected, vec![(other_sv, 0), (other_sv, 0)]);
    }

    #[test]
    fn build_double_differences_includes_tropo_zenith_partials_by_default() {
        use crate::cfg::{Config, Mode, TropOpt};
        use crate::state::{SatIndex, StateLayout};

        let cfg = Config::kinematic_preset(Mode::Kinematic);
        assert_eq!(cfg.trop_opt, TropOpt::Est);
        let mut sat_index = SatIndex::new();
        let ref_sv = sv(Constellation::GPS, 1);
        let other_sv = sv(Constellation::GPS, 2);
        sat_index.slot_or_insert(ref_sv);
        sat_index.slot_or_insert(other_sv);
        let layout = StateLayout::new(&cfg, sat_index.len());

        let mk = |s, el| ZdResidual {
            sv: s,
            elevation_rad: el,
            azimuth_rad: 0.2,
            line_of_sight: Vector3::new(0.0, 0.0, 1.0),
            y_phase_m: [Some(0.0), None, None],
            y_code_m: [Some(0.0), None, None],
        };
        let rover_ref = mk(ref_sv, 1.4);
        let base_ref = mk(ref_sv, 1.35);
        let rover_other = mk(other_sv, 0.6);
        let base_other = mk(other_sv, 0.55);
        let pairs: Vec<(&ZdResidual, &ZdResidual)> = vec![(&rover_ref, &base_ref), (&rover_other, &base_other)];

        let (rows, _rejected) = build_double_differences(&cfg, &layout, &sat_index, &pairs, 1.0);
        assert!(!rows.is_empty());
        for row in &rows {
            let rover_ztd = layout.it(0, 0);
            let base_ztd = layout.it(1, 0);
            assert!(
                row.h.iter().any(|&(idx, coeff)| idx == rover_ztd && coeff != 0.0),
                "expected a non-zero rover ZTD partial in {:?}",
                row.h
            );
            assert!(
                row.h.iter().any(|&(idx, coeff)| idx == base_ztd && coeff != 0.0),
                "expected a non-zero base ZTD partial in {:?}",
                row.h
            );
        }
    }

    #[test]
    fn build_double_differences_omits_tropo_partials_when_disabled() {
        use crate::cfg::{Config, Mode, TropOpt};
        use crate::state::{SatIndex, StateLayout};

        let mut cfg = Config::kinematic_preset(Mode::Kinematic);
        cfg.trop_opt = TropOpt::Off;
        let mut sat_index = SatIndex::new();
        let ref_sv = sv(Constellation::GPS, 1);
        let other_sv = sv(Constellation::GPS, 2);
        sat_index.slot_or_insert(ref_sv);
        sat_index.slot_or_insert(other_sv);
        let layout = StateLayout::new(&cfg, sat_index.len());

        let mk = |s, el| ZdResidual {
            sv: s,
            elevation_rad: el,
            azimuth_rad: 0.2,
            line_of_sight: Vector3::new(0.0, 0.0, 1.0),
            y_phase_m: [Some(0.0), None, None],
            y_code_m: [Some(0.0), None, None],
        };
        let rover_ref = mk(ref_sv, 1.4);
        let base_ref = mk(ref_sv, 1.35);
        let rover_other = mk(other_sv, 0.6);
        let base_other = mk(other_sv, 0.55);
        let pairs: Vec<(&ZdResidual, &ZdResidual)> = vec![(&rover_ref, &base_ref), (&rover_other, &base_other)];

        let (rows, _rejected) = build_double_differences(&cfg, &layout, &sat_index, &pairs, 1.0);
        let rover_ztd = layout.it(0, 0);
        let base_ztd = layout.it(1, 0);
        for row in &rows {
            assert!(row.h.iter().all(|&(idx, _)| idx != rover_ztd && idx != base_ztd));
        }
    }

    #[test]
    fn moving_base_constraint_rejects_high_variance() {
        let rr = Vector3::new(10.0, 0.0, 0.0);
        let rb = Vector3::zeros();
        assert!(moving_base_constraint(rr, rb, 10.0, 5.0).is_none());
        assert!(moving_base_constraint(rr, rb, 10.0, 0.05).is_some());
    }
}
