//! Epoch driver. Public entry point: [`Rtk::rtk_step`].

pub mod filter;
pub mod lambda;
pub mod residuals;
pub mod slip;
pub mod validator;

use std::collections::HashMap;

use log::{debug, warn};
use nalgebra::{DVector, Vector3};

use crate::cfg::{Config, Mode, ModeAr};
use crate::collaborators::{PointPositioner, SatPositionProvider, TropoModelProvider};
use crate::constants::TTOL_MOVEB;
use crate::geodetic::azimuth_elevation;
use crate::observation::{EpochObservations, Observation, Receiver};
use crate::prelude::{Epoch, Error, SV};
use crate::rtk::filter::measurement_update;
use crate::rtk::lambda::{back_transform, fixed_solution_update, ld_factorize, ratio_test, reduce, search};
use crate::rtk::residuals::{
    assemble_h_r, build_double_differences, common_satellites, moving_base_constraint,
    undifferenced_residuals, ZdInputs,
};
use crate::rtk::slip::{geometry_free_combination, gf_jump_slip, run_detectors, Direction};
use crate::rtk::validator::{assign_status, postfit_degraded, should_hold, hold_rows, StatusInputs};
use crate::solution::{HwBiasDiagnostics, SatDiagnostics, Sol, SolutionStatus, TropoDiagnostics};
use crate::ssat::{SSat, MAX_FREQ};
use crate::status::SolutionStatusSink;
use crate::state::time_update::{
    glonass_bias_time_update, iono_time_update, phase_bias_time_update, position_time_update,
    tropo_time_update, SatGeometry,
};
use crate::state::{KalmanState, SatIndex, StateLayout};

/// Running state for one RTK session: current `Sol`, satellite channel
/// records, Kalman state/covariance, and satellite-slot indexing. A
/// single-threaded, session-owned handle: one `Rtk` per rover/base pair.
pub struct Rtk {
    cfg: Config,
    sat_index: SatIndex,
    ssats: HashMap<SV, SSat>,
    state: KalmanState,
    layout: StateLayout,
    sol: Sol,
    previous_epoch: Option<Epoch>,
    base_position: Option<Vector3<f64>>,
    n_fix: u32,
    /// Integer-fixed ambiguity values from the most recent successful LAMBDA
    /// fix, keyed by state index: AR-hold pseudo-measurement source.
    held_fixed: HashMap<usize, f64>,
    /// Optional solution-status record writer, injected by the caller rather
    /// than a process-wide singleton.
    status_sink: Option<Box<dyn SolutionStatusSink>>,
}

impl Rtk {
    /// Constructs a new session. Validates configuration invariants at
    /// construction only.
    pub fn new(cfg: Config, base_position: Option<Vector3<f64>>) -> Result<Self, Error> {
        cfg.validate()?;
        if cfg.mode.is_relative() && !matches!(cfg.mode, Mode::MovingBase) && base_position.is_none() {
            return Err(Error::MissingBaseStationPosition);
        }
        let sat_index = SatIndex::new();
        let layout = StateLayout::new(&cfg, 0);
        let state = KalmanState::zeros(layout.nx().max(cfg.nf));
        Ok(Self {
            cfg,
            sat_index,
            ssats: HashMap::new(),
            state,
            layout,
            sol: Sol::none(Epoch::default()),
            previous_epoch: None,
            base_position,
            n_fix: 0,
            held_fixed: HashMap::new(),
            status_sink: None,
        })
    }

    pub fn solution(&self) -> &Sol {
        &self.sol
    }

    /// Installs the solution-status record sink for this session. Replaces
    /// any previously installed sink.
    pub fn set_status_sink(&mut self, sink: Box<dyn SolutionStatusSink>) {
        self.status_sink = Some(sink);
    }

    /// Registers every satellite present this epoch in the stable
    /// `SatIndex`, growing the Kalman state to match.
    fn register_satellites(&mut self, svs: impl Iterator<Item = SV>) {
        let mut grew = false;
        for sv in svs {
            if self.sat_index.slot(sv).is_none() {
                self.sat_index.slot_or_insert(sv);
                grew = true;
            }
            self.ssats.entry(sv).or_default();
        }
        if grew {
            let new_layout = StateLayout::new(&self.cfg, self.sat_index.len());
            self.state.resize(&self.layout, &new_layout);
            self.layout = new_layout;
        }
    }

    /// Runs the three cycle-slip detectors for every tracked satellite.
    /// Must run after `SSat::begin_epoch` and before the phase-bias time
    /// update, which consults `ssat.slip[f]` to decide on ambiguity resets.
    /// The LLI detector is evaluated once per receiver (each keeping its own
    /// `prev_lli` slot); the geometry-free jump detector runs once per
    /// satellite on the rover-minus-base SD combination. The Doppler/phase
    /// check is left disabled here, matching the `doppler_slip_check`
    /// default.
    fn run_slip_detectors(&mut self, rover: &[Observation], base: &[Observation]) {
        let nf = self.cfg.nf.min(MAX_FREQ);
        let thres_slip_m = self.cfg.thres_slip_m;
        for (sv, ssat) in self.ssats.iter_mut() {
            let rover_obs = rover.iter().find(|o| o.sv == *sv);
            let base_obs = base.iter().find(|o| o.sv == *sv);
            if rover_obs.is_none() && base_obs.is_none() {
                continue;
            }
            for f in 0..nf {
                if let Some(sig) = rover_obs.and_then(|o| o.signals.get(f)).filter(|s| s.has_phase()) {
                    run_detectors(ssat, f, 0, Direction::Forward, sig.lli, None, thres_slip_m, None);
                }
                if let Some(sig) = base_obs.and_then(|o| o.signals.get(f)).filter(|s| s.has_phase()) {
                    run_detectors(ssat, f, 1, Direction::Forward, sig.lli, None, thres_slip_m, None);
                }
                if f == 0 {
                    continue;
                }
                let quad = (
                    rover_obs.and_then(|o| o.signals.get(0)).filter(|s| s.has_phase()),
                    base_obs.and_then(|o| o.signals.get(0)).filter(|s| s.has_phase()),
                    rover_obs.and_then(|o| o.signals.get(f)).filter(|s| s.has_phase()),
                    base_obs.and_then(|o| o.signals.get(f)).filter(|s| s.has_phase()),
                );
                if let (Some(r0), Some(b0), Some(rk), Some(bk)) = quad {
                    let l1_sd_m = r0.phase_range_m() - b0.phase_range_m();
                    let lk_sd_m = rk.phase_range_m() - bk.phase_range_m();
                    gf_jump_slip(ssat, f, geometry_free_combination(l1_sd_m, lk_sd_m), thres_slip_m);
                }
            }
        }
    }

    /// Drives one epoch end to end. `point_pos`
    /// supplies the single-point seed (collaborator); `sat_positions`
    /// resolves satellite state for the observed SVs (collaborator); `trop`
    /// supplies the tropospheric zenith delay/mapping used by the
    /// double-difference residual builder.
    pub fn rtk_step<P, S, Tr>(
        &mut self,
        obs_epoch: &EpochObservations,
        point_pos: &mut P,
        sat_positions: &mut S,
        trop: &Tr,
    ) -> Result<bool, Error>
    where
        P: PointPositioner,
        S: SatPositionProvider,
        Tr: TropoModelProvider,
    {
        if obs_epoch.is_empty() {
            return Err(Error::NotEnoughCandidates);
        }
        let (rover, base) = obs_epoch.split();
        let time = obs_epoch.epoch().ok_or(Error::NotEnoughCandidates)?;

        self.register_satellites(rover.iter().chain(base.iter()).map(|o| o.sv));

        let ranges: Vec<(SV, f64)> = rover
            .iter()
            .filter_map(|o| o.signals.first().map(|s| (o.sv, s.pseudo_range_m)))
            .collect();
        let seed = point_pos.point_pos(time, &ranges);

        let seed_pos = match &seed {
            Some(sol) => sol.rr,
            None if self.cfg.dynamics => self.sol.rr,
            None => return Err(Error::NotEnoughPreFitCandidates),
        };

        let tt = match self.previous_epoch {
            Some(prev) => (time - prev).to_seconds(),
            None => 0.0,
        };
        self.previous_epoch = Some(time);

        match self.cfg.mode {
            Mode::Single => {
                self.sol = seed.unwrap_or_else(|| Sol::none(time));
                self.sol.status = SolutionStatus::Single;
                return Ok(true);
            }
            Mode::PPPKinematic | Mode::PPPStatic | Mode::PPPFixed => {
                warn!("PPP delegated to an external solver, not implemented in this core");
                return Err(Error::InvalidStrategy);
            }
            Mode::MovingBase => {
                if base.is_empty() {
                    return Err(Error::MissingReceiverObservations(Receiver::Base));
                }
                let base_ranges: Vec<(SV, f64)> = base
                    .iter()
                    .filter_map(|o| o.signals.first().map(|s| (o.sv, s.pseudo_range_m)))
                    .collect();
                let base_seed = point_pos
                    .point_pos(time, &base_ranges)
                    .ok_or(Error::NotEnoughPreFitCandidates)?;
                if tt.abs() > TTOL_MOVEB {
                    return Err(Error::DifferentialAgeExceeded(time, tt));
                }
                self.base_position = Some(base_seed.rr + base_seed.vv * tt);
            }
            Mode::DGPS | Mode::Kinematic | Mode::Static | Mode::Fixed => {
                if base.is_empty() {
                    return Err(Error::MissingReceiverObservations(Receiver::Base));
                }
                if tt.abs() > self.cfg.max_tm_diff_s {
                    return Err(Error::DifferentialAgeExceeded(time, tt));
                }
            }
        }

        for ssat in self.ssats.values_mut() {
            ssat.begin_epoch();
        }
        self.run_slip_detectors(rover, base);

        let sv_list = self.sat_index.tracked().to_vec();
        let sat_states = sat_positions.sat_positions(time, &sv_list);
        let mut sat_pos_ecef = HashMap::new();
        let mut sat_clock_bias_s = HashMap::new();
        let mut sat_healthy = HashMap::new();
        for (sv, pos, _vel, clk_bias, _clk_drift, _var, healthy) in &sat_states {
            sat_pos_ecef.insert(*sv, *pos);
            sat_clock_bias_s.insert(*sv, *clk_bias);
            sat_healthy.insert(*sv, *healthy);
        }

        let rover_pos_now = seed_pos;
        let base_pos_now = self.base_position.unwrap_or(rover_pos_now);
        let baseline_len_m = (rover_pos_now - base_pos_now).norm();

        let geometries: Vec<SatGeometry> = sv_list
            .iter()
            .map(|&sv| {
                let tracked_this_epoch = rover.iter().any(|o| o.sv == sv);
                let elevation_rad = sat_pos_ecef
                    .get(&sv)
                    .map(|&p| azimuth_elevation(rover_pos_now, p).1)
                    .unwrap_or(0.0);
                SatGeometry { sv, elevation_rad, tracked_this_epoch }
            })
            .collect();

        let geo = position_time_update(&self.cfg, &self.layout, &mut self.state, tt, seed_pos);
        iono_time_update(
            &self.cfg,
            &self.layout,
            &mut self.state,
            &self.sat_index,
            &mut self.ssats,
            &geometries,
            baseline_len_m,
            tt,
        );
        tropo_time_update(&self.cfg, &self.layout, &mut self.state, tt);
        glonass_bias_time_update(&self.cfg, &self.layout, &mut self.state, tt);
        phase_bias_time_update(
            &self.cfg,
            &self.layout,
            &mut self.state,
            &self.sat_index,
            &mut self.ssats,
            &geometries,
            |sv, f| {
                rover
                    .iter()
                    .find(|o| o.sv == sv)
                    .and_then(|o| o.signals.get(f))
                    .filter(|s| s.has_phase() && s.has_pseudo_range())
                    .map(|s| s.phase_range_m() - s.pseudo_range_m)
            },
            tt,
        );
        debug!(
            "{time}: state time-updated ({} tracked sv, origin {:.6},{:.6})",
            self.sat_index.len(),
            geo.lat_rad,
            geo.lon_rad
        );

        self.sol = Sol::none(time);
        self.sol.rr = Vector3::new(self.state.x[0], self.state.x[1], self.state.x[2]);
        self.sol.ns = sv_list.len() as u32;
        self.sol.age_s = tt.abs();

        // Single is handled above by an early return; every remaining branch
        // requires (and already validated) non-empty base observations.
        let rover_pos_now = Vector3::new(self.state.x[0], self.state.x[1], self.state.x[2]);

        let mut rover_tropo_m = HashMap::new();
        let mut base_tropo_m = HashMap::new();
        for (&sv, &pos) in sat_pos_ecef.iter() {
            let (_az, el_r) = azimuth_elevation(rover_pos_now, pos);
            rover_tropo_m.insert(sv, trop.trop_model(time, rover_pos_now) * trop.trop_map(time, rover_pos_now, el_r));
            let (_az, el_b) = azimuth_elevation(base_pos_now, pos);
            base_tropo_m.insert(sv, trop.trop_model(time, base_pos_now) * trop.trop_map(time, base_pos_now, el_b));
        }

        let elmin_rad = self.cfg.elmin_rad;
        let rover_inputs = ZdInputs {
            receiver_pos_ecef: rover_pos_now,
            sat_pos_ecef: sat_pos_ecef.clone(),
            sat_clock_bias_s: sat_clock_bias_s.clone(),
            sat_healthy: sat_healthy.clone(),
            tropo_delay_m: rover_tropo_m,
            antenna_pcv_m: HashMap::new(),
            observations: rover,
            elmin_rad,
            min_snr_dbhz: None,
        };
        let base_inputs = ZdInputs {
            receiver_pos_ecef: base_pos_now,
            sat_pos_ecef: sat_pos_ecef.clone(),
            sat_clock_bias_s: sat_clock_bias_s.clone(),
            sat_healthy: sat_healthy.clone(),
            tropo_delay_m: base_tropo_m,
            antenna_pcv_m: HashMap::new(),
            observations: base,
            elmin_rad,
            min_snr_dbhz: None,
        };
        let rover_zd = undifferenced_residuals(&self.cfg, &rover_inputs);
        let base_zd = undifferenced_residuals(&self.cfg, &base_inputs);
        let pairs = common_satellites(&rover_zd, &base_zd, elmin_rad);
        self.sol.ns = pairs.len() as u32;

        let (rows, rejected) = build_double_differences(&self.cfg, &self.layout, &self.sat_index, &pairs, baseline_len_m);
        for (sv, f) in rejected {
            if let Some(ssat) = self.ssats.get_mut(&sv) {
                ssat.rejc[f] += 1;
            }
        }

        let mut ekf_update_ok = false;
        let mut postfit_ok = false;
        let mut lambda_validated = false;

        match assemble_h_r(&rows, self.layout.nx()) {
            Ok((mut h, mut r, mut v)) => {
                if matches!(self.cfg.mode, Mode::MovingBase) {
                    let target = (self.cfg.baseline[0] + self.cfg.baseline[1]) * 0.5;
                    let baseline_var = self.state.p[(0, 0)] + self.state.p[(1, 1)] + self.state.p[(2, 2)];
                    if let Some((v_extra, dir, var)) =
                        moving_base_constraint(rover_pos_now, base_pos_now, target, baseline_var)
                    {
                        let m = h.nrows();
                        h = h.insert_row(m, 0.0);
                        for c in 0..3 {
                            h[(m, c)] = dir[c];
                        }
                        r = r.insert_row(m, 0.0).insert_column(m, 0.0);
                        r[(m, m)] = var;
                        v = v.insert_row(m, v_extra);
                    }
                }

                let r_diag = DVector::from_iterator(r.nrows(), (0..r.nrows()).map(|i| r[(i, i)]));
                match measurement_update(&mut self.state.x, &mut self.state.p, &h, &r, &v) {
                    Ok(()) => {
                        ekf_update_ok = true;
                        postfit_ok = !postfit_degraded(&v, &r_diag);
                    }
                    Err(e) => warn!("{time}: measurement update failed: {e}"),
                }
            }
            Err(e) => debug!("{time}: no double-difference rows available this epoch ({e})"),
        }

        if ekf_update_ok
            && postfit_ok
            && !matches!(self.cfg.mode_ar, ModeAr::Off)
        {
            let nr = self.layout.nr();
            let nl = self.layout.nl_len();
            if nl >= 2 {
                let qb = self.state.p.view((nr, nr), (nl, nl)).into_owned();
                let b_hat = self.state.x.rows(nr, nl).into_owned();
                match ld_factorize(&qb) {
                    Ok((mut l, mut d)) => {
                        let z = reduce(&mut l, &mut d);
                        let z_hat = z.transpose() * &b_hat;
                        match search(&z_hat, &d, &l) {
                            Ok(candidates) => match ratio_test(candidates[0].s, candidates[1].s, self.cfg.thres_ar) {
                                Ok(ratio) => match back_transform(&z, &candidates[0].z) {
                                    Ok(b_int) => {
                                        let x_nonamb = self.state.x.rows(0, nr).into_owned();
                                        let p_nonamb = self.state.p.view((0, 0), (nr, nr)).into_owned();
                                        let qab = self.state.p.view((0, nr), (nr, nl)).into_owned();
                                        match fixed_solution_update(&x_nonamb, &p_nonamb, &qab, &qb, &b_hat, &b_int) {
                                            Ok((xa, _pa)) => {
                                                self.sol.rr_fixed = Some(Vector3::new(xa[0], xa[1], xa[2]));
                                                self.sol.ratio = ratio;
                                                lambda_validated = true;
                                                for i in 0..nl {
                                                    self.held_fixed.insert(nr + i, b_int[i]);
                                                }
                                            }
                                            Err(e) => warn!("{time}: fixed-solution update failed: {e}"),
                                        }
                                    }
                                    Err(e) => warn!("{time}: LAMBDA back-transform failed: {e}"),
                                },
                                Err(e) => debug!("{time}: ambiguity ratio test failed: {e}"),
                            },
                            Err(e) => debug!("{time}: LAMBDA search failed: {e}"),
                        }
                    }
                    Err(e) => debug!("{time}: LD factorization failed (ambiguity covariance not PD): {e}"),
                }
            }
        }
        self.n_fix = if lambda_validated { self.n_fix + 1 } else { 0 };

        if should_hold(&self.cfg, self.n_fix) && self.held_fixed.len() >= 2 {
            let mut indices: Vec<usize> = self.held_fixed.keys().copied().collect();
            indices.sort_unstable();
            let ref_index = indices[0];
            let other_indices = &indices[1..];
            let xa_ref = self.held_fixed[&ref_index];
            let x_ref = self.state.x[ref_index];
            let xa_others: Vec<f64> = other_indices.iter().map(|i| self.held_fixed[i]).collect();
            let x_others: Vec<f64> = other_indices.iter().map(|&i| self.state.x[i]).collect();
            let (h, r, v) = hold_rows(self.layout.nx(), ref_index, other_indices, xa_ref, &xa_others, x_ref, &x_others);
            if let Err(e) = measurement_update(&mut self.state.x, &mut self.state.p, &h, &r, &v) {
                warn!("{time}: AR-hold update failed: {e}");
            }
        }

        self.sol.rr = Vector3::new(self.state.x[0], self.state.x[1], self.state.x[2]);
        self.sol.status = assign_status(&StatusInputs {
            lambda_validated,
            postfit_ok,
            ekf_update_ok,
            common_l1_count: pairs.len(),
            mode_is_dgps: matches!(self.cfg.mode, Mode::DGPS),
            dgps_code_only_ok: ekf_update_ok,
        });

        if let Some(sink) = self.status_sink.as_mut() {
            let iono_enabled = self.layout.ni_len() > 0;
            let sat_diagnostics: Vec<SatDiagnostics> = pairs
                .iter()
                .filter_map(|(r, _b)| {
                    let slot = self.sat_index.slot(r.sv)?;
                    let ssat = self.ssats.get(&r.sv)?;
                    let iono_m = if iono_enabled { self.state.x[self.layout.ii(slot)] } else { 0.0 };
                    Some(SatDiagnostics {
                        sv: r.sv,
                        freq_index: 0,
                        azimuth_deg: r.azimuth_rad.to_degrees(),
                        elevation_deg: r.elevation_rad.to_degrees(),
                        resp_m: r.y_phase_m[0].unwrap_or(0.0),
                        resc_m: r.y_code_m[0].unwrap_or(0.0),
                        vsat: ssat.vsat[0],
                        snr_dbhz: 0.0,
                        fix: ssat.fix[0],
                        slip: ssat.slip[0].slip(),
                        lock: ssat.lock[0],
                        outc: ssat.outc[0],
                        slipc: ssat.slipc[0],
                        rejc: ssat.rejc[0],
                        iono_m,
                        iono_fixed: lambda_validated,
                    })
                })
                .collect();

            let trop_diagnostics: Vec<TropoDiagnostics> = [(Receiver::Rover, 0usize), (Receiver::Base, 1usize)]
                .into_iter()
                .map(|(receiver, rcv)| {
                    let ztd_m = self.state.x[self.layout.it(rcv, 0)];
                    TropoDiagnostics { receiver, ztd_m, ztd_fixed_m: ztd_m }
                })
                .collect();

            let hwbias_diagnostics: Vec<HwBiasDiagnostics> = (0..self.layout.nr_len())
                .map(|f| {
                    let bias_m = self.state.x[self.layout.ib(f)];
                    HwBiasDiagnostics { freq_index: f, bias_m, bias_fixed_m: bias_m }
                })
                .collect();

            sink.log_epoch(&self.sol, &sat_diagnostics, &trop_diagnostics, &hwbias_diagnostics);
        }

        Ok(true)
    }
}
