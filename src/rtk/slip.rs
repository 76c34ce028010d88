//! Cycle-slip detection: three detectors run on every `(sat, rcv, freq)`.

use crate::carrier::Carrier;
use crate::observation::{Lli, SignalObservation};
use crate::ssat::SSat;

/// Time direction the detector runs in: backward filtering reinterprets
/// which LLI sample is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// LLI-based detector: bit0 set (current epoch forward, or previous epoch
/// backward) or a transition of the half-cycle-ambiguous bit (bit1) flags
/// a slip.
pub fn lli_slip(direction: Direction, previous: Lli, current: Lli) -> bool {
    let lock_lost = match direction {
        Direction::Forward => current.slip(),
        Direction::Backward => previous.slip(),
    };
    let half_cycle_transition = previous.half_cycle_ambiguous() != current.half_cycle_ambiguous();
    lock_lost || half_cycle_transition
}

/// Single-differenced geometry-free combination, `GF_k = L1*c/f1 - Lk*c/fk`,
/// expressed in meters, between rover and base phases on the same carrier.
pub fn geometry_free_combination(l1_sd_m: f64, lk_sd_m: f64) -> f64 {
    l1_sd_m - lk_sd_m
}

/// Geometry-free jump detector for frequency slot `k > 0`: compares the
/// current SD geometry-free combination with the stored previous value; a
/// jump beyond `thres_slip_m` flags slip on both L1 and Lk.
pub fn gf_jump_slip(ssat: &mut SSat, k: usize, gf_now_m: f64, thres_slip_m: f64) -> bool {
    let jumped = match ssat.gf_prev[k] {
        Some(prev) => (gf_now_m - prev).abs() > thres_slip_m,
        None => false,
    };
    ssat.gf_prev[k] = Some(gf_now_m);
    if jumped {
        ssat.slip[0].set_slip();
        ssat.slip[k].set_slip();
    }
    jumped
}

/// Doppler/phase consistency check: disabled by default since clock jumps
/// cause false positives. Flags slip when the phase-rate predicted from
/// Doppler disagrees with the observed phase-rate by more than
/// `tol_cycles_per_s * dt`.
pub fn doppler_phase_slip(
    previous: &SignalObservation,
    current: &SignalObservation,
    dt_s: f64,
    tol_cycles_per_s: f64,
) -> bool {
    if dt_s <= 0.0 || !previous.has_phase() || !current.has_phase() {
        return false;
    }
    let observed_rate = (current.phase_cycles - previous.phase_cycles) / dt_s;
    let predicted_rate = -0.5 * (previous.doppler_hz + current.doppler_hz);
    (observed_rate - predicted_rate).abs() > tol_cycles_per_s
}

/// Runs every enabled detector for one (sat, freq) pair and updates
/// `ssat.slip[f]`/`ssat.prev_lli`/`ssat.prev_phase` bookkeeping. Returns
/// true when a slip was flagged this epoch.
#[allow(clippy::too_many_arguments)]
pub fn run_detectors(
    ssat: &mut SSat,
    f: usize,
    rcv: usize,
    direction: Direction,
    current_lli: Lli,
    gf_now_m: Option<f64>,
    thres_slip_m: f64,
    doppler_check: Option<(&SignalObservation, &SignalObservation, f64, f64)>,
) -> bool {
    let previous_lli = ssat.prev_lli[f][rcv];
    let mut slip = lli_slip(direction, previous_lli, current_lli);
    ssat.prev_lli[f][rcv] = current_lli;

    if let (Some(gf), true) = (gf_now_m, f > 0) {
        slip |= gf_jump_slip(ssat, f, gf, thres_slip_m);
    }

    if let Some((prev_obs, cur_obs, dt_s, tol)) = doppler_check {
        slip |= doppler_phase_slip(prev_obs, cur_obs, dt_s, tol);
    }

    if slip {
        ssat.slip[f].set_slip();
        ssat.slipc[f] += 1;
    }
    slip
}

/// Geometry-free combination in meters from two same-receiver signal
/// observations on L1 and on frequency slot `k`.
pub fn gf_from_signals(l1: &SignalObservation, lk: &SignalObservation) -> f64 {
    debug_assert!(l1.carrier == Carrier::L1 || l1.carrier.is_l1_pivot());
    geometry_free_combination(l1.phase_range_m(), lk.phase_range_m())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lli_bit0_forward_flags_slip() {
        assert!(lli_slip(Direction::Forward, Lli::NONE, Lli(0b01)));
        assert!(!lli_slip(Direction::Forward, Lli::NONE, Lli::NONE));
    }

    #[test]
    fn lli_bit0_backward_checks_previous() {
        assert!(lli_slip(Direction::Backward, Lli(0b01), Lli::NONE));
        assert!(!lli_slip(Direction::Backward, Lli::NONE, Lli(0b01)));
    }

    #[test]
    fn half_cycle_transition_flags_slip() {
        assert!(lli_slip(Direction::Forward, Lli::NONE, Lli(0b10)));
    }

    #[test]
    fn gf_jump_beyond_threshold_flags_both_frequencies() {
        let mut ssat = SSat::new();
        assert!(!gf_jump_slip(&mut ssat, 1, 0.10, 0.05));
        assert!(gf_jump_slip(&mut ssat, 1, 0.25, 0.05));
        assert!(ssat.slip[0].slip());
        assert!(ssat.slip[1].slip());
    }

    #[test]
    fn run_detectors_increments_slipc_once_per_detected_slip() {
        let mut ssat = SSat::new();
        assert_eq!(ssat.slipc[0], 0);
        run_detectors(&mut ssat, 0, 0, Direction::Forward, Lli(0b01), None, 0.05, None);
        assert_eq!(ssat.slipc[0], 1);
        run_detectors(&mut ssat, 0, 0, Direction::Forward, Lli::NONE, None, 0.05, None);
        assert_eq!(ssat.slipc[0], 1);
    }
}
