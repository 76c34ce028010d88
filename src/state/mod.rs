//! Kalman state vector layout and slot indexing.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::cfg::{Config, GloModeAr, Mode, TropOpt};
use crate::prelude::SV;

pub mod time_update;

/// Stable `SV -> slot` mapping, grown on first sight, never shrunk within a
/// session: satellite-number indexing is replaced by indexing through this
/// table instead of sizing arrays at a fixed maximum satellite count.
#[derive(Debug, Clone, Default)]
pub struct SatIndex {
    slots: HashMap<SV, usize>,
    order: Vec<SV>,
}

impl SatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing slot for `sv`, allocating a new one if unseen.
    pub fn slot_or_insert(&mut self, sv: SV) -> usize {
        if let Some(slot) = self.slots.get(&sv) {
            return *slot;
        }
        let slot = self.order.len();
        self.order.push(sv);
        self.slots.insert(sv, slot);
        slot
    }

    pub fn slot(&self, sv: SV) -> Option<usize> {
        self.slots.get(&sv).copied()
    }

    pub fn sv(&self, slot: usize) -> Option<SV> {
        self.order.get(slot).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn tracked(&self) -> &[SV] {
        &self.order
    }
}

/// Offset/length functions for every state group, derived purely from
/// configuration: every index is computed from these functions rather than
/// stored separately, so layout and state vector can never disagree.
#[derive(Debug, Clone, Copy)]
pub struct StateLayout {
    /// Position + optional velocity + acceleration length (3, 6 or 9).
    pub np: usize,
    /// Max tracked satellites, sized from the current `SatIndex` length.
    pub max_sat: usize,
    /// Number of frequencies in use.
    pub nf: usize,
    pub iono_enabled: bool,
    pub tropo_gradient: bool,
    pub glo_ifb_enabled: bool,
}

impl StateLayout {
    pub fn new(cfg: &Config, max_sat: usize) -> Self {
        let np = if matches!(cfg.mode, Mode::Fixed | Mode::PPPFixed) {
            3
        } else if cfg.dynamics {
            9
        } else {
            3
        };
        Self {
            np,
            max_sat,
            nf: cfg.nf,
            iono_enabled: !matches!(cfg.iono_opt, crate::cfg::IonoOpt::Off),
            tropo_gradient: matches!(cfg.trop_opt, TropOpt::EstGrad),
            glo_ifb_enabled: matches!(cfg.glo_mode_ar, GloModeAr::FixHold),
        }
    }

    /// `[0..NP)`: position (3), optional velocity (3), optional acceleration (3).
    pub fn np_offset(&self) -> usize {
        0
    }

    /// `[NP..NP+NI)`: slant ionospheric delay, one entry per tracked satellite.
    pub fn ni_offset(&self) -> usize {
        self.np
    }
    pub fn ni_len(&self) -> usize {
        if self.iono_enabled {
            self.max_sat
        } else {
            0
        }
    }

    /// `[NP+NI..NR)`: tropospheric zenith wet delay per receiver (rover,
    /// base), 1 or 3 entries each depending on gradient estimation.
    pub fn nt_offset(&self) -> usize {
        self.ni_offset() + self.ni_len()
    }
    pub fn nt_len(&self) -> usize {
        let per_receiver = if self.tropo_gradient { 3 } else { 1 };
        2 * per_receiver
    }

    /// `[NR_start..NR)`: GLONASS hardware inter-frequency bias, one per frequency.
    pub fn nr_offset(&self) -> usize {
        self.nt_offset() + self.nt_len()
    }
    pub fn nr_len(&self) -> usize {
        if self.glo_ifb_enabled {
            self.nf
        } else {
            0
        }
    }

    /// First index of the ambiguity block.
    pub fn nr(&self) -> usize {
        self.nr_offset() + self.nr_len()
    }

    /// `[NR..Nx)`: float DD phase ambiguities, indexed `(satellite, frequency)`.
    pub fn nl_len(&self) -> usize {
        self.max_sat * self.nf
    }

    /// Total state length.
    pub fn nx(&self) -> usize {
        self.nr() + self.nl_len()
    }

    /// Index of the slant ionospheric delay for satellite slot `sat`.
    pub fn ii(&self, sat: usize) -> usize {
        self.ni_offset() + sat
    }

    /// Index of the tropospheric zenith delay for receiver `rcv` (0=rover,
    /// 1=base), gradient component `comp` (0=zenith, 1=east, 2=north).
    pub fn it(&self, rcv: usize, comp: usize) -> usize {
        let per_receiver = if self.tropo_gradient { 3 } else { 1 };
        self.nt_offset() + rcv * per_receiver + comp
    }

    /// Index of the GLONASS hardware bias for frequency `f`.
    pub fn ib(&self, f: usize) -> usize {
        self.nr_offset() + f
    }

    /// Index of the float DD phase ambiguity for satellite slot `sat`,
    /// frequency `f`.
    pub fn rib(&self, sat: usize, f: usize) -> usize {
        self.nr() + sat * self.nf + f
    }
}

/// Owned Kalman state: vector `X` and covariance `P`, dynamically sized per
/// the current `StateLayout` rather than compile-time-sized arrays.
#[derive(Debug, Clone)]
pub struct KalmanState {
    pub x: DVector<f64>,
    pub p: DMatrix<f64>,
}

impl KalmanState {
    pub fn zeros(nx: usize) -> Self {
        Self {
            x: DVector::zeros(nx),
            p: DMatrix::zeros(nx, nx),
        }
    }

    /// Grows the state/covariance from `old_layout` to `new_layout`,
    /// preserving existing values at their new, possibly-shifted indices
    /// and leaving new entries at zero. The ionospheric block sits between
    /// the position block and everything else, so a newly tracked satellite
    /// extends it *in the middle* of the vector: every group after it (tropo,
    /// GLONASS bias, ambiguities) shifts down by the ionospheric block's
    /// growth, not just whatever sits at the tail.
    pub fn resize(&mut self, old_layout: &StateLayout, new_layout: &StateLayout) {
        let old_nx = old_layout.nx();
        let new_nx = new_layout.nx();
        if old_nx == new_nx && old_layout.max_sat == new_layout.max_sat {
            return;
        }
        let boundary = old_layout.ni_offset() + old_layout.ni_len();
        let shift = new_layout.ni_len() as isize - old_layout.ni_len() as isize;
        let map = |old_i: usize| -> usize {
            if old_i < boundary {
                old_i
            } else {
                (old_i as isize + shift) as usize
            }
        };

        let mut new_x = DVector::zeros(new_nx);
        let mut new_p = DMatrix::zeros(new_nx, new_nx);
        for i in 0..old_nx {
            let ni = map(i);
            new_x[ni] = self.x[i];
            for j in 0..old_nx {
                new_p[(ni, map(j))] = self.p[(i, j)];
            }
        }
        self.x = new_x;
        self.p = new_p;
    }

    /// Resets one state index to `value` with variance `var`, zeroing
    /// cross-covariance terms: used on outage-overflow and slip resets.
    pub fn reset_index(&mut self, i: usize, value: f64, var: f64) {
        let n = self.x.len();
        for k in 0..n {
            self.p[(i, k)] = 0.0;
            self.p[(k, i)] = 0.0;
        }
        self.x[i] = value;
        self.p[(i, i)] = var;
    }

    /// True when the ambiguity at `i` is uninitialised: `X[i] == 0` and the
    /// diagonal of `P` at `i` is also zero.
    pub fn is_unset(&self, i: usize) -> bool {
        self.x[i] == 0.0 && self.p[(i, i)] == 0.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cfg::Mode;

    #[test]
    fn layout_offsets_are_monotonic() {
        let cfg = Config::kinematic_preset(Mode::Kinematic);
        let layout = StateLayout::new(&cfg, 12);
        assert!(layout.ni_offset() >= layout.np_offset());
        assert!(layout.nt_offset() >= layout.ni_offset() + layout.ni_len());
        assert!(layout.nr() >= layout.nt_offset() + layout.nt_len());
        assert_eq!(layout.nx(), layout.nr() + layout.nl_len());
    }

    #[test]
    fn rib_indices_are_distinct_per_sat_and_freq() {
        let cfg = Config::kinematic_preset(Mode::Kinematic);
        let layout = StateLayout::new(&cfg, 4);
        let mut seen = std::collections::HashSet::new();
        for sat in 0..4 {
            for f in 0..layout.nf {
                assert!(seen.insert(layout.rib(sat, f)));
            }
        }
    }

    #[test]
    fn resize_preserves_existing_values_at_the_tail() {
        let mut cfg = Config::kinematic_preset(Mode::Kinematic);
        cfg.iono_opt = crate::cfg::IonoOpt::Off;
        let old_layout = StateLayout::new(&cfg, 1);
        let new_layout = StateLayout::new(&cfg, 2);
        let mut state = KalmanState::zeros(old_layout.nx());
        state.x[0] = 42.0;
        state.p[(0, 0)] = 9.0;
        state.resize(&old_layout, &new_layout);
        assert_eq!(state.x[0], 42.0);
        assert_eq!(state.p[(0, 0)], 9.0);
        assert_eq!(state.x.len(), new_layout.nx());
    }

    #[test]
    fn resize_remaps_groups_after_a_mid_vector_iono_growth() {
        let cfg = Config::kinematic_preset(Mode::Kinematic);
        let old_layout = StateLayout::new(&cfg, 1);
        let new_layout = StateLayout::new(&cfg, 2);
        assert!(old_layout.iono_enabled);

        let mut state = KalmanState::zeros(old_layout.nx());
        let old_ztd_idx = old_layout.it(0, 0);
        let old_amb_idx = old_layout.rib(0, 0);
        state.x[old_layout.ii(0)] = 1.5; // iono delay for the one tracked satellite
        state.x[old_ztd_idx] = 0.15; // rover ZTD
        state.p[(old_ztd_idx, old_ztd_idx)] = 0.02;
        state.x[old_amb_idx] = 7.0; // ambiguity for (sat 0, freq 0)
        state.p[(old_amb_idx, old_ztd_idx)] = 0.01;
        state.p[(old_ztd_idx, old_amb_idx)] = 0.01;

        state.resize(&old_layout, &new_layout);

        assert_eq!(state.x[new_layout.ii(0)], 1.5);
        assert_eq!(state.x[new_layout.it(0, 0)], 0.15);
        assert_eq!(state.p[(new_layout.it(0, 0), new_layout.it(0, 0))], 0.02);
        assert_eq!(state.x[new_layout.rib(0, 0)], 7.0);
        assert_eq!(state.p[(new_layout.rib(0, 0), new_layout.it(0, 0))], 0.01);
        assert_eq!(state.x[new_layout.ii(1)], 0.0); // newly added satellite starts unset
        assert_ne!(new_layout.it(0, 0), old_ztd_idx, "tropo block must have shifted");
    }

    #[test]
    fn sat_index_is_stable_across_calls() {
        use gnss::prelude::Constellation;
        let mut index = SatIndex::new();
        let sv1 = SV::new(Constellation::GPS, 1);
        let sv2 = SV::new(Constellation::GPS, 2);
        let s1 = index.slot_or_insert(sv1);
        let s2 = index.slot_or_insert(sv2);
        assert_ne!(s1, s2);
        assert_eq!(index.slot_or_insert(sv1), s1);
        assert_eq!(index.sv(s1), Some(sv1));
    }
}
