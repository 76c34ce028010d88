//! RTK session configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pipeline branch selected for each epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Mode {
    /// Single-receiver point positioning, no base station required.
    Single,
    /// Code-only differential positioning.
    DGPS,
    /// Relative RTK, rover assumed moving.
    #[default]
    Kinematic,
    /// Relative RTK, rover assumed static.
    Static,
    /// Both receivers moving; baseline length is the fixed quantity.
    MovingBase,
    /// Rover position is fully known; only ambiguities/biases are estimated.
    Fixed,
    PPPKinematic,
    PPPStatic,
    PPPFixed,
}

impl Mode {
    /// True for every relative (base-station-differenced) mode.
    pub fn is_relative(&self) -> bool {
        !matches!(
            self,
            Self::Single | Self::PPPKinematic | Self::PPPStatic | Self::PPPFixed
        )
    }
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static | Self::Fixed | Self::PPPStatic | Self::PPPFixed)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::DGPS => write!(f, "dgps"),
            Self::Kinematic => write!(f, "kinematic"),
            Self::Static => write!(f, "static"),
            Self::MovingBase => write!(f, "moving-base"),
            Self::Fixed => write!(f, "fixed"),
            Self::PPPKinematic => write!(f, "ppp-kinematic"),
            Self::PPPStatic => write!(f, "ppp-static"),
            Self::PPPFixed => write!(f, "ppp-fixed"),
        }
    }
}

/// Temporal processing direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SolType {
    #[default]
    Forward,
    Backward,
    Combined,
}

/// Ionospheric delay handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IonoOpt {
    Off,
    Brdc,
    Sbas,
    Iflc,
    #[default]
    Est,
    Tec,
    QzsBrdc,
}

/// Tropospheric delay handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TropOpt {
    Off,
    Saas,
    Sbas,
    #[default]
    Est,
    EstGrad,
}

/// Integer ambiguity resolution mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModeAr {
    Off,
    #[default]
    Continuous,
    Instantaneous,
    FixAndHold,
}

/// GLONASS-specific ambiguity resolution handling: 0 disables GLONASS
/// participation in AR, 1 resolves GLONASS ambiguities jointly, 2 resolves
/// them with a dedicated per-channel hardware-bias correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GloModeAr {
    #[default]
    Off,
    On,
    FixHold,
}

/// BeiDou-specific ambiguity resolution handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BdsModeAr {
    #[default]
    Off,
    On,
}

bitflags::bitflags! {
    /// Constellations admitted into this session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct NavSys: u8 {
        const GPS  = 0b0000_0001;
        const GLO  = 0b0000_0010;
        const GAL  = 0b0000_0100;
        const BDS  = 0b0000_1000;
        const QZS  = 0b0001_0000;
        const IRN  = 0b0010_0000;
        const SBAS = 0b0100_0000;
    }
}

impl Default for NavSys {
    fn default() -> Self {
        Self::GPS | Self::GLO | Self::GAL | Self::BDS
    }
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_nf() -> usize {
    2
}

fn default_elmin_rad() -> f64 {
    15.0_f64.to_radians()
}

fn default_el_mask_ar_rad() -> f64 {
    15.0_f64.to_radians()
}

fn default_el_mask_hold_rad() -> f64 {
    10.0_f64.to_radians()
}

fn default_thres_ar() -> f64 {
    3.0
}

fn default_thres_slip_m() -> f64 {
    0.05
}

fn default_min_fix() -> u32 {
    10
}

fn default_min_lock() -> i32 {
    5
}

fn default_max_out() -> u32 {
    5
}

fn default_max_inno_m() -> f64 {
    30.0
}

fn default_max_tm_diff_s() -> f64 {
    30.0
}

fn default_sat_clk_stab() -> f64 {
    5.0E-12
}

fn default_err() -> [f64; 4] {
    // [0]: ratio phase/code, [1]: a (constant), [2]: b (elevation dependent), [3]: SNR term
    [100.0, 0.003, 0.003, 0.0]
}

fn default_prn() -> [f64; 5] {
    // process noise std per state class: bias, iono, tropo, horiz accel, vert accel
    [1.0E-4, 1.0E-3, 1.0E-4, 1.0E-4, 1.0E-4]
}

fn default_prn_hwbias() -> f64 {
    1.0E-4
}

fn default_std() -> [f64; 3] {
    // initial std for [bias, iono, tropo]
    [30.0, 0.03, 0.3]
}

fn default_eratio() -> [f64; 2] {
    [100.0, 100.0]
}

fn default_baseline() -> [f64; 2] {
    [0.0, 0.0]
}

/// Modeling toggles for effects applied before residual construction.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Modeling {
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub earth_rotation: bool,
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub relativistic_clock_bias: bool,
    /// (ambient, supplement): opt-in Doppler/phase consistency cycle-slip
    /// check, disabled by default.
    #[cfg_attr(feature = "serde", serde(default = "default_false"))]
    pub doppler_slip_check: bool,
}

impl Default for Modeling {
    fn default() -> Self {
        Self {
            earth_rotation: default_true(),
            relativistic_clock_bias: default_true(),
            doppler_slip_check: default_false(),
        }
    }
}

/// RTK session configuration, field-for-field; every default is a free
/// `default_xxx()` function consumed both by `Default` and by
/// `serde(default = "...")`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    #[cfg_attr(feature = "serde", serde(default))]
    pub mode: Mode,
    #[cfg_attr(feature = "serde", serde(default = "default_nf"))]
    pub nf: usize,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sol_type: SolType,
    #[cfg_attr(feature = "serde", serde(default))]
    pub nav_sys: NavSys,
    #[cfg_attr(feature = "serde", serde(default = "default_elmin_rad"))]
    pub elmin_rad: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_el_mask_ar_rad"))]
    pub el_mask_ar_rad: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_el_mask_hold_rad"))]
    pub el_mask_hold_rad: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub iono_opt: IonoOpt,
    #[cfg_attr(feature = "serde", serde(default))]
    pub trop_opt: TropOpt,
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub dynamics: bool,
    /// Solid-earth / ocean-loading tide correction level: 0 off, 1 solid
    /// earth only, 2 solid earth + ocean loading.
    #[cfg_attr(feature = "serde", serde(default))]
    pub tide_corr: u8,
    #[cfg_attr(feature = "serde", serde(default))]
    pub mode_ar: ModeAr,
    #[cfg_attr(feature = "serde", serde(default))]
    pub glo_mode_ar: GloModeAr,
    #[cfg_attr(feature = "serde", serde(default))]
    pub bds_mode_ar: BdsModeAr,
    #[cfg_attr(feature = "serde", serde(default = "default_thres_ar"))]
    pub thres_ar: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_thres_slip_m"))]
    pub thres_slip_m: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_min_fix"))]
    pub min_fix: u32,
    #[cfg_attr(feature = "serde", serde(default = "default_min_lock"))]
    pub min_lock: i32,
    #[cfg_attr(feature = "serde", serde(default = "default_max_out"))]
    pub max_out: u32,
    #[cfg_attr(feature = "serde", serde(default = "default_max_inno_m"))]
    pub max_inno_m: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_max_tm_diff_s"))]
    pub max_tm_diff_s: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_sat_clk_stab"))]
    pub sat_clk_stab: f64,
    /// Single-differenced measurement-noise model: `[ratio, a, b, snr_term]`.
    #[cfg_attr(feature = "serde", serde(default = "default_err"))]
    pub err: [f64; 4],
    /// Process-noise std per state class: `[bias, iono, tropo, horiz_accel, vert_accel]`.
    #[cfg_attr(feature = "serde", serde(default = "default_prn"))]
    pub prn: [f64; 5],
    /// Process-noise std for the GLONASS hardware inter-frequency bias.
    #[cfg_attr(feature = "serde", serde(default = "default_prn_hwbias"))]
    pub prn_hwbias: f64,
    /// Initial std for `[bias, iono, tropo]`.
    #[cfg_attr(feature = "serde", serde(default = "default_std"))]
    pub std: [f64; 3],
    /// Code/phase error ratio per `[base, rover]`.
    #[cfg_attr(feature = "serde", serde(default = "default_eratio"))]
    pub eratio: [f64; 2],
    /// Fixed baseline length bounds `[min, max]` [m], `MovingBase` only.
    #[cfg_attr(feature = "serde", serde(default = "default_baseline"))]
    pub baseline: [f64; 2],
    #[cfg_attr(feature = "serde", serde(default))]
    pub modeling: Modeling,
}

impl Default for Config {
    fn default() -> Self {
        Self::kinematic_preset(Mode::Kinematic)
    }
}

impl Config {
    /// Preset tuned for a moving rover (`Kinematic`, `MovingBase`, `PPPKinematic`).
    pub fn kinematic_preset(mode: Mode) -> Self {
        Self {
            mode,
            nf: default_nf(),
            sol_type: SolType::default(),
            nav_sys: NavSys::default(),
            elmin_rad: default_elmin_rad(),
            el_mask_ar_rad: default_el_mask_ar_rad(),
            el_mask_hold_rad: default_el_mask_hold_rad(),
            iono_opt: IonoOpt::default(),
            trop_opt: TropOpt::default(),
            dynamics: default_true(),
            tide_corr: 0,
            mode_ar: ModeAr::default(),
            glo_mode_ar: GloModeAr::default(),
            bds_mode_ar: BdsModeAr::default(),
            thres_ar: default_thres_ar(),
            thres_slip_m: default_thres_slip_m(),
            min_fix: default_min_fix(),
            min_lock: default_min_lock(),
            max_out: default_max_out(),
            max_inno_m: default_max_inno_m(),
            max_tm_diff_s: default_max_tm_diff_s(),
            sat_clk_stab: default_sat_clk_stab(),
            err: default_err(),
            prn: default_prn(),
            prn_hwbias: default_prn_hwbias(),
            std: default_std(),
            eratio: default_eratio(),
            baseline: default_baseline(),
            modeling: Modeling::default(),
        }
    }

    /// Preset tuned for a stationary rover (`Static`, `Fixed`, `PPPStatic`,
    /// `PPPFixed`): dynamics off, tighter AR thresholds.
    pub fn static_preset(mode: Mode) -> Self {
        Self {
            dynamics: default_false(),
            thres_ar: default_thres_ar() * 1.5,
            min_fix: default_min_fix() * 2,
            ..Self::kinematic_preset(mode)
        }
    }

    /// Validates configuration invariants checked at `Rtk::new`: invalid
    /// mode/index combinations abort at session construction, never
    /// mid-session.
    pub fn validate(&self) -> Result<(), crate::prelude::Error> {
        if self.nf == 0 || self.nf > 3 {
            return Err(crate::prelude::Error::InvalidConfiguration(
                "nf must be in 1..=3",
            ));
        }
        if matches!(self.mode, Mode::MovingBase) && self.baseline[1] <= 0.0 {
            return Err(crate::prelude::Error::InvalidConfiguration(
                "MovingBase requires a positive baseline upper bound",
            ));
        }
        if self.elmin_rad < 0.0 || self.elmin_rad > std::f64::consts::FRAC_PI_2 {
            return Err(crate::prelude::Error::InvalidConfiguration(
                "elmin_rad out of range",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinematic_preset_has_dynamics_on() {
        let cfg = Config::kinematic_preset(Mode::Kinematic);
        assert!(cfg.dynamics);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn static_preset_has_dynamics_off() {
        let cfg = Config::static_preset(Mode::Static);
        assert!(!cfg.dynamics);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn moving_base_requires_baseline() {
        let mut cfg = Config::kinematic_preset(Mode::MovingBase);
        cfg.baseline = [0.0, 0.0];
        assert!(cfg.validate().is_err());
    }
}
