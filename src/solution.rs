//! RTK solution and per-satellite diagnostics.

use crate::prelude::{Epoch, SV};
use nalgebra::{Matrix3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Ambiguity/position fix status reported per epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SolutionStatus {
    #[default]
    None,
    Single,
    Dgps,
    Float,
    Fix,
}

impl std::fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Single => write!(f, "single"),
            Self::Dgps => write!(f, "dgps"),
            Self::Float => write!(f, "float"),
            Self::Fix => write!(f, "fix"),
        }
    }
}

/// Solution produced by one `rtk_step` call: rover position, velocity,
/// receiver-clock offsets, and fit diagnostics.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sol {
    pub epoch: Epoch,
    pub status: SolutionStatus,
    /// Rover ECEF position [m] (float solution).
    pub rr: Vector3<f64>,
    /// Rover ECEF position [m], integer-fixed solution, when `status == Fix`.
    pub rr_fixed: Option<Vector3<f64>>,
    /// Rover ECEF velocity [m/s].
    pub vv: Vector3<f64>,
    /// Position covariance (ECEF), float solution.
    pub qr: Matrix3<f64>,
    /// Velocity covariance (ECEF).
    pub qv: Matrix3<f64>,
    /// Receiver clock offsets [ns]: GPS, GLO-GPS, GAL-GPS, BDS-GPS.
    pub clk_ns: [f64; 4],
    /// Number of satellites contributing to this epoch's solution.
    pub ns: u32,
    /// Age of differential corrections [s].
    pub age_s: f64,
    /// LAMBDA ratio-test value of the best-vs-second-best candidate.
    pub ratio: f64,
}

impl Sol {
    pub fn none(epoch: Epoch) -> Self {
        Self {
            epoch,
            status: SolutionStatus::None,
            rr: Vector3::zeros(),
            rr_fixed: None,
            vv: Vector3::zeros(),
            qr: Matrix3::zeros(),
            qv: Matrix3::zeros(),
            clk_ns: [0.0; 4],
            ns: 0,
            age_s: 0.0,
            ratio: 0.0,
        }
    }

    /// Position reported for downstream consumers: fixed when available,
    /// float otherwise.
    pub fn best_position(&self) -> Vector3<f64> {
        self.rr_fixed.unwrap_or(self.rr)
    }
}

/// Per-satellite diagnostics emitted alongside `Sol`, matching the `$SAT`
/// record and `$ION`/`$TROP`/`$HWBIAS` records of the solution-status log.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SatDiagnostics {
    pub sv: SV,
    pub freq_index: usize,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub resp_m: f64,
    pub resc_m: f64,
    pub vsat: bool,
    pub snr_dbhz: f64,
    pub fix: crate::ssat::FixStatus,
    pub slip: bool,
    pub lock: i32,
    pub outc: u32,
    pub slipc: u32,
    pub rejc: u32,
    pub iono_m: f64,
    pub iono_fixed: bool,
}

/// Per-receiver tropospheric diagnostics, matching the `$TROP` record.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TropoDiagnostics {
    pub receiver: crate::observation::Receiver,
    pub ztd_m: f64,
    pub ztd_fixed_m: f64,
}

/// Per-frequency GLONASS hardware inter-frequency bias diagnostics,
/// matching the `$HWBIAS` record.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HwBiasDiagnostics {
    pub freq_index: usize,
    pub bias_m: f64,
    pub bias_fixed_m: f64,
}
