//! Collaborator interfaces consumed by the RTK core.
//!
//! None of these are implemented here: broadcast/precise ephemeris decoding,
//! single point positioning, tropo/iono/tide models are out of scope.
//! The core is generic over collaborators, supplied by the caller rather
//! than hard-wired to a particular ephemeris or positioning source.

use crate::prelude::{Epoch, SV};
use crate::solution::Sol;
use nalgebra::Vector3;

/// Satellite position/clock/health at transmission time, for a batch of
/// satellites.
pub trait SatPositionProvider {
    /// Returns, for every requested satellite: ECEF position+velocity [m,
    /// m/s], clock offset+drift [s, s/s], variance [m²], health flag.
    fn sat_positions(
        &mut self,
        t: Epoch,
        sv_list: &[SV],
    ) -> Vec<(SV, Vector3<f64>, Vector3<f64>, f64, f64, f64, bool)>;
}

/// Single point (code-only) positioning, used to seed `sol.rr` each epoch.
pub trait PointPositioner {
    fn point_pos(&mut self, t: Epoch, sv_ranges: &[(SV, f64)]) -> Option<Sol>;
}

/// Tropospheric delay model: zenith value and elevation mapping function.
pub trait TropoModelProvider {
    /// Zenith hydrostatic/wet delay [m] at `pos_ecef`, time `t`.
    fn trop_model(&self, t: Epoch, pos_ecef: Vector3<f64>) -> f64;
    /// Dry/wet mapping function value at elevation `el_rad`.
    fn trop_map(&self, t: Epoch, pos_ecef: Vector3<f64>, el_rad: f64) -> f64;
}

/// Ionospheric delay model, used only when `IonoOpt` selects a broadcast or
/// SBAS correction rather than filter estimation.
pub trait IonoModelProvider {
    /// Slant ionospheric delay [m] on L1, at elevation/azimuth `(el, az)` rad.
    fn iono_map(&self, t: Epoch, pos_ecef: Vector3<f64>, az_rad: f64, el_rad: f64) -> f64;
}

/// Solid-earth / ocean-loading displacement.
pub trait TideModelProvider {
    /// ENU displacement [m] at `pos_ecef`, time `t`, for the configured
    /// `TideCorr` level.
    fn tide_disp(&self, t: Epoch, pos_ecef: Vector3<f64>, level: u8) -> Vector3<f64>;
}

#[cfg(test)]
pub(crate) mod stubs {
    use super::*;

    pub struct ZeroTropo;
    impl TropoModelProvider for ZeroTropo {
        fn trop_model(&self, _t: Epoch, _pos_ecef: Vector3<f64>) -> f64 {
            0.0
        }
        fn trop_map(&self, _t: Epoch, _pos_ecef: Vector3<f64>, el_rad: f64) -> f64 {
            1.0 / el_rad.sin().max(0.01)
        }
    }

    pub struct ZeroIono;
    impl IonoModelProvider for ZeroIono {
        fn iono_map(&self, _t: Epoch, _pos_ecef: Vector3<f64>, _az_rad: f64, _el_rad: f64) -> f64 {
            0.0
        }
    }

    pub struct ZeroTide;
    impl TideModelProvider for ZeroTide {
        fn tide_disp(&self, _t: Epoch, _pos_ecef: Vector3<f64>, _level: u8) -> Vector3<f64> {
            Vector3::zeros()
        }
    }
}
