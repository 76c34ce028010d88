#![doc = include_str!("../README.md")]
#![cfg_attr(docrs, feature(doc_cfg))]

extern crate gnss_rs as gnss;

mod carrier;
mod cfg;
mod collaborators;
mod constants;
mod error;
mod geodetic;
mod observation;
mod rtk;
mod solution;
mod ssat;
mod state;
mod status;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use crate::carrier::Carrier;
    pub use crate::cfg::{
        BdsModeAr, Config, GloModeAr, IonoOpt, Modeling, ModeAr, Mode, NavSys, SolType, TropOpt,
    };
    pub use crate::collaborators::{
        IonoModelProvider, PointPositioner, SatPositionProvider, TideModelProvider,
        TropoModelProvider,
    };
    pub use crate::error::Error;
    pub use crate::geodetic::{azimuth_elevation, ecef2enu, ecef2pos, pos2ecef, GeodeticPos};
    pub use crate::observation::{EpochObservations, Lli, Observation, Receiver, SignalObservation};
    pub use crate::rtk::Rtk;
    pub use crate::solution::{HwBiasDiagnostics, SatDiagnostics, Sol, SolutionStatus, TropoDiagnostics};
    pub use crate::ssat::{FixStatus, SSat};
    pub use crate::state::{SatIndex, StateLayout};
    pub use crate::status::{SolutionStatusSink, StringSink};

    pub use gnss::prelude::{Constellation, SV};
    pub use hifitime::{Duration, Epoch, TimeScale};
    pub use nalgebra::Vector3;
}
