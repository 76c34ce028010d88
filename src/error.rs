use thiserror::Error;

use crate::prelude::{Epoch, Receiver, SV};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Not enough candidates were proposed, with respect to navigation parameters.
    #[error("not enough candidates provided")]
    NotEnoughCandidates,
    /// PreFit (signal quality, elevation mask, other..) criteria have been
    /// applied but we're left with not enough vehicles to proceed: no attempt.
    #[error("not enough candidates match pre-fit criteria")]
    NotEnoughPreFitCandidates,
    /// PostFit (state solver and other) have been resolved, but we're left
    /// with not enough double-differences to proceed: no attempt.
    #[error("not enough candidates match post-fit criteria")]
    NotEnoughPostFitCandidates,
    /// Failed to parse navigation method
    #[error("non supported/invalid strategy")]
    InvalidStrategy,
    #[error("internal error: invalid matrix setup")]
    MatrixDimension,
    #[error("failed to form matrix (invalid input or not enough data)")]
    MatrixFormationError,
    /// Bad signal data or an ill-conditioned innovation covariance may cause
    /// the algebraic calculations to wind up here.
    #[error("failed to invert matrix")]
    MatrixInversion,
    #[error("resolved time is `nan` (invalid value(s))")]
    TimeIsNan,
    #[error("internal navigation error")]
    NavigationError,
    /// Failed to initialize the navigation filter
    #[error("nav filter initialization error")]
    NavigationFilterInitError,
    #[error("missing pseudo range observation")]
    MissingPseudoRange,
    #[error("missing carrier phase observation")]
    MissingPhaseRange,
    /// Each candidate state needs to be resolved (orbit + clock) to
    /// contribute to any resolution attempt.
    #[error("unresolved candidate state")]
    UnresolvedState,
    /// [crate::prelude::Config] requires a base station position, but mode
    /// is not Single and not MovingBase.
    #[error("missing base station position")]
    MissingBaseStationPosition,
    /// Each [Receiver] must contribute at least one observation per epoch,
    /// for modes other than Single.
    #[error("missing observations on {0}")]
    MissingReceiverObservations(Receiver),
    #[error("unknown or non supported frequency")]
    InvalidFrequency,
    #[error("rejected troposphere delay: model divergence?")]
    RejectedTropoDelay,
    #[error("rejected ionosphere delay: model divergence?")]
    RejectedIonoDelay,
    #[error("nav filter converged to physically invalid state")]
    StateUpdate,
    /// Age of differential corrections exceeds `MaxTmDiff`/`TTOL_MOVEB`.
    #[error("{0}: differential age exceeds tolerance ({1:.3}s)")]
    DifferentialAgeExceeded(Epoch, f64),
    /// Double-difference residual `|v|` exceeds `MaxInno`.
    #[error("{0}({1}): innovation outlier rejected")]
    InnovationOutlier(Epoch, SV),
    /// No valid reference satellite could be elected for a (system, frequency) group.
    #[error("no reference satellite available for this system/frequency group")]
    NoReferenceSatellite,
    /// LAMBDA requires at least 2 ambiguities to decorrelate/search.
    #[error("not enough ambiguities to run LAMBDA")]
    NotEnoughAmbiguities,
    /// LAMBDA search did not converge within `LOOPMAX` iterations.
    #[error("LAMBDA search exceeded iteration cap")]
    LambdaSearchTimeout,
    /// LAMBDA ratio-test failed: ratio below `ThresAr[0]`.
    #[error("ambiguity ratio test failed ({0:.3} < {1:.3})")]
    AmbiguityRatioTooLow(f64, f64),
    /// Invalid configuration detected at session construction.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_embeds_the_ratio_values() {
        let err = Error::AmbiguityRatioTooLow(1.5, 3.0);
        assert_eq!(err.to_string(), "ambiguity ratio test failed (1.500 < 3.000)");
    }

    #[test]
    fn variants_compare_by_value() {
        assert_eq!(Error::MissingPhaseRange, Error::MissingPhaseRange);
        assert_ne!(Error::MissingPhaseRange, Error::MissingPseudoRange);
    }
}
