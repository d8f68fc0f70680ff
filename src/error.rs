use crate::reconstruct::CorrelationMatrix;
use thiserror::Error;

/// Failure modes of the reconstruction pipeline.
///
/// Every component validates its own preconditions and fails fast with one
/// of these variants. Nothing is coerced to NaN and nothing is retried:
/// the computation is deterministic, so a retry could only reproduce the
/// same failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A scalar input lies outside its physical domain, e.g. a relativistic
    /// beta outside (0,1), a non-positive frequency or mass, or a BPM
    /// amplitude for which the Gaussian suppression model is undefined.
    #[error("invalid physical parameter: {0}")]
    InvalidPhysicalParameter(String),

    /// The harmonic fit is degenerate: fewer than 3 distinct cavity phases,
    /// or the fitted modulation amplitude is indistinguishable from zero.
    #[error("harmonic fit did not converge: {0}")]
    FitDidNotConverge(String),

    /// Fewer than 3 usable scan samples, or the usable samples do not span
    /// 3 independent directions in correlation space.
    #[error("underdetermined system: {0}")]
    UnderdeterminedSystem(String),

    /// The least-squares solution is not a valid second-moment matrix
    /// (negative emittance discriminant). The unconstrained solution is
    /// carried along so the caller can inspect it; it is never clamped or
    /// projected onto the physical region.
    #[error("physically inconsistent fit: <z^2><dE^2> - <z.dE>^2 = {discriminant:.3e}")]
    PhysicallyInconsistentFit {
        correlations: CorrelationMatrix,
        discriminant: f64,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidPhysicalParameter(msg.into())
    }
}
