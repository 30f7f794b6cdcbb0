use thiserror::Error;

/// Why a footprint or water ring was rejected by geometry repair.
///
/// These never abort a stage: callers count the primitive as skipped and
/// move on.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("ring has fewer than 3 distinct vertices")]
    TooFewVertices,

    #[error("polygon area {0:.3} m2 is below the minimum")]
    BelowMinArea(f64),

    #[error("self-intersecting ring could not be normalized")]
    Unrepairable,

    #[error("clip result is empty")]
    EmptyClip,
}
