use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] odal::Error),

    #[error(transparent)]
    Filter(#[from] filter::Error),

    #[error("invalid footstep timing: swing {swing}s, transfer {transfer}s")]
    #[diagnostic(help("durations must be finite and non-negative"))]
    InvalidTiming { swing: f64, transfer: f64 },

    #[error("`{name}` must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("`{name}` must be within [{min}, {max}], got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("`{name}` must span at least one tick")]
    EmptyWindow { name: &'static str },

    #[error("swing spline fractions {start} and {end} are not ordered within [0, 1]")]
    #[diagnostic(help("the spline must start before it ends"))]
    InvalidSwingSplit { start: f64, end: f64 },

    #[error("reachability box is empty: {name}")]
    #[diagnostic(help("the forward limit must exceed the backward limit and outer must exceed inner"))]
    EmptyReachability { name: &'static str },

    #[error("foot polygon needs at least three non-collinear points, got {0}")]
    #[diagnostic(help("check `sole_contact_points` in the balance config"))]
    DegenerateFootPolygon(usize),

    #[error("polygon has {count} vertices, at most {capacity} are supported")]
    TooManyVertices { count: usize, capacity: usize },

    #[error("{count} footsteps queued, the planner holds at most {capacity}")]
    #[diagnostic(help("increase `max_number_of_footsteps` in the planner config"))]
    TooManyFootsteps { count: usize, capacity: usize },

    #[error("steppable region plane normal {0:?} is not pointing up")]
    InvalidPlane([f64; 3]),
}
