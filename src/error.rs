use thiserror::Error;

/// Boxed error returned by caller-supplied analysis functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while building or solving optimization problems.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("design variable `{name}` has invalid bounds: lower {lower} must be below upper {upper}")]
    InvalidBounds { name: String, lower: f64, upper: f64 },

    #[error("constraint type must be 'inequality' or 'equality', got `{0}`")]
    InvalidConstraintType(String),

    #[error("inequality constraint `{0}` must have at least one bound")]
    UnboundedInequality(String),

    #[error("{algorithm} requires at least two objectives, found {found}")]
    NotMultiObjective { algorithm: &'static str, found: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("missing value for `{0}`")]
    MissingValue(String),

    #[error("model must be trained first")]
    NotTrained,

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("analysis function failed: {0}")]
    Analysis(#[source] BoxError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Error::Numerical(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
