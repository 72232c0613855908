//! Error types for field construction, sampling and persistence.

use field_common::TimeError;
use thiserror::Error;

/// Broad category of a [`FieldError`].
///
/// Callers use this to decide between dropping a particle
/// (`OutOfBounds`, `TimeExtrapolation`) and aborting a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    OutOfBounds,
    TimeExtrapolation,
    UnsupportedTopology,
    ResourceExhaustion,
    Io,
}

/// Errors raised by the fieldset engine.
#[derive(Error, Debug)]
pub enum FieldError {
    /// Invalid or inconsistent construction arguments.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A keyword outside the recognised option set.
    #[error("unknown keyword: {0}")]
    UnknownKeyword(String),

    /// A logical dimension could not be matched to a stored one.
    #[error("dimension '{dimension}' not found (available: {available:?})")]
    DimensionName {
        dimension: String,
        available: Vec<String>,
    },

    #[error("a field named '{0}' already exists")]
    DuplicateField(String),

    /// Structural change after the set was completed.
    #[error("field set already completed, cannot add '{0}'")]
    FieldSetComplete(String),

    /// VectorField components mix C-grid and non-C-grid interpolation.
    #[error("vector field '{name}' mixes interpolation methods: {methods:?}")]
    MixedInterpolation { name: String, methods: Vec<String> },

    #[error("sample out of bounds at depth={depth}, lat={lat}, lon={lon}")]
    OutOfBounds { depth: f64, lat: f64, lon: f64 },

    /// The search converged to weights outside the cell.
    #[error("sampling error at depth={depth}, lat={lat}, lon={lon}")]
    Sampling { depth: f64, lat: f64, lon: f64 },

    #[error("time {time} outside available range [{min}, {max}]")]
    TimeExtrapolation { time: f64, min: f64, max: f64 },

    /// The time slice is not inside the buffer's resident window.
    #[error("time index {time_index} not resident (window {window:?})")]
    NotResident {
        time_index: usize,
        window: Vec<usize>,
    },

    #[error("unsupported topology: {0}")]
    UnsupportedTopology(String),

    #[error("chunk memory exhausted: need {requested_bytes} bytes, budget is {budget_bytes}")]
    ResourceExhaustion {
        requested_bytes: usize,
        budget_bytes: usize,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("Zarr format error: {0}")]
    Zarr(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("time error: {0}")]
    Time(#[from] TimeError),

    /// A shared lock was poisoned by a panic elsewhere.
    #[error("lock poisoned: {0}")]
    Lock(String),
}

impl FieldError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedTopology(msg.into())
    }

    pub fn out_of_bounds(depth: f64, lat: f64, lon: f64) -> Self {
        Self::OutOfBounds { depth, lat, lon }
    }

    pub fn sampling(depth: f64, lat: f64, lon: f64) -> Self {
        Self::Sampling { depth, lat, lon }
    }

    pub fn dimension(dimension: impl Into<String>, available: &[String]) -> Self {
        Self::DimensionName {
            dimension: dimension.into(),
            available: available.to_vec(),
        }
    }

    pub fn zarr(msg: impl std::fmt::Display) -> Self {
        Self::Zarr(msg.to_string())
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::Storage(msg.to_string())
    }

    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    pub fn lock(what: &str) -> Self {
        Self::Lock(what.to_string())
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_)
            | Self::UnknownKeyword(_)
            | Self::DimensionName { .. }
            | Self::DuplicateField(_)
            | Self::FieldSetComplete(_)
            | Self::MixedInterpolation { .. }
            | Self::Time(_) => ErrorKind::Configuration,
            Self::OutOfBounds { .. } | Self::Sampling { .. } => ErrorKind::OutOfBounds,
            Self::TimeExtrapolation { .. } | Self::NotResident { .. } => {
                ErrorKind::TimeExtrapolation
            }
            Self::UnsupportedTopology(_) => ErrorKind::UnsupportedTopology,
            Self::ResourceExhaustion { .. } => ErrorKind::ResourceExhaustion,
            Self::Storage(_) | Self::Zarr(_) | Self::InvalidMetadata(_) | Self::Lock(_) => {
                ErrorKind::Io
            }
        }
    }
}

impl From<std::io::Error> for FieldError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for FieldError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for fieldset operations.
pub type Result<T> = std::result::Result<T, FieldError>;
