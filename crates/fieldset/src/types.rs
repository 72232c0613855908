//! Core enums shared across the crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{FieldError, Result};

/// Spatial interpolation scheme of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterpMethod {
    /// Trilinear with NaN-masked renormalisation.
    #[default]
    Linear,
    /// Value of the closest node.
    Nearest,
    /// Linear in water, inverse-distance next to land (zero-valued nodes).
    LinearInvdistLandTracer,
    /// Staggered C-grid velocity (NEMO f-point indexing).
    CgridVelocity,
    /// Staggered C-grid tracer, taken at the cell's T-point.
    CgridTracer,
}

impl InterpMethod {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "nearest" => Ok(Self::Nearest),
            "linear_invdist_land_tracer" => Ok(Self::LinearInvdistLandTracer),
            "cgrid_velocity" => Ok(Self::CgridVelocity),
            "cgrid_tracer" => Ok(Self::CgridTracer),
            other => Err(FieldError::configuration(format!(
                "unknown interpolation method '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Nearest => "nearest",
            Self::LinearInvdistLandTracer => "linear_invdist_land_tracer",
            Self::CgridVelocity => "cgrid_velocity",
            Self::CgridTracer => "cgrid_tracer",
        }
    }

    pub fn is_cgrid(&self) -> bool {
        matches!(self, Self::CgridVelocity | Self::CgridTracer)
    }
}

impl std::fmt::Display for InterpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Element type data is held in once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    #[default]
    Float32,
    Float64,
}

impl Dtype {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "float32" | "f32" => Ok(Self::Float32),
            "float64" | "f64" => Ok(Self::Float64),
            other => Err(FieldError::configuration(format!(
                "unsupported cast_data_dtype '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Bytes per element.
    pub fn width(&self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Round a value to this precision.
    pub fn cast(&self, v: f64) -> f64 {
        match self {
            Self::Float32 => v as f32 as f64,
            Self::Float64 => v,
        }
    }
}

/// How a field came to exist. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationLog {
    /// Built from an in-memory array.
    FromData,
    /// Read from one or more Zarr stores.
    FromZarr,
    /// Read back from a store this crate wrote.
    FromParcels,
    /// Computed from another field.
    Derived,
}

impl CreationLog {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FromData => "from_data",
            Self::FromZarr => "from_zarr",
            Self::FromParcels => "from_parcels",
            Self::Derived => "derived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "from_data" => Some(Self::FromData),
            "from_zarr" => Some(Self::FromZarr),
            "from_parcels" => Some(Self::FromParcels),
            "derived" => Some(Self::Derived),
            _ => None,
        }
    }
}

/// Topology tag of a [`Grid`](crate::grid::Grid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridKind {
    RectilinearZ,
    RectilinearS,
    CurvilinearZ,
    CurvilinearS,
}

impl GridKind {
    pub fn is_curvilinear(&self) -> bool {
        matches!(self, Self::CurvilinearZ | Self::CurvilinearS)
    }

    pub fn is_s_grid(&self) -> bool {
        matches!(self, Self::RectilinearS | Self::CurvilinearS)
    }
}

/// Logical dimensions of a field, in canonical (t, z, y, x) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dim {
    Time,
    Depth,
    Lat,
    Lon,
}

impl Dim {
    pub const ALL: [Dim; 4] = [Dim::Time, Dim::Depth, Dim::Lat, Dim::Lon];

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "time" => Some(Self::Time),
            "depth" => Some(Self::Depth),
            "lat" => Some(Self::Lat),
            "lon" => Some(Self::Lon),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Depth => "depth",
            Self::Lat => "lat",
            Self::Lon => "lon",
        }
    }

    /// Position in the canonical (t, z, y, x) layout.
    pub fn axis(&self) -> usize {
        match self {
            Self::Time => 0,
            Self::Depth => 1,
            Self::Lat => 2,
            Self::Lon => 3,
        }
    }

    /// Parse a logical dimension key, failing with a dimension-name error.
    pub fn parse_key(key: &str) -> Result<Self> {
        Self::from_str(key).ok_or_else(|| {
            FieldError::dimension(
                key,
                &Self::ALL.iter().map(|d| d.as_str().to_string()).collect::<Vec<_>>(),
            )
        })
    }
}

/// Chunking requested for a file-backed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "ChunkSizeRepr", into = "ChunkSizeRepr")]
pub enum ChunkSize {
    /// Pick a chunk shape targeting the configured chunk budget.
    #[default]
    Auto,
    /// Logical dimension to (stored dimension name, chunk length).
    Explicit(BTreeMap<Dim, (String, usize)>),
    /// One chunk per time slice.
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ChunkSizeRepr {
    Flag(bool),
    Name(String),
    Map(BTreeMap<String, (String, usize)>),
}

impl TryFrom<ChunkSizeRepr> for ChunkSize {
    type Error = String;

    fn try_from(repr: ChunkSizeRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ChunkSizeRepr::Flag(false) => Ok(Self::Disabled),
            ChunkSizeRepr::Flag(true) => Err("chunksize must be 'auto', false or a map".into()),
            ChunkSizeRepr::Name(name) if name == "auto" => Ok(Self::Auto),
            ChunkSizeRepr::Name(name) => Err(format!("unknown chunksize '{name}'")),
            ChunkSizeRepr::Map(map) => {
                let mut out = BTreeMap::new();
                for (key, value) in map {
                    let dim = Dim::from_str(&key)
                        .ok_or_else(|| format!("unknown chunksize dimension '{key}'"))?;
                    out.insert(dim, value);
                }
                Ok(Self::Explicit(out))
            }
        }
    }
}

impl From<ChunkSize> for ChunkSizeRepr {
    fn from(chunks: ChunkSize) -> Self {
        match chunks {
            ChunkSize::Auto => Self::Name("auto".into()),
            ChunkSize::Disabled => Self::Flag(false),
            ChunkSize::Explicit(map) => Self::Map(
                map.into_iter()
                    .map(|(dim, v)| (dim.as_str().to_string(), v))
                    .collect(),
            ),
        }
    }
}
