//! Gridded field sampling with a chunked time window.
//!
//! This crate holds ocean or atmosphere model output on rectilinear or
//! curvilinear grids with fixed (Z) or terrain-following (S) depth, and
//! answers point queries at arbitrary (time, depth, lat, lon) for a
//! particle advection loop. It provides:
//!
//! - **Index search**: cell location on every grid topology, with periodic
//!   halos and a seeded search for curvilinear grids
//! - **Interpolation**: linear, nearest, land-aware inverse distance and
//!   staggered C-grid schemes
//! - **Deferred loading**: file-backed data is read chunk by chunk, and only
//!   a sliding window of time slices stays in memory
//!
//! # Architecture
//!
//! ```text
//! advection step
//!      │
//!      ├─► FieldSet::compute_time_chunk(t, dt_sign)
//!      │         │
//!      │         └─► per distinct Grid: window = bracket(t) + prefetch
//!      │                   │
//!      │                   └─► ChunkedBuffer::set_window (evict, keep)
//!      │
//!      └─► Field::sample / VectorField::sample
//!                │
//!                ├─► Grid::locate (time bracket + cell search)
//!                │
//!                ├─► interpolation kernel
//!                │         │
//!                │         └─► ChunkedBuffer::value (lazy chunk load)
//!                │
//!                └─► scaling factor + unit conversion
//! ```
//!
//! # Example
//!
//! ```ignore
//! use fieldset::{Dimensions, FieldDimensions, FieldOptions, FieldSet, NdArray};
//!
//! let dims = Dimensions::new(vec![0.0, 1.0], vec![0.0, 1.0]);
//! let mut set = FieldSet::from_data(data, FieldDimensions::Shared(dims), &FieldOptions::default())?;
//! set.check_complete()?;
//!
//! let next = set.compute_time_chunk(0.0, 1.0)?;
//! let (u, v, _) = set.get_vector_field("UV").unwrap().sample(0.0, 0.0, 0.5, 0.5)?;
//! ```

pub mod array;
pub mod buffer;
pub mod config;
pub mod error;
pub mod field;
pub mod fieldset;
pub mod grid;
pub mod interpolation;
pub mod io;
pub mod types;
pub mod vector_field;

// Re-export commonly used types at crate root
pub use array::NdArray;
pub use buffer::{ArenaStats, ChunkSource, ChunkedBuffer, DimensionNameMap, ValueTransform};
pub use config::{EngineConfig, FieldOptions, PerField};
pub use error::{ErrorKind, FieldError, Result};
pub use field::{Dimensions, Field, FieldData};
pub use fieldset::{DeferHook, Entry, FieldDimensions, FieldSet, GridsetEntry};
pub use grid::{Depth, Grid, GridState, Location, LocateOptions, SearchSeed, TimeBracket};
pub use interpolation::StaggerRole;
pub use io::{store_path, ZarrDimensions};
pub use types::{ChunkSize, CreationLog, Dim, Dtype, GridKind, InterpMethod};
pub use vector_field::{Velocity, VectorField};

pub use field_common::{Calendar, Mesh, TimeConverter, UnitConverter};
