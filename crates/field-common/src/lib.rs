//! Common types shared by the fieldset engine.
//!
//! Everything in here is a leaf: no I/O, no interior state. The core crate
//! builds grids, buffers and fields on top of these primitives.

pub mod extent;
pub mod mesh;
pub mod time;
pub mod units;

pub use extent::Extent;
pub use mesh::{Mesh, DEG2M};
pub use time::{Calendar, CalendarDate, TimeConverter, TimeError};
pub use units::UnitConverter;
