//! Fields: one named quantity on one grid.
//!
//! A [`Field`] is a cheap handle (`Arc` + lock) so the same field can be
//! registered under several names and referenced from vector fields. All
//! sampling goes through a read lock; only window advances, halo changes
//! and explicit data edits take the write lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use field_common::{Calendar, TimeConverter, UnitConverter};
use tracing::{debug, warn};

use crate::array::NdArray;
use crate::buffer::{window_for, ChunkedBuffer, ValueTransform};
use crate::config::FieldOptions;
use crate::error::{FieldError, Result};
use crate::grid::{Grid, Location, LocateOptions, SearchSeed, TimeBracket};
use crate::interpolation::{self, StaggerRole};
use crate::types::{CreationLog, Dim, Dtype, InterpMethod};

// ============================================================================
// Coordinates
// ============================================================================

/// Coordinate arrays for building a grid from in-memory data.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimensions {
    pub lon: NdArray,
    pub lat: NdArray,
    /// 1-D for Z-grids, 3-D or 4-D for S-grids.
    pub depth: Option<NdArray>,
    /// Seconds relative to the field's time origin.
    pub time: Option<Vec<f64>>,
}

impl Dimensions {
    /// Rectilinear coordinates.
    pub fn new(lon: Vec<f64>, lat: Vec<f64>) -> Self {
        Self {
            lon: NdArray::from_vec(lon),
            lat: NdArray::from_vec(lat),
            depth: None,
            time: None,
        }
    }

    /// Curvilinear coordinates of shape (ny, nx).
    pub fn curvilinear(lon: NdArray, lat: NdArray) -> Self {
        Self {
            lon,
            lat,
            depth: None,
            time: None,
        }
    }

    pub fn with_depth(mut self, depth: NdArray) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_time(mut self, time: Vec<f64>) -> Self {
        self.time = Some(time);
        self
    }

    /// Build from a map keyed by logical dimension name.
    pub fn from_map(map: BTreeMap<String, NdArray>) -> Result<Self> {
        let available: Vec<String> = map.keys().cloned().collect();
        let mut lon = None;
        let mut lat = None;
        let mut depth = None;
        let mut time = None;
        for (key, values) in map {
            match Dim::parse_key(&key)? {
                Dim::Lon => lon = Some(values),
                Dim::Lat => lat = Some(values),
                Dim::Depth => depth = Some(values),
                Dim::Time => time = Some(values.into_vec()),
            }
        }
        Ok(Self {
            lon: lon.ok_or_else(|| FieldError::dimension("lon", &available))?,
            lat: lat.ok_or_else(|| FieldError::dimension("lat", &available))?,
            depth,
            time,
        })
    }
}

// ============================================================================
// Data storage
// ============================================================================

/// Field values in canonical (t, z, y, x) order.
#[derive(Debug)]
pub enum FieldData {
    /// Fully resident.
    Memory(NdArray),
    /// File-backed with a resident time window.
    Chunked(ChunkedBuffer),
}

impl FieldData {
    pub fn shape(&self) -> [usize; 4] {
        match self {
            Self::Memory(a) => {
                let s = a.shape();
                [s[0], s[1], s[2], s[3]]
            }
            Self::Chunked(b) => b.shape(),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Chunked(_))
    }

    pub(crate) fn value(&self, t: usize, z: usize, y: usize, x: usize) -> Result<f64> {
        match self {
            Self::Memory(a) => {
                let [nt, nz, ny, nx] = self.shape();
                if t >= nt || z >= nz || y >= ny || x >= nx {
                    return Err(FieldError::configuration(format!(
                        "index ({t}, {z}, {y}, {x}) outside data shape {:?}",
                        a.shape()
                    )));
                }
                Ok(a.get(&[t, z, y, x]))
            }
            Self::Chunked(b) => b.value(t, z, y, x),
        }
    }

    /// One full time slice, shape (1, nz, ny, nx).
    pub(crate) fn slice(&self, t: usize) -> Result<NdArray> {
        match self {
            Self::Memory(a) => Ok(a.slice_axis(0, t, 1)),
            Self::Chunked(b) => b.read_slice(t),
        }
    }

    /// All time slices as one dense array.
    pub(crate) fn to_array(&self) -> Result<NdArray> {
        match self {
            Self::Memory(a) => Ok(a.clone()),
            Self::Chunked(b) => {
                let slices = (0..b.shape()[0])
                    .map(|t| b.read_slice(t))
                    .collect::<Result<Vec<_>>>()?;
                let refs: Vec<&NdArray> = slices.iter().collect();
                NdArray::concatenate(&refs, 0)
            }
        }
    }
}

// ============================================================================
// Field
// ============================================================================

#[derive(Debug)]
pub(crate) struct FieldCore {
    pub(crate) grid: Arc<Grid>,
    pub(crate) data: FieldData,
    pub(crate) interp_method: InterpMethod,
    pub(crate) units: UnitConverter,
    pub(crate) scaling_factor: Option<f64>,
    pub(crate) allow_time_extrapolation: bool,
    pub(crate) time_periodic: Option<f64>,
    pub(crate) to_write: bool,
    pub(crate) creation_log: CreationLog,
    pub(crate) written_from: Option<CreationLog>,
    pub(crate) dtype: Dtype,
    pub(crate) role: Option<StaggerRole>,
    touched: Vec<AtomicBool>,
}

impl FieldCore {
    pub(crate) fn locate(
        &self,
        time: f64,
        depth: f64,
        lat: f64,
        lon: f64,
        seed: Option<SearchSeed>,
    ) -> Result<Location> {
        let options = LocateOptions {
            allow_time_extrapolation: self.allow_time_extrapolation,
            time_periodic: self.time_periodic,
            search_2d: false,
            seed,
        };
        self.grid.locate(time, depth, lat, lon, &options)
    }

    pub(crate) fn value_at(&self, t: usize, z: usize, y: usize, x: usize) -> Result<f64> {
        self.data.value(t, z, y, x)
    }

    pub(crate) fn mark_touched(&self, bracket: &TimeBracket) {
        for (ti, _) in bracket.slices() {
            if let Some(flag) = self.touched.get(ti) {
                flag.store(true, Ordering::Relaxed);
            }
        }
    }

    fn clear_touched(&self) {
        for flag in &self.touched {
            flag.store(false, Ordering::Relaxed);
        }
    }

    /// Raw interpolated value before scaling and unit conversion.
    fn interpolate(&self, loc: &Location) -> Result<f64> {
        let value = |t, z, y, x| self.value_at(t, z, y, x);
        interpolation::interpolate(
            self.interp_method,
            self.role,
            loc,
            self.data.shape(),
            &value,
        )
    }

    fn time_bracket(&self, time: f64) -> Result<TimeBracket> {
        self.grid
            .time_bracket(time, self.allow_time_extrapolation, self.time_periodic)
    }
}

/// A named scalar quantity on a grid.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    core: Arc<RwLock<FieldCore>>,
}

impl Field {
    /// Build a field from an in-memory array.
    ///
    /// `data` is (t, z, y, x) or a trailing subset of it: (y, x),
    /// (z, y, x) on grids with depth, (t, y, x) otherwise. With
    /// `options.transpose` the axis order is reversed.
    pub fn from_data(
        name: impl Into<String>,
        data: NdArray,
        dims: Dimensions,
        options: &FieldOptions,
    ) -> Result<Field> {
        let name = name.into();
        options.validate()?;
        let mut dims = dims;
        let tdim = dims.time.as_ref().map_or(1, Vec::len);
        let zdim = match &dims.depth {
            None => 1,
            Some(d) if d.ndim() == 1 => d.len(),
            Some(d) => d.shape()[d.ndim() - 3],
        };
        let mut data = canonical_data(data, options.transpose, tdim, zdim)?;

        if let Some(ranges) = options.index_ranges()? {
            for (dim, range) in &ranges {
                let axis = dim.axis();
                if axis == 0 {
                    return Err(FieldError::configuration(
                        "indices cannot subset the time dimension",
                    ));
                }
                if range.end > data.shape()[axis] {
                    return Err(FieldError::configuration(format!(
                        "indices {:?} for '{}' exceed length {}",
                        range,
                        dim.as_str(),
                        data.shape()[axis]
                    )));
                }
                data = data.slice_axis(axis, range.start, range.len());
                dims = subset_dimensions(dims, *dim, range.start, range.len());
            }
        }

        let origin = time_origin(options)?;
        Self::from_memory(name, data, dims, origin, options, CreationLog::FromData)
    }

    /// Flip descending latitudes, build the grid and apply the value
    /// transform to canonical (t, z, y, x) data.
    pub(crate) fn from_memory(
        name: String,
        mut data: NdArray,
        mut dims: Dimensions,
        time_origin: TimeConverter,
        options: &FieldOptions,
        creation_log: CreationLog,
    ) -> Result<Field> {
        if dims.lat.ndim() == 1 && dims.lat.len() > 1 {
            let lat = dims.lat.data();
            if lat[0] > lat[lat.len() - 1] {
                warn!(field = %name, "latitude is descending, flipping coordinates and data");
                dims.lat = dims.lat.flipped(0);
                data = data.flipped(2);
                dims.depth = dims.depth.map(|d| {
                    if d.ndim() >= 3 {
                        d.flipped(d.ndim() - 2)
                    } else {
                        d
                    }
                });
            }
        }

        let grid = Grid::new(
            dims.lon,
            dims.lat,
            dims.depth,
            dims.time,
            time_origin,
            options.mesh(),
        )?;

        let transform = ValueTransform {
            vmin: options.vmin,
            vmax: options.vmax,
            dtype: options.dtype(),
        };
        let values: Vec<f64> = data.data().iter().map(|&v| transform.apply(v)).collect();
        let data = NdArray::new(data.shape().to_vec(), values)?;

        Self::from_parts(
            name,
            Arc::new(grid),
            FieldData::Memory(data),
            options,
            creation_log,
        )
    }

    /// Assemble a field from a grid and data that are already canonical.
    pub(crate) fn from_parts(
        name: String,
        grid: Arc<Grid>,
        data: FieldData,
        options: &FieldOptions,
        creation_log: CreationLog,
    ) -> Result<Field> {
        let [nt, nz, _, _] = data.shape();
        if nt != grid.tdim() || nz != grid.zdim() {
            return Err(FieldError::configuration(format!(
                "field '{}' has data shape {:?} but its grid has {} time and {} depth levels",
                name,
                data.shape(),
                grid.tdim(),
                grid.zdim()
            )));
        }

        let fieldtype = options.fieldtype_for(&name).unwrap_or(&name).to_string();
        let units = UnitConverter::for_field(&fieldtype, grid.mesh());
        let role = StaggerRole::for_name(&fieldtype);
        let interp_method = options.interp_for(&name);
        let allow_time_extrapolation = options
            .allow_time_extrapolation
            .unwrap_or(grid.tdim() == 1);

        debug!(
            field = %name,
            ?interp_method,
            units = units.as_str(),
            deferred = data.is_deferred(),
            shape = ?data.shape(),
            "created field"
        );

        let core = FieldCore {
            touched: (0..nt).map(|_| AtomicBool::new(false)).collect(),
            grid,
            data,
            interp_method,
            units,
            scaling_factor: None,
            allow_time_extrapolation,
            time_periodic: options.time_periodic,
            to_write: options.to_write.unwrap_or(false),
            creation_log,
            written_from: None,
            dtype: options.dtype(),
            role,
        };
        Ok(Field {
            name,
            core: Arc::new(RwLock::new(core)),
        })
    }

    pub(crate) fn core(&self) -> Result<RwLockReadGuard<'_, FieldCore>> {
        self.core.read().map_err(|_| FieldError::lock(&self.name))
    }

    pub(crate) fn core_mut(&self) -> Result<RwLockWriteGuard<'_, FieldCore>> {
        self.core.write().map_err(|_| FieldError::lock(&self.name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle under another name sharing this field's data and grid.
    pub fn renamed(&self, name: impl Into<String>) -> Field {
        Field {
            name: name.into(),
            core: Arc::clone(&self.core),
        }
    }

    /// True if both handles refer to the same underlying field.
    pub fn same_field(&self, other: &Field) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    pub fn grid(&self) -> Result<Arc<Grid>> {
        Ok(Arc::clone(&self.core()?.grid))
    }

    pub fn interp_method(&self) -> Result<InterpMethod> {
        Ok(self.core()?.interp_method)
    }

    pub fn units(&self) -> Result<UnitConverter> {
        Ok(self.core()?.units)
    }

    pub fn creation_log(&self) -> Result<CreationLog> {
        Ok(self.core()?.creation_log)
    }

    /// Provenance recorded by the writer of a reloaded field.
    pub fn written_from(&self) -> Result<Option<CreationLog>> {
        Ok(self.core()?.written_from)
    }

    pub fn dtype(&self) -> Result<Dtype> {
        Ok(self.core()?.dtype)
    }

    pub fn scaling_factor(&self) -> Result<Option<f64>> {
        Ok(self.core()?.scaling_factor)
    }

    /// Multiply every sample by `factor`. Can be set only once.
    pub fn set_scaling_factor(&self, factor: f64) -> Result<()> {
        let mut core = self.core_mut()?;
        if let Some(existing) = core.scaling_factor {
            return Err(FieldError::configuration(format!(
                "scaling factor of '{}' already set to {existing}",
                self.name
            )));
        }
        core.scaling_factor = Some(factor);
        Ok(())
    }

    pub fn stagger_role(&self) -> Result<Option<StaggerRole>> {
        Ok(self.core()?.role)
    }

    pub fn set_stagger_role(&self, role: Option<StaggerRole>) -> Result<()> {
        self.core_mut()?.role = role;
        Ok(())
    }

    pub fn to_write(&self) -> Result<bool> {
        Ok(self.core()?.to_write)
    }

    pub fn set_to_write(&self, to_write: bool) -> Result<()> {
        self.core_mut()?.to_write = to_write;
        Ok(())
    }

    pub fn allow_time_extrapolation(&self) -> Result<bool> {
        Ok(self.core()?.allow_time_extrapolation)
    }

    pub fn time_periodic(&self) -> Result<Option<f64>> {
        Ok(self.core()?.time_periodic)
    }

    pub fn is_deferred(&self) -> Result<bool> {
        Ok(self.core()?.data.is_deferred())
    }

    /// Canonical (t, z, y, x) data shape.
    pub fn shape(&self) -> Result<[usize; 4]> {
        Ok(self.core()?.data.shape())
    }

    /// Bytes of field data currently in memory.
    pub fn resident_bytes(&self) -> Result<usize> {
        let core = self.core()?;
        Ok(match &core.data {
            FieldData::Memory(a) => a.len() * core.dtype.width(),
            FieldData::Chunked(b) => b.resident_bytes(),
        })
    }

    /// Chunked buffer diagnostics, for deferred fields.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&ChunkedBuffer) -> R) -> Result<Option<R>> {
        let core = self.core()?;
        Ok(match &core.data {
            FieldData::Chunked(b) => Some(f(b)),
            FieldData::Memory(_) => None,
        })
    }

    /// Edit in-memory data in place.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut NdArray) -> R) -> Result<R> {
        let mut core = self.core_mut()?;
        match &mut core.data {
            FieldData::Memory(a) => Ok(f(a)),
            FieldData::Chunked(_) => Err(FieldError::configuration(format!(
                "field '{}' is file-backed and cannot be edited in place",
                self.name
            ))),
        }
    }

    /// Full data as a dense (t, z, y, x) array.
    pub fn data(&self) -> Result<NdArray> {
        self.core()?.data.to_array()
    }

    /// One time slice, shape (1, nz, ny, nx), read directly from storage.
    pub fn time_slice(&self, t: usize) -> Result<NdArray> {
        self.core()?.data.slice(t)
    }

    /// A new in-memory field whose values are `f` applied to this one.
    pub fn derive(&self, name: impl Into<String>, f: impl Fn(f64) -> f64) -> Result<Field> {
        let core = self.core()?;
        let data = core.data.to_array()?;
        let values: Vec<f64> = data.data().iter().map(|&v| f(v)).collect();
        let data = NdArray::new(data.shape().to_vec(), values)?;
        let options = FieldOptions {
            interp_method: Some(crate::config::PerField::All(core.interp_method)),
            allow_time_extrapolation: Some(core.allow_time_extrapolation),
            time_periodic: core.time_periodic,
            cast_data_dtype: Some(core.dtype),
            ..Default::default()
        };
        Self::from_parts(
            name.into(),
            Arc::clone(&core.grid),
            FieldData::Memory(data),
            &options,
            CreationLog::Derived,
        )
    }

    // ------------------------------------------------------------------------
    // Sampling
    // ------------------------------------------------------------------------

    /// Resolve a point to indices and weights on this field's grid.
    pub fn locate(
        &self,
        time: f64,
        depth: f64,
        lat: f64,
        lon: f64,
        seed: Option<SearchSeed>,
    ) -> Result<Location> {
        self.core()?.locate(time, depth, lat, lon, seed)
    }

    /// Interpolated value at (time, depth, lat, lon).
    pub fn sample(&self, time: f64, depth: f64, lat: f64, lon: f64) -> Result<f64> {
        self.sample_with_seed(time, depth, lat, lon, None)
            .map(|(value, _)| value)
    }

    /// Like [`sample`](Self::sample), starting a curvilinear search from
    /// `seed` and returning the seed for the next call.
    pub fn sample_with_seed(
        &self,
        time: f64,
        depth: f64,
        lat: f64,
        lon: f64,
        seed: Option<SearchSeed>,
    ) -> Result<(f64, SearchSeed)> {
        let core = self.core()?;
        let loc = core.locate(time, depth, lat, lon, seed)?;
        let raw = core.interpolate(&loc)?;
        core.mark_touched(&loc.time);
        let scaled = raw * core.scaling_factor.unwrap_or(1.0);
        Ok((core.units.to_target(scaled, lat), loc.seed()))
    }

    /// Time indices sampled since the last window advance.
    pub fn touched_time_indices(&self) -> Result<Vec<usize>> {
        let core = self.core()?;
        Ok(core
            .touched
            .iter()
            .enumerate()
            .filter(|(_, f)| f.load(Ordering::Relaxed))
            .map(|(i, _)| i)
            .collect())
    }

    // ------------------------------------------------------------------------
    // Time window
    // ------------------------------------------------------------------------

    /// Make sure the resident window covers `time` for integration in
    /// direction `dt_sign`.
    ///
    /// Returns the time at which the next advance is needed, or an
    /// infinity in the direction of integration when all data is resident.
    pub fn time_chunk_advance(&self, time: f64, dt_sign: f64) -> Result<f64> {
        let mut core = self.core_mut()?;
        let bracket = core.time_bracket(time)?;
        let grid = Arc::clone(&core.grid);
        let periodic = core.time_periodic;
        let next = match &mut core.data {
            FieldData::Chunked(buffer) => {
                let window = window_for(&bracket, grid.tdim(), dt_sign, periodic.is_some());
                buffer.set_window(window)?;
                next_advance_time(&grid, &bracket, time, dt_sign, periodic)
            }
            FieldData::Memory(_) => infinity(dt_sign),
        };
        core.clear_touched();
        Ok(next)
    }

    /// Bracket `time` with this field's extrapolation and periodicity.
    pub(crate) fn time_bracket(&self, time: f64) -> Result<TimeBracket> {
        self.core()?.time_bracket(time)
    }

    /// Install a precomputed window. Memory fields ignore it.
    ///
    /// Returns whether any time slice entered the window.
    pub(crate) fn apply_window(&self, window: &[usize]) -> Result<bool> {
        let mut core = self.core_mut()?;
        let loaded = match &mut core.data {
            FieldData::Chunked(buffer) => {
                buffer.set_window(window.to_vec())?;
                !buffer.loaded_time_indices().is_empty()
            }
            FieldData::Memory(_) => false,
        };
        core.clear_touched();
        Ok(loaded)
    }

    /// Time indices brought into the window by the last advance. Always
    /// empty for in-memory fields.
    pub fn loaded_time_indices(&self) -> Result<Vec<usize>> {
        let core = self.core()?;
        Ok(match &core.data {
            FieldData::Chunked(b) => b.loaded_time_indices().to_vec(),
            FieldData::Memory(_) => Vec::new(),
        })
    }

    /// Rewrite time slice `t`, passed to `f` with shape (1, nz, ny, nx).
    ///
    /// File-backed fields only accept slices inside the resident window,
    /// and the edit is lost once the slice leaves it.
    pub fn update_time_slice(
        &self,
        t: usize,
        f: impl FnOnce(&mut NdArray) -> Result<()>,
    ) -> Result<()> {
        let mut core = self.core_mut()?;
        match &mut core.data {
            FieldData::Chunked(buffer) => buffer.update_slice(t, f),
            FieldData::Memory(a) => {
                let [nt, nz, ny, nx] = [a.shape()[0], a.shape()[1], a.shape()[2], a.shape()[3]];
                if t >= nt {
                    return Err(FieldError::configuration(format!(
                        "time index {t} outside {nt} time levels of '{}'",
                        self.name
                    )));
                }
                let mut slice = a.slice_axis(0, t, 1);
                f(&mut slice)?;
                if slice.shape() != [1, nz, ny, nx] {
                    return Err(FieldError::configuration(format!(
                        "edited slice of '{}' has shape {:?}, expected {:?}",
                        self.name,
                        slice.shape(),
                        [1, nz, ny, nx]
                    )));
                }
                let offset = t * nz * ny * nx;
                a.data_mut()[offset..offset + slice.len()].copy_from_slice(slice.data());
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Grid changes
    // ------------------------------------------------------------------------

    /// Add a periodic halo to this field and its grid.
    pub fn add_periodic_halo(&self, zonal: bool, meridional: bool, halosize: usize) -> Result<()> {
        let grid = self.grid()?.with_periodic_halo(zonal, meridional, halosize)?;
        self.install_halo(Arc::new(grid), zonal, meridional, halosize)
    }

    /// Swap in a grid that already carries the halo and extend the data.
    pub(crate) fn install_halo(
        &self,
        grid: Arc<Grid>,
        zonal: bool,
        meridional: bool,
        halosize: usize,
    ) -> Result<()> {
        let mut core = self.core_mut()?;
        match &mut core.data {
            FieldData::Memory(a) => {
                let mut extended = a.clone();
                if zonal {
                    extended = periodic_extend(&extended, 3, halosize)?;
                }
                if meridional {
                    extended = periodic_extend(&extended, 2, halosize)?;
                }
                *a = extended;
            }
            FieldData::Chunked(b) => b.add_halo(zonal, meridional, halosize)?,
        }
        debug!(field = %self.name, zonal, meridional, halosize, "installed periodic halo");
        core.grid = grid;
        Ok(())
    }

    /// Replace the grid with an equivalent one (deduplication, rebasing).
    pub(crate) fn set_grid(&self, grid: Arc<Grid>) -> Result<()> {
        let mut core = self.core_mut()?;
        if grid.shape() != core.grid.shape() {
            return Err(FieldError::configuration(format!(
                "cannot replace grid of '{}': shape {:?} differs from {:?}",
                self.name,
                grid.shape(),
                core.grid.shape()
            )));
        }
        core.grid = grid;
        Ok(())
    }

    /// Check the horizontal data extent against the grid.
    pub(crate) fn validate_shape(&self) -> Result<()> {
        let core = self.core()?;
        let data = core.data.shape();
        let grid = core.grid.shape();
        if data != grid {
            return Err(FieldError::configuration(format!(
                "field '{}' data shape {:?} does not match grid shape {:?}",
                self.name, data, grid
            )));
        }
        Ok(())
    }

    pub(crate) fn set_written_from(&self, log: Option<CreationLog>) -> Result<()> {
        self.core_mut()?.written_from = log;
        Ok(())
    }

    pub(crate) fn set_scaling_factor_raw(&self, factor: Option<f64>) -> Result<()> {
        self.core_mut()?.scaling_factor = factor;
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn infinity(dt_sign: f64) -> f64 {
    if dt_sign >= 0.0 {
        f64::INFINITY
    } else {
        f64::NEG_INFINITY
    }
}

/// Time at which a window built for `bracket` stops covering the
/// integration, expressed on the caller's (unwrapped) time axis.
pub(crate) fn next_advance_time(
    grid: &Grid,
    bracket: &TimeBracket,
    time: f64,
    dt_sign: f64,
    periodic: Option<f64>,
) -> f64 {
    if bracket.ti == bracket.ti_next {
        return infinity(dt_sign);
    }
    let times = grid.time();
    let boundary = if dt_sign >= 0.0 {
        if bracket.ti_next < bracket.ti {
            times[0] + periodic.unwrap_or(0.0)
        } else {
            times[bracket.ti_next]
        }
    } else {
        times[bracket.ti]
    };
    time + (boundary - bracket.time)
}

pub(crate) fn time_origin(options: &FieldOptions) -> Result<TimeConverter> {
    match &options.time_origin {
        None => Ok(TimeConverter::numeric()),
        Some(origin) => {
            let calendar = match &options.calendar {
                Some(c) => Calendar::from_str(c)?,
                None => Calendar::Standard,
            };
            Ok(TimeConverter::from_iso8601(origin, calendar)?)
        }
    }
}

/// Bring user data into (t, z, y, x) order.
fn canonical_data(data: NdArray, transpose: bool, tdim: usize, zdim: usize) -> Result<NdArray> {
    let data = if transpose { data.transposed() } else { data };
    let s = data.shape().to_vec();
    let shape = match s.len() {
        2 => vec![1, 1, s[0], s[1]],
        3 if zdim > 1 => vec![1, s[0], s[1], s[2]],
        3 if tdim > 1 || s[0] == tdim => vec![s[0], 1, s[1], s[2]],
        4 => s.clone(),
        _ => {
            return Err(FieldError::configuration(format!(
                "cannot interpret data of shape {s:?} with {tdim} time and {zdim} depth levels"
            )))
        }
    };
    data.reshape(shape)
}

pub(crate) fn subset_dimensions(mut dims: Dimensions, dim: Dim, start: usize, len: usize) -> Dimensions {
    let curvilinear = dims.lon.ndim() == 2;
    match (dim, curvilinear) {
        (Dim::Lon, false) => dims.lon = dims.lon.slice_axis(0, start, len),
        (Dim::Lat, false) => dims.lat = dims.lat.slice_axis(0, start, len),
        (Dim::Lon, true) => {
            dims.lon = dims.lon.slice_axis(1, start, len);
            dims.lat = dims.lat.slice_axis(1, start, len);
        }
        (Dim::Lat, true) => {
            dims.lon = dims.lon.slice_axis(0, start, len);
            dims.lat = dims.lat.slice_axis(0, start, len);
        }
        (Dim::Depth | Dim::Time, _) => {}
    }
    dims.depth = dims.depth.map(|d| match (dim, d.ndim()) {
        (Dim::Depth, 1) => d.slice_axis(0, start, len),
        (Dim::Depth, n) if n >= 3 => d.slice_axis(n - 3, start, len),
        (Dim::Lat, n) if n >= 3 => d.slice_axis(n - 2, start, len),
        (Dim::Lon, n) if n >= 3 => d.slice_axis(n - 1, start, len),
        _ => d,
    });
    dims
}

/// Wrap `halosize` entries from each end of `axis` onto the other end.
fn periodic_extend(data: &NdArray, axis: usize, halosize: usize) -> Result<NdArray> {
    let n = data.shape()[axis];
    if n < halosize {
        return Err(FieldError::unsupported(format!(
            "axis of length {n} is smaller than the halo ({halosize})"
        )));
    }
    let head = data.slice_axis(axis, n - halosize, halosize);
    let tail = data.slice_axis(axis, 0, halosize);
    NdArray::concatenate(&[&head, data, &tail], axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use field_common::Mesh;

    fn flat() -> FieldOptions {
        FieldOptions {
            mesh: Some(Mesh::Flat),
            ..Default::default()
        }
    }

    fn ramp_field(options: &FieldOptions) -> Field {
        let data = NdArray::from_fn(vec![3, 4], |i| (i[0] * 10 + i[1]) as f64);
        let dims = Dimensions::new(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0, 2.0]);
        Field::from_data("T", data, dims, options).unwrap()
    }

    #[test]
    fn test_sample_reproduces_nodes() {
        let field = ramp_field(&flat());
        for y in 0..3 {
            for x in 0..4 {
                let v = field.sample(0.0, 0.0, y as f64, x as f64).unwrap();
                assert_eq!(v, (y * 10 + x) as f64);
            }
        }
        assert_eq!(field.creation_log().unwrap(), CreationLog::FromData);
    }

    #[test]
    fn test_descending_latitude_flipped() {
        let data = NdArray::new(vec![2, 2], vec![10.0, 10.0, 20.0, 20.0]).unwrap();
        let dims = Dimensions::new(vec![0.0, 1.0], vec![5.0, 0.0]);
        let field = Field::from_data("T", data, dims, &flat()).unwrap();
        assert_eq!(field.sample(0.0, 0.0, 5.0, 0.5).unwrap(), 10.0);
        assert_eq!(field.sample(0.0, 0.0, 0.0, 0.5).unwrap(), 20.0);
    }

    #[test]
    fn test_transposed_input() {
        // (x, y) order
        let data = NdArray::new(vec![3, 2], vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]).unwrap();
        let dims = Dimensions::new(vec![0.0, 1.0, 2.0], vec![0.0, 1.0]);
        let options = FieldOptions {
            transpose: true,
            ..flat()
        };
        let field = Field::from_data("T", data, dims, &options).unwrap();
        assert_eq!(field.shape().unwrap(), [1, 1, 2, 3]);
        assert_eq!(field.sample(0.0, 0.0, 1.0, 2.0).unwrap(), 5.0);
    }

    #[test]
    fn test_update_time_slice_in_memory() {
        let field = ramp_field(&flat());
        assert!(field.loaded_time_indices().unwrap().is_empty());
        field
            .update_time_slice(0, |slice| {
                slice.data_mut()[0] = -1.0;
                Ok(())
            })
            .unwrap();
        assert_eq!(field.sample(0.0, 0.0, 0.0, 0.0).unwrap(), -1.0);
        assert_eq!(field.sample(0.0, 0.0, 2.0, 3.0).unwrap(), 23.0);

        assert!(field.update_time_slice(1, |_| Ok(())).is_err());
        let err = field
            .update_time_slice(0, |slice| {
                *slice = NdArray::filled(vec![1, 1, 1, 1], 0.0);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_scaling_factor_once() {
        let field = ramp_field(&flat());
        field.set_scaling_factor(2.0).unwrap();
        assert_eq!(field.sample(0.0, 0.0, 1.0, 1.0).unwrap(), 22.0);
        assert!(field.set_scaling_factor(3.0).is_err());
    }

    #[test]
    fn test_spherical_u_converted() {
        let data = NdArray::filled(vec![2, 2], 1.0);
        let dims = Dimensions::new(vec![0.0, 1.0], vec![0.0, 60.0]);
        let u = Field::from_data("U", data.clone(), dims.clone(), &FieldOptions::default()).unwrap();
        let t = Field::from_data("T", data, dims, &FieldOptions::default()).unwrap();

        assert_eq!(u.units().unwrap(), UnitConverter::GeographicPolar);
        let expected = 1.0 / (field_common::DEG2M * 60f64.to_radians().cos());
        assert!((u.sample(0.0, 0.0, 60.0, 0.5).unwrap() - expected).abs() < 1e-15);
        assert_eq!(t.sample(0.0, 0.0, 60.0, 0.5).unwrap(), 1.0);
    }

    #[test]
    fn test_time_extrapolation_default() {
        let data = NdArray::filled(vec![2, 2, 2], 1.0);
        let dims = Dimensions::new(vec![0.0, 1.0], vec![0.0, 1.0]).with_time(vec![0.0, 10.0]);
        let field = Field::from_data("T", data, dims, &flat()).unwrap();
        let err = field.sample(11.0, 0.0, 0.5, 0.5).unwrap_err();
        assert!(matches!(err, FieldError::TimeExtrapolation { .. }));

        let single = ramp_field(&flat());
        assert!(single.allow_time_extrapolation().unwrap());
        assert!(single.sample(1e6, 0.0, 0.5, 0.5).is_ok());
    }

    #[test]
    fn test_touched_marks() {
        let data = NdArray::from_fn(vec![3, 2, 2], |i| i[0] as f64);
        let dims = Dimensions::new(vec![0.0, 1.0], vec![0.0, 1.0]).with_time(vec![0.0, 1.0, 2.0]);
        let field = Field::from_data("T", data, dims, &flat()).unwrap();
        field.sample(1.5, 0.0, 0.5, 0.5).unwrap();
        assert_eq!(field.touched_time_indices().unwrap(), vec![1, 2]);
        field.time_chunk_advance(1.5, 1.0).unwrap();
        assert!(field.touched_time_indices().unwrap().is_empty());
    }

    #[test]
    fn test_memory_halo_extends_data() {
        let field = ramp_field(&flat());
        field.add_periodic_halo(true, false, 1).unwrap();
        assert_eq!(field.shape().unwrap(), [1, 1, 3, 6]);
        let row = field.data().unwrap().slice_axis(2, 0, 1);
        assert_eq!(row.data(), &[3.0, 0.0, 1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_renamed_shares_data() {
        let field = ramp_field(&flat());
        let alias = field.renamed("T2");
        field
            .with_data_mut(|d| d.data_mut().iter_mut().for_each(|v| *v = 7.0))
            .unwrap();
        assert_eq!(alias.sample(0.0, 0.0, 1.0, 1.0).unwrap(), 7.0);
        assert!(alias.same_field(&field));
    }

    #[test]
    fn test_derive_marks_provenance() {
        let field = ramp_field(&flat());
        let doubled = field.derive("T2", |v| 2.0 * v).unwrap();
        assert_eq!(doubled.creation_log().unwrap(), CreationLog::Derived);
        assert_eq!(doubled.sample(0.0, 0.0, 2.0, 3.0).unwrap(), 46.0);
    }

    #[test]
    fn test_dimensions_from_map_rejects_unknown_key() {
        let mut map = BTreeMap::new();
        map.insert("lon".to_string(), NdArray::from_vec(vec![0.0, 1.0]));
        map.insert("lat".to_string(), NdArray::from_vec(vec![0.0, 1.0]));
        map.insert("ensemble".to_string(), NdArray::from_vec(vec![0.0]));
        let err = Dimensions::from_map(map).unwrap_err();
        assert!(matches!(err, FieldError::DimensionName { .. }));
    }

    #[test]
    fn test_indices_subset() {
        let data = NdArray::from_fn(vec![3, 4], |i| (i[0] * 10 + i[1]) as f64);
        let dims = Dimensions::new(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0, 2.0]);
        let options = FieldOptions {
            indices: Some([("lon".to_string(), vec![1, 2, 3])].into()),
            ..flat()
        };
        let field = Field::from_data("T", data, dims, &options).unwrap();
        assert_eq!(field.shape().unwrap(), [1, 1, 3, 3]);
        assert_eq!(field.sample(0.0, 0.0, 2.0, 1.0).unwrap(), 21.0);
        assert!(field.sample(0.0, 0.0, 2.0, 0.5).is_err());
    }
}
