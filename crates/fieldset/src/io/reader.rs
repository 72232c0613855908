//! Reading fields from Zarr stores.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use field_common::{Mesh, TimeConverter};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{
    attr_bool, attr_f64, attr_str, attr_usize, depth_var, read_array, store_path, LAT_VAR,
    LON_VAR, TIME_VAR,
};
use crate::array::NdArray;
use crate::buffer::{
    open_array, stored_dimension_names, ChunkSource, ChunkedBuffer, DimensionNameMap,
    ValueTransform, ZarrSource,
};
use crate::config::{EngineConfig, FieldOptions, PerField};
use crate::error::{FieldError, Result};
use crate::field::{subset_dimensions, time_origin, Dimensions, Field, FieldData};
use crate::fieldset::FieldSet;
use crate::grid::Grid;
use crate::types::{ChunkSize, CreationLog, Dim, Dtype, InterpMethod};

/// Names of the coordinate arrays of a stored variable, by logical
/// dimension (`lon`, `lat`, `depth`, `time`).
///
/// `lon` and `lat` are required. The stored dimension names of each
/// coordinate array identify the matching axis of the data array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZarrDimensions {
    coordinates: BTreeMap<Dim, String>,
}

impl ZarrDimensions {
    pub fn new(lon: impl Into<String>, lat: impl Into<String>) -> Self {
        Self {
            coordinates: BTreeMap::from([(Dim::Lon, lon.into()), (Dim::Lat, lat.into())]),
        }
    }

    pub fn with_depth(mut self, depth: impl Into<String>) -> Self {
        self.coordinates.insert(Dim::Depth, depth.into());
        self
    }

    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.coordinates.insert(Dim::Time, time.into());
        self
    }

    /// Build from user keys; anything but lon, lat, depth or time is a
    /// [`FieldError::DimensionName`].
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let mut coordinates = BTreeMap::new();
        for (key, variable) in map {
            coordinates.insert(Dim::parse_key(key)?, variable.clone());
        }
        let out = Self { coordinates };
        out.required(Dim::Lon)?;
        out.required(Dim::Lat)?;
        Ok(out)
    }

    pub fn get(&self, dim: Dim) -> Option<&str> {
        self.coordinates.get(&dim).map(String::as_str)
    }

    fn required(&self, dim: Dim) -> Result<&str> {
        self.get(dim).ok_or_else(|| {
            let available: Vec<String> = self
                .coordinates
                .keys()
                .map(|d| d.as_str().to_string())
                .collect();
            FieldError::dimension(dim.as_str(), &available)
        })
    }

    /// Dimensions in the layout [`FieldSet::write`] produces for `name`.
    pub fn written(name: &str) -> Self {
        Self::new(LON_VAR, LAT_VAR)
            .with_depth(depth_var(name))
            .with_time(TIME_VAR)
    }
}

/// A coordinate array and the stored names of its dimensions.
struct Coordinate {
    values: NdArray,
    dims: Vec<String>,
}

fn read_coordinate(path: &Path, variable: &str) -> Result<Coordinate> {
    let array = open_array(path, variable)?;
    let values = read_array(&array, &format!("{}/{}", path.display(), variable))?;
    let dims = stored_dimension_names(array.attributes(), values.ndim());
    Ok(Coordinate { values, dims })
}

impl Field {
    /// Read `variable` from an ordered list of stores, concatenated along
    /// time, with the default engine configuration.
    pub fn from_zarr(
        name: impl Into<String>,
        files: &[PathBuf],
        variable: &str,
        dimensions: &ZarrDimensions,
        options: &FieldOptions,
    ) -> Result<Field> {
        Self::from_zarr_with_config(
            name,
            files,
            variable,
            dimensions,
            options,
            &EngineConfig::default(),
        )
    }

    /// Read `variable` from `files`.
    ///
    /// With `deferred_load` (the default) data stays on disk behind a
    /// [`ChunkedBuffer`] and only the window set by a time-chunk advance is
    /// materialised; otherwise everything is read now.
    pub fn from_zarr_with_config(
        name: impl Into<String>,
        files: &[PathBuf],
        variable: &str,
        dimensions: &ZarrDimensions,
        options: &FieldOptions,
        config: &EngineConfig,
    ) -> Result<Field> {
        read_field(
            name.into(),
            files,
            variable,
            dimensions,
            options,
            config,
            CreationLog::FromZarr,
        )
    }
}

fn read_field(
    name: String,
    files: &[PathBuf],
    variable: &str,
    dimensions: &ZarrDimensions,
    options: &FieldOptions,
    config: &EngineConfig,
    creation_log: CreationLog,
) -> Result<Field> {
    options.validate()?;
    config.validate().map_err(FieldError::Configuration)?;
    let first = files.first().ok_or_else(|| {
        FieldError::configuration(format!("no files given for field '{name}'"))
    })?;

    let lon = read_coordinate(first, dimensions.required(Dim::Lon)?)?;
    let lat = read_coordinate(first, dimensions.required(Dim::Lat)?)?;
    let depth = dimensions
        .get(Dim::Depth)
        .map(|v| read_coordinate(first, v))
        .transpose()?;

    let mut requested: Vec<(Dim, String)> = Vec::new();
    match lon.values.ndim() {
        1 => requested.push((Dim::Lon, lon.dims[0].clone())),
        2 => {
            requested.push((Dim::Lat, lon.dims[0].clone()));
            requested.push((Dim::Lon, lon.dims[1].clone()));
        }
        n => {
            return Err(FieldError::invalid_metadata(format!(
                "longitude coordinate must be 1-D or 2-D, got {n}-D"
            )))
        }
    }
    if lat.values.ndim() == 1 {
        requested.push((Dim::Lat, lat.dims[0].clone()));
    }
    if let Some(depth) = &depth {
        let axis = match depth.values.ndim() {
            1 => Some(0),
            n if n >= 3 => Some(n - 3),
            _ => None,
        };
        if let Some(axis) = axis {
            requested.push((Dim::Depth, depth.dims[axis].clone()));
        }
    }

    let (time, origin) = read_time(files, dimensions.get(Dim::Time), options, &mut requested)?;

    if let Some(ChunkSize::Explicit(map)) = &options.chunksize {
        for (dim, (stored, _)) in map {
            requested.push((*dim, stored.clone()));
        }
    }
    let names = DimensionNameMap::default()
        .with_requested(requested.iter().map(|(d, n)| (*d, n.as_str())));

    let subset = options.index_ranges()?.unwrap_or_default();
    let source = ZarrSource::open(files, variable, &names, &subset)?;

    let (lon, lat) = collapse_rectilinear(lon.values, lat.values);
    let mut dims = Dimensions {
        lon,
        lat,
        depth: depth.map(|d| d.values),
        time,
    };
    for (dim, range) in &subset {
        dims = subset_dimensions(dims, *dim, range.start, range.len());
    }

    let halo = StoredHalo::from_attrs(source.attributes());
    let transform = ValueTransform {
        vmin: options.vmin,
        vmax: options.vmax,
        dtype: options.dtype(),
    };

    let deferred = options.deferred_load.unwrap_or(true);
    let field = if !deferred || is_descending(&dims.lat) {
        if deferred {
            warn!(field = %name, "descending latitude in stored data, loading eagerly");
        }
        let shape = source.shape();
        let data = NdArray::new(shape.to_vec(), source.read([0; 4], shape)?)?;
        Field::from_memory(name, data, dims, origin, options, creation_log)?
    } else {
        let grid = Grid::new(dims.lon, dims.lat, dims.depth, dims.time, origin, options.mesh())?;
        let chunksize = options.chunksize.clone().unwrap_or(ChunkSize::Auto);
        let buffer = ChunkedBuffer::new(Box::new(source), &chunksize, transform, config)?;
        Field::from_parts(
            name,
            Arc::new(grid),
            FieldData::Chunked(buffer),
            options,
            creation_log,
        )?
    };

    if let Some(halo) = halo {
        let grid = field.grid()?.as_ref().clone().with_halo_metadata(
            halo.zonal_periodic,
            halo.zonal,
            halo.meridional,
        )?;
        field.set_grid(Arc::new(grid))?;
    }

    debug!(field = %field.name(), files = files.len(), variable, deferred, "read field");
    Ok(field)
}

/// Time coordinates of every file, on the origin of the first.
fn read_time(
    files: &[PathBuf],
    variable: Option<&str>,
    options: &FieldOptions,
    requested: &mut Vec<(Dim, String)>,
) -> Result<(Option<Vec<f64>>, TimeConverter)> {
    if let Some(stamps) = &options.timestamps {
        if stamps.len() != files.len() {
            return Err(FieldError::configuration(format!(
                "timestamps has {} entries for {} files",
                stamps.len(),
                files.len()
            )));
        }
        if let Some(first) = files.first() {
            if let Some(variable) = variable {
                requested.push((Dim::Time, read_coordinate(first, variable)?.dims[0].clone()));
            }
        }
        return Ok((Some(stamps.concat()), time_origin(options)?));
    }

    let Some(variable) = variable else {
        return Ok((None, time_origin(options)?));
    };

    let mut times = Vec::new();
    let mut origin: Option<TimeConverter> = None;
    for path in files {
        let array = open_array(path, variable)?;
        let label = format!("{}/{}", path.display(), variable);
        let values = read_array(&array, &label)?;
        let attrs = array.attributes();
        if origin.is_none() {
            let dims = stored_dimension_names(attrs, values.ndim());
            requested.push((Dim::Time, dims[0].clone()));
        }

        let units = attr_str(attrs, "units").unwrap_or("seconds");
        let (converter, factor) = TimeConverter::from_cf_units(units, attr_str(attrs, "calendar"))?;
        let reference = *origin.get_or_insert(converter);
        let offset = reference.offset_to(&converter)?;
        times.extend(values.data().iter().map(|t| t * factor + offset));
    }
    Ok((Some(times), origin.unwrap_or_else(TimeConverter::numeric)))
}

/// Reduce 2-D coordinates to 1-D when longitude is constant down every
/// column and latitude constant along every row.
fn collapse_rectilinear(lon: NdArray, lat: NdArray) -> (NdArray, NdArray) {
    if lon.ndim() != 2 || lat.ndim() != 2 || lon.shape() != lat.shape() {
        return (lon, lat);
    }
    let (ny, nx) = (lon.shape()[0], lon.shape()[1]);
    let lon_rows_equal = (1..ny).all(|y| (0..nx).all(|x| lon.get(&[y, x]) == lon.get(&[0, x])));
    let lat_cols_equal = (0..ny).all(|y| (1..nx).all(|x| lat.get(&[y, x]) == lat.get(&[y, 0])));
    if !(lon_rows_equal && lat_cols_equal) {
        return (lon, lat);
    }
    let lon_1d = NdArray::from_vec((0..nx).map(|x| lon.get(&[0, x])).collect());
    let lat_1d = NdArray::from_vec((0..ny).map(|y| lat.get(&[y, 0])).collect());
    (lon_1d, lat_1d)
}

fn is_descending(lat: &NdArray) -> bool {
    lat.ndim() == 1 && lat.len() > 1 && lat.data()[0] > lat.data()[lat.len() - 1]
}

struct StoredHalo {
    zonal_periodic: bool,
    zonal: usize,
    meridional: usize,
}

impl StoredHalo {
    fn from_attrs(attrs: &Map<String, Value>) -> Option<Self> {
        let halo = Self {
            zonal_periodic: attr_bool(attrs, "zonal_periodic").unwrap_or(false),
            zonal: attr_usize(attrs, "zonal_halo").unwrap_or(0),
            meridional: attr_usize(attrs, "meridional_halo").unwrap_or(0),
        };
        (halo.zonal_periodic || halo.zonal > 0 || halo.meridional > 0).then_some(halo)
    }
}

/// Options recorded on a written data array.
fn stored_options(attrs: &Map<String, Value>) -> Result<FieldOptions> {
    let mut options = FieldOptions::default();
    if let Some(mesh) = attr_str(attrs, "mesh") {
        options.mesh = Some(Mesh::from_str(mesh).ok_or_else(|| {
            FieldError::invalid_metadata(format!("unknown mesh '{mesh}'"))
        })?);
    }
    if let Some(method) = attr_str(attrs, "interp_method") {
        options.interp_method = Some(PerField::All(InterpMethod::from_str(method)?));
    }
    if let Some(dtype) = attr_str(attrs, "cast_data_dtype") {
        options.cast_data_dtype = Some(Dtype::from_str(dtype)?);
    }
    options.time_periodic = attr_f64(attrs, "time_periodic");
    options.allow_time_extrapolation = attr_bool(attrs, "allow_time_extrapolation");
    Ok(options)
}

impl FieldSet {
    /// Read a field set written by [`FieldSet::write`].
    ///
    /// Reads `U`, `V`, `W` when its store exists, and every name in
    /// `extra_fields`. Options given here win over those recorded in the
    /// stores.
    pub fn from_parcels(
        basename: impl AsRef<Path>,
        extra_fields: &[&str],
        options: &FieldOptions,
    ) -> Result<FieldSet> {
        Self::from_parcels_with_config(basename, extra_fields, options, EngineConfig::default())
    }

    pub fn from_parcels_with_config(
        basename: impl AsRef<Path>,
        extra_fields: &[&str],
        options: &FieldOptions,
        config: EngineConfig,
    ) -> Result<FieldSet> {
        Self::from_parcels_series(&[basename.as_ref().to_path_buf()], extra_fields, options, config)
    }

    /// Read several written field sets as one, concatenated along time in
    /// the order given.
    ///
    /// Every basename must hold a store for each field read. Field names
    /// come from the first basename. `options.timestamps`, when set,
    /// replaces the stored times and needs one entry per basename.
    pub fn from_parcels_series(
        basenames: &[PathBuf],
        extra_fields: &[&str],
        options: &FieldOptions,
        config: EngineConfig,
    ) -> Result<FieldSet> {
        let first = basenames
            .first()
            .ok_or_else(|| FieldError::configuration("no basenames given"))?;
        let mut names = vec!["U", "V"];
        if store_path(first, "W").exists() {
            names.push("W");
        }
        names.extend(extra_fields.iter().copied().filter(|n| !matches!(*n, "U" | "V" | "W")));

        let mut set = FieldSet::with_config(config.clone())?;
        for name in names {
            let paths: Vec<PathBuf> = basenames.iter().map(|b| store_path(b, name)).collect();
            if let Some(missing) = paths.iter().find(|p| !p.exists()) {
                return Err(FieldError::storage(format!(
                    "no store for field '{}' at {}",
                    name,
                    missing.display()
                )));
            }
            let attrs = open_array(&paths[0], name)?.attributes().clone();
            let merged = options.clone().or(stored_options(&attrs)?);

            let field = read_field(
                name.to_string(),
                &paths,
                name,
                &ZarrDimensions::written(name),
                &merged,
                &config,
                CreationLog::FromParcels,
            )?;
            field.set_written_from(attr_str(&attrs, "creation_log").and_then(CreationLog::from_str))?;
            field.set_scaling_factor_raw(attr_f64(&attrs, "scaling_factor"))?;
            set.add_field(field, None)?;
        }

        info!(
            basename = %first.display(),
            files = basenames.len(),
            fields = set.get_fields().len(),
            "read field set"
        );
        Ok(set)
    }
}
