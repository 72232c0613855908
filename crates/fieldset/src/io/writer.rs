//! Writing fields and field sets.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info};
use zarrs_filesystem::FilesystemStore;

use super::{depth_var, store_path, write_array, LAT_VAR, LON_VAR, TIME_VAR};
use crate::error::{FieldError, Result};
use crate::field::Field;
use crate::fieldset::FieldSet;
use crate::grid::{Depth, Grid};
use crate::types::Dtype;

impl Field {
    /// Write this field to `<basename><name>.zarr`.
    ///
    /// Deferred fields are read in full from their backing store first.
    pub fn write(&self, basename: impl AsRef<Path>) -> Result<PathBuf> {
        let path = store_path(basename.as_ref(), self.name());
        std::fs::create_dir_all(&path)?;
        let store = Arc::new(
            FilesystemStore::new(&path)
                .map_err(|e| FieldError::storage(format!("{}: {}", path.display(), e)))?,
        );

        let core = self.core()?;
        let grid = &core.grid;
        let data = core.data.to_array()?;
        let [nt, nz, ny, nx] = grid.shape();
        let name = self.name();
        let depth_name = depth_var(name);

        let mut attrs = Map::new();
        attrs.insert(
            "_ARRAY_DIMENSIONS".into(),
            json!([TIME_VAR, depth_name, "y", "x"]),
        );
        attrs.insert("creation_log".into(), json!(core.creation_log.as_str()));
        attrs.insert("time_origin".into(), json!(grid.time_origin().to_string()));
        if let Some(calendar) = grid.time_origin().calendar() {
            attrs.insert("calendar".into(), json!(calendar.as_str()));
        }
        attrs.insert("mesh".into(), json!(grid.mesh().as_str()));
        attrs.insert("interp_method".into(), json!(core.interp_method.as_str()));
        attrs.insert("cast_data_dtype".into(), json!(core.dtype.as_str()));
        if let Some(factor) = core.scaling_factor {
            attrs.insert("scaling_factor".into(), json!(factor));
        }
        if let Some(period) = core.time_periodic {
            attrs.insert("time_periodic".into(), json!(period));
        }
        attrs.insert(
            "allow_time_extrapolation".into(),
            json!(core.allow_time_extrapolation),
        );
        attrs.insert("zonal_periodic".into(), json!(grid.is_zonal_periodic()));
        attrs.insert("zonal_halo".into(), json!(grid.zonal_halo()));
        attrs.insert("meridional_halo".into(), json!(grid.meridional_halo()));

        write_array(
            &store,
            name,
            &[nt, nz, ny, nx],
            &[1, nz, ny, nx],
            core.dtype,
            data.data(),
            attrs,
        )?;
        write_coordinates(&store, grid, &depth_name)?;

        info!(field = %name, path = %path.display(), "wrote field");
        Ok(path)
    }
}

fn dimension_attrs(names: &[&str]) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("_ARRAY_DIMENSIONS".into(), json!(names));
    attrs
}

fn write_coordinates(store: &Arc<FilesystemStore>, grid: &Grid, depth_name: &str) -> Result<()> {
    let [nt, nz, ny, nx] = grid.shape();

    let mut lon = Vec::with_capacity(ny * nx);
    let mut lat = Vec::with_capacity(ny * nx);
    for y in 0..ny {
        for x in 0..nx {
            lon.push(grid.lon_at(y, x));
            lat.push(grid.lat_at(y, x));
        }
    }
    let horizontal = [ny, nx];
    write_array(store, LON_VAR, &horizontal, &horizontal, Dtype::Float64, &lon, dimension_attrs(&["y", "x"]))?;
    write_array(store, LAT_VAR, &horizontal, &horizontal, Dtype::Float64, &lat, dimension_attrs(&["y", "x"]))?;

    match grid.depth() {
        Depth::Z(levels) => write_array(
            store,
            depth_name,
            &[nz],
            &[nz],
            Dtype::Float64,
            levels,
            dimension_attrs(&[depth_name]),
        )?,
        Depth::S {
            values,
            time_varying: true,
        } => write_array(
            store,
            depth_name,
            values.shape(),
            &[1, nz, ny, nx],
            Dtype::Float64,
            values.data(),
            dimension_attrs(&[TIME_VAR, depth_name, "y", "x"]),
        )?,
        Depth::S { values, .. } => write_array(
            store,
            depth_name,
            &[nz, ny, nx],
            &[nz, ny, nx],
            Dtype::Float64,
            values.data(),
            dimension_attrs(&[depth_name, "y", "x"]),
        )?,
    }

    let mut time_attrs = dimension_attrs(&[TIME_VAR]);
    time_attrs.insert("units".into(), json!(grid.time_origin().cf_units()));
    if let Some(calendar) = grid.time_origin().calendar() {
        time_attrs.insert("calendar".into(), json!(calendar.as_str()));
    }
    write_array(store, TIME_VAR, &[nt], &[nt], Dtype::Float64, grid.time(), time_attrs)?;
    debug!(nt, nz, ny, nx, "wrote coordinates");
    Ok(())
}

impl FieldSet {
    /// Write `U`, `V`, `W` and every other scalar field marked `to_write`.
    ///
    /// Returns the store paths in insertion order.
    pub fn write(&self, basename: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let basename = basename.as_ref();
        let mut paths = Vec::new();
        for field in self.fields() {
            let always = matches!(field.name(), "U" | "V" | "W");
            if always || field.to_write()? {
                paths.push(field.write(basename)?);
            }
        }
        info!(basename = %basename.display(), stores = paths.len(), "wrote field set");
        Ok(paths)
    }
}
