//! Persistence of fields as Zarr V3 stores.
//!
//! Each field lives in its own store, `<basename><name>.zarr`:
//!
//! ```text
//! <basename>U.zarr/
//! ├── U             (t, z, y, x)  data, cast_data_dtype
//! ├── nav_lon       (y, x)
//! ├── nav_lat       (y, x)
//! ├── depthU        (z) | (z, y, x) | (t, z, y, x)
//! └── time_counter  (t)           units = "seconds since ..."
//! ```
//!
//! Reading a store back produces sample results identical to the field
//! that was written, within the precision of the stored dtype.

mod reader;
mod writer;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::array::NdArray;
use crate::error::{FieldError, Result};
use crate::types::Dtype;

pub use reader::ZarrDimensions;

pub(crate) const LON_VAR: &str = "nav_lon";
pub(crate) const LAT_VAR: &str = "nav_lat";
pub(crate) const TIME_VAR: &str = "time_counter";

pub(crate) fn depth_var(name: &str) -> String {
    format!("depth{name}")
}

/// Store path of field `name` under `basename`.
pub fn store_path(basename: &Path, name: &str) -> PathBuf {
    let mut path: OsString = basename.as_os_str().to_owned();
    path.push(name);
    path.push(".zarr");
    PathBuf::from(path)
}

/// Create `/<variable>` in `store` and write `values` into it.
pub(crate) fn write_array(
    store: &Arc<FilesystemStore>,
    variable: &str,
    shape: &[usize],
    chunk: &[usize],
    dtype: Dtype,
    values: &[f64],
    attrs: Map<String, Value>,
) -> Result<()> {
    let shape: Vec<u64> = shape.iter().map(|&n| n as u64).collect();
    let chunk_grid: zarrs::array::ChunkGrid = chunk
        .iter()
        .map(|&n| n.max(1) as u64)
        .collect::<Vec<_>>()
        .try_into()
        .map_err(|e| FieldError::zarr(format!("{e:?}")))?;

    let (data_type, fill) = match dtype {
        Dtype::Float32 => (DataType::Float32, FillValue::from(f32::NAN)),
        Dtype::Float64 => (DataType::Float64, FillValue::from(f64::NAN)),
    };
    let array = ArrayBuilder::new(shape.clone(), data_type, chunk_grid, fill)
        .attributes(attrs)
        .build(Arc::clone(store), &format!("/{variable}"))
        .map_err(|e| FieldError::zarr(format!("{variable}: {e}")))?;
    array
        .store_metadata()
        .map_err(|e| FieldError::zarr(format!("{variable}: {e}")))?;

    let subset = ArraySubset::new_with_start_shape(vec![0; shape.len()], shape)
        .map_err(FieldError::zarr)?;
    match dtype {
        Dtype::Float32 => {
            let narrow: Vec<f32> = values.iter().map(|&v| v as f32).collect();
            array.store_array_subset_elements::<f32>(&subset, &narrow)
        }
        Dtype::Float64 => array.store_array_subset_elements::<f64>(&subset, values),
    }
    .map_err(|e| FieldError::zarr(format!("{variable}: {e}")))
}

/// Read a whole array as f64, with its stored shape.
pub(crate) fn read_array(array: &Array<FilesystemStore>, label: &str) -> Result<NdArray> {
    let shape: Vec<usize> = array.shape().iter().map(|&n| n as usize).collect();
    let subset = ArraySubset::new_with_shape(array.shape().to_vec());
    let values: Vec<f64> = match array.data_type() {
        DataType::Float32 => array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| FieldError::zarr(format!("{label}: {e}")))?
            .into_iter()
            .map(f64::from)
            .collect(),
        DataType::Float64 => array
            .retrieve_array_subset_elements::<f64>(&subset)
            .map_err(|e| FieldError::zarr(format!("{label}: {e}")))?,
        other => {
            return Err(FieldError::invalid_metadata(format!(
                "{label}: unsupported data type {other:?}"
            )))
        }
    };
    NdArray::new(shape, values)
}

pub(crate) fn attr_str<'a>(attrs: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(Value::as_str)
}

pub(crate) fn attr_f64(attrs: &Map<String, Value>, key: &str) -> Option<f64> {
    attrs.get(key).and_then(Value::as_f64)
}

pub(crate) fn attr_bool(attrs: &Map<String, Value>, key: &str) -> Option<bool> {
    attrs.get(key).and_then(Value::as_bool)
}

pub(crate) fn attr_usize(attrs: &Map<String, Value>, key: &str) -> Option<usize> {
    attrs.get(key).and_then(Value::as_u64).map(|n| n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_path_appends_name() {
        let path = store_path(Path::new("/tmp/run/out_"), "U");
        assert_eq!(path, PathBuf::from("/tmp/run/out_U.zarr"));
    }

    #[test]
    fn test_array_roundtrip_keeps_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FilesystemStore::new(dir.path()).unwrap());
        let values: Vec<f64> = (0..6).map(f64::from).collect();
        write_array(&store, "a", &[2, 3], &[1, 3], Dtype::Float64, &values, Map::new()).unwrap();

        let array = Array::open(Arc::clone(&store), "/a").unwrap();
        let back = read_array(&array, "a").unwrap();
        assert_eq!(back.shape(), &[2, 3]);
        assert_eq!(back.data(), values.as_slice());
    }
}
