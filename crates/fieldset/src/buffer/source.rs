//! Backing stores a [`ChunkedBuffer`](super::ChunkedBuffer) reads from.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use super::dimensions::DimensionNameMap;
use crate::array::NdArray;
use crate::error::{FieldError, Result};
use crate::types::Dim;

/// Random access to a 4-D (t, z, y, x) block of raw values.
pub trait ChunkSource: Send + Sync + std::fmt::Debug {
    /// Canonical (t, z, y, x) shape.
    fn shape(&self) -> [usize; 4];

    /// Storage chunk shape in canonical order, when the store has one.
    fn native_chunk_shape(&self) -> Option<[usize; 4]> {
        None
    }

    /// Read `shape` values starting at `start`, row-major in canonical order.
    fn read(&self, start: [usize; 4], shape: [usize; 4]) -> Result<Vec<f64>>;
}

/// In-memory source, used for derived fields and tests.
#[derive(Debug, Clone)]
pub struct ArraySource {
    data: NdArray,
}

impl ArraySource {
    pub fn new(data: NdArray) -> Result<Self> {
        if data.ndim() != 4 {
            return Err(FieldError::configuration(format!(
                "array source needs 4-D data, got shape {:?}",
                data.shape()
            )));
        }
        Ok(Self { data })
    }
}

impl ChunkSource for ArraySource {
    fn shape(&self) -> [usize; 4] {
        let s = self.data.shape();
        [s[0], s[1], s[2], s[3]]
    }

    fn read(&self, start: [usize; 4], shape: [usize; 4]) -> Result<Vec<f64>> {
        let full = self.shape();
        for axis in 0..4 {
            if start[axis] + shape[axis] > full[axis] {
                return Err(FieldError::configuration(format!(
                    "read of {shape:?} at {start:?} exceeds source shape {full:?}"
                )));
            }
        }
        let block = NdArray::from_fn(shape.to_vec(), |idx| {
            self.data.get(&[
                start[0] + idx[0],
                start[1] + idx[1],
                start[2] + idx[2],
                start[3] + idx[3],
            ])
        });
        Ok(block.into_vec())
    }
}

/// Contiguous index subsets per spatial dimension.
pub type IndexSubset = BTreeMap<Dim, Range<usize>>;

/// One file of a (possibly multi-file) variable.
struct Slab {
    path: PathBuf,
    array: Array<FilesystemStore>,
    /// First canonical time index stored in this file.
    t_offset: usize,
    nt: usize,
    /// Stored axis for each canonical axis.
    axes: [Option<usize>; 4],
    /// Index subset start per canonical axis.
    offsets: [usize; 4],
}

impl Slab {
    fn read(&self, start: [usize; 4], shape: [usize; 4]) -> Result<Vec<f64>> {
        let ndim = self.array.shape().len();
        let mut stored_start = vec![0u64; ndim];
        let mut stored_shape = vec![1u64; ndim];
        for c in 0..4 {
            if let Some(axis) = self.axes[c] {
                stored_start[axis] = (start[c] + self.offsets[c]) as u64;
                stored_shape[axis] = shape[c] as u64;
            }
        }

        let subset = ArraySubset::new_with_start_shape(stored_start, stored_shape.clone())
            .map_err(FieldError::zarr)?;

        let raw: Vec<f64> = match self.array.data_type() {
            DataType::Float32 => self
                .array
                .retrieve_array_subset_elements::<f32>(&subset)
                .map_err(FieldError::zarr)?
                .into_iter()
                .map(f64::from)
                .collect(),
            DataType::Float64 => self
                .array
                .retrieve_array_subset_elements::<f64>(&subset)
                .map_err(FieldError::zarr)?,
            other => {
                return Err(FieldError::invalid_metadata(format!(
                    "{}: unsupported data type {:?}",
                    self.path.display(),
                    other
                )))
            }
        };

        // Stored order may differ from (t, z, y, x)
        let mut strides = vec![1usize; ndim];
        for axis in (0..ndim.saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * stored_shape[axis + 1] as usize;
        }
        let axes = self.axes;
        let block = NdArray::from_fn(shape.to_vec(), |idx| {
            let offset: usize = (0..4)
                .filter_map(|c| axes[c].map(|axis| idx[c] * strides[axis]))
                .sum();
            raw[offset]
        });
        Ok(block.into_vec())
    }
}

/// A variable stored in one or more Zarr stores, concatenated along time.
pub struct ZarrSource {
    variable: String,
    slabs: Vec<Slab>,
    shape: [usize; 4],
    native_chunks: Option<[usize; 4]>,
    /// Stored dimension name per canonical axis.
    stored_names: [Option<String>; 4],
}

impl std::fmt::Debug for ZarrSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrSource")
            .field("variable", &self.variable)
            .field("files", &self.slabs.iter().map(|s| &s.path).collect::<Vec<_>>())
            .field("shape", &self.shape)
            .finish()
    }
}

/// Stored dimension names of an array, from `_ARRAY_DIMENSIONS`.
///
/// Arrays without the attribute get the trailing names of
/// (time, depth, lat, lon).
pub fn stored_dimension_names(
    attrs: &serde_json::Map<String, serde_json::Value>,
    ndim: usize,
) -> Vec<String> {
    if let Some(names) = attrs.get("_ARRAY_DIMENSIONS").and_then(|v| v.as_array()) {
        let names: Vec<String> = names
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        if names.len() == ndim {
            return names;
        }
    }
    Dim::ALL[4usize.saturating_sub(ndim)..]
        .iter()
        .map(|d| d.as_str().to_string())
        .collect()
}

/// Open `/<variable>` in the store at `path`.
pub fn open_array(path: &Path, variable: &str) -> Result<Array<FilesystemStore>> {
    let store = FilesystemStore::new(path)
        .map_err(|e| FieldError::storage(format!("{}: {}", path.display(), e)))?;
    Array::open(Arc::new(store), &format!("/{variable}"))
        .map_err(|e| FieldError::zarr(format!("{}/{}: {}", path.display(), variable, e)))
}

impl ZarrSource {
    /// Open `variable` in every file of `files`, in time order.
    ///
    /// Stored dimensions are matched to logical ones through `names`; the
    /// horizontal dimensions are required, time and depth default to a
    /// single level. Spatial shapes must agree across files.
    pub fn open(
        files: &[PathBuf],
        variable: &str,
        names: &DimensionNameMap,
        subset: &IndexSubset,
    ) -> Result<Self> {
        if files.is_empty() {
            return Err(FieldError::configuration(format!(
                "no files given for variable '{variable}'"
            )));
        }

        let mut slabs = Vec::with_capacity(files.len());
        let mut spatial: Option<[usize; 3]> = None;
        let mut stored_names: [Option<String>; 4] = Default::default();
        let mut native_chunks = None;
        let mut t_offset = 0;

        for path in files {
            let array = open_array(path, variable)?;
            let stored_shape: Vec<usize> = array.shape().iter().map(|&n| n as usize).collect();
            let dims = stored_dimension_names(array.attributes(), stored_shape.len());
            let axes = resolve_axes(names, &dims, &stored_shape)?;

            let mut full = [1usize; 4];
            for c in 0..4 {
                if let Some(axis) = axes[c] {
                    full[c] = stored_shape[axis];
                }
            }

            let mut offsets = [0usize; 4];
            let mut this_spatial = [full[1], full[2], full[3]];
            for (dim, range) in subset {
                let c = dim.axis();
                if c == 0 {
                    return Err(FieldError::configuration(
                        "indices cannot subset the time dimension",
                    ));
                }
                if range.end > full[c] || range.is_empty() {
                    return Err(FieldError::configuration(format!(
                        "indices {:?} for '{}' outside stored length {}",
                        range,
                        dim.as_str(),
                        full[c]
                    )));
                }
                offsets[c] = range.start;
                this_spatial[c - 1] = range.len();
            }

            match spatial {
                None => {
                    spatial = Some(this_spatial);
                    for c in 0..4 {
                        stored_names[c] = axes[c].map(|axis| dims[axis].clone());
                    }
                    native_chunks = native_chunk_shape(&array, &axes);
                }
                Some(expected) if expected != this_spatial => {
                    return Err(FieldError::configuration(format!(
                        "{}: spatial shape {:?} differs from {:?} in earlier files",
                        path.display(),
                        this_spatial,
                        expected
                    )))
                }
                Some(_) => {}
            }

            debug!(path = %path.display(), variable, nt = full[0], "opened variable");
            slabs.push(Slab {
                path: path.clone(),
                array,
                t_offset,
                nt: full[0],
                axes,
                offsets,
            });
            t_offset += full[0];
        }

        let [nz, ny, nx] = spatial.unwrap_or([1, 1, 1]);
        Ok(Self {
            variable: variable.to_string(),
            slabs,
            shape: [t_offset, nz, ny, nx],
            native_chunks,
            stored_names,
        })
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Time levels contributed by each file.
    pub fn times_per_file(&self) -> Vec<usize> {
        self.slabs.iter().map(|s| s.nt).collect()
    }

    /// Stored name of a logical dimension, if the variable has it.
    pub fn stored_name(&self, dim: Dim) -> Option<&str> {
        self.stored_names[dim.axis()].as_deref()
    }

    /// Attributes of the variable in the first file.
    pub fn attributes(&self) -> &serde_json::Map<String, serde_json::Value> {
        self.slabs[0].array.attributes()
    }
}

impl ChunkSource for ZarrSource {
    fn shape(&self) -> [usize; 4] {
        self.shape
    }

    fn native_chunk_shape(&self) -> Option<[usize; 4]> {
        self.native_chunks
    }

    fn read(&self, start: [usize; 4], shape: [usize; 4]) -> Result<Vec<f64>> {
        let slice_len = shape[1] * shape[2] * shape[3];
        let mut out = vec![f64::NAN; shape[0] * slice_len];
        let end = start[0] + shape[0];
        if end > self.shape[0] {
            return Err(FieldError::configuration(format!(
                "time range {}..{} exceeds {} stored levels",
                start[0], end, self.shape[0]
            )));
        }

        for slab in &self.slabs {
            let lo = start[0].max(slab.t_offset);
            let hi = end.min(slab.t_offset + slab.nt);
            if lo >= hi {
                continue;
            }
            let values = slab.read(
                [lo - slab.t_offset, start[1], start[2], start[3]],
                [hi - lo, shape[1], shape[2], shape[3]],
            )?;
            let dst = (lo - start[0]) * slice_len;
            out[dst..dst + values.len()].copy_from_slice(&values);
        }
        Ok(out)
    }
}

fn resolve_axes(
    names: &DimensionNameMap,
    dims: &[String],
    stored_shape: &[usize],
) -> Result<[Option<usize>; 4]> {
    let mut axes = [None; 4];
    for dim in Dim::ALL {
        axes[dim.axis()] = names.resolve(dim, dims);
    }
    for dim in [Dim::Lat, Dim::Lon] {
        if axes[dim.axis()].is_none() {
            return Err(FieldError::dimension(dim.as_str(), dims));
        }
    }

    for (i, a) in axes.iter().enumerate() {
        if a.is_some() && axes[i + 1..].contains(a) {
            return Err(FieldError::configuration(format!(
                "stored dimensions {dims:?} map two logical dimensions to one axis"
            )));
        }
    }

    for (axis, (name, &len)) in dims.iter().zip(stored_shape).enumerate() {
        if len > 1 && !axes.contains(&Some(axis)) {
            return Err(FieldError::configuration(format!(
                "stored dimension '{name}' (length {len}) matches no logical dimension"
            )));
        }
    }
    Ok(axes)
}

fn native_chunk_shape(
    array: &Array<FilesystemStore>,
    axes: &[Option<usize>; 4],
) -> Option<[usize; 4]> {
    let origin = vec![0u64; array.shape().len()];
    let chunk_shape = array
        .chunk_grid()
        .chunk_shape(&origin, array.shape())
        .ok()
        .flatten()?;
    let mut out = [1usize; 4];
    for c in 1..4 {
        if let Some(axis) = axes[c] {
            out[c] = chunk_shape[axis].get() as usize;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_source_reads_block() {
        let data = NdArray::from_fn(vec![2, 1, 3, 4], |i| (i[0] * 100 + i[2] * 10 + i[3]) as f64);
        let source = ArraySource::new(data).unwrap();

        assert_eq!(source.shape(), [2, 1, 3, 4]);
        let block = source.read([1, 0, 1, 2], [1, 1, 2, 2]).unwrap();
        assert_eq!(block, vec![112.0, 113.0, 122.0, 123.0]);
        assert!(source.read([1, 0, 2, 0], [1, 1, 2, 1]).is_err());
    }

    #[test]
    fn test_array_source_needs_4d() {
        assert!(ArraySource::new(NdArray::filled(vec![2, 2], 0.0)).is_err());
    }

    #[test]
    fn test_stored_dimension_names_fallback() {
        let attrs = serde_json::Map::new();
        assert_eq!(stored_dimension_names(&attrs, 3), vec!["depth", "lat", "lon"]);

        let mut attrs = serde_json::Map::new();
        attrs.insert(
            "_ARRAY_DIMENSIONS".into(),
            serde_json::json!(["time_counter", "y", "x"]),
        );
        assert_eq!(stored_dimension_names(&attrs, 3), vec!["time_counter", "y", "x"]);
    }

    #[test]
    fn test_resolve_axes() {
        let names = DimensionNameMap::default();
        let dims: Vec<String> = ["time_counter", "y", "x"].iter().map(|s| s.to_string()).collect();
        let axes = resolve_axes(&names, &dims, &[4, 3, 2]).unwrap();
        assert_eq!(axes, [Some(0), None, Some(1), Some(2)]);

        let dims: Vec<String> = ["nydim", "nxdim"].iter().map(|s| s.to_string()).collect();
        let err = resolve_axes(&names, &dims, &[3, 2]).unwrap_err();
        assert!(matches!(err, FieldError::DimensionName { .. }));
    }

    #[test]
    fn test_unmapped_axis_rejected() {
        let names = DimensionNameMap::default();
        let dims: Vec<String> = ["ensemble", "lat", "lon"].iter().map(|s| s.to_string()).collect();
        assert!(resolve_axes(&names, &dims, &[5, 3, 2]).is_err());
        assert!(resolve_axes(&names, &dims, &[1, 3, 2]).is_ok());
    }
}
