//! Chunked, lazily materialised field data.
//!
//! A [`ChunkedBuffer`] exposes a 4-D (t, z, y, x) view over a
//! [`ChunkSource`]. Only time slices inside the resident window can be
//! read; chunks of those slices are loaded on first access and dropped
//! when the window moves past them.
//!
//! ```text
//!   source (zarr files) ──read──► ChunkArena (LRU, byte budget)
//!                                      │
//!           window [t0, t1, t2] ───────┤ retain
//!                                      ▼
//!                              value(t, z, y, x)
//! ```

mod arena;
mod dimensions;
mod source;

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::{debug, trace};

use crate::array::NdArray;
use crate::config::EngineConfig;
use crate::error::{FieldError, Result};
use crate::grid::TimeBracket;
use crate::types::{ChunkSize, Dim, Dtype};

pub use arena::{ArenaStats, Chunk, ChunkArena, ChunkData, ChunkKey};
pub use dimensions::DimensionNameMap;
pub use source::{
    open_array, stored_dimension_names, ArraySource, ChunkSource, IndexSubset, ZarrSource,
};

/// Value transforms applied when a chunk is materialised.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValueTransform {
    /// Values below this become zero.
    pub vmin: Option<f64>,
    /// Values above this become zero.
    pub vmax: Option<f64>,
    pub dtype: Dtype,
}

impl ValueTransform {
    pub fn apply(&self, v: f64) -> f64 {
        let clipped = match (self.vmin, self.vmax) {
            (Some(lo), _) if v < lo => 0.0,
            (_, Some(hi)) if v > hi => 0.0,
            _ => v,
        };
        self.dtype.cast(clipped)
    }
}

/// Periodic halo expressed as an index remap onto the unextended source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Halo {
    zonal: usize,
    meridional: usize,
}

impl Halo {
    /// Source index of logical index `i` on an axis of source length `n`.
    fn remap(halo: usize, n: usize, i: usize) -> usize {
        if halo == 0 {
            i
        } else {
            (i + n - halo % n) % n
        }
    }
}

/// Lazily loaded 4-D field data with a bounded resident time window.
#[derive(Debug)]
pub struct ChunkedBuffer {
    source: Box<dyn ChunkSource>,
    source_shape: [usize; 4],
    /// Chunk extent in source index space; the time extent is always 1.
    chunk: [usize; 4],
    transform: ValueTransform,
    halo: Halo,
    window: Vec<usize>,
    /// Window indices that were not in the previous window.
    loaded: Vec<usize>,
    /// Edited time slices in source index space, shape (1, nz, ny, nx).
    /// They shadow the source while their index stays in the window.
    edited: BTreeMap<usize, NdArray>,
    evict_untouched: bool,
    arena: RwLock<ChunkArena>,
}

impl ChunkedBuffer {
    /// Wrap `source`, negotiating a chunk shape from `chunksize`.
    pub fn new(
        source: Box<dyn ChunkSource>,
        chunksize: &ChunkSize,
        transform: ValueTransform,
        config: &EngineConfig,
    ) -> Result<Self> {
        let source_shape = source.shape();
        if source_shape.iter().any(|&n| n == 0) {
            return Err(FieldError::configuration(format!(
                "source has an empty dimension: {source_shape:?}"
            )));
        }
        let chunk = negotiate_chunk_shape(
            chunksize,
            source_shape,
            source.native_chunk_shape(),
            transform.dtype,
            config.auto_chunk_target_bytes(),
        );

        let chunk_bytes = chunk.iter().product::<usize>() * transform.dtype.width();
        let budget = config.chunk_memory_budget_bytes();
        if chunk_bytes > budget {
            return Err(FieldError::ResourceExhaustion {
                requested_bytes: chunk_bytes,
                budget_bytes: budget,
            });
        }

        debug!(?source_shape, ?chunk, budget, "created chunked buffer");
        Ok(Self {
            source,
            source_shape,
            chunk,
            transform,
            halo: Halo::default(),
            window: Vec::new(),
            loaded: Vec::new(),
            edited: BTreeMap::new(),
            evict_untouched: config.evict_untouched_chunks,
            arena: RwLock::new(ChunkArena::new(budget)),
        })
    }

    /// Logical (t, z, y, x) shape, including any halo.
    pub fn shape(&self) -> [usize; 4] {
        let [nt, nz, ny, nx] = self.source_shape;
        [
            nt,
            nz,
            ny + 2 * self.halo.meridional,
            nx + 2 * self.halo.zonal,
        ]
    }

    pub fn chunk_shape(&self) -> [usize; 4] {
        self.chunk
    }

    /// Whether `dim` is split over more than one chunk.
    pub fn is_dimension_chunked(&self, dim: Dim) -> bool {
        let axis = dim.axis();
        self.chunk[axis] < self.source_shape[axis]
    }

    pub fn transform(&self) -> &ValueTransform {
        &self.transform
    }

    /// Time indices currently readable.
    pub fn window(&self) -> &[usize] {
        &self.window
    }

    /// Time indices that entered the window at the last window change.
    pub fn loaded_time_indices(&self) -> &[usize] {
        &self.loaded
    }

    /// Add a periodic halo of `halosize` cells on the requested axes.
    pub fn add_halo(&mut self, zonal: bool, meridional: bool, halosize: usize) -> Result<()> {
        if zonal {
            if self.halo.zonal > 0 {
                return Err(FieldError::configuration("buffer already has a zonal halo"));
            }
            self.halo.zonal = halosize;
        }
        if meridional {
            if self.halo.meridional > 0 {
                return Err(FieldError::configuration(
                    "buffer already has a meridional halo",
                ));
            }
            self.halo.meridional = halosize;
        }
        Ok(())
    }

    /// Replace the resident window.
    ///
    /// Chunks of slices leaving the window are released. When untouched
    /// eviction is enabled, chunks of retained slices that no sample read
    /// since the previous call are released as well.
    pub fn set_window(&mut self, window: Vec<usize>) -> Result<usize> {
        let nt = self.source_shape[0];
        if let Some(&bad) = window.iter().find(|&&t| t >= nt) {
            return Err(FieldError::configuration(format!(
                "window index {bad} outside {nt} time levels"
            )));
        }
        let evict_untouched = self.evict_untouched;
        let arena = self
            .arena
            .get_mut()
            .map_err(|_| FieldError::lock("chunk arena"))?;
        let released = arena.retain(|key, chunk| {
            window.contains(&key[0]) && (chunk.touched || !evict_untouched)
        });
        arena.clear_touched();
        self.edited.retain(|t, _| window.contains(t));

        debug!(?window, released, resident = arena.memory_usage(), "moved window");
        self.loaded = window
            .iter()
            .copied()
            .filter(|t| !self.window.contains(t))
            .collect();
        self.window = window;
        Ok(released)
    }

    /// Rewrite resident time slice `t` in place.
    ///
    /// `f` receives the slice as shape (1, nz, ny, nx) including any halo.
    /// The edit holds until `t` leaves the window; reading the slice back
    /// in later starts again from the source.
    pub fn update_slice(
        &mut self,
        t: usize,
        f: impl FnOnce(&mut NdArray) -> Result<()>,
    ) -> Result<()> {
        if !self.window.contains(&t) {
            return Err(FieldError::NotResident {
                time_index: t,
                window: self.window.clone(),
            });
        }
        let [_, nz, ny, nx] = self.source_shape;
        let base = match self.edited.get(&t) {
            Some(slice) => slice.clone(),
            None => self.source_slice(t)?,
        };
        let mut logical = self.with_halo(&base);
        f(&mut logical)?;
        let [_, _, ly, lx] = self.shape();
        if logical.shape() != [1, nz, ly, lx] {
            return Err(FieldError::configuration(format!(
                "edited slice {t} has shape {:?}, expected {:?}",
                logical.shape(),
                [1, nz, ly, lx]
            )));
        }
        let (hy, hx) = (self.halo.meridional, self.halo.zonal);
        let dtype = self.transform.dtype;
        let edited = NdArray::from_fn(vec![1, nz, ny, nx], |idx| {
            dtype.cast(logical.get(&[0, idx[1], idx[2] + hy, idx[3] + hx]))
        });
        trace!(t, "edited resident slice");
        self.edited.insert(t, edited);
        Ok(())
    }

    /// Time slice `t` from the source with transforms applied, no halo.
    fn source_slice(&self, t: usize) -> Result<NdArray> {
        let [_, nz, ny, nx] = self.source_shape;
        let raw = self.source.read([t, 0, 0, 0], [1, nz, ny, nx])?;
        let values = raw.into_iter().map(|v| self.transform.apply(v)).collect();
        NdArray::new(vec![1, nz, ny, nx], values)
    }

    /// Expand a source-space slice to the logical shape.
    fn with_halo(&self, slice: &NdArray) -> NdArray {
        let [_, nz, ny, nx] = self.source_shape;
        let [_, _, ly, lx] = self.shape();
        NdArray::from_fn(vec![1, nz, ly, lx], |idx| {
            let ys = Halo::remap(self.halo.meridional, ny, idx[2]);
            let xs = Halo::remap(self.halo.zonal, nx, idx[3]);
            slice.get(&[0, idx[1], ys, xs])
        })
    }

    /// Read one value; the time index must be inside the window.
    pub fn value(&self, t: usize, z: usize, y: usize, x: usize) -> Result<f64> {
        if !self.window.contains(&t) {
            return Err(FieldError::NotResident {
                time_index: t,
                window: self.window.clone(),
            });
        }
        let [_, _, ny, nx] = self.source_shape;
        let ys = Halo::remap(self.halo.meridional, ny, y);
        let xs = Halo::remap(self.halo.zonal, nx, x);
        let idx = [t, z, ys, xs];
        if let Some(slice) = self.edited.get(&t) {
            return Ok(slice.get(&[0, z, ys, xs]));
        }

        let key: ChunkKey = [t, z / self.chunk[1], ys / self.chunk[2], xs / self.chunk[3]];
        let local = [0, z % self.chunk[1], ys % self.chunk[2], xs % self.chunk[3]];

        let mut arena = self
            .arena
            .write()
            .map_err(|_| FieldError::lock("chunk arena"))?;
        if let Some(chunk) = arena.get_mut(&key) {
            chunk.touched = true;
            return Ok(chunk.value(local));
        }

        let chunk = self.load_chunk(key)?;
        trace!(?idx, ?key, "loaded chunk");
        let value = chunk.value(local);
        arena.insert(key, chunk)?;
        Ok(value)
    }

    fn load_chunk(&self, key: ChunkKey) -> Result<Chunk> {
        let mut start = [0usize; 4];
        let mut shape = [0usize; 4];
        for axis in 0..4 {
            start[axis] = key[axis] * self.chunk[axis];
            shape[axis] = self.chunk[axis].min(self.source_shape[axis] - start[axis]);
        }
        let raw = self.source.read(start, shape)?;
        let data = match self.transform.dtype {
            Dtype::Float32 => {
                ChunkData::F32(raw.into_iter().map(|v| self.transform.apply(v) as f32).collect())
            }
            Dtype::Float64 => {
                ChunkData::F64(raw.into_iter().map(|v| self.transform.apply(v)).collect())
            }
        };
        Ok(Chunk {
            data,
            shape,
            touched: true,
        })
    }

    /// Copy a block of resident data into a dense array.
    pub fn materialize(&self, start: [usize; 4], shape: [usize; 4]) -> Result<NdArray> {
        let logical = self.shape();
        for axis in 0..4 {
            if start[axis] + shape[axis] > logical[axis] {
                return Err(FieldError::configuration(format!(
                    "block {shape:?} at {start:?} exceeds shape {logical:?}"
                )));
            }
        }
        let mut data = Vec::with_capacity(shape.iter().product());
        for t in 0..shape[0] {
            for z in 0..shape[1] {
                for y in 0..shape[2] {
                    for x in 0..shape[3] {
                        data.push(self.value(
                            start[0] + t,
                            start[1] + z,
                            start[2] + y,
                            start[3] + x,
                        )?);
                    }
                }
            }
        }
        NdArray::new(shape.to_vec(), data)
    }

    /// Read a full time slice straight from the source, bypassing the
    /// window. The result has shape (1, nz, ny, nx) including any halo.
    /// Edited slices are returned as edited.
    pub fn read_slice(&self, t: usize) -> Result<NdArray> {
        match self.edited.get(&t) {
            Some(slice) => Ok(self.with_halo(slice)),
            None => Ok(self.with_halo(&self.source_slice(t)?)),
        }
    }

    /// Bytes held by resident chunks and edited slices.
    pub fn resident_bytes(&self) -> usize {
        let edited: usize = self
            .edited
            .values()
            .map(|s| s.len() * self.transform.dtype.width())
            .sum();
        edited + self.arena.read().map(|a| a.memory_usage()).unwrap_or(0)
    }

    pub fn resident_chunks(&self) -> usize {
        self.arena.read().map(|a| a.len()).unwrap_or(0)
    }

    /// Time indices that have at least one chunk in memory.
    pub fn resident_times(&self) -> Vec<usize> {
        self.arena
            .read()
            .map(|a| a.resident_times())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> ArenaStats {
        self.arena.read().map(|a| a.stats()).unwrap_or_default()
    }
}

/// Pick the chunk extent for a source of shape `shape`.
///
/// Time is always chunked per slice. `Auto` keeps the storage chunking when
/// it fits `target_bytes`; otherwise the largest spatial extent is halved
/// until the chunk fits.
fn negotiate_chunk_shape(
    chunksize: &ChunkSize,
    shape: [usize; 4],
    native: Option<[usize; 4]>,
    dtype: Dtype,
    target_bytes: usize,
) -> [usize; 4] {
    let [_, nz, ny, nx] = shape;
    let bytes = |c: &[usize; 4]| c.iter().product::<usize>() * dtype.width();

    match chunksize {
        ChunkSize::Disabled => [1, nz, ny, nx],
        ChunkSize::Explicit(sizes) => {
            let mut chunk = [1, nz, ny, nx];
            for (dim, (_, len)) in sizes {
                let axis = dim.axis();
                if axis > 0 {
                    chunk[axis] = (*len).clamp(1, shape[axis]);
                }
            }
            chunk
        }
        ChunkSize::Auto => {
            if let Some(native) = native {
                let chunk = [
                    1,
                    native[1].clamp(1, nz),
                    native[2].clamp(1, ny),
                    native[3].clamp(1, nx),
                ];
                if bytes(&chunk) <= target_bytes {
                    return chunk;
                }
            }
            let mut chunk = [1, nz, ny, nx];
            while bytes(&chunk) > target_bytes {
                let axis = (1..4).max_by_key(|&a| chunk[a]).unwrap_or(3);
                if chunk[axis] == 1 {
                    break;
                }
                chunk[axis] = chunk[axis].div_ceil(2);
            }
            chunk
        }
    }
}

/// Time indices to keep resident for a step from `bracket` in direction
/// `dt_sign`: the bracketing slices plus one prefetched slice ahead.
///
/// At most three indices, sorted. Periodic axes wrap around.
pub fn window_for(bracket: &TimeBracket, nt: usize, dt_sign: f64, periodic: bool) -> Vec<usize> {
    if nt == 0 {
        return Vec::new();
    }
    let step = |i: usize, forward: bool| -> Option<usize> {
        match (forward, periodic) {
            (true, true) => Some((i + 1) % nt),
            (false, true) => Some((i + nt - 1) % nt),
            (true, false) => (i + 1 < nt).then_some(i + 1),
            (false, false) => i.checked_sub(1),
        }
    };

    let forward = dt_sign >= 0.0;
    let mut window = vec![bracket.ti, bracket.ti_next];
    let prefetch = if forward {
        step(bracket.ti_next, true)
    } else {
        step(bracket.ti, false)
    };
    if bracket.ti == bracket.ti_next {
        window.extend(step(bracket.ti, forward));
    } else {
        window.extend(prefetch);
    }
    window.sort_unstable();
    window.dedup();
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            chunk_memory_budget_mb: 1,
            auto_chunk_target_mb: 1,
            evict_untouched_chunks: false,
        }
    }

    fn ramp(shape: [usize; 4]) -> Box<dyn ChunkSource> {
        let data = NdArray::from_fn(shape.to_vec(), |i| {
            (i[0] * 1000 + i[1] * 100 + i[2] * 10 + i[3]) as f64
        });
        Box::new(ArraySource::new(data).unwrap())
    }

    fn bracket(ti: usize, ti_next: usize) -> TimeBracket {
        TimeBracket {
            ti,
            ti_next,
            tau: 0.5,
            time: 0.0,
        }
    }

    #[test]
    fn test_value_requires_window() {
        let mut buffer = ChunkedBuffer::new(
            ramp([3, 1, 2, 2]),
            &ChunkSize::Auto,
            ValueTransform::default(),
            &config(),
        )
        .unwrap();

        let err = buffer.value(1, 0, 1, 1).unwrap_err();
        assert!(matches!(err, FieldError::NotResident { time_index: 1, .. }));

        buffer.set_window(vec![0, 1]).unwrap();
        assert_eq!(buffer.value(1, 0, 1, 1).unwrap(), 1011.0);
        assert_eq!(buffer.resident_times(), vec![1]);
    }

    #[test]
    fn test_window_move_releases_chunks() {
        let mut buffer = ChunkedBuffer::new(
            ramp([4, 1, 2, 2]),
            &ChunkSize::Disabled,
            ValueTransform::default(),
            &config(),
        )
        .unwrap();
        buffer.set_window(vec![0, 1]).unwrap();
        buffer.value(0, 0, 0, 0).unwrap();
        buffer.value(1, 0, 0, 0).unwrap();
        let slice_bytes = 4 * 4;
        assert_eq!(buffer.resident_bytes(), 2 * slice_bytes);

        let released = buffer.set_window(vec![1, 2]).unwrap();
        assert_eq!(released, 1);
        assert_eq!(buffer.resident_times(), vec![1]);
    }

    #[test]
    fn test_untouched_chunks_evicted() {
        let mut cfg = config();
        cfg.evict_untouched_chunks = true;
        let mut buffer = ChunkedBuffer::new(
            ramp([2, 1, 4, 4]),
            &ChunkSize::Explicit([(Dim::Lon, ("x".to_string(), 2))].into()),
            ValueTransform::default(),
            &cfg,
        )
        .unwrap();
        assert!(buffer.is_dimension_chunked(Dim::Lon));
        assert!(!buffer.is_dimension_chunked(Dim::Lat));

        buffer.set_window(vec![0, 1]).unwrap();
        buffer.value(0, 0, 0, 0).unwrap();
        buffer.value(0, 0, 0, 3).unwrap();
        buffer.set_window(vec![0, 1]).unwrap();
        // both chunks were touched before the move and survive it
        assert_eq!(buffer.stats().entries, 2);

        buffer.value(0, 0, 0, 0).unwrap();
        buffer.set_window(vec![0, 1]).unwrap();
        assert_eq!(buffer.stats().entries, 1);
    }

    #[test]
    fn test_loaded_indices_are_new_window_entries() {
        let mut buffer = ChunkedBuffer::new(
            ramp([5, 1, 2, 2]),
            &ChunkSize::Auto,
            ValueTransform::default(),
            &config(),
        )
        .unwrap();
        buffer.set_window(vec![0, 1, 2]).unwrap();
        assert_eq!(buffer.loaded_time_indices(), &[0, 1, 2]);
        buffer.set_window(vec![1, 2, 3]).unwrap();
        assert_eq!(buffer.loaded_time_indices(), &[3]);
        buffer.set_window(vec![1, 2, 3]).unwrap();
        assert!(buffer.loaded_time_indices().is_empty());
    }

    #[test]
    fn test_edited_slice_lives_until_it_leaves_the_window() {
        let mut buffer = ChunkedBuffer::new(
            ramp([3, 1, 2, 2]),
            &ChunkSize::Auto,
            ValueTransform::default(),
            &config(),
        )
        .unwrap();
        buffer.add_halo(true, false, 1).unwrap();
        buffer.set_window(vec![0, 1]).unwrap();
        // warm the chunk cache first so the edit has to shadow it
        assert_eq!(buffer.value(1, 0, 1, 1).unwrap(), 1010.0);

        buffer
            .update_slice(1, |slice| {
                assert_eq!(slice.shape(), &[1, 1, 2, 4]);
                slice.data_mut().iter_mut().for_each(|v| *v = -*v);
                Ok(())
            })
            .unwrap();
        assert_eq!(buffer.value(1, 0, 1, 1).unwrap(), -1010.0);
        assert_eq!(buffer.value(1, 0, 1, 0).unwrap(), -1011.0);
        assert_eq!(buffer.value(0, 0, 1, 1).unwrap(), 10.0);
        assert_eq!(buffer.read_slice(1).unwrap().get(&[0, 0, 0, 1]), -1000.0);

        let err = buffer.update_slice(2, |_| Ok(())).unwrap_err();
        assert!(matches!(err, FieldError::NotResident { time_index: 2, .. }));

        buffer.set_window(vec![1, 2]).unwrap();
        assert_eq!(buffer.value(1, 0, 1, 1).unwrap(), -1010.0);
        buffer.set_window(vec![2]).unwrap();
        buffer.set_window(vec![1, 2]).unwrap();
        assert_eq!(buffer.value(1, 0, 1, 1).unwrap(), 1010.0);
    }

    #[test]
    fn test_transform_clips_and_casts() {
        let transform = ValueTransform {
            vmin: Some(5.0),
            vmax: Some(1010.0),
            dtype: Dtype::Float32,
        };
        let mut buffer =
            ChunkedBuffer::new(ramp([2, 1, 2, 2]), &ChunkSize::Auto, transform, &config()).unwrap();
        buffer.set_window(vec![0, 1]).unwrap();
        assert_eq!(buffer.value(0, 0, 0, 1).unwrap(), 0.0);
        assert_eq!(buffer.value(0, 0, 1, 1).unwrap(), 11.0);
        assert_eq!(buffer.value(1, 0, 1, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_zonal_halo_remap() {
        let mut buffer = ChunkedBuffer::new(
            ramp([1, 1, 1, 4]),
            &ChunkSize::Auto,
            ValueTransform::default(),
            &config(),
        )
        .unwrap();
        buffer.add_halo(true, false, 2).unwrap();
        buffer.set_window(vec![0]).unwrap();

        assert_eq!(buffer.shape(), [1, 1, 1, 8]);
        let row = buffer.materialize([0, 0, 0, 0], [1, 1, 1, 8]).unwrap();
        assert_eq!(row.data(), &[2.0, 3.0, 0.0, 1.0, 2.0, 3.0, 0.0, 1.0]);
        assert_eq!(buffer.read_slice(0).unwrap(), row);
        assert!(buffer.add_halo(true, false, 1).is_err());
    }

    #[test]
    fn test_oversized_chunk_is_resource_exhaustion() {
        let cfg = EngineConfig {
            chunk_memory_budget_mb: 1,
            auto_chunk_target_mb: 1,
            evict_untouched_chunks: true,
        };
        let source = Box::new(
            ArraySource::new(NdArray::filled(vec![1, 1, 1024, 1024], 0.0)).unwrap(),
        );
        let err = ChunkedBuffer::new(
            source,
            &ChunkSize::Disabled,
            ValueTransform {
                dtype: Dtype::Float64,
                ..Default::default()
            },
            &cfg,
        )
        .unwrap_err();
        assert!(matches!(err, FieldError::ResourceExhaustion { .. }));
    }

    #[test]
    fn test_auto_chunking_halves_largest_axis() {
        let chunk = negotiate_chunk_shape(
            &ChunkSize::Auto,
            [10, 1, 100, 400],
            None,
            Dtype::Float32,
            100 * 100 * 4,
        );
        assert_eq!(chunk, [1, 1, 100, 100]);

        let native = negotiate_chunk_shape(
            &ChunkSize::Auto,
            [10, 1, 100, 400],
            Some([1, 1, 50, 50]),
            Dtype::Float32,
            100 * 100 * 4,
        );
        assert_eq!(native, [1, 1, 50, 50]);
    }

    #[test]
    fn test_window_for_directions() {
        assert_eq!(window_for(&bracket(2, 3), 10, 1.0, false), vec![2, 3, 4]);
        assert_eq!(window_for(&bracket(2, 3), 10, -1.0, false), vec![1, 2, 3]);
        assert_eq!(window_for(&bracket(8, 9), 10, 1.0, false), vec![8, 9]);
        assert_eq!(window_for(&bracket(9, 0), 10, 1.0, true), vec![0, 1, 9]);
        assert_eq!(window_for(&bracket(0, 0), 1, 1.0, false), vec![0]);
    }
}
