//! Grids: coordinate systems shared by one or more fields.
//!
//! A [`Grid`] is immutable once built. Everything that changes during a run
//! (the resident time window, loaded chunks) lives in the field buffers, so
//! a grid can be shared behind an `Arc` and read from any sampling call.
//! Derived geometry (cell edge lengths and areas) is memoised on first use.

mod geometry;
mod search;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use field_common::{Extent, Mesh, TimeConverter};
use tracing::{debug, warn};

use crate::array::NdArray;
use crate::error::{FieldError, Result};
use crate::types::GridKind;

pub use search::{Location, SearchSeed, TimeBracket};
pub(crate) use search::cell_corners;

/// Vertical coordinate of a grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Depth {
    /// One depth per layer, shared by every column.
    Z(Vec<f64>),
    /// Per-column depths with shape (nt or 1, nz, ny, nx).
    S { values: NdArray, time_varying: bool },
}

impl Depth {
    pub fn zdim(&self) -> usize {
        match self {
            Self::Z(levels) => levels.len(),
            Self::S { values, .. } => values.shape()[1],
        }
    }
}

/// Lifecycle of a grid's resident time window within a field set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GridState {
    /// File-backed and nothing materialised yet.
    Unloaded,
    /// The listed time indices are resident.
    Windowed { first: usize, last: usize },
    /// A forward window swap is in progress.
    Advancing,
    /// A backward window swap is in progress.
    Retreating,
}

/// Options that influence [`Grid::locate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocateOptions {
    pub allow_time_extrapolation: bool,
    /// Period of the time axis in seconds.
    pub time_periodic: Option<f64>,
    /// Skip the vertical search (surface fields on 3-D grids).
    pub search_2d: bool,
    /// Starting cell for the curvilinear search.
    pub seed: Option<SearchSeed>,
}

/// Spatial and temporal coordinates of one or more fields.
#[derive(Debug, Clone)]
pub struct Grid {
    /// 1-D (nx) for rectilinear grids, 2-D (ny, nx) for curvilinear ones.
    lon: NdArray,
    lat: NdArray,
    depth: Depth,
    time: Vec<f64>,
    time_origin: TimeConverter,
    mesh: Mesh,
    extent: Extent,
    /// Rectilinear spherical longitudes made monotonic across the seam.
    lon_unwrapped: Vec<f64>,
    zonal_periodic: bool,
    zonal_halo: usize,
    meridional_halo: usize,
    cell_edge_sizes: OnceLock<(Vec<f64>, Vec<f64>)>,
    cell_areas: OnceLock<Vec<f64>>,
}

impl Grid {
    /// Build a grid from coordinate arrays.
    ///
    /// The topology follows from the array ranks: 1-D lon/lat are
    /// rectilinear, 2-D curvilinear; a 1-D depth is a Z-grid, a 3-D or 4-D
    /// depth an S-grid. Missing depth or time collapse to a single level.
    pub fn new(
        lon: NdArray,
        lat: NdArray,
        depth: Option<NdArray>,
        time: Option<Vec<f64>>,
        time_origin: TimeConverter,
        mesh: Mesh,
    ) -> Result<Self> {
        let time = time.unwrap_or_else(|| vec![0.0]);
        let (ny, nx) = match (lon.ndim(), lat.ndim()) {
            (1, 1) => (lat.len(), lon.len()),
            (2, 2) if lon.shape() == lat.shape() => (lon.shape()[0], lon.shape()[1]),
            _ => {
                return Err(FieldError::configuration(format!(
                    "lon {:?} and lat {:?} must both be 1-D or both 2-D of equal shape",
                    lon.shape(),
                    lat.shape()
                )))
            }
        };
        if nx == 0 || ny == 0 {
            return Err(FieldError::configuration("grid has an empty horizontal axis"));
        }

        let depth = match depth {
            None => Depth::Z(vec![0.0]),
            Some(d) if d.ndim() == 1 => Depth::Z(d.into_vec()),
            Some(d) if d.ndim() == 3 => {
                let shape = d.shape().to_vec();
                Depth::S {
                    values: d.reshape(vec![1, shape[0], shape[1], shape[2]])?,
                    time_varying: false,
                }
            }
            Some(d) if d.ndim() == 4 => {
                if d.shape()[0] != time.len() {
                    return Err(FieldError::configuration(format!(
                        "4-D depth has {} time levels but the grid has {}",
                        d.shape()[0],
                        time.len()
                    )));
                }
                Depth::S {
                    values: d,
                    time_varying: true,
                }
            }
            Some(d) => {
                return Err(FieldError::configuration(format!(
                    "depth must be 1-D, 3-D or 4-D, got shape {:?}",
                    d.shape()
                )))
            }
        };

        Self::from_parts(lon, lat, depth, time, time_origin, mesh, false, 0, 0)
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        lon: NdArray,
        lat: NdArray,
        depth: Depth,
        time: Vec<f64>,
        time_origin: TimeConverter,
        mesh: Mesh,
        zonal_periodic: bool,
        zonal_halo: usize,
        meridional_halo: usize,
    ) -> Result<Self> {
        validate_time(&time)?;
        let (ny, nx) = if lon.ndim() == 1 {
            (lat.len(), lon.len())
        } else {
            (lon.shape()[0], lon.shape()[1])
        };
        match &depth {
            Depth::Z(levels) => validate_monotonic("depth", levels)?,
            Depth::S { values, .. } => {
                let s = values.shape();
                if s[2] != ny || s[3] != nx {
                    return Err(FieldError::configuration(format!(
                        "S-grid depth {:?} does not match horizontal shape ({ny}, {nx})",
                        s
                    )));
                }
            }
        }
        if lat.ndim() == 1 && lat.len() > 1 && !lat.data().windows(2).all(|w| w[1] > w[0]) {
            return Err(FieldError::configuration(
                "rectilinear latitude must be strictly increasing",
            ));
        }

        let extent = Extent::from_coordinates(lon.data(), lat.data())
            .ok_or_else(|| FieldError::configuration("grid has no finite coordinates"))?;

        let lon_unwrapped = if lon.ndim() == 1 && mesh.is_spherical() {
            unwrap_longitudes(lon.data())
        } else {
            lon.data().to_vec()
        };

        Ok(Self {
            lon,
            lat,
            depth,
            time,
            time_origin,
            mesh,
            extent,
            lon_unwrapped,
            zonal_periodic,
            zonal_halo,
            meridional_halo,
            cell_edge_sizes: OnceLock::new(),
            cell_areas: OnceLock::new(),
        })
    }

    pub fn kind(&self) -> GridKind {
        match (self.lon.ndim() == 2, &self.depth) {
            (false, Depth::Z(_)) => GridKind::RectilinearZ,
            (false, Depth::S { .. }) => GridKind::RectilinearS,
            (true, Depth::Z(_)) => GridKind::CurvilinearZ,
            (true, Depth::S { .. }) => GridKind::CurvilinearS,
        }
    }

    pub fn xdim(&self) -> usize {
        *self.lon.shape().last().unwrap_or(&0)
    }

    pub fn ydim(&self) -> usize {
        if self.lat.ndim() == 1 {
            self.lat.len()
        } else {
            self.lat.shape()[0]
        }
    }

    pub fn zdim(&self) -> usize {
        self.depth.zdim()
    }

    pub fn tdim(&self) -> usize {
        self.time.len()
    }

    /// Canonical (t, z, y, x) shape of data on this grid.
    pub fn shape(&self) -> [usize; 4] {
        [self.tdim(), self.zdim(), self.ydim(), self.xdim()]
    }

    pub fn lon(&self) -> &NdArray {
        &self.lon
    }

    pub fn lat(&self) -> &NdArray {
        &self.lat
    }

    pub fn depth(&self) -> &Depth {
        &self.depth
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn time_origin(&self) -> &TimeConverter {
        &self.time_origin
    }

    pub fn mesh(&self) -> Mesh {
        self.mesh
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn is_zonal_periodic(&self) -> bool {
        self.zonal_periodic
    }

    pub fn zonal_halo(&self) -> usize {
        self.zonal_halo
    }

    pub fn meridional_halo(&self) -> usize {
        self.meridional_halo
    }

    /// Longitude of node (y, x).
    pub fn lon_at(&self, y: usize, x: usize) -> f64 {
        if self.lon.ndim() == 1 {
            self.lon.data()[x]
        } else {
            self.lon.get(&[y, x])
        }
    }

    /// Latitude of node (y, x).
    pub fn lat_at(&self, y: usize, x: usize) -> f64 {
        if self.lat.ndim() == 1 {
            self.lat.data()[y]
        } else {
            self.lat.get(&[y, x])
        }
    }

    /// Structural equality of every coordinate and the time origin.
    ///
    /// Two grids for which this holds are interchangeable.
    pub fn same_coordinates(&self, other: &Grid) -> bool {
        self.mesh == other.mesh
            && self.time_origin == other.time_origin
            && self.zonal_periodic == other.zonal_periodic
            && self.zonal_halo == other.zonal_halo
            && self.meridional_halo == other.meridional_halo
            && self.lon == other.lon
            && self.lat == other.lat
            && self.depth == other.depth
            && self.time == other.time
    }

    /// Hash of the coordinate contents, consistent with
    /// [`same_coordinates`](Self::same_coordinates).
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.mesh.hash(&mut hasher);
        hash_floats(&mut hasher, self.lon.shape(), self.lon.data());
        hash_floats(&mut hasher, self.lat.shape(), self.lat.data());
        match &self.depth {
            Depth::Z(levels) => hash_floats(&mut hasher, &[levels.len()], levels),
            Depth::S { values, .. } => hash_floats(&mut hasher, values.shape(), values.data()),
        }
        hash_floats(&mut hasher, &[self.time.len()], &self.time);
        self.zonal_periodic.hash(&mut hasher);
        self.zonal_halo.hash(&mut hasher);
        self.meridional_halo.hash(&mut hasher);
        hasher.finish()
    }

    /// Bracket `time` on this grid's time axis.
    pub fn time_bracket(
        &self,
        time: f64,
        allow_extrapolation: bool,
        time_periodic: Option<f64>,
    ) -> Result<TimeBracket> {
        search::time_bracket(&self.time, time, allow_extrapolation, time_periodic)
    }

    /// Resolve a space-time point to bracketing indices and weights.
    pub fn locate(
        &self,
        time: f64,
        depth: f64,
        lat: f64,
        lon: f64,
        options: &LocateOptions,
    ) -> Result<Location> {
        let bracket = self.time_bracket(
            time,
            options.allow_time_extrapolation,
            options.time_periodic,
        )?;
        search::locate(self, bracket, depth, lat, lon, options)
    }

    /// Per-cell edge lengths (zonal, meridional) in metres on a spherical
    /// mesh, shape (ny, nx).
    pub fn cell_edge_sizes(&self) -> &(Vec<f64>, Vec<f64>) {
        self.cell_edge_sizes
            .get_or_init(|| geometry::cell_edge_sizes(self))
    }

    /// Per-cell area, shape (ny, nx).
    pub fn cell_areas(&self) -> &[f64] {
        self.cell_areas.get_or_init(|| {
            let (dx, dy) = self.cell_edge_sizes();
            dx.iter().zip(dy).map(|(a, b)| a * b).collect()
        })
    }

    /// Copy of this grid with periodic halo cells added.
    ///
    /// The zonal halo prepends the last `halosize` columns and appends the
    /// first `halosize`, shifted by one full period; the meridional halo
    /// does the same for rows. S-grid depths are extended alongside.
    pub fn with_periodic_halo(&self, zonal: bool, meridional: bool, halosize: usize) -> Result<Grid> {
        if self.kind().is_curvilinear() {
            return Err(FieldError::unsupported(
                "periodic halo is only supported on rectilinear grids",
            ));
        }
        if halosize == 0 {
            return Err(FieldError::configuration("halosize must be at least 1"));
        }
        if zonal && self.zonal_periodic {
            return Err(FieldError::configuration("grid already has a zonal halo"));
        }

        let mut lon = self.lon.clone();
        let mut lat = self.lat.clone();
        let mut depth = self.depth.clone();

        if zonal {
            lon = periodic_extend(&lon, "lon", halosize)?;
            depth = extend_s_depth(depth, 3, halosize)?;
        }
        if meridional {
            lat = periodic_extend(&lat, "lat", halosize)?;
            depth = extend_s_depth(depth, 2, halosize)?;
        }
        debug!(zonal, meridional, halosize, "added periodic halo");

        Self::from_parts(
            lon,
            lat,
            depth,
            self.time.clone(),
            self.time_origin,
            self.mesh,
            self.zonal_periodic || zonal,
            self.zonal_halo + if zonal { halosize } else { 0 },
            self.meridional_halo + if meridional { halosize } else { 0 },
        )
    }

    /// Copy of this grid with its time axis expressed relative to `origin`.
    pub fn rebased(&self, origin: TimeConverter) -> Result<Grid> {
        let offset = origin.offset_to(&self.time_origin)?;
        let time = self.time.iter().map(|t| t + offset).collect();
        Self::from_parts(
            self.lon.clone(),
            self.lat.clone(),
            self.depth.clone(),
            time,
            origin,
            self.mesh,
            self.zonal_periodic,
            self.zonal_halo,
            self.meridional_halo,
        )
    }

    /// Restore halo metadata for a grid whose coordinates already include
    /// the halo cells (as written to disk).
    pub fn with_halo_metadata(
        self,
        zonal_periodic: bool,
        zonal_halo: usize,
        meridional_halo: usize,
    ) -> Result<Grid> {
        Self::from_parts(
            self.lon,
            self.lat,
            self.depth,
            self.time,
            self.time_origin,
            self.mesh,
            zonal_periodic,
            zonal_halo,
            meridional_halo,
        )
    }

    pub(crate) fn lon_unwrapped(&self) -> &[f64] {
        &self.lon_unwrapped
    }
}

fn hash_floats(hasher: &mut DefaultHasher, shape: &[usize], values: &[f64]) {
    shape.hash(hasher);
    for v in values {
        v.to_bits().hash(hasher);
    }
}

fn validate_time(time: &[f64]) -> Result<()> {
    if time.is_empty() {
        return Err(FieldError::configuration("time axis is empty"));
    }
    if !time.windows(2).all(|w| w[1] > w[0]) {
        return Err(FieldError::configuration("time must be strictly increasing"));
    }
    Ok(())
}

fn validate_monotonic(name: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(FieldError::configuration(format!("{name} axis is empty")));
    }
    let up = values.windows(2).all(|w| w[1] > w[0]);
    let down = values.windows(2).all(|w| w[1] < w[0]);
    if !(up || down) {
        return Err(FieldError::configuration(format!(
            "{name} must be strictly monotonic"
        )));
    }
    Ok(())
}

/// Add 360 to every longitude after the first drop across the seam.
fn unwrap_longitudes(lon: &[f64]) -> Vec<f64> {
    let mut out = lon.to_vec();
    if let Some(first) = out.first().copied() {
        if let Some(pos) = out.iter().position(|&v| v < first) {
            for v in &mut out[pos..] {
                *v += 360.0;
            }
        }
    }
    out
}

fn periodic_extend(coord: &NdArray, name: &str, halosize: usize) -> Result<NdArray> {
    let v = coord.data();
    let n = v.len();
    if n < 2 || n < halosize {
        return Err(FieldError::unsupported(format!(
            "{name} has {n} points, fewer than halo size {halosize}"
        )));
    }
    if ((v[1] - v[0]) - (v[n - 1] - v[n - 2])).abs() > 1e-6 * (v[1] - v[0]).abs().max(1.0) {
        warn!(
            axis = name,
            "halo spacing differs between the first and last cells"
        );
    }
    let shift = v[n - 1] - 2.0 * v[0] + v[1];
    let mut out = Vec::with_capacity(n + 2 * halosize);
    out.extend(v[n - halosize..].iter().map(|x| x - shift));
    out.extend_from_slice(v);
    out.extend(v[..halosize].iter().map(|x| x + shift));
    Ok(NdArray::from_vec(out))
}

fn extend_s_depth(depth: Depth, axis: usize, halosize: usize) -> Result<Depth> {
    match depth {
        Depth::S {
            values,
            time_varying,
        } => {
            let n = values.shape()[axis];
            let tail = values.slice_axis(axis, n - halosize, halosize);
            let head = values.slice_axis(axis, 0, halosize);
            Ok(Depth::S {
                values: NdArray::concatenate(&[&tail, &values, &head], axis)?,
                time_varying,
            })
        }
        z => Ok(z),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_grid(lon: Vec<f64>, lat: Vec<f64>) -> Grid {
        Grid::new(
            NdArray::from_vec(lon),
            NdArray::from_vec(lat),
            None,
            None,
            TimeConverter::numeric(),
            Mesh::Flat,
        )
        .unwrap()
    }

    #[test]
    fn test_kind_inference() {
        let g = flat_grid(vec![0.0, 1.0], vec![0.0, 1.0]);
        assert_eq!(g.kind(), GridKind::RectilinearZ);
        assert_eq!(g.shape(), [1, 1, 2, 2]);

        let lon = NdArray::from_fn(vec![2, 3], |i| i[1] as f64);
        let lat = NdArray::from_fn(vec![2, 3], |i| i[0] as f64);
        let depth = NdArray::from_fn(vec![4, 2, 3], |i| i[0] as f64 * 10.0);
        let g = Grid::new(lon, lat, Some(depth), None, TimeConverter::numeric(), Mesh::Flat).unwrap();
        assert_eq!(g.kind(), GridKind::CurvilinearS);
        assert_eq!(g.shape(), [1, 4, 2, 3]);
    }

    #[test]
    fn test_rejects_bad_axes() {
        let time_err = Grid::new(
            NdArray::from_vec(vec![0.0, 1.0]),
            NdArray::from_vec(vec![0.0, 1.0]),
            None,
            Some(vec![0.0, 0.0]),
            TimeConverter::numeric(),
            Mesh::Flat,
        );
        assert!(time_err.is_err());

        let depth_err = Grid::new(
            NdArray::from_vec(vec![0.0, 1.0]),
            NdArray::from_vec(vec![0.0, 1.0]),
            Some(NdArray::from_vec(vec![0.0, 5.0, 2.0])),
            None,
            TimeConverter::numeric(),
            Mesh::Flat,
        );
        assert!(depth_err.is_err());

        let mixed = Grid::new(
            NdArray::from_fn(vec![2, 2], |_| 0.0),
            NdArray::from_vec(vec![0.0, 1.0]),
            None,
            None,
            TimeConverter::numeric(),
            Mesh::Flat,
        );
        assert!(mixed.is_err());
    }

    #[test]
    fn test_same_coordinates_and_fingerprint() {
        let a = flat_grid(vec![0.0, 1.0, 2.0], vec![0.0, 1.0]);
        let b = flat_grid(vec![0.0, 1.0, 2.0], vec![0.0, 1.0]);
        let c = flat_grid(vec![0.0, 1.0, 3.0], vec![0.0, 1.0]);
        assert!(a.same_coordinates(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(!a.same_coordinates(&c));
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_zonal_halo() {
        let g = flat_grid(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0]);
        let h = g.with_periodic_halo(true, false, 2).unwrap();
        assert_eq!(h.lon().data(), &[-2.0, -1.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(h.is_zonal_periodic());
        assert_eq!(h.zonal_halo(), 2);
        assert!(h.with_periodic_halo(true, false, 1).is_err());
    }

    #[test]
    fn test_halo_wider_than_grid() {
        let g = flat_grid(vec![0.0, 1.0], vec![0.0, 1.0]);
        let err = g.with_periodic_halo(true, false, 3).unwrap_err();
        assert!(matches!(err, FieldError::UnsupportedTopology(_)));
    }

    #[test]
    fn test_curvilinear_halo_unsupported() {
        let lon = NdArray::from_fn(vec![3, 3], |i| i[1] as f64);
        let lat = NdArray::from_fn(vec![3, 3], |i| i[0] as f64);
        let g = Grid::new(lon, lat, None, None, TimeConverter::numeric(), Mesh::Flat).unwrap();
        let err = g.with_periodic_halo(true, false, 1).unwrap_err();
        assert!(matches!(err, FieldError::UnsupportedTopology(_)));
    }

    #[test]
    fn test_rebased_shifts_time() {
        use field_common::Calendar;
        let later = TimeConverter::from_iso8601("2000-01-02", Calendar::Standard).unwrap();
        let earlier = TimeConverter::from_iso8601("2000-01-01", Calendar::Standard).unwrap();
        let g = Grid::new(
            NdArray::from_vec(vec![0.0, 1.0]),
            NdArray::from_vec(vec![0.0, 1.0]),
            None,
            Some(vec![0.0, 3600.0]),
            later,
            Mesh::Flat,
        )
        .unwrap();
        let r = g.rebased(earlier).unwrap();
        assert_eq!(r.time(), &[86400.0, 90000.0]);
        assert_eq!(r.time_origin(), &earlier);
    }

    #[test]
    fn test_unwrap_longitudes() {
        assert_eq!(
            unwrap_longitudes(&[170.0, 180.0, -170.0, -160.0]),
            vec![170.0, 180.0, 190.0, 200.0]
        );
    }
}
