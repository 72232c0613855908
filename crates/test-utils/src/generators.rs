//! Synthetic coordinates and data with values that are easy to check.
//!
//! All data is row-major with the last index varying fastest, matching the
//! (t, z, y, x) layout the fieldset crate uses.

/// `n` evenly spaced values from `start` to `end` inclusive.
///
/// # Example
///
/// ```
/// use test_utils::linspace;
///
/// assert_eq!(linspace(0.0, 1.0, 3), vec![0.0, 0.5, 1.0]);
/// assert_eq!(linspace(2.0, 5.0, 1), vec![2.0]);
/// ```
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Values computed from their index in an array of `shape`.
pub fn from_index(shape: &[usize], f: impl Fn(&[usize]) -> f64) -> Vec<f64> {
    let len: usize = shape.iter().product();
    let mut idx = vec![0usize; shape.len()];
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(f(&idx));
        for axis in (0..shape.len()).rev() {
            idx[axis] += 1;
            if idx[axis] < shape[axis] {
                break;
            }
            idx[axis] = 0;
        }
    }
    out
}

/// Each value equals its flat (row-major) index.
///
/// # Example
///
/// ```
/// use test_utils::index_ramp;
///
/// assert_eq!(index_ramp(&[2, 3]), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
/// ```
pub fn index_ramp(shape: &[usize]) -> Vec<f64> {
    let len: usize = shape.iter().product();
    (0..len).map(|i| i as f64).collect()
}

/// A field linear in its coordinates: `a * lon + b * lat + c`.
///
/// Linear interpolation reproduces it exactly anywhere inside the grid.
pub fn planar(lon: &[f64], lat: &[f64], a: f64, b: f64, c: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(lon.len() * lat.len());
    for &y in lat {
        for &x in lon {
            out.push(a * x + b * y + c);
        }
    }
    out
}

/// The classic synthetic field set: coordinates plus smooth U, V and a
/// scalar P on a `ydim` x `xdim` grid.
#[derive(Debug, Clone)]
pub struct SyntheticFields {
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub p: Vec<f64>,
}

impl SyntheticFields {
    pub fn shape(&self) -> [usize; 2] {
        [self.lat.len(), self.lon.len()]
    }
}

/// Generate [`SyntheticFields`] on lon in [0, 10], lat in [-5, 5].
///
/// U varies with longitude, V with latitude, so swapped or transposed
/// data shows up immediately in assertions.
pub fn fieldset_data(xdim: usize, ydim: usize) -> SyntheticFields {
    let lon = linspace(0.0, 10.0, xdim);
    let lat = linspace(-5.0, 5.0, ydim);
    let u = planar(&lon, &lat, 0.1, 0.0, 0.5);
    let v = planar(&lon, &lat, 0.0, -0.05, 0.0);
    let p = from_index(&[ydim, xdim], |i| (i[0] * xdim + i[1]) as f64 * 0.25);
    SyntheticFields { lon, lat, u, v, p }
}

/// 2-D coordinates of a rectilinear grid rotated by `degrees` about its
/// first node, as (lon, lat), each of shape (ny, nx).
///
/// Used to build curvilinear test grids whose cells are still
/// parallelograms, so bilinear sampling stays exact for planar data.
pub fn rotated_coords(lon: &[f64], lat: &[f64], degrees: f64) -> (Vec<f64>, Vec<f64>) {
    let (s, c) = degrees.to_radians().sin_cos();
    let (x0, y0) = (lon[0], lat[0]);
    let mut lon2d = Vec::with_capacity(lon.len() * lat.len());
    let mut lat2d = Vec::with_capacity(lon.len() * lat.len());
    for &y in lat {
        for &x in lon {
            let (dx, dy) = (x - x0, y - y0);
            lon2d.push(x0 + c * dx - s * dy);
            lat2d.push(y0 + s * dx + c * dy);
        }
    }
    (lon2d, lat2d)
}

/// Terrain-following depths of shape (nz, ny, nx): `nz` sigma levels from
/// the surface to a bottom that deepens linearly with x from `shallow` to
/// `deep`.
pub fn sigma_depth(nz: usize, ny: usize, nx: usize, shallow: f64, deep: f64) -> Vec<f64> {
    let sigma = linspace(0.0, 1.0, nz);
    let bottom = linspace(shallow, deep, nx);
    from_index(&[nz, ny, nx], |i| sigma[i[0]] * bottom[i[2]])
}

/// A (nt, ny, nx) series where slice `t` is filled with `t * step`.
pub fn time_steps(nt: usize, ny: usize, nx: usize, step: f64) -> Vec<f64> {
    from_index(&[nt, ny, nx], |i| i[0] as f64 * step)
}
