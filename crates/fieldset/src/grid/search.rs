//! Index search: map a (time, depth, lat, lon) point to bracketing indices
//! and interpolation weights on a [`Grid`].

use field_common::Mesh;

use super::{Depth, Grid, LocateOptions};
use crate::error::{FieldError, Result};

const CURVILINEAR_TOL: f64 = 1.0e-10;
const MAX_SEARCH_ITERATIONS: usize = 1_000_000;

/// Cell to start a curvilinear search from, typically the particle's
/// previous cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchSeed {
    pub yi: usize,
    pub xi: usize,
}

/// Two time slices and the weight of the second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBracket {
    pub ti: usize,
    pub ti_next: usize,
    /// Weight of `ti_next`; zero when only `ti` contributes.
    pub tau: f64,
    /// Time after periodic wrapping.
    pub time: f64,
}

impl TimeBracket {
    fn single(ti: usize, time: f64) -> Self {
        Self {
            ti,
            ti_next: ti,
            tau: 0.0,
            time,
        }
    }

    /// Time indices whose data contributes to a sample.
    pub fn slices(&self) -> impl Iterator<Item = (usize, f64)> {
        let first = (self.ti, 1.0 - self.tau);
        let second = (self.ti_next, self.tau);
        std::iter::once(first)
            .chain(std::iter::once(second))
            .filter(|&(_, w)| w > 0.0)
    }
}

/// Result of [`Grid::locate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub time: TimeBracket,
    pub zi: usize,
    pub zeta: f64,
    pub yi: usize,
    pub eta: f64,
    pub xi: usize,
    pub xsi: f64,
}

impl Location {
    /// Seed for the next curvilinear search from this point.
    pub fn seed(&self) -> SearchSeed {
        SearchSeed {
            yi: self.yi,
            xi: self.xi,
        }
    }
}

/// Lower index `i` of the interval containing `v`, and the fraction
/// `(v - values[i]) / (values[i + 1] - values[i])`.
///
/// A value equal to `values[i]` resolves to interval `i`; the last node
/// resolves to the last interval. Works for ascending or descending
/// arrays of at least two entries; the fraction falls outside [0, 1] when
/// `v` lies outside the array.
pub(crate) fn bracket(values: &[f64], v: f64) -> (usize, f64) {
    let n = values.len();
    let ascending = values[n - 1] >= values[0];
    let count = if ascending {
        values.partition_point(|&c| c <= v)
    } else {
        values.partition_point(|&c| c >= v)
    };
    let i = count.saturating_sub(1).min(n - 2);
    let frac = (v - values[i]) / (values[i + 1] - values[i]);
    (i, frac)
}

pub(super) fn time_bracket(
    times: &[f64],
    time: f64,
    allow_extrapolation: bool,
    periodic: Option<f64>,
) -> Result<TimeBracket> {
    let nt = times.len();
    let first = times[0];
    let last = times[nt - 1];

    if let Some(period) = periodic {
        let wrapped = first + (time - first).rem_euclid(period);
        if nt == 1 {
            return Ok(TimeBracket::single(0, wrapped));
        }
        if wrapped >= last {
            let span = first + period - last;
            if span <= 0.0 {
                return Ok(TimeBracket::single(nt - 1, wrapped));
            }
            return Ok(TimeBracket {
                ti: nt - 1,
                ti_next: 0,
                tau: (wrapped - last) / span,
                time: wrapped,
            });
        }
        let (ti, tau) = bracket(times, wrapped);
        return Ok(TimeBracket {
            ti,
            ti_next: ti + 1,
            tau,
            time: wrapped,
        });
    }

    if time < first || time > last {
        if !allow_extrapolation {
            return Err(FieldError::TimeExtrapolation {
                time,
                min: first,
                max: last,
            });
        }
        let ti = if time < first { 0 } else { nt - 1 };
        return Ok(TimeBracket::single(ti, time));
    }
    if nt == 1 {
        return Ok(TimeBracket::single(0, time));
    }
    let (ti, tau) = bracket(times, time);
    Ok(TimeBracket {
        ti,
        ti_next: ti + 1,
        tau,
        time,
    })
}

pub(super) fn locate(
    grid: &Grid,
    bracket_t: TimeBracket,
    z: f64,
    y: f64,
    x: f64,
    options: &LocateOptions,
) -> Result<Location> {
    let (yi, eta, xi, xsi) = if grid.kind().is_curvilinear() {
        search_curvilinear(grid, z, y, x, options.seed)?
    } else {
        search_rectilinear(grid, z, y, x)?
    };

    let (zi, zeta) = if grid.zdim() > 1 && !options.search_2d {
        let found = match grid.depth() {
            Depth::Z(levels) => search_vertical(levels, z),
            Depth::S { .. } => {
                let column = s_depth_column(grid, &bracket_t, yi, eta, xi, xsi);
                search_vertical(&column, z)
            }
        };
        found.ok_or_else(|| FieldError::out_of_bounds(z, y, x))?
    } else {
        (0, 0.0)
    };

    let unit = 0.0..=1.0;
    if !(unit.contains(&xsi) && unit.contains(&eta) && unit.contains(&zeta)) {
        return Err(FieldError::sampling(z, y, x));
    }

    Ok(Location {
        time: bracket_t,
        zi,
        zeta,
        yi,
        eta,
        xi,
        xsi,
    })
}

/// Bracket `z` on a monotonic depth column. `None` if outside the column.
fn search_vertical(levels: &[f64], z: f64) -> Option<(usize, f64)> {
    let n = levels.len();
    let (lo, hi) = if levels[n - 1] >= levels[0] {
        (levels[0], levels[n - 1])
    } else {
        (levels[n - 1], levels[0])
    };
    if z < lo || z > hi {
        return None;
    }
    Some(bracket(levels, z))
}

/// Depth column of an S-grid at the horizontal point, interpolated
/// bilinearly between the four cell corners and linearly in time when the
/// depths vary in time.
fn s_depth_column(
    grid: &Grid,
    t: &TimeBracket,
    yi: usize,
    eta: f64,
    xi: usize,
    xsi: f64,
) -> Vec<f64> {
    let Depth::S {
        values,
        time_varying,
    } = grid.depth()
    else {
        return Vec::new();
    };
    let nz = values.shape()[1];
    let y1 = (yi + 1).min(grid.ydim() - 1);
    let x1 = (xi + 1).min(grid.xdim() - 1);
    let corners = [
        (yi, xi, (1.0 - xsi) * (1.0 - eta)),
        (yi, x1, xsi * (1.0 - eta)),
        (y1, x1, xsi * eta),
        (y1, xi, (1.0 - xsi) * eta),
    ];
    let column_at = |ti: usize| -> Vec<f64> {
        (0..nz)
            .map(|k| {
                corners
                    .iter()
                    .map(|&(y, x, w)| w * values.get(&[ti, k, y, x]))
                    .sum()
            })
            .collect()
    };
    if !*time_varying {
        return column_at(0);
    }
    if t.tau == 0.0 || t.ti == t.ti_next {
        return column_at(t.ti);
    }
    let a = column_at(t.ti);
    let b = column_at(t.ti_next);
    a.iter()
        .zip(&b)
        .map(|(p, q)| (1.0 - t.tau) * p + t.tau * q)
        .collect()
}

fn search_rectilinear(grid: &Grid, z: f64, y: f64, x: f64) -> Result<(usize, f64, usize, f64)> {
    if grid.ydim() > 1 && !grid.extent().contains_lat(y) {
        return Err(FieldError::out_of_bounds(z, y, x));
    }

    let (xi, xsi) = if grid.xdim() > 1 {
        let lon = grid.lon_unwrapped();
        let n = lon.len();
        let xx = if grid.mesh().is_spherical() && x < lon[0] {
            x + 360.0
        } else {
            x
        };
        let (lo, hi) = (lon[0].min(lon[n - 1]), lon[0].max(lon[n - 1]));
        if !grid.is_zonal_periodic() && (xx < lo || xx > hi) {
            return Err(FieldError::out_of_bounds(z, y, x));
        }
        bracket(lon, xx)
    } else {
        (0, 0.0)
    };

    let (yi, eta) = if grid.ydim() > 1 {
        bracket(grid.lat().data(), y)
    } else {
        (0, 0.0)
    };

    Ok((yi, eta, xi, xsi))
}

/// Corner longitudes of cell (yi, xi) in counter-clockwise order starting
/// south-west, shifted so they lie on the same side of the seam as `x`.
pub(crate) fn cell_corners(grid: &Grid, yi: usize, xi: usize, x: f64) -> ([f64; 4], [f64; 4]) {
    let y1 = (yi + 1).min(grid.ydim() - 1);
    let x1 = (xi + 1).min(grid.xdim() - 1);
    let mut px = [
        grid.lon_at(yi, xi),
        grid.lon_at(yi, x1),
        grid.lon_at(y1, x1),
        grid.lon_at(y1, xi),
    ];
    let py = [
        grid.lat_at(yi, xi),
        grid.lat_at(yi, x1),
        grid.lat_at(y1, x1),
        grid.lat_at(y1, xi),
    ];
    if grid.mesh() == Mesh::Spherical {
        if px[0] < x - 225.0 {
            px[0] += 360.0;
        }
        if px[0] > x + 225.0 {
            px[0] -= 360.0;
        }
        for i in 1..4 {
            if px[i] - px[0] > 180.0 {
                px[i] -= 360.0;
            }
            if px[0] - px[i] > 180.0 {
                px[i] += 360.0;
            }
        }
    }
    (px, py)
}

/// Bilinear coefficients of a quad: p(xsi, eta) = a0 + a1 xsi + a2 eta + a3 xsi eta.
fn quad_coefficients(p: &[f64; 4]) -> [f64; 4] {
    [
        p[0],
        p[1] - p[0],
        p[3] - p[0],
        p[0] - p[1] + p[2] - p[3],
    ]
}

fn search_curvilinear(
    grid: &Grid,
    z: f64,
    y: f64,
    x: f64,
    seed: Option<SearchSeed>,
) -> Result<(usize, f64, usize, f64)> {
    let xdim = grid.xdim();
    let ydim = grid.ydim();
    if xdim < 2 || ydim < 2 {
        return Err(FieldError::unsupported(
            "curvilinear search needs at least 2x2 nodes",
        ));
    }
    let extent = grid.extent();
    if !grid.is_zonal_periodic() && !extent.contains_lon(x) {
        let west = grid.lon_at(0, 0);
        let east = grid.lon_at(0, xdim - 1);
        if west < east || (x < west && x > east) {
            return Err(FieldError::out_of_bounds(z, y, x));
        }
    }
    if !extent.contains_lat(y) {
        return Err(FieldError::out_of_bounds(z, y, x));
    }

    let spherical = grid.mesh().is_spherical();
    let (mut yi, mut xi) = match seed {
        Some(s) => (s.yi.min(ydim - 2), s.xi.min(xdim - 2)),
        None => ((ydim / 2).saturating_sub(1), (xdim / 2).saturating_sub(1)),
    };
    let mut xsi = -1.0_f64;
    let mut eta = -1.0_f64;
    let outside =
        |v: f64| v < -CURVILINEAR_TOL || v > 1.0 + CURVILINEAR_TOL;

    let mut iterations = 0;
    while outside(xsi) || outside(eta) {
        let (px, py) = cell_corners(grid, yi, xi, x);
        let a = quad_coefficients(&px);
        let b = quad_coefficients(&py);

        let aa = a[3] * b[2] - a[2] * b[3];
        let bb = a[3] * b[0] - a[0] * b[3] + a[1] * b[2] - a[2] * b[1] + x * b[3] - y * a[3];
        let cc = a[1] * b[0] - a[0] * b[1] + x * b[1] - y * a[1];
        if aa.abs() < 1e-12 {
            eta = -cc / bb;
        } else {
            let det2 = bb * bb - 4.0 * aa * cc;
            if det2 > 0.0 {
                eta = (-bb + det2.sqrt()) / (2.0 * aa);
            }
        }
        if (a[1] + a[3] * eta).abs() < 1e-12 {
            xsi = ((y - py[0]) / (py[1] - py[0]) + (y - py[3]) / (py[2] - py[3])) * 0.5;
        } else {
            xsi = (x - a[0] - a[2] * eta) / (a[1] + a[3] * eta);
        }

        if xsi < 0.0 && eta < 0.0 && xi == 0 && yi == 0 {
            return Err(FieldError::out_of_bounds(z, y, x));
        }
        if xsi > 1.0 && eta > 1.0 && xi == xdim - 2 && yi == ydim - 2 {
            return Err(FieldError::out_of_bounds(z, y, x));
        }

        let (prev_yi, prev_xi) = (yi, xi);
        let mut next_xi = xi as i64;
        let mut next_yi = yi as i64;
        if xsi < -CURVILINEAR_TOL {
            next_xi -= 1;
        } else if xsi > 1.0 + CURVILINEAR_TOL {
            next_xi += 1;
        }
        if eta < -CURVILINEAR_TOL {
            next_yi -= 1;
        } else if eta > 1.0 + CURVILINEAR_TOL {
            next_yi += 1;
        }
        (yi, xi) = reconnect_bnd_indices(next_yi, next_xi, ydim, xdim, spherical);

        if (outside(xsi) || outside(eta)) && (yi, xi) == (prev_yi, prev_xi) {
            return Err(FieldError::out_of_bounds(z, y, x));
        }

        iterations += 1;
        if iterations > MAX_SEARCH_ITERATIONS {
            return Err(FieldError::out_of_bounds(z, y, x));
        }
    }

    Ok((yi, eta.clamp(0.0, 1.0), xi, xsi.clamp(0.0, 1.0)))
}

/// Clamp or wrap cell indices that stepped off the grid.
///
/// On spherical meshes the zonal index wraps around and stepping past the
/// northern edge folds back across the pole.
fn reconnect_bnd_indices(
    yi: i64,
    xi: i64,
    ydim: usize,
    xdim: usize,
    spherical: bool,
) -> (usize, usize) {
    let max_x = xdim as i64 - 2;
    let max_y = ydim as i64 - 2;
    let mut xi = xi;
    let mut yi = yi;
    if xi < 0 {
        xi = if spherical { max_x } else { 0 };
    }
    if xi > max_x {
        xi = if spherical { 0 } else { max_x };
    }
    if yi < 0 {
        yi = 0;
    }
    if yi > max_y {
        yi = max_y;
        if spherical {
            xi = (xdim as i64 - xi).min(max_x);
        }
    }
    (yi as usize, xi as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::NdArray;
    use field_common::TimeConverter;

    fn grid_1d(lon: Vec<f64>, lat: Vec<f64>, depth: Option<Vec<f64>>, mesh: Mesh) -> Grid {
        Grid::new(
            NdArray::from_vec(lon),
            NdArray::from_vec(lat),
            depth.map(NdArray::from_vec),
            None,
            TimeConverter::numeric(),
            mesh,
        )
        .unwrap()
    }

    #[test]
    fn test_bracket_tie_break() {
        let lon = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(bracket(&lon, 0.0), (0, 0.0));
        assert_eq!(bracket(&lon, 1.0), (1, 0.0));
        assert_eq!(bracket(&lon, 2.0), (2, 0.0));
        assert_eq!(bracket(&lon, 3.0), (2, 1.0));
        assert_eq!(bracket(&lon, 1.5), (1, 0.5));
    }

    #[test]
    fn test_bracket_descending() {
        let depth = [30.0, 20.0, 10.0];
        assert_eq!(bracket(&depth, 20.0), (1, 0.0));
        assert_eq!(bracket(&depth, 25.0), (0, 0.5));
        assert_eq!(bracket(&depth, 10.0), (1, 1.0));
    }

    #[test]
    fn test_time_bracket_extrapolation() {
        let t = [0.0, 10.0, 20.0];
        let b = time_bracket(&t, 15.0, false, None).unwrap();
        assert_eq!((b.ti, b.ti_next, b.tau), (1, 2, 0.5));

        let err = time_bracket(&t, 25.0, false, None).unwrap_err();
        assert!(matches!(err, FieldError::TimeExtrapolation { .. }));

        let b = time_bracket(&t, 25.0, true, None).unwrap();
        assert_eq!((b.ti, b.tau), (2, 0.0));
    }

    #[test]
    fn test_time_bracket_periodic_wraps_across_boundary() {
        let t = [0.0, 10.0, 20.0];
        let b = time_bracket(&t, 25.0, false, Some(30.0)).unwrap();
        assert_eq!((b.ti, b.ti_next), (2, 0));
        assert!((b.tau - 0.5).abs() < 1e-12);

        let b = time_bracket(&t, 35.0, false, Some(30.0)).unwrap();
        assert_eq!((b.ti, b.ti_next), (0, 1));
        assert!((b.tau - 0.5).abs() < 1e-12);
        assert_eq!(b.time, 5.0);
    }

    #[test]
    fn test_rectilinear_out_of_bounds() {
        let g = grid_1d(vec![0.0, 1.0, 2.0], vec![0.0, 1.0], None, Mesh::Flat);
        let opts = LocateOptions::default();
        let err = g.locate(0.0, 0.0, 0.5, 2.5, &opts).unwrap_err();
        assert!(matches!(err, FieldError::OutOfBounds { .. }));
        let loc = g.locate(0.0, 0.0, 0.5, 1.5, &opts).unwrap();
        assert_eq!((loc.xi, loc.yi), (1, 0));
        assert!((loc.xsi - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_spherical_seam() {
        let g = grid_1d(
            vec![170.0, 180.0, -170.0, -160.0],
            vec![0.0, 10.0],
            None,
            Mesh::Spherical,
        );
        let loc = g.locate(0.0, 0.0, 5.0, -175.0, &LocateOptions::default()).unwrap();
        assert_eq!(loc.xi, 1);
        assert!((loc.xsi - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_vertical_z_search() {
        let g = grid_1d(
            vec![0.0, 1.0],
            vec![0.0, 1.0],
            Some(vec![0.0, 10.0, 30.0]),
            Mesh::Flat,
        );
        let opts = LocateOptions::default();
        let loc = g.locate(0.0, 20.0, 0.5, 0.5, &opts).unwrap();
        assert_eq!(loc.zi, 1);
        assert!((loc.zeta - 0.5).abs() < 1e-12);
        assert!(g.locate(0.0, 31.0, 0.5, 0.5, &opts).is_err());
    }

    #[test]
    fn test_s_grid_search_uses_column_depths() {
        // Column depths scale with x: 0..10 at x=0, 0..20 at x=1.
        let depth = NdArray::from_fn(vec![2, 2, 2], |i| i[0] as f64 * 10.0 * (1.0 + i[2] as f64));
        let g = Grid::new(
            NdArray::from_vec(vec![0.0, 1.0]),
            NdArray::from_vec(vec![0.0, 1.0]),
            Some(depth),
            None,
            TimeConverter::numeric(),
            Mesh::Flat,
        )
        .unwrap();
        let loc = g.locate(0.0, 7.5, 0.5, 0.5, &LocateOptions::default()).unwrap();
        // Bottom depth at x=0.5 is 15, so 7.5 is halfway.
        assert_eq!(loc.zi, 0);
        assert!((loc.zeta - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_curvilinear_rotated_grid() {
        // A 45-degree rotated regular mesh.
        let n = 5;
        let c = std::f64::consts::FRAC_1_SQRT_2;
        let lon = NdArray::from_fn(vec![n, n], |i| c * (i[1] as f64 - i[0] as f64));
        let lat = NdArray::from_fn(vec![n, n], |i| c * (i[1] as f64 + i[0] as f64));
        let g = Grid::new(lon, lat, None, None, TimeConverter::numeric(), Mesh::Flat).unwrap();

        // Logical point (i=2.25, j=1.5).
        let (i, j) = (2.25, 1.5);
        let x = c * (i - j);
        let y = c * (i + j);
        let loc = g.locate(0.0, 0.0, y, x, &LocateOptions::default()).unwrap();
        assert_eq!((loc.xi, loc.yi), (2, 1));
        assert!((loc.xsi - 0.25).abs() < 1e-9);
        assert!((loc.eta - 0.5).abs() < 1e-9);

        let seeded = LocateOptions {
            seed: Some(loc.seed()),
            ..Default::default()
        };
        let again = g.locate(0.0, 0.0, y, x, &seeded).unwrap();
        assert_eq!((again.xi, again.yi), (2, 1));
    }

    #[test]
    fn test_curvilinear_antimeridian_row() {
        let row = [170.0, 180.0, -170.0, -160.0];
        let lon = NdArray::from_fn(vec![2, 4], |i| row[i[1]]);
        let lat = NdArray::from_fn(vec![2, 4], |i| i[0] as f64);
        let g = Grid::new(lon, lat, None, None, TimeConverter::numeric(), Mesh::Spherical)
            .unwrap();

        for (x, xi) in [(175.0, 0), (-175.0, 1), (-165.0, 2)] {
            let loc = g.locate(0.0, 0.0, 0.5, x, &LocateOptions::default()).unwrap();
            assert_eq!((loc.yi, loc.xi), (0, xi), "lon {x}");
            assert!((loc.xsi - 0.5).abs() < 1e-9, "lon {x}: xsi {}", loc.xsi);
            assert!((loc.eta - 0.5).abs() < 1e-9, "lon {x}: eta {}", loc.eta);
        }

        // 180 and -180 are the same meridian
        let east = g.locate(0.0, 0.0, 0.5, 180.0, &LocateOptions::default()).unwrap();
        let west = g.locate(0.0, 0.0, 0.5, -180.0, &LocateOptions::default()).unwrap();
        assert_eq!(
            east.xi as f64 + east.xsi,
            west.xi as f64 + west.xsi,
            "seam positions differ"
        );
    }

    #[test]
    fn test_curvilinear_outside_is_out_of_bounds() {
        let lon = NdArray::from_fn(vec![3, 3], |i| i[1] as f64);
        let lat = NdArray::from_fn(vec![3, 3], |i| i[0] as f64);
        let g = Grid::new(lon, lat, None, None, TimeConverter::numeric(), Mesh::Flat).unwrap();
        let err = g.locate(0.0, 0.0, 1.0, 5.0, &LocateOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::OutOfBounds);
    }

    #[test]
    fn test_reconnect_wraps_on_sphere() {
        assert_eq!(reconnect_bnd_indices(0, -1, 4, 6, true), (0, 4));
        assert_eq!(reconnect_bnd_indices(0, -1, 4, 6, false), (0, 0));
        assert_eq!(reconnect_bnd_indices(0, 5, 4, 6, true), (0, 0));
        assert_eq!(reconnect_bnd_indices(5, 1, 4, 6, false), (2, 1));
    }
}
