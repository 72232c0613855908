//! Cell edge lengths and areas.

use super::Grid;

/// Centred differences in the interior, one-sided at the ends, of
/// `at(i)` for `i` in `0..n`.
fn gradient(n: usize, i: usize, at: impl Fn(usize) -> f64) -> f64 {
    if n < 2 {
        0.0
    } else if i == 0 {
        at(1) - at(0)
    } else if i == n - 1 {
        at(n - 1) - at(n - 2)
    } else {
        (at(i + 1) - at(i - 1)) / 2.0
    }
}

/// Bring a longitude difference into [-180, 180].
fn wrap_dlon(d: f64) -> f64 {
    if d > 180.0 {
        d - 360.0
    } else if d < -180.0 {
        d + 360.0
    } else {
        d
    }
}

/// Zonal and meridional edge lengths of each node's cell, row-major (ny, nx).
pub(super) fn cell_edge_sizes(grid: &Grid) -> (Vec<f64>, Vec<f64>) {
    let (ny, nx) = (grid.ydim(), grid.xdim());
    let mesh = grid.mesh();
    let spherical = mesh.is_spherical();
    let mut dx = Vec::with_capacity(ny * nx);
    let mut dy = Vec::with_capacity(ny * nx);

    for y in 0..ny {
        for x in 0..nx {
            let lat = grid.lat_at(y, x);
            let mut dlon_x = gradient(nx, x, |i| grid.lon_at(y, i));
            let mut dlon_y = gradient(ny, y, |j| grid.lon_at(j, x));
            if spherical {
                dlon_x = wrap_dlon(dlon_x);
                dlon_y = wrap_dlon(dlon_y);
            }
            let dlat_x = gradient(nx, x, |i| grid.lat_at(y, i));
            let dlat_y = gradient(ny, y, |j| grid.lat_at(j, x));

            dx.push(mesh.distance(0.0, dlat_x, 0.0, dlon_x, lat));
            dy.push(mesh.distance(0.0, dlat_y, 0.0, dlon_y, lat));
        }
    }
    (dx, dy)
}

#[cfg(test)]
mod tests {
    use crate::array::NdArray;
    use crate::grid::Grid;
    use field_common::{Mesh, TimeConverter, DEG2M};

    fn grid(mesh: Mesh) -> Grid {
        Grid::new(
            NdArray::from_vec((0..5).map(|i| i as f64).collect()),
            NdArray::from_vec(vec![0.0, 20.0, 40.0, 60.0]),
            None,
            None,
            TimeConverter::numeric(),
            mesh,
        )
        .unwrap()
    }

    #[test]
    fn test_flat_areas_match_spacing() {
        let g = grid(Mesh::Flat);
        let areas = g.cell_areas();
        assert_eq!(areas.len(), 20);
        assert!(areas.iter().all(|a| (a - 20.0).abs() < 1e-12));
    }

    #[test]
    fn test_spherical_areas_shrink_poleward() {
        let g = grid(Mesh::Spherical);
        let areas = g.cell_areas();
        let nx = 5;
        for y in 1..4 {
            assert!(areas[y * nx] < areas[(y - 1) * nx]);
        }
        let (dx, dy) = g.cell_edge_sizes();
        assert!((dx[0] - DEG2M).abs() < 1e-6);
        assert!((dy[0] - 20.0 * DEG2M).abs() < 1e-6);
    }

    #[test]
    fn test_areas_are_cached() {
        let g = grid(Mesh::Flat);
        let first = g.cell_areas().as_ptr();
        let second = g.cell_areas().as_ptr();
        assert_eq!(first, second);
    }
}
