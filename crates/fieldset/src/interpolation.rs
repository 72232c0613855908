//! Interpolation kernels.
//!
//! Kernels read stored values through a [`ValueAt`] accessor so the same
//! code serves in-memory arrays and chunked buffers. All kernels take the
//! [`Location`] produced by [`Grid::locate`] and interpolate linearly in
//! time between the bracketing slices.

use field_common::DEG2M;
use serde::{Deserialize, Serialize};

use crate::error::{FieldError, Result};
use crate::grid::{cell_corners, Grid, Location};
use crate::types::InterpMethod;

/// Stored value at (t, z, y, x).
pub type ValueAt<'a> = &'a dyn Fn(usize, usize, usize, usize) -> Result<f64>;

/// Which cell face a staggered (C-grid) velocity component lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaggerRole {
    /// East/west faces (U).
    Zonal,
    /// North/south faces (V).
    Meridional,
    /// Top/bottom faces (W).
    Vertical,
}

impl StaggerRole {
    /// Role implied by a conventional component name.
    pub fn for_name(name: &str) -> Option<Self> {
        match name {
            "U" => Some(Self::Zonal),
            "V" => Some(Self::Meridional),
            "W" => Some(Self::Vertical),
            _ => None,
        }
    }
}

/// Interpolate a scalar at `loc`.
///
/// `shape` is the (t, z, y, x) extent of the data; `role` is only consulted
/// for [`InterpMethod::CgridVelocity`].
pub fn interpolate(
    method: InterpMethod,
    role: Option<StaggerRole>,
    loc: &Location,
    shape: [usize; 4],
    value: ValueAt,
) -> Result<f64> {
    match method {
        InterpMethod::Linear => linear(loc, value),
        InterpMethod::Nearest => in_time(loc, |ti| nearest(ti, loc, value)),
        InterpMethod::LinearInvdistLandTracer => {
            in_time(loc, |ti| invdist_land(ti, loc, shape, value))
        }
        InterpMethod::CgridTracer => {
            check_staggered_neighbours(loc, shape)?;
            in_time(loc, |ti| value(ti, loc.zi, loc.yi + 1, loc.xi + 1))
        }
        InterpMethod::CgridVelocity => {
            check_staggered_neighbours(loc, shape)?;
            let role = role.ok_or_else(|| {
                FieldError::configuration(
                    "cgrid_velocity on a scalar field needs a stagger role (U, V or W)",
                )
            })?;
            in_time(loc, |ti| cgrid_component(role, ti, loc, value))
        }
    }
}

fn in_time(loc: &Location, mut at: impl FnMut(usize) -> Result<f64>) -> Result<f64> {
    let mut total = 0.0;
    for (ti, w) in loc.time.slices() {
        total += w * at(ti)?;
    }
    Ok(total)
}

/// Multilinear over every time and space corner with a positive weight.
///
/// NaN corners drop out and the remaining weights are renormalised; the
/// result is NaN only when every contributing corner is NaN.
fn linear(loc: &Location, value: ValueAt) -> Result<f64> {
    let wz = [1.0 - loc.zeta, loc.zeta];
    let wy = [1.0 - loc.eta, loc.eta];
    let wx = [1.0 - loc.xsi, loc.xsi];

    let mut sum = 0.0;
    let mut weight = 0.0;
    for (ti, wt) in loc.time.slices() {
        for (k, &a) in wz.iter().enumerate() {
            for (j, &b) in wy.iter().enumerate() {
                for (i, &c) in wx.iter().enumerate() {
                    let w = wt * a * b * c;
                    if w <= 0.0 {
                        continue;
                    }
                    let v = value(ti, loc.zi + k, loc.yi + j, loc.xi + i)?;
                    if v.is_nan() {
                        continue;
                    }
                    sum += w * v;
                    weight += w;
                }
            }
        }
    }
    if weight == 0.0 {
        return Ok(f64::NAN);
    }
    Ok(sum / weight)
}

fn nearest(ti: usize, loc: &Location, value: ValueAt) -> Result<f64> {
    let round = |i: usize, frac: f64| if frac > 0.5 { i + 1 } else { i };
    value(
        ti,
        round(loc.zi, loc.zeta),
        round(loc.yi, loc.eta),
        round(loc.xi, loc.xsi),
    )
}

/// Tracer interpolation that treats zero as land.
///
/// All-land cells give zero; partially wet cells are inverse-distance
/// weighted over the wet corners, in index space.
fn invdist_land(ti: usize, loc: &Location, shape: [usize; 4], value: ValueAt) -> Result<f64> {
    let nk = if loc.zi + 1 < shape[1] { 2 } else { 1 };
    let nj = if loc.yi + 1 < shape[2] { 2 } else { 1 };
    let ni = if loc.xi + 1 < shape[3] { 2 } else { 1 };

    let mut corners = Vec::with_capacity(nk * nj * ni);
    for k in 0..nk {
        for j in 0..nj {
            for i in 0..ni {
                let v = value(ti, loc.zi + k, loc.yi + j, loc.xi + i)?;
                corners.push((k as f64, j as f64, i as f64, v));
            }
        }
    }

    let land = corners.iter().filter(|c| c.3.abs() < 1e-12).count();
    if land == corners.len() {
        return Ok(0.0);
    }
    if land == 0 {
        let mut sum = 0.0;
        for &(k, j, i, v) in &corners {
            let w = weight(loc.zeta, k) * weight(loc.eta, j) * weight(loc.xsi, i);
            sum += w * v;
        }
        return Ok(sum);
    }

    let mut sum = 0.0;
    let mut wsum = 0.0;
    for &(k, j, i, v) in corners.iter().filter(|c| c.3.abs() >= 1e-12) {
        let dist = (loc.zeta - k).powi(2) + (loc.eta - j).powi(2) + (loc.xsi - i).powi(2);
        if dist < 1e-12 {
            return Ok(v);
        }
        sum += v / dist;
        wsum += 1.0 / dist;
    }
    Ok(sum / wsum)
}

fn weight(frac: f64, corner: f64) -> f64 {
    if corner == 0.0 {
        1.0 - frac
    } else {
        frac
    }
}

fn check_staggered_neighbours(loc: &Location, shape: [usize; 4]) -> Result<()> {
    if loc.yi + 1 >= shape[2] || loc.xi + 1 >= shape[3] {
        return Err(FieldError::unsupported(format!(
            "staggered interpolation needs at least 2x2 horizontal nodes, grid has {}x{}",
            shape[2], shape[3]
        )));
    }
    Ok(())
}

/// One C-grid velocity component on its own face, NEMO f-point indexing.
fn cgrid_component(role: StaggerRole, ti: usize, loc: &Location, value: ValueAt) -> Result<f64> {
    let (zi, yi, xi) = (loc.zi, loc.yi, loc.xi);
    match role {
        StaggerRole::Zonal => {
            Ok((1.0 - loc.xsi) * value(ti, zi, yi + 1, xi)? + loc.xsi * value(ti, zi, yi + 1, xi + 1)?)
        }
        StaggerRole::Meridional => {
            Ok((1.0 - loc.eta) * value(ti, zi, yi, xi + 1)? + loc.eta * value(ti, zi, yi + 1, xi + 1)?)
        }
        StaggerRole::Vertical => {
            let lower = value(ti, zi, yi + 1, xi + 1)?;
            if loc.zeta <= 0.0 {
                return Ok(lower);
            }
            Ok((1.0 - loc.zeta) * lower + loc.zeta * value(ti, zi + 1, yi + 1, xi + 1)?)
        }
    }
}

/// Vertical C-grid velocity.
pub fn cgrid_w(loc: &Location, shape: [usize; 4], w: ValueAt) -> Result<f64> {
    check_staggered_neighbours(loc, shape)?;
    in_time(loc, |ti| cgrid_component(StaggerRole::Vertical, ti, loc, w))
}

/// Horizontal C-grid velocity from face-normal components.
///
/// Face transports are mapped back to the physical cell through the
/// Jacobian of the bilinear cell map, which accounts for curvilinear
/// and spherical cell shapes. The result is in coordinate units per
/// second (degrees on a spherical mesh), so no unit conversion follows.
pub fn cgrid_uv(
    grid: &Grid,
    loc: &Location,
    lat: f64,
    lon: f64,
    u: ValueAt,
    v: ValueAt,
) -> Result<(f64, f64)> {
    check_staggered_neighbours(loc, grid.shape())?;

    let (px, py) = cell_corners(grid, loc.yi, loc.xi, lon);
    let (xsi, eta) = (loc.xsi, loc.eta);
    let mesh = grid.mesh();

    let c1 = mesh.distance(py[0], py[1], px[0], px[1], (1.0 - xsi) * py[0] + xsi * py[1]);
    let c2 = mesh.distance(py[1], py[2], px[1], px[2], (1.0 - eta) * py[1] + eta * py[2]);
    let c3 = mesh.distance(py[2], py[3], px[2], px[3], xsi * py[2] + (1.0 - xsi) * py[3]);
    let c4 = mesh.distance(py[3], py[0], px[3], px[0], eta * py[3] + (1.0 - eta) * py[0]);

    let dphidxsi = [eta - 1.0, 1.0 - eta, eta, -eta];
    let dphideta = [xsi - 1.0, -xsi, xsi, 1.0 - xsi];
    let dot = |a: &[f64; 4], b: &[f64; 4]| a.iter().zip(b).map(|(p, q)| p * q).sum::<f64>();
    let jac = dot(&px, &dphidxsi) * dot(&py, &dphideta) - dot(&px, &dphideta) * dot(&py, &dphidxsi);
    let mesh_jac = if mesh.is_spherical() {
        DEG2M * DEG2M * lat.to_radians().cos()
    } else {
        1.0
    };
    let jac = jac * mesh_jac;
    if jac == 0.0 {
        return Err(FieldError::sampling(0.0, lat, lon));
    }

    let (zi, yi, xi) = (loc.zi, loc.yi, loc.xi);
    let mut out = (0.0, 0.0);
    for (ti, wt) in loc.time.slices() {
        let u0 = u(ti, zi, yi + 1, xi)? * c4;
        let u1 = u(ti, zi, yi + 1, xi + 1)? * c2;
        let v0 = v(ti, zi, yi, xi + 1)? * c1;
        let v1 = v(ti, zi, yi + 1, xi + 1)? * c3;
        let uu = (1.0 - xsi) * u0 + xsi * u1;
        let vv = (1.0 - eta) * v0 + eta * v1;

        let coef = [
            -(1.0 - eta) * uu - (1.0 - xsi) * vv,
            (1.0 - eta) * uu - xsi * vv,
            eta * uu + xsi * vv,
            -eta * uu + (1.0 - xsi) * vv,
        ];
        out.0 += wt * dot(&coef, &px) / jac;
        out.1 += wt * dot(&coef, &py) / jac;
    }
    Ok(out)
}
