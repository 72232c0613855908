//! Vector fields: two or three scalar components sampled together.

use std::sync::RwLockReadGuard;

use tracing::debug;

use crate::error::{FieldError, Result};
use crate::field::{Field, FieldCore};
use crate::grid::SearchSeed;
use crate::interpolation;
use crate::types::InterpMethod;

/// Horizontal velocity components and an optional vertical one.
pub type Velocity = (f64, f64, Option<f64>);

/// A read-only composition of component fields.
///
/// Components keep their own grids. C-grid components are sampled jointly
/// on the U grid; A-grid components are sampled one by one.
#[derive(Debug, Clone)]
pub struct VectorField {
    name: String,
    u: Field,
    v: Field,
    w: Option<Field>,
    cgrid: bool,
}

impl VectorField {
    /// Compose `u`, `v` and optionally `w`.
    ///
    /// All components must be C-grid or all must be non-C-grid. C-grid
    /// horizontal components must share their coordinates.
    pub fn new(name: impl Into<String>, u: Field, v: Field, w: Option<Field>) -> Result<Self> {
        let name = name.into();
        let mut methods = vec![u.interp_method()?, v.interp_method()?];
        if let Some(w) = &w {
            methods.push(w.interp_method()?);
        }

        let cgrid = methods[0].is_cgrid();
        if methods.iter().any(|m| m.is_cgrid() != cgrid) {
            return Err(FieldError::MixedInterpolation {
                name,
                methods: methods.iter().map(|m| m.as_str().to_string()).collect(),
            });
        }
        if cgrid && !u.grid()?.same_coordinates(&*v.grid()?) {
            return Err(FieldError::configuration(format!(
                "C-grid vector field '{name}' needs U and V on the same grid"
            )));
        }

        debug!(vector = %name, u = u.name(), v = v.name(), cgrid, "created vector field");
        Ok(Self {
            name,
            u,
            v,
            w,
            cgrid,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn u(&self) -> &Field {
        &self.u
    }

    pub fn v(&self) -> &Field {
        &self.v
    }

    pub fn w(&self) -> Option<&Field> {
        self.w.as_ref()
    }

    pub fn is_3d(&self) -> bool {
        self.w.is_some()
    }

    pub fn is_cgrid(&self) -> bool {
        self.cgrid
    }

    pub fn components(&self) -> impl Iterator<Item = &Field> {
        [&self.u, &self.v].into_iter().chain(self.w.as_ref())
    }

    /// Velocity at (time, depth, lat, lon).
    pub fn sample(&self, time: f64, depth: f64, lat: f64, lon: f64) -> Result<Velocity> {
        self.sample_with_seed(time, depth, lat, lon, None)
            .map(|(velocity, _)| velocity)
    }

    /// Like [`sample`](Self::sample), seeding the curvilinear search of the
    /// U grid and returning the seed for the next call.
    pub fn sample_with_seed(
        &self,
        time: f64,
        depth: f64,
        lat: f64,
        lon: f64,
        seed: Option<SearchSeed>,
    ) -> Result<(Velocity, SearchSeed)> {
        if self.cgrid {
            return self.sample_cgrid(time, depth, lat, lon, seed);
        }

        let (u, next_seed) = self.u.sample_with_seed(time, depth, lat, lon, seed)?;
        let v = self.v.sample(time, depth, lat, lon)?;
        let w = match &self.w {
            Some(w) => Some(w.sample(time, depth, lat, lon)?),
            None => None,
        };
        Ok(((u, v, w), next_seed))
    }

    fn sample_cgrid(
        &self,
        time: f64,
        depth: f64,
        lat: f64,
        lon: f64,
        seed: Option<SearchSeed>,
    ) -> Result<(Velocity, SearchSeed)> {
        let u = self.u.core()?;
        let v_guard: RwLockReadGuard<'_, FieldCore>;
        let v: &FieldCore = if self.v.same_field(&self.u) {
            &u
        } else {
            v_guard = self.v.core()?;
            &v_guard
        };

        let loc = u.locate(time, depth, lat, lon, seed)?;
        let u_at = |t, z, y, x| u.value_at(t, z, y, x);
        let v_at = |t, z, y, x| v.value_at(t, z, y, x);
        let (uu, vv) = interpolation::cgrid_uv(&u.grid, &loc, lat, lon, &u_at, &v_at)?;
        u.mark_touched(&loc.time);
        v.mark_touched(&loc.time);

        let uu = uu * u.scaling_factor.unwrap_or(1.0);
        let vv = vv * v.scaling_factor.unwrap_or(1.0);

        let ww = match &self.w {
            None => None,
            Some(field) => {
                let w = field.core()?;
                let wloc = if w.grid.same_coordinates(&u.grid) {
                    loc
                } else {
                    w.locate(time, depth, lat, lon, None)?
                };
                let w_at = |t, z, y, x| w.value_at(t, z, y, x);
                let raw = match w.interp_method {
                    InterpMethod::CgridVelocity => {
                        interpolation::cgrid_w(&wloc, w.data.shape(), &w_at)?
                    }
                    method => interpolation::interpolate(
                        method,
                        w.role,
                        &wloc,
                        w.data.shape(),
                        &w_at,
                    )?,
                };
                w.mark_touched(&wloc.time);
                let scaled = raw * w.scaling_factor.unwrap_or(1.0);
                Some(w.units.to_target(scaled, lat))
            }
        };

        Ok(((uu, vv, ww), loc.seed()))
    }
}
