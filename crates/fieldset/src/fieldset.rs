//! The field set: named fields, constants and the deduplicated gridset.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::array::NdArray;
use crate::buffer::window_for;
use crate::config::{EngineConfig, FieldOptions};
use crate::error::{FieldError, Result};
use crate::field::{next_advance_time, Dimensions, Field};
use crate::grid::{Grid, GridState};
use crate::types::InterpMethod;
use crate::vector_field::VectorField;

/// A registered member of a [`FieldSet`].
#[derive(Debug, Clone)]
pub enum Entry {
    Field(Field),
    Vector(VectorField),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Self::Field(f) => f.name(),
            Self::Vector(v) => v.name(),
        }
    }
}

/// One distinct grid and the fields that use it.
#[derive(Debug, Clone)]
pub struct GridsetEntry {
    grid: Arc<Grid>,
    state: GridState,
    /// Whether the fields on this grid are file-backed. All or none are.
    deferred: bool,
    fields: Vec<String>,
}

impl GridsetEntry {
    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }
}

type DeferFn = dyn Fn(&FieldSet) -> Result<()> + Send + Sync;

/// Callback run after a time-chunk advance brought new slices into memory.
pub struct DeferHook(Box<DeferFn>);

impl std::fmt::Debug for DeferHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeferHook")
    }
}

/// Coordinates for [`FieldSet::from_data`].
#[derive(Debug, Clone)]
pub enum FieldDimensions {
    /// One set of coordinates for every field.
    Shared(Dimensions),
    /// Coordinates per field name.
    PerField(BTreeMap<String, Dimensions>),
}

/// Registry of fields, vector fields and constants.
#[derive(Debug, Default)]
pub struct FieldSet {
    entries: HashMap<String, Entry>,
    /// Insertion order of `entries`.
    order: Vec<String>,
    constants: BTreeMap<String, f64>,
    gridset: Vec<GridsetEntry>,
    /// Grid fingerprint to gridset indices with that fingerprint.
    grid_index: HashMap<u64, Vec<usize>>,
    completed: bool,
    config: EngineConfig,
    compute_on_defer: Option<DeferHook>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate().map_err(FieldError::Configuration)?;
        Ok(Self {
            config,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `hook` whenever [`compute_time_chunk`](Self::compute_time_chunk)
    /// loads new time slices of file-backed fields.
    ///
    /// The hook sees the committed window. It typically walks
    /// [`Field::loaded_time_indices`] and rewrites those slices with
    /// [`Field::update_time_slice`].
    pub fn set_compute_on_defer(
        &mut self,
        hook: impl Fn(&FieldSet) -> Result<()> + Send + Sync + 'static,
    ) {
        self.compute_on_defer = Some(DeferHook(Box::new(hook)));
    }

    pub fn clear_compute_on_defer(&mut self) {
        self.compute_on_defer = None;
    }

    /// Build a set from named in-memory arrays.
    pub fn from_data(
        data: BTreeMap<String, NdArray>,
        dims: FieldDimensions,
        options: &FieldOptions,
    ) -> Result<FieldSet> {
        let mut set = FieldSet::new();
        for (name, values) in data {
            let field_dims = match &dims {
                FieldDimensions::Shared(d) => d.clone(),
                FieldDimensions::PerField(map) => map.get(&name).cloned().ok_or_else(|| {
                    FieldError::configuration(format!("no dimensions given for field '{name}'"))
                })?,
            };
            let field = Field::from_data(name, values, field_dims, options)?;
            set.add_field(field, None)?;
        }
        Ok(set)
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    fn check_mutable(&self, name: &str) -> Result<()> {
        if self.completed {
            return Err(FieldError::FieldSetComplete(name.to_string()));
        }
        if self.entries.contains_key(name) || self.constants.contains_key(name) {
            return Err(FieldError::DuplicateField(name.to_string()));
        }
        Ok(())
    }

    /// Register `field`, under `name` if given.
    pub fn add_field(&mut self, field: Field, name: Option<&str>) -> Result<()> {
        let field = match name {
            Some(n) if n != field.name() => field.renamed(n),
            _ => field,
        };
        let name = field.name().to_string();
        self.check_mutable(&name)?;

        self.register_grid(&field)?;
        self.entries.insert(name.clone(), Entry::Field(field));
        self.order.push(name);
        Ok(())
    }

    /// Put `field` into the gridset, sharing an existing grid with equal
    /// coordinates.
    ///
    /// A grid is windowed as a whole, so file-backed and in-memory fields
    /// cannot share one.
    fn register_grid(&mut self, field: &Field) -> Result<()> {
        let grid = field.grid()?;
        let deferred = field.is_deferred()?;
        let fingerprint = grid.fingerprint();
        let existing = self.grid_index.get(&fingerprint).and_then(|candidates| {
            candidates
                .iter()
                .copied()
                .find(|&i| self.gridset[i].grid.same_coordinates(&grid))
        });

        match existing {
            Some(i) => {
                let entry = &mut self.gridset[i];
                if entry.deferred != deferred {
                    let (this, other) = if deferred {
                        ("file-backed", "in-memory")
                    } else {
                        ("in-memory", "file-backed")
                    };
                    return Err(FieldError::configuration(format!(
                        "{this} field '{}' cannot share a grid with {other} fields {:?}",
                        field.name(),
                        entry.fields
                    )));
                }
                if !Arc::ptr_eq(&entry.grid, &grid) {
                    field.set_grid(Arc::clone(&entry.grid))?;
                    debug!(field = field.name(), gridset_index = i, "reusing equal grid");
                }
                entry.fields.push(field.name().to_string());
            }
            None => {
                let state = if deferred {
                    GridState::Unloaded
                } else {
                    GridState::Windowed {
                        first: 0,
                        last: grid.tdim() - 1,
                    }
                };
                self.gridset.push(GridsetEntry {
                    grid,
                    state,
                    deferred,
                    fields: vec![field.name().to_string()],
                });
                self.grid_index
                    .entry(fingerprint)
                    .or_default()
                    .push(self.gridset.len() - 1);
            }
        }
        Ok(())
    }

    /// Distinct fields on gridset entry `i`; aliases of one field count once.
    fn grid_fields(&self, i: usize) -> Vec<Field> {
        let mut fields: Vec<Field> = Vec::new();
        for name in &self.gridset[i].fields {
            if let Some(field) = self.get_field(name) {
                if !fields.iter().any(|f| f.same_field(field)) {
                    fields.push(field.clone());
                }
            }
        }
        fields
    }

    fn rebuild_grid_index(&mut self) {
        self.grid_index.clear();
        for (i, entry) in self.gridset.iter().enumerate() {
            self.grid_index
                .entry(entry.grid.fingerprint())
                .or_default()
                .push(i);
        }
    }

    /// Register a vector field and any of its components not yet present.
    pub fn add_vector_field(&mut self, vector: VectorField) -> Result<()> {
        self.check_mutable(vector.name())?;
        let missing: Vec<Field> = vector
            .components()
            .filter(|c| !self.entries.contains_key(c.name()))
            .cloned()
            .collect();
        for component in missing {
            self.add_field(component, None)?;
        }
        let name = vector.name().to_string();
        self.entries.insert(name.clone(), Entry::Vector(vector));
        self.order.push(name);
        Ok(())
    }

    /// Register a named scalar constant.
    pub fn add_constant(&mut self, name: impl Into<String>, value: f64) -> Result<()> {
        let name = name.into();
        self.check_mutable(&name)?;
        self.constants.insert(name, value);
        Ok(())
    }

    pub fn constant(&self, name: &str) -> Option<f64> {
        self.constants.get(name).copied()
    }

    pub fn constants(&self) -> &BTreeMap<String, f64> {
        &self.constants
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        match self.entries.get(name) {
            Some(Entry::Field(f)) => Some(f),
            _ => None,
        }
    }

    pub fn get_vector_field(&self, name: &str) -> Option<&VectorField> {
        match self.entries.get(name) {
            Some(Entry::Vector(v)) => Some(v),
            _ => None,
        }
    }

    /// Every member in insertion order.
    pub fn get_fields(&self) -> Vec<&Entry> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .collect()
    }

    /// Scalar fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.order.iter().filter_map(|name| self.get_field(name))
    }

    pub fn gridset(&self) -> &[GridsetEntry] {
        &self.gridset
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    // ------------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------------

    /// Validate the set and freeze its structure.
    ///
    /// Checks data shapes, rejects C-grid velocities on 1x1 grids, aligns
    /// every grid to the first field's time origin and adds the default
    /// `UV` (and `UVW` when `W` exists) vector fields.
    pub fn check_complete(&mut self) -> Result<()> {
        if self.completed {
            return Ok(());
        }

        for field in self.fields() {
            field.validate_shape()?;
            let grid = field.grid()?;
            if field.interp_method()? == InterpMethod::CgridVelocity
                && grid.xdim() == 1
                && grid.ydim() == 1
            {
                return Err(FieldError::unsupported(format!(
                    "cgrid_velocity field '{}' is on a 1x1 grid",
                    field.name()
                )));
            }
        }

        let (u, v) = match (self.get_field("U"), self.get_field("V")) {
            (Some(u), Some(v)) => (u.clone(), v.clone()),
            _ => {
                return Err(FieldError::configuration(
                    "field set needs fields named U and V",
                ))
            }
        };

        self.align_time_origins()?;

        if !self.entries.contains_key("UV") {
            let uv = VectorField::new("UV", u.clone(), v.clone(), None)?;
            self.add_vector_field(uv)?;
        }
        if let Some(w) = self.get_field("W").cloned() {
            if !self.entries.contains_key("UVW") {
                let uvw = VectorField::new("UVW", u, v, Some(w))?;
                self.add_vector_field(uvw)?;
            }
        }

        self.completed = true;
        info!(
            fields = self.order.len(),
            grids = self.gridset.len(),
            "field set complete"
        );
        Ok(())
    }

    fn align_time_origins(&mut self) -> Result<()> {
        let Some(reference) = self.fields().next().map(|f| f.grid()).transpose()? else {
            return Ok(());
        };
        let origin = *reference.time_origin();

        let mut rebased = Vec::new();
        for (i, entry) in self.gridset.iter().enumerate() {
            if *entry.grid.time_origin() != origin {
                let grid = entry.grid.rebased(origin).map_err(|e| {
                    FieldError::configuration(format!(
                        "cannot align time origin of grid {i} ({}): {e}",
                        entry.grid.time_origin()
                    ))
                })?;
                rebased.push((i, Arc::new(grid)));
            }
        }
        if rebased.is_empty() {
            return Ok(());
        }

        for (i, grid) in rebased {
            warn!(gridset_index = i, origin = %origin, "re-expressed grid times on common origin");
            for field in self.grid_fields(i) {
                field.set_grid(Arc::clone(&grid))?;
            }
            self.gridset[i].grid = grid;
        }
        self.merge_equal_grids()?;
        self.rebuild_grid_index();
        Ok(())
    }

    /// Fold gridset entries whose coordinates have become equal into the
    /// first of them.
    fn merge_equal_grids(&mut self) -> Result<()> {
        let mut merged: Vec<GridsetEntry> = Vec::with_capacity(self.gridset.len());
        for entry in std::mem::take(&mut self.gridset) {
            let target = merged.iter().position(|m| {
                m.deferred == entry.deferred && m.grid.same_coordinates(&entry.grid)
            });
            let Some(target) = target else {
                merged.push(entry);
                continue;
            };
            let keep = &mut merged[target];
            for name in &entry.fields {
                if let Some(field) = self.get_field(name) {
                    field.set_grid(Arc::clone(&keep.grid))?;
                }
            }
            debug!(fields = ?entry.fields, gridset_index = target, "merged equal grids");
            keep.fields.extend(entry.fields);
        }
        self.gridset = merged;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Time window
    // ------------------------------------------------------------------------

    /// Advance every grid's resident window to cover `time`.
    ///
    /// Each distinct grid is handled once, however many fields share it.
    /// Fields on a grid are bracketed with their own extrapolation and
    /// periodicity flags, once per distinct combination. Windows are
    /// computed for all grids before any is changed, so a failing bracket
    /// leaves every grid at its previous window. When new slices were
    /// loaded, the [`compute_on_defer`](Self::set_compute_on_defer) hook
    /// runs last. Returns the earliest (latest, when integrating
    /// backwards) time at which another advance is needed.
    pub fn compute_time_chunk(&mut self, time: f64, dt_sign: f64) -> Result<f64> {
        let forward = dt_sign >= 0.0;
        let mut next = if forward {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };

        let mut staged = Vec::with_capacity(self.gridset.len());
        for (i, entry) in self.gridset.iter().enumerate() {
            let mut brackets: Vec<(bool, Option<f64>, Vec<usize>)> = Vec::new();
            let mut planned = Vec::new();
            for field in self.grid_fields(i) {
                if !field.is_deferred()? {
                    planned.push((field, Vec::new()));
                    continue;
                }
                let extrapolate = field.allow_time_extrapolation()?;
                let periodic = field.time_periodic()?;
                let known = brackets
                    .iter()
                    .find(|(e, p, _)| *e == extrapolate && *p == periodic)
                    .map(|(_, _, w)| w.clone());
                let window = match known {
                    Some(window) => window,
                    None => {
                        let bracket = field.time_bracket(time)?;
                        let window =
                            window_for(&bracket, entry.grid.tdim(), dt_sign, periodic.is_some());
                        let field_next =
                            next_advance_time(&entry.grid, &bracket, time, dt_sign, periodic);
                        next = if forward {
                            next.min(field_next)
                        } else {
                            next.max(field_next)
                        };
                        brackets.push((extrapolate, periodic, window.clone()));
                        window
                    }
                };
                planned.push((field, window));
            }
            staged.push((i, planned));
        }

        let transient = if forward {
            GridState::Advancing
        } else {
            GridState::Retreating
        };
        let mut loaded = false;
        for (i, planned) in staged {
            let mut span: Option<(usize, usize)> = None;
            for (field, window) in planned {
                loaded |= field.apply_window(&window)?;
                if let (Some(&lo), Some(&hi)) = (window.first(), window.last()) {
                    span = Some(match span {
                        Some((first, last)) => (first.min(lo), last.max(hi)),
                        None => (lo, hi),
                    });
                }
            }
            if let Some((first, last)) = span {
                debug!(gridset_index = i, first, last, state = ?transient, "advancing grid window");
                self.gridset[i].state = GridState::Windowed { first, last };
            }
        }

        if loaded {
            if let Some(hook) = &self.compute_on_defer {
                debug!(time, "running compute_on_defer hook");
                (hook.0)(&*self)?;
            }
        }
        Ok(next)
    }

    // ------------------------------------------------------------------------
    // Halo
    // ------------------------------------------------------------------------

    /// Add a periodic halo to every grid and field of the set.
    pub fn add_periodic_halo(&mut self, zonal: bool, meridional: bool, halosize: usize) -> Result<()> {
        if self.completed {
            return Err(FieldError::FieldSetComplete("periodic halo".to_string()));
        }
        let extended = self
            .gridset
            .iter()
            .map(|entry| {
                entry
                    .grid
                    .with_periodic_halo(zonal, meridional, halosize)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        for (i, grid) in extended.into_iter().enumerate() {
            for field in self.grid_fields(i) {
                field.install_halo(Arc::clone(&grid), zonal, meridional, halosize)?;
            }
            self.gridset[i].grid = grid;
        }
        self.rebuild_grid_index();
        info!(zonal, meridional, halosize, "added periodic halo to field set");
        Ok(())
    }
}
