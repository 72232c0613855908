//! Engine configuration and the keyword options accepted by field
//! constructors.

use std::collections::BTreeMap;
use std::ops::Range;

use field_common::Mesh;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{FieldError, Result};
use crate::types::{ChunkSize, Dim, Dtype, InterpMethod};

/// Process-level settings for chunk management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on resident chunk bytes per buffer, in megabytes.
    pub chunk_memory_budget_mb: usize,

    /// Target chunk size for `chunksize: auto`, in megabytes.
    pub auto_chunk_target_mb: usize,

    /// Evict chunks of retained time slices that were not sampled since the
    /// previous window advance.
    pub evict_untouched_chunks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_memory_budget_mb: 1024,
            auto_chunk_target_mb: 128,
            evict_untouched_chunks: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FIELDSET_CHUNK_BUDGET_MB") {
            if let Ok(size) = val.parse() {
                config.chunk_memory_budget_mb = size;
            }
        }

        if let Ok(val) = std::env::var("FIELDSET_AUTO_CHUNK_MB") {
            if let Ok(size) = val.parse() {
                config.auto_chunk_target_mb = size;
            }
        }

        if let Ok(val) = std::env::var("FIELDSET_EVICT_UNTOUCHED") {
            config.evict_untouched_chunks = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.chunk_memory_budget_mb == 0 {
            return Err("chunk_memory_budget_mb must be > 0".to_string());
        }

        if self.auto_chunk_target_mb == 0 {
            return Err("auto_chunk_target_mb must be > 0".to_string());
        }

        if self.auto_chunk_target_mb > self.chunk_memory_budget_mb {
            return Err("auto_chunk_target_mb must not exceed chunk_memory_budget_mb".to_string());
        }

        Ok(())
    }

    pub fn chunk_memory_budget_bytes(&self) -> usize {
        self.chunk_memory_budget_mb * 1024 * 1024
    }

    pub fn auto_chunk_target_bytes(&self) -> usize {
        self.auto_chunk_target_mb * 1024 * 1024
    }
}

/// A setting given once for all fields or per field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerField<T> {
    All(T),
    ByName(BTreeMap<String, T>),
}

impl<T> PerField<T> {
    pub fn get(&self, name: &str) -> Option<&T> {
        match self {
            Self::All(v) => Some(v),
            Self::ByName(map) => map.get(name),
        }
    }
}

/// Keyword options for field construction.
///
/// Unknown keys are rejected with [`FieldError::UnknownKeyword`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldOptions {
    pub mesh: Option<Mesh>,
    pub interp_method: Option<PerField<InterpMethod>>,
    pub chunksize: Option<ChunkSize>,
    /// Period in seconds; `false` disables.
    #[serde(deserialize_with = "deserialize_period")]
    pub time_periodic: Option<f64>,
    pub allow_time_extrapolation: Option<bool>,
    pub cast_data_dtype: Option<Dtype>,
    pub deferred_load: Option<bool>,
    /// Data is ordered (x, y[, z][, t]) instead of (t, z, y, x).
    pub transpose: bool,
    pub vmin: Option<f64>,
    pub vmax: Option<f64>,
    /// Overrides the name used to pick a unit converter.
    pub fieldtype: Option<PerField<String>>,
    /// Time values (seconds) per file, replacing stored time coordinates.
    pub timestamps: Option<Vec<Vec<f64>>>,
    /// Contiguous index subsets per logical dimension.
    pub indices: Option<BTreeMap<String, Vec<usize>>>,
    /// ISO 8601 origin for in-memory time coordinates.
    pub time_origin: Option<String>,
    pub calendar: Option<String>,
    pub to_write: Option<bool>,
}

fn deserialize_period<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Period {
        Flag(bool),
        Seconds(f64),
    }

    match Option::<Period>::deserialize(deserializer)? {
        None | Some(Period::Flag(false)) => Ok(None),
        Some(Period::Flag(true)) => Err(serde::de::Error::custom(
            "time_periodic must be a period in seconds or false",
        )),
        Some(Period::Seconds(s)) => Ok(Some(s)),
    }
}

fn keyword_error(msg: String) -> FieldError {
    if msg.contains("unknown field") {
        FieldError::UnknownKeyword(msg)
    } else {
        FieldError::Configuration(msg)
    }
}

impl FieldOptions {
    /// Parse options from a JSON object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let options: Self =
            serde_json::from_value(value.clone()).map_err(|e| keyword_error(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Parse options from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let options: Self =
            serde_yaml::from_str(text).map_err(|e| keyword_error(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if let Some(period) = self.time_periodic {
            if !(period > 0.0) {
                return Err(FieldError::configuration(format!(
                    "time_periodic must be positive, got {period}"
                )));
            }
        }
        if let (Some(lo), Some(hi)) = (self.vmin, self.vmax) {
            if lo > hi {
                return Err(FieldError::configuration(format!(
                    "vmin ({lo}) is larger than vmax ({hi})"
                )));
            }
        }
        if let Some(indices) = &self.indices {
            for (key, idx) in indices {
                if idx.is_empty() {
                    return Err(FieldError::configuration(format!(
                        "indices for '{key}' are empty"
                    )));
                }
            }
        }
        Ok(())
    }

    /// `indices` as contiguous ranges per logical dimension.
    pub fn index_ranges(&self) -> Result<Option<BTreeMap<Dim, Range<usize>>>> {
        let Some(indices) = &self.indices else {
            return Ok(None);
        };
        let mut ranges = BTreeMap::new();
        for (key, idx) in indices {
            let dim = Dim::parse_key(key)?;
            let (first, last) = match (idx.first(), idx.last()) {
                (Some(&f), Some(&l)) => (f, l),
                _ => {
                    return Err(FieldError::configuration(format!(
                        "indices for '{key}' are empty"
                    )))
                }
            };
            if idx.windows(2).any(|w| w[1] != w[0] + 1) {
                return Err(FieldError::configuration(format!(
                    "indices for '{key}' must be contiguous and ascending"
                )));
            }
            ranges.insert(dim, first..last + 1);
        }
        Ok(Some(ranges))
    }

    pub fn interp_for(&self, name: &str) -> InterpMethod {
        self.interp_method
            .as_ref()
            .and_then(|m| m.get(name))
            .copied()
            .unwrap_or_default()
    }

    pub fn fieldtype_for(&self, name: &str) -> Option<&str> {
        self.fieldtype.as_ref().and_then(|f| f.get(name)).map(String::as_str)
    }

    pub fn mesh(&self) -> Mesh {
        self.mesh.unwrap_or_default()
    }

    pub fn dtype(&self) -> Dtype {
        self.cast_data_dtype.unwrap_or_default()
    }

    /// Fill every unset option from `fallback`.
    pub fn or(self, fallback: FieldOptions) -> FieldOptions {
        FieldOptions {
            mesh: self.mesh.or(fallback.mesh),
            interp_method: self.interp_method.or(fallback.interp_method),
            chunksize: self.chunksize.or(fallback.chunksize),
            time_periodic: self.time_periodic.or(fallback.time_periodic),
            allow_time_extrapolation: self
                .allow_time_extrapolation
                .or(fallback.allow_time_extrapolation),
            cast_data_dtype: self.cast_data_dtype.or(fallback.cast_data_dtype),
            deferred_load: self.deferred_load.or(fallback.deferred_load),
            transpose: self.transpose || fallback.transpose,
            vmin: self.vmin.or(fallback.vmin),
            vmax: self.vmax.or(fallback.vmax),
            fieldtype: self.fieldtype.or(fallback.fieldtype),
            timestamps: self.timestamps.or(fallback.timestamps),
            indices: self.indices.or(fallback.indices),
            time_origin: self.time_origin.or(fallback.time_origin),
            calendar: self.calendar.or(fallback.calendar),
            to_write: self.to_write.or(fallback.to_write),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_memory_budget_mb, 1024);
        assert_eq!(config.auto_chunk_target_mb, 128);
        assert!(config.evict_untouched_chunks);
        assert_eq!(config.chunk_memory_budget_bytes(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.chunk_memory_budget_mb = 0;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.auto_chunk_target_mb = 2048;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_keyword_rejected() {
        let err = FieldOptions::from_json(&json!({"mesh": "flat", "foo": 1})).unwrap_err();
        assert!(matches!(err, FieldError::UnknownKeyword(_)), "got {err:?}");

        let err = FieldOptions::from_yaml("mesh: flat\nbar: true\n").unwrap_err();
        assert!(matches!(err, FieldError::UnknownKeyword(_)), "got {err:?}");
    }

    #[test]
    fn test_recognised_keywords() {
        let opts = FieldOptions::from_json(&json!({
            "mesh": "flat",
            "interp_method": {"U": "cgrid_velocity", "temp": "nearest"},
            "chunksize": false,
            "time_periodic": 86400.0,
            "allow_time_extrapolation": true,
            "cast_data_dtype": "float64",
            "fieldtype": "U",
        }))
        .unwrap();
        assert_eq!(opts.mesh(), Mesh::Flat);
        assert_eq!(opts.interp_for("U"), InterpMethod::CgridVelocity);
        assert_eq!(opts.interp_for("temp"), InterpMethod::Nearest);
        assert_eq!(opts.interp_for("salt"), InterpMethod::Linear);
        assert_eq!(opts.chunksize, Some(ChunkSize::Disabled));
        assert_eq!(opts.time_periodic, Some(86400.0));
        assert_eq!(opts.dtype(), Dtype::Float64);
        assert_eq!(opts.fieldtype_for("anything"), Some("U"));
    }

    #[test]
    fn test_time_periodic_false() {
        let opts = FieldOptions::from_json(&json!({"time_periodic": false})).unwrap();
        assert_eq!(opts.time_periodic, None);
        assert!(FieldOptions::from_json(&json!({"time_periodic": -1.0})).is_err());
    }

    #[test]
    fn test_empty_indices_rejected() {
        let err = FieldOptions::from_json(&json!({"indices": {"lon": []}})).unwrap_err();
        assert!(matches!(err, FieldError::Configuration(_)));
    }

    #[test]
    fn test_index_ranges() {
        let opts = FieldOptions::from_json(&json!({"indices": {"lat": [2, 3, 4]}})).unwrap();
        let ranges = opts.index_ranges().unwrap().unwrap();
        assert_eq!(ranges[&Dim::Lat], 2..5);

        let gaps = FieldOptions::from_json(&json!({"indices": {"lon": [0, 2]}})).unwrap();
        assert!(gaps.index_ranges().is_err());

        let unknown = FieldOptions::from_json(&json!({"indices": {"ensemble": [0]}})).unwrap();
        assert!(matches!(
            unknown.index_ranges().unwrap_err(),
            FieldError::DimensionName { .. }
        ));
    }

    #[test]
    fn test_or_prefers_self() {
        let user = FieldOptions {
            mesh: Some(Mesh::Flat),
            ..Default::default()
        };
        let stored = FieldOptions {
            mesh: Some(Mesh::Spherical),
            time_periodic: Some(10.0),
            ..Default::default()
        };
        let merged = user.or(stored);
        assert_eq!(merged.mesh, Some(Mesh::Flat));
        assert_eq!(merged.time_periodic, Some(10.0));
    }
}
