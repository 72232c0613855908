//! Resolution of logical dimensions to the names used in stored arrays.

use std::collections::BTreeMap;

use crate::types::Dim;

const TIME_ALIASES: &[&str] = &["time", "time_count", "time_counter", "timer_count", "t"];
const DEPTH_ALIASES: &[&str] = &[
    "depth", "depthu", "depthv", "depthw", "depths", "deptht", "depthx", "depthy", "depthz",
    "z", "z_u", "z_v", "s_rho", "s_u", "s_v", "s_w", "st_ocean", "nav_lev", "lev", "level",
];
const LAT_ALIASES: &[&str] = &["lat", "nav_lat", "y", "latitude", "la", "lt", "j", "YC", "YG"];
const LON_ALIASES: &[&str] = &["lon", "nav_lon", "x", "longitude", "lo", "ln", "i", "XC", "XG"];

/// Ordered aliases per logical dimension.
///
/// Every buffer owns its own map; registering an alias on one buffer never
/// affects another.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionNameMap {
    aliases: BTreeMap<Dim, Vec<String>>,
}

impl Default for DimensionNameMap {
    fn default() -> Self {
        let to_vec = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let aliases = BTreeMap::from([
            (Dim::Time, to_vec(TIME_ALIASES)),
            (Dim::Depth, to_vec(DEPTH_ALIASES)),
            (Dim::Lat, to_vec(LAT_ALIASES)),
            (Dim::Lon, to_vec(LON_ALIASES)),
        ]);
        Self { aliases }
    }
}

impl DimensionNameMap {
    /// Add an alias for `dim`. Registered aliases take precedence over the
    /// defaults.
    pub fn register(&mut self, dim: Dim, name: impl Into<String>) {
        let name = name.into();
        let names = self.aliases.entry(dim).or_default();
        names.retain(|n| n != &name);
        names.insert(0, name);
    }

    /// Copy of this map with the given names registered.
    pub fn with_requested<'a>(&self, requested: impl IntoIterator<Item = (Dim, &'a str)>) -> Self {
        let mut map = self.clone();
        for (dim, name) in requested {
            map.register(dim, name);
        }
        map
    }

    pub fn aliases(&self, dim: Dim) -> &[String] {
        self.aliases.get(&dim).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Position in `stored` of the first alias of `dim` present there.
    pub fn resolve(&self, dim: Dim, stored: &[String]) -> Option<usize> {
        self.aliases(dim)
            .iter()
            .find_map(|alias| stored.iter().position(|s| s == alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_aliases_resolve_nemo_names() {
        let map = DimensionNameMap::default();
        let stored = names(&["time_counter", "deptht", "y", "x"]);
        assert_eq!(map.resolve(Dim::Time, &stored), Some(0));
        assert_eq!(map.resolve(Dim::Depth, &stored), Some(1));
        assert_eq!(map.resolve(Dim::Lat, &stored), Some(2));
        assert_eq!(map.resolve(Dim::Lon, &stored), Some(3));
    }

    #[test]
    fn test_unknown_name_is_unresolved() {
        let map = DimensionNameMap::default();
        assert_eq!(map.resolve(Dim::Lon, &names(&["nxdim", "nydim"])), None);
    }

    #[test]
    fn test_register_is_per_instance() {
        let mut first = DimensionNameMap::default();
        let second = DimensionNameMap::default();
        first.register(Dim::Lon, "nxdim");

        let stored = names(&["nydim", "nxdim"]);
        assert_eq!(first.resolve(Dim::Lon, &stored), Some(1));
        assert_eq!(second.resolve(Dim::Lon, &stored), None);
    }

    #[test]
    fn test_registered_alias_takes_precedence() {
        let map = DimensionNameMap::default().with_requested([(Dim::Depth, "z_w")]);
        let stored = names(&["depth", "z_w", "lat", "lon"]);
        assert_eq!(map.resolve(Dim::Depth, &stored), Some(1));
        assert_eq!(map.aliases(Dim::Depth)[0], "z_w");
    }
}
