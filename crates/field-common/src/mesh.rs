//! Mesh conventions for horizontal coordinates.

use serde::{Deserialize, Serialize};

/// Metres per degree of latitude (one nautical mile per arc minute).
pub const DEG2M: f64 = 1852.0 * 60.0;

/// How horizontal coordinates are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mesh {
    /// Longitude/latitude in degrees on a sphere.
    #[default]
    Spherical,
    /// Cartesian coordinates in metres.
    Flat,
}

impl Mesh {
    /// Parse from string (case-insensitive). Unknown names yield `None`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "spherical" => Some(Self::Spherical),
            "flat" => Some(Self::Flat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spherical => "spherical",
            Self::Flat => "flat",
        }
    }

    pub fn is_spherical(&self) -> bool {
        matches!(self, Self::Spherical)
    }

    /// Distance between two points, in metres on a spherical mesh.
    ///
    /// The zonal leg is scaled by `cos(lat)` where `lat` is the latitude the
    /// caller considers representative for the segment.
    pub fn distance(&self, lat1: f64, lat2: f64, lon1: f64, lon2: f64, lat: f64) -> f64 {
        match self {
            Self::Spherical => {
                let dx = (lon2 - lon1) * DEG2M * lat.to_radians().cos();
                let dy = (lat2 - lat1) * DEG2M;
                (dx * dx + dy * dy).sqrt()
            }
            Self::Flat => {
                let dx = lon2 - lon1;
                let dy = lat2 - lat1;
                (dx * dx + dy * dy).sqrt()
            }
        }
    }
}

impl std::fmt::Display for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_from_str() {
        assert_eq!(Mesh::from_str("FLAT"), Some(Mesh::Flat));
        assert_eq!(Mesh::from_str("spherical"), Some(Mesh::Spherical));
        assert_eq!(Mesh::from_str("torus"), None);
        assert_eq!(Mesh::default(), Mesh::Spherical);
    }

    #[test]
    fn test_mesh_serde_names() {
        assert_eq!(serde_json::to_string(&Mesh::Flat).unwrap(), "\"flat\"");
        let mesh: Mesh = serde_json::from_str("\"spherical\"").unwrap();
        assert_eq!(mesh, Mesh::Spherical);
    }

    #[test]
    fn test_flat_distance_is_euclidean() {
        let d = Mesh::Flat.distance(0.0, 4.0, 0.0, 3.0, 0.0);
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_spherical_zonal_distance_shrinks_poleward() {
        let equator = Mesh::Spherical.distance(0.0, 0.0, 0.0, 1.0, 0.0);
        let sixty = Mesh::Spherical.distance(60.0, 60.0, 0.0, 1.0, 60.0);
        assert!((equator - DEG2M).abs() < 1e-6);
        assert!((sixty - DEG2M * 0.5).abs() < 1e-6);
    }
}
