//! Conversions between stored units and mesh units.
//!
//! Velocities are stored in m/s but particles move in degrees on a
//! spherical mesh, so sampled values are converted on the way out.
//! Diffusivities (m²/s) use the squared variants.

use serde::{Deserialize, Serialize};

use crate::mesh::{Mesh, DEG2M};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitConverter {
    /// Values pass through unchanged.
    #[default]
    Identity,
    /// Metres to degrees of latitude.
    Geographic,
    /// Metres to degrees of longitude at the sample latitude.
    GeographicPolar,
    /// Square metres to square degrees of latitude.
    GeographicSquare,
    /// Square metres to square degrees of longitude.
    GeographicPolarSquare,
}

impl UnitConverter {
    /// Default converter for a field called `name` on the given mesh.
    ///
    /// Flat meshes never convert. On spherical meshes `U`, `V`, `Kh_zonal`
    /// and `Kh_meridional` get the geographic converters.
    pub fn for_field(name: &str, mesh: Mesh) -> Self {
        if !mesh.is_spherical() {
            return Self::Identity;
        }
        match name {
            "U" => Self::GeographicPolar,
            "V" => Self::Geographic,
            "Kh_zonal" => Self::GeographicPolarSquare,
            "Kh_meridional" => Self::GeographicSquare,
            _ => Self::Identity,
        }
    }

    /// Parse from string (case-insensitive). Field type names `U`, `V`,
    /// `Kh_zonal` and `Kh_meridional` map to their default converters.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "identity" | "none" => Some(Self::Identity),
            "geographic" | "v" => Some(Self::Geographic),
            "geographic_polar" | "geographicpolar" | "u" => Some(Self::GeographicPolar),
            "geographic_square" | "geographicsquare" | "kh_meridional" => {
                Some(Self::GeographicSquare)
            }
            "geographic_polar_square" | "geographicpolarsquare" | "kh_zonal" => {
                Some(Self::GeographicPolarSquare)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Geographic => "geographic",
            Self::GeographicPolar => "geographic_polar",
            Self::GeographicSquare => "geographic_square",
            Self::GeographicPolarSquare => "geographic_polar_square",
        }
    }

    /// Convert a stored value to mesh units at latitude `lat` (degrees).
    pub fn to_target(&self, value: f64, lat: f64) -> f64 {
        match self {
            Self::Identity => value,
            Self::Geographic => value / DEG2M,
            Self::GeographicPolar => value / (DEG2M * lat.to_radians().cos()),
            Self::GeographicSquare => value / (DEG2M * DEG2M),
            Self::GeographicPolarSquare => {
                let cos = lat.to_radians().cos();
                value / (DEG2M * DEG2M * cos * cos)
            }
        }
    }

    /// Inverse of [`to_target`](Self::to_target).
    pub fn to_source(&self, value: f64, lat: f64) -> f64 {
        match self {
            Self::Identity => value,
            Self::Geographic => value * DEG2M,
            Self::GeographicPolar => value * DEG2M * lat.to_radians().cos(),
            Self::GeographicSquare => value * DEG2M * DEG2M,
            Self::GeographicPolarSquare => {
                let cos = lat.to_radians().cos();
                value * DEG2M * DEG2M * cos * cos
            }
        }
    }
}

impl std::fmt::Display for UnitConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
