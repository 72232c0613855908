//! Horizontal extent of a grid.

use serde::{Deserialize, Serialize};

/// Axis-aligned lon/lat (or x/y) extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl Extent {
    pub fn new(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        }
    }

    /// Extent covering every finite coordinate pair.
    ///
    /// Returns `None` if no finite value is present on either axis.
    pub fn from_coordinates(lon: &[f64], lat: &[f64]) -> Option<Self> {
        let (min_lon, max_lon) = min_max(lon)?;
        let (min_lat, max_lat) = min_max(lat)?;
        Some(Self::new(min_lon, max_lon, min_lat, max_lat))
    }

    pub fn contains_lon(&self, lon: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon
    }

    pub fn contains_lat(&self, lat: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.contains_lon(lon) && self.contains_lat(lat)
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_coordinates_skips_nan() {
        let e = Extent::from_coordinates(&[3.0, f64::NAN, -1.0], &[10.0, 20.0]).unwrap();
        assert_eq!(e, Extent::new(-1.0, 3.0, 10.0, 20.0));
        assert_eq!(e.width(), 4.0);
        assert!(e.contains(0.0, 15.0));
        assert!(!e.contains(4.0, 15.0));
    }

    #[test]
    fn test_empty_coordinates() {
        assert!(Extent::from_coordinates(&[], &[1.0]).is_none());
    }
}
