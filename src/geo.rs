//! Geographic coordinate similarity
//!
//! Coordinates are `(latitude, longitude)` pairs in degrees, parsed out
//! of two text fields. Malformed numerics and out-of-range values are
//! missing, never errors.

use crate::get::{FieldSpec, Getter};
use crate::sim::FieldComparator;
use crate::types::Record;

const EARTH_RADIUS_KM: f64 = 6372.0;

/// Reads a `(lat, lon)` pair from two fields of a record.
#[derive(Clone)]
pub struct CoordGetter {
    lat: Getter,
    lon: Getter,
}

impl CoordGetter {
    pub fn new(latfield: impl Into<FieldSpec>, lonfield: impl Into<FieldSpec>) -> Self {
        CoordGetter {
            lat: Getter::new(latfield),
            lon: Getter::new(lonfield),
        }
    }

    /// `None` when either field is missing or fails to parse.
    pub fn get(&self, record: &Record) -> Option<(f64, f64)> {
        let lat: f64 = self.lat.get(record)?.parse().ok()?;
        let lon: f64 = self.lon.get(record)?.parse().ok()?;
        Some((lat, lon))
    }
}

/// Whether the pair lies inside the valid latitude/longitude ranges.
pub fn valid(coords: (f64, f64)) -> bool {
    let (lat, lon) = coords;
    lat.is_finite() && lon.is_finite() && lat.abs() < 90.0 && lon.abs() < 180.0
}

/// Great-circle distance between two coordinate pairs, in kilometers.
///
/// Distances under three meters collapse to zero so that re-geocoded
/// copies of the same address compare as identical.
pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let cosine = (lon1 - lon2).cos() * lat1.cos() * lat2.cos() + lat1.sin() * lat2.sin();
    let km = if cosine >= 1.0 {
        0.0
    } else {
        EARTH_RADIUS_KM * cosine.acos()
    };
    if km <= 0.003 {
        0.0
    } else {
        km
    }
}

/// Distance-based similarity of two records' coordinates
///
/// 1.0 within `near` kilometers, falling linearly to 0.0 at `far`.
/// Invalid or unparseable coordinates on either side yield missing.
pub struct GeoField {
    get1: CoordGetter,
    get2: CoordGetter,
    near: f64,
    far: f64,
}

impl GeoField {
    /// Panics if `near` is negative or not below `far`; the bounds are
    /// fixed configuration, not data.
    pub fn new(get: CoordGetter, near: f64, far: f64) -> Self {
        assert!(
            (0.0..far).contains(&near),
            "near must satisfy 0 <= near < far (near={near}, far={far})"
        );
        GeoField {
            get1: get.clone(),
            get2: get,
            near,
            far,
        }
    }

    /// Different coordinate fields per side.
    pub fn asymmetric(get1: CoordGetter, get2: CoordGetter, near: f64, far: f64) -> Self {
        let mut field = GeoField::new(get1, near, far);
        field.get2 = get2;
        field
    }

    fn similarity(&self, a: (f64, f64), b: (f64, f64)) -> f64 {
        let km = distance(a, b);
        if km <= self.near {
            1.0
        } else if km >= self.far {
            0.0
        } else {
            1.0 - (km - self.near) / (self.far - self.near)
        }
    }
}

impl FieldComparator for GeoField {
    fn compare(&self, a: &Record, b: &Record) -> Option<f64> {
        let ca = self.get1.get(a).filter(|c| valid(*c))?;
        let cb = self.get2.get(b).filter(|c| valid(*c))?;
        Some(self.similarity(ca, cb))
    }

    fn left_value(&self, record: &Record) -> Option<String> {
        self.get1.get(record).map(|(lat, lon)| format!("{lat},{lon}"))
    }

    fn right_value(&self, record: &Record) -> Option<String> {
        self.get2.get(record).map(|(lat, lon)| format!("{lat},{lon}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Schema;
    use std::sync::Arc;

    // Kilometers per degree at the equator.
    const DEG: f64 = 111.212_379_937_067_58;

    fn record(lat: &str, lon: &str) -> Record {
        let schema = Arc::new(Schema::new(["Lat", "Lon"]).unwrap());
        Record::new(schema, vec![lat.to_string(), lon.to_string()])
    }

    #[test]
    fn test_coord_getter() {
        let getter = CoordGetter::new("Lat", "Lon");
        assert_eq!(getter.get(&record("20.0", "10.0")), Some((20.0, 10.0)));
        assert_eq!(getter.get(&record("20.0", "north")), None);
        assert_eq!(getter.get(&record("", "10.0")), None);
    }

    #[test]
    fn test_valid_ranges() {
        assert!(valid((0.0, 0.0)));
        assert!(valid((-89.9, 179.9)));
        assert!(!valid((91.0, 0.0)));
        assert!(!valid((0.0, 181.0)));
        assert!(!valid((f64::NAN, 0.0)));
    }

    #[test]
    fn test_equator_degree_distance() {
        let km = distance((0.0, 0.0), (1.0, 0.0));
        assert!((km - DEG).abs() < 1e-6);
        let km = distance((0.0, 0.0), (0.0, 1.0));
        assert!((km - DEG).abs() < 1e-6);
        assert_eq!(distance((5.0, 5.0), (5.0, 5.0)), 0.0);
    }

    #[test]
    fn test_similarity_bands() {
        let getter = CoordGetter::new("Lat", "Lon");
        let origin = record("0.0", "0.0");
        let one_deg = record("1.0", "0.0");

        let inside = GeoField::new(getter.clone(), DEG * 1.5, DEG * 2.0);
        assert_eq!(inside.compare(&origin, &one_deg), Some(1.0));

        let outside = GeoField::new(getter.clone(), 0.0, DEG * 0.5);
        assert_eq!(outside.compare(&origin, &one_deg), Some(0.0));

        let partial = GeoField::new(getter, 0.0, DEG * 1.5);
        let score = partial.compare(&origin, &one_deg).unwrap();
        assert!((score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_coordinates_are_missing() {
        let getter = CoordGetter::new("Lat", "Lon");
        let field = GeoField::new(getter, 0.0, 3.0);
        assert_eq!(field.compare(&record("95.0", "0.0"), &record("0.0", "0.0")), None);
        assert_eq!(field.compare(&record("x", "0.0"), &record("0.0", "0.0")), None);
    }
}
