//! H3 cell derivation and time bucketing.

use chrono::{DateTime, Duration, DurationRound, Utc};
use h3o::{CellIndex, LatLng, Resolution};

use crate::GeoError;

/// H3 indices of one fix at the three resolutions the pipeline materializes.
/// r7 ≈ 5 km², r9 ≈ 0.1 km², r11 ≈ 2000 m².
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSet {
    pub r7: CellIndex,
    pub r9: CellIndex,
    pub r11: CellIndex,
}

impl CellSet {
    /// Derive all three cells from a WGS84 coordinate.
    pub fn derive(lat: f64, lon: f64) -> Result<Self, GeoError> {
        let coord = LatLng::new(lat, lon)?;
        Ok(Self {
            r7: coord.to_cell(Resolution::Seven),
            r9: coord.to_cell(Resolution::Nine),
            r11: coord.to_cell(Resolution::Eleven),
        })
    }

    pub fn all(&self) -> [CellIndex; 3] {
        [self.r7, self.r9, self.r11]
    }
}

/// Floor a timestamp to its UTC hour, the grain of the presence facts.
pub fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::hours(1)).unwrap_or(ts)
}

/// Cell boundary as a WKT polygon (lon/lat order, closed ring) for PostGIS.
pub fn boundary_wkt(cell: CellIndex) -> String {
    let boundary = cell.boundary();
    let mut parts: Vec<String> = boundary
        .iter()
        .map(|v| format!("{} {}", v.lng(), v.lat()))
        .collect();
    if let Some(first) = parts.first().cloned() {
        parts.push(first);
    }
    format!("POLYGON(({}))", parts.join(", "))
}

/// Cell centroid as a WKT point for PostGIS.
pub fn centroid_wkt(cell: CellIndex) -> String {
    let center = LatLng::from(cell);
    format!("POINT({} {})", center.lng(), center.lat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SD_LAT: f64 = 18.4861;
    const SD_LON: f64 = -69.9312;

    #[test]
    fn derives_cells_at_expected_resolutions() {
        let cells = CellSet::derive(SD_LAT, SD_LON).unwrap();
        assert_eq!(cells.r7.resolution(), Resolution::Seven);
        assert_eq!(cells.r9.resolution(), Resolution::Nine);
        assert_eq!(cells.r11.resolution(), Resolution::Eleven);
    }

    #[test]
    fn cell_strings_parse_back() {
        let cells = CellSet::derive(SD_LAT, SD_LON).unwrap();
        for cell in cells.all() {
            let parsed: CellIndex = cell.to_string().parse().unwrap();
            assert_eq!(parsed, cell);
        }
    }

    #[test]
    fn same_point_is_deterministic() {
        let a = CellSet::derive(SD_LAT, SD_LON).unwrap();
        let b = CellSet::derive(SD_LAT, SD_LON).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn out_of_range_coordinates_fail() {
        assert!(CellSet::derive(91.0, 0.0).is_err());
        assert!(CellSet::derive(0.0, 181.0).is_err());
    }

    #[test]
    fn hour_bucket_floors_to_the_hour() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 25, 10, 5, 33).unwrap();
        let bucket = hour_bucket(ts);
        assert_eq!(bucket, Utc.with_ymd_and_hms(2026, 1, 25, 10, 0, 0).unwrap());

        let exact = Utc.with_ymd_and_hms(2026, 1, 25, 10, 0, 0).unwrap();
        assert_eq!(hour_bucket(exact), exact);
    }

    #[test]
    fn boundary_wkt_is_a_closed_ring() {
        let cells = CellSet::derive(SD_LAT, SD_LON).unwrap();
        let wkt = boundary_wkt(cells.r9);
        assert!(wkt.starts_with("POLYGON(("));
        assert!(wkt.ends_with("))"));
        let inner = &wkt["POLYGON((".len()..wkt.len() - 2];
        let vertices: Vec<&str> = inner.split(", ").collect();
        // Hexagon (or pentagon) plus the closing vertex.
        assert!(vertices.len() >= 6);
        assert_eq!(vertices.first(), vertices.last());
    }

    #[test]
    fn centroid_is_near_the_input_point() {
        let cells = CellSet::derive(SD_LAT, SD_LON).unwrap();
        let center = LatLng::from(cells.r11);
        assert!((center.lat() - SD_LAT).abs() < 0.01);
        assert!((center.lng() - SD_LON).abs() < 0.01);
    }
}
