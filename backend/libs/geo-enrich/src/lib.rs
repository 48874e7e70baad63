//! Geospatial enrichment for the event processor.
//!
//! Turns a raw `(lat, lon, accuracy)` triple into the dimensions the fact
//! tables are keyed on: H3 cells at three resolutions, a precision class, the
//! containing place and administrative areas, and the hour bucket. H3 math is
//! done in-process (h3o); containment tests run in PostGIS where the
//! reference geometries live.

pub mod cells;
pub mod precision;
pub mod resolver;

pub use cells::{boundary_wkt, centroid_wkt, hour_bucket, CellSet};
pub use precision::PrecisionClass;
pub use resolver::{GeoDimensions, GeoResolver};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("coordinates out of range: {0}")]
    InvalidCoordinates(#[from] h3o::error::InvalidLatLng),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
