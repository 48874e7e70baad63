//! Reference-geometry lookups and the resolved dimension set.

use chrono::{DateTime, Utc};
use h3o::CellIndex;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::{boundary_wkt, centroid_wkt, CellSet, GeoError, PrecisionClass};

/// Everything the materializers need to know about one geolocated event.
#[derive(Debug, Clone)]
pub struct GeoDimensions {
    pub precision: PrecisionClass,
    pub h3_r7: String,
    pub h3_r9: String,
    pub h3_r11: String,
    pub place_id: Option<i64>,
    pub country_code: Option<String>,
    pub province_code: Option<String>,
    pub municipality_code: Option<String>,
    pub sector_code: Option<String>,
}

/// Read-only resolver over the `places` / `admin_areas` reference tables plus
/// the lazily populated `h3_cells` registry.
#[derive(Clone)]
pub struct GeoResolver {
    pool: PgPool,
}

impl GeoResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve one fix to its dimensions.
    ///
    /// H3 indices are derived unconditionally. Place and admin containment
    /// run against PostGIS; for coarse fixes the municipality and sector
    /// codes are dropped (a 500 m radius cannot place a device on a block)
    /// while country and province remain trustworthy.
    pub async fn resolve(
        &self,
        lat: f64,
        lon: f64,
        accuracy_m: f64,
        event_ts: DateTime<Utc>,
    ) -> Result<GeoDimensions, GeoError> {
        let precision = PrecisionClass::from_accuracy_m(accuracy_m);
        let cells = CellSet::derive(lat, lon)?;
        self.ensure_cells(&cells).await?;

        let place_id = self.lookup_place(lat, lon, event_ts).await?;
        let admin = self.lookup_admin(lat, lon).await?;

        let (municipality_code, sector_code) = match precision {
            PrecisionClass::Coarse => (None, None),
            _ => (admin.municipality_code, admin.sector_code),
        };

        Ok(GeoDimensions {
            precision,
            h3_r7: cells.r7.to_string(),
            h3_r9: cells.r9.to_string(),
            h3_r11: cells.r11.to_string(),
            place_id,
            country_code: admin.country_code,
            province_code: admin.province_code,
            municipality_code,
            sector_code,
        })
    }

    async fn lookup_place(
        &self,
        lat: f64,
        lon: f64,
        event_ts: DateTime<Utc>,
    ) -> Result<Option<i64>, GeoError> {
        let place_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM places
            WHERE valid_from <= $3
              AND (valid_to IS NULL OR valid_to > $3)
              AND ST_Contains(geom, ST_SetSRID(ST_MakePoint($1, $2), 4326))
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(lon)
        .bind(lat)
        .bind(event_ts)
        .fetch_optional(&self.pool)
        .await?;
        Ok(place_id)
    }

    async fn lookup_admin(&self, lat: f64, lon: f64) -> Result<AdminCodes, GeoError> {
        let rows = sqlx::query(
            r#"
            SELECT level, code FROM admin_areas
            WHERE ST_Contains(geom, ST_SetSRID(ST_MakePoint($1, $2), 4326))
            "#,
        )
        .bind(lon)
        .bind(lat)
        .fetch_all(&self.pool)
        .await?;

        let mut admin = AdminCodes::default();
        for row in rows {
            let level: String = row.try_get("level")?;
            let code: String = row.try_get("code")?;
            match level.as_str() {
                "country" => admin.country_code = Some(code),
                "province" => admin.province_code = Some(code),
                "municipality" => admin.municipality_code = Some(code),
                "sector" => admin.sector_code = Some(code),
                other => debug!(level = other, "Ignoring unknown admin level"),
            }
        }
        Ok(admin)
    }

    /// Register the cells in `h3_cells` if they are not known yet.
    pub async fn ensure_cells(&self, cells: &CellSet) -> Result<(), GeoError> {
        for cell in cells.all() {
            self.ensure_cell(cell).await?;
        }
        Ok(())
    }

    async fn ensure_cell(&self, cell: CellIndex) -> Result<(), GeoError> {
        sqlx::query(
            r#"
            INSERT INTO h3_cells (h3_index, resolution, boundary, centroid)
            VALUES ($1, $2, ST_GeomFromText($3, 4326), ST_GeomFromText($4, 4326))
            ON CONFLICT (h3_index) DO NOTHING
            "#,
        )
        .bind(cell.to_string())
        .bind(u8::from(cell.resolution()) as i16)
        .bind(boundary_wkt(cell))
        .bind(centroid_wkt(cell))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AdminCodes {
    country_code: Option<String>,
    province_code: Option<String>,
    municipality_code: Option<String>,
    sector_code: Option<String>,
}
