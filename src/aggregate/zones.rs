use std::path::Path;

use duckdb::Connection;
use serde_json::{json, Value};

use crate::errors::Result;
use crate::file_writer::store_atomically;
use crate::geometry::Geometry;
use crate::store::{require_table, TRIPS_TABLE, ZONES_TABLE};

/// Number of trips picked up in one zone.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneAggregate {
    pub zone: Option<String>,
    pub borough: Option<String>,
    pub geometry: Geometry,
    pub num_trips: i64,
}

/// Trip counts per pickup zone over the whole trips table.
///
/// Trips whose zone is unknown or has no geometry are left out.
pub fn aggregate_by_zone(conn: &Connection) -> Result<Vec<ZoneAggregate>> {
    query_zones(conn, None)
}

/// Same as [`aggregate_by_zone`], restricted to the zones of one borough.
pub fn aggregate_by_zone_in(conn: &Connection, borough: &str) -> Result<Vec<ZoneAggregate>> {
    query_zones(conn, Some(borough))
}

fn query_zones(conn: &Connection, borough: Option<&str>) -> Result<Vec<ZoneAggregate>> {
    require_table(conn, TRIPS_TABLE)?;
    require_table(conn, ZONES_TABLE)?;
    let filter = if borough.is_some() { "AND zones.borough = ?" } else { "" };
    let sql = format!(
        "SELECT zones.zone, zones.borough, zones.geometry, COUNT(1) AS num_trips \
         FROM trips \
         LEFT JOIN zones ON trips.pickup_zone_id = zones.zone_id \
         WHERE zones.geometry IS NOT NULL {} \
         GROUP BY zones.zone, zones.borough, zones.geometry \
         ORDER BY zones.zone, zones.borough",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = match borough {
        Some(borough) => stmt.query_map([borough], read_zone_count)?.collect::<duckdb::Result<Vec<_>>>()?,
        None => stmt.query_map([], read_zone_count)?.collect::<duckdb::Result<Vec<_>>>()?,
    };

    let aggregates = rows
        .into_iter()
        .map(|(zone, borough, wkt, num_trips)| -> Result<ZoneAggregate> {
            Ok(ZoneAggregate {
                zone,
                borough,
                geometry: Geometry::from_wkt(&wkt)?,
                num_trips,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    log::debug!("Aggregated trips over {} zones", aggregates.len());
    Ok(aggregates)
}

type ZoneCountRow = (Option<String>, Option<String>, String, i64);

fn read_zone_count(row: &duckdb::Row<'_>) -> duckdb::Result<ZoneCountRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

pub fn to_feature_collection(aggregates: &[ZoneAggregate]) -> Value {
    let features = aggregates
        .iter()
        .map(|aggregate| {
            json!({
                "type": "Feature",
                "properties": {
                    "zone": aggregate.zone,
                    "borough": aggregate.borough,
                    "num_trips": aggregate.num_trips,
                },
                "geometry": aggregate.geometry.to_geojson(),
            })
        })
        .collect::<Vec<_>>();
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

/// Writes the aggregates as a GeoJSON feature collection, replacing `path`.
pub fn write_geojson(aggregates: &[ZoneAggregate], path: &Path) -> Result<()> {
    let data = serde_json::to_vec(&to_feature_collection(aggregates))?;
    store_atomically(path, &data)?;
    log::info!("Wrote {} zones to {}", aggregates.len(), path.display());
    Ok(())
}
