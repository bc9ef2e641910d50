use std::collections::HashSet;
use std::path::Path;

use duckdb::{params, Connection};

use crate::errors::{PipelineError, Result};
use crate::geometry::Geometry;
use crate::ingest::source::Source;
use crate::store::ZONES_TABLE;

pub fn zone_colnames() -> Vec<&'static str> {
    vec!["LocationID", "zone", "borough", "the_geom"]
}

#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    pub zone_id: i32,
    pub zone: Option<String>,
    pub borough: Option<String>,
    pub geometry: Option<Geometry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZonesReport {
    pub rows: usize,
    pub invalid_geometries: usize,
    /// Rows whose `LocationID` already appeared earlier in the file.
    pub duplicate_ids: usize,
}

/// Replaces the zones table with the contents of `source_path`.
///
/// Geometries that do not parse are stored as NULL; the zone row is kept. Rows sharing a
/// `LocationID` are all kept, the zone export splits some zones over several rows.
pub fn load_zones(conn: &mut Connection, source_path: &Path) -> Result<ZonesReport> {
    let source = Source::open(source_path)?;
    source.require_columns(conn, &zone_colnames())?;
    let zones = read_zones(conn, &source)?;
    let invalid_geometries = zones.iter().filter(|(_, valid)| !valid).count();
    let zones = zones.into_iter().map(|(zone, _)| zone).collect::<Vec<_>>();
    let duplicate_ids = count_duplicate_ids(&zones);

    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "CREATE OR REPLACE TABLE {} (zone_id INTEGER NOT NULL, zone VARCHAR, borough VARCHAR, geometry VARCHAR)",
        ZONES_TABLE
    ))?;
    {
        let mut appender = tx.appender(ZONES_TABLE)?;
        for zone in &zones {
            appender.append_row(params![
                zone.zone_id,
                zone.zone,
                zone.borough,
                zone.geometry.as_ref().map(Geometry::to_wkt),
            ])?;
        }
        appender.flush()?;
    }
    tx.commit()?;

    if invalid_geometries > 0 {
        log::warn!(
            "{} of {} zones in {} have no usable geometry",
            invalid_geometries,
            zones.len(),
            source_path.display()
        );
    }
    if duplicate_ids > 0 {
        log::warn!(
            "{} zones in {} repeat an earlier LocationID",
            duplicate_ids,
            source_path.display()
        );
    }
    log::info!("Loaded {} zones from {}", zones.len(), source_path.display());
    Ok(ZonesReport {
        rows: zones.len(),
        invalid_geometries,
        duplicate_ids,
    })
}

/// Reads zone rows and parses their geometry. The flag is false when a geometry was
/// present but could not be parsed.
fn read_zones(conn: &Connection, source: &Source) -> Result<Vec<(Zone, bool)>> {
    let sql = format!(
        "SELECT CAST(LocationID AS INTEGER), CAST(zone AS VARCHAR), CAST(borough AS VARCHAR), CAST(the_geom AS VARCHAR) FROM {}",
        source.scan()
    );
    let rows = (|| -> duckdb::Result<Vec<(Option<i32>, Option<String>, Option<String>, Option<String>)>> {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    })()
    .map_err(|err| source.read_error(err))?;

    let mut zones = Vec::with_capacity(rows.len());
    for (i, (zone_id, zone, borough, wkt)) in rows.into_iter().enumerate() {
        let zone_id = zone_id.ok_or_else(|| {
            PipelineError::schema(source.path().display(), format!("row {} has no LocationID", i + 1))
        })?;
        let (geometry, valid) = match wkt.as_deref().map(str::trim) {
            None | Some("") => (None, true),
            Some(wkt) => match Geometry::from_wkt(wkt) {
                Ok(geometry) => (Some(geometry), true),
                Err(err) => {
                    log::debug!("Zone {} has invalid geometry: {}", zone_id, err);
                    (None, false)
                }
            },
        };
        zones.push((Zone { zone_id, zone, borough, geometry }, valid));
    }
    Ok(zones)
}

fn count_duplicate_ids(zones: &[Zone]) -> usize {
    let mut seen = HashSet::new();
    zones.iter().filter(|zone| !seen.insert(zone.zone_id)).count()
}

/// All zones currently in the store, ordered by id.
pub fn zones(conn: &Connection) -> Result<Vec<Zone>> {
    crate::store::require_table(conn, ZONES_TABLE)?;
    let mut stmt = conn.prepare("SELECT zone_id, zone, borough, geometry FROM zones ORDER BY zone_id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i32>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<duckdb::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(|(zone_id, zone, borough, wkt)| -> Result<Zone> {
            Ok(Zone {
                zone_id,
                zone,
                borough,
                geometry: wkt.as_deref().map(Geometry::from_wkt).transpose()?,
            })
        })
        .collect()
}
