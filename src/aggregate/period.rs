use duckdb::Connection;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::partition::PartitionKey;
use crate::store::{require_table, TRIPS_TABLE};

/// Trip totals for one period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeriodAggregate {
    pub period: String,
    pub num_trips: i64,
    pub total_amount: f64,
    pub trip_distance: f64,
    pub passenger_count: i64,
}

/// How trips belonging to a partition are found.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Trips picked up inside the partition's time window, whichever load they came from.
    TimeWindow,
    /// Trips loaded under the partition's key.
    PartitionTag,
}

/// Counts and sums the trips of `partition`. An empty partition yields zero totals.
pub fn aggregate_period(
    conn: &Connection,
    partition: &PartitionKey,
    selection: Selection,
) -> Result<PeriodAggregate> {
    require_table(conn, TRIPS_TABLE)?;
    const TOTALS: &str = "SELECT COUNT(*), \
        COALESCE(SUM(total_amount), 0), \
        COALESCE(SUM(trip_distance), 0), \
        COALESCE(SUM(passenger_count), 0) \
        FROM trips";
    let (num_trips, total_amount, trip_distance, passenger_count) = match selection {
        Selection::TimeWindow => {
            let (start, end) = partition.window();
            let sql = format!(
                "{} WHERE pickup_datetime >= CAST(? AS TIMESTAMP) AND pickup_datetime < CAST(? AS TIMESTAMP)",
                TOTALS
            );
            conn.query_row(
                &sql,
                [
                    start.format("%Y-%m-%d %H:%M:%S").to_string(),
                    end.format("%Y-%m-%d %H:%M:%S").to_string(),
                ],
                read_totals,
            )?
        }
        Selection::PartitionTag => {
            let sql = format!("{} WHERE partition_key = ?", TOTALS);
            conn.query_row(&sql, [partition.to_string()], read_totals)?
        }
    };

    let aggregate = PeriodAggregate {
        period: partition.to_string(),
        num_trips,
        total_amount: round2(total_amount),
        trip_distance: round2(trip_distance),
        passenger_count: passenger_count.trunc() as i64,
    };
    log::debug!("Aggregated {:?}", aggregate);
    Ok(aggregate)
}

fn read_totals(row: &duckdb::Row<'_>) -> duckdb::Result<(i64, f64, f64, f64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

/// Rounds to two decimals, halves away from zero.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(10.005 + 5.0), 15.01);
        assert_eq!(round2(2.004 + 1.0), 3.0);
        assert_eq!(round2(-3.333), -3.33);
        assert_eq!(round2(0.0), 0.0);
    }
}
