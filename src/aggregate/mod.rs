pub mod period;
pub mod zones;

pub use self::period::{aggregate_period, PeriodAggregate, Selection};
pub use self::zones::{aggregate_by_zone, aggregate_by_zone_in, write_geojson, ZoneAggregate};
