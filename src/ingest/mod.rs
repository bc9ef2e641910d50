pub mod source;
pub mod trips;
pub mod zones;

pub use self::source::{Source, SourceFormat};
pub use self::trips::{load_partition, LoadReport};
pub use self::zones::{load_zones, Zone, ZonesReport};
