use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime};

use crate::errors::{PipelineError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    Weekly,
    Monthly,
}

/// Identifies a contiguous time window of trips.
///
/// Weekly keys are rendered as the ISO date of the first day (`2023-03-01`), monthly keys
/// as the year and month (`2023-03`). Keys sort in chronological order within a
/// granularity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    granularity: Granularity,
    start: NaiveDate,
}

impl PartitionKey {
    pub fn weekly(start: NaiveDate) -> PartitionKey {
        PartitionKey {
            granularity: Granularity::Weekly,
            start,
        }
    }

    pub fn monthly(year: i32, month: u32) -> Result<PartitionKey> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| PipelineError::invalid_key(&format!("{}-{}", year, month), "no such month"))?;
        Ok(PartitionKey {
            granularity: Granularity::Monthly,
            start,
        })
    }

    /// Parses a key with an explicit granularity. Monthly keys may be written as
    /// `YYYY-MM` or as the first day of the month.
    pub fn parse_as(key: &str, granularity: Granularity) -> Result<PartitionKey> {
        match granularity {
            Granularity::Weekly => {
                let start = NaiveDate::parse_from_str(key, "%Y-%m-%d")
                    .map_err(|err| PipelineError::invalid_key(key, err))?;
                Ok(PartitionKey::weekly(start))
            }
            Granularity::Monthly => {
                let date = NaiveDate::parse_from_str(key, "%Y-%m-%d")
                    .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", key), "%Y-%m-%d"))
                    .map_err(|err| PipelineError::invalid_key(key, err))?;
                if date.day() != 1 {
                    return Err(PipelineError::invalid_key(key, "monthly partitions start on the first day"));
                }
                PartitionKey::monthly(date.year(), date.month())
            }
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Exclusive end of the window.
    pub fn end(&self) -> NaiveDate {
        match self.granularity {
            Granularity::Weekly => self.start + Duration::days(7),
            Granularity::Monthly => self.start + Months::new(1),
        }
    }

    pub fn window(&self) -> (NaiveDateTime, NaiveDateTime) {
        (
            self.start.and_hms_opt(0, 0, 0).unwrap_or_default(),
            self.end().and_hms_opt(0, 0, 0).unwrap_or_default(),
        )
    }

    /// `YYYY-MM` token of the month the window starts in. Raw trip files are named by it.
    pub fn month_token(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.granularity {
            Granularity::Weekly => write!(f, "{}", self.start.format("%Y-%m-%d")),
            Granularity::Monthly => write!(f, "{}", self.start.format("%Y-%m")),
        }
    }
}

/// `YYYY-MM` parses as a monthly key, `YYYY-MM-DD` as a weekly key.
impl FromStr for PartitionKey {
    type Err = PipelineError;

    fn from_str(key: &str) -> Result<PartitionKey> {
        match key.len() {
            7 => PartitionKey::parse_as(key, Granularity::Monthly),
            10 => PartitionKey::parse_as(key, Granularity::Weekly),
            _ => Err(PipelineError::invalid_key(key, "expected YYYY-MM or YYYY-MM-DD")),
        }
    }
}

/// A schedule of partitions covering `[start, end)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionsDefinition {
    pub granularity: Granularity,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PartitionsDefinition {
    pub fn weekly(start: NaiveDate, end: NaiveDate) -> PartitionsDefinition {
        PartitionsDefinition { granularity: Granularity::Weekly, start, end }
    }

    pub fn monthly(start: NaiveDate, end: NaiveDate) -> PartitionsDefinition {
        PartitionsDefinition { granularity: Granularity::Monthly, start, end }
    }

    /// Only windows that end on or before `end` are included.
    pub fn keys(&self) -> Vec<PartitionKey> {
        let mut keys = Vec::new();
        let mut next = match self.granularity {
            Granularity::Weekly => Some(PartitionKey::weekly(self.start)),
            Granularity::Monthly => {
                let first = self.start.with_day(1).unwrap_or(self.start);
                let first = if first < self.start { first + Months::new(1) } else { first };
                PartitionKey::monthly(first.year(), first.month()).ok()
            }
        };
        while let Some(key) = next {
            if key.end() > self.end {
                break;
            }
            next = Some(PartitionKey {
                granularity: key.granularity,
                start: key.end(),
            });
            keys.push(key);
        }
        keys
    }

    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.keys().contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_keys() {
        let week: PartitionKey = "2023-03-01".parse().unwrap();
        assert_eq!(week.granularity(), Granularity::Weekly);
        assert_eq!(week.end(), date("2023-03-08"));
        assert_eq!(week.to_string(), "2023-03-01");

        let month: PartitionKey = "2023-02".parse().unwrap();
        assert_eq!(month.granularity(), Granularity::Monthly);
        assert_eq!(month.end(), date("2023-03-01"));
        assert_eq!(month.to_string(), "2023-02");
        assert_eq!(
            PartitionKey::parse_as("2023-02-01", Granularity::Monthly).unwrap(),
            month
        );
    }

    #[test]
    fn test_reject_bad_keys() {
        assert!("2023-13".parse::<PartitionKey>().is_err());
        assert!("2023-03-1".parse::<PartitionKey>().is_err());
        assert!("yesterday".parse::<PartitionKey>().is_err());
        assert!(PartitionKey::parse_as("2023-03-15", Granularity::Monthly).is_err());
    }

    #[test]
    fn test_month_token() {
        let week: PartitionKey = "2023-03-29".parse().unwrap();
        assert_eq!(week.month_token(), "2023-03");
        assert_eq!(week.end(), date("2023-04-05"));
    }

    #[test]
    fn test_weekly_definition() {
        let def = PartitionsDefinition::weekly(date("2023-03-01"), date("2023-04-01"));
        let keys = def.keys().iter().map(|k| k.to_string()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["2023-03-01", "2023-03-08", "2023-03-15", "2023-03-22"]);
    }

    #[test]
    fn test_monthly_definition() {
        let def = PartitionsDefinition::monthly(date("2023-01-15"), date("2023-04-01"));
        let keys = def.keys().iter().map(|k| k.to_string()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["2023-02", "2023-03"]);
    }
}
