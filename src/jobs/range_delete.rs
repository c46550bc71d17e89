use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Repository;
use crate::errors::AppError;

/// Request body for a range deletion: two calendar days, inclusive.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    pub start_date: String,
    pub end_date: String,
}

/// A UTC instant range covering whole calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// `first 00:00:00.000` through `last 23:59:59.999`.
    pub fn from_days(first: NaiveDate, last: NaiveDate) -> Result<Self, AppError> {
        if first > last {
            return Err(AppError::Validation(format!(
                "Start date {} is after end date {}",
                first, last
            )));
        }

        let start = first
            .and_hms_milli_opt(0, 0, 0, 0)
            .map(|t| t.and_utc())
            .ok_or_else(|| AppError::Validation(format!("Invalid start date {}", first)))?;
        let end = last
            .and_hms_milli_opt(23, 59, 59, 999)
            .map(|t| t.and_utc())
            .ok_or_else(|| AppError::Validation(format!("Invalid end date {}", last)))?;

        Ok(Self { start, end })
    }

    pub fn parse(request: &CleanupRequest) -> Result<Self, AppError> {
        Self::from_days(
            parse_day(&request.start_date, "Start date")?,
            parse_day(&request.end_date, "End date")?,
        )
    }

    /// Number of calendar days covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start + Duration::milliseconds(1)).num_days()
    }
}

fn parse_day(raw: &str, field: &str) -> Result<NaiveDate, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("{} must be YYYY-MM-DD, got {}", field, raw)))
}

/// Outcome of a range deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeDeleteReport {
    pub tasks: usize,
    pub attendance: usize,
    pub images: usize,
    /// Records plus distinct image ids
    pub total: usize,
}

/// Delete every task and leave record created in `range`, with their legacy proof images.
pub async fn delete_range(repo: &Repository, range: &DateRange) -> Result<RangeDeleteReport, AppError> {
    let deleted = repo.delete_created_between(range.start, range.end).await?;

    let report = RangeDeleteReport {
        tasks: deleted.tasks.len(),
        attendance: deleted.attendance.len(),
        images: deleted.images.len(),
        total: deleted.tasks.len() + deleted.attendance.len() + deleted.images.len(),
    };

    tracing::info!(
        start = %range.start,
        end = %range.end,
        days = range.days(),
        tasks = report.tasks,
        attendance = report.attendance,
        images = report.images,
        "Range delete finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_range_covers_whole_days() {
        let range = DateRange::from_days(day(2024, 1, 1), day(2024, 1, 10)).unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(
            range.end,
            Utc.with_ymd_and_hms(2024, 1, 10, 23, 59, 59).unwrap() + Duration::milliseconds(999)
        );
        assert!(range.end < Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap());
        assert_eq!(range.days(), 10);
    }

    #[test]
    fn test_single_day_range() {
        let range = DateRange::from_days(day(2024, 2, 29), day(2024, 2, 29)).unwrap();
        assert_eq!(range.days(), 1);
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        let err = DateRange::from_days(day(2024, 1, 10), day(2024, 1, 1)).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_parse_request() {
        let request = CleanupRequest {
            start_date: "2024-03-01".to_string(),
            end_date: " 2024-03-02 ".to_string(),
        };
        let range = DateRange::parse(&request).unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());

        let bad = CleanupRequest {
            start_date: "03/01/2024".to_string(),
            end_date: "2024-03-02".to_string(),
        };
        assert!(DateRange::parse(&bad).is_err());
    }
}
