//! Leave requests.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{ImageRef, ProfileSnapshot};
use crate::errors::AppError;

/// Kind of leave.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeaveType {
    Sick,
    Vacation,
    #[default]
    Personal,
    Other,
}

impl LeaveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveType::Sick => "sick",
            LeaveType::Vacation => "vacation",
            LeaveType::Personal => "personal",
            LeaveType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sick" => Some(LeaveType::Sick),
            "vacation" => Some(LeaveType::Vacation),
            "personal" => Some(LeaveType::Personal),
            "other" => Some(LeaveType::Other),
            _ => None,
        }
    }
}

/// Approval status. Records are only ever created as `Pending`; nothing moves them yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl LeaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "pending",
            LeaveStatus::Approved => "approved",
            LeaveStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LeaveStatus::Pending),
            "approved" => Some(LeaveStatus::Approved),
            "rejected" => Some(LeaveStatus::Rejected),
            _ => None,
        }
    }
}

/// A leave request with its requester snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceLog {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_avatar: Option<ImageRef>,
    #[serde(rename = "type")]
    pub leave_type: LeaveType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub reason: String,
    /// Always set on new records; absent only on imported data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_image: Option<ImageRef>,
    pub status: LeaveStatus,
    pub created_at: DateTime<Utc>,
}

/// Validated fields of a leave submission, before the proof is uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveRequest {
    pub leave_type: LeaveType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub reason: String,
}

impl LeaveRequest {
    /// Check presence of every field. The start/end order is not checked.
    pub fn parse(
        leave_type: Option<&str>,
        start_date: Option<&str>,
        end_date: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Self, AppError> {
        let leave_type = match leave_type.map(str::trim).filter(|t| !t.is_empty()) {
            Some(raw) => LeaveType::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("Unknown leave type: {}", raw)))?,
            None => LeaveType::default(),
        };

        let start_date = parse_leave_instant(start_date, "Start date")?;
        let end_date = parse_leave_instant(end_date, "End date")?;

        let reason = reason.map(str::trim).unwrap_or_default();
        if reason.is_empty() {
            return Err(AppError::Validation("Reason is required".to_string()));
        }

        Ok(Self {
            leave_type,
            start_date,
            end_date,
            reason: reason.to_string(),
        })
    }
}

impl AttendanceLog {
    /// A new pending record for `requester`.
    pub fn submit(
        requester_id: &str,
        requester: ProfileSnapshot,
        request: LeaveRequest,
        proof_image: ImageRef,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: requester_id.to_string(),
            user_name: requester.display_name,
            user_avatar: requester.avatar,
            leave_type: request.leave_type,
            start_date: request.start_date,
            end_date: request.end_date,
            reason: request.reason,
            proof_image: Some(proof_image),
            status: LeaveStatus::Pending,
            created_at: now,
        }
    }

    /// Whether the leave interval contains `instant`, whatever the approval status.
    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        self.start_date <= instant && instant <= self.end_date
    }
}

/// Accept an RFC 3339 instant or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_leave_instant(raw: Option<&str>, field: &str) -> Result<DateTime<Utc>, AppError> {
    let raw = raw
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{} is required", field)))?;

    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| AppError::Validation(format!("{} is not a valid date: {}", field, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_parse_leave_instant_accepts_dates_and_instants() {
        let day = parse_leave_instant(Some("2024-03-05"), "Start date").unwrap();
        assert_eq!(day, Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());

        let instant = parse_leave_instant(Some("2024-03-05T10:30:00+02:00"), "Start date").unwrap();
        assert_eq!(instant, Utc.with_ymd_and_hms(2024, 3, 5, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_leave_instant_rejects_missing_and_garbage() {
        let missing = parse_leave_instant(None, "End date").unwrap_err();
        assert_eq!(missing.message(), "End date is required");
        assert!(parse_leave_instant(Some("next tuesday"), "End date").is_err());
    }

    #[test]
    fn test_leave_request_requires_reason() {
        let err = LeaveRequest::parse(Some("sick"), Some("2024-01-01"), Some("2024-01-02"), Some(" "))
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_leave_request_accepts_reversed_range() {
        let request = LeaveRequest::parse(
            Some("vacation"),
            Some("2024-01-10"),
            Some("2024-01-01"),
            Some("beach"),
        )
        .unwrap();
        assert!(request.end_date < request.start_date);
        assert_eq!(request.leave_type, LeaveType::Vacation);
    }

    #[test]
    fn test_leave_type_defaults_to_personal() {
        let request =
            LeaveRequest::parse(None, Some("2024-01-01"), Some("2024-01-01"), Some("errand")).unwrap();
        assert_eq!(request.leave_type, LeaveType::Personal);
        assert!(LeaveRequest::parse(Some("party"), Some("2024-01-01"), Some("2024-01-01"), Some("x")).is_err());
    }

    #[test]
    fn test_submit_is_pending_with_snapshot() {
        let now = Utc::now();
        let request = LeaveRequest {
            leave_type: LeaveType::Sick,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            reason: "flu".to_string(),
        };
        let log = AttendanceLog::submit(
            "u1",
            ProfileSnapshot {
                display_name: "Ana".to_string(),
                avatar: None,
            },
            request,
            ImageRef::Hosted {
                url: "https://img.example/note.png".to_string(),
            },
            now,
        );
        assert_eq!(log.status, LeaveStatus::Pending);
        assert_eq!(log.user_name, "Ana");
        assert!(log.covers(now));
        assert!(!log.covers(now + Duration::days(2)));
    }
}
