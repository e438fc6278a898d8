//! Attendance ledger seam between the detection loop and durable storage.

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

/// Successful outcome of a mark attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadyMarked,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("no such employee: {0}")]
    UnknownIdentity(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Structured mark outcome for callers outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkStatus {
    Marked,
    AlreadyMarked,
    UnknownIdentity,
    StorageUnavailable,
}

impl From<&Result<MarkOutcome, LedgerError>> for MarkStatus {
    fn from(result: &Result<MarkOutcome, LedgerError>) -> Self {
        match result {
            Ok(MarkOutcome::Marked) => MarkStatus::Marked,
            Ok(MarkOutcome::AlreadyMarked) => MarkStatus::AlreadyMarked,
            Err(LedgerError::UnknownIdentity(_)) => MarkStatus::UnknownIdentity,
            Err(LedgerError::StorageUnavailable(_)) => MarkStatus::StorageUnavailable,
        }
    }
}

impl From<Result<MarkOutcome, LedgerError>> for MarkStatus {
    fn from(result: Result<MarkOutcome, LedgerError>) -> Self {
        MarkStatus::from(&result)
    }
}

/// At-most-once-per-day attendance recording.
///
/// `snapshot` is an encoded image (PNG/JPEG bytes) archived with the record.
pub trait AttendanceLedger {
    fn mark(
        &mut self,
        identity: &str,
        snapshot: &[u8],
        detected_at: NaiveDateTime,
    ) -> Result<MarkOutcome, LedgerError>;
}

impl<T: AttendanceLedger + ?Sized> AttendanceLedger for &mut T {
    fn mark(
        &mut self,
        identity: &str,
        snapshot: &[u8],
        detected_at: NaiveDateTime,
    ) -> Result<MarkOutcome, LedgerError> {
        (**self).mark(identity, snapshot, detected_at)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::HashSet;

    /// In-memory ledger for loop tests.
    #[derive(Default)]
    pub struct MemoryLedger {
        pub employees: HashSet<String>,
        pub records: Vec<(String, NaiveDateTime)>,
        pub fail_storage: bool,
    }

    impl MemoryLedger {
        pub fn with_employees(names: &[&str]) -> Self {
            Self {
                employees: names.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl AttendanceLedger for MemoryLedger {
        fn mark(
            &mut self,
            identity: &str,
            _snapshot: &[u8],
            detected_at: NaiveDateTime,
        ) -> Result<MarkOutcome, LedgerError> {
            if self.fail_storage {
                return Err(LedgerError::StorageUnavailable("offline".into()));
            }
            if !self.employees.contains(identity) {
                return Err(LedgerError::UnknownIdentity(identity.to_string()));
            }
            let day = detected_at.date();
            if self.records.iter().any(|(id, at)| id == identity && at.date() == day) {
                return Ok(MarkOutcome::AlreadyMarked);
            }
            self.records.push((identity.to_string(), detected_at));
            Ok(MarkOutcome::Marked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_status_serializes_snake_case() {
        let s = serde_json::to_string(&MarkStatus::AlreadyMarked).unwrap();
        assert_eq!(s, "\"already_marked\"");
    }

    #[test]
    fn test_mark_status_from_result() {
        let unknown: Result<MarkOutcome, LedgerError> =
            Err(LedgerError::UnknownIdentity("x".into()));
        assert_eq!(MarkStatus::from(&unknown), MarkStatus::UnknownIdentity);
        assert_eq!(
            MarkStatus::from(Ok(MarkOutcome::Marked)),
            MarkStatus::Marked
        );
    }
}
