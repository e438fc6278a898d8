//! Attendance records and the once-per-day ledger.
//!
//! `mark` checks for an existing record before inserting, but the
//! `UNIQUE (employee_name, capture_date)` constraint is what actually
//! guarantees one record per day: a racing insert that trips it is reported
//! as `AlreadyMarked`.

use crate::db::{is_unique_violation, Store, StoreError, DATETIME_FORMAT, DATE_FORMAT};
use crate::employees::Employee;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{NaiveDate, NaiveDateTime};
use facemark_core::{AttendanceLedger, LedgerError, MarkOutcome};
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub employee_id: i64,
    pub employee_name: String,
    #[serde(skip)]
    pub image_base64: String,
    pub captured_at: NaiveDateTime,
}

impl Store {
    pub fn is_marked(&self, employee_name: &str, day: NaiveDate) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE employee_name = ?1 AND capture_date = ?2",
            params![employee_name, day.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub(crate) fn insert_attendance(
        &self,
        employee: &Employee,
        image_base64: &str,
        captured_at: NaiveDateTime,
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO attendance
                 (employee_id, employee_name, image_base64, captured_at, capture_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                employee.id,
                employee.name,
                image_base64,
                captured_at.format(DATETIME_FORMAT).to_string(),
                captured_at.date().format(DATE_FORMAT).to_string(),
            ],
        )?;
        Ok(())
    }

    /// All records captured on `day`, oldest first.
    pub fn attendance_on(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, employee_id, employee_name, image_base64, captured_at
             FROM attendance WHERE capture_date = ?1 ORDER BY captured_at, id",
        )?;
        let rows = stmt.query_map(params![day.format(DATE_FORMAT).to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, employee_id, employee_name, image_base64, captured_at) = row?;
            let captured_at = NaiveDateTime::parse_from_str(&captured_at, DATETIME_FORMAT)
                .map_err(|e| {
                    StoreError::CorruptRow(format!("attendance {id}: bad timestamp: {e}"))
                })?;
            records.push(AttendanceRecord {
                id,
                employee_id,
                employee_name,
                image_base64,
                captured_at,
            });
        }
        Ok(records)
    }
}

fn unavailable(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::StorageUnavailable(e.to_string())
}

impl AttendanceLedger for Store {
    fn mark(
        &mut self,
        identity: &str,
        snapshot: &[u8],
        detected_at: NaiveDateTime,
    ) -> Result<MarkOutcome, LedgerError> {
        let employee = self
            .resolve_employee(identity)
            .map_err(unavailable)?
            .ok_or_else(|| LedgerError::UnknownIdentity(identity.to_string()))?;

        if self.is_marked(&employee.name, detected_at.date()).map_err(unavailable)? {
            return Ok(MarkOutcome::AlreadyMarked);
        }

        self.record(&employee, snapshot, detected_at)
    }
}

impl Store {
    /// Insert without the fast-path check; the unique constraint decides.
    fn record(
        &self,
        employee: &Employee,
        snapshot: &[u8],
        detected_at: NaiveDateTime,
    ) -> Result<MarkOutcome, LedgerError> {
        let image = BASE64.encode(snapshot);
        match self.insert_attendance(employee, &image, detected_at) {
            Ok(()) => Ok(MarkOutcome::Marked),
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(employee = %employee.name, "lost insert race; already marked");
                Ok(MarkOutcome::AlreadyMarked)
            }
            Err(e) => Err(unavailable(e)),
        }
    }
}
