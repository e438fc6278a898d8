//! facemark-store — SQLite persistence for employees and attendance.
//!
//! [`Store`] implements [`facemark_core::AttendanceLedger`], enforcing one
//! attendance record per employee per calendar day.

pub mod db;
pub mod employees;
pub mod export;
pub mod ledger;

pub use db::{Store, StoreError};
pub use employees::{Employee, EmployeeStatus};
pub use export::{ExportError, ExportSummary};
pub use ledger::AttendanceRecord;
