//! Daily archive export: a CSV report plus the archived snapshot images.

use crate::db::{Store, StoreError, DATETIME_FORMAT, DATE_FORMAT};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%p";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub date: NaiveDate,
    pub records: usize,
    /// `None` when there were no records for the date.
    pub report: Option<PathBuf>,
    pub images: Vec<PathBuf>,
    /// Records whose archived image could not be decoded.
    pub undecodable: Vec<i64>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Keep image file names inside the download directory.
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}

impl Store {
    /// Write `attendance_report_{date}.csv` to `report_dir` and one
    /// `{name}_{timestamp}.png` per record to `image_dir`.
    pub fn export_day(
        &self,
        date: NaiveDate,
        report_dir: &Path,
        image_dir: &Path,
    ) -> Result<ExportSummary, ExportError> {
        let records = self.attendance_on(date)?;
        let mut summary = ExportSummary {
            date,
            records: records.len(),
            report: None,
            images: Vec::new(),
            undecodable: Vec::new(),
        };

        if records.is_empty() {
            tracing::info!(%date, "no attendance records for date");
            return Ok(summary);
        }

        let mut csv = String::from("employee_name,captured_at\n");
        for r in &records {
            let _ = writeln!(
                csv,
                "{},{}",
                csv_field(&r.employee_name),
                r.captured_at.format(DATETIME_FORMAT)
            );
        }

        std::fs::create_dir_all(report_dir).map_err(io_err(report_dir))?;
        let report_name = format!("attendance_report_{}.csv", date.format(DATE_FORMAT));
        let report_path = report_dir.join(report_name);
        std::fs::write(&report_path, csv).map_err(io_err(&report_path))?;
        tracing::info!(
            path = %report_path.display(),
            records = records.len(),
            "attendance report written"
        );
        summary.report = Some(report_path);

        std::fs::create_dir_all(image_dir).map_err(io_err(image_dir))?;
        for r in &records {
            let bytes = match BASE64.decode(&r.image_base64) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(
                        id = r.id,
                        error = %e,
                        "archived image is not valid base64; skipping"
                    );
                    summary.undecodable.push(r.id);
                    continue;
                }
            };
            let name = format!(
                "{}_{}.png",
                file_safe(&r.employee_name),
                r.captured_at.format(IMAGE_TIMESTAMP_FORMAT)
            );
            let path = image_dir.join(name);
            std::fs::write(&path, bytes).map_err(io_err(&path))?;
            summary.images.push(path);
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use facemark_core::AttendanceLedger;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn test_export_writes_report_and_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_in_memory().unwrap();
        store.add_employee("alice", None).unwrap();
        store.add_employee("smith, john", None).unwrap();
        store.mark("alice", b"png-a", at("2024-01-01T09:00:00")).unwrap();
        store.mark("smith, john", b"png-j", at("2024-01-01T14:30:05")).unwrap();
        store.mark("alice", b"png-next", at("2024-01-02T09:00:00")).unwrap();

        let summary = store
            .export_day(
                at("2024-01-01T00:00:00").date(),
                &dir.path().join("reports"),
                &dir.path().join("images"),
            )
            .unwrap();

        assert_eq!(summary.records, 2);
        let csv = std::fs::read_to_string(summary.report.unwrap()).unwrap();
        assert_eq!(
            csv,
            concat!(
                "employee_name,captured_at\n",
                "alice,2024-01-01 09:00:00\n",
                "\"smith, john\",2024-01-01 14:30:05\n",
            )
        );

        let alice_img = dir.path().join("images/alice_2024-01-01_09-00-00AM.png");
        assert_eq!(std::fs::read(&alice_img).unwrap(), b"png-a");
        assert_eq!(summary.images.len(), 2);
    }

    #[test]
    fn test_export_empty_day_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let reports = dir.path().join("reports");

        let images = dir.path().join("images");
        let summary = store
            .export_day(at("2024-03-03T00:00:00").date(), &reports, &images)
            .unwrap();
        assert_eq!(summary.records, 0);
        assert!(summary.report.is_none());
        assert!(!reports.exists());
    }

    #[test]
    fn test_file_safe_names() {
        assert_eq!(file_safe("a/b\\c"), "a_b_c");
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
