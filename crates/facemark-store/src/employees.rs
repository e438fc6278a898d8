//! Employee registry.

use crate::db::{is_unique_violation, Store, StoreError};
use facemark_core::{label_base, Embedding};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
    Active,
    Inactive,
}

impl EmployeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EmployeeStatus::Active => "active",
            EmployeeStatus::Inactive => "inactive",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EmployeeStatus::Active),
            "inactive" => Some(EmployeeStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    pub contact: Option<String>,
    pub status: EmployeeStatus,
    #[serde(skip)]
    pub encoding: Option<Embedding>,
}

const EMPLOYEE_COLUMNS: &str = "id, name, contact, status, encoding";

type EmployeeRow = (i64, String, Option<String>, String, Option<Vec<u8>>);

fn employee_from_row(row: &Row<'_>) -> rusqlite::Result<EmployeeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn build_employee(
    (id, name, contact, status, encoding): EmployeeRow,
) -> Result<Employee, StoreError> {
    let corrupt = |what: String| StoreError::CorruptRow(format!("employee {id}: {what}"));
    let status = EmployeeStatus::parse(&status)
        .ok_or_else(|| corrupt(format!("unknown status {status:?}")))?;
    let encoding = match encoding {
        Some(bytes) => Some(
            Embedding::from_le_bytes(&bytes)
                .ok_or_else(|| corrupt("ragged encoding blob".to_string()))?,
        ),
        None => None,
    };
    Ok(Employee {
        id,
        name,
        contact,
        status,
        encoding,
    })
}

impl Store {
    pub fn add_employee(&self, name: &str, contact: Option<&str>) -> Result<i64, StoreError> {
        match self.conn.execute(
            "INSERT INTO employees (name, contact) VALUES (?1, ?2)",
            params![name, contact],
        ) {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                tracing::info!(id, name, "employee added");
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::DuplicateEmployee(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn employee(&self, name: &str) -> Result<Option<Employee>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE name = ?1"),
                params![name],
                employee_from_row,
            )
            .optional()?;
        row.map(build_employee).transpose()
    }

    pub fn list_employees(&self) -> Result<Vec<Employee>, StoreError> {
        let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employees ORDER BY name");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], employee_from_row)?;
        let employees = rows
            .map(|r| build_employee(r?))
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(employees)
    }

    /// Returns false if no employee has that name.
    pub fn set_employee_status(
        &self,
        name: &str,
        status: EmployeeStatus,
    ) -> Result<bool, StoreError> {
        let n = self.conn.execute(
            "UPDATE employees SET status = ?1 WHERE name = ?2",
            params![status.as_str(), name],
        )?;
        Ok(n > 0)
    }

    /// Store the enrolled embedding on the employee row. Returns false if no
    /// employee has that name.
    pub fn set_employee_encoding(
        &self,
        name: &str,
        embedding: &Embedding,
    ) -> Result<bool, StoreError> {
        let n = self.conn.execute(
            "UPDATE employees SET encoding = ?1 WHERE name = ?2",
            params![embedding.to_le_bytes(), name],
        )?;
        Ok(n > 0)
    }

    /// Find the active employee a gallery identity refers to.
    ///
    /// Tries the identity as-is, then with its enrollment counter stripped.
    pub fn resolve_employee(&self, identity: &str) -> Result<Option<Employee>, StoreError> {
        let candidates = std::iter::once(identity).chain(label_base(identity));
        for name in candidates {
            if let Some(employee) = self.employee(name)? {
                if employee.status == EmployeeStatus::Active {
                    return Ok(Some(employee));
                }
                tracing::debug!(name, "employee is inactive");
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_list() {
        let store = Store::open_in_memory().unwrap();
        store.add_employee("zoe", None).unwrap();
        store.add_employee("alice", Some("alice@example.com")).unwrap();

        let all = store.list_employees().unwrap();
        let names: Vec<_> = all.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "zoe"]);
        assert_eq!(all[0].contact.as_deref(), Some("alice@example.com"));
        assert_eq!(all[0].status, EmployeeStatus::Active);
    }

    #[test]
    fn test_duplicate_employee() {
        let store = Store::open_in_memory().unwrap();
        store.add_employee("alice", None).unwrap();
        let err = store.add_employee("alice", None).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmployee(_)));
    }

    #[test]
    fn test_encoding_round_trips_through_blob() {
        let store = Store::open_in_memory().unwrap();
        store.add_employee("alice", None).unwrap();
        let e = Embedding::new(vec![0.5, -0.25, 3.0]);
        assert!(store.set_employee_encoding("alice", &e).unwrap());
        assert_eq!(store.employee("alice").unwrap().unwrap().encoding, Some(e));
        let empty = Embedding::new(vec![]);
        assert!(!store.set_employee_encoding("nobody", &empty).unwrap());
    }

    #[test]
    fn test_resolve_employee() {
        let store = Store::open_in_memory().unwrap();
        store.add_employee("alice", None).unwrap();
        store.add_employee("bob_1", None).unwrap();

        let resolved = |label| store.resolve_employee(label).unwrap().unwrap().name;
        assert_eq!(resolved("alice"), "alice");
        assert_eq!(resolved("alice_3"), "alice");
        assert_eq!(resolved("bob_1"), "bob_1");
        assert!(store.resolve_employee("carol").unwrap().is_none());
    }

    #[test]
    fn test_inactive_employee_does_not_resolve() {
        let store = Store::open_in_memory().unwrap();
        store.add_employee("alice", None).unwrap();
        let updated = store.set_employee_status("alice", EmployeeStatus::Inactive);
        assert!(updated.unwrap());
        assert!(store.resolve_employee("alice").unwrap().is_none());
    }
}
