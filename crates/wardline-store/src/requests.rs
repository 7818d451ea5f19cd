use chrono::{DateTime, Utc};
use rusqlite::Row;
use tracing::instrument;

use wardline_core::ids::RequestId;
use wardline_core::requests::{
    AssistanceRequest, Department, Priority, RequestFilter, RequestStatus,
};

use crate::database::Database;
use crate::error::StoreError;

/// Input for creating an assistance request. Id, status, and timestamp are
/// assigned at insert time.
#[derive(Clone, Debug)]
pub struct NewRequest {
    pub priority: Priority,
    pub description: String,
    pub department: Department,
    pub patient: String,
    pub room: String,
}

pub struct RequestRepo {
    db: Database,
}

impl RequestRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new request. Status always starts as pending.
    #[instrument(skip(self, new), fields(patient = %new.patient, department = %new.department))]
    pub fn insert(&self, new: NewRequest) -> Result<AssistanceRequest, StoreError> {
        let id = RequestId::new();
        let created_at = Utc::now();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO requests (id, priority, description, department, status, patient, room, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7)",
                rusqlite::params![
                    id.as_str(),
                    new.priority.as_str(),
                    new.description,
                    new.department.as_str(),
                    new.patient,
                    new.room,
                    created_at.to_rfc3339(),
                ],
            )?;

            Ok(AssistanceRequest {
                id,
                priority: new.priority,
                description: new.description.clone(),
                department: new.department,
                status: RequestStatus::Pending,
                patient: new.patient.clone(),
                room: new.room.clone(),
                created_at,
            })
        })
    }

    /// Get a request by ID.
    pub fn get(&self, id: &RequestId) -> Result<AssistanceRequest, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, priority, description, department, status, patient, room, created_at
                 FROM requests WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_request(row),
                None => Err(StoreError::NotFound(format!("request {id}"))),
            }
        })
    }

    /// Find requests for a patient, optionally narrowed by status.
    /// Results come back in insertion order.
    #[instrument(skip(self, filter), fields(patient = %filter.patient))]
    pub fn find(&self, filter: &RequestFilter) -> Result<Vec<AssistanceRequest>, StoreError> {
        self.db.with_conn(|conn| {
            let base = "SELECT id, priority, description, department, status, patient, room, created_at
                 FROM requests WHERE patient = ?1";

            let collect = |rows: &mut rusqlite::Rows<'_>| -> Result<Vec<AssistanceRequest>, StoreError> {
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_request(row)?);
                }
                Ok(out)
            };

            match &filter.status {
                Some(status) => {
                    let sql = format!("{base} AND status = ?2 ORDER BY rowid");
                    let mut stmt = conn.prepare(&sql)?;
                    let mut rows =
                        stmt.query(rusqlite::params![filter.patient, status.as_str()])?;
                    collect(&mut rows)
                }
                None => {
                    let sql = format!("{base} ORDER BY rowid");
                    let mut stmt = conn.prepare(&sql)?;
                    let mut rows = stmt.query([&filter.patient])?;
                    collect(&mut rows)
                }
            }
        })
    }
}

fn row_to_request(row: &Row<'_>) -> Result<AssistanceRequest, StoreError> {
    let id: String = row.get(0)?;
    let priority: String = row.get(1)?;
    let description: String = row.get(2)?;
    let department: String = row.get(3)?;
    let status: String = row.get(4)?;
    let patient: String = row.get(5)?;
    let room: String = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(AssistanceRequest {
        id: RequestId::from_raw(&id),
        priority: priority.parse().map_err(StoreError::Serialization)?,
        description,
        department: department.parse().map_err(StoreError::Serialization)?,
        status: status.parse().map_err(StoreError::Serialization)?,
        patient,
        room,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::Serialization(e.to_string()))?
            .with_timezone(&Utc),
    })
}
