//! libSQL backend implementing the async `RecordStore` trait.
//!
//! Supports local file and in-memory databases. Lifecycle guards map onto
//! SQL primitives: status transitions are conditional UPDATEs checked by
//! affected-row count, confirmation uniqueness is the composite primary
//! key, and multi-statement units run inside BEGIN IMMEDIATE/COMMIT under
//! a write mutex (the connection is shared, so interleaved transactions
//! from concurrent tasks must be excluded).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::geo::Coordinates;
use crate::model::{
    ConfirmedWorker, DeployedWorker, RequestStatus, ServiceRequest, SkillRequirement, SkillType,
    Worker, WorkLocation,
};
use crate::store::migrations;
use crate::store::traits::RecordStore;

/// libSQL record store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Held across multi-statement atomic units.
    write_lock: Mutex<()>,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Load the child collections of a request row.
    async fn load_request_children(
        &self,
        id: Uuid,
    ) -> Result<(Vec<SkillRequirement>, Vec<ConfirmedWorker>, Vec<DeployedWorker>), StoreError>
    {
        let conn = self.conn();
        let id_str = id.to_string();

        let mut requirements = Vec::new();
        let mut rows = conn
            .query(
                "SELECT skill, required_count FROM request_requirements
                 WHERE request_id = ?1 ORDER BY position",
                params![id_str.clone()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("load requirements: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load requirements row: {e}")))?
        {
            let skill_str: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("requirement skill: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("requirement count: {e}")))?;
            requirements.push(SkillRequirement {
                skill: parse_skill(&skill_str)?,
                required_count: count.max(0) as u32,
            });
        }

        let confirmed = self
            .load_assignments(&id_str, "confirmed_workers")
            .await?
            .into_iter()
            .map(|(worker_id, created_at)| ConfirmedWorker {
                request_id: id,
                worker_id,
                created_at,
            })
            .collect();

        let deployed = self
            .load_assignments(&id_str, "deployed_workers")
            .await?
            .into_iter()
            .map(|(worker_id, created_at)| DeployedWorker {
                request_id: id,
                worker_id,
                created_at,
            })
            .collect();

        Ok((requirements, confirmed, deployed))
    }

    /// Load (worker_id, created_at) pairs from an assignment table in
    /// insertion order.
    async fn load_assignments(
        &self,
        request_id: &str,
        table: &str,
    ) -> Result<Vec<(Uuid, DateTime<Utc>)>, StoreError> {
        let mut out = Vec::new();
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT worker_id, created_at FROM {table}
                     WHERE request_id = ?1 ORDER BY rowid"
                ),
                params![request_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("load {table}: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load {table} row: {e}")))?
        {
            let worker_str: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("{table} worker_id: {e}")))?;
            let created_str: String = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("{table} created_at: {e}")))?;
            out.push((parse_uuid(&worker_str)?, parse_datetime(&created_str)?));
        }
        Ok(out)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| StoreError::Serialization(format!("bad datetime '{s}': {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Serialization(format!("bad uuid '{s}': {e}")))
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    s.parse()
        .map_err(|e| StoreError::Serialization(format!("bad date '{s}': {e}")))
}

fn parse_skill(s: &str) -> Result<SkillType, StoreError> {
    s.parse().map_err(StoreError::Serialization)
}

fn parse_status(s: &str) -> Result<RequestStatus, StoreError> {
    s.parse().map_err(StoreError::Serialization)
}

/// Convert `Option<f64>` to a libsql Value.
fn opt_real(v: Option<f64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v),
        None => libsql::Value::Null,
    }
}

/// Quote a status list for an IN clause. Statuses render from a closed
/// enum, so interpolation is safe here.
fn status_in_list(statuses: &[RequestStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn skill_in_list(skills: &[SkillType]) -> String {
    skills
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

const WORKER_COLUMNS: &str = "w.id, w.verified, w.available, w.blocked, w.lat, w.lon, w.rating,
    (SELECT group_concat(skill) FROM worker_skills ws WHERE ws.worker_id = w.id)";

/// Map a libsql Row (WORKER_COLUMNS order) to a Worker.
fn row_to_worker(row: &libsql::Row) -> Result<Worker, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("worker id: {e}")))?;
    let verified: i64 = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("worker verified: {e}")))?;
    let available: i64 = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("worker available: {e}")))?;
    let blocked: i64 = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("worker blocked: {e}")))?;
    let lat: Option<f64> = row.get(4).ok();
    let lon: Option<f64> = row.get(5).ok();
    let rating: Option<f64> = row.get(6).ok();
    let skills_str: Option<String> = row.get(7).ok();

    let mut skills = std::collections::BTreeSet::new();
    if let Some(joined) = skills_str {
        for part in joined.split(',').filter(|p| !p.is_empty()) {
            skills.insert(parse_skill(part)?);
        }
    }

    Ok(Worker {
        id: parse_uuid(&id_str)?,
        skills,
        verified: verified != 0,
        available: available != 0,
        blocked: blocked != 0,
        location: match (lat, lon) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        },
        rating,
    })
}

const REQUEST_COLUMNS: &str = "id, customer_id, customer_name, description, address, lat, lon,
    start_date, end_date, status, created_at, completed_at";

/// Map a libsql Row (REQUEST_COLUMNS order) to a request without children.
fn row_to_request_base(row: &libsql::Row) -> Result<ServiceRequest, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("request id: {e}")))?;
    let customer_str: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("request customer_id: {e}")))?;
    let customer_name: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("request customer_name: {e}")))?;
    let description: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("request description: {e}")))?;
    let address: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("request address: {e}")))?;
    let lat: Option<f64> = row.get(5).ok();
    let lon: Option<f64> = row.get(6).ok();
    let start_str: String = row
        .get(7)
        .map_err(|e| StoreError::Query(format!("request start_date: {e}")))?;
    let end_str: String = row
        .get(8)
        .map_err(|e| StoreError::Query(format!("request end_date: {e}")))?;
    let status_str: String = row
        .get(9)
        .map_err(|e| StoreError::Query(format!("request status: {e}")))?;
    let created_str: String = row
        .get(10)
        .map_err(|e| StoreError::Query(format!("request created_at: {e}")))?;
    let completed_str: Option<String> = row.get(11).ok();

    Ok(ServiceRequest {
        id: parse_uuid(&id_str)?,
        customer_id: parse_uuid(&customer_str)?,
        customer_name,
        description,
        requirements: Vec::new(),
        start_date: parse_date(&start_str)?,
        end_date: parse_date(&end_str)?,
        location: WorkLocation {
            address,
            coordinates: match (lat, lon) {
                (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
                _ => None,
            },
        },
        status: parse_status(&status_str)?,
        created_at: parse_datetime(&created_str)?,
        completed_at: completed_str.as_deref().map(parse_datetime).transpose()?,
        confirmed: Vec::new(),
        deployed: Vec::new(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RecordStore for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Requests ────────────────────────────────────────────────────

    async fn insert_request(&self, request: &ServiceRequest) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.conn();

        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| StoreError::Query(format!("insert_request begin: {e}")))?;

        let result = async {
            let (lat, lon) = match request.location.coordinates {
                Some(c) => (Some(c.lat), Some(c.lon)),
                None => (None, None),
            };
            conn.execute(
                "INSERT INTO requests (id, customer_id, customer_name, description, address,
                     lat, lon, start_date, end_date, status, created_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL)",
                params![
                    request.id.to_string(),
                    request.customer_id.to_string(),
                    request.customer_name.clone(),
                    request.description.clone(),
                    request.location.address.clone(),
                    opt_real(lat),
                    opt_real(lon),
                    request.start_date.to_string(),
                    request.end_date.to_string(),
                    request.status.as_str(),
                    request.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_request: {e}")))?;

            for (position, req) in request.requirements.iter().enumerate() {
                conn.execute(
                    "INSERT INTO request_requirements (request_id, skill, required_count, position)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        request.id.to_string(),
                        req.skill.as_str(),
                        req.required_count as i64,
                        position as i64,
                    ],
                )
                .await
                .map_err(|e| StoreError::Query(format!("insert requirement: {e}")))?;
            }
            Ok::<(), StoreError>(())
        }
        .await;

        match result {
            Ok(()) => {
                conn.execute("COMMIT", ())
                    .await
                    .map_err(|e| StoreError::Query(format!("insert_request commit: {e}")))?;
                debug!(request_id = %request.id, "Request inserted");
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_request: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(StoreError::Query(format!("get_request: {e}"))),
        };

        let mut request = row_to_request_base(&row)?;
        let (requirements, confirmed, deployed) = self.load_request_children(id).await?;
        request.requirements = requirements;
        request.confirmed = confirmed;
        request.deployed = deployed;
        Ok(Some(request))
    }

    async fn transition_request(
        &self,
        id: Uuid,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let affected = conn
            .execute(
                &format!(
                    "UPDATE requests SET status = ?1 WHERE id = ?2 AND status IN ({})",
                    status_in_list(from)
                ),
                params![to.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("transition_request: {e}")))?;
        Ok(affected > 0)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let affected = conn
            .execute(
                "UPDATE requests SET status = 'completed', completed_at = ?2
                 WHERE id = ?1 AND status = 'deployed'",
                params![id.to_string(), completed_at.to_rfc3339()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_completed: {e}")))?;
        Ok(affected > 0)
    }

    async fn requests_with_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<ServiceRequest>, StoreError> {
        let conn = self.conn();
        let mut ids = Vec::new();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT id FROM requests WHERE status IN ({}) ORDER BY created_at",
                    status_in_list(statuses)
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("requests_with_status: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("requests_with_status row: {e}")))?
        {
            let id_str: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("requests_with_status id: {e}")))?;
            ids.push(parse_uuid(&id_str)?);
        }

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(request) = self.get_request(id).await? {
                out.push(request);
            }
        }
        Ok(out)
    }

    // ── Workers ─────────────────────────────────────────────────────

    async fn upsert_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.conn();

        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| StoreError::Query(format!("upsert_worker begin: {e}")))?;

        let result = async {
            let (lat, lon) = match worker.location {
                Some(c) => (Some(c.lat), Some(c.lon)),
                None => (None, None),
            };
            conn.execute(
                "INSERT OR REPLACE INTO workers (id, verified, available, blocked, lat, lon, rating)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    worker.id.to_string(),
                    worker.verified as i64,
                    worker.available as i64,
                    worker.blocked as i64,
                    opt_real(lat),
                    opt_real(lon),
                    opt_real(worker.rating),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_worker: {e}")))?;

            conn.execute(
                "DELETE FROM worker_skills WHERE worker_id = ?1",
                params![worker.id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_worker skills clear: {e}")))?;

            for skill in &worker.skills {
                conn.execute(
                    "INSERT INTO worker_skills (worker_id, skill) VALUES (?1, ?2)",
                    params![worker.id.to_string(), skill.as_str()],
                )
                .await
                .map_err(|e| StoreError::Query(format!("upsert_worker skill: {e}")))?;
            }
            Ok::<(), StoreError>(())
        }
        .await;

        match result {
            Ok(()) => conn
                .execute("COMMIT", ())
                .await
                .map(|_| ())
                .map_err(|e| StoreError::Query(format!("upsert_worker commit: {e}"))),
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn get_worker(&self, id: Uuid) -> Result<Option<Worker>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {WORKER_COLUMNS} FROM workers w WHERE w.id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_worker: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_worker(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_worker: {e}"))),
        }
    }

    async fn set_worker_available(&self, id: Uuid, available: bool) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE workers SET available = ?2 WHERE id = ?1",
                params![id.to_string(), available as i64],
            )
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Query(format!("set_worker_available: {e}")))
    }

    async fn set_worker_verified(&self, id: Uuid, verified: bool) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE workers SET verified = ?2 WHERE id = ?1",
                params![id.to_string(), verified as i64],
            )
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Query(format!("set_worker_verified: {e}")))
    }

    async fn set_worker_blocked(&self, id: Uuid, blocked: bool) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE workers SET blocked = ?2 WHERE id = ?1",
                params![id.to_string(), blocked as i64],
            )
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Query(format!("set_worker_blocked: {e}")))
    }

    async fn find_matching_workers(&self, skills: &[SkillType]) -> Result<Vec<Worker>, StoreError> {
        if skills.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn();
        let mut out = Vec::new();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {WORKER_COLUMNS} FROM workers w
                     WHERE w.verified = 1 AND w.available = 1
                       AND w.id IN (SELECT worker_id FROM worker_skills WHERE skill IN ({}))
                     ORDER BY w.id",
                    skill_in_list(skills)
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("find_matching_workers: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("find_matching_workers row: {e}")))?
        {
            out.push(row_to_worker(&row)?);
        }
        Ok(out)
    }

    // ── Confirmations ───────────────────────────────────────────────

    async fn insert_confirmation(
        &self,
        record: &ConfirmedWorker,
        allowed: &[RequestStatus],
    ) -> Result<bool, StoreError> {
        // Single statement, so the status guard cannot race a concurrent
        // transition landing between a read and the insert.
        let affected = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO confirmed_workers (request_id, worker_id, created_at)
                     SELECT ?1, ?2, ?3
                     WHERE EXISTS (SELECT 1 FROM requests WHERE id = ?1 AND status IN ({}))",
                    status_in_list(allowed)
                ),
                params![
                    record.request_id.to_string(),
                    record.worker_id.to_string(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_confirmation: {e}")))?;

        if affected == 1 {
            return Ok(true);
        }

        // Nothing written: either the pair already exists (duplicate) or
        // the status guard refused.
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM confirmed_workers WHERE request_id = ?1 AND worker_id = ?2",
                params![record.request_id.to_string(), record.worker_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_confirmation check: {e}")))?;
        match rows.next().await {
            Ok(Some(_)) => Err(StoreError::Constraint(format!(
                "worker {} already confirmed request {}",
                record.worker_id, record.request_id
            ))),
            Ok(None) => Ok(false),
            Err(e) => Err(StoreError::Query(format!("insert_confirmation check: {e}"))),
        }
    }

    // ── Deployments ─────────────────────────────────────────────────

    async fn deploy_worker(&self, record: &DeployedWorker) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.conn();

        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| StoreError::Query(format!("deploy_worker begin: {e}")))?;

        let result = async {
            let affected = conn
                .execute(
                    "INSERT OR IGNORE INTO deployed_workers (request_id, worker_id, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![
                        record.request_id.to_string(),
                        record.worker_id.to_string(),
                        record.created_at.to_rfc3339(),
                    ],
                )
                .await
                .map_err(|e| StoreError::Query(format!("deploy_worker insert: {e}")))?;

            if affected == 0 {
                // Already deployed on this request; nothing to write.
                return Ok::<bool, StoreError>(false);
            }

            conn.execute(
                "UPDATE workers SET available = 0 WHERE id = ?1",
                params![record.worker_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("deploy_worker availability: {e}")))?;
            Ok(true)
        }
        .await;

        match result {
            Ok(deployed) => {
                conn.execute("COMMIT", ())
                    .await
                    .map_err(|e| StoreError::Query(format!("deploy_worker commit: {e}")))?;
                Ok(deployed)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn release_deployed_workers(&self, request_id: Uuid) -> Result<u64, StoreError> {
        self.conn()
            .execute(
                "UPDATE workers SET available = 1
                 WHERE id IN (SELECT worker_id FROM deployed_workers WHERE request_id = ?1)",
                params![request_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("release_deployed_workers: {e}")))
    }

    // ── Commitments ─────────────────────────────────────────────────

    async fn has_active_commitment(
        &self,
        worker_id: Uuid,
        today: NaiveDate,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT EXISTS (
                     SELECT 1 FROM confirmed_workers cw
                     JOIN requests r ON r.id = cw.request_id
                     WHERE cw.worker_id = ?1 AND r.end_date >= ?2 AND r.status != 'completed'
                     UNION ALL
                     SELECT 1 FROM deployed_workers dw
                     JOIN requests r ON r.id = dw.request_id
                     WHERE dw.worker_id = ?1 AND r.end_date >= ?2 AND r.status != 'completed'
                 )",
                params![worker_id.to_string(), today.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("has_active_commitment: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let exists: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("has_active_commitment: {e}")))?;
                Ok(exists != 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(StoreError::Query(format!("has_active_commitment: {e}"))),
        }
    }

    async fn committed_worker_ids(&self, today: NaiveDate) -> Result<HashSet<Uuid>, StoreError> {
        let conn = self.conn();
        let mut out = HashSet::new();
        let mut rows = conn
            .query(
                "SELECT cw.worker_id FROM confirmed_workers cw
                 JOIN requests r ON r.id = cw.request_id
                 WHERE r.end_date >= ?1 AND r.status != 'completed'
                 UNION
                 SELECT dw.worker_id FROM deployed_workers dw
                 JOIN requests r ON r.id = dw.request_id
                 WHERE r.end_date >= ?1 AND r.status != 'completed'",
                params![today.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("committed_worker_ids: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("committed_worker_ids row: {e}")))?
        {
            let id_str: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("committed_worker_ids id: {e}")))?;
            out.insert(parse_uuid(&id_str)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewRequest;

    fn sample_request(status_days_ahead: i64) -> ServiceRequest {
        let start = Utc::now().date_naive() + chrono::Duration::days(status_days_ahead);
        ServiceRequest::create(NewRequest {
            customer_id: Uuid::new_v4(),
            customer_name: "Ravi".into(),
            description: "Wiring job".into(),
            requirements: vec![
                SkillRequirement::new(SkillType::Electrician, 2),
                SkillRequirement::new(SkillType::Plumber, 1),
            ],
            start_date: start,
            end_date: start + chrono::Duration::days(2),
            address: "5 Mill Lane".into(),
            coordinates: Some(Coordinates::new(28.61, 77.21)),
        })
        .unwrap()
    }

    fn sample_worker(skills: &[SkillType]) -> Worker {
        Worker::new(Uuid::new_v4(), skills.iter().copied())
            .verified()
            .at(Coordinates::new(28.62, 77.22))
    }

    #[tokio::test]
    async fn request_roundtrip() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let request = sample_request(7);
        store.insert_request(&request).await.unwrap();

        let loaded = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, request.id);
        assert_eq!(loaded.customer_name, "Ravi");
        assert_eq!(loaded.status, RequestStatus::PendingAdminApproval);
        assert_eq!(loaded.requirements, request.requirements);
        assert_eq!(loaded.start_date, request.start_date);
        assert_eq!(loaded.end_date, request.end_date);
        assert_eq!(
            loaded.location.coordinates,
            Some(Coordinates::new(28.61, 77.21))
        );
        assert!(loaded.confirmed.is_empty());
        assert!(loaded.deployed.is_empty());
    }

    #[tokio::test]
    async fn missing_request_is_none() {
        let store = LibSqlStore::new_memory().await.unwrap();
        assert!(store.get_request(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_is_test_and_set() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let request = sample_request(7);
        store.insert_request(&request).await.unwrap();

        // Wrong expected status: no write.
        assert!(
            !store
                .transition_request(request.id, &[RequestStatus::Notified], RequestStatus::Deployed)
                .await
                .unwrap()
        );

        // Correct expected status: transitions once.
        assert!(
            store
                .transition_request(
                    request.id,
                    &[RequestStatus::PendingAdminApproval],
                    RequestStatus::AdminApproved,
                )
                .await
                .unwrap()
        );

        // Second identical attempt loses the race.
        assert!(
            !store
                .transition_request(
                    request.id,
                    &[RequestStatus::PendingAdminApproval],
                    RequestStatus::Rejected,
                )
                .await
                .unwrap()
        );

        let loaded = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RequestStatus::AdminApproved);
    }

    #[tokio::test]
    async fn duplicate_confirmation_is_constraint_error() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let request = sample_request(7);
        store.insert_request(&request).await.unwrap();

        let worker_id = Uuid::new_v4();
        let allowed = [RequestStatus::PendingAdminApproval];
        assert!(
            store
                .insert_confirmation(&ConfirmedWorker::new(request.id, worker_id), &allowed)
                .await
                .unwrap()
        );
        let second = store
            .insert_confirmation(&ConfirmedWorker::new(request.id, worker_id), &allowed)
            .await;
        assert!(matches!(second, Err(StoreError::Constraint(_))));

        let loaded = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(loaded.confirmed.len(), 1);
    }

    #[tokio::test]
    async fn confirmation_refused_when_status_not_allowed() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let request = sample_request(7);
        store.insert_request(&request).await.unwrap();

        // A cancellation landing before the insert must leave no record.
        store
            .transition_request(
                request.id,
                &[RequestStatus::PendingAdminApproval],
                RequestStatus::Cancelled,
            )
            .await
            .unwrap();

        let inserted = store
            .insert_confirmation(
                &ConfirmedWorker::new(request.id, Uuid::new_v4()),
                &[RequestStatus::Notified, RequestStatus::Confirmed],
            )
            .await
            .unwrap();
        assert!(!inserted);

        let loaded = store.get_request(request.id).await.unwrap().unwrap();
        assert!(loaded.confirmed.is_empty());
    }

    #[tokio::test]
    async fn deploy_is_idempotent_and_flips_availability() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let request = sample_request(7);
        store.insert_request(&request).await.unwrap();
        let worker = sample_worker(&[SkillType::Electrician]);
        store.upsert_worker(&worker).await.unwrap();

        assert!(
            store
                .deploy_worker(&DeployedWorker::new(request.id, worker.id))
                .await
                .unwrap()
        );
        assert!(
            !store
                .deploy_worker(&DeployedWorker::new(request.id, worker.id))
                .await
                .unwrap()
        );

        let loaded = store.get_worker(worker.id).await.unwrap().unwrap();
        assert!(!loaded.available);

        let request = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(request.deployed.len(), 1);
    }

    #[tokio::test]
    async fn release_restores_availability() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let request = sample_request(7);
        store.insert_request(&request).await.unwrap();

        let a = sample_worker(&[SkillType::Electrician]);
        let b = sample_worker(&[SkillType::Plumber]);
        store.upsert_worker(&a).await.unwrap();
        store.upsert_worker(&b).await.unwrap();
        store
            .deploy_worker(&DeployedWorker::new(request.id, a.id))
            .await
            .unwrap();
        store
            .deploy_worker(&DeployedWorker::new(request.id, b.id))
            .await
            .unwrap();

        let released = store.release_deployed_workers(request.id).await.unwrap();
        assert_eq!(released, 2);
        assert!(store.get_worker(a.id).await.unwrap().unwrap().available);
        assert!(store.get_worker(b.id).await.unwrap().unwrap().available);
    }

    #[tokio::test]
    async fn commitment_requires_active_request() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let today = Utc::now().date_naive();

        let request = sample_request(3);
        store.insert_request(&request).await.unwrap();
        let worker_id = Uuid::new_v4();
        store
            .insert_confirmation(
                &ConfirmedWorker::new(request.id, worker_id),
                &[RequestStatus::PendingAdminApproval],
            )
            .await
            .unwrap();

        assert!(store.has_active_commitment(worker_id, today).await.unwrap());
        assert!(
            store
                .committed_worker_ids(today)
                .await
                .unwrap()
                .contains(&worker_id)
        );

        // Completion releases the commitment even though end_date is ahead.
        store
            .transition_request(
                request.id,
                &[RequestStatus::PendingAdminApproval],
                RequestStatus::AdminApproved,
            )
            .await
            .unwrap();
        store
            .conn()
            .execute(
                "UPDATE requests SET status = 'completed' WHERE id = ?1",
                params![request.id.to_string()],
            )
            .await
            .unwrap();
        assert!(!store.has_active_commitment(worker_id, today).await.unwrap());
    }

    #[tokio::test]
    async fn commitment_expires_with_end_date() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let today = Utc::now().date_naive();

        // Request whose work period already ended.
        let past = sample_request(-10);
        store.insert_request(&past).await.unwrap();
        let worker_id = Uuid::new_v4();
        store
            .insert_confirmation(
                &ConfirmedWorker::new(past.id, worker_id),
                &[RequestStatus::PendingAdminApproval],
            )
            .await
            .unwrap();

        assert!(!store.has_active_commitment(worker_id, today).await.unwrap());
    }

    #[tokio::test]
    async fn matching_workers_applies_admission_gates() {
        let store = LibSqlStore::new_memory().await.unwrap();

        let verified = sample_worker(&[SkillType::Electrician]);
        let mut unverified = sample_worker(&[SkillType::Electrician]);
        unverified.verified = false;
        let mut unavailable = sample_worker(&[SkillType::Electrician]);
        unavailable.available = false;
        let other_skill = sample_worker(&[SkillType::Cook]);

        for w in [&verified, &unverified, &unavailable, &other_skill] {
            store.upsert_worker(w).await.unwrap();
        }

        let found = store
            .find_matching_workers(&[SkillType::Electrician, SkillType::Plumber])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, verified.id);
        assert_eq!(found[0].skills, verified.skills);
    }

    #[tokio::test]
    async fn worker_skills_roundtrip() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let worker = sample_worker(&[SkillType::Electrician, SkillType::Welder]);
        store.upsert_worker(&worker).await.unwrap();

        let loaded = store.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(loaded.skills, worker.skills);
        assert!(loaded.verified);
        assert_eq!(loaded.location, worker.location);
    }

    #[tokio::test]
    async fn corrupt_stored_values_surface_as_serialization_errors() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let request = sample_request(7);
        store.insert_request(&request).await.unwrap();

        store
            .conn()
            .execute(
                "UPDATE requests SET created_at = 'garbage' WHERE id = ?1",
                params![request.id.to_string()],
            )
            .await
            .unwrap();
        assert!(matches!(
            store.get_request(request.id).await,
            Err(StoreError::Serialization(_))
        ));

        let worker = sample_worker(&[SkillType::Electrician]);
        store.upsert_worker(&worker).await.unwrap();
        store
            .conn()
            .execute("PRAGMA foreign_keys = OFF", ())
            .await
            .unwrap();
        store
            .conn()
            .execute(
                "UPDATE workers SET id = 'not-a-uuid' WHERE id = ?1",
                params![worker.id.to_string()],
            )
            .await
            .unwrap();
        store
            .conn()
            .execute(
                "UPDATE worker_skills SET worker_id = 'not-a-uuid' WHERE worker_id = ?1",
                params![worker.id.to_string()],
            )
            .await
            .unwrap();
        assert!(matches!(
            store.find_matching_workers(&[SkillType::Electrician]).await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.db");

        let request = sample_request(7);
        {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            store.insert_request(&request).await.unwrap();
        }

        let store = LibSqlStore::new_local(&path).await.unwrap();
        let loaded = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(loaded.description, "Wiring job");
    }
}
