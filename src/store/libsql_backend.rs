//! libSQL backend for the reservation and user stores.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! RFC 3339 UTC text with second precision so that text ordering matches
//! time ordering.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    Database, NewChatUser, NewReservation, Reservation, ReservationStatus, ReservationStore,
    User, UserStore,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn find_reservation(&self, id: i64) -> Result<Option<Reservation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_reservation: {e}")))?;

        first_row(&mut rows, row_to_reservation, "find_reservation").await
    }

    async fn query_reservations(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Reservation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut reservations = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_reservation(&row) {
                Ok(r) => reservations.push(r),
                Err(e) => {
                    warn!("Skipping reservation row: {e}");
                }
            }
        }
        Ok(reservations)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format for timestamps.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(n: Option<i64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

/// Unique and foreign-key violations surface as `Constraint`, the rest as `Query`.
fn map_write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") || msg.contains("FOREIGN KEY constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

async fn first_row<T>(
    rows: &mut libsql::Rows,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
    op: &str,
) -> Result<Option<T>, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => map(&row)
            .map(Some)
            .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}"))),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

/// Map a libsql Row to a Reservation.
///
/// Column order matches RESERVATION_COLUMNS.
fn row_to_reservation(row: &libsql::Row) -> Result<Reservation, libsql::Error> {
    let status_str: String = row.get(10)?;
    let scheduled_str: String = row.get(9)?;
    let created_str: String = row.get(11)?;
    let updated_str: String = row.get(12)?;

    Ok(Reservation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        remote_reservation_id: row.get(2)?,
        company_id: row.get(3)?,
        company_name: row.get(4)?,
        service_id: row.get(5)?,
        service_name: row.get(6)?,
        staff_id: row.get::<i64>(7).ok(),
        staff_name: row.get::<String>(8).ok(),
        scheduled_at: parse_datetime(&scheduled_str),
        status: status_str.parse().unwrap_or(ReservationStatus::Active),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a User.
///
/// Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<User, libsql::Error> {
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    Ok(User {
        id: row.get(0)?,
        telegram_id: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get::<String>(3).ok(),
        username: row.get::<String>(4).ok(),
        phone: row.get::<String>(5).ok(),
        email: row.get::<String>(6).ok(),
        provider_user_token: row.get::<String>(7).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const RESERVATION_COLUMNS: &str = "id, user_id, remote_reservation_id, company_id, company_name, service_id, service_name, staff_id, staff_name, scheduled_at, status, created_at, updated_at";

const USER_COLUMNS: &str = "id, telegram_id, first_name, last_name, username, phone, email, provider_user_token, created_at, updated_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }
}

#[async_trait]
impl ReservationStore for LibSqlBackend {
    async fn create(&self, data: &NewReservation) -> Result<Reservation, DatabaseError> {
        let now = ts(Utc::now());
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO reservations (user_id, remote_reservation_id, company_id,
                        company_name, service_id, service_name, staff_id, staff_name,
                        scheduled_at, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'active', ?10, ?10)
                     RETURNING {RESERVATION_COLUMNS}"
                ),
                params![
                    data.user_id,
                    data.remote_reservation_id,
                    data.company_id,
                    data.company_name.clone(),
                    data.service_id,
                    data.service_name.clone(),
                    opt_int(data.staff_id),
                    opt_text(data.staff_name.as_deref()),
                    ts(data.scheduled_at),
                    now,
                ],
            )
            .await
            .map_err(|e| map_write_error("create_reservation", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| map_write_error("create_reservation", e))?
            .ok_or_else(|| DatabaseError::Query("create_reservation: no row returned".into()))?;
        let reservation = row_to_reservation(&row)
            .map_err(|e| DatabaseError::Query(format!("create_reservation row parse: {e}")))?;

        debug!(
            id = reservation.id,
            user_id = reservation.user_id,
            remote_id = reservation.remote_reservation_id,
            "Reservation inserted into DB"
        );
        Ok(reservation)
    }

    async fn find_active_by_user(&self, user_id: i64) -> Result<Vec<Reservation>, DatabaseError> {
        self.query_reservations(
            &format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations
                 WHERE user_id = ?1 AND status = 'active' AND scheduled_at >= ?2
                 ORDER BY scheduled_at DESC, id DESC"
            ),
            params![user_id, ts(Utc::now())],
            "find_active_by_user",
        )
        .await
    }

    async fn find_all_by_user(&self, user_id: i64) -> Result<Vec<Reservation>, DatabaseError> {
        self.query_reservations(
            &format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations
                 WHERE user_id = ?1
                 ORDER BY scheduled_at DESC, id DESC"
            ),
            params![user_id],
            "find_all_by_user",
        )
        .await
    }

    async fn find_by_remote_id(
        &self,
        remote_reservation_id: i64,
    ) -> Result<Option<Reservation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE remote_reservation_id = ?1"
                ),
                params![remote_reservation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_remote_id: {e}")))?;

        first_row(&mut rows, row_to_reservation, "find_by_remote_id").await
    }

    async fn set_status(
        &self,
        id: i64,
        status: ReservationStatus,
    ) -> Result<Option<Reservation>, DatabaseError> {
        let Some(current) = self.find_reservation(id).await? else {
            return Ok(None);
        };

        if !current.status.can_transition_to(status) {
            return Err(DatabaseError::Constraint(format!(
                "reservation {id}: cannot move from {} to {status}",
                current.status
            )));
        }

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE reservations SET status = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = ?4
                     RETURNING {RESERVATION_COLUMNS}"
                ),
                params![status.as_str(), ts(Utc::now()), id, current.status.as_str()],
            )
            .await
            .map_err(|e| map_write_error("set_status", e))?;

        let updated = first_row(&mut rows, row_to_reservation, "set_status").await?;
        if updated.is_none() {
            // Lost a race with a concurrent transition.
            return Err(DatabaseError::Constraint(format!(
                "reservation {id}: status changed concurrently"
            )));
        }

        info!(id, status = %status, "Reservation status updated");
        Ok(updated)
    }
}

#[async_trait]
impl UserStore for LibSqlBackend {
    async fn upsert_chat_user(&self, user: &NewChatUser) -> Result<User, DatabaseError> {
        let now = ts(Utc::now());
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO users (telegram_id, first_name, last_name, username, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(telegram_id) DO UPDATE SET
                        first_name = excluded.first_name,
                        last_name = excluded.last_name,
                        username = excluded.username,
                        updated_at = excluded.updated_at
                     RETURNING {USER_COLUMNS}"
                ),
                params![
                    user.telegram_id,
                    user.first_name.clone(),
                    opt_text(user.last_name.as_deref()),
                    opt_text(user.username.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| map_write_error("upsert_chat_user", e))?;

        first_row(&mut rows, row_to_user, "upsert_chat_user")
            .await?
            .ok_or_else(|| DatabaseError::Query("upsert_chat_user: no row returned".into()))
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        first_row(&mut rows, row_to_user, "get_user").await
    }

    async fn update_contact_info(
        &self,
        id: i64,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE users SET phone = COALESCE(?2, phone), email = COALESCE(?3, email),
                        updated_at = ?4
                     WHERE id = ?1
                     RETURNING {USER_COLUMNS}"
                ),
                params![id, opt_text(phone), opt_text(email), ts(Utc::now())],
            )
            .await
            .map_err(|e| map_write_error("update_contact_info", e))?;

        let user = first_row(&mut rows, row_to_user, "update_contact_info").await?;
        if user.is_some() {
            debug!(user_id = id, phone = phone.is_some(), email = email.is_some(), "Contact info updated");
        }
        Ok(user)
    }

    async fn set_provider_token(
        &self,
        id: i64,
        token: Option<&str>,
    ) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE users SET provider_user_token = ?2, updated_at = ?3
                     WHERE id = ?1
                     RETURNING {USER_COLUMNS}"
                ),
                params![id, opt_text(token), ts(Utc::now())],
            )
            .await
            .map_err(|e| map_write_error("set_provider_token", e))?;

        first_row(&mut rows, row_to_user, "set_provider_token").await
    }
}
