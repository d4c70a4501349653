use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};

use crate::model::*;
use crate::notify::AdminDirectory;
use crate::time::format_for_store;

use super::{LeaseStore, SqlValue, StoreError, UpdateBuilder};

const RESERVATION_COLUMNS: &str = "id, reference_code, kind, status, vehicle_id, driver_id, \
     vehicle_lease_until, driver_lease_until, reject_reason, contact_email, \
     requester_name, requester_employee_id";

const LIVE_STATUSES: &[ReservationStatus] = &[ReservationStatus::Pending, ReservationStatus::Approved];
const TERMINAL_STATUSES: &[ReservationStatus] = &[ReservationStatus::Rejected, ReservationStatus::Cancelled];

#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    id: i64,
    reference_code: String,
    kind: String,
    status: String,
    vehicle_id: Option<i64>,
    driver_id: Option<i64>,
    vehicle_lease_until: Option<Timestamp>,
    driver_lease_until: Option<Timestamp>,
    reject_reason: Option<String>,
    contact_email: Option<String>,
    requester_name: Option<String>,
    requester_employee_id: Option<String>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let status = ReservationStatus::parse(&row.status).ok_or_else(|| {
            StoreError::InvalidRow(format!("reservation {}: unknown status {:?}", row.id, row.status))
        })?;
        Ok(Reservation {
            id: row.id,
            reference_code: row.reference_code,
            kind: row.kind,
            status,
            vehicle_id: row.vehicle_id,
            driver_id: row.driver_id,
            vehicle_lease_until: row.vehicle_lease_until,
            driver_lease_until: row.driver_lease_until,
            reject_reason: row.reject_reason,
            contact_email: row.contact_email,
            requester_name: row.requester_name,
            requester_employee_id: row.requester_employee_id,
        })
    }
}

fn columns(kind: ResourceKind) -> (&'static str, &'static str) {
    match kind {
        ResourceKind::Vehicle => ("vehicle_id", "vehicle_lease_until"),
        ResourceKind::Driver => ("driver_id", "driver_lease_until"),
    }
}

// ── Statements ───────────────────────────────────────────────────

fn lease_holder_sql(kind: ResourceKind) -> String {
    let (id_col, until_col) = columns(kind);
    format!(
        "SELECT id FROM reservations \
         WHERE {id_col} = $1 AND {until_col} > $2::timestamp AND status = ANY($3) \
         AND ($4::bigint IS NULL OR id <> $4) \
         ORDER BY id LIMIT 1"
    )
}

fn assign_statement(id: ReservationId, kind: ResourceKind, resource_id: ResourceId, until: Timestamp) -> UpdateBuilder {
    let (id_col, until_col) = columns(kind);
    UpdateBuilder::new("reservations")
        .set(id_col, resource_id)
        .set(until_col, SqlValue::timestamp(until))
        .where_eq("id", id)
        .where_any("status", LIVE_STATUSES)
}

fn cancel_statement(id: ReservationId, reason: &str, now: Timestamp) -> UpdateBuilder {
    UpdateBuilder::new("reservations")
        .set("status", ReservationStatus::Cancelled.as_str())
        .set("reject_reason", reason)
        .set_null("vehicle_lease_until")
        .set_null("driver_lease_until")
        .where_eq("id", id)
        .where_eq("status", ReservationStatus::Pending.as_str())
        .where_lt("vehicle_lease_until", SqlValue::timestamp(now))
}

fn release_statement(ids: &[ReservationId], now: Timestamp) -> UpdateBuilder {
    UpdateBuilder::new("reservations")
        .set_null("vehicle_lease_until")
        .set_null("driver_lease_until")
        .where_any("id", ids)
        .where_eq("status", ReservationStatus::Approved.as_str())
        .where_either_lt("vehicle_lease_until", "driver_lease_until", SqlValue::timestamp(now))
        .returning("id")
}

fn clear_terminal_statement() -> UpdateBuilder {
    UpdateBuilder::new("reservations")
        .set_null("vehicle_lease_until")
        .set_null("driver_lease_until")
        .where_any("status", TERMINAL_STATUSES)
        .where_either_not_null("vehicle_lease_until", "driver_lease_until")
}

fn status_texts(statuses: &[ReservationStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn bind_value(q: Query<'_, Postgres, PgArguments>, value: SqlValue) -> Query<'_, Postgres, PgArguments> {
    match value {
        SqlValue::Null => q.bind(None::<String>),
        SqlValue::Int(v) => q.bind(v),
        SqlValue::Text(s) | SqlValue::Timestamp(s) => q.bind(s),
        SqlValue::IntList(ids) => q.bind(ids),
        SqlValue::TextList(values) => q.bind(values),
    }
}

/// Relational store over the booking tool's Postgres schema.
///
/// Timestamps are written through [`format_for_store`] and cast with
/// `::timestamp`; the columns carry no offset.
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn execute(&self, update: UpdateBuilder) -> Result<u64, StoreError> {
        let (sql, params) = update.build();
        let q = params.into_iter().fold(sqlx::query(&sql), bind_value);
        Ok(q.execute(&self.pool).await?.rows_affected())
    }

    async fn fetch_returning(&self, update: UpdateBuilder) -> Result<Vec<PgRow>, StoreError> {
        let (sql, params) = update.build();
        let q = params.into_iter().fold(sqlx::query(&sql), bind_value);
        Ok(q.fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
        sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn find_lease_holder(
        &self,
        kind: ResourceKind,
        resource_id: ResourceId,
        statuses: &[ReservationStatus],
        exclude: Option<ReservationId>,
        now: Timestamp,
    ) -> Result<Option<ReservationId>, StoreError> {
        let sql = lease_holder_sql(kind);
        let holder: Option<i64> = sqlx::query_scalar(&sql)
            .bind(resource_id)
            .bind(format_for_store(now))
            .bind(status_texts(statuses))
            .bind(exclude)
            .fetch_optional(&self.pool)
            .await?;
        Ok(holder)
    }

    async fn assign_lease(
        &self,
        id: ReservationId,
        kind: ResourceKind,
        resource_id: ResourceId,
        until: Timestamp,
    ) -> Result<u64, StoreError> {
        self.execute(assign_statement(id, kind, resource_id, until)).await
    }

    async fn expired_pending(&self, now: Timestamp) -> Result<Vec<Reservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = 'Pending' AND vehicle_lease_until < $1::timestamp ORDER BY id"
        );
        sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(format_for_store(now))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Reservation::try_from)
            .collect()
    }

    async fn cancel_if_expired(
        &self,
        id: ReservationId,
        reason: &str,
        now: Timestamp,
    ) -> Result<u64, StoreError> {
        self.execute(cancel_statement(id, reason, now)).await
    }

    async fn expired_approved(&self, now: Timestamp) -> Result<Vec<ReservationId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM reservations WHERE status = 'Approved' \
             AND (vehicle_lease_until < $1::timestamp OR driver_lease_until < $1::timestamp) \
             ORDER BY id",
        )
        .bind(format_for_store(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn release_expired(
        &self,
        ids: &[ReservationId],
        now: Timestamp,
    ) -> Result<Vec<ReservationId>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_returning(release_statement(ids, now))
            .await?
            .iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(StoreError::from))
            .collect()
    }

    async fn clear_terminal_leases(&self) -> Result<u64, StoreError> {
        self.execute(clear_terminal_statement()).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reservation_audit (reservation_id, actor, action, details, created_at) \
             VALUES ($1, $2, $3, $4, $5::timestamp)",
        )
        .bind(entry.reservation_id)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.details)
        .bind(format_for_store(entry.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn watchers(&self, id: ReservationId) -> Result<Vec<String>, StoreError> {
        let emails: Vec<String> = sqlx::query_scalar(
            "SELECT email FROM reservation_watchers WHERE reservation_id = $1 ORDER BY email",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(emails)
    }
}

/// Directory of administrators kept in the booking tool's `admins` table.
pub struct PgAdminDirectory {
    pool: PgPool,
}

impl PgAdminDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdminDirectory for PgAdminDirectory {
    async fn active_admin_email(&self) -> Result<Option<String>, StoreError> {
        let email: Option<String> = sqlx::query_scalar(
            "SELECT email FROM admins WHERE active AND email IS NOT NULL ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(email)
    }
}
