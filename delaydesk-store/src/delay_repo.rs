use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delaydesk_core::{
    Agent, DelayError, DelayOutcome, DelayReport, DelayRepository, Order, RepoError, Trip,
    TripStatus, Vendor, VendorDelayCount, VendorDelayStream,
};
use futures_util::{StreamExt, TryStreamExt};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Partial unique index backing the one-open-report-per-order rule.
const OPEN_REPORT_INDEX: &str = "delay_reports_one_open_per_order";

pub struct PgDelayRepository {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgDelayRepository {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self { pool, lock_timeout_ms }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction whose row-lock waits give up after `lock_timeout_ms`.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>, RepoError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        Ok(tx)
    }

    pub async fn insert_vendor(&self, vendor: &Vendor) -> Result<(), RepoError> {
        sqlx::query("INSERT INTO vendors (id, name) VALUES ($1, $2)")
            .bind(vendor.id)
            .bind(&vendor.name)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Insert an order, or overwrite its timing when it already exists.
    pub async fn insert_order(&self, order: &Order) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, vendor_id, created_at, delivery_time, delivery_time_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET delivery_time = EXCLUDED.delivery_time, delivery_time_at = EXCLUDED.delivery_time_at
            "#,
        )
        .bind(order.id)
        .bind(order.vendor_id)
        .bind(order.created_at)
        .bind(order.delivery_time)
        .bind(order.delivery_time_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    pub async fn insert_trip(&self, trip: &Trip) -> Result<(), RepoError> {
        sqlx::query("INSERT INTO trips (id, order_id, status) VALUES ($1, $2, $3)")
            .bind(trip.id)
            .bind(trip.order_id)
            .bind(trip.status.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    pub async fn insert_agent(&self, agent: &Agent) -> Result<(), RepoError> {
        sqlx::query("INSERT INTO agents (id, user_id, is_report_assigned) VALUES ($1, $2, $3)")
            .bind(agent.id)
            .bind(agent.user_id)
            .bind(agent.is_report_assigned)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    pub async fn reports_for_order(&self, order_id: Uuid) -> Result<Vec<DelayReport>, RepoError> {
        let rows = sqlx::query_as::<_, ReportRow>(
            "SELECT id, order_id, agent_id, is_processed, created_at FROM delay_reports WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(DelayReport::from).collect())
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    vendor_id: Uuid,
    created_at: DateTime<Utc>,
    delivery_time: i32,
    delivery_time_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Order {
            id: row.id,
            vendor_id: row.vendor_id,
            created_at: row.created_at,
            delivery_time: row.delivery_time,
            delivery_time_at: row.delivery_time_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    order_id: Uuid,
    status: String,
}

impl TryFrom<TripRow> for Trip {
    type Error = RepoError;

    fn try_from(row: TripRow) -> Result<Self, Self::Error> {
        let status: TripStatus = row.status.parse().map_err(RepoError::Database)?;
        Ok(Trip {
            id: row.id,
            order_id: row.order_id,
            status,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: Uuid,
    user_id: Uuid,
    is_report_assigned: bool,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Agent {
            id: row.id,
            user_id: row.user_id,
            is_report_assigned: row.is_report_assigned,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    order_id: Uuid,
    agent_id: Option<Uuid>,
    is_processed: bool,
    created_at: DateTime<Utc>,
}

impl From<ReportRow> for DelayReport {
    fn from(row: ReportRow) -> Self {
        DelayReport {
            id: row.id,
            order_id: row.order_id,
            agent_id: row.agent_id,
            is_processed: row.is_processed,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VendorDelayRow {
    vendor_name: String,
    delay_count: i64,
}

fn db_error(err: sqlx::Error) -> RepoError {
    match &err {
        sqlx::Error::PoolTimedOut => return RepoError::Contention(err.to_string()),
        sqlx::Error::Database(db) => {
            // lock_not_available, deadlock_detected, serialization_failure
            if matches!(db.code().as_deref(), Some("55P03" | "40P01" | "40001")) {
                return RepoError::Contention(db.message().to_string());
            }
        }
        _ => {}
    }
    RepoError::Database(err.to_string())
}

fn insert_report_error(err: sqlx::Error, order_id: Uuid) -> RepoError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() && db.constraint() == Some(OPEN_REPORT_INDEX) {
            return RepoError::OpenReportExists { order_id };
        }
        if db.is_foreign_key_violation() {
            return RepoError::NotFound { entity: "Order", id: order_id.to_string() };
        }
    }
    db_error(err)
}

async fn has_open_report(conn: &mut PgConnection, order_id: Uuid) -> Result<bool, RepoError> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM delay_reports WHERE order_id = $1 AND is_processed = FALSE)",
    )
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_error)
}

/// Check-then-insert; the partial unique index catches a concurrent insert
/// that slips between the two statements.
async fn insert_report(
    conn: &mut PgConnection,
    order_id: Uuid,
    is_processed: bool,
    now: DateTime<Utc>,
) -> Result<DelayReport, RepoError> {
    if has_open_report(&mut *conn, order_id).await? {
        return Err(RepoError::OpenReportExists { order_id });
    }

    let report = DelayReport::new(order_id, is_processed, now);
    sqlx::query(
        r#"
        INSERT INTO delay_reports (id, order_id, agent_id, is_processed, created_at)
        VALUES ($1, $2, NULL, $3, $4)
        "#,
    )
    .bind(report.id)
    .bind(order_id)
    .bind(is_processed)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| insert_report_error(e, order_id))?;

    Ok(report)
}

#[async_trait]
impl DelayRepository for PgDelayRepository {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, RepoError> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT id, vendor_id, created_at, delivery_time, delivery_time_at FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(Order::from))
    }

    async fn trip_by_order(&self, order_id: Uuid) -> Result<Trip, RepoError> {
        sqlx::query_as::<_, TripRow>("SELECT id, order_id, status FROM trips WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| RepoError::NotFound { entity: "Trip", id: order_id.to_string() })?
            .try_into()
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, RepoError> {
        let row = sqlx::query_as::<_, AgentRow>(
            "SELECT id, user_id, is_report_assigned FROM agents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(Agent::from))
    }

    async fn agent_by_user(&self, user_id: Uuid) -> Result<Option<Agent>, RepoError> {
        let row = sqlx::query_as::<_, AgentRow>(
            "SELECT id, user_id, is_report_assigned FROM agents WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(Agent::from))
    }

    async fn is_open(&self, order_id: Uuid) -> Result<bool, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        has_open_report(&mut conn, order_id).await
    }

    async fn create_report(
        &self,
        order_id: Uuid,
        is_processed: bool,
        now: DateTime<Utc>,
    ) -> Result<DelayReport, RepoError> {
        let mut tx = self.begin().await?;
        let report = insert_report(&mut tx, order_id, is_processed, now).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(report)
    }

    async fn record_delay(
        &self,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Order, DelayOutcome), DelayError> {
        let mut tx = self.begin().await?;

        // Locking the order serializes concurrent announcements for it.
        let mut order: Order = sqlx::query_as::<_, OrderRow>(
            "SELECT id, vendor_id, created_at, delivery_time, delivery_time_at FROM orders WHERE id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| DelayError::not_found("Order", order_id))?
        .into();

        order.ensure_delivery_time_passed(now)?;
        if has_open_report(&mut tx, order_id).await? {
            return Err(DelayError::AlreadyHaveOpenReport(order_id));
        }

        let trip = sqlx::query_as::<_, TripRow>("SELECT id, order_id, status FROM trips WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .map(Trip::try_from)
            .transpose()?;

        let outcome = order.apply_delay(trip.as_ref(), now);
        insert_report(&mut tx, order_id, outcome.report_is_processed(), now).await?;

        if outcome.is_delayed() {
            sqlx::query("UPDATE orders SET delivery_time = $1, delivery_time_at = $2 WHERE id = $3")
                .bind(order.delivery_time)
                .bind(order.delivery_time_at)
                .bind(order.id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok((order, outcome))
    }

    async fn claim_oldest_open_report(&self, agent_id: Uuid) -> Result<DelayReport, DelayError> {
        let mut tx = self.begin().await?;

        let agent: Agent = sqlx::query_as::<_, AgentRow>(
            "SELECT id, user_id, is_report_assigned FROM agents WHERE id = $1 FOR UPDATE",
        )
        .bind(agent_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| DelayError::not_found("Agent", agent_id))?
        .into();
        agent.ensure_can_claim()?;

        // SKIP LOCKED hands concurrent claimers different rows instead of
        // letting the loser re-check a row that no longer matches.
        let mut report: DelayReport = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT id, order_id, agent_id, is_processed, created_at
            FROM delay_reports
            WHERE is_processed = FALSE AND agent_id IS NULL
            ORDER BY created_at, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or(DelayError::NoReportAvailable)?
        .into();

        sqlx::query("UPDATE delay_reports SET agent_id = $1 WHERE id = $2")
            .bind(agent_id)
            .bind(report.id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query("UPDATE agents SET is_report_assigned = TRUE WHERE id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        report.agent_id = Some(agent_id);
        Ok(report)
    }

    fn vendor_delay_counts(&self, since: DateTime<Utc>) -> VendorDelayStream<'_> {
        sqlx::query_as::<_, VendorDelayRow>(
            r#"
            SELECT v.name AS vendor_name, COUNT(r.id) AS delay_count
            FROM delay_reports r
            JOIN orders o ON o.id = r.order_id
            JOIN vendors v ON v.id = o.vendor_id
            WHERE r.created_at >= $1
            GROUP BY v.id, v.name
            ORDER BY delay_count DESC
            "#,
        )
        .bind(since)
        .fetch(&self.pool)
        .map_ok(|row| VendorDelayCount {
            vendor_name: row.vendor_name,
            delay_count: row.delay_count,
        })
        .map_err(db_error)
        .boxed()
    }
}
