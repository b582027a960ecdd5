use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delaydesk_core::{
    Agent, DelayError, DelayOutcome, DelayReport, DelayRepository, Order, RepoError, Trip,
    TripStatus, Vendor, VendorDelayCount, VendorDelayStream,
};
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    vendors: HashMap<Uuid, Vendor>,
    orders: HashMap<Uuid, Order>,
    /// Keyed by order id, one trip per order.
    trips: HashMap<Uuid, Trip>,
    agents: HashMap<Uuid, Agent>,
    /// Insertion order is the natural row order.
    reports: Vec<DelayReport>,
}

impl Tables {
    fn has_open_report(&self, order_id: Uuid) -> bool {
        self.reports
            .iter()
            .any(|r| r.order_id == order_id && r.is_open())
    }

    fn insert_report(
        &mut self,
        order_id: Uuid,
        is_processed: bool,
        now: DateTime<Utc>,
    ) -> Result<DelayReport, RepoError> {
        if !self.orders.contains_key(&order_id) {
            return Err(RepoError::NotFound { entity: "Order", id: order_id.to_string() });
        }
        if self.has_open_report(order_id) {
            return Err(RepoError::OpenReportExists { order_id });
        }
        let report = DelayReport::new(order_id, is_processed, now);
        self.reports.push(report.clone());
        Ok(report)
    }

    fn vendor_delay_counts(&self, since: DateTime<Utc>) -> Vec<VendorDelayCount> {
        let mut counts: Vec<(Uuid, i64)> = Vec::new();

        for report in self.reports.iter().filter(|r| r.created_at >= since) {
            let Some(order) = self.orders.get(&report.order_id) else {
                continue;
            };
            match counts.iter_mut().find(|(vendor_id, _)| *vendor_id == order.vendor_id) {
                Some((_, count)) => *count += 1,
                None => counts.push((order.vendor_id, 1)),
            }
        }

        // Stable: equal counts keep first-seen order.
        counts.sort_by(|a, b| b.1.cmp(&a.1));

        counts
            .into_iter()
            .filter_map(|(vendor_id, delay_count)| {
                self.vendors.get(&vendor_id).map(|vendor| VendorDelayCount {
                    vendor_name: vendor.name.clone(),
                    delay_count,
                })
            })
            .collect()
    }
}

/// Process-local `DelayRepository`.
///
/// Every operation holds the table lock from start to finish, which gives the
/// same all-or-nothing and serialized-claim behavior the Postgres repository
/// gets from transactions and row locks.
#[derive(Default)]
pub struct InMemoryDelayRepository {
    tables: Mutex<Tables>,
}

impl InMemoryDelayRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_vendor(&self, vendor: Vendor) {
        self.tables.lock().await.vendors.insert(vendor.id, vendor);
    }

    /// Insert or replace an order.
    pub async fn insert_order(&self, order: Order) {
        self.tables.lock().await.orders.insert(order.id, order);
    }

    pub async fn insert_trip(&self, trip: Trip) {
        self.tables.lock().await.trips.insert(trip.order_id, trip);
    }

    pub async fn set_trip_status(&self, order_id: Uuid, status: TripStatus) -> Result<(), RepoError> {
        let mut tables = self.tables.lock().await;
        let trip = tables
            .trips
            .get_mut(&order_id)
            .ok_or_else(|| RepoError::NotFound { entity: "Trip", id: order_id.to_string() })?;
        trip.status = status;
        Ok(())
    }

    pub async fn insert_agent(&self, agent: Agent) {
        self.tables.lock().await.agents.insert(agent.id, agent);
    }

    pub async fn reports(&self) -> Vec<DelayReport> {
        self.tables.lock().await.reports.clone()
    }
}

#[async_trait]
impl DelayRepository for InMemoryDelayRepository {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, RepoError> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn trip_by_order(&self, order_id: Uuid) -> Result<Trip, RepoError> {
        self.tables
            .lock()
            .await
            .trips
            .get(&order_id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound { entity: "Trip", id: order_id.to_string() })
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, RepoError> {
        Ok(self.tables.lock().await.agents.get(&id).cloned())
    }

    async fn agent_by_user(&self, user_id: Uuid) -> Result<Option<Agent>, RepoError> {
        Ok(self
            .tables
            .lock()
            .await
            .agents
            .values()
            .find(|agent| agent.user_id == user_id)
            .cloned())
    }

    async fn is_open(&self, order_id: Uuid) -> Result<bool, RepoError> {
        Ok(self.tables.lock().await.has_open_report(order_id))
    }

    async fn create_report(
        &self,
        order_id: Uuid,
        is_processed: bool,
        now: DateTime<Utc>,
    ) -> Result<DelayReport, RepoError> {
        self.tables.lock().await.insert_report(order_id, is_processed, now)
    }

    async fn record_delay(
        &self,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Order, DelayOutcome), DelayError> {
        let mut tables = self.tables.lock().await;

        let mut order = tables
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| DelayError::not_found("Order", order_id))?;

        order.ensure_delivery_time_passed(now)?;
        if tables.has_open_report(order_id) {
            return Err(DelayError::AlreadyHaveOpenReport(order_id));
        }

        let trip = tables.trips.get(&order_id).cloned();
        let outcome = order.apply_delay(trip.as_ref(), now);

        // Report first: a uniqueness failure must leave the order untouched.
        tables.insert_report(order_id, outcome.report_is_processed(), now)?;
        if outcome.is_delayed() {
            tables.orders.insert(order.id, order.clone());
        }

        Ok((order, outcome))
    }

    async fn claim_oldest_open_report(&self, agent_id: Uuid) -> Result<DelayReport, DelayError> {
        let mut tables = self.tables.lock().await;
        let tables = &mut *tables;

        let agent = tables
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| DelayError::not_found("Agent", agent_id))?;
        agent.ensure_can_claim()?;

        let report = tables
            .reports
            .iter_mut()
            .filter(|r| r.is_claimable())
            .min_by_key(|r| (r.created_at, r.id))
            .ok_or(DelayError::NoReportAvailable)?;

        report.agent_id = Some(agent_id);
        agent.is_report_assigned = true;

        Ok(report.clone())
    }

    fn vendor_delay_counts(&self, since: DateTime<Utc>) -> VendorDelayStream<'_> {
        stream::once(async move { self.tables.lock().await.vendor_delay_counts(since) })
            .flat_map(|rows| stream::iter(rows.into_iter().map(Ok::<_, RepoError>)))
            .boxed()
    }
}
