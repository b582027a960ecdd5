use chrono::{Duration, Utc};
use delaydesk_core::{
    Agent, DelayError, DelayOutcome, DelayPolicy, DelayReport, DelayRepository, DelayResult,
    TripStatus, VendorDelayCount, VendorDelayStream,
};
use futures_util::TryStreamExt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::retry::with_retry;

/// Entry point for the delay workflow: announcing delays, handing escalated
/// reports to agents and summarizing delays per vendor.
pub struct DelayDesk {
    repo: Arc<dyn DelayRepository>,
    policy: DelayPolicy,
}

impl DelayDesk {
    pub fn new(repo: Arc<dyn DelayRepository>, policy: DelayPolicy) -> Self {
        Self { repo, policy }
    }

    /// Announce a delay and report whether the order's estimate was extended.
    pub async fn announce_delay(&self, order_id: Uuid) -> DelayResult<bool> {
        Ok(self.delay(order_id).await?.is_delayed())
    }

    /// Run the delay decision for an order and return the full outcome.
    pub async fn delay(&self, order_id: Uuid) -> DelayResult<DelayOutcome> {
        let repo = &self.repo;
        let (order, outcome) = with_retry(&self.policy, "delay", move || async move {
            repo.record_delay(order_id, Utc::now()).await
        })
        .await?;

        match &outcome {
            DelayOutcome::Escalated { delivery_time, delivery_time_at } => info!(
                order_id = %order.id,
                delivery_time,
                delivery_time_at = %delivery_time_at,
                "Delay granted, report queued for an agent"
            ),
            DelayOutcome::NoTrip => debug!(order_id = %order.id, "Delay recorded, order has no trip"),
            DelayOutcome::Resolved { status } => {
                debug!(order_id = %order.id, trip_status = %status, "Delay recorded, trip already past delay statuses")
            }
        }

        Ok(outcome)
    }

    /// Hand the oldest unclaimed open report to the agent.
    pub async fn assign(&self, agent_id: Uuid) -> DelayResult<DelayReport> {
        let agent = self
            .repo
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| DelayError::not_found("Agent", agent_id))?;

        // An agent holding a claim never contends for another row.
        agent.ensure_can_claim()?;

        let repo = &self.repo;
        let report = with_retry(&self.policy, "assign", move || {
            repo.claim_oldest_open_report(agent_id)
        })
        .await?;

        info!(
            agent_id = %agent_id,
            report_id = %report.id,
            order_id = %report.order_id,
            "Delay report assigned"
        );
        Ok(report)
    }

    /// Resolve the authenticated user to their agent record.
    pub async fn agent_for_user(&self, user_id: Uuid) -> DelayResult<Agent> {
        self.repo
            .agent_by_user(user_id)
            .await?
            .ok_or_else(|| DelayError::not_found("Agent", user_id))
    }

    pub async fn trip_status(&self, order_id: Uuid) -> DelayResult<TripStatus> {
        Ok(self.repo.trip_by_order(order_id).await?.status)
    }

    pub async fn is_open(&self, order_id: Uuid) -> DelayResult<bool> {
        Ok(self.repo.is_open(order_id).await?)
    }

    /// Delay counts per vendor over the trailing report window, most delayed
    /// first. The stream is recomputed from storage on every call.
    pub fn report(&self) -> VendorDelayStream<'_> {
        let since = Utc::now() - Duration::days(self.policy.report_window_days);
        self.repo.vendor_delay_counts(since)
    }

    pub async fn collect_report(&self) -> DelayResult<Vec<VendorDelayCount>> {
        Ok(self.report().try_collect::<Vec<_>>().await?)
    }
}
