//! Postgres-backed checks for the delay repository.
//!
//! These run against the database named by `DATABASE_URL` and are skipped
//! when it is unset. Each test truncates the workflow tables, so they are
//! serialized on a shared lock.

use chrono::{Duration, Utc};
use delaydesk_core::{
    Agent, DelayError, DelayPolicy, DelayRepository, Order, RepoError, Trip, TripStatus, Vendor,
    VendorDelayCount,
};
use delaydesk_order::DelayDesk;
use delaydesk_store::app_config::DatabaseConfig;
use delaydesk_store::{DbClient, PgDelayRepository};
use futures_util::TryStreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Barrier;
use uuid::Uuid;

static DB_LOCK: Mutex<()> = Mutex::new(());

async fn setup() -> Option<(MutexGuard<'static, ()>, Arc<PgDelayRepository>)> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres test");
        return None;
    };
    let guard = DB_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let db = DbClient::new(&DatabaseConfig {
        url,
        max_connections: 5,
        acquire_timeout_seconds: 3,
    })
    .await
    .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");
    sqlx::query("TRUNCATE delay_reports, trips, orders, agents, vendors")
        .execute(&db.pool)
        .await
        .expect("Failed to reset tables");

    Some((guard, Arc::new(PgDelayRepository::new(db.pool, 2_000))))
}

async fn vendor(repo: &PgDelayRepository, name: &str) -> Vendor {
    let vendor = Vendor::new(name);
    repo.insert_vendor(&vendor).await.unwrap();
    vendor
}

async fn order_due_in(repo: &PgDelayRepository, vendor: &Vendor, minutes: i64) -> Order {
    let order = Order::new(vendor.id, 50, Utc::now() + Duration::minutes(minutes));
    repo.insert_order(&order).await.unwrap();
    order
}

async fn agent(repo: &PgDelayRepository) -> Agent {
    let agent = Agent::new(Uuid::new_v4());
    repo.insert_agent(&agent).await.unwrap();
    agent
}

#[tokio::test]
async fn test_record_delay_branches() {
    let Some((_guard, repo)) = setup().await else { return };
    let vendor = vendor(&repo, "vendor").await;

    let early = order_due_in(&repo, &vendor, 50).await;
    let result = repo.record_delay(early.id, Utc::now()).await;
    assert!(matches!(result, Err(DelayError::DeliveryTimeNotReached)));
    assert!(repo.reports_for_order(early.id).await.unwrap().is_empty());

    let no_trip = order_due_in(&repo, &vendor, -1).await;
    let (_, outcome) = repo.record_delay(no_trip.id, Utc::now()).await.unwrap();
    assert!(!outcome.is_delayed());
    let reports = repo.reports_for_order(no_trip.id).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_processed);

    let moving = order_due_in(&repo, &vendor, -1).await;
    repo.insert_trip(&Trip::new(moving.id, TripStatus::Picked)).await.unwrap();
    let (_, outcome) = repo.record_delay(moving.id, Utc::now()).await.unwrap();
    assert!(outcome.is_delayed());
    assert_eq!(repo.get_order(moving.id).await.unwrap().unwrap().delivery_time, 65);
    assert!(repo.is_open(moving.id).await.unwrap());

    let delivered = order_due_in(&repo, &vendor, -1).await;
    repo.insert_trip(&Trip::new(delivered.id, TripStatus::Delivered)).await.unwrap();
    let (_, outcome) = repo.record_delay(delivered.id, Utc::now()).await.unwrap();
    assert!(!outcome.is_delayed());
    assert_eq!(repo.get_order(delivered.id).await.unwrap().unwrap().delivery_time, 50);
    assert!(!repo.is_open(delivered.id).await.unwrap());
}

#[tokio::test]
async fn test_second_open_report_is_rejected() {
    let Some((_guard, repo)) = setup().await else { return };
    let vendor = vendor(&repo, "vendor").await;
    let order = order_due_in(&repo, &vendor, -50).await;

    repo.create_report(order.id, false, Utc::now()).await.unwrap();
    let result = repo.create_report(order.id, false, Utc::now()).await;

    assert!(matches!(result, Err(RepoError::OpenReportExists { order_id }) if order_id == order.id));
    assert_eq!(repo.reports_for_order(order.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_partial_index_backs_the_uniqueness_check() {
    let Some((_guard, repo)) = setup().await else { return };
    let vendor = vendor(&repo, "vendor").await;
    let order = order_due_in(&repo, &vendor, -50).await;
    repo.create_report(order.id, false, Utc::now()).await.unwrap();

    let result = sqlx::query(
        "INSERT INTO delay_reports (id, order_id, is_processed, created_at) VALUES ($1, $2, FALSE, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(order.id)
    .execute(repo.pool())
    .await;

    let err = result.expect_err("duplicate open report must violate the index");
    let db_err = err.as_database_error().expect("database error");
    assert!(db_err.is_unique_violation());
    assert_eq!(db_err.constraint(), Some("delay_reports_one_open_per_order"));
}

#[tokio::test]
async fn test_concurrent_delay_on_same_order_creates_one_report() {
    let Some((_guard, repo)) = setup().await else { return };
    let vendor = vendor(&repo, "vendor").await;
    let order = order_due_in(&repo, &vendor, -1).await;
    repo.insert_trip(&Trip::new(order.id, TripStatus::Assigned)).await.unwrap();
    let order_id = order.id;
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let repo = repo.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                repo.record_delay(order_id, Utc::now()).await
            })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(DelayError::AlreadyHaveOpenReport(_)) | Err(DelayError::DeliveryTimeNotReached) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(repo.reports_for_order(order.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_claims_take_distinct_reports() {
    let Some((_guard, repo)) = setup().await else { return };
    let vendor = vendor(&repo, "vendor").await;
    for _ in 0..2 {
        let order = order_due_in(&repo, &vendor, -1).await;
        repo.create_report(order.id, false, Utc::now()).await.unwrap();
    }
    let agents = vec![agent(&repo).await, agent(&repo).await];
    let barrier = Arc::new(Barrier::new(agents.len()));

    let handles: Vec<_> = agents
        .iter()
        .map(|agent| {
            let repo = repo.clone();
            let barrier = barrier.clone();
            let agent_id = agent.id;
            tokio::spawn(async move {
                barrier.wait().await;
                repo.claim_oldest_open_report(agent_id).await
            })
        })
        .collect();

    let mut claimed = HashSet::new();
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert!(claimed.insert(report.id), "report {} claimed twice", report.id);
    }
    for agent in &agents {
        assert!(repo.get_agent(agent.id).await.unwrap().unwrap().is_report_assigned);
    }

    let third = agent(&repo).await;
    let result = repo.claim_oldest_open_report(third.id).await;
    assert!(matches!(result, Err(DelayError::NoReportAvailable)));
    assert!(!repo.get_agent(third.id).await.unwrap().unwrap().is_report_assigned);
}

#[tokio::test]
async fn test_claim_rejects_assigned_agent() {
    let Some((_guard, repo)) = setup().await else { return };
    let vendor = vendor(&repo, "vendor").await;
    for _ in 0..2 {
        let order = order_due_in(&repo, &vendor, -1).await;
        repo.create_report(order.id, false, Utc::now()).await.unwrap();
    }
    let agent = agent(&repo).await;

    repo.claim_oldest_open_report(agent.id).await.unwrap();
    let result = repo.claim_oldest_open_report(agent.id).await;

    assert!(matches!(result, Err(DelayError::AlreadyAssigned(id)) if id == agent.id));
}

#[tokio::test]
async fn test_vendor_delay_counts() {
    let Some((_guard, repo)) = setup().await else { return };
    let vendor_one = vendor(&repo, "vendor1").await;
    let vendor_two = vendor(&repo, "vendor2").await;

    let order = order_due_in(&repo, &vendor_one, -50).await;
    repo.record_delay(order.id, Utc::now()).await.unwrap();
    for _ in 0..2 {
        let order = order_due_in(&repo, &vendor_two, -50).await;
        repo.record_delay(order.id, Utc::now()).await.unwrap();
    }
    let stale = order_due_in(&repo, &vendor_one, -50).await;
    repo.create_report(stale.id, true, Utc::now() - Duration::days(8)).await.unwrap();

    let since = Utc::now() - Duration::days(7);
    let first: Vec<VendorDelayCount> = repo.vendor_delay_counts(since).try_collect().await.unwrap();
    let second: Vec<VendorDelayCount> = repo.vendor_delay_counts(since).try_collect().await.unwrap();

    assert_eq!(
        first,
        vec![
            VendorDelayCount { vendor_name: "vendor2".into(), delay_count: 2 },
            VendorDelayCount { vendor_name: "vendor1".into(), delay_count: 1 },
        ]
    );
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_lock_timeout_surfaces_as_contention_after_retries() {
    let Some((_guard, repo)) = setup().await else { return };
    let vendor = vendor(&repo, "vendor").await;
    let order = order_due_in(&repo, &vendor, -1).await;
    repo.insert_trip(&Trip::new(order.id, TripStatus::Picked)).await.unwrap();

    let policy = DelayPolicy {
        lock_timeout_ms: 100,
        max_attempts: 3,
        retry_backoff_ms: 10,
        ..DelayPolicy::default()
    };
    let impatient = PgDelayRepository::new(repo.pool().clone(), policy.lock_timeout_ms);
    let desk = DelayDesk::new(Arc::new(impatient), policy);

    let mut holder = repo.pool().begin().await.unwrap();
    sqlx::query("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order.id)
        .fetch_one(&mut *holder)
        .await
        .unwrap();

    let result = desk.delay(order.id).await;
    assert!(matches!(result, Err(DelayError::Contention(_))), "got {result:?}");
    assert!(repo.reports_for_order(order.id).await.unwrap().is_empty());

    holder.rollback().await.unwrap();

    let outcome = desk.delay(order.id).await.unwrap();
    assert!(outcome.is_delayed());
    assert_eq!(repo.reports_for_order(order.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_create_report_has_one_winner() {
    let Some((_guard, repo)) = setup().await else { return };
    let vendor = vendor(&repo, "vendor").await;
    let order = order_due_in(&repo, &vendor, -1).await;
    let order_id = order.id;
    let callers = 8;
    let barrier = Arc::new(Barrier::new(callers));

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let repo = repo.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                repo.create_report(order_id, false, Utc::now()).await
            })
        })
        .collect();

    let mut created = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(RepoError::OpenReportExists { order_id: id }) if id == order_id => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!((created, rejected), (1, callers - 1));
    assert!(repo.is_open(order_id).await.unwrap());
    assert_eq!(repo.reports_for_order(order_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_report_for_unknown_order_is_not_found() {
    let Some((_guard, repo)) = setup().await else { return };
    let order_id = Uuid::new_v4();

    let result = repo.create_report(order_id, true, Utc::now()).await;

    assert!(
        matches!(&result, Err(RepoError::NotFound { entity: "Order", id }) if *id == order_id.to_string()),
        "got {result:?}"
    );
}
