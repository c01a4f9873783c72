//! Live-database tests for the donation status machine and aggregates.
//!
//! Requires a Postgres instance with the migrations applied and a
//! `DATABASE_URL` environment variable; the settlement and sweep tests
//! also need redis (`REDIS_URL`, defaulting to localhost) for the
//! advisory cache side. Run with:
//!
//!   DATABASE_URL=postgres://localhost/gvp_test cargo test -- --ignored

use async_trait::async_trait;
use gvp_core::cache::CacheStore;
use gvp_core::entities::{
    Campaign, CampaignStatus, Donation, DonationStatus, DonorAggregate, NewConfirmedDonation,
    NewPendingDonation, RawStreamEvent,
};
use gvp_core::events::{ledger_event_channel, LedgerEvent};
use gvp_core::health::shared_reconcile_outcome;
use gvp_core::ledger::{
    LedgerClient, LedgerError, LedgerEventBatch, ReceiptStatus, SettlementReceipt,
};
use gvp_core::processors::{AggregateUpdater, LedgerWatcher, Reconciler, ReconcilerConfig};
use gvp_core::utils::now_primitive;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

async fn connect() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    PgPool::connect(&url).await.expect("Failed to connect")
}

async fn cache() -> CacheStore {
    let url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    CacheStore::connect(&url, Some("gvp-test"), 50, 18)
        .await
        .expect("Failed to connect to redis")
}

async fn updater(pool: &PgPool) -> AggregateUpdater {
    AggregateUpdater::new(pool.clone(), cache().await)
}

/// Ledger stub answering receipt lookups from a fixed table.
struct ScriptedLedger {
    receipts: HashMap<String, SettlementReceipt>,
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn get_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<SettlementReceipt>, LedgerError> {
        Ok(self.receipts.get(tx_hash).cloned())
    }

    async fn block_height(&self) -> Result<i64, LedgerError> {
        Ok(0)
    }

    async fn fetch_events(&self, _from_block: i64) -> Result<LedgerEventBatch, LedgerError> {
        Ok(LedgerEventBatch {
            events: Vec::new(),
            latest_block: 0,
        })
    }
}

async fn sweeper(pool: &PgPool, receipts: HashMap<String, SettlementReceipt>) -> Reconciler {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    Reconciler::new(
        pool.clone(),
        Arc::new(ScriptedLedger { receipts }),
        updater(pool).await,
        ReconcilerConfig {
            interval: Duration::from_secs(60),
            orphan_timeout: Duration::from_secs(1800),
        },
        shared_reconcile_outcome(),
        shutdown_rx,
    )
}

/// Push a row past the sweeper's orphan timeout without waiting for it.
async fn backdate(pool: &PgPool, tx_hash: &str) {
    let past = now_primitive() - time::Duration::hours(1);
    sqlx::query("UPDATE donations SET created_at = $2 WHERE tx_hash = $1")
        .bind(tx_hash)
        .bind(past)
        .execute(pool)
        .await
        .expect("Backdate failed");
}

async fn create_campaign(pool: &PgPool, target: Decimal) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO campaigns (id, title, target_amount) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(format!("test campaign {id}"))
        .bind(target)
        .execute(pool)
        .await
        .expect("Failed to create campaign");
    id
}

fn tx_hash() -> String {
    format!("0x{}", Uuid::new_v4().simple())
}

fn pending(campaign_id: Uuid, donor: &str, amount: Decimal) -> NewPendingDonation {
    NewPendingDonation {
        tx_hash: tx_hash(),
        campaign_id,
        donor_address: donor.to_string(),
        amount,
        message: None,
        is_anonymous: false,
        announced_at: now_primitive(),
    }
}

fn settled(campaign_id: Uuid, donor: &str, amount: Decimal) -> NewConfirmedDonation {
    NewConfirmedDonation {
        tx_hash: tx_hash(),
        campaign_id,
        donor_address: donor.to_string(),
        amount,
        block_number: 100,
        settled_at: now_primitive(),
    }
}

#[tokio::test]
#[ignore]
async fn duplicate_announcements_produce_one_row() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;
    let insert = pending(campaign_id, "0xalice", Decimal::from(10));

    assert!(Donation::insert_pending(&pool, &insert)
        .await
        .expect("First insert failed"));
    assert!(!Donation::insert_pending(&pool, &insert)
        .await
        .expect("Second insert failed"));

    let donation = Donation::get_by_tx_hash(&pool, &insert.tx_hash)
        .await
        .expect("Lookup failed")
        .expect("Donation missing");
    assert_eq!(donation.status, DonationStatus::Pending);
    assert!(donation.announced_at.is_some());
}

#[tokio::test]
#[ignore]
async fn settlement_promotes_pending_exactly_once() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;
    let announce = pending(campaign_id, "0xbob", Decimal::from(25));
    assert!(Donation::insert_pending(&pool, &announce)
        .await
        .expect("Insert failed"));

    let settle = NewConfirmedDonation {
        tx_hash: announce.tx_hash.clone(),
        campaign_id,
        donor_address: "0xbob".into(),
        amount: Decimal::from(25),
        block_number: 42,
        settled_at: now_primitive(),
    };

    let first = Donation::confirm_or_insert(&pool, &settle)
        .await
        .expect("First settle failed");
    let second = Donation::confirm_or_insert(&pool, &settle)
        .await
        .expect("Second settle failed");

    let donation = first.expect("First settlement should confirm");
    assert_eq!(donation.status, DonationStatus::Confirmed);
    assert_eq!(donation.block_number, Some(42));
    assert!(donation.announced_at.is_some());
    assert!(second.is_none(), "Redelivered settlement must be a no-op");
}

#[tokio::test]
#[ignore]
async fn ledger_first_settlement_creates_confirmed_row() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;
    let settle = settled(campaign_id, "0xcarol", Decimal::from(50));

    let donation = Donation::confirm_or_insert(&pool, &settle)
        .await
        .expect("Settle failed")
        .expect("Fresh settlement should confirm");
    assert_eq!(donation.status, DonationStatus::Confirmed);
    assert!(donation.announced_at.is_none());

    // A late stream announcement for the same hash changes nothing.
    let late = NewPendingDonation {
        tx_hash: settle.tx_hash.clone(),
        campaign_id,
        donor_address: "0xcarol".into(),
        amount: Decimal::from(50),
        message: Some("late".into()),
        is_anonymous: false,
        announced_at: now_primitive(),
    };
    assert!(!Donation::insert_pending(&pool, &late)
        .await
        .expect("Late announce failed"));
}

#[tokio::test]
#[ignore]
async fn terminal_statuses_never_move() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;
    let insert = pending(campaign_id, "0xdave", Decimal::from(5));
    assert!(Donation::insert_pending(&pool, &insert)
        .await
        .expect("Insert failed"));

    assert!(Donation::orphan_if_pending(&pool, &insert.tx_hash)
        .await
        .expect("Orphan failed"));

    // Neither a CAS confirm nor a failure marker touches an orphaned row.
    let confirmed =
        Donation::confirm_if_pending(&pool, &insert.tx_hash, 7, now_primitive())
            .await
            .expect("Confirm attempt failed");
    assert!(confirmed.is_none());
    assert!(!Donation::fail_if_pending(&pool, &insert.tx_hash)
        .await
        .expect("Fail attempt failed"));

    let donation = Donation::get_by_tx_hash(&pool, &insert.tx_hash)
        .await
        .expect("Lookup failed")
        .expect("Donation missing");
    assert_eq!(donation.status, DonationStatus::Orphaned);
}

#[tokio::test]
#[ignore]
async fn stale_sweep_excludes_terminal_rows() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;

    let stuck = pending(campaign_id, "0xerin", Decimal::from(1));
    let done = pending(campaign_id, "0xerin", Decimal::from(2));
    assert!(Donation::insert_pending(&pool, &stuck).await.expect("Insert failed"));
    assert!(Donation::insert_pending(&pool, &done).await.expect("Insert failed"));
    assert!(Donation::fail_if_pending(&pool, &done.tx_hash)
        .await
        .expect("Fail failed"));

    let cutoff = now_primitive() + time::Duration::seconds(1);
    let stale = Donation::find_stale_pending(&pool, cutoff, 500)
        .await
        .expect("Sweep query failed");
    let hashes: Vec<&str> = stale.iter().map(|d| d.tx_hash.as_str()).collect();
    assert!(hashes.contains(&stuck.tx_hash.as_str()));
    assert!(!hashes.contains(&done.tx_hash.as_str()));
}

#[tokio::test]
#[ignore]
async fn campaign_aggregates_count_distinct_donors() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;
    let donor = format!("0xdonor-{}", Uuid::new_v4().simple());

    for amount in [10, 15] {
        let settle = settled(campaign_id, &donor, Decimal::from(amount));
        let donation = Donation::confirm_or_insert(&pool, &settle)
            .await
            .expect("Settle failed")
            .expect("Should confirm");
        let has_other = Donation::donor_has_other_confirmed(
            &pool,
            campaign_id,
            &donation.donor_address,
            &donation.tx_hash,
        )
        .await
        .expect("Donor check failed");
        Campaign::apply_confirmed_donation(&pool, campaign_id, donation.amount, !has_other)
            .await
            .expect("Aggregate update failed");
    }

    let campaign = Campaign::get(&pool, campaign_id)
        .await
        .expect("Lookup failed")
        .expect("Campaign missing");
    assert_eq!(campaign.current_amount, Decimal::from(25));
    assert_eq!(campaign.donor_count, 1, "Same donor twice counts once");
}

#[tokio::test]
#[ignore]
async fn completion_flips_exactly_once() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(20)).await;

    let settle = settled(campaign_id, "0xfrank", Decimal::from(30));
    let donation = Donation::confirm_or_insert(&pool, &settle)
        .await
        .expect("Settle failed")
        .expect("Should confirm");
    Campaign::apply_confirmed_donation(&pool, campaign_id, donation.amount, true)
        .await
        .expect("Aggregate update failed");

    assert!(Campaign::complete_if_reached(&pool, campaign_id)
        .await
        .expect("First completion check failed"));
    assert!(!Campaign::complete_if_reached(&pool, campaign_id)
        .await
        .expect("Second completion check failed"));

    let campaign = Campaign::get(&pool, campaign_id)
        .await
        .expect("Lookup failed")
        .expect("Campaign missing");
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert!(campaign.completed_at.is_some());
}

#[tokio::test]
#[ignore]
async fn sweep_settles_stale_donations_and_repairs_aggregates() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;

    // One donation settled normally, then the campaign aggregates are
    // corrupted behind the pipeline's back.
    let seed = settled(campaign_id, "0xsweep-seed", Decimal::from(10));
    updater(&pool)
        .await
        .settle(&seed)
        .await
        .expect("Seed settle failed")
        .expect("Seed should confirm");
    sqlx::query("UPDATE campaigns SET current_amount = 0, donor_count = 0 WHERE id = $1")
        .bind(campaign_id)
        .execute(&pool)
        .await
        .expect("Skew failed");

    // Three stale announcements with different ledger fates.
    let settles = pending(campaign_id, "0xsweep-a", Decimal::from(25));
    let reverts = pending(campaign_id, "0xsweep-b", Decimal::from(20));
    let vanishes = pending(campaign_id, "0xsweep-c", Decimal::from(30));
    for insert in [&settles, &reverts, &vanishes] {
        assert!(Donation::insert_pending(&pool, insert)
            .await
            .expect("Insert failed"));
        backdate(&pool, &insert.tx_hash).await;
    }

    let mut receipts = HashMap::new();
    receipts.insert(
        settles.tx_hash.clone(),
        SettlementReceipt {
            tx_hash: settles.tx_hash.clone(),
            status: ReceiptStatus::Success,
            block_number: 7,
            settled_at: 1_756_300_000,
        },
    );
    receipts.insert(
        reverts.tx_hash.clone(),
        SettlementReceipt {
            tx_hash: reverts.tx_hash.clone(),
            status: ReceiptStatus::Failed,
            block_number: 8,
            settled_at: 1_756_300_000,
        },
    );

    let outcome = sweeper(&pool, receipts).await.sweep().await;
    assert!(outcome.confirmed >= 1);
    assert!(outcome.failed >= 1);
    assert!(outcome.orphaned >= 1);

    let status = |hash: &str| {
        let pool = pool.clone();
        let hash = hash.to_string();
        async move {
            Donation::get_by_tx_hash(&pool, &hash)
                .await
                .expect("Lookup failed")
                .expect("Donation missing")
        }
    };
    let confirmed = status(&settles.tx_hash).await;
    assert_eq!(confirmed.status, DonationStatus::Confirmed);
    assert_eq!(confirmed.block_number, Some(7));
    assert_eq!(status(&reverts.tx_hash).await.status, DonationStatus::Failed);
    assert_eq!(
        status(&vanishes.tx_hash).await.status,
        DonationStatus::Orphaned
    );

    // The sweep's recompute pass restored the skewed aggregates from the
    // confirmed rows: seed + the newly-confirmed donation, nothing else.
    let campaign = Campaign::get(&pool, campaign_id)
        .await
        .expect("Lookup failed")
        .expect("Campaign missing");
    assert_eq!(campaign.current_amount, Decimal::from(35));
    assert_eq!(campaign.donor_count, 2);
}

#[tokio::test]
#[ignore]
async fn ledger_watcher_settles_events_atomically() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;
    let cache = cache().await;

    let (event_tx, event_rx) = ledger_event_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = LedgerWatcher::new(
        pool.clone(),
        cache.clone(),
        AggregateUpdater::new(pool.clone(), cache),
        event_rx,
        shutdown_rx,
    );
    let handle = tokio::spawn(watcher.run());

    let hash = tx_hash();
    event_tx
        .send(LedgerEvent::DonationSettled {
            tx_hash: hash.clone(),
            campaign_id,
            donor_address: "0xwatcher".into(),
            amount: Decimal::from(40),
            block_number: 12,
            settled_at: 1_756_300_000,
        })
        .await
        .expect("Send failed");

    let mut confirmed = None;
    for _ in 0..100 {
        if let Some(donation) = Donation::get_by_tx_hash(&pool, &hash)
            .await
            .expect("Lookup failed")
        {
            if donation.status == DonationStatus::Confirmed {
                confirmed = Some(donation);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let donation = confirmed.expect("Settlement was not applied");
    assert_eq!(donation.block_number, Some(12));
    assert!(donation.announced_at.is_none());

    // Aggregates land in the same transaction as the status change, so
    // once the row is confirmed the campaign totals already include it.
    let campaign = Campaign::get(&pool, campaign_id)
        .await
        .expect("Lookup failed")
        .expect("Campaign missing");
    assert_eq!(campaign.current_amount, Decimal::from(40));
    assert_eq!(campaign.donor_count, 1);

    shutdown_tx.send(true).expect("Shutdown failed");
    handle.await.expect("Watcher panicked");
}

#[tokio::test]
#[ignore]
async fn concurrent_announce_and_settle_resolve_to_one_confirmed_row() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;

    let announce = pending(campaign_id, "0xrace", Decimal::from(5));
    let settle = NewConfirmedDonation {
        tx_hash: announce.tx_hash.clone(),
        campaign_id,
        donor_address: "0xrace".into(),
        amount: Decimal::from(7),
        block_number: 64,
        settled_at: now_primitive(),
    };

    let (_announced, confirmed) = tokio::join!(
        Donation::insert_pending(&pool, &announce),
        Donation::confirm_or_insert(&pool, &settle),
    );
    let donation = confirmed
        .expect("Settle failed")
        .expect("Settlement must confirm whichever writer wins");
    assert_eq!(donation.status, DonationStatus::Confirmed);
    assert_eq!(donation.amount, Decimal::from(7));

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM donations WHERE tx_hash = $1")
        .bind(&announce.tx_hash)
        .fetch_one(&pool)
        .await
        .expect("Count failed");
    assert_eq!(count, 1);
}

#[tokio::test]
#[ignore]
async fn ledger_values_override_stream_announcement() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;

    let announce = pending(campaign_id, "0xstream", Decimal::from(5));
    assert!(Donation::insert_pending(&pool, &announce)
        .await
        .expect("Insert failed"));

    // The chain disagrees with the provisional announcement.
    let correction = NewConfirmedDonation {
        tx_hash: announce.tx_hash.clone(),
        campaign_id,
        donor_address: "0xledger".into(),
        amount: Decimal::from(8),
        block_number: 9,
        settled_at: now_primitive(),
    };
    let donation = Donation::confirm_or_insert(&pool, &correction)
        .await
        .expect("Settle failed")
        .expect("Promotion should confirm");

    assert_eq!(donation.amount, Decimal::from(8));
    assert_eq!(donation.donor_address, "0xledger");
    assert_eq!(donation.block_number, Some(9));
    assert!(donation.announced_at.is_some(), "Provenance survives");
}

#[tokio::test]
#[ignore]
async fn concurrent_settlements_by_one_donor_count_once() {
    let pool = connect().await;
    let campaign_id = create_campaign(&pool, Decimal::from(1000)).await;
    let donor = format!("0xsame-{}", Uuid::new_v4().simple());
    let updater = updater(&pool).await;

    let first = settled(campaign_id, &donor, Decimal::from(10));
    let second = settled(campaign_id, &donor, Decimal::from(20));
    let (a, b) = tokio::join!(updater.settle(&first), updater.settle(&second));
    assert!(a.expect("First settle failed").is_some());
    assert!(b.expect("Second settle failed").is_some());

    let campaign = Campaign::get(&pool, campaign_id)
        .await
        .expect("Lookup failed")
        .expect("Campaign missing");
    assert_eq!(campaign.current_amount, Decimal::from(30));
    assert_eq!(campaign.donor_count, 1, "Same donor settling twice counts once");
}

#[tokio::test]
#[ignore]
async fn donor_lifetime_aggregate_accumulates() {
    let pool = connect().await;
    let donor = format!("0xlife-{}", Uuid::new_v4().simple());

    DonorAggregate::record_donation(&pool, &donor, Decimal::from(10))
        .await
        .expect("First record failed");
    DonorAggregate::record_donation(&pool, &donor, Decimal::from(3))
        .await
        .expect("Second record failed");

    let aggregate = DonorAggregate::get(&pool, &donor)
        .await
        .expect("Lookup failed")
        .expect("Aggregate missing");
    assert_eq!(aggregate.total_donated, Decimal::from(13));
    assert_eq!(aggregate.donation_count, 2);
    assert!(aggregate.first_donation_at <= aggregate.last_donation_at);
}

#[tokio::test]
#[ignore]
async fn raw_stream_events_dedupe_by_event_id() {
    let pool = connect().await;
    let event_id = format!("evt-{}", Uuid::new_v4());
    let payload = serde_json::json!({"txHash": "0xaa"});

    assert!(
        RawStreamEvent::insert(&pool, &event_id, "donation", "donations", &payload)
            .await
            .expect("First insert failed")
    );
    assert!(
        !RawStreamEvent::insert(&pool, &event_id, "donation", "donations", &payload)
            .await
            .expect("Second insert failed")
    );
}
