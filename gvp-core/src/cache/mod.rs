//! Cache & broadcast store backed by redis.
//!
//! Holds the advisory, rebuildable side of the system: ranked donor
//! leaderboards (sorted sets), capped recent-donation feeds (lists), a
//! TTL'd campaign view cache, and the pub/sub channels that carry
//! [`BroadcastEvent`]s to the fan-out hub.
//!
//! Everything here can be lost and rebuilt from the donation table.
//! Callers treat failures as degradation: log a warning and keep going,
//! the persistent store stays authoritative.

use gvp_sdk::objects::{BroadcastEvent, DonationSummary};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Errors from the cache/broker tier.
///
/// Always recoverable from the caller's perspective; no cache error may
/// corrupt or abort a donation write.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Handle to the redis cache/broker. Cheap to clone.
#[derive(Clone)]
pub struct CacheStore {
    conn: ConnectionManager,
    client: redis::Client,
    key_prefix: String,
    /// Maximum entries kept in each recent-donation feed.
    feed_cap: i64,
    /// Token decimals used to scale raw amounts into leaderboard scores.
    token_decimals: u32,
}

impl CacheStore {
    /// Connect to redis.
    ///
    /// # Arguments
    /// * `url` - redis connection URL (e.g. redis://localhost:6379)
    /// * `key_prefix` - prefix for all keys and channels (default "gvp")
    /// * `feed_cap` - entries kept per recent feed
    /// * `token_decimals` - decimals of the donation token (scores are
    ///   kept in whole-token units)
    pub async fn connect(
        url: &str,
        key_prefix: Option<&str>,
        feed_cap: i64,
        token_decimals: u32,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;

        info!(url = %url, "Connected to redis cache/broker");

        Ok(Self {
            conn,
            client,
            key_prefix: key_prefix.unwrap_or("gvp").to_string(),
            feed_cap,
            token_decimals,
        })
    }

    // -- Pub/sub --------------------------------------------------------

    /// Publish a broadcast event on its channel.
    ///
    /// Fire-and-forget from the publisher's perspective: subscribers that
    /// are down simply miss the message and rebuild from the database.
    pub async fn publish(&self, event: &BroadcastEvent) -> Result<(), CacheError> {
        let channel = self.event_channel(event);
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let _: () = conn.publish(&channel, payload).await?;
        debug!(channel = %channel, "Published broadcast event");
        Ok(())
    }

    /// Open a dedicated pub/sub connection subscribed to all broadcast
    /// event channels. Pub/sub needs its own connection, so this bypasses
    /// the shared [`ConnectionManager`].
    pub async fn subscribe_events(&self) -> Result<redis::aio::PubSub, CacheError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub
            .psubscribe(format!("{}:events:*", self.key_prefix))
            .await?;
        Ok(pubsub)
    }

    fn event_channel(&self, event: &BroadcastEvent) -> String {
        let kind = match event {
            BroadcastEvent::Donation { .. } => "donations",
            BroadcastEvent::CampaignUpdate { .. } => "campaigns",
            BroadcastEvent::Stats { .. } => "stats",
        };
        format!("{}:events:{}", self.key_prefix, kind)
    }

    // -- Recent feeds ---------------------------------------------------

    /// Push a donation summary onto the global and per-campaign feeds,
    /// trimming both to the configured cap.
    pub async fn push_feed(&self, summary: &DonationSummary) -> Result<(), CacheError> {
        let payload = serde_json::to_string(summary)?;
        let global_key = self.feed_key(None);
        let campaign_key = self.feed_key(Some(summary.campaign_id));
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .lpush(&global_key, &payload)
            .ltrim(&global_key, 0, (self.feed_cap - 1) as isize)
            .lpush(&campaign_key, &payload)
            .ltrim(&campaign_key, 0, (self.feed_cap - 1) as isize)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Most-recent-first feed entries; entries that fail to decode are
    /// skipped (the feed is advisory).
    pub async fn recent_feed(
        &self,
        campaign_id: Option<Uuid>,
        count: i64,
    ) -> Result<Vec<DonationSummary>, CacheError> {
        let key = self.feed_key(campaign_id);
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(&key, 0, (count - 1) as isize).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }

    fn feed_key(&self, campaign_id: Option<Uuid>) -> String {
        match campaign_id {
            Some(id) => format!("{}:feed:campaign:{}", self.key_prefix, id),
            None => format!("{}:feed:global", self.key_prefix),
        }
    }

    // -- Leaderboards ---------------------------------------------------

    /// Increment a donor's score on the global and per-campaign
    /// leaderboards by the donation amount (in whole-token units).
    pub async fn incr_leaderboard(
        &self,
        campaign_id: Uuid,
        donor_address: &str,
        amount: Decimal,
    ) -> Result<(), CacheError> {
        let score = self.amount_to_score(amount);
        let global_key = self.leaderboard_key(None);
        let campaign_key = self.leaderboard_key(Some(campaign_id));
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .zincr(&global_key, donor_address, score)
            .zincr(&campaign_key, donor_address, score)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Top donors by cumulative score, highest first.
    pub async fn leaderboard(
        &self,
        campaign_id: Option<Uuid>,
        top: isize,
    ) -> Result<Vec<(String, f64)>, CacheError> {
        let key = self.leaderboard_key(campaign_id);
        let mut conn = self.conn.clone();
        let entries: Vec<(String, f64)> = conn.zrevrange_withscores(&key, 0, top - 1).await?;
        Ok(entries)
    }

    fn leaderboard_key(&self, campaign_id: Option<Uuid>) -> String {
        match campaign_id {
            Some(id) => format!("{}:lb:campaign:{}", self.key_prefix, id),
            None => format!("{}:lb:global", self.key_prefix),
        }
    }

    /// Scale a raw smallest-unit amount into a leaderboard score.
    ///
    /// Sorted-set scores are f64, so precision loss is acceptable here;
    /// the donation table keeps the exact value.
    fn amount_to_score(&self, amount: Decimal) -> f64 {
        let scale = Decimal::from(10u64.pow(self.token_decimals.min(18)));
        (amount / scale).to_f64().unwrap_or(0.0)
    }

    // -- Campaign view cache --------------------------------------------

    /// Cache a rendered campaign view with a TTL.
    pub async fn set_campaign_view(
        &self,
        campaign_id: Uuid,
        json: &str,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let key = self.campaign_view_key(campaign_id);
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(&key, json, ttl_secs).await?;
        Ok(())
    }

    pub async fn get_campaign_view(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<String>, CacheError> {
        let key = self.campaign_view_key(campaign_id);
        let mut conn = self.conn.clone();
        let cached: Option<String> = conn.get(&key).await?;
        Ok(cached)
    }

    /// Drop the cached view after an aggregate change.
    pub async fn invalidate_campaign(&self, campaign_id: Uuid) -> Result<(), CacheError> {
        let key = self.campaign_view_key(campaign_id);
        let mut conn = self.conn.clone();
        let _: () = conn.del(&key).await?;
        debug!(campaign_id = %campaign_id, "Invalidated campaign view cache");
        Ok(())
    }

    fn campaign_view_key(&self, campaign_id: Uuid) -> String {
        format!("{}:campaign:{}", self.key_prefix, campaign_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gvp_sdk::objects::{DonationState, StatsSnapshot};

    // Connected tests require redis; run with: cargo test -- --ignored

    fn test_event() -> BroadcastEvent {
        BroadcastEvent::Stats {
            data: StatsSnapshot {
                total_raised: Decimal::from(10),
                confirmed_donations: 2,
            },
        }
    }

    #[tokio::test]
    #[ignore]
    async fn feed_is_capped_and_most_recent_first() {
        let cache = CacheStore::connect("redis://localhost:6379", Some("gvp-test"), 3, 18)
            .await
            .expect("redis not running");
        let campaign = Uuid::new_v4();

        for i in 0..5 {
            let summary = DonationSummary {
                tx_hash: format!("0x{i:02}"),
                campaign_id: campaign,
                donor_address: Some("0xdonor".into()),
                amount: Decimal::from(i),
                message: None,
                state: DonationState::Pending,
                timestamp: i,
            };
            cache.push_feed(&summary).await.expect("push");
        }

        let feed = cache.recent_feed(Some(campaign), 10).await.expect("read");
        assert_eq!(feed.len(), 3);
        assert_eq!(feed[0].tx_hash, "0x04");
    }

    #[tokio::test]
    #[ignore]
    async fn publish_reaches_pattern_subscriber() {
        use futures_util::StreamExt;

        let cache = CacheStore::connect("redis://localhost:6379", Some("gvp-test"), 10, 18)
            .await
            .expect("redis not running");
        let mut pubsub = cache.subscribe_events().await.expect("subscribe");

        cache.publish(&test_event()).await.expect("publish");

        let message = pubsub.on_message().next().await.expect("message");
        let payload: String = message.get_payload().expect("payload");
        let decoded: BroadcastEvent = serde_json::from_str(&payload).expect("decode");
        assert_eq!(decoded, test_event());
    }
}
