/// Redis archive for closed positions and ledger snapshots
///
/// Closed positions go into per-instrument sorted sets keyed by close time,
/// so time-range loads and cleanup are cheap. The engine treats this store as
/// optional: a missing Redis degrades to a warning, never a startup failure.
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use crate::lifecycle::Position;
use crate::risk::LedgerSnapshot;
use crate::Result;

const SNAPSHOT_KEY: &str = "ledger:latest";

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect with a 5 second timeout
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    /// Archive a closed position under `positions:{instrument}`
    pub async fn archive_position(&mut self, position: &Position) -> Result<()> {
        let key = format!("positions:{}", position.instrument);
        let value = serde_json::to_string(position)?;
        let score = position
            .closed_at
            .unwrap_or_else(Utc::now)
            .timestamp() as f64;

        self.conn.zadd::<_, _, _, ()>(&key, value, score).await?;
        tracing::debug!(position = %position.id, instrument = %position.instrument, "position archived");

        Ok(())
    }

    /// Load archived positions for an instrument, oldest first
    pub async fn load_positions(
        &mut self,
        instrument: &str,
        hours_back: u64,
    ) -> Result<Vec<Position>> {
        let key = format!("positions:{}", instrument);
        let cutoff = Utc::now() - chrono::Duration::hours(hours_back as i64);
        let min_score = cutoff.timestamp() as f64;

        let results: Vec<String> = self.conn.zrangebyscore(&key, min_score, "+inf").await?;

        let mut positions = Vec::with_capacity(results.len());
        for json_str in results {
            positions.push(serde_json::from_str(&json_str)?);
        }

        tracing::debug!(
            count = positions.len(),
            instrument,
            "loaded archived positions from Redis"
        );

        Ok(positions)
    }

    pub async fn save_snapshot(&mut self, snapshot: &LedgerSnapshot) -> Result<()> {
        let value = serde_json::to_string(snapshot)?;
        self.conn.set::<_, _, ()>(SNAPSHOT_KEY, value).await?;
        Ok(())
    }

    pub async fn load_snapshot(&mut self) -> Result<Option<LedgerSnapshot>> {
        let value: Option<String> = self.conn.get(SNAPSHOT_KEY).await?;
        match value {
            Some(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
            None => Ok(None),
        }
    }

    /// Drop archived positions older than `keep_hours`
    pub async fn cleanup_old(&mut self, instrument: &str, keep_hours: u64) -> Result<usize> {
        let key = format!("positions:{}", instrument);
        let cutoff = Utc::now() - chrono::Duration::hours(keep_hours as i64);
        let max_score = cutoff.timestamp() as f64;

        let removed: usize = self.conn.zrembyscore(&key, "-inf", max_score).await?;

        if removed > 0 {
            tracing::debug!(removed, instrument, "cleaned up archived positions");
        }

        Ok(removed)
    }
}
