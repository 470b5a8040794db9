use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::db::models::SnapshotRow;
use crate::error::{AppError, Result};
use crate::types::{MatchupSnapshot, SnapshotKey};

/// Keyed storage for computed matchup snapshots.
///
/// `invalidate` is soft: the payload stays readable through `last_known` so a
/// failed recompute can still serve the previous result.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Current snapshot for the key; None if missing or invalidated.
    async fn get(&self, key: SnapshotKey) -> Result<Option<MatchupSnapshot>>;

    /// Full replace. Clears any invalidation mark.
    async fn put(&self, key: SnapshotKey, snapshot: &MatchupSnapshot) -> Result<()>;

    /// Returns true if a snapshot existed and is now marked invalid.
    async fn invalidate(&self, key: SnapshotKey) -> Result<bool>;

    /// Latest payload for the key, invalidated or not.
    async fn last_known(&self, key: SnapshotKey) -> Result<Option<MatchupSnapshot>>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteSnapshotStore {
    pool: sqlx::SqlitePool,
}

impl SqliteSnapshotStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_row(&self, key: SnapshotKey) -> Result<Option<SnapshotRow>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT slate_date, window_key, as_of_date, payload, invalidated, updated_at
            FROM matchup_snapshots
            WHERE slate_date = ? AND window_key = ?
            "#,
        )
        .bind(key.slate_date.to_string())
        .bind(key.window.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

fn decode(row: SnapshotRow) -> Result<MatchupSnapshot> {
    debug!(
        slate_date = %row.slate_date,
        window = %row.window_key,
        as_of = %row.as_of_date,
        invalidated = row.invalidated != 0,
        updated_at_ms = row.updated_at,
        "Snapshot row read"
    );
    let snapshot: MatchupSnapshot = serde_json::from_str(&row.payload)?;
    if snapshot.slate_date.to_string() != row.slate_date || snapshot.window.as_str() != row.window_key {
        return Err(AppError::Malformed(format!(
            "snapshot payload for {}/{} describes {}",
            row.slate_date,
            row.window_key,
            snapshot.key()
        )));
    }
    Ok(snapshot)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn get(&self, key: SnapshotKey) -> Result<Option<MatchupSnapshot>> {
        match self.fetch_row(key).await? {
            Some(row) if row.invalidated == 0 => decode(row).map(Some),
            _ => Ok(None),
        }
    }

    async fn put(&self, key: SnapshotKey, snapshot: &MatchupSnapshot) -> Result<()> {
        let payload = serde_json::to_string(snapshot)?;

        sqlx::query(
            r#"
            INSERT INTO matchup_snapshots
                (slate_date, window_key, as_of_date, payload, invalidated, updated_at)
            VALUES (?, ?, ?, ?, 0, ?)
            ON CONFLICT(slate_date, window_key) DO UPDATE SET
                as_of_date = excluded.as_of_date,
                payload = excluded.payload,
                invalidated = 0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.slate_date.to_string())
        .bind(key.window.as_str())
        .bind(snapshot.as_of_date.to_string())
        .bind(payload)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn invalidate(&self, key: SnapshotKey) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE matchup_snapshots
            SET invalidated = 1
            WHERE slate_date = ? AND window_key = ? AND invalidated = 0
            "#,
        )
        .bind(key.slate_date.to_string())
        .bind(key.window.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn last_known(&self, key: SnapshotKey) -> Result<Option<MatchupSnapshot>> {
        self.fetch_row(key).await?.map(decode).transpose()
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store. Same contract as the SQLite one, nothing survives a restart.
#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: DashMap<SnapshotKey, (MatchupSnapshot, bool)>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn get(&self, key: SnapshotKey) -> Result<Option<MatchupSnapshot>> {
        Ok(self
            .entries
            .get(&key)
            .filter(|e| !e.1)
            .map(|e| e.0.clone()))
    }

    async fn put(&self, key: SnapshotKey, snapshot: &MatchupSnapshot) -> Result<()> {
        self.entries.insert(key, (snapshot.clone(), false));
        Ok(())
    }

    async fn invalidate(&self, key: SnapshotKey) -> Result<bool> {
        Ok(match self.entries.get_mut(&key) {
            Some(mut e) if !e.1 => {
                e.1 = true;
                true
            }
            _ => false,
        })
    }

    async fn last_known(&self, key: SnapshotKey) -> Result<Option<MatchupSnapshot>> {
        Ok(self.entries.get(&key).map(|e| e.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::testutil::{date, game};
    use crate::types::Window;
    use chrono::NaiveDate;

    fn snapshot(slate: NaiveDate, window: Window, games: usize) -> MatchupSnapshot {
        MatchupSnapshot {
            slate_date: slate,
            window,
            as_of_date: slate.pred_opt().unwrap(),
            logs_through: slate.pred_opt(),
            games: (0..games).map(|i| game(&format!("g{i}"), "BOS", "NYK")).collect(),
            injuries: Vec::new(),
            players: Vec::new(),
        }
    }

    async fn contract(store: &dyn SnapshotStore) {
        let slate = date(2026, 1, 15);
        let season = SnapshotKey::new(slate, Window::Season);
        let last10 = SnapshotKey::new(slate, Window::Last10);

        assert!(store.get(season).await.unwrap().is_none());
        assert!(!store.invalidate(season).await.unwrap());

        store.put(season, &snapshot(slate, Window::Season, 1)).await.unwrap();
        store.put(season, &snapshot(slate, Window::Season, 3)).await.unwrap();
        assert_eq!(store.get(season).await.unwrap().unwrap().games.len(), 3);
        assert!(store.get(last10).await.unwrap().is_none());

        // Soft invalidation hides the payload from get but not from last_known.
        assert!(store.invalidate(season).await.unwrap());
        assert!(!store.invalidate(season).await.unwrap());
        assert!(store.get(season).await.unwrap().is_none());
        assert_eq!(store.last_known(season).await.unwrap().unwrap().games.len(), 3);

        store.put(season, &snapshot(slate, Window::Season, 2)).await.unwrap();
        assert_eq!(store.get(season).await.unwrap().unwrap().games.len(), 2);
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        contract(&SqliteSnapshotStore::new(test_pool().await)).await;
    }

    #[tokio::test]
    async fn memory_store_contract() {
        contract(&MemorySnapshotStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_rejects_payload_under_wrong_key() {
        let pool = test_pool().await;
        let store = SqliteSnapshotStore::new(pool.clone());
        let slate = date(2026, 1, 15);
        store
            .put(SnapshotKey::new(slate, Window::Last10), &snapshot(slate, Window::Season, 1))
            .await
            .unwrap();
        let err = store.get(SnapshotKey::new(slate, Window::Last10)).await.unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
    }
}
