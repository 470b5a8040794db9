use tracing::debug;

use crate::db::models::SeasonLogsRow;
use crate::error::Result;
use crate::state::SeasonLogCache;

/// Durable copy of each season's raw logs, one row per season. Lets a restarted
/// process serve from the last good fetch instead of going upstream first.
#[derive(Clone)]
pub struct SeasonLogArchive {
    pool: sqlx::SqlitePool,
}

impl SeasonLogArchive {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load(&self, season: &str) -> Result<Option<SeasonLogCache>> {
        let row = sqlx::query_as::<_, SeasonLogsRow>(
            r#"
            SELECT season, payload, max_game_date, row_count, fetched_at
            FROM season_logs
            WHERE season = ?
            "#,
        )
        .bind(season)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                debug!(
                    season = %r.season,
                    rows = r.row_count,
                    max_game_date = ?r.max_game_date,
                    fetched_at = %r.fetched_at,
                    "Season log archive hit"
                );
                Ok(Some(serde_json::from_str(&r.payload)?))
            }
            None => Ok(None),
        }
    }

    /// Full replace of the season's record.
    pub async fn save(&self, cache: &SeasonLogCache) -> Result<()> {
        let payload = serde_json::to_string(cache)?;
        let max_game_date = cache.max_game_date.map(|d| d.to_string());
        let row_count = (cache.player_logs.len() + cache.team_logs.len()) as i64;
        let fetched_at = cache.fetched_at.to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO season_logs (season, payload, max_game_date, row_count, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(season) DO UPDATE SET
                payload = excluded.payload,
                max_game_date = excluded.max_game_date,
                row_count = excluded.row_count,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&cache.season)
        .bind(payload)
        .bind(max_game_date)
        .bind(row_count)
        .bind(fetched_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
